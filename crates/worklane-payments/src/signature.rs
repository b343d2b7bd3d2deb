use hmac::{Hmac, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// Compute the hex signature the gateway produces for a captured payment:
/// HMAC-SHA256 over `"{order_id}|{payment_id}"` keyed with the shared
/// secret.
pub fn sign(secret: &str, order_id: &str, payment_id: &str) -> String {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .expect("HMAC accepts keys of any length");
    mac.update(order_id.as_bytes());
    mac.update(b"|");
    mac.update(payment_id.as_bytes());
    hex::encode(mac.finalize().into_bytes())
}

/// Check a callback signature. Comparison goes through `Mac::verify_slice`,
/// which is constant-time; a plain `==` on the hex strings would leak how
/// many leading bytes matched.
pub fn verify(secret: &str, order_id: &str, payment_id: &str, supplied: &str) -> bool {
    let Ok(supplied_bytes) = hex::decode(supplied) else {
        return false;
    };

    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .expect("HMAC accepts keys of any length");
    mac.update(order_id.as_bytes());
    mac.update(b"|");
    mac.update(payment_id.as_bytes());
    mac.verify_slice(&supplied_bytes).is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    const SECRET: &str = "test_gateway_secret";

    #[test]
    fn valid_signature_verifies() {
        let sig = sign(SECRET, "order_123", "pay_456");
        assert!(verify(SECRET, "order_123", "pay_456", &sig));
    }

    #[test]
    fn any_single_character_mutation_rejects() {
        let sig = sign(SECRET, "order_123", "pay_456");

        assert!(!verify(SECRET, "order_124", "pay_456", &sig));
        assert!(!verify(SECRET, "order_123", "pay_457", &sig));

        let mut tampered = sig.clone().into_bytes();
        tampered[0] = if tampered[0] == b'0' { b'1' } else { b'0' };
        let tampered = String::from_utf8(tampered).unwrap();
        assert!(!verify(SECRET, "order_123", "pay_456", &tampered));
    }

    #[test]
    fn wrong_secret_rejects() {
        let sig = sign(SECRET, "order_123", "pay_456");
        assert!(!verify("other_secret", "order_123", "pay_456", &sig));
    }

    #[test]
    fn non_hex_signature_rejects_without_panicking() {
        assert!(!verify(SECRET, "order_123", "pay_456", "not hex at all"));
        assert!(!verify(SECRET, "order_123", "pay_456", ""));
    }

    #[test]
    fn separator_is_part_of_the_signed_input() {
        // "a|bc" and "ab|c" must not collide.
        let sig = sign(SECRET, "a", "bc");
        assert!(!verify(SECRET, "ab", "c", &sig));
    }
}
