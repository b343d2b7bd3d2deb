//! Worklane payment gateway integration.
//!
//! Three concerns, all side-effect free except the HTTP client:
//! - `gateway`: order creation against the hosted payment provider.
//! - `signature`: HMAC-SHA256 verification of payment callbacks. This is the
//!   single trust boundary of the billing flow — nothing downstream runs
//!   unless the signature checks out.
//! - `plan`: billing cycle parsing and period arithmetic.

pub mod gateway;
pub mod plan;
pub mod signature;
