use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::plan::BillingCycle;

/// HTTP client for the hosted payment provider's order API. The key id and
/// secret authenticate every call via basic auth; the secret also keys
/// callback signature verification and must never reach a client-facing
/// response.
pub struct PaymentGateway {
    http: reqwest::Client,
    base_url: String,
    key_id: String,
    key_secret: String,
}

#[derive(Debug, Serialize)]
struct OrderPayload<'a> {
    /// Minor currency units (paise).
    amount: i64,
    currency: &'a str,
    receipt: String,
    notes: OrderNotes<'a>,
}

#[derive(Debug, Serialize)]
struct OrderNotes<'a> {
    plan: &'a str,
    cycle: &'a str,
}

/// The subset of the gateway's order object the rest of the system needs.
#[derive(Debug, Clone, Deserialize)]
pub struct GatewayOrder {
    pub id: String,
    pub amount: i64,
    pub currency: String,
}

impl PaymentGateway {
    pub fn new(base_url: String, key_id: String, key_secret: String) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url,
            key_id,
            key_secret,
        }
    }

    pub fn key_secret(&self) -> &str {
        &self.key_secret
    }

    /// Create an order for `amount` major units. The gateway wants minor
    /// units, so the amount is multiplied by 100 on the way out.
    pub async fn create_order(
        &self,
        plan: &str,
        cycle: BillingCycle,
        amount: i64,
    ) -> Result<GatewayOrder> {
        let payload = OrderPayload {
            amount: amount * 100,
            currency: "INR",
            receipt: format!("receipt_{}", chrono::Utc::now().timestamp_millis()),
            notes: OrderNotes {
                plan,
                cycle: cycle.as_str(),
            },
        };

        let response = self
            .http
            .post(format!("{}/v1/orders", self.base_url))
            .basic_auth(&self.key_id, Some(&self.key_secret))
            .json(&payload)
            .send()
            .await
            .context("payment gateway unreachable")?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(anyhow!("gateway order creation failed: {} {}", status, body));
        }

        let order: GatewayOrder = response
            .json()
            .await
            .context("malformed gateway order response")?;

        debug!("Created gateway order {} ({} {})", order.id, order.amount, order.currency);
        Ok(order)
    }
}
