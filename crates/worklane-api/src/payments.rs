use axum::{
    Extension, Json,
    extract::State,
};
use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::info;
use uuid::Uuid;

use worklane_db::Database;
use worklane_payments::plan::BillingCycle;
use worklane_payments::signature;
use worklane_types::api::{
    Claims, CreateOrderRequest, CreateOrderResponse, Envelope, VerifyPaymentRequest,
    VerifyPaymentResponse,
};

use crate::AppState;
use crate::chat::{run_blocking, ts};
use crate::error::ApiError;

/// Create a gateway order for a plan purchase. The order's plan, cycle and
/// amount are persisted server-side keyed by the gateway's order id; the
/// verification step reads them back from there instead of trusting the
/// callback body.
pub async fn create_order(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<CreateOrderRequest>,
) -> Result<Json<CreateOrderResponse>, ApiError> {
    if req.plan.trim().is_empty() {
        return Err(ApiError::Validation("Missing plan".into()));
    }
    if req.amount <= 0 {
        return Err(ApiError::Validation("Missing or invalid amount".into()));
    }
    let cycle = BillingCycle::parse(&req.cycle)
        .ok_or_else(|| ApiError::Validation("Cycle must be 'monthly' or 'yearly'".into()))?;

    let order = state
        .gateway
        .create_order(&req.plan, cycle, req.amount)
        .await
        .map_err(ApiError::Gateway)?;

    let db = state.db.clone();
    let caller = claims.sub.to_string();
    let order_id = order.id.clone();
    let plan = req.plan.clone();
    let amount = req.amount;
    run_blocking(move || {
        db.insert_payment_order(&order_id, &caller, &plan, cycle.as_str(), amount)?;
        db.insert_transaction(
            &Uuid::new_v4().to_string(),
            &caller,
            "subscription",
            amount,
            "pending",
            None,
            Some(&order_id),
            &format!("Order created for plan '{}' ({})", plan, cycle.as_str()),
        )?;
        Ok(())
    })
    .await?;

    info!("Created payment order {} for user {}", order.id, claims.sub);

    Ok(Json(CreateOrderResponse {
        order_id: order.id,
        amount: order.amount,
        currency: order.currency,
    }))
}

/// Verify a payment callback and record the entitlement. The HMAC check is
/// the trust boundary: nothing is written unless the signature matches.
pub async fn verify_payment(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<VerifyPaymentRequest>,
) -> Result<Json<VerifyPaymentResponse>, ApiError> {
    let db = state.db.clone();
    let secret = state.gateway.key_secret().to_string();
    let caller = claims.sub;

    run_blocking(move || verify_and_record(&db, &secret, caller, &req, Utc::now())).await?;

    Ok(Json(VerifyPaymentResponse {
        success: true,
        message: "Payment verified and subscription updated".into(),
    }))
}

#[derive(Debug, Serialize)]
pub struct BillingSummary {
    pub subscription: Option<SubscriptionView>,
    pub transactions: Vec<TransactionView>,
}

#[derive(Debug, Serialize)]
pub struct SubscriptionView {
    pub plan: String,
    pub status: String,
    pub period_start: DateTime<Utc>,
    pub period_end: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
pub struct TransactionView {
    pub id: String,
    pub kind: String,
    pub amount: i64,
    pub status: String,
    pub description: String,
    pub created_at: DateTime<Utc>,
}

/// Current subscription plus the payment audit trail.
pub async fn billing_summary(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> Result<Json<Envelope<BillingSummary>>, ApiError> {
    let db = state.db.clone();
    let caller = claims.sub.to_string();

    let (subscription, transactions) = run_blocking(move || {
        let sub = db.get_subscription(&caller)?;
        let txs = db.transactions_for_user(&caller)?;
        Ok((sub, txs))
    })
    .await?;

    let now = Utc::now();
    let subscription = subscription.map(|row| {
        let period_end = ts(&row.period_end, &row.id);
        // Lapsed periods read back as expired without a write.
        let status = if row.status == "active" && period_end < now {
            "expired".to_string()
        } else {
            row.status
        };
        SubscriptionView {
            plan: row.plan,
            status,
            period_start: ts(&row.period_start, &row.id),
            period_end,
        }
    });

    let transactions = transactions
        .into_iter()
        .map(|row| TransactionView {
            created_at: ts(&row.created_at, &row.id),
            id: row.id,
            kind: row.kind,
            amount: row.amount,
            status: row.status,
            description: row.description,
        })
        .collect();

    Ok(Json(Envelope::new(BillingSummary { subscription, transactions })))
}

// -- Sync core --

/// Signature check, then the entitlement writes. Pulled out of the handler
/// so the whole accept path is testable with a pinned clock.
pub fn verify_and_record(
    db: &Database,
    secret: &str,
    caller: Uuid,
    req: &VerifyPaymentRequest,
    now: DateTime<Utc>,
) -> Result<(), ApiError> {
    if !signature::verify(secret, &req.order_id, &req.payment_id, &req.signature) {
        return Err(ApiError::BadSignature);
    }

    // Re-derive plan/cycle/amount from the server-side order record; the
    // signature only authenticates the order/payment pair, not the rest of
    // the callback body.
    let order = db
        .get_payment_order(&req.order_id)?
        .ok_or(ApiError::NotFound("Order"))?;

    if order.user_id != caller.to_string() {
        return Err(ApiError::Forbidden);
    }

    let cycle = BillingCycle::parse(&order.cycle).ok_or_else(|| {
        ApiError::Storage(anyhow::anyhow!("corrupt cycle '{}' on order {}", order.cycle, order.id))
    })?;

    let period_start = now;
    let period_end = cycle.period_end(now);

    // From here on a failure means the payment is authenticated but the
    // entitlement is not recorded — flagged for manual reconciliation.
    let record = || -> anyhow::Result<()> {
        db.upsert_subscription(
            &Uuid::new_v4().to_string(),
            &order.user_id,
            cycle.as_str(),
            "active",
            &period_start.to_rfc3339(),
            &period_end.to_rfc3339(),
            &req.payment_id,
        )?;
        db.insert_transaction(
            &Uuid::new_v4().to_string(),
            &order.user_id,
            "subscription",
            order.amount,
            "completed",
            Some(&req.payment_id),
            Some(&order.id),
            &format!("Payment captured for plan '{}' ({})", order.plan, order.cycle),
        )?;
        Ok(())
    };

    record().map_err(|source| ApiError::EntitlementWrite {
        payment_ref: req.payment_id.clone(),
        source,
    })?;

    info!(
        "Verified payment {} for order {} (user {}, {} until {})",
        req.payment_id, order.id, order.user_id, cycle.as_str(), period_end
    );

    Ok(())
}
