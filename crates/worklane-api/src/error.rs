use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;
use thiserror::Error;
use tracing::{error, warn};

/// Failure taxonomy for the API surface. Every handler returns one of these
/// instead of letting a fault cross the boundary uncaught; the client never
/// retries authorization, validation, or integrity failures.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("Unauthorized")]
    Unauthorized,

    /// Caller is authenticated but not a participant of the resource.
    #[error("Forbidden")]
    Forbidden,

    #[error("{0}")]
    Validation(String),

    #[error("{0} not found")]
    NotFound(&'static str),

    #[error("{0}")]
    Conflict(String),

    /// Payment callback signature mismatch. Hard rejection, nothing written.
    #[error("Invalid signature")]
    BadSignature,

    /// The external payment provider failed or was unreachable.
    #[error("Payment gateway error")]
    Gateway(#[source] anyhow::Error),

    #[error("Storage error")]
    Storage(#[source] anyhow::Error),

    /// Money was authenticated but the entitlement write failed. Needs
    /// manual reconciliation, never an automatic retry of the whole flow.
    #[error("Subscription write failed after verified payment")]
    EntitlementWrite {
        payment_ref: String,
        #[source]
        source: anyhow::Error,
    },
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match self {
            Self::Unauthorized => StatusCode::UNAUTHORIZED,
            Self::Forbidden => StatusCode::FORBIDDEN,
            Self::Validation(_) | Self::BadSignature => StatusCode::BAD_REQUEST,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::Conflict(_) => StatusCode::CONFLICT,
            Self::Gateway(_) => StatusCode::BAD_GATEWAY,
            Self::Storage(_) | Self::EntitlementWrite { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match &self {
            ApiError::BadSignature => {
                warn!("Rejected payment callback with invalid signature (possible tampering)");
            }
            ApiError::Storage(e) => {
                error!("Storage failure: {:#}", e);
            }
            ApiError::EntitlementWrite { payment_ref, source } => {
                error!(
                    "RECONCILE: verified payment {} but subscription write failed: {:#}",
                    payment_ref, source
                );
            }
            ApiError::Gateway(e) => {
                error!("Payment gateway failure: {:#}", e);
            }
            _ => {}
        }

        let body = json!({ "success": false, "error": self.to_string() });
        (self.status(), Json(body)).into_response()
    }
}

/// Storage faults carry no client-actionable detail; log server-side, return
/// a generic failure the UI may retry.
impl From<anyhow::Error> for ApiError {
    fn from(e: anyhow::Error) -> Self {
        ApiError::Storage(e)
    }
}
