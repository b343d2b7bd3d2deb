pub mod auth;
pub mod chat;
pub mod error;
pub mod middleware;
pub mod payments;

use std::sync::Arc;

use worklane_db::Database;
use worklane_gateway::dispatcher::Dispatcher;
use worklane_payments::gateway::PaymentGateway;

pub type AppState = Arc<AppStateInner>;

pub struct AppStateInner {
    pub db: Arc<Database>,
    pub jwt_secret: String,
    pub dispatcher: Dispatcher,
    pub gateway: PaymentGateway,
}
