use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use axum::{
    Router,
    extract::{State, WebSocketUpgrade},
    middleware,
    response::IntoResponse,
    routing::{get, post},
};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;

use worklane_api::{AppState, AppStateInner, auth, chat, payments};
use worklane_api::middleware::require_auth;
use worklane_gateway::connection;
use worklane_gateway::dispatcher::Dispatcher;
use worklane_payments::gateway::PaymentGateway;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env if present
    let _ = dotenvy::dotenv();

    // Init logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "worklane=debug,tower_http=debug".into()),
        )
        .init();

    // Config
    let jwt_secret =
        std::env::var("WORKLANE_JWT_SECRET").unwrap_or_else(|_| "dev-secret-change-me".into());
    let db_path = std::env::var("WORKLANE_DB_PATH").unwrap_or_else(|_| "worklane.db".into());
    let host = std::env::var("WORKLANE_HOST").unwrap_or_else(|_| "0.0.0.0".into());
    let port: u16 = std::env::var("WORKLANE_PORT")
        .unwrap_or_else(|_| "3000".into())
        .parse()?;

    let gateway_url = std::env::var("PAYMENT_GATEWAY_URL")
        .unwrap_or_else(|_| "https://api.razorpay.com".into());
    let payment_key_id = std::env::var("PAYMENT_KEY_ID")
        .map_err(|_| anyhow::anyhow!("PAYMENT_KEY_ID must be set"))?;
    // Shared secret: keys callback signature verification, never serialized
    // into any response.
    let payment_key_secret = std::env::var("PAYMENT_KEY_SECRET")
        .map_err(|_| anyhow::anyhow!("PAYMENT_KEY_SECRET must be set"))?;

    // Init database
    let db = Arc::new(worklane_db::Database::open(&PathBuf::from(&db_path))?);

    // Shared state
    let dispatcher = Dispatcher::new();
    let state: AppState = Arc::new(AppStateInner {
        db: db.clone(),
        jwt_secret: jwt_secret.clone(),
        dispatcher: dispatcher.clone(),
        gateway: PaymentGateway::new(gateway_url, payment_key_id, payment_key_secret),
    });

    // Routes
    let public_routes = Router::new()
        .route("/auth/register", post(auth::register))
        .route("/auth/login", post(auth::login))
        .with_state(state.clone());

    let protected_routes = Router::new()
        .route("/conversations", get(chat::get_conversations))
        .route("/conversations", post(chat::start_conversation))
        .route("/conversations/{conversation_id}/messages", get(chat::get_messages))
        .route("/conversations/{conversation_id}/messages", post(chat::send_message))
        .route("/conversations/{conversation_id}/read", post(chat::mark_read))
        .route("/payments/order", post(payments::create_order))
        .route("/payments/verify", post(payments::verify_payment))
        .route("/billing", get(payments::billing_summary))
        .layer(middleware::from_fn_with_state(state.clone(), require_auth))
        .with_state(state.clone());

    let ws_route = Router::new()
        .route("/gateway", get(ws_upgrade))
        .with_state(state.clone());

    let app = Router::new()
        .merge(public_routes)
        .merge(protected_routes)
        .merge(ws_route)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http());

    let addr: SocketAddr = format!("{}:{}", host, port).parse()?;
    info!("Worklane server listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

async fn ws_upgrade(State(state): State<AppState>, ws: WebSocketUpgrade) -> impl IntoResponse {
    ws.on_upgrade(move |socket| {
        connection::handle_connection(
            socket,
            state.dispatcher.clone(),
            state.db.clone(),
            state.jwt_secret.clone(),
        )
    })
}
