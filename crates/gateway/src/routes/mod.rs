//! API routes

pub mod health;
pub mod messages;
pub mod operator;
pub mod queue;
pub mod session;
pub mod transport;

use axum::{
    extract::DefaultBodyLimit,
    http::{header, Method},
    middleware,
    routing::{get, post},
    Router,
};
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};

use self::operator::require_operator;
use crate::{state::AppState, websocket::ws_handler};

/// Create all API routes
pub fn create_router(state: AppState) -> Router {
    // Health check routes (at root level for infrastructure monitoring)
    let health_routes = Router::new()
        .route("/health", get(health::health))
        .route("/health/live", get(health::liveness))
        .route("/health/ready", get(health::readiness));

    // Public API routes (no operator token) - under /api/v1
    let public_api_routes = Router::new()
        .route("/operator/verify", post(operator::verify_secret))
        // Chat bridge webhook (uses signature verification)
        .route("/transport/events", post(transport::bridge_webhook));

    // Operator API routes (bearer token required) - under /api/v1
    let protected_api_routes = Router::new()
        .route("/session/start", post(session::start_session))
        .route("/session/status", get(session::get_status))
        .route("/session/credential", get(session::get_credential))
        .route("/messages", post(messages::send_message))
        .route("/queue", get(queue::list_queue))
        .route_layer(middleware::from_fn_with_state(state.clone(), require_operator));

    // WebSocket routes (auth handled in handler via query parameter)
    let websocket_routes = Router::new().route("/ws/status", get(ws_handler));

    // Combine API routes under /api/v1 prefix
    let api_v1_routes = Router::new()
        .merge(public_api_routes)
        .merge(protected_api_routes)
        .merge(websocket_routes);

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION, header::ACCEPT]);

    Router::new()
        .merge(health_routes)
        .nest("/api/v1", api_v1_routes)
        .layer(DefaultBodyLimit::max(1024 * 1024))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}
