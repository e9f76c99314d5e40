/// API Routes definition

use axum::{routing::get, Router};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use super::handlers;
use super::static_files;
use super::websocket;
use super::AppState;

pub fn create_router(state: AppState, enable_cors: bool) -> Router {
    let mut app = Router::new()
        .route("/api/usage", get(handlers::get_usage))
        .route("/api/config", get(handlers::get_config))
        .route("/api/health", get(handlers::health_check))
        .route("/ws/usage", get(websocket::ws_usage_handler))
        // Dashboard page and its assets - must be last to act as catch-all
        .fallback(static_files::static_handler)
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    if enable_cors {
        app = app.layer(CorsLayer::permissive());
    }

    app
}
