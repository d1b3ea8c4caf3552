//! REST API server module
//!
//! Exposes the scheduler over HTTP: task submission and cancellation,
//! per-user status, queue statistics and a server-sent event stream.

use crate::{Config, Result, Scheduler};
use axum::{
    Router,
    http::HeaderValue,
    middleware,
    routing::{get, post},
};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::trace::TraceLayer;

pub mod auth;
pub mod error_response;
pub mod openapi;
pub mod routes;
pub mod state;

pub use openapi::ApiDoc;
pub use state::AppState;

/// Create the API router with all route definitions
///
/// # Routes
///
/// ## Tasks
/// - `POST /tasks` - Admit a task (`{user_id, url, message_id?}`)
/// - `GET /tasks/:id` - Task snapshot (in flight or from recent history)
/// - `DELETE /tasks/:id` - Cancel a task
///
/// ## Users
/// - `GET /users/:user_id/status` - Queue position and remaining budget
/// - `GET /users/:user_id/tasks` - In-flight tasks
/// - `POST /users/:user_id/cancel` - Cancel all in-flight tasks
///
/// ## System
/// - `GET /queue/stats` - Queue-wide counters
/// - `GET /health` - Health check (never requires a key)
/// - `GET /openapi.json` - OpenAPI document
/// - `GET /events` - Server-sent events stream
pub fn create_router(scheduler: Scheduler, config: Arc<Config>) -> Router {
    let state = AppState::new(scheduler, config.clone());

    let router = Router::new()
        .route("/tasks", post(routes::submit_task))
        .route(
            "/tasks/:id",
            get(routes::get_task).delete(routes::cancel_task),
        )
        .route("/users/:user_id/status", get(routes::user_status))
        .route("/users/:user_id/tasks", get(routes::user_tasks))
        .route("/users/:user_id/cancel", post(routes::cancel_user_tasks))
        .route("/queue/stats", get(routes::queue_stats))
        .route("/health", get(routes::health_check))
        .route("/openapi.json", get(routes::openapi_spec))
        .route("/events", get(routes::event_stream))
        .with_state(state);

    // Layers run outermost-last: CORS answers preflights before auth sees them
    let router = if config.api.api_key.is_some() {
        router.layer(middleware::from_fn_with_state(
            config.api.api_key.clone(),
            auth::require_api_key,
        ))
    } else {
        router
    };

    let router = router.layer(TraceLayer::new_for_http());

    if config.api.cors_enabled {
        router.layer(build_cors_layer(&config.api.cors_origins))
    } else {
        router
    }
}

/// CORS layer for the configured origins; `*` or an empty list allows any origin
fn build_cors_layer(origins: &[String]) -> CorsLayer {
    let allow_any = origins.is_empty() || origins.iter().any(|o| o == "*");

    let layer = if allow_any {
        CorsLayer::new().allow_origin(Any)
    } else {
        let allowed: Vec<HeaderValue> = origins.iter().filter_map(|o| o.parse().ok()).collect();
        CorsLayer::new().allow_origin(AllowOrigin::list(allowed))
    };
    layer.allow_methods(Any).allow_headers(Any)
}

/// Bind `api.bind_address` and serve the router until the server fails
///
/// Run it in its own task; the binary aborts it once the scheduler has shut down.
pub async fn start_api_server(scheduler: Scheduler, config: Arc<Config>) -> Result<()> {
    let bind_address = config.api.bind_address;
    let app = create_router(scheduler, config);

    let listener = TcpListener::bind(bind_address)
        .await
        .map_err(crate::error::Error::Io)?;

    tracing::info!(
        address = %bind_address,
        "API server listening"
    );

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await
    .map_err(|e| crate::error::Error::ApiServerError(e.to_string()))?;

    tracing::info!("API server stopped");
    Ok(())
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests;
