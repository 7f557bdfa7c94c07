//! HTTP layer.
//!
//! The JSON API under `/api` and the static dashboard for every other path.

pub mod extract;
pub mod routes;

use std::path::Path;

use axum::{
    routing::{get, post},
    Router,
};
use tower_http::{
    cors::CorsLayer,
    services::{ServeDir, ServeFile},
    trace::TraceLayer,
};

use crate::control::ControlFacade;

pub use extract::{ApiBody, ApiError};

/// Shared handler state.
#[derive(Clone)]
pub struct AppState {
    /// Validating front for the session registry
    pub control: ControlFacade,
}

impl AppState {
    /// Create handler state around a façade.
    pub fn new(control: ControlFacade) -> Self {
        Self { control }
    }
}

/// Routes of the JSON API only.
pub fn api_router(state: AppState) -> Router {
    Router::new()
        .route("/api/pair", post(routes::pair))
        .route("/api/start", post(routes::start))
        .route("/api/logout", post(routes::logout))
        .route("/api/sessions", get(routes::sessions))
        .with_state(state)
}

/// The full application: API, static dashboard from `public_dir`, request
/// tracing and CORS.
pub fn router(state: AppState, public_dir: &Path) -> Router {
    let index = public_dir.join("index.html");
    let dashboard = ServeDir::new(public_dir).fallback(ServeFile::new(index));

    api_router(state)
        .fallback_service(dashboard)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
}
