use axum::{
    middleware,
    routing::{get, post},
    Router,
};
use std::sync::Arc;

use crate::handlers;
use crate::metrics;
use crate::AppState;

pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/run", post(handlers::run_code))
        .route("/scratch", post(handlers::run_scratch))
        .route("/submissions", post(handlers::create_submission))
        .route("/submissions/:id", get(handlers::get_submission))
        .route("/health", get(handlers::health_check))
        .route("/metrics", get(metrics::render))
        .route_layer(middleware::from_fn(metrics::track_requests))
}
