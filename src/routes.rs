use axum::{
    Router,
    middleware::from_fn_with_state,
    routing::{get, post},
};
use http::{HeaderValue, Method, header};
use std::time::Duration;
use tower_http::{
    cors::CorsLayer,
    trace::{DefaultMakeSpan, DefaultOnFailure, DefaultOnRequest, DefaultOnResponse, TraceLayer},
};
use tracing::Level;

use crate::{handlers, middleware_layer, state::AppState};

/// Builds the verification API router.
///
/// The per-IP governor needs `ConnectInfo` and is layered on by the binary.
pub fn app(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin([
            HeaderValue::from_static("http://localhost:3000"),
            HeaderValue::from_static("http://127.0.0.1:3000"),
        ])
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE, header::ACCEPT])
        .max_age(Duration::from_secs(86400));

    let start_routes = Router::new()
        .route("/api/verification/start", post(handlers::verification::start))
        .route_layer(from_fn_with_state(
            state.clone(),
            middleware_layer::rate_limit::rate_limit_start,
        ))
        .with_state(state.clone());

    let step_routes = Router::new()
        .route(
            "/api/verification/{id}/front",
            post(handlers::verification::submit_front),
        )
        .route(
            "/api/verification/{id}/back",
            post(handlers::verification::submit_back),
        )
        .route(
            "/api/verification/{id}/selfie",
            post(handlers::verification::submit_selfie),
        )
        .route(
            "/api/verification/{id}",
            get(handlers::verification::get_status),
        )
        .with_state(state);

    Router::new()
        .merge(start_routes)
        .merge(step_routes)
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(DefaultMakeSpan::default().include_headers(true))
                .on_request(DefaultOnRequest::default().level(Level::DEBUG))
                .on_response(DefaultOnResponse::default().level(Level::DEBUG))
                .on_failure(DefaultOnFailure::default().level(Level::ERROR)),
        )
        .layer(cors)
}
