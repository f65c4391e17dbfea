pub mod health;
pub mod quiz;

use axum::{
    routing::{get, post},
    Router,
};

use crate::middleware::{auth::require_bearer_auth, rate_limit};
use crate::AppState;

pub fn build_router(state: AppState, rps: u32) -> Router {
    let quiz_api = Router::new()
        .route("/api/quizzes/:id/view", get(quiz::view_quiz))
        .route("/api/quizzes/:id/attempts", post(quiz::start_attempt))
        .layer(axum::middleware::from_fn_with_state(
            state.clone(),
            require_bearer_auth,
        ))
        .layer(axum::middleware::from_fn_with_state(
            rate_limit::RateLimiter::new(rps),
            rate_limit::rps_middleware,
        ));

    Router::new()
        .route("/health", get(health::health))
        .merge(quiz_api)
        .with_state(state)
}
