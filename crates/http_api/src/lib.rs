mod errors;
mod handlers;
mod middleware;
mod state;

use axum::{
    Router, middleware as axum_middleware,
    routing::{get, post},
};

pub use errors::HttpError;
pub use state::HttpState;

pub fn router(state: HttpState) -> Router<()> {
    let userdata = Router::new()
        .route("/current", get(handlers::current_usage))
        .route("/history", get(handlers::usage_history))
        .route("/update", post(handlers::update_usage));

    Router::new()
        .route("/", get(handlers::greeting))
        .nest("/:username/data", userdata)
        .fallback(handlers::not_found)
        .layer(axum_middleware::from_fn(middleware::trace_requests))
        .with_state(state)
}
