pub mod graphs;
pub mod health;

use axum::Router;

use crate::state::AppState;

pub fn router(state: AppState) -> Router {
    Router::new()
        .merge(health::router())
        .nest(
            "/api",
            Router::new()
                .merge(graphs::router())
                .merge(crate::openapi::router()),
        )
        .with_state(state)
}
