use axum::Router;

use crate::state::SharedState;

pub mod docs;
pub mod health;
pub mod invitations;
pub mod matches;
pub mod questions;
pub mod stats;

/// Compose all route trees, wiring in shared state and documentation routes.
pub fn router(state: SharedState) -> Router<()> {
    let api_router = health::router()
        .merge(questions::router())
        .merge(matches::router())
        .merge(invitations::router())
        .merge(stats::router())
        .merge(docs::router());

    api_router.with_state(state)
}
