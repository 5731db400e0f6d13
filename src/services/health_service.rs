use tracing::warn;

use crate::{dto::health::HealthResponse, state::SharedState};

/// Report `ok` or `degraded`, logging storage connectivity issues.
pub async fn health_status(state: &SharedState) -> HealthResponse {
    match state.require_store().await {
        Ok(store) => {
            if let Err(err) = store.health_check().await {
                warn!(error = %err, "match store health check failed");
            }
        }
        Err(_) => warn!("match store unavailable (degraded mode)"),
    }

    HealthResponse::new(state.is_degraded().await, state.config().categories().len())
}
