use serde::Serialize;
use utoipa::ToSchema;

/// Payload of the `/healthcheck` route.
#[derive(Debug, Serialize, ToSchema)]
pub struct HealthResponse {
    /// "ok", or "degraded" while the match store is unreachable.
    pub status: String,
    /// Number of configured wheel categories.
    pub categories: usize,
}

impl HealthResponse {
    pub fn new(degraded: bool, categories: usize) -> Self {
        let status = if degraded { "degraded" } else { "ok" };
        Self {
            status: status.to_owned(),
            categories,
        }
    }
}
