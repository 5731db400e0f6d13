/// OpenAPI documentation generation.
pub mod documentation;
/// Health check service.
pub mod health_service;
/// Direct challenges between users.
pub mod invitation_service;
/// Match creation, joining, snapshots and forfeits.
pub mod match_service;
/// Durable notification outbox and its dispatcher.
pub mod notifier;
/// Question bank import and sampling.
pub mod question_service;
/// Server-Sent Events message generation.
pub mod sse_events;
/// Per-match Server-Sent Events streams.
pub mod sse_service;
/// Statistics finalization and lookup.
pub mod stats_service;
/// Storage connection supervisor driving degraded mode.
pub mod storage_supervisor;
/// Turn commands: spin, answer, character round and timeouts.
pub mod turn_service;
