//! Repository layer
//!
//! Repositories are thin adapters over the remote clients: the coordination
//! server (stages) and the Nomad API (jobs). They carry no business logic.
//!
//! All repositories are trait-based so the poller can be driven by
//! in-memory fakes in tests.

mod jobs;
mod stages;

// Re-export traits
pub use jobs::JobRepository;
pub use stages::StageRepository;

// Re-export implementations
pub use jobs::HttpJobRepository;
pub use stages::HttpStageRepository;
