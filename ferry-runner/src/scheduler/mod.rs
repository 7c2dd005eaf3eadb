//! Scheduler layer for the runner
//!
//! This layer polls the coordination server for pending stages and drives
//! each one through accept, compile and submit. It owns the loop policy:
//! cancellation and the delay applied after failed cycles.

pub mod backoff;
pub mod poller;

pub use backoff::Backoff;
pub use poller::StagePoller;
