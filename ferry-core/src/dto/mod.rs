//! Data Transfer Objects for remote APIs
//!
//! Wire payloads that wrap or accompany the domain types when talking to
//! the coordination server and to Nomad.

pub mod job;
pub mod stage;
