//! Ferry Core
//!
//! Core types shared by the Ferry runner and its clients.
//!
//! This crate contains:
//! - Domain types: pipeline stages as served by the coordination server,
//!   and the Nomad job model the runner compiles them into
//! - DTOs: request and response payloads for both remote APIs

pub mod domain;
pub mod dto;
