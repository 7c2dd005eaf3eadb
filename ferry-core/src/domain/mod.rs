//! Core domain types
//!
//! This module contains the structures exchanged between Ferry components.
//! A [`stage::Stage`] is read from the coordination server; a [`job::Job`]
//! is written to the cluster scheduler.

pub mod job;
pub mod stage;
