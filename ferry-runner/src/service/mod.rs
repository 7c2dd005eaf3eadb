//! Service layer
//!
//! Services contain the runner's business logic: turning a claimed stage
//! into a Nomad job and naming that job. They perform no I/O.

mod compiler;
mod naming;

pub use compiler::JobCompiler;
pub use naming::{NameGenerator, RandomNameGenerator};
