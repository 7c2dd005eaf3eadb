//! Job name generation
//!
//! Nomad treats the job ID as an idempotency key, so two runners must never
//! register the same name. Names carry a random alphanumeric suffix.

use rand::Rng;
use rand::distr::Alphanumeric;

/// Length of the random suffix appended to job names
pub const SUFFIX_LEN: usize = 12;

/// Strategy for naming compiled jobs
pub trait NameGenerator: Send + Sync {
    fn generate(&self) -> String;
}

impl<F> NameGenerator for F
where
    F: Fn() -> String + Send + Sync,
{
    fn generate(&self) -> String {
        self()
    }
}

/// `prefix` followed by random alphanumeric characters
#[derive(Debug, Clone)]
pub struct RandomNameGenerator {
    prefix: String,
    len: usize,
}

impl RandomNameGenerator {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            len: SUFFIX_LEN,
        }
    }
}

impl NameGenerator for RandomNameGenerator {
    fn generate(&self) -> String {
        let suffix: String = rand::rng()
            .sample_iter(Alphanumeric)
            .take(self.len)
            .map(char::from)
            .collect();
        format!("{}{}", self.prefix, suffix)
    }
}
