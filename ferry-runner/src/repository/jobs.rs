//! Jobs repository
//!
//! Registers compiled jobs with the Nomad cluster.

use async_trait::async_trait;
use ferry_core::domain::job::Job;
use ferry_nomad::{JobRegistration, NomadClient, NomadError};

/// Repository trait for job-related operations with the cluster scheduler
#[async_trait]
pub trait JobRepository: Send + Sync {
    /// Submits a job to the scheduler
    ///
    /// # Arguments
    /// * `job` - The compiled job specification
    async fn register(&self, job: &Job) -> Result<JobRegistration, NomadError>;
}

/// HTTP implementation of JobRepository
pub struct HttpJobRepository {
    client: NomadClient,
}

impl HttpJobRepository {
    /// Creates a new HTTP job repository
    pub fn new(client: NomadClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl JobRepository for HttpJobRepository {
    async fn register(&self, job: &Job) -> Result<JobRegistration, NomadError> {
        self.client.register_job(job).await
    }
}
