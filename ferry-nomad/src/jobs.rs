//! Job-related API endpoints

use ferry_core::domain::job::Job;
use ferry_core::dto::job::{JobRegistration, RegisterJob};
use tracing::debug;

use crate::NomadClient;
use crate::error::Result;

impl NomadClient {
    // =============================================================================
    // Job Registration
    // =============================================================================

    /// Register (create or update) a job
    ///
    /// The job ID is Nomad's identity key: registering an existing ID updates
    /// that job rather than creating a new one.
    ///
    /// # Arguments
    /// * `job` - The job specification
    ///
    /// # Returns
    /// The evaluation created for the job
    pub async fn register_job(&self, job: &Job) -> Result<JobRegistration> {
        let url = format!("{}/v1/jobs", self.config.address);
        debug!(job.id = %job.id, %url, "registering job");

        let request = self
            .client
            .put(&url)
            .json(&RegisterJob { job: job.clone() });

        let response = self.authorize(request).send().await?;

        self.handle_response(response).await
    }
}
