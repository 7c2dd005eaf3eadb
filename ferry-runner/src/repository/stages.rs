//! Stages repository
//!
//! Handles communication with the coordination server:
//! - Requesting the next pending stage
//! - Accepting (claiming) a stage for this runner

use async_trait::async_trait;
use ferry_client::{ClientError, CoordinatorClient};
use ferry_core::domain::stage::Stage;
use ferry_core::dto::stage::Filter;

/// Repository trait for stage-related operations with the coordination server
#[async_trait]
pub trait StageRepository: Send + Sync {
    /// Requests the next pending stage matching `filter`
    ///
    /// Returns `Ok(None)` when the server had no work to hand out.
    async fn request(&self, filter: &Filter) -> Result<Option<Stage>, ClientError>;

    /// Claims `stage` for the machine recorded on it
    ///
    /// Fails with [`ClientError::OptimisticLock`] when another runner
    /// claimed the stage first.
    async fn accept(&self, stage: &mut Stage) -> Result<(), ClientError>;
}

/// HTTP implementation of StageRepository
pub struct HttpStageRepository {
    client: CoordinatorClient,
}

impl HttpStageRepository {
    /// Creates a new HTTP stage repository
    pub fn new(client: CoordinatorClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl StageRepository for HttpStageRepository {
    async fn request(&self, filter: &Filter) -> Result<Option<Stage>, ClientError> {
        self.client.request(filter).await
    }

    async fn accept(&self, stage: &mut Stage) -> Result<(), ClientError> {
        self.client.accept(stage).await
    }
}
