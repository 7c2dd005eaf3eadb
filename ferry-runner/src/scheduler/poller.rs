//! Stage poller
//!
//! Requests pending stages from the coordination server, claims them, and
//! schedules each one on Nomad as a batch job. At most one stage is in flight
//! at a time; horizontal scale comes from running more runner processes,
//! with the server's optimistic lock deciding which one wins a stage.

use std::sync::Arc;

use chrono::Utc;
use ferry_core::dto::stage::Filter;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

use crate::config::Config;
use crate::repository::{JobRepository, StageRepository};
use crate::scheduler::Backoff;
use crate::service::JobCompiler;

/// Result of a single poll cycle
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CycleOutcome {
    /// The server had nothing to hand out, or the request was cancelled
    NoWork,
    /// Another runner accepted the stage first
    Contention,
    /// The stage was accepted and its job registered
    Scheduled { job_id: String },
    /// Shutdown arrived while registering an accepted stage
    Interrupted,
    /// A remote call failed
    Failed,
}

/// Poller that moves stages from the coordination server onto Nomad
pub struct StagePoller {
    config: Arc<Config>,
    stages: Arc<dyn StageRepository>,
    jobs: Arc<dyn JobRepository>,
    compiler: JobCompiler,
    backoff: Backoff,
}

impl StagePoller {
    /// Creates a new stage poller
    pub fn new(
        config: Arc<Config>,
        stages: Arc<dyn StageRepository>,
        jobs: Arc<dyn JobRepository>,
    ) -> Self {
        let compiler = JobCompiler::new(Arc::clone(&config));
        let backoff = Backoff::from(config.poll);
        Self {
            config,
            stages,
            jobs,
            compiler,
            backoff,
        }
    }

    /// Replaces the job compiler
    #[allow(dead_code)]
    pub fn with_compiler(mut self, compiler: JobCompiler) -> Self {
        self.compiler = compiler;
        self
    }

    /// Replaces the failure backoff policy
    #[allow(dead_code)]
    pub fn with_backoff(mut self, backoff: Backoff) -> Self {
        self.backoff = backoff;
        self
    }

    /// Runs poll cycles until `cancel` fires
    pub async fn run(&self, cancel: CancellationToken) {
        info!(machine = %self.config.machine, "Starting stage poller");

        let mut failures = 0;

        loop {
            if cancel.is_cancelled() {
                info!("Stage poller stopped");
                return;
            }

            let outcome = self.run_once(&cancel).await;
            if let CycleOutcome::Scheduled { job_id } = &outcome {
                trace!(job.id = %job_id, "cycle complete");
            }
            failures = consecutive_failures(&outcome, failures);

            let delay = self.backoff.delay(failures);
            if delay.is_zero() {
                continue;
            }

            debug!(?delay, failures, "Backing off after failed cycle");
            tokio::select! {
                _ = cancel.cancelled() => {}
                _ = tokio::time::sleep(delay) => {}
            }
        }
    }

    /// Performs a single poll cycle
    pub async fn run_once(&self, cancel: &CancellationToken) -> CycleOutcome {
        debug!("requesting pipeline from server");

        let filter = Filter::docker_pipeline();
        let requested = tokio::select! {
            _ = cancel.cancelled() => {
                trace!("request cancelled, no pipeline returned");
                return CycleOutcome::NoWork;
            }
            requested = self.stages.request(&filter) => requested,
        };

        let mut stage = match requested {
            Ok(Some(stage)) => stage,
            Ok(None) => {
                trace!("no pipeline returned");
                return CycleOutcome::NoWork;
            }
            Err(e) => {
                error!(error = %e, "cannot request pipeline");
                return CycleOutcome::Failed;
            }
        };

        debug!(
            stage.id = stage.id,
            stage.number = stage.number,
            stage.os = %stage.os,
            stage.arch = %stage.arch,
            "accepting pipeline"
        );

        stage.machine = self.config.machine.clone();
        if let Err(e) = self.stages.accept(&mut stage).await {
            if e.is_optimistic_lock() {
                debug!(stage.id = stage.id, "pipeline accepted by another runner");
                return CycleOutcome::Contention;
            }
            error!(stage.id = stage.id, error = %e, "cannot accept pipeline");
            return CycleOutcome::Failed;
        }

        let job = self.compiler.compile(&stage, Utc::now());
        debug!(stage.id = stage.id, job.id = %job.id, "creating nomad job");

        let registered = tokio::select! {
            _ = cancel.cancelled() => {
                warn!(
                    stage.id = stage.id,
                    job.id = %job.id,
                    "shutdown during job registration, stage accepted but may not be scheduled"
                );
                return CycleOutcome::Interrupted;
            }
            registered = self.jobs.register(&job) => registered,
        };

        match registered {
            Ok(registration) => {
                info!(
                    stage.id = stage.id,
                    job.id = %job.id,
                    eval.id = %registration.eval_id,
                    "created nomad job"
                );
                CycleOutcome::Scheduled { job_id: job.id }
            }
            Err(e) => {
                // The stage stays accepted on the server; nothing here
                // releases it.
                error!(
                    stage.id = stage.id,
                    job.id = %job.id,
                    error = %e,
                    "cannot create job, stage accepted but not scheduled"
                );
                CycleOutcome::Failed
            }
        }
    }
}

/// Failure count after `outcome`; any cycle that did not fail resets it
fn consecutive_failures(outcome: &CycleOutcome, failures: u32) -> u32 {
    match outcome {
        CycleOutcome::Failed => failures.saturating_add(1),
        _ => 0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use ferry_client::ClientError;
    use ferry_core::domain::job::Job;
    use ferry_core::domain::stage::Stage;
    use ferry_nomad::{JobRegistration, NomadError};
    use std::collections::{BTreeMap, VecDeque};
    use std::io;
    use std::sync::Mutex;
    use std::time::Duration;
    use tokio::time::Instant;

    type RequestResult = Result<Option<Stage>, ClientError>;
    type AcceptResult = Result<(), ClientError>;

    /// Serves scripted request results; once exhausted, cancels the token
    /// and blocks like a long-poll with no work.
    struct FakeStages {
        requests: Mutex<VecDeque<RequestResult>>,
        accepts: Mutex<VecDeque<AcceptResult>>,
        accepted: Mutex<Vec<Stage>>,
        cancel: CancellationToken,
    }

    impl FakeStages {
        fn new(requests: Vec<RequestResult>, accepts: Vec<AcceptResult>) -> Self {
            Self {
                requests: Mutex::new(requests.into()),
                accepts: Mutex::new(accepts.into()),
                accepted: Mutex::new(Vec::new()),
                cancel: CancellationToken::new(),
            }
        }
    }

    #[async_trait]
    impl StageRepository for FakeStages {
        async fn request(&self, _filter: &Filter) -> Result<Option<Stage>, ClientError> {
            let next = self.requests.lock().unwrap().pop_front();
            match next {
                Some(result) => result,
                None => {
                    self.cancel.cancel();
                    std::future::pending().await
                }
            }
        }

        async fn accept(&self, stage: &mut Stage) -> Result<(), ClientError> {
            self.accepted.lock().unwrap().push(stage.clone());
            self.accepts.lock().unwrap().pop_front().unwrap_or(Ok(()))
        }
    }

    #[derive(Default)]
    struct FakeJobs {
        registered: Mutex<Vec<Job>>,
        fail: bool,
    }

    #[async_trait]
    impl JobRepository for FakeJobs {
        async fn register(&self, job: &Job) -> Result<JobRegistration, NomadError> {
            self.registered.lock().unwrap().push(job.clone());
            if self.fail {
                return Err(NomadError::api_error(500, "no leader"));
            }
            Ok(JobRegistration {
                eval_id: format!("eval-{}", job.id),
                ..Default::default()
            })
        }
    }

    /// Collects formatted tracing output
    #[derive(Clone, Default)]
    struct Captured(Arc<Mutex<Vec<u8>>>);

    impl io::Write for Captured {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    impl Captured {
        fn output(&self) -> String {
            String::from_utf8_lossy(&self.0.lock().unwrap()).into_owned()
        }
    }

    fn capture_logs() -> (Captured, tracing::subscriber::DefaultGuard) {
        let captured = Captured::default();
        let writer = captured.clone();
        let subscriber = tracing_subscriber::fmt()
            .with_max_level(tracing::Level::TRACE)
            .with_ansi(false)
            .with_writer(move || writer.clone())
            .finish();
        (captured, tracing::subscriber::set_default(subscriber))
    }

    fn config() -> Arc<Config> {
        Arc::new(
            Config::from_vars(vec![
                ("DRONE_RPC_HOST", "drone.company.com"),
                ("DRONE_RPC_SECRET", "secret"),
                ("DRONE_MACHINE", "runner-1"),
                ("DRONE_IMAGE", "foo:latest"),
            ])
            .unwrap(),
        )
    }

    fn stage() -> Stage {
        Stage {
            id: 42,
            number: 1,
            kind: "pipeline".to_string(),
            kind_type: "docker".to_string(),
            os: "linux".to_string(),
            arch: "amd64".to_string(),
            created: 1000,
            labels: BTreeMap::from([("region".to_string(), "us".to_string())]),
            ..Default::default()
        }
    }

    fn poller(stages: Arc<FakeStages>, jobs: Arc<FakeJobs>) -> StagePoller {
        let config = config();
        let compiler = JobCompiler::new(Arc::clone(&config))
            .with_host_os("linux")
            .with_name_generator(|| "drone-job-test".to_string());
        StagePoller::new(config, stages, jobs).with_compiler(compiler)
    }

    #[tokio::test]
    async fn test_schedules_accepted_stage() {
        let stages = Arc::new(FakeStages::new(vec![Ok(Some(stage()))], vec![]));
        let jobs = Arc::new(FakeJobs::default());
        let poller = poller(Arc::clone(&stages), Arc::clone(&jobs));

        let outcome = poller.run_once(&CancellationToken::new()).await;

        assert_eq!(
            outcome,
            CycleOutcome::Scheduled {
                job_id: "drone-job-test".to_string()
            }
        );
        assert_eq!(stages.accepted.lock().unwrap()[0].machine, "runner-1");

        let registered = jobs.registered.lock().unwrap();
        assert_eq!(registered.len(), 1);
        assert_eq!(registered[0].meta["io.drone.stage.id"], "42");
        assert_eq!(registered[0].constraints.len(), 3);
    }

    #[tokio::test]
    async fn test_lock_conflict_skips_submission() {
        let (logs, _guard) = capture_logs();
        let stages = Arc::new(FakeStages::new(
            vec![Ok(Some(stage()))],
            vec![Err(ClientError::OptimisticLock)],
        ));
        let jobs = Arc::new(FakeJobs::default());
        let poller = poller(Arc::clone(&stages), Arc::clone(&jobs));

        let outcome = poller.run_once(&CancellationToken::new()).await;

        assert_eq!(outcome, CycleOutcome::Contention);
        assert!(jobs.registered.lock().unwrap().is_empty());
        assert!(!logs.output().contains("ERROR"));
    }

    #[tokio::test]
    async fn test_no_work_is_not_an_error() {
        let (logs, _guard) = capture_logs();
        let stages = Arc::new(FakeStages::new(vec![Ok(None)], vec![]));
        let jobs = Arc::new(FakeJobs::default());
        let poller = poller(Arc::clone(&stages), Arc::clone(&jobs));

        let outcome = poller.run_once(&CancellationToken::new()).await;

        assert_eq!(outcome, CycleOutcome::NoWork);
        assert!(stages.accepted.lock().unwrap().is_empty());
        assert!(!logs.output().contains("ERROR"));
    }

    #[tokio::test]
    async fn test_cancelled_request_is_no_work() {
        let (logs, _guard) = capture_logs();
        let stages = Arc::new(FakeStages::new(vec![], vec![]));
        let jobs = Arc::new(FakeJobs::default());
        let poller = poller(Arc::clone(&stages), Arc::clone(&jobs));

        // The fake cancels its own token before blocking forever.
        let outcome = poller.run_once(&stages.cancel).await;

        assert_eq!(outcome, CycleOutcome::NoWork);
        assert!(!logs.output().contains("ERROR"));
    }

    #[tokio::test]
    async fn test_request_failure() {
        let (logs, _guard) = capture_logs();
        let stages = Arc::new(FakeStages::new(
            vec![Err(ClientError::api_error(500, "database is down"))],
            vec![],
        ));
        let jobs = Arc::new(FakeJobs::default());
        let poller = poller(Arc::clone(&stages), Arc::clone(&jobs));

        let outcome = poller.run_once(&CancellationToken::new()).await;

        assert_eq!(outcome, CycleOutcome::Failed);
        assert!(logs.output().contains("cannot request pipeline"));
    }

    #[tokio::test]
    async fn test_accept_failure_skips_submission() {
        let stages = Arc::new(FakeStages::new(
            vec![Ok(Some(stage()))],
            vec![Err(ClientError::api_error(500, "boom"))],
        ));
        let jobs = Arc::new(FakeJobs::default());
        let poller = poller(Arc::clone(&stages), Arc::clone(&jobs));

        let outcome = poller.run_once(&CancellationToken::new()).await;

        assert_eq!(outcome, CycleOutcome::Failed);
        assert!(jobs.registered.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_registration_failure() {
        let (logs, _guard) = capture_logs();
        let stages = Arc::new(FakeStages::new(vec![Ok(Some(stage()))], vec![]));
        let jobs = Arc::new(FakeJobs {
            fail: true,
            ..Default::default()
        });
        let poller = poller(Arc::clone(&stages), Arc::clone(&jobs));

        let outcome = poller.run_once(&CancellationToken::new()).await;

        assert_eq!(outcome, CycleOutcome::Failed);
        assert_eq!(jobs.registered.lock().unwrap().len(), 1);
        assert!(logs.output().contains("stage accepted but not scheduled"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_stops_on_cancellation() {
        let stages = Arc::new(FakeStages::new(
            vec![
                Ok(None),
                Ok(Some(stage())),
                Ok(Some(stage())),
                Ok(None),
            ],
            vec![Ok(()), Err(ClientError::OptimisticLock)],
        ));
        let jobs = Arc::new(FakeJobs::default());
        let poller = poller(Arc::clone(&stages), Arc::clone(&jobs));
        let cancel = stages.cancel.clone();

        // The clock is paused and only advances when the loop sleeps.
        let start = Instant::now();
        tokio::time::timeout(Duration::from_secs(5), poller.run(cancel))
            .await
            .expect("poller did not stop after cancellation");

        assert_eq!(start.elapsed(), Duration::ZERO);
        assert_eq!(stages.accepted.lock().unwrap().len(), 2);
        assert_eq!(jobs.registered.lock().unwrap().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_resets_backoff_after_no_work() {
        let stages = Arc::new(FakeStages::new(
            vec![
                Err(ClientError::api_error(503, "unavailable")),
                Ok(None),
                Err(ClientError::api_error(503, "unavailable")),
            ],
            vec![],
        ));
        let jobs = Arc::new(FakeJobs::default());
        let poller = poller(Arc::clone(&stages), Arc::clone(&jobs))
            .with_backoff(Backoff::new(Duration::from_secs(1), Duration::from_secs(60)));
        let cancel = stages.cancel.clone();

        let start = Instant::now();
        poller.run(cancel).await;

        // One second after each failure; a second consecutive failure would
        // have waited two.
        assert_eq!(start.elapsed(), Duration::from_secs(2));
    }

    #[test]
    fn test_consecutive_failures() {
        assert_eq!(consecutive_failures(&CycleOutcome::Failed, 0), 1);
        assert_eq!(consecutive_failures(&CycleOutcome::Failed, 3), 4);
        assert_eq!(consecutive_failures(&CycleOutcome::Failed, u32::MAX), u32::MAX);
        assert_eq!(consecutive_failures(&CycleOutcome::NoWork, 5), 0);
        assert_eq!(consecutive_failures(&CycleOutcome::Contention, 5), 0);
        assert_eq!(consecutive_failures(&CycleOutcome::Interrupted, 5), 0);
    }

    #[tokio::test]
    async fn test_run_returns_when_already_cancelled() {
        let stages = Arc::new(FakeStages::new(vec![Ok(Some(stage()))], vec![]));
        let jobs = Arc::new(FakeJobs::default());
        let poller = poller(Arc::clone(&stages), Arc::clone(&jobs));

        let cancel = CancellationToken::new();
        cancel.cancel();
        poller.run(cancel).await;

        assert!(stages.accepted.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_failure_backoff_is_cancellable() {
        let stages = Arc::new(FakeStages::new(
            vec![Err(ClientError::api_error(503, "unavailable"))],
            vec![],
        ));
        let jobs = Arc::new(FakeJobs::default());
        let poller = poller(Arc::clone(&stages), Arc::clone(&jobs))
            .with_backoff(Backoff::new(Duration::from_secs(3600), Duration::from_secs(3600)));
        let cancel = stages.cancel.clone();

        let handle = tokio::spawn(async move { poller.run(cancel).await });
        tokio::time::sleep(Duration::from_millis(50)).await;
        stages.cancel.cancel();

        tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .expect("backoff sleep was not interrupted")
            .unwrap();
    }
}
