//! Job compiler
//!
//! Maps a claimed stage plus the runner configuration onto a Nomad batch
//! job. Compilation is pure: the only non-deterministic input is the job
//! name, which comes from an injectable [`NameGenerator`].

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use ferry_core::domain::job::{
    Constraint, JOB_TYPE_BATCH, Job, Resources, RestartPolicy, Task, TaskGroup,
};
use ferry_core::domain::stage::Stage;
use serde_json::{Map, Value, json};

use crate::config::Config;
use crate::service::{NameGenerator, RandomNameGenerator};

/// Host OS whose scheduler node may report a different kernel than the one
/// containers actually run on (e.g. Nomad on a Mac driving a Linux VM).
pub const HOST_OS_UNRELIABLE: &str = "macos";

const TASK_GROUP_NAME: &str = "pipeline";
const TASK_NAME: &str = "stage";
const TASK_DRIVER: &str = "docker";

const DOCKER_SOCKET_VOLUME: &str = "/var/run/docker.sock:/var/run/docker.sock";
const DOCKER_PIPE_VOLUME: &str = "////./pipe/docker_engine:////./pipe/docker_engine";

/// Compiles stages into Nomad jobs
pub struct JobCompiler {
    config: Arc<Config>,
    host_os: String,
    names: Box<dyn NameGenerator>,
}

impl JobCompiler {
    /// Creates a compiler for the current host with random job names
    pub fn new(config: Arc<Config>) -> Self {
        let names = RandomNameGenerator::new(config.job.prefix.clone());
        Self {
            config,
            host_os: std::env::consts::OS.to_string(),
            names: Box::new(names),
        }
    }

    /// Overrides the host operating system used for constraint decisions
    #[allow(dead_code)]
    pub fn with_host_os(mut self, host_os: impl Into<String>) -> Self {
        self.host_os = host_os.into();
        self
    }

    /// Overrides the job name strategy
    #[allow(dead_code)]
    pub fn with_name_generator(mut self, names: impl NameGenerator + 'static) -> Self {
        self.names = Box::new(names);
        self
    }

    /// Builds the job for `stage`, stamped as scheduled at `scheduled_at`
    pub fn compile(&self, stage: &Stage, scheduled_at: DateTime<Utc>) -> Job {
        let name = self.names.generate();

        Job {
            id: name.clone(),
            name,
            job_type: JOB_TYPE_BATCH.to_string(),
            datacenters: self.config.job.datacenters.clone(),
            namespace: self.config.job.namespace.clone(),
            region: self.config.job.region.clone(),
            task_groups: vec![TaskGroup {
                name: TASK_GROUP_NAME.to_string(),
                tasks: vec![self.task(stage)],
                restart_policy: Some(RestartPolicy::fail()),
            }],
            constraints: self.constraints(stage),
            meta: metadata(stage, scheduled_at),
        }
    }

    fn task(&self, stage: &Stage) -> Task {
        let image = &self.config.image;
        let volume = if stage.is_windows() {
            DOCKER_PIPE_VOLUME
        } else {
            DOCKER_SOCKET_VOLUME
        };

        let mut config = Map::new();
        config.insert("image".to_string(), json!(image.name));
        config.insert("force_pull".to_string(), json!(image.pull));
        config.insert("volumes".to_string(), json!([volume]));
        if !image.entrypoint.is_empty() {
            config.insert("entrypoint".to_string(), json!(image.entrypoint));
        }
        if let Some(command) = &image.command {
            config.insert("command".to_string(), Value::String(command.clone()));
        }
        if !image.args.is_empty() {
            config.insert("args".to_string(), json!(image.args));
        }

        let task = self.config.task;
        Task {
            name: TASK_NAME.to_string(),
            driver: TASK_DRIVER.to_string(),
            env: self.config.environ.clone(),
            resources: Resources {
                cpu: (task.compute != 0).then_some(task.compute),
                memory_mb: (task.memory != 0).then_some(task.memory),
            },
            config,
        }
    }

    fn constraints(&self, stage: &Stage) -> Vec<Constraint> {
        let mut constraints = Vec::new();

        if self.host_os != HOST_OS_UNRELIABLE {
            constraints.push(Constraint::kernel(&stage.os));
            constraints.push(Constraint::arch(&stage.arch));
        }

        let labels = stage.labels.iter().chain(self.config.job.labels.iter());
        constraints.extend(labels.map(|(key, value)| Constraint::meta(key, value)));

        constraints
    }
}

/// Stage provenance stamped onto the job for auditing
fn metadata(stage: &Stage, scheduled_at: DateTime<Utc>) -> BTreeMap<String, String> {
    BTreeMap::from([
        ("io.drone".to_string(), "true".to_string()),
        (
            "io.drone.stage.created".to_string(),
            stage.created_at().to_string(),
        ),
        (
            "io.drone.stage.scheduled".to_string(),
            scheduled_at.to_string(),
        ),
        ("io.drone.stage.id".to_string(), stage.id.to_string()),
        ("io.drone.stage.number".to_string(), stage.number.to_string()),
        ("io.drone.stage.kind".to_string(), stage.kind.clone()),
        ("io.drone.stage.type".to_string(), stage.kind_type.clone()),
        ("io.drone.stage.os".to_string(), stage.os.clone()),
        ("io.drone.stage.arch".to_string(), stage.arch.clone()),
        ("io.drone.build.id".to_string(), stage.build_id.to_string()),
    ])
}
