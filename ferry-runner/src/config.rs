//! Runner configuration
//!
//! Settings are read once at startup from `DRONE_*` environment variables
//! and never change afterwards. Loading works on a snapshot of the
//! environment so it can be exercised without touching the process state.

use std::collections::BTreeMap;
use std::ffi::OsString;
use std::str::FromStr;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use ferry_client::Dump;

/// Prefix of variables that configure the runner and its build containers
pub const ENV_PREFIX: &str = "DRONE_";

/// Legacy variable names and their current replacements
const LEGACY: &[(&str, &str)] = &[
    ("DRONE_HOSTNAME", "DRONE_MACHINE"),
    ("DRONE_NOMAD_DATACENTER", "DRONE_JOB_DATACENTER"),
    ("DRONE_NOMAD_NAMESPACE", "DRONE_JOB_NAMESPACE"),
    ("DRONE_NOMAD_REGION", "DRONE_JOB_REGION"),
    ("DRONE_NOMAD_IMAGE", "DRONE_IMAGE"),
    ("DRONE_NOMAD_IMAGE_PULL", "DRONE_IMAGE_PULL"),
    ("DRONE_NOMAD_DEFAULT_RAM", "DRONE_TASK_MEMORY"),
    ("DRONE_NOMAD_DEFAULT_CPU", "DRONE_TASK_COMPUTE"),
    ("DRONE_NOMAD_LABELS", "DRONE_JOB_LABELS"),
    ("DRONE_NOMAD_JOB_PREFIX", "DRONE_JOB_PREFIX"),
];

/// Control variables that configure the job compiler itself and must not
/// reach the build container's environment
const IGNORED: &[&str] = &[
    "DRONE_JOB_DATACENTER",
    "DRONE_JOB_NAMESPACE",
    "DRONE_JOB_REGION",
    "DRONE_JOB_PREFIX",
    "DRONE_JOB_LABELS",
    "DRONE_TASK_COMPUTE",
    "DRONE_TASK_MEMORY",
    "DRONE_MACHINE",
    "DRONE_IMAGE",
    "DRONE_IMAGE_PULL",
    "DRONE_IMAGE_ENTRYPOINT",
    "DRONE_IMAGE_COMMAND",
    "DRONE_IMAGE_ARGS",
    "DRONE_POLL_BACKOFF",
    "DRONE_POLL_BACKOFF_MAX",
];

/// Runner configuration
#[derive(Debug, Clone)]
pub struct Config {
    pub debug: bool,
    pub trace: bool,

    /// Name recorded on stages this runner accepts
    pub machine: String,

    pub job: JobConfig,
    pub task: TaskConfig,
    pub image: ImageConfig,
    pub server: ServerConfig,
    pub callback: CallbackConfig,
    pub poll: PollConfig,

    /// `DRONE_` variables passed through to the build container
    pub environ: BTreeMap<String, String>,

    /// Problems found while loading that did not prevent startup
    pub warnings: Vec<String>,
}

/// Placement of compiled jobs
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobConfig {
    pub datacenters: Vec<String>,
    pub namespace: Option<String>,
    pub region: Option<String>,
    /// Prefix of generated job names
    pub prefix: String,
    /// Extra `meta.<key>` placement constraints
    pub labels: BTreeMap<String, String>,
}

/// Default task resources; `0` leaves the scheduler default in place
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TaskConfig {
    /// CPU shares (MHz)
    pub compute: u32,
    /// Memory (MB)
    pub memory: u32,
}

/// Image that runs the pipeline inside the job
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageConfig {
    pub name: String,
    pub pull: bool,
    pub entrypoint: Vec<String>,
    pub command: Option<String>,
    pub args: Vec<String>,
}

/// Coordination server connection
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    pub proto: String,
    pub host: String,
    pub secret: String,
    pub skip_verify: bool,
    pub dump: bool,
    pub dump_body: bool,
}

impl ServerConfig {
    /// Base URL of the server
    pub fn addr(&self) -> String {
        format!("{}://{}", self.proto, self.host)
    }

    /// HTTP dump level for the coordination client
    pub fn dump_mode(&self) -> Dump {
        match (self.dump, self.dump_body) {
            (false, _) => Dump::Off,
            (true, false) => Dump::Headers,
            (true, true) => Dump::Bodies,
        }
    }
}

/// Server address as seen from inside build containers, when it differs
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CallbackConfig {
    pub proto: Option<String>,
    pub host: Option<String>,
}

/// Delay policy after failed poll cycles
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollConfig {
    /// First delay after a failure; zero disables backoff entirely
    pub backoff_initial: Duration,
    /// Upper bound for the doubling delay
    pub backoff_max: Duration,
}

impl Config {
    /// Creates configuration from the process environment
    ///
    /// Required variables:
    /// - DRONE_RPC_HOST
    /// - DRONE_RPC_SECRET
    pub fn from_env() -> Result<Self> {
        let (vars, mut skipped) = snapshot_env(std::env::vars_os());
        let host = hostname::get().ok().and_then(|name| name.into_string().ok());

        let mut config = Self::load(vars, host)?;
        skipped.append(&mut config.warnings);
        config.warnings = skipped;
        Ok(config)
    }

    /// Creates configuration from a snapshot of environment variables
    ///
    /// The OS host name is not consulted, only `HOSTNAME` in the snapshot.
    pub fn from_vars<I, K, V>(vars: I) -> Result<Self>
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Self::load(
            vars.into_iter().map(|(k, v)| (k.into(), v.into())).collect(),
            None,
        )
    }

    fn load(mut vars: BTreeMap<String, String>, host: Option<String>) -> Result<Self> {
        let warnings = resolve_legacy(&mut vars);
        let env = Vars(&vars);

        let machine = env
            .get("DRONE_MACHINE")
            .map(str::to_string)
            .or_else(|| host.filter(|h| !h.trim().is_empty()))
            .or_else(|| env.get("HOSTNAME").map(str::to_string))
            .unwrap_or_else(|| format!("runner-{}", uuid::Uuid::new_v4()));

        let mut datacenters = env.list("DRONE_JOB_DATACENTER");
        if datacenters.is_empty() {
            datacenters.push("dc1".to_string());
        }

        let config = Self {
            debug: env.flag("DRONE_DEBUG", false)?,
            trace: env.flag("DRONE_TRACE", false)?,
            machine,
            job: JobConfig {
                datacenters,
                namespace: env.get("DRONE_JOB_NAMESPACE").map(str::to_string),
                region: env.get("DRONE_JOB_REGION").map(str::to_string),
                prefix: env.string("DRONE_JOB_PREFIX", "drone-job-"),
                labels: env.map("DRONE_JOB_LABELS")?,
            },
            task: TaskConfig {
                compute: env.number("DRONE_TASK_COMPUTE", 500)?,
                memory: env.number("DRONE_TASK_MEMORY", 1024)?,
            },
            image: ImageConfig {
                name: env.string("DRONE_IMAGE", "drone/drone-runner-docker:latest"),
                pull: env.flag("DRONE_IMAGE_PULL", false)?,
                entrypoint: env.list("DRONE_IMAGE_ENTRYPOINT"),
                command: env.get("DRONE_IMAGE_COMMAND").map(str::to_string),
                args: env.list("DRONE_IMAGE_ARGS"),
            },
            server: ServerConfig {
                proto: env.string("DRONE_RPC_PROTO", "http"),
                host: env
                    .get("DRONE_RPC_HOST")
                    .context("DRONE_RPC_HOST environment variable not set")?
                    .to_string(),
                secret: env
                    .get("DRONE_RPC_SECRET")
                    .context("DRONE_RPC_SECRET environment variable not set")?
                    .to_string(),
                skip_verify: env.flag("DRONE_RPC_SKIP_VERIFY", false)?,
                dump: env.flag("DRONE_RPC_DUMP_HTTP", false)?,
                dump_body: env.flag("DRONE_RPC_DUMP_HTTP_BODY", false)?,
            },
            callback: CallbackConfig {
                proto: env.get("DRONE_CALLBACK_PROTO").map(str::to_string),
                host: env.get("DRONE_CALLBACK_HOST").map(str::to_string),
            },
            poll: PollConfig {
                backoff_initial: Duration::from_secs(env.number("DRONE_POLL_BACKOFF", 1)?),
                backoff_max: Duration::from_secs(env.number("DRONE_POLL_BACKOFF_MAX", 60)?),
            },
            environ: BTreeMap::new(),
            warnings,
        };

        let config = config.with_environ(&vars);
        config.validate()?;
        Ok(config)
    }

    /// Collects the passthrough environment for build containers
    fn with_environ(mut self, vars: &BTreeMap<String, String>) -> Self {
        self.environ = vars
            .iter()
            .filter(|(k, _)| k.starts_with(ENV_PREFIX) && !IGNORED.contains(&k.as_str()))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();

        // Local development only: build containers may need a different
        // server address than the runner itself.
        if let Some(host) = &self.callback.host {
            self.environ.insert("DRONE_RPC_HOST".to_string(), host.clone());
        }
        if let Some(proto) = &self.callback.proto {
            self.environ
                .insert("DRONE_RPC_PROTO".to_string(), proto.clone());
        }

        self
    }

    /// Validates the configuration
    pub fn validate(&self) -> Result<()> {
        if self.machine.is_empty() {
            bail!("machine cannot be empty");
        }

        if self.server.proto != "http" && self.server.proto != "https" {
            bail!("DRONE_RPC_PROTO must be http or https");
        }

        if self.job.datacenters.is_empty() {
            bail!("at least one datacenter is required");
        }

        if self.image.name.is_empty() {
            bail!("DRONE_IMAGE cannot be empty");
        }

        if self.poll.backoff_max < self.poll.backoff_initial {
            bail!("DRONE_POLL_BACKOFF_MAX must not be less than DRONE_POLL_BACKOFF");
        }

        Ok(())
    }

    /// Tracing filter directives for the configured verbosity
    pub fn log_filter(&self) -> String {
        let level = if self.trace {
            "trace"
        } else if self.debug {
            "debug"
        } else {
            "info"
        };
        // HTTP dumps are emitted at trace level by the coordination client.
        let client_level = if self.server.dump { "trace" } else { level };

        format!(
            "ferry_runner={},ferry_client={},ferry_nomad={}",
            level, client_level, level
        )
    }
}

/// Splits the process environment into UTF-8 variables and a warning for
/// every variable that is not valid UTF-8
fn snapshot_env<I>(vars: I) -> (BTreeMap<String, String>, Vec<String>)
where
    I: IntoIterator<Item = (OsString, OsString)>,
{
    let mut snapshot = BTreeMap::new();
    let mut warnings = Vec::new();

    for (key, value) in vars {
        match (key.into_string(), value.into_string()) {
            (Ok(key), Ok(value)) => {
                snapshot.insert(key, value);
            }
            (Ok(key), Err(_)) => {
                warnings.push(format!("{} is ignored because its value is not valid UTF-8", key))
            }
            (Err(key), _) => warnings.push(format!(
                "{} is ignored because its name is not valid UTF-8",
                key.to_string_lossy()
            )),
        }
    }

    (snapshot, warnings)
}

/// Copies legacy variables onto their current names when those are unset
///
/// Empty values count as unset. Returns a warning for every legacy variable
/// shadowed by its replacement.
fn resolve_legacy(vars: &mut BTreeMap<String, String>) -> Vec<String> {
    let mut warnings = Vec::new();

    for (legacy, current) in LEGACY {
        let Some(value) = vars.get(*legacy).filter(|v| !v.trim().is_empty()).cloned() else {
            continue;
        };
        match vars.get(*current).filter(|v| !v.trim().is_empty()) {
            Some(existing) if existing != &value => warnings.push(format!(
                "{} is ignored because {} is also set",
                legacy, current
            )),
            Some(_) => {}
            None => {
                vars.insert(current.to_string(), value);
            }
        }
    }

    warnings
}

/// Typed lookups over an environment snapshot; empty values count as unset
struct Vars<'a>(&'a BTreeMap<String, String>);

impl Vars<'_> {
    fn get(&self, key: &str) -> Option<&str> {
        self.0
            .get(key)
            .map(|v| v.trim())
            .filter(|v| !v.is_empty())
    }

    fn string(&self, key: &str, default: &str) -> String {
        self.get(key).unwrap_or(default).to_string()
    }

    fn flag(&self, key: &str, default: bool) -> Result<bool> {
        let Some(value) = self.get(key) else {
            return Ok(default);
        };
        match value.to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => Ok(true),
            "0" | "false" | "no" | "off" => Ok(false),
            _ => bail!("{} must be a boolean, got {:?}", key, value),
        }
    }

    fn number<T>(&self, key: &str, default: T) -> Result<T>
    where
        T: FromStr,
        T::Err: std::error::Error + Send + Sync + 'static,
    {
        match self.get(key) {
            Some(value) => value
                .parse()
                .with_context(|| format!("{} must be a non-negative integer, got {:?}", key, value)),
            None => Ok(default),
        }
    }

    /// Comma separated list
    fn list(&self, key: &str) -> Vec<String> {
        self.get(key)
            .map(|value| {
                value
                    .split(',')
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Comma separated `key:value` pairs
    fn map(&self, key: &str) -> Result<BTreeMap<String, String>> {
        let mut map = BTreeMap::new();
        for item in self.list(key) {
            let Some((k, v)) = item.split_once(':') else {
                bail!("{} has an invalid map item {:?}, expected key:value", key, item);
            };
            map.insert(k.trim().to_string(), v.trim().to_string());
        }
        Ok(map)
    }
}
