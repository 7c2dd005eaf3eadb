//! Nomad job domain types
//!
//! Mirrors the subset of the Nomad job specification that the runner
//! produces. Field names follow Nomad's JSON API (PascalCase).

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Job type for run-to-completion workloads
pub const JOB_TYPE_BATCH: &str = "batch";

/// Restart mode that fails the allocation instead of restarting it
pub const RESTART_MODE_FAIL: &str = "fail";

/// Equality operand for constraints
pub const OPERAND_EQUAL: &str = "=";

/// Cluster job descriptor
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Job {
    #[serde(rename = "ID")]
    pub id: String,
    #[serde(rename = "Name")]
    pub name: String,
    #[serde(rename = "Type")]
    pub job_type: String,
    #[serde(rename = "Datacenters", default)]
    pub datacenters: Vec<String>,
    #[serde(rename = "Namespace", skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
    #[serde(rename = "Region", skip_serializing_if = "Option::is_none")]
    pub region: Option<String>,
    #[serde(rename = "TaskGroups", default)]
    pub task_groups: Vec<TaskGroup>,
    #[serde(rename = "Constraints", default)]
    pub constraints: Vec<Constraint>,
    #[serde(rename = "Meta", default)]
    pub meta: BTreeMap<String, String>,
}

/// Group of tasks co-scheduled on the same node
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TaskGroup {
    #[serde(rename = "Name")]
    pub name: String,
    #[serde(rename = "Tasks", default)]
    pub tasks: Vec<Task>,
    #[serde(rename = "RestartPolicy", skip_serializing_if = "Option::is_none")]
    pub restart_policy: Option<RestartPolicy>,
}

/// A single unit of work executed by a driver
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Task {
    #[serde(rename = "Name")]
    pub name: String,
    #[serde(rename = "Driver")]
    pub driver: String,
    #[serde(rename = "Env", default)]
    pub env: BTreeMap<String, String>,
    #[serde(rename = "Resources", default)]
    pub resources: Resources,
    /// Driver-specific configuration, passed through untouched
    #[serde(rename = "Config", default)]
    pub config: serde_json::Map<String, serde_json::Value>,
}

/// Resource requests; unset fields fall back to scheduler defaults
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Resources {
    #[serde(rename = "CPU", skip_serializing_if = "Option::is_none")]
    pub cpu: Option<u32>,
    #[serde(rename = "MemoryMB", skip_serializing_if = "Option::is_none")]
    pub memory_mb: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RestartPolicy {
    #[serde(rename = "Mode")]
    pub mode: String,
}

impl RestartPolicy {
    /// Policy that surfaces failures instead of restarting
    pub fn fail() -> Self {
        Self {
            mode: RESTART_MODE_FAIL.to_string(),
        }
    }
}

/// Placement predicate evaluated by the scheduler
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Constraint {
    #[serde(rename = "LTarget")]
    pub l_target: String,
    #[serde(rename = "RTarget")]
    pub r_target: String,
    #[serde(rename = "Operand")]
    pub operand: String,
}

impl Constraint {
    /// `l_target = r_target`
    pub fn equal(l_target: impl Into<String>, r_target: impl Into<String>) -> Self {
        Self {
            l_target: l_target.into(),
            r_target: r_target.into(),
            operand: OPERAND_EQUAL.to_string(),
        }
    }

    /// Pins the node's kernel name attribute
    pub fn kernel(os: impl Into<String>) -> Self {
        Self::equal("${attr.kernel.name}", os)
    }

    /// Pins the node's CPU architecture attribute
    pub fn arch(arch: impl Into<String>) -> Self {
        Self::equal("${attr.cpu.arch}", arch)
    }

    /// Pins a node metadata key
    pub fn meta(key: &str, value: impl Into<String>) -> Self {
        Self::equal(format!("${{meta.{}}}", key), value)
    }
}
