//! Stage domain types

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Windows-family operating system name as reported by the server.
pub const OS_WINDOWS: &str = "windows";

/// One schedulable unit of a CI pipeline
///
/// Owned by the coordination server. The runner holds a copy for a single
/// poll cycle and only writes `machine` (before accepting) and the
/// `updated`/`version` pair the server hands back on accept.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Stage {
    pub id: i64,
    pub repo_id: i64,
    pub build_id: i64,
    pub number: i32,
    pub name: String,
    pub kind: String,
    #[serde(rename = "type")]
    pub kind_type: String,
    pub status: String,
    pub machine: String,
    pub os: String,
    pub arch: String,
    pub variant: String,
    pub kernel: String,
    /// Unix seconds
    pub created: i64,
    /// Unix seconds
    pub updated: i64,
    /// Optimistic-lock version
    pub version: i64,
    pub labels: BTreeMap<String, String>,
}

impl Stage {
    /// Creation time as a UTC timestamp, falling back to the epoch when the
    /// server sends an out-of-range value.
    pub fn created_at(&self) -> DateTime<Utc> {
        DateTime::from_timestamp(self.created, 0).unwrap_or_default()
    }

    /// Whether the stage targets a Windows-family host
    pub fn is_windows(&self) -> bool {
        self.os.eq_ignore_ascii_case(OS_WINDOWS)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stage_from_server_json() {
        let json = r#"{
            "id": 42,
            "repo_id": 7,
            "build_id": 99,
            "number": 2,
            "name": "default",
            "kind": "pipeline",
            "type": "docker",
            "status": "pending",
            "os": "linux",
            "arch": "amd64",
            "created": 1000,
            "labels": {"region": "us"},
            "on_success": true,
            "depends_on": []
        }"#;

        let stage: Stage = serde_json::from_str(json).unwrap();
        assert_eq!(stage.id, 42);
        assert_eq!(stage.kind_type, "docker");
        assert_eq!(stage.labels.get("region"), Some(&"us".to_string()));
        assert!(stage.machine.is_empty());
    }

    #[test]
    fn test_created_at() {
        let stage = Stage {
            created: 1000,
            ..Default::default()
        };
        assert_eq!(stage.created_at().to_string(), "1970-01-01 00:16:40 UTC");
    }

    #[test]
    fn test_is_windows() {
        let mut stage = Stage {
            os: "windows".to_string(),
            ..Default::default()
        };
        assert!(stage.is_windows());

        stage.os = "linux".to_string();
        assert!(!stage.is_windows());
    }
}
