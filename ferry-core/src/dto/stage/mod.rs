//! Stage DTOs for the coordination server

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Pipeline kind handled by this runner
pub const KIND_PIPELINE: &str = "pipeline";

/// Pipeline type handled by this runner
pub const TYPE_DOCKER: &str = "docker";

/// Criteria the server uses to pick the next pending stage
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Filter {
    pub kind: String,
    #[serde(rename = "type")]
    pub kind_type: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub os: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub arch: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub variant: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub kernel: String,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,
}

impl Filter {
    /// Filter matching docker pipelines on any platform
    pub fn docker_pipeline() -> Self {
        Self {
            kind: KIND_PIPELINE.to_string(),
            kind_type: TYPE_DOCKER.to_string(),
            ..Default::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_docker_pipeline_filter_json() {
        let value = serde_json::to_value(Filter::docker_pipeline()).unwrap();
        assert_eq!(
            value,
            serde_json::json!({ "kind": "pipeline", "type": "docker" })
        );
    }
}
