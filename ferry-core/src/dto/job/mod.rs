//! Job registration DTOs for the Nomad API

use serde::{Deserialize, Serialize};

use crate::domain::job::Job;

/// Body of `PUT /v1/jobs`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegisterJob {
    #[serde(rename = "Job")]
    pub job: Job,
}

/// Nomad's reply to a job registration
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct JobRegistration {
    #[serde(rename = "EvalID")]
    pub eval_id: String,
    #[serde(rename = "EvalCreateIndex")]
    pub eval_create_index: u64,
    #[serde(rename = "JobModifyIndex")]
    pub job_modify_index: u64,
    #[serde(rename = "Warnings")]
    pub warnings: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_registration_from_nomad_json() {
        let json = r#"{
            "EvalID": "d092fdc0-e1fd-2536-67d8-43af8ca798ac",
            "EvalCreateIndex": 35,
            "JobModifyIndex": 34,
            "Warnings": "",
            "Index": 35,
            "LastContact": 0,
            "KnownLeader": false
        }"#;

        let reg: JobRegistration = serde_json::from_str(json).unwrap();
        assert_eq!(reg.eval_id, "d092fdc0-e1fd-2536-67d8-43af8ca798ac");
        assert_eq!(reg.job_modify_index, 34);
    }
}
