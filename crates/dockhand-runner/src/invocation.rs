// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Orchestrator input event and the job message built from it.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::model::{Fingerprint, RunnerKey};
use crate::queue::JobMessage;

/// One workflow step asking for a job to run on a runner.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunnerInvocation {
    /// Stack owning the runner.
    pub owner: String,
    /// Runner name.
    pub runner: String,
    /// Workflow execution id.
    pub execution_id: String,
    /// Workflow step name.
    pub step_name: String,
    /// Token the parked step waits on.
    pub callback_token: String,
    /// Job definition handed to the worker untouched.
    #[serde(default)]
    pub job: Value,
}

impl RunnerInvocation {
    /// Key of the targeted runner.
    pub fn key(&self) -> RunnerKey {
        RunnerKey::new(&self.owner, &self.runner)
    }

    /// Job message for `queue_url`, tagged with the configuration fingerprint
    /// the job expects its worker to run with.
    pub fn job_message(&self, queue_url: &str, fingerprint: Fingerprint) -> JobMessage {
        let body = serde_json::json!({
            "owner": self.owner,
            "runner": self.runner,
            "executionId": self.execution_id,
            "stepName": self.step_name,
            "callbackToken": self.callback_token,
            "job": self.job,
            "configurationFingerprint": fingerprint.as_i64(),
        });
        JobMessage::for_step(queue_url, &self.execution_id, &self.step_name, body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::dedup_key;
    use serde_json::json;

    #[test]
    fn test_deserialize_event() {
        let invocation: RunnerInvocation = serde_json::from_value(json!({
            "owner": "demo",
            "runner": "web",
            "executionId": "arn:exec:1",
            "stepName": "Build",
            "callbackToken": "tok"
        }))
        .unwrap();
        assert_eq!(invocation.key().resource_name(), "demo-web");
        assert_eq!(invocation.job, Value::Null);
    }

    #[test]
    fn test_job_message() {
        let invocation = RunnerInvocation {
            owner: "demo".into(),
            runner: "web".into(),
            execution_id: "arn:exec:1".into(),
            step_name: "Build".into(),
            callback_token: "tok".into(),
            job: json!({"commands": ["make"]}),
        };
        let message = invocation.job_message("https://queue/demo-web.fifo", Fingerprint::from_i64(9));
        assert_eq!(message.dedup_id, dedup_key("arn:exec:1", "Build"));
        assert_eq!(message.body["configurationFingerprint"], 9);
        assert_eq!(message.body["job"]["commands"][0], "make");
        assert_eq!(message.body["callbackToken"], "tok");
    }
}
