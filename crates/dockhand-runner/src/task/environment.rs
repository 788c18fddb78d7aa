// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Worker process environment and entry command.
//!
//! The variable names are part of the worker's contract and must not change.

use std::collections::BTreeMap;

use crate::config::Config;
use crate::model::{Fingerprint, RunnerRecord};

/// Queue the worker consumes.
pub const QUEUE_URL: &str = "DOCKHAND_QUEUE_URL";
/// Deployment data table.
pub const DEPLOY_DATA_TABLE: &str = "DOCKHAND_DEPLOY_DATA_TABLE";
/// Resource state table (where the worker sets its ready flag).
pub const RESOURCE_STATE_TABLE: &str = "DOCKHAND_RESOURCE_STATE_TABLE";
/// Fingerprint of the configuration the task was started with.
pub const CONFIGURATION_FINGERPRINT: &str = "DOCKHAND_CONFIGURATION_FINGERPRINT";
/// `owner-runner`.
pub const RUNNER_RESOURCE_NAME: &str = "DOCKHAND_RUNNER_RESOURCE_NAME";
/// Always `true`; worker logs end up in a log service.
pub const DISABLE_ANSI_COLOR: &str = "DOCKHAND_DISABLE_ANSI_COLOR";
/// Account id.
pub const ACCOUNT_ID: &str = "DOCKHAND_ACCOUNT_ID";
/// Region.
pub const REGION: &str = "DOCKHAND_REGION";
/// Install commands timeout, seconds.
pub const STARTUP_COMMANDS_TIMEOUT: &str = "DOCKHAND_STARTUP_COMMANDS_TIMEOUT";
/// Idle TTL, seconds.
pub const RUNNER_IDLE_TTL: &str = "DOCKHAND_RUNNER_IDLE_TTL";
/// Max concurrent jobs.
pub const MAX_CONCURRENT_JOBS: &str = "DOCKHAND_MAX_CONCURRENT_JOBS";
/// Per-job timeout, seconds.
pub const JOB_TIMEOUT: &str = "DOCKHAND_JOB_TIMEOUT";
/// Worker log level.
pub const LOG_LEVEL: &str = "DOCKHAND_LOG_LEVEL";
/// Backing VM instance id.
pub const VM_INSTANCE_ID: &str = "DOCKHAND_VM_INSTANCE_ID";

/// Name of the worker binary on the task's PATH.
pub const RUNNER_BINARY: &str = "dockhand-runner";

/// Environment overrides for a worker serving `record`.
pub fn worker_environment(
    config: &Config,
    record: &RunnerRecord,
    fingerprint: Fingerprint,
) -> BTreeMap<String, String> {
    let task = &record.task_configuration;
    let mut env = BTreeMap::new();
    let mut set = |name: &str, value: String| {
        env.insert(name.to_string(), value);
    };

    set(QUEUE_URL, task.queue_url.clone());
    set(DEPLOY_DATA_TABLE, config.deploy_data_table.clone());
    set(RESOURCE_STATE_TABLE, config.resource_state_table.clone());
    set(CONFIGURATION_FINGERPRINT, fingerprint.to_string());
    set(RUNNER_RESOURCE_NAME, record.key.resource_name());
    set(DISABLE_ANSI_COLOR, "true".to_string());
    set(ACCOUNT_ID, config.account_id.clone());
    set(REGION, config.region.clone());

    if let Some(timeout) = task.install_commands_timeout_secs {
        set(STARTUP_COMMANDS_TIMEOUT, timeout.to_string());
    }
    if let Some(ttl) = task.runner.idle_ttl_secs {
        set(RUNNER_IDLE_TTL, ttl.to_string());
    }
    if let Some(jobs) = task.runner.max_concurrent_jobs {
        set(MAX_CONCURRENT_JOBS, jobs.to_string());
    }
    if let Some(timeout) = task.runner.job_timeout_secs {
        set(JOB_TIMEOUT, timeout.to_string());
    }
    if let Some(level) = task.runner.log_level {
        set(LOG_LEVEL, level.as_str().to_string());
    }
    if let Some(instance_id) = record.vm.as_ref().and_then(|vm| vm.instance_id.clone()) {
        set(VM_INSTANCE_ID, instance_id);
    }

    env
}

/// Entry command: install the worker if the image lacks the required
/// version, then exec it with the callback token.
///
/// The token is passed as `$0` of the script rather than spliced into it, so
/// it needs no quoting.
pub fn bootstrap_command(config: &Config, callback_token: &str) -> Vec<String> {
    let version = &config.runner_version;
    let url = &config.runner_download_url;
    let script = format!(
        r#"set -e
BIN_DIR="${{HOME:-/tmp}}/.dockhand/bin"
export PATH="$BIN_DIR:$PATH"
if ! command -v {RUNNER_BINARY} >/dev/null 2>&1 || [ "$({RUNNER_BINARY} --version 2>/dev/null)" != "{version}" ]; then
  mkdir -p "$BIN_DIR"
  if command -v curl >/dev/null 2>&1; then
    curl -fsSL "{url}?version={version}" -o "$BIN_DIR/{RUNNER_BINARY}"
  else
    wget -q -O "$BIN_DIR/{RUNNER_BINARY}" "{url}?version={version}"
  fi
  chmod +x "$BIN_DIR/{RUNNER_BINARY}"
fi
exec {RUNNER_BINARY} "$0"
"#
    );
    vec![
        "/bin/bash".to_string(),
        "-c".to_string(),
        script,
        callback_token.to_string(),
    ]
}
