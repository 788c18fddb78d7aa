// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Desired state of a runner's container task.

use std::collections::BTreeSet;

use serde::Serialize;
use serde_json::Value;

use super::fingerprint::{Fingerprint, Fingerprinted, Fingerprinter};
use super::runner_config::RunnerConfiguration;
use super::{
    as_object, bounded_number, illegal, non_empty_set, optional_string, required_string,
    string_list,
};
use crate::error::Result;

/// Valid range of `installCommandsTimeout`, in seconds.
pub const INSTALL_COMMANDS_TIMEOUT_SECS: (u32, u32) = (5, 172_800);
/// Valid range of the `cpu` override, in scheduler CPU units.
pub const CPU_UNITS: (u32, u32) = (256, 98_304);
/// Valid range of the `memory` override, in MiB.
pub const MEMORY_MIB: (u32, u32) = (512, 25_165_824);

/// Whether serverless tasks get a public IP.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum PublicIpPolicy {
    /// Assign a public IP.
    Enabled,
    /// Private networking only.
    Disabled,
}

impl PublicIpPolicy {
    /// Name as sent to the scheduler.
    pub fn as_str(self) -> &'static str {
        match self {
            PublicIpPolicy::Enabled => "ENABLED",
            PublicIpPolicy::Disabled => "DISABLED",
        }
    }
}

/// Network placement for serverless tasks (and the VM's subnet).
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NetworkPlacement {
    /// Subnets, never empty.
    pub subnets: BTreeSet<String>,
    /// Security groups, never empty.
    pub security_groups: BTreeSet<String>,
    /// Public IP policy.
    pub assign_public_ip: PublicIpPolicy,
}

/// Desired configuration of a runner's container task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskConfiguration {
    /// Task definition the worker is launched from.
    pub task_definition: String,
    /// Cluster; the platform default when absent.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cluster: Option<String>,
    /// Network placement.
    #[serde(flatten)]
    pub network: NetworkPlacement,
    /// Queue the worker consumes jobs from.
    pub queue_url: String,
    /// Worker tuning knobs.
    #[serde(rename = "runnerConfiguration")]
    pub runner: RunnerConfiguration,
    /// Commands run once when the worker starts.
    pub install_commands: Vec<String>,
    /// Timeout for the install commands, in seconds.
    #[serde(
        rename = "installCommandsTimeout",
        skip_serializing_if = "Option::is_none"
    )]
    pub install_commands_timeout_secs: Option<u32>,
    /// CPU override.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cpu: Option<u32>,
    /// Memory override.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub memory: Option<u32>,
    /// Task role override.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub role_arn: Option<String>,
    /// Serverless platform version.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub platform_version: Option<String>,
}

impl TaskConfiguration {
    /// Parse and validate a task configuration for `runner`.
    pub fn from_json(value: &Value, runner: &str) -> Result<Self> {
        let object = as_object(value, "TaskConfiguration", runner)?;

        let assign_public_ip = match optional_string(object, "assignPublicIp", runner)? {
            Some(raw) if raw.eq_ignore_ascii_case("ENABLED") => PublicIpPolicy::Enabled,
            Some(raw) if raw.eq_ignore_ascii_case("DISABLED") => PublicIpPolicy::Disabled,
            Some(raw) => {
                return Err(illegal(
                    runner,
                    format!("assignPublicIp should be ENABLED or DISABLED, got {raw}"),
                ));
            }
            None => return Err(illegal(runner, "assignPublicIp is required")),
        };

        Ok(Self {
            task_definition: required_string(object, "taskDefinition", runner)?,
            cluster: optional_string(object, "cluster", runner)?,
            network: NetworkPlacement {
                subnets: non_empty_set(object, "subnets", runner)?,
                security_groups: non_empty_set(object, "securityGroups", runner)?,
                assign_public_ip,
            },
            queue_url: required_string(object, "queueUrl", runner)?,
            runner: RunnerConfiguration::from_json(object.get("runnerConfiguration"), runner)?,
            install_commands: string_list(object, "installCommands", runner)?,
            install_commands_timeout_secs: bounded_number(
                object,
                "installCommandsTimeout",
                "InstallCommandsTimeout",
                INSTALL_COMMANDS_TIMEOUT_SECS,
                runner,
            )?,
            cpu: bounded_number(object, "cpu", "Cpu", CPU_UNITS, runner)?,
            memory: bounded_number(object, "memory", "Memory", MEMORY_MIB, runner)?,
            role_arn: optional_string(object, "roleArn", runner)?,
            platform_version: optional_string(object, "platformVersion", runner)?,
        })
    }
}

impl Fingerprinted for TaskConfiguration {
    fn fingerprint(&self) -> Fingerprint {
        Fingerprinter::new("task-configuration")
            .text("taskDefinition", &self.task_definition)
            .optional_text("cluster", self.cluster.as_deref())
            .set("subnets", &self.network.subnets)
            .set("securityGroups", &self.network.security_groups)
            .text("assignPublicIp", self.network.assign_public_ip.as_str())
            .text("queueUrl", &self.queue_url)
            .nested("runnerConfiguration", self.runner.fingerprint())
            .list("installCommands", &self.install_commands)
            .number(
                "installCommandsTimeout",
                self.install_commands_timeout_secs.map(i64::from),
            )
            .number("cpu", self.cpu.map(i64::from))
            .number("memory", self.memory.map(i64::from))
            .optional_text("roleArn", self.role_arn.as_deref())
            .optional_text("platformVersion", self.platform_version.as_deref())
            .finish()
    }
}
