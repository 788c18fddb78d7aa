// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Job-runtime tuning knobs for the worker process.

use serde::Serialize;
use serde_json::Value;

use super::fingerprint::{Fingerprint, Fingerprinted, Fingerprinter};
use super::{bounded_number, optional_string};
use crate::error::{Error, Result};

/// Valid range of `maxConcurrentJobs`.
pub const MAX_CONCURRENT_JOBS: (u32, u32) = (1, 20);
/// Valid range of `idleTtl`, in seconds.
pub const IDLE_TTL_SECS: (u32, u32) = (60, 86_400);
/// Valid range of `jobTimeout`, in seconds.
pub const JOB_TIMEOUT_SECS: (u32, u32) = (5, 172_800);

/// Worker log level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum LogLevel {
    /// DEBUG
    Debug,
    /// INFO
    Info,
    /// WARN
    Warn,
    /// ERROR
    Error,
    /// OFF
    Off,
    /// ALL
    All,
}

impl LogLevel {
    /// Name as passed to the worker.
    pub fn as_str(self) -> &'static str {
        match self {
            LogLevel::Debug => "DEBUG",
            LogLevel::Info => "INFO",
            LogLevel::Warn => "WARN",
            LogLevel::Error => "ERROR",
            LogLevel::Off => "OFF",
            LogLevel::All => "ALL",
        }
    }

    fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_uppercase().as_str() {
            "DEBUG" => Some(LogLevel::Debug),
            "INFO" => Some(LogLevel::Info),
            "WARN" => Some(LogLevel::Warn),
            "ERROR" => Some(LogLevel::Error),
            "OFF" => Some(LogLevel::Off),
            "ALL" => Some(LogLevel::All),
            _ => None,
        }
    }
}

/// Tuning knobs passed to the worker. Every field is optional; the worker
/// applies its own defaults for absent ones.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RunnerConfiguration {
    /// Jobs the worker runs in parallel.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_concurrent_jobs: Option<u32>,
    /// Seconds without work before the worker exits.
    #[serde(rename = "idleTtl", skip_serializing_if = "Option::is_none")]
    pub idle_ttl_secs: Option<u32>,
    /// Per-job timeout in seconds.
    #[serde(rename = "jobTimeout", skip_serializing_if = "Option::is_none")]
    pub job_timeout_secs: Option<u32>,
    /// Worker log level.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub log_level: Option<LogLevel>,
}

impl RunnerConfiguration {
    /// Parse and validate the `runnerConfiguration` object of a runner.
    ///
    /// Out-of-range and non-numeric values are rejected, never clamped.
    pub fn from_json(value: Option<&Value>, runner: &str) -> Result<Self> {
        let Some(value) = value.filter(|v| !v.is_null()) else {
            return Ok(Self::default());
        };
        let Some(object) = value.as_object() else {
            return Err(Error::Configuration(format!(
                "Illegal configuration for runner {runner}, RunnerConfiguration should be an object"
            )));
        };

        let log_level = match optional_string(object, "logLevel", runner)? {
            Some(raw) => Some(LogLevel::parse(&raw).ok_or_else(|| {
                Error::Configuration(format!(
                    "Illegal configuration for runner {runner}, LogLevel {raw} is not one of DEBUG, INFO, WARN, ERROR, OFF, ALL"
                ))
            })?),
            None => None,
        };

        Ok(Self {
            max_concurrent_jobs: bounded_number(
                object,
                "maxConcurrentJobs",
                "MaxConcurrentJobs",
                MAX_CONCURRENT_JOBS,
                runner,
            )?,
            idle_ttl_secs: bounded_number(object, "idleTtl", "IdleTtl", IDLE_TTL_SECS, runner)?,
            job_timeout_secs: bounded_number(
                object,
                "jobTimeout",
                "JobTimeout",
                JOB_TIMEOUT_SECS,
                runner,
            )?,
            log_level,
        })
    }
}

impl Fingerprinted for RunnerConfiguration {
    fn fingerprint(&self) -> Fingerprint {
        Fingerprinter::new("runner-configuration")
            .number("maxConcurrentJobs", self.max_concurrent_jobs.map(i64::from))
            .number("idleTtl", self.idle_ttl_secs.map(i64::from))
            .number("jobTimeout", self.job_timeout_secs.map(i64::from))
            .optional_text("logLevel", self.log_level.map(LogLevel::as_str))
            .finish()
    }
}
