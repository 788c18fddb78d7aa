// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Runner configuration model.
//!
//! Immutable value types describing a runner's desired state and the record
//! tracking what is actually running. Desired configuration arrives as JSON
//! (from the stack configuration layer, or the store's JSONB columns) and is
//! validated here; a validation failure is always [`Error::Configuration`].

mod fingerprint;
mod record;
mod runner_config;
mod task_config;
mod vm;

pub use fingerprint::{Fingerprint, Fingerprinted, Fingerprinter};
pub use record::{AppReadiness, ConfigurationDrift, Distribution, RESOURCE_TYPE, RunnerKey, RunnerRecord};
pub use runner_config::{
    IDLE_TTL_SECS, JOB_TIMEOUT_SECS, LogLevel, MAX_CONCURRENT_JOBS, RunnerConfiguration,
};
pub use task_config::{
    CPU_UNITS, INSTALL_COMMANDS_TIMEOUT_SECS, MEMORY_MIB, NetworkPlacement, PublicIpPolicy,
    TaskConfiguration,
};
pub use vm::{DEFAULT_IMAGE_ALIAS, VmConfig, VmState};

use std::collections::BTreeSet;

use serde_json::{Map, Value};

use crate::error::{Error, Result};

fn illegal(runner: &str, detail: impl std::fmt::Display) -> Error {
    Error::Configuration(format!("Illegal configuration for runner {runner}, {detail}"))
}

/// Integer field constrained to `[min, max]`. Accepts JSON numbers and
/// numeric strings.
pub(crate) fn bounded_number(
    object: &Map<String, Value>,
    key: &str,
    name: &str,
    (min, max): (u32, u32),
    runner: &str,
) -> Result<Option<u32>> {
    let parsed = match object.get(key) {
        None | Some(Value::Null) => return Ok(None),
        Some(Value::Number(number)) => number.as_i64(),
        Some(Value::String(raw)) => raw.trim().parse::<i64>().ok(),
        Some(_) => None,
    };
    let Some(value) = parsed else {
        return Err(illegal(runner, format!("{name} should be a number")));
    };
    if value < i64::from(min) {
        return Err(illegal(
            runner,
            format!("{name} should be a number greater or equal to {min}"),
        ));
    }
    if value > i64::from(max) {
        return Err(illegal(
            runner,
            format!("{name} should be a number less or equal to {max}"),
        ));
    }
    // In range, so it fits.
    Ok(Some(value as u32))
}

pub(crate) fn optional_string(
    object: &Map<String, Value>,
    key: &str,
    runner: &str,
) -> Result<Option<String>> {
    match object.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(value)) if value.trim().is_empty() => Ok(None),
        Some(Value::String(value)) => Ok(Some(value.clone())),
        Some(_) => Err(illegal(runner, format!("{key} should be a string"))),
    }
}

pub(crate) fn required_string(
    object: &Map<String, Value>,
    key: &str,
    runner: &str,
) -> Result<String> {
    optional_string(object, key, runner)?
        .ok_or_else(|| illegal(runner, format!("{key} is required")))
}

pub(crate) fn string_list(
    object: &Map<String, Value>,
    key: &str,
    runner: &str,
) -> Result<Vec<String>> {
    match object.get(key) {
        None | Some(Value::Null) => Ok(Vec::new()),
        Some(Value::Array(items)) => items
            .iter()
            .map(|item| {
                item.as_str()
                    .map(str::to_string)
                    .ok_or_else(|| illegal(runner, format!("{key} should only contain strings")))
            })
            .collect(),
        Some(_) => Err(illegal(runner, format!("{key} should be a list"))),
    }
}

pub(crate) fn non_empty_set(
    object: &Map<String, Value>,
    key: &str,
    runner: &str,
) -> Result<BTreeSet<String>> {
    let values: BTreeSet<String> = string_list(object, key, runner)?
        .into_iter()
        .filter(|v| !v.trim().is_empty())
        .collect();
    if values.is_empty() {
        return Err(illegal(runner, format!("{key} is required and can not be empty")));
    }
    Ok(values)
}

pub(crate) fn as_object<'a>(
    value: &'a Value,
    what: &str,
    runner: &str,
) -> Result<&'a Map<String, Value>> {
    value
        .as_object()
        .ok_or_else(|| illegal(runner, format!("{what} should be an object")))
}
