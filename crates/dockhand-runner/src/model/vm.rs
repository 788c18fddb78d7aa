// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Desired and recorded state of a runner's backing VM.

use serde::Serialize;
use serde_json::Value;

use super::fingerprint::{Fingerprint, Fingerprinted, Fingerprinter};
use super::{as_object, optional_string, required_string};
use crate::error::Result;

/// Image alias used when a VM configuration names no image.
pub const DEFAULT_IMAGE_ALIAS: &str = "AmazonLinux2";

/// Desired VM configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VmConfig {
    /// Instance type.
    pub instance_type: String,
    /// Image alias or literal image id.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
    /// Instance profile.
    pub instance_profile: String,
    /// Log group the container agent ships logs to.
    pub log_group: String,
}

impl VmConfig {
    /// Parse and validate a VM configuration for `runner`.
    pub fn from_json(value: &Value, runner: &str) -> Result<Self> {
        let object = as_object(value, "VmConfig", runner)?;
        Ok(Self {
            instance_type: required_string(object, "instanceType", runner)?,
            image: optional_string(object, "image", runner)?,
            instance_profile: required_string(object, "instanceProfile", runner)?,
            log_group: required_string(object, "logGroup", runner)?,
        })
    }

    /// Image alias, or the default alias when none is set.
    pub fn image_or_default(&self) -> &str {
        self.image.as_deref().unwrap_or(DEFAULT_IMAGE_ALIAS)
    }
}

impl Fingerprinted for VmConfig {
    fn fingerprint(&self) -> Fingerprint {
        Fingerprinter::new("vm-configuration")
            .text("instanceType", &self.instance_type)
            .text("image", self.image_or_default())
            .text("instanceProfile", &self.instance_profile)
            .text("logGroup", &self.log_group)
            .finish()
    }
}

/// Desired VM configuration plus what was last launched for it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VmState {
    /// Desired configuration.
    pub config: VmConfig,
    /// Last launched instance.
    pub instance_id: Option<String>,
    /// Fingerprint of the configuration the instance was launched with.
    pub launched_fingerprint: Option<Fingerprint>,
}

impl VmState {
    /// State for a configuration that has never been launched.
    pub fn new(config: VmConfig) -> Self {
        Self {
            config,
            instance_id: None,
            launched_fingerprint: None,
        }
    }

    /// True if the recorded instance was launched from the current configuration.
    pub fn launched_from_current_config(&self) -> bool {
        self.launched_fingerprint == Some(self.config.fingerprint())
    }
}
