// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! VM provisioning and parameter lookup APIs.

use std::collections::BTreeMap;

use async_trait::async_trait;

use crate::error::ProviderError;

/// Instance state as reported by the VM service.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstanceState {
    /// Booting.
    Pending,
    /// Up and passing status checks.
    Running,
    /// Shutting down towards stopped.
    Stopping,
    /// Stopped.
    Stopped,
    /// Shutting down towards terminated.
    ShuttingDown,
    /// Gone.
    Terminated,
}

/// Everything needed to launch one runner VM.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VmLaunchRequest {
    /// Concrete image id.
    pub image_id: String,
    /// Instance type.
    pub instance_type: String,
    /// Instance profile.
    pub instance_profile: String,
    /// Subnet.
    pub subnet_id: String,
    /// Security groups.
    pub security_groups: Vec<String>,
    /// Base64-encoded boot script.
    pub user_data: String,
    /// Tags applied on create.
    pub tags: BTreeMap<String, String>,
    /// Root volume size in GiB.
    pub root_volume_gib: u32,
    /// Root volume type.
    pub root_volume_type: String,
}

/// VM provisioning service.
#[async_trait]
pub trait VmApi: Send + Sync {
    /// Launch exactly one instance and return its id.
    async fn run_instance(&self, request: &VmLaunchRequest) -> Result<String, ProviderError>;

    /// Current state, `Ok(None)` if the service does not know the instance.
    async fn instance_state(&self, instance_id: &str)
    -> Result<Option<InstanceState>, ProviderError>;

    /// Block until running, using the service's own backoff.
    async fn wait_until_running(&self, instance_id: &str) -> Result<(), ProviderError>;

    /// Block until terminated, using the service's own backoff.
    async fn wait_until_terminated(&self, instance_id: &str) -> Result<(), ProviderError>;

    /// Request termination.
    async fn terminate_instance(&self, instance_id: &str) -> Result<(), ProviderError>;
}

/// Managed parameter store.
#[async_trait]
pub trait ParameterApi: Send + Sync {
    /// Parameter value, `Ok(None)` if it does not exist.
    async fn get_parameter(&self, name: &str) -> Result<Option<String>, ProviderError>;
}
