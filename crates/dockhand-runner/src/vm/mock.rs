// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Mock VM and parameter APIs for testing.

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::Mutex;

use super::bootstrap::IMAGE_ALIASES;
use super::traits::*;
use crate::error::ProviderError;

/// A recorded VM call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VmCall {
    /// `run_instance`.
    RunInstance(VmLaunchRequest),
    /// `instance_state`.
    State(String),
    /// `wait_until_running`.
    WaitRunning(String),
    /// `wait_until_terminated`.
    WaitTerminated(String),
    /// `terminate_instance`.
    Terminate(String),
}

#[derive(Default)]
struct VmState {
    calls: Vec<VmCall>,
    instances: HashMap<String, InstanceState>,
    next_id: u32,
    launch_error: Option<ProviderError>,
    state_error: Option<ProviderError>,
}

/// Mock VM service. Launched instances are `Pending` until waited on.
#[derive(Default)]
pub struct MockVmApi {
    state: Mutex<VmState>,
}

impl MockVmApi {
    /// Create an empty VM service.
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed an instance in `state`.
    pub async fn insert_instance(&self, instance_id: &str, state: InstanceState) {
        self.state
            .lock()
            .await
            .instances
            .insert(instance_id.to_string(), state);
    }

    /// Make launches fail with `error`.
    pub async fn set_launch_error(&self, error: Option<ProviderError>) {
        self.state.lock().await.launch_error = error;
    }

    /// Make state lookups fail with `error`.
    pub async fn set_state_error(&self, error: Option<ProviderError>) {
        self.state.lock().await.state_error = error;
    }

    /// Every call so far.
    pub async fn calls(&self) -> Vec<VmCall> {
        self.state.lock().await.calls.clone()
    }

    /// Launch requests so far.
    pub async fn launches(&self) -> Vec<VmLaunchRequest> {
        self.calls()
            .await
            .into_iter()
            .filter_map(|call| match call {
                VmCall::RunInstance(request) => Some(request),
                _ => None,
            })
            .collect()
    }

    /// Instances terminated so far.
    pub async fn terminated(&self) -> Vec<String> {
        self.calls()
            .await
            .into_iter()
            .filter_map(|call| match call {
                VmCall::Terminate(id) => Some(id),
                _ => None,
            })
            .collect()
    }

    /// Current state of an instance.
    pub async fn instance(&self, instance_id: &str) -> Option<InstanceState> {
        self.state.lock().await.instances.get(instance_id).copied()
    }
}

#[async_trait]
impl VmApi for MockVmApi {
    async fn run_instance(&self, request: &VmLaunchRequest) -> Result<String, ProviderError> {
        let mut state = self.state.lock().await;
        state.calls.push(VmCall::RunInstance(request.clone()));
        if let Some(error) = &state.launch_error {
            return Err(error.clone());
        }
        state.next_id += 1;
        let instance_id = format!("i-{:08x}", state.next_id);
        state
            .instances
            .insert(instance_id.clone(), InstanceState::Pending);
        Ok(instance_id)
    }

    async fn instance_state(
        &self,
        instance_id: &str,
    ) -> Result<Option<InstanceState>, ProviderError> {
        let mut state = self.state.lock().await;
        state.calls.push(VmCall::State(instance_id.to_string()));
        if let Some(error) = &state.state_error {
            return Err(error.clone());
        }
        Ok(state.instances.get(instance_id).copied())
    }

    async fn wait_until_running(&self, instance_id: &str) -> Result<(), ProviderError> {
        let mut state = self.state.lock().await;
        state.calls.push(VmCall::WaitRunning(instance_id.to_string()));
        match state.instances.get_mut(instance_id) {
            Some(instance @ (InstanceState::Pending | InstanceState::Running)) => {
                *instance = InstanceState::Running;
                Ok(())
            }
            Some(other) => Err(ProviderError::new(
                "WaiterFailure",
                format!("instance {instance_id} is {other:?}"),
            )),
            None => Err(ProviderError::new(
                "InvalidInstanceID.NotFound",
                format!("The instance ID '{instance_id}' does not exist"),
            )),
        }
    }

    async fn wait_until_terminated(&self, instance_id: &str) -> Result<(), ProviderError> {
        let mut state = self.state.lock().await;
        state
            .calls
            .push(VmCall::WaitTerminated(instance_id.to_string()));
        if let Some(instance) = state.instances.get_mut(instance_id) {
            *instance = InstanceState::Terminated;
        }
        Ok(())
    }

    async fn terminate_instance(&self, instance_id: &str) -> Result<(), ProviderError> {
        let mut state = self.state.lock().await;
        state.calls.push(VmCall::Terminate(instance_id.to_string()));
        if let Some(instance) = state.instances.get_mut(instance_id)
            && *instance != InstanceState::Terminated
        {
            *instance = InstanceState::ShuttingDown;
        }
        Ok(())
    }
}

/// Mock parameter store, pre-seeded with an image for every known alias.
pub struct MockParameterApi {
    values: Mutex<HashMap<String, String>>,
}

impl Default for MockParameterApi {
    fn default() -> Self {
        Self::new()
    }
}

impl MockParameterApi {
    /// Parameter store where alias `X` resolves to `ami-x` (lower-cased).
    pub fn new() -> Self {
        let values = IMAGE_ALIASES
            .iter()
            .map(|(alias, path)| {
                (
                    path.to_string(),
                    serde_json::json!({
                        "image_id": format!("ami-{}", alias.to_ascii_lowercase()),
                        "image_name": format!("{alias}-recommended"),
                    })
                    .to_string(),
                )
            })
            .collect();
        Self {
            values: Mutex::new(values),
        }
    }

    /// Overwrite a parameter value.
    pub async fn set(&self, name: &str, value: &str) {
        self.values
            .lock()
            .await
            .insert(name.to_string(), value.to_string());
    }
}

#[async_trait]
impl ParameterApi for MockParameterApi {
    async fn get_parameter(&self, name: &str) -> Result<Option<String>, ProviderError> {
        Ok(self.values.lock().await.get(name).cloned())
    }
}
