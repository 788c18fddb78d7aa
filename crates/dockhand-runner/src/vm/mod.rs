// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Runner VM management.
//!
//! A runner may be backed by its own VM, which joins the task's cluster and
//! advertises a `runnerResourceName` attribute so the runner's task can be
//! pinned to it. [`VmManager`] resolves the image, launches and tears down
//! the instance, and waits for it to become usable.

pub mod bootstrap;
mod mock;
mod traits;

pub use mock::{MockParameterApi, MockVmApi, VmCall};
pub use traits::{InstanceState, ParameterApi, VmApi, VmLaunchRequest};

use std::sync::Arc;

use serde::Deserialize;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::error::{Error, Result};
use crate::model::RunnerRecord;
use crate::task::ContainerApi;

/// Lookup errors meaning the instance does not exist.
pub const INSTANCE_NOT_FOUND_CODES: &[&str] =
    &["InvalidInstanceID.NotFound", "InvalidInstanceID.Malformed"];

/// Root volume size of runner VMs.
pub const ROOT_VOLUME_GIB: u32 = 50;

#[derive(Deserialize)]
struct ImageParameter {
    image_id: String,
}

/// Launches and inspects runner VMs.
pub struct VmManager {
    api: Arc<dyn VmApi>,
    parameters: Arc<dyn ParameterApi>,
    containers: Arc<dyn ContainerApi>,
    config: Arc<Config>,
}

impl VmManager {
    /// Create a VM manager. `containers` is used to check cluster registration.
    pub fn new(
        api: Arc<dyn VmApi>,
        parameters: Arc<dyn ParameterApi>,
        containers: Arc<dyn ContainerApi>,
        config: Arc<Config>,
    ) -> Self {
        Self {
            api,
            parameters,
            containers,
            config,
        }
    }

    /// Resolve an image alias to a concrete image id. Literal ids pass through.
    pub async fn resolve_image_id(&self, image: &str) -> Result<String> {
        if image.starts_with(bootstrap::IMAGE_ID_PREFIX) {
            return Ok(image.to_string());
        }
        let Some(parameter) = bootstrap::alias_parameter(image) else {
            let known: Vec<&str> = bootstrap::IMAGE_ALIASES.iter().map(|(a, _)| *a).collect();
            return Err(Error::Configuration(format!(
                "Unknown image alias {image}, use an image id or one of {}",
                known.join(", ")
            )));
        };

        let value = self
            .parameters
            .get_parameter(parameter)
            .await
            .map_err(|e| Error::VmStartFailed(format!("image lookup for {image} failed: {e}")))?
            .ok_or_else(|| {
                Error::VmStartFailed(format!("image parameter {parameter} does not exist"))
            })?;

        let parsed: ImageParameter = serde_json::from_str(&value).map_err(|e| {
            Error::VmStartFailed(format!("image parameter {parameter} is malformed: {e}"))
        })?;
        debug!(alias = %image, image_id = %parsed.image_id, "Image alias resolved");
        Ok(parsed.image_id)
    }

    /// Launch request for `record`'s VM.
    pub async fn launch_request(&self, record: &RunnerRecord) -> Result<VmLaunchRequest> {
        let Some(vm) = &record.vm else {
            return Err(Error::Other(format!(
                "runner {} has no VM configuration",
                record.key
            )));
        };
        let task = &record.task_configuration;
        let cluster = self.config.cluster_or_default(task.cluster.as_deref());
        let resource_name = record.key.resource_name();

        let script = bootstrap::agent_boot_script(
            cluster,
            &resource_name,
            &vm.config.log_group,
            &self.config.region,
        );

        Ok(VmLaunchRequest {
            image_id: self.resolve_image_id(vm.config.image_or_default()).await?,
            instance_type: vm.config.instance_type.clone(),
            instance_profile: vm.config.instance_profile.clone(),
            // Subnets are a sorted set, so the choice is deterministic.
            subnet_id: task
                .network
                .subnets
                .iter()
                .next()
                .cloned()
                .ok_or_else(|| Error::Configuration(format!("runner {} has no subnets", record.key)))?,
            security_groups: task.network.security_groups.iter().cloned().collect(),
            user_data: bootstrap::encode_user_data(&script, &record.key.runner)?,
            tags: bootstrap::instance_tags(record, cluster),
            root_volume_gib: ROOT_VOLUME_GIB,
            root_volume_type: "gp3".to_string(),
        })
    }

    /// Launch one VM for `record` and return its instance id.
    pub async fn start(&self, record: &RunnerRecord) -> Result<String> {
        let request = self.launch_request(record).await?;
        let instance_id = self
            .api
            .run_instance(&request)
            .await
            .map_err(|e| Error::VmStartFailed(e.to_string()))?;
        info!(
            runner = %record.key,
            instance_id = %instance_id,
            instance_type = %request.instance_type,
            image_id = %request.image_id,
            "Runner VM launched"
        );
        Ok(instance_id)
    }

    /// Whether the instance is running. Lookup errors count as "not running".
    pub async fn is_running(&self, instance_id: &str) -> bool {
        match self.api.instance_state(instance_id).await {
            Ok(state) => state == Some(InstanceState::Running),
            Err(err) if err.is_any_of(INSTANCE_NOT_FOUND_CODES) => {
                debug!(instance_id = %instance_id, "Runner VM not found");
                false
            }
            Err(err) => {
                warn!(
                    instance_id = %instance_id,
                    error = %err,
                    "Runner VM lookup failed, treating it as not running"
                );
                false
            }
        }
    }

    /// Block until the instance is running and registered with `cluster`.
    ///
    /// If it never registers, the instance is terminated before failing.
    pub async fn wait_until_running(
        &self,
        instance_id: &str,
        cluster: &str,
        log_group: &str,
    ) -> Result<()> {
        self.api
            .wait_until_running(instance_id)
            .await
            .map_err(|e| Error::VmStartFailed(format!("instance {instance_id}: {e}")))?;

        let schedule = self.config.vm_registration;
        for attempt in 1..=schedule.attempts {
            match self
                .containers
                .is_instance_registered(cluster, instance_id)
                .await
            {
                Ok(true) => {
                    info!(instance_id = %instance_id, cluster = %cluster, attempt, "Runner VM registered with cluster");
                    return Ok(());
                }
                Ok(false) => {}
                Err(err) => {
                    debug!(instance_id = %instance_id, error = %err, "Registration check failed")
                }
            }
            tokio::time::sleep(schedule.interval).await;
        }

        warn!(
            instance_id = %instance_id,
            cluster = %cluster,
            "Runner VM never registered with the cluster, terminating it"
        );
        if let Err(err) = self.terminate(instance_id).await {
            warn!(instance_id = %instance_id, error = %err, "Failed to terminate unregistered VM");
        }
        Err(Error::VmStartFailed(format!(
            "instance {instance_id} did not register with cluster {cluster} within {}s, \
             check log group {log_group} in {}",
            schedule.ceiling().as_secs(),
            self.config.region
        )))
    }

    /// Block until the instance is terminated.
    pub async fn wait_until_terminated(&self, instance_id: &str) -> Result<()> {
        self.api.wait_until_terminated(instance_id).await?;
        Ok(())
    }

    /// Request termination.
    pub async fn terminate(&self, instance_id: &str) -> Result<()> {
        info!(instance_id = %instance_id, "Terminating runner VM");
        self.api.terminate_instance(instance_id).await?;
        Ok(())
    }
}
