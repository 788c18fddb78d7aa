// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Image aliases, boot data and tags for runner VMs.

use std::collections::BTreeMap;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;

use crate::error::{Error, Result};
use crate::model::RunnerRecord;

/// Raw boot script size limit of the VM service.
pub const MAX_USER_DATA_BYTES: usize = 16 * 1024;

/// Image aliases and the managed parameter holding each one's current image.
pub const IMAGE_ALIASES: &[(&str, &str)] = &[
    (
        "AmazonLinux2",
        "/aws/service/ecs/optimized-ami/amazon-linux-2/kernel-5.10/recommended",
    ),
    (
        "AmazonLinux2_arm64",
        "/aws/service/ecs/optimized-ami/amazon-linux-2/kernel-5.10/arm64/recommended",
    ),
    (
        "AmazonLinux2_gpu",
        "/aws/service/ecs/optimized-ami/amazon-linux-2/kernel-5.10/gpu/recommended",
    ),
    (
        "AmazonLinux2_inf",
        "/aws/service/ecs/optimized-ami/amazon-linux-2/kernel-5.10/inf/recommended",
    ),
    (
        "AmazonLinux2023",
        "/aws/service/ecs/optimized-ami/amazon-linux-2023/recommended",
    ),
    (
        "AmazonLinux2023_arm64",
        "/aws/service/ecs/optimized-ami/amazon-linux-2023/arm64/recommended",
    ),
    (
        "AmazonLinux2023_inf",
        "/aws/service/ecs/optimized-ami/amazon-linux-2023/inf/recommended",
    ),
];

/// Prefix of literal image ids, which bypass alias resolution.
pub const IMAGE_ID_PREFIX: &str = "ami-";

/// Parameter path for a known alias.
pub fn alias_parameter(alias: &str) -> Option<&'static str> {
    IMAGE_ALIASES
        .iter()
        .find(|(name, _)| *name == alias)
        .map(|(_, path)| *path)
}

/// Tag marking instances launched for runners.
pub const RESOURCE_TYPE_TAG: &str = "DockhandResourceType";

/// Tags applied to a runner VM.
pub fn instance_tags(record: &RunnerRecord, cluster: &str) -> BTreeMap<String, String> {
    BTreeMap::from([
        (RESOURCE_TYPE_TAG.to_string(), "RunnerInstance".to_string()),
        ("Name".to_string(), record.key.runner.clone()),
        (
            "DockhandDistributionName".to_string(),
            record.distribution.name.clone(),
        ),
        (
            "DockhandEnvironment".to_string(),
            record.distribution.environment.clone(),
        ),
        ("DockhandCluster".to_string(), cluster.to_string()),
    ])
}

/// Boot script configuring the container agent: cluster membership, the
/// routing attribute tasks are placed by, and log shipping.
pub fn agent_boot_script(
    cluster: &str,
    resource_name: &str,
    log_group: &str,
    region: &str,
) -> String {
    let attributes = serde_json::json!({ "runnerResourceName": resource_name });
    let log_options = serde_json::json!({
        "awslogs-group": log_group,
        "awslogs-region": region,
        "awslogs-stream-prefix": resource_name,
    });
    format!(
        "#!/bin/bash\n\
         cat <<'EOF' >> /etc/ecs/ecs.config\n\
         ECS_CLUSTER={cluster}\n\
         ECS_ENABLE_CONTAINER_METADATA=true\n\
         ECS_INSTANCE_ATTRIBUTES={attributes}\n\
         ECS_AVAILABLE_LOGGING_DRIVERS=[\"json-file\",\"awslogs\"]\n\
         ECS_LOG_DRIVER=awslogs\n\
         ECS_LOG_OPTS={log_options}\n\
         EOF\n"
    )
}

/// Base64 boot data, rejected if the raw script is over the service limit.
pub fn encode_user_data(script: &str, runner: &str) -> Result<String> {
    if script.len() > MAX_USER_DATA_BYTES {
        return Err(Error::Configuration(format!(
            "Illegal configuration for runner {runner}, VM boot data is {} bytes, the limit is {MAX_USER_DATA_BYTES}",
            script.len()
        )));
    }
    Ok(STANDARD.encode(script))
}
