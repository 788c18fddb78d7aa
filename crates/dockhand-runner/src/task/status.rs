// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Scheduler-level task lifecycle.

use super::traits::TaskDescription;

/// Desired statuses meaning the scheduler is taking the task down.
const SHUTDOWN_DESIRED: &[&str] = &["DEACTIVATING", "STOPPING", "DEPROVISIONING", "STOPPED"];
/// Last statuses meaning the task is still coming up.
const STARTING_LAST: &[&str] = &["PROVISIONING", "PENDING", "ACTIVATING"];

/// Coarse lifecycle classification of a task, as seen by the scheduler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskLifecycle {
    /// Unknown to the scheduler, or gone without a trace.
    Dead,
    /// Being placed or provisioned.
    Starting,
    /// Running.
    Running,
    /// Being stopped, or stopped.
    StoppingOrStopped,
}

/// Task status with the scheduler's stop details.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskStatus {
    /// Lifecycle class.
    pub lifecycle: TaskLifecycle,
    /// Last status as reported, if any.
    pub last_status: Option<String>,
    /// Stop code, once stopping.
    pub stop_code: Option<String>,
    /// Stop reason, once stopping.
    pub stop_reason: Option<String>,
}

impl TaskStatus {
    /// Status of a task that does not exist.
    pub fn dead() -> Self {
        Self {
            lifecycle: TaskLifecycle::Dead,
            last_status: None,
            stop_code: None,
            stop_reason: None,
        }
    }

    /// Classify a raw description.
    pub fn classify(description: &TaskDescription) -> Self {
        let last_status = description.last_status.clone().filter(|s| !s.is_empty());
        let desired = description.desired_status.as_str();

        let lifecycle = if desired == "STOPPED"
            && last_status.is_none()
            && description.stop_code.is_none()
            && description.stop_reason.is_none()
        {
            TaskLifecycle::Dead
        } else if SHUTDOWN_DESIRED.contains(&desired) {
            TaskLifecycle::StoppingOrStopped
        } else if last_status.as_deref() == Some("RUNNING") {
            TaskLifecycle::Running
        } else if last_status
            .as_deref()
            .is_none_or(|status| STARTING_LAST.contains(&status))
        {
            TaskLifecycle::Starting
        } else {
            // Desired RUNNING but already winding down (e.g. DEACTIVATING).
            TaskLifecycle::StoppingOrStopped
        };

        Self {
            lifecycle,
            last_status,
            stop_code: description.stop_code.clone(),
            stop_reason: description.stop_reason.clone(),
        }
    }

    /// True while the task is coming up.
    pub fn is_starting(&self) -> bool {
        self.lifecycle == TaskLifecycle::Starting
    }

    /// True once running.
    pub fn is_running(&self) -> bool {
        self.lifecycle == TaskLifecycle::Running
    }

    /// True if running or on its way there.
    pub fn is_running_or_starting(&self) -> bool {
        matches!(
            self.lifecycle,
            TaskLifecycle::Running | TaskLifecycle::Starting
        )
    }

    /// True once stopping or stopped.
    pub fn is_stopping_or_stopped(&self) -> bool {
        self.lifecycle == TaskLifecycle::StoppingOrStopped
    }

    /// True if the task no longer holds any resources.
    pub fn is_fully_stopped(&self) -> bool {
        self.lifecycle == TaskLifecycle::Dead || self.last_status.as_deref() == Some("STOPPED")
    }

    /// True if a new task should be started in place of this one.
    pub fn needs_replacement(&self) -> bool {
        matches!(
            self.lifecycle,
            TaskLifecycle::Dead | TaskLifecycle::StoppingOrStopped
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn describe(desired: &str, last: Option<&str>) -> TaskDescription {
        TaskDescription {
            task_id: "t-1".into(),
            desired_status: desired.into(),
            last_status: last.map(String::from),
            stop_code: None,
            stop_reason: None,
        }
    }

    #[test]
    fn test_classification() {
        let cases = [
            ("RUNNING", Some("PROVISIONING"), TaskLifecycle::Starting),
            ("RUNNING", Some("PENDING"), TaskLifecycle::Starting),
            ("RUNNING", Some("ACTIVATING"), TaskLifecycle::Starting),
            ("RUNNING", None, TaskLifecycle::Starting),
            ("RUNNING", Some("RUNNING"), TaskLifecycle::Running),
            ("STOPPED", Some("RUNNING"), TaskLifecycle::StoppingOrStopped),
            ("STOPPED", Some("STOPPED"), TaskLifecycle::StoppingOrStopped),
            ("DEPROVISIONING", Some("RUNNING"), TaskLifecycle::StoppingOrStopped),
            ("RUNNING", Some("DEACTIVATING"), TaskLifecycle::StoppingOrStopped),
            ("STOPPED", None, TaskLifecycle::Dead),
        ];
        for (desired, last, expected) in cases {
            assert_eq!(
                TaskStatus::classify(&describe(desired, last)).lifecycle,
                expected,
                "desired={desired} last={last:?}"
            );
        }
    }

    #[test]
    fn test_stopped_with_reason_is_not_dead() {
        let mut description = describe("STOPPED", None);
        description.stop_code = Some("TaskFailedToStart".into());
        description.stop_reason = Some("CannotPullContainerError".into());
        let status = TaskStatus::classify(&description);
        assert!(status.is_stopping_or_stopped());
        assert_eq!(status.stop_code.as_deref(), Some("TaskFailedToStart"));
    }

    #[test]
    fn test_fully_stopped() {
        assert!(TaskStatus::dead().is_fully_stopped());
        assert!(TaskStatus::classify(&describe("STOPPED", Some("STOPPED"))).is_fully_stopped());
        assert!(
            !TaskStatus::classify(&describe("STOPPED", Some("DEPROVISIONING"))).is_fully_stopped()
        );
    }
}
