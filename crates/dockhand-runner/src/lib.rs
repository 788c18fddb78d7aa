// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Dockhand Runner - Runner Lifecycle Orchestration
//!
//! This crate drives the lifecycle of long-lived job runners for the dockhand
//! deployment control plane. A workflow step that needs a job executed on a
//! named runner invokes the orchestrator, which enqueues the job, makes sure
//! a worker with the desired configuration is running, and waits for that
//! worker to report ready.
//!
//! # Architecture
//!
//! ```text
//! ┌───────────────────────────────────────────────────────────────────────┐
//! │                    Workflow engine (parked step)                      │
//! └───────────────────────────────────────────────────────────────────────┘
//!        │ RunnerInvocation                          ▲ send_failure
//!        ▼                                           │
//! ┌───────────────────────────────────────────────────────────────────────┐
//! │                   dockhand-runner (This Crate)                        │
//! │  ┌─────────────┐  ┌─────────────┐  ┌─────────────┐  ┌─────────────┐   │
//! │  │  Job Queue  │  │ VM Manager  │  │Task Manager │  │Runner Store │   │
//! │  │ (dedup/fifo)│  │(launch/term)│  │(start/stop) │  │(locks/state)│   │
//! │  └─────────────┘  └─────────────┘  └─────────────┘  └─────────────┘   │
//! └───────────────────────────────────────────────────────────────────────┘
//!        │                  │                 │                 │
//!        ▼                  ▼                 ▼                 ▼
//!   job_messages        VM service     container scheduler   runner_records
//!                                             │
//!                                             ▼
//!                                   ┌───────────────────┐
//!                                   │  Worker (task)    │── mark_ready ──► record
//!                                   └───────────────────┘
//! ```
//!
//! # Invocation Flow
//!
//! | Step | Action |
//! |------|--------|
//! | 1 | Load the runner record, capture configuration drift |
//! | 2 | Enqueue the job (deduplicated per execution and step), save the record |
//! | 3 | If a VM is configured: take the `vm_start` lock, launch, replace or reuse the VM |
//! | 4 | Take the `task_start` lock, start, replace or keep the task |
//! | 5 | After a fresh start: wait until the worker reports ready |
//!
//! Failures are reported to the parked step with an error kind:
//!
//! | Error kind | Cause |
//! |------------|-------|
//! | `RunnerConfigError` | Invalid runner configuration |
//! | `VmFailedToStart` | VM launch failed or it never registered with the cluster |
//! | `TaskFailedToStart` | Task launch failed or it never reached running |
//! | stop code or `TaskStopped` | Task stopped before the worker was ready |
//! | `RunnerReadinessTimeout` | Worker never reported ready |
//! | `RunnerError` | Store, queue or provider outage |
//!
//! # Configuration
//!
//! See [`config::Config::from_env`]. All variables use the `DOCKHAND_` prefix.
//!
//! # Database
//!
//! The PostgreSQL store and job queue share one pool. Apply
//! [`migrations::run`] (or the `dockhand-migrate` binary) before use.

#![deny(missing_docs)]

/// Workflow callback reporting failures to the parked step.
pub mod callback;

/// Orchestrator configuration.
pub mod config;

/// Error types.
pub mod error;

/// Orchestrator input event.
pub mod invocation;

/// Database migrations.
pub mod migrations;

/// Runner records and desired configuration.
pub mod model;

/// The orchestrator state machine.
pub mod orchestrator;

/// Job queue.
pub mod queue;

/// Runner record persistence and locks.
pub mod store;

/// Container task management.
pub mod task;

/// Runner VM management.
pub mod vm;

pub use config::Config;
pub use error::{Error, Result};
pub use orchestrator::{Outcome, RunnerOrchestrator};
