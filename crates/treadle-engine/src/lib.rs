//! The three moving parts of treadle.
//!
//! ```text
//! ┌──────────────┐  schedule   ┌────────────┐  unit per task  ┌──────────────┐
//! │  Controller  │ ──────────► │ Dispatcher │ ──────────────► │ TaskExecutor │
//! │ (informer +  │   fires     │ (one run)  │                 │ (one task)   │
//! │  work queue) │             └────────────┘                 └──────────────┘
//! └──────────────┘                   │ begin_run                    │ record_task
//!        ▲ watch                     ▼                              ▼
//!        └─────────────────────── ResourceStore ◄───────────────────┘
//! ```
//!
//! - [`Controller`] keeps one recurring schedule per scheduled workflow.
//! - [`Dispatcher`] appends a run to the ledger and launches each task in
//!   order, back-filling failures for units that never reported.
//! - [`TaskExecutor`] runs a single task inside its unit, passing the previous
//!   task's output forward and staging artifacts when enabled.

mod command;
mod controller;
mod dispatcher;
mod error;
mod executor;
mod informer;
mod workqueue;

pub use command::{CommandOutput, CommandRunner};
pub use controller::{Controller, ReconcileAction, Reconciler};
pub use dispatcher::{Dispatcher, RunReport, TaskReport, UnitOutcome};
pub use error::{EngineError, Result};
pub use executor::TaskExecutor;
pub use informer::{Informer, WorkflowCache};
pub use workqueue::{EventKind, RateSettings, WorkQueue};
