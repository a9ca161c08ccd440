//! # cmdtree
//!
//! Declare multi-level command-line tools (`tool build`, `tool deploy`,
//! `tool build sub`) as trees of command definitions that share one argument
//! namespace, and let command bodies describe sequences of external processes
//! instead of spawning them directly.
//!
//! - **`core`**: definitions, the built command tree, navigation, delegation,
//!   and the step interpreter.
//! - **`system`**: process descriptors and the engine that actually runs them.
//! - **`cli`**: the entrypoint boundary (exit codes, error reporting, interrupts).

include!(concat!(env!("OUT_DIR"), "/translations.rs"));

use std::sync::Arc;
use std::sync::atomic::AtomicBool;

/// Shared flag raised on user interrupt; polled by the process executor.
pub type CancellationToken = Arc<AtomicBool>;

pub mod cli;
pub mod constants;
pub mod core;
pub mod models;
pub mod system;

pub use crate::cli::{main, main_from};
pub use crate::core::definition::{CommandDef, ConfigError, Kind, Registry};
pub use crate::core::namespace::{Args, Namespace};
pub use crate::core::navigator::{IntoPath, LookupError, Segment};
pub use crate::core::routine::Routine;
pub use crate::core::schema::{Opt, Schema};
pub use crate::core::steps::{Mode, Outcome, Resume, Step, StepProducer, Steps, Strategy};
pub use crate::core::tree::{Command, Tree};
pub use crate::models::{RetCode, RunOptions, RunResult, Value};
pub use crate::system::executor::{BackgroundHandle, ExecutionError, LocalRunner, ProcessRunner};
pub use crate::system::process::{Local, Process};
