//! # System Interaction Layer
//!
//! The boundary between command routines and the operating system.
//!
//! ## Modules
//!
//! - **`process`**: inert descriptors of external processes and the `Local`
//!   helper routines build them with.
//! - **`executor`**: the engine that spawns processes under an execution mode,
//!   enforcing exit codes, timeouts and cancellation (`Ctrl+C`).

pub mod executor;
pub mod process;
