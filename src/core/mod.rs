// src/core/mod.rs

//! # Command Tree Core
//!
//! - **`definition`**: typed command declarations and root registries.
//! - **`schema`**: one command's options, bridged onto clap's builder API.
//! - **`namespace`**: the shared argument record and per-command views of it.
//! - **`tree`**: the immutable command graph built from a definition.
//! - **`navigator`**: path lookups between commands of a tree.
//! - **`routine`**: matching a routine's declared context against what is available.
//! - **`steps`** and **`interpreter`**: process steps and the loop that runs them.

pub mod definition;
pub mod interpreter;
pub mod namespace;
pub mod navigator;
pub mod routine;
pub mod schema;
pub mod steps;
pub mod tree;
