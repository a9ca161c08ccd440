// src/constants.rs

//! Namespace keys, routine names and exit codes shared across the crate.

/// Namespace key of the `--tb/--traceback` flag.
pub const TRACEBACK_KEY: &str = "traceback";

/// Namespace key written by `-q/--quiet` (stored inverted: quiet sets it to `false`).
pub const FOREGROUND_KEY: &str = "foreground";

/// Namespace key written by `-d/--dry-run` (stored inverted: dry-run sets it to `false`).
pub const EXECUTE_KEY: &str = "execute_commands";

/// Namespace key shared by `-s/--show` and `--no-show`. Absent or null means "decide by dry-run".
pub const SHOW_KEY: &str = "show_commands";

/// Name of the main body routine of a command.
pub const CALL_ROUTINE: &str = "call";

/// Name of the step-producing routine of a process-executing command.
pub const PREPARE_ROUTINE: &str = "prepare";

/// Prefix printed before a shown process formulation.
pub const SHOW_PREFIX: &str = ">";

/// Exit code used for failures reported by the entrypoint.
pub const FAILURE_EXIT_CODE: u8 = 1;
