// src/cli/mod.rs

//! Entrypoint boundary: builds the tree, parses the command line, runs the
//! selected command and turns the outcome into an exit status.

use crate::CancellationToken;
use crate::constants::{FAILURE_EXIT_CODE, TRACEBACK_KEY};
use crate::core::definition::{CommandDef, ConfigError};
use crate::core::namespace::Namespace;
use crate::core::navigator::LookupError;
use crate::core::tree::Tree;
use crate::system::executor::{ExecutionError, LocalRunner};
use colored::Colorize;
use signal_hook::consts::SIGINT;
use std::ffi::OsString;
use std::process::ExitCode;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// Runs the tool described by `definition` against the process arguments.
///
/// ```no_run
/// use cmdtree::{CommandDef, Routine};
/// use std::process::ExitCode;
///
/// fn main() -> ExitCode {
///     cmdtree::main(CommandDef::new("hello").run(Routine::nullary(|_| {
///         println!("hello");
///         Ok(())
///     })))
/// }
/// ```
pub fn main(definition: CommandDef) -> ExitCode {
    main_from(definition, std::env::args_os().skip(1))
}

/// Like [`main`], with explicit arguments (program name excluded).
///
/// Exits 0 on success and on user interrupt, 1 on any failure, and with
/// clap's own status on usage errors and `--help`.
pub fn main_from<I, T>(definition: CommandDef, argv: I) -> ExitCode
where
    I: IntoIterator<Item = T>,
    T: Into<OsString> + Clone,
{
    let token: CancellationToken = Arc::new(AtomicBool::new(false));
    if let Err(e) = signal_hook::flag::register(SIGINT, Arc::clone(&token)) {
        log::warn!("Could not install the interrupt handler: {}", e);
    }

    let tree = match Tree::build(definition) {
        Ok(tree) => tree.with_runner(LocalRunner::new(Arc::clone(&token))),
        Err(e) => {
            // Nothing was parsed yet, so there is no --traceback to consult.
            eprintln!("{:?}", anyhow::Error::from(e));
            return ExitCode::from(FAILURE_EXIT_CODE);
        }
    };

    let command = match tree.parse(argv) {
        Ok(command) => command,
        Err(e) => {
            e.print().ok();
            return ExitCode::from(u8::try_from(e.exit_code()).unwrap_or(FAILURE_EXIT_CODE));
        }
    };

    let outcome = command.call();
    let interrupted = token.load(Ordering::SeqCst);
    match outcome {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => report(&err, interrupted, wants_traceback(tree.namespace())),
    }
}

/// Full failure detail is printed under `--tb`, and always when the tool
/// offers no such flag.
fn wants_traceback(namespace: &Namespace) -> bool {
    namespace
        .get(TRACEBACK_KEY)
        .and_then(|value| value.as_bool())
        .unwrap_or(true)
}

fn report(err: &anyhow::Error, interrupted: bool, traceback: bool) -> ExitCode {
    if interrupted || is_interrupt(err) {
        println!("{}", t!("cli.interrupted"));
        return ExitCode::SUCCESS;
    }

    if traceback {
        eprintln!("{:?}", err);
    } else {
        println!(
            "{} {}",
            format!("[{}]", error_label(err)).yellow(),
            format!("{:#}", err).red()
        );
    }
    ExitCode::from(FAILURE_EXIT_CODE)
}

fn is_interrupt(err: &anyhow::Error) -> bool {
    matches!(
        err.downcast_ref::<ExecutionError>(),
        Some(ExecutionError::Interrupted)
    )
}

/// The bracketed label printed before a short failure message.
pub fn error_label(err: &anyhow::Error) -> &'static str {
    if let Some(execution) = err.downcast_ref::<ExecutionError>() {
        return execution.label();
    }
    if err.is::<ConfigError>() {
        "ConfigError"
    } else if err.is::<LookupError>() {
        "LookupError"
    } else {
        "Error"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::routine::Routine;
    use anyhow::anyhow;

    fn failing() -> CommandDef {
        CommandDef::new("tool").run(Routine::nullary(|_| Err(anyhow!("boom"))))
    }

    #[test]
    fn test_success_exits_zero() {
        let def = CommandDef::new("tool").run(Routine::nullary(|_| Ok(())));
        assert_eq!(main_from(def, Vec::<String>::new()), ExitCode::SUCCESS);
    }

    #[test]
    fn test_failures_exit_one_with_or_without_traceback() {
        assert_eq!(
            main_from(failing(), Vec::<String>::new()),
            ExitCode::from(FAILURE_EXIT_CODE)
        );
        assert_eq!(
            main_from(failing(), ["--tb"]),
            ExitCode::from(FAILURE_EXIT_CODE)
        );
    }

    #[test]
    fn test_interrupt_is_not_a_failure() {
        let def = CommandDef::new("tool")
            .run(Routine::nullary(|_| Err(ExecutionError::Interrupted.into())));
        assert_eq!(main_from(def, Vec::<String>::new()), ExitCode::SUCCESS);
    }

    #[test]
    fn test_usage_errors_use_clap_status() {
        assert_eq!(main_from(failing(), ["--bogus"]), ExitCode::from(2));
        assert_eq!(main_from(failing(), ["--help"]), ExitCode::SUCCESS);
    }

    #[test]
    fn test_build_errors_exit_one() {
        let def = CommandDef::root("tool")
            .subcommand(CommandDef::new("a"))
            .subcommand(CommandDef::new("A"));
        assert_eq!(
            main_from(def, Vec::<String>::new()),
            ExitCode::from(FAILURE_EXIT_CODE)
        );
    }

    #[test]
    fn test_traceback_follows_the_flag_or_its_absence() {
        let tree = Tree::build(failing()).unwrap();
        tree.parse(Vec::<String>::new()).unwrap();
        assert!(!wants_traceback(tree.namespace()));
        tree.parse(["--traceback"]).unwrap();
        assert!(wants_traceback(tree.namespace()));

        let opted_out = Tree::build(failing().allow_traceback(false)).unwrap();
        opted_out.parse(Vec::<String>::new()).unwrap();
        assert!(wants_traceback(opted_out.namespace()));
        assert_eq!(
            main_from(failing().allow_traceback(false), Vec::<String>::new()),
            ExitCode::from(FAILURE_EXIT_CODE)
        );
    }

    #[test]
    fn test_error_labels() {
        assert_eq!(error_label(&anyhow!("plain")), "Error");
        assert_eq!(
            error_label(&ConfigError::EmptyName.into()),
            "ConfigError"
        );
        assert_eq!(
            error_label(&LookupError::InvalidIndex(3).into()),
            "LookupError"
        );
        let wrapped = anyhow::Error::from(ExecutionError::EmptyCommand).context("while building");
        assert_eq!(error_label(&wrapped), "EmptyCommand");
    }
}
