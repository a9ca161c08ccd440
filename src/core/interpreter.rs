// src/core/interpreter.rs

//! Drives a command's steps to completion.
//!
//! Static sequences run in order and stop at the first failure. Producers
//! are resumed with each step's outcome, or with its failure so they can
//! branch on exit codes; an interrupt always aborts the loop.

use crate::constants::{EXECUTE_KEY, FOREGROUND_KEY, SHOW_KEY, SHOW_PREFIX};
use crate::core::namespace::Args;
use crate::core::steps::{Outcome, Step, Steps, Strategy};
use crate::core::tree::Command;
use crate::models::{RunOptions, RunResult, Value};
use crate::system::executor::{ExecutionError, ProcessRunner};
use anyhow::Result;
use colored::Colorize;

/// Whether to print a step's formulation: forced by `--show`, forbidden by
/// `--no-show`, and otherwise exactly under dry-run.
pub fn should_show(show: Option<bool>, execute: bool) -> bool {
    show.unwrap_or(!execute)
}

/// The process-control flags as read from a command's arguments.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Flags {
    /// `false` under `--quiet`.
    pub foreground: bool,
    /// `false` under `--dry-run`.
    pub execute: bool,
    /// Set by `--show` or `--no-show`.
    pub show: Option<bool>,
}

impl Default for Flags {
    fn default() -> Self {
        Self {
            foreground: true,
            execute: true,
            show: None,
        }
    }
}

impl Flags {
    /// Reads the flags, falling back to the defaults for absent keys.
    pub fn from_args(args: &Args) -> Self {
        let defaults = Self::default();
        Self {
            foreground: args.flag(FOREGROUND_KEY, defaults.foreground),
            execute: args.flag(EXECUTE_KEY, defaults.execute),
            show: match args.get(SHOW_KEY) {
                Some(Value::Bool(show)) => Some(show),
                _ => None,
            },
        }
    }

    /// Strategy for a step paired with none.
    pub fn default_strategy(&self) -> Strategy {
        if self.foreground {
            Strategy::TEE
        } else {
            Strategy::SHH
        }
    }
}

/// Runs `steps` on behalf of `command`, reading flags from its arguments and
/// layering its routine-level run options over every step's strategy.
pub(crate) fn run(command: Command<'_>, steps: Steps) -> Result<()> {
    let interpreter = Interpreter {
        runner: command.tree().runner(),
        flags: Flags::from_args(&command.args()),
        routine_options: command.run_options(),
    };
    log::debug!(
        "Interpreting steps of '{}' ({:?})",
        command.name(),
        interpreter.flags
    );
    interpreter.drive(steps)
}

struct Interpreter<'a> {
    runner: &'a dyn ProcessRunner,
    flags: Flags,
    routine_options: &'a RunOptions,
}

impl Interpreter<'_> {
    fn drive(&self, mut steps: Steps) -> Result<()> {
        let accepts_failures = steps.accepts_failures();
        let mut prior: Option<Result<Outcome, ExecutionError>> = None;

        loop {
            if self.runner.interrupted() {
                return Err(ExecutionError::Interrupted.into());
            }

            let next = match &mut steps {
                Steps::Empty => None,
                Steps::Sequence(queue) => queue.pop_front(),
                Steps::Producer(producer) => match prior.take() {
                    None => producer.next(None)?,
                    Some(Ok(outcome)) => producer.next(Some(outcome))?,
                    Some(Err(error)) => producer.fail(error)?,
                },
            };
            let Some(step) = next else {
                return Ok(());
            };

            match self.run_step(step) {
                Ok(outcome) => prior = Some(Ok(outcome)),
                Err(ExecutionError::Interrupted) => {
                    return Err(ExecutionError::Interrupted.into());
                }
                Err(error) if accepts_failures => {
                    log::debug!("Injecting failure into producer: {}", error);
                    prior = Some(Err(error));
                }
                Err(error) => return Err(error.into()),
            }
        }
    }

    fn run_step(&self, step: Step) -> Result<Outcome, ExecutionError> {
        let Step { strategy, process } = step;
        let strategy = strategy.unwrap_or_else(|| self.flags.default_strategy());

        if should_show(self.flags.show, self.flags.execute) {
            println!(
                "{} {}",
                SHOW_PREFIX,
                process.to_string().truecolor(0x5F, 0xAF, 0x5F)
            );
        }

        if !self.flags.execute {
            log::debug!("Dry run: not executing '{}'", process);
            return Ok(Outcome::Finished(RunResult::empty()));
        }

        let options = self.routine_options.layered_over(&strategy.options);
        log::debug!(
            "Running '{}' [{}] (retcode: {}, timeout: {:?})",
            process,
            strategy.mode,
            options.effective_retcode(),
            options.timeout
        );
        self.runner.run(&process, strategy.mode, &options)
    }
}
