// src/system/process.rs

//! External process descriptors and the helper routines build them with.

use crate::system::executor::ExecutionError;
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};

/// Describes one external process: what to run and in which environment.
///
/// A `Process` is inert; it is run by a
/// [`ProcessRunner`](crate::system::executor::ProcessRunner) under an
/// execution strategy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Process {
    program: String,
    args: Vec<String>,
    env: BTreeMap<String, String>,
    cwd: Option<PathBuf>,
    stdin: Option<String>,
}

impl Process {
    /// A process running `program` with no arguments.
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            env: BTreeMap::new(),
            cwd: None,
            stdin: None,
        }
    }

    /// Splits `line` into words with shell quoting rules.
    ///
    /// # Errors
    ///
    /// `CommandParse` on unbalanced quotes, `EmptyCommand` on a blank line.
    pub fn parse(line: &str) -> Result<Self, ExecutionError> {
        let words = shlex::split(line.trim())
            .ok_or_else(|| ExecutionError::CommandParse(line.to_string()))?;
        let mut words = words.into_iter();
        let program = words.next().ok_or(ExecutionError::EmptyCommand)?;
        Ok(Self::new(program).args(words))
    }

    /// Appends one argument.
    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Appends several arguments.
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Sets an environment variable.
    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    /// Sets the working directory.
    pub fn current_dir(mut self, dir: impl AsRef<Path>) -> Self {
        self.cwd = Some(dunce::simplified(dir.as_ref()).to_path_buf());
        self
    }

    /// Text written to the process's standard input.
    pub fn stdin(mut self, input: impl Into<String>) -> Self {
        self.stdin = Some(input.into());
        self
    }

    /// The program to run.
    pub fn program(&self) -> &str {
        &self.program
    }

    /// Arguments after the program.
    pub fn get_args(&self) -> &[String] {
        &self.args
    }

    /// Variables set on top of the inherited environment.
    pub fn get_env(&self) -> &BTreeMap<String, String> {
        &self.env
    }

    /// The working directory, if set.
    pub fn get_current_dir(&self) -> Option<&Path> {
        self.cwd.as_deref()
    }

    /// Input written to the process.
    pub fn get_stdin(&self) -> Option<&str> {
        self.stdin.as_deref()
    }

    /// The argument vector: program followed by its arguments.
    pub fn formulate(&self) -> Vec<String> {
        std::iter::once(self.program.clone())
            .chain(self.args.iter().cloned())
            .collect()
    }
}

/// Shell-quoted formulation, suitable for display.
impl fmt::Display for Process {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let words = self.formulate();
        match shlex::try_join(words.iter().map(String::as_str)) {
            Ok(line) => f.write_str(&line),
            // Words with NUL bytes cannot be quoted.
            Err(_) => f.write_str(&words.join(" ")),
        }
    }
}

/// Helper handed to process-executing routines for building [`Process`]es.
///
/// Every process it creates inherits its working directory and environment.
#[derive(Debug, Clone, Default)]
pub struct Local {
    cwd: Option<PathBuf>,
    env: BTreeMap<String, String>,
}

impl Local {
    /// A helper using the current directory and environment.
    pub fn new() -> Self {
        Self::default()
    }

    /// Runs every process it builds in `dir`.
    pub fn with_cwd(mut self, dir: impl AsRef<Path>) -> Self {
        self.cwd = Some(dunce::simplified(dir.as_ref()).to_path_buf());
        self
    }

    /// Sets a variable on every process it builds.
    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    /// The working directory, if set.
    pub fn cwd(&self) -> Option<&Path> {
        self.cwd.as_deref()
    }

    fn adopt(&self, mut process: Process) -> Process {
        if process.cwd.is_none() {
            process.cwd.clone_from(&self.cwd);
        }
        for (key, value) in &self.env {
            process
                .env
                .entry(key.clone())
                .or_insert_with(|| value.clone());
        }
        process
    }

    /// A process running `program`.
    pub fn cmd(&self, program: impl Into<String>) -> Process {
        self.adopt(Process::new(program))
    }

    /// A process from a shell-like command line.
    ///
    /// # Errors
    ///
    /// See [`Process::parse`].
    pub fn parse(&self, line: &str) -> Result<Process, ExecutionError> {
        Process::parse(line).map(|process| self.adopt(process))
    }
}
