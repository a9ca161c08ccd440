// src/models.rs

//! Plain data shared by the tree, the interpreter and the executor.

use std::fmt;
use std::time::Duration;

// --- NAMESPACE VALUES ---

/// A single value stored in the argument namespace.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum Value {
    /// Explicitly "no value" (e.g. the tri-state `show_commands` before any flag).
    #[default]
    Null,
    /// A flag.
    Bool(bool),
    /// A single option value.
    Str(String),
    /// Values of a repeatable option.
    List(Vec<String>),
}

impl Value {
    /// Whether this is [`Value::Null`].
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// The boolean, if this is one.
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// The string, if this is one.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Str(s) => Some(s),
            _ => None,
        }
    }

    /// The list, if this is one.
    pub fn as_list(&self) -> Option<&[String]> {
        match self {
            Self::List(items) => Some(items),
            _ => None,
        }
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Self::Bool(b)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Self::Str(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Self::Str(s)
    }
}

impl From<Vec<String>> for Value {
    fn from(items: Vec<String>) -> Self {
        Self::List(items)
    }
}

impl<T: Into<Self>> From<Option<T>> for Value {
    fn from(value: Option<T>) -> Self {
        value.map_or(Self::Null, Into::into)
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Null => f.write_str("None"),
            Self::Bool(b) => write!(f, "{}", b),
            Self::Str(s) => f.write_str(s),
            Self::List(items) => write!(f, "[{}]", items.join(", ")),
        }
    }
}

// --- PROCESS RESULTS AND OPTIONS ---

/// The `(code, stdout, stderr)` triple fed back to a step producer.
///
/// Any member may be absent: dry-run yields all three absent, and the
/// foreground strategy does not capture the streams.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct RunResult {
    /// Exit code; absent under dry-run and for processes killed by a signal.
    pub code: Option<i32>,
    /// Captured standard output.
    pub stdout: Option<String>,
    /// Captured standard error.
    pub stderr: Option<String>,
}

impl RunResult {
    /// The all-absent triple used when execution is suppressed.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Whether all three members are absent.
    pub fn is_empty(&self) -> bool {
        self.code.is_none() && self.stdout.is_none() && self.stderr.is_none()
    }

    /// Whether the process exited with code 0.
    pub fn success(&self) -> bool {
        self.code == Some(0)
    }
}

/// Which exit codes count as success.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetCode {
    /// Any exit code is accepted (checking disabled).
    Any,
    /// Only the listed codes are accepted.
    Expect(Vec<i32>),
}

impl RetCode {
    /// Whether `code` counts as success.
    pub fn accepts(&self, code: Option<i32>) -> bool {
        match self {
            Self::Any => true,
            // A process killed by a signal has no code and never matches.
            Self::Expect(codes) => code.is_some_and(|c| codes.contains(&c)),
        }
    }
}

impl Default for RetCode {
    fn default() -> Self {
        Self::Expect(vec![0])
    }
}

impl From<i32> for RetCode {
    fn from(code: i32) -> Self {
        Self::Expect(vec![code])
    }
}

impl From<Vec<i32>> for RetCode {
    fn from(codes: Vec<i32>) -> Self {
        Self::Expect(codes)
    }
}

impl<const N: usize> From<[i32; N]> for RetCode {
    fn from(codes: [i32; N]) -> Self {
        Self::Expect(codes.to_vec())
    }
}

impl fmt::Display for RetCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Any => f.write_str("any"),
            Self::Expect(codes) => {
                let joined: Vec<String> = codes.iter().map(i32::to_string).collect();
                f.write_str(&joined.join("|"))
            }
        }
    }
}

/// The recognized process-invocation options `{retcode, timeout}`.
///
/// Unset fields inherit from the layer below (see [`RunOptions::layered_over`]);
/// a fully unset value means "expect exit code 0, wait forever".
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct RunOptions {
    /// Accepted exit codes.
    pub retcode: Option<RetCode>,
    /// Longest time to wait before the process is killed.
    pub timeout: Option<Duration>,
}

impl RunOptions {
    /// Options with every key unset.
    pub const fn new() -> Self {
        Self {
            retcode: None,
            timeout: None,
        }
    }

    /// Sets the accepted exit codes.
    pub fn retcode(mut self, retcode: impl Into<RetCode>) -> Self {
        self.retcode = Some(retcode.into());
        self
    }

    /// Sets the timeout.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Whether no key is set.
    pub fn is_unset(&self) -> bool {
        self.retcode.is_none() && self.timeout.is_none()
    }

    /// Per key, `self` wins and `base` fills whatever `self` leaves unset.
    pub fn layered_over(&self, base: &Self) -> Self {
        Self {
            retcode: self.retcode.clone().or_else(|| base.retcode.clone()),
            timeout: self.timeout.or(base.timeout),
        }
    }

    /// The accepted codes, `[0]` when unset.
    pub fn effective_retcode(&self) -> RetCode {
        self.retcode.clone().unwrap_or_default()
    }
}
