// src/core/steps.rs

//! Process steps, the strategies they run under, and the producers that yield them.

use crate::models::{RetCode, RunOptions, RunResult};
use crate::system::executor::{BackgroundHandle, ExecutionError};
use crate::system::process::Process;
use anyhow::Result;
use std::collections::VecDeque;
use std::fmt;
use std::time::Duration;

// --- EXECUTION STRATEGIES ---

/// The closed set of ways a single process step can run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    /// Streams both outputs live and blocks until exit; nothing captured.
    Foreground,
    /// Starts the process and returns a handle immediately.
    Background,
    /// Streams both outputs live and also captures them ("tee").
    Tee,
    /// Runs silently, capturing both outputs.
    Suppressed,
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Foreground => "FG",
            Self::Background => "BG",
            Self::Tee => "TEE",
            Self::Suppressed => "SHH",
        };
        f.write_str(label)
    }
}

/// A [`Mode`] with its own `{retcode, timeout}` parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Strategy {
    /// How the process runs.
    pub mode: Mode,
    /// `{retcode, timeout}` for this strategy.
    pub options: RunOptions,
}

impl Strategy {
    /// Foreground.
    pub const FG: Self = Self::new(Mode::Foreground);
    /// Background.
    pub const BG: Self = Self::new(Mode::Background);
    /// Streamed and captured.
    pub const TEE: Self = Self::new(Mode::Tee);
    /// Silent and captured.
    pub const SHH: Self = Self::new(Mode::Suppressed);

    /// `mode` with no options of its own.
    pub const fn new(mode: Mode) -> Self {
        Self {
            mode,
            options: RunOptions::new(),
        }
    }

    /// Sets the accepted exit codes.
    pub fn retcode(mut self, retcode: impl Into<RetCode>) -> Self {
        self.options.retcode = Some(retcode.into());
        self
    }

    /// Sets the timeout.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.options.timeout = Some(timeout);
        self
    }
}

impl From<Mode> for Strategy {
    fn from(mode: Mode) -> Self {
        Self::new(mode)
    }
}

// --- STEPS ---

/// One unit of process work, optionally paired with a strategy.
#[derive(Debug, Clone)]
pub struct Step {
    /// `None` picks the interpreter's default.
    pub strategy: Option<Strategy>,
    /// The process to run.
    pub process: Process,
}

impl Step {
    /// A bare step.
    pub fn new(process: Process) -> Self {
        Self {
            strategy: None,
            process,
        }
    }

    /// A step with its own strategy.
    pub fn with(strategy: impl Into<Strategy>, process: Process) -> Self {
        Self {
            strategy: Some(strategy.into()),
            process,
        }
    }
}

impl From<Process> for Step {
    fn from(process: Process) -> Self {
        Self::new(process)
    }
}

impl<S: Into<Strategy>> From<(S, Process)> for Step {
    fn from((strategy, process): (S, Process)) -> Self {
        Self::with(strategy, process)
    }
}

/// What a finished step hands back to its producer.
#[derive(Debug)]
pub enum Outcome {
    /// The `(code, stdout, stderr)` triple; all absent under dry-run.
    Finished(RunResult),
    /// A handle to a process started in the background.
    Background(BackgroundHandle),
}

impl Outcome {
    /// The triple of a finished step.
    pub fn result(&self) -> Option<&RunResult> {
        match self {
            Self::Finished(result) => Some(result),
            Self::Background(_) => None,
        }
    }

    /// Takes the triple of a finished step.
    pub fn into_result(self) -> Option<RunResult> {
        match self {
            Self::Finished(result) => Some(result),
            Self::Background(_) => None,
        }
    }

    /// Takes the handle of a background step.
    pub fn into_handle(self) -> Option<BackgroundHandle> {
        match self {
            Self::Background(handle) => Some(handle),
            Self::Finished(_) => None,
        }
    }
}

/// What a producer is resumed with.
#[derive(Debug)]
pub enum Resume {
    /// First resumption, or a static step whose result is not fed back.
    Start,
    /// The previous step finished.
    Completed(Outcome),
    /// The previous step failed; the producer decides whether to re-raise.
    Failed(ExecutionError),
}

/// A resumable routine yielding one step per resumption.
///
/// Returning `Ok(None)` ends the sequence. Returning an error aborts the
/// interpreter with that error.
pub trait StepProducer {
    /// Next step, given the previous step's outcome (`None` on the first call).
    fn next(&mut self, prior: Option<Outcome>) -> Result<Option<Step>>;

    /// Next step after the previous one failed. Re-raises by default.
    fn fail(&mut self, error: ExecutionError) -> Result<Option<Step>> {
        Err(error.into())
    }
}

/// Adapts a closure over [`Resume`] into a [`StepProducer`].
pub struct FnProducer<F> {
    f: F,
}

impl<F> StepProducer for FnProducer<F>
where
    F: FnMut(Resume) -> Result<Option<Step>>,
{
    fn next(&mut self, prior: Option<Outcome>) -> Result<Option<Step>> {
        let resume = prior.map_or(Resume::Start, Resume::Completed);
        (self.f)(resume)
    }

    fn fail(&mut self, error: ExecutionError) -> Result<Option<Step>> {
        (self.f)(Resume::Failed(error))
    }
}

/// The output of a `prepare` routine.
pub enum Steps {
    /// Nothing to run.
    Empty,
    /// A fixed sequence; results are not fed back and failures abort it.
    Sequence(VecDeque<Step>),
    /// A resumable producer receiving results and failures.
    Producer(Box<dyn StepProducer>),
}

impl Steps {
    /// Boxes a producer.
    pub fn producer(producer: impl StepProducer + 'static) -> Self {
        Self::Producer(Box::new(producer))
    }

    /// A producer written as a state machine over [`Resume`].
    pub fn from_fn<F>(f: F) -> Self
    where
        F: FnMut(Resume) -> Result<Option<Step>> + 'static,
    {
        Self::producer(FnProducer { f })
    }

    /// Whether there is certainly nothing to run.
    pub fn is_empty(&self) -> bool {
        match self {
            Self::Empty => true,
            Self::Sequence(steps) => steps.is_empty(),
            Self::Producer(_) => false,
        }
    }

    /// Whether failures are injected back rather than aborting.
    pub fn accepts_failures(&self) -> bool {
        matches!(self, Self::Producer(_))
    }
}

impl fmt::Debug for Steps {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Empty => f.write_str("Steps::Empty"),
            Self::Sequence(steps) => f.debug_tuple("Steps::Sequence").field(steps).finish(),
            Self::Producer(_) => f.write_str("Steps::Producer(..)"),
        }
    }
}

impl From<Process> for Steps {
    fn from(process: Process) -> Self {
        Self::Sequence(VecDeque::from([Step::new(process)]))
    }
}

impl From<Step> for Steps {
    fn from(step: Step) -> Self {
        Self::Sequence(VecDeque::from([step]))
    }
}

impl<S: Into<Strategy>> From<(S, Process)> for Steps {
    fn from(pair: (S, Process)) -> Self {
        Self::from(Step::from(pair))
    }
}

impl<T: Into<Step>> From<Vec<T>> for Steps {
    fn from(steps: Vec<T>) -> Self {
        Self::Sequence(steps.into_iter().map(Into::into).collect())
    }
}

impl<T: Into<Self>> From<Option<T>> for Steps {
    fn from(steps: Option<T>) -> Self {
        steps.map_or(Self::Empty, Into::into)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bare_and_paired_steps() {
        let bare = Step::from(Process::new("true"));
        assert!(bare.strategy.is_none());

        let paired = Step::from((Strategy::FG.retcode(RetCode::Any), Process::new("true")));
        let strategy = paired.strategy.unwrap();
        assert_eq!(strategy.mode, Mode::Foreground);
        assert_eq!(strategy.options.retcode, Some(RetCode::Any));
    }

    #[test]
    fn test_steps_conversions() {
        assert!(Steps::from(None::<Process>).is_empty());
        let steps = Steps::from(vec![Process::new("a"), Process::new("b")]);
        match steps {
            Steps::Sequence(seq) => assert_eq!(seq.len(), 2),
            other => panic!("expected a sequence, got {:?}", other),
        }
        assert!(!Steps::from((Mode::Suppressed, Process::new("c"))).accepts_failures());
    }

    #[test]
    fn test_fn_producer_maps_resumptions() {
        let mut seen = Vec::new();
        let mut producer = FnProducer {
            f: |resume: Resume| {
                seen.push(match resume {
                    Resume::Start => "start",
                    Resume::Completed(_) => "completed",
                    Resume::Failed(_) => "failed",
                });
                Ok(None)
            },
        };
        producer.next(None).unwrap();
        producer
            .next(Some(Outcome::Finished(RunResult::empty())))
            .unwrap();
        producer.fail(ExecutionError::EmptyCommand).unwrap();
        drop(producer);
        assert_eq!(seen, vec!["start", "completed", "failed"]);
    }

    #[test]
    fn test_default_fail_reraises() {
        struct Naive;
        impl StepProducer for Naive {
            fn next(&mut self, _prior: Option<Outcome>) -> Result<Option<Step>> {
                Ok(None)
            }
        }
        let err = Naive.fail(ExecutionError::EmptyCommand).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<ExecutionError>(),
            Some(ExecutionError::EmptyCommand)
        ));
    }
}
