// src/core/definition.rs

//! Typed command declarations, from which a [`Tree`](crate::core::tree::Tree) is built.

use crate::constants::{CALL_ROUTINE, PREPARE_ROUTINE};
use crate::core::routine::Routine;
use crate::core::schema::Opt;
use crate::core::steps::Steps;
use crate::models::{RetCode, RunOptions, Value};
use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;
use std::time::Duration;
use thiserror::Error;

/// Errors in how a tree was declared or how a routine was wired.
/// Raised at build or delegation time, before any process runs.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// Two children of one command share a name.
    #[error("command '{parent}' declares more than one subcommand named '{name}'")]
    DuplicateCommand {
        /// The command declaring both.
        parent: String,
        /// The shared, lower-cased name.
        name: String,
    },
    /// Two options of one command share an id, short or long name.
    #[error("command '{command}' declares option '{option}' more than once")]
    DuplicateOption {
        /// The command declaring the options.
        command: String,
        /// The name both claim.
        option: String,
    },
    /// An option reuses a name of a standard flag, an inherited global option or `--help`.
    #[error("command '{command}' declares option '{option}', which is taken by a standard or inherited flag")]
    ReservedOption {
        /// The command declaring the option.
        command: String,
        /// The name already taken.
        option: String,
    },
    /// A routine asks for more context than its command offers.
    #[error("{command}.{routine}() requires too many positional arguments: {}", quote_all(.params))]
    TooManyParameters {
        /// The command owning the routine.
        command: String,
        /// The routine's name.
        routine: String,
        /// Parameters left without a value.
        params: Vec<&'static str>,
    },
    /// No routine of that name is registered.
    #[error("command '{command}' has no routine named '{routine}'")]
    UnknownRoutine {
        /// The command asked.
        command: String,
        /// The missing routine.
        routine: String,
    },
    /// Only root definitions accept registered commands.
    #[error("command '{0}' is not a root and may not register subcommands")]
    NotARoot(String),
    /// Commands need a name.
    #[error("command name must not be empty")]
    EmptyName,
}

fn quote_all(params: &[&'static str]) -> String {
    params
        .iter()
        .map(|param| format!("'{}'", param))
        .collect::<Vec<_>>()
        .join(", ")
}

/// Whether a command's body is a plain routine or a producer of process steps.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Kind {
    /// Runs its body directly.
    Plain,
    /// Process-executing: `call` interprets the steps produced by `prepare`.
    Local,
}

/// Commands registered to a root from outside its own definition.
///
/// A handle is obtained from [`CommandDef::registry`]; clones share the list,
/// so separate modules can each add their commands before the tree is built.
#[derive(Clone, Default)]
pub struct Registry {
    commands: Rc<RefCell<Vec<CommandDef>>>,
}

impl Registry {
    /// Queues `command` to join the root it was obtained from.
    pub fn register(&self, command: CommandDef) -> &Self {
        log::debug!("Registering command '{}'", command.name);
        self.commands.borrow_mut().push(command);
        self
    }

    /// Number of queued commands.
    pub fn len(&self) -> usize {
        self.commands.borrow().len()
    }

    /// Whether nothing was queued.
    pub fn is_empty(&self) -> bool {
        self.commands.borrow().is_empty()
    }

    fn take(&self) -> Vec<CommandDef> {
        std::mem::take(&mut *self.commands.borrow_mut())
    }
}

impl fmt::Debug for Registry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Registry")
            .field("commands", &self.len())
            .finish()
    }
}

/// The declaration of one command and, recursively, its subcommands.
///
/// ```
/// use cmdtree::{CommandDef, Opt, Routine};
///
/// let tool = CommandDef::root("Tool")
///     .about("manage the project")
///     .opt(Opt::store_true("verbose").short('v').long("verbose"))
///     .subcommand(
///         CommandDef::new("Hello")
///             .about("say hello")
///             .run(Routine::args(|_cmd, args| {
///                 println!("hello (verbose: {})", args.flag("verbose", false));
///                 Ok(())
///             })),
///     );
/// assert_eq!(tool.name(), "tool");
/// ```
pub struct CommandDef {
    pub(crate) name: String,
    pub(crate) about: Option<String>,
    pub(crate) kind: Kind,
    pub(crate) options: Vec<Opt>,
    pub(crate) defaults: Vec<(String, Value)>,
    pub(crate) call: Option<Routine<()>>,
    pub(crate) prepare: Option<Routine<Steps>>,
    pub(crate) methods: Vec<(String, Routine<()>)>,
    pub(crate) run_options: RunOptions,
    pub(crate) allow_traceback: bool,
    pub(crate) children: Vec<CommandDef>,
    pub(crate) registry: Option<Registry>,
}

impl CommandDef {
    fn with_kind(name: &str, kind: Kind, root: bool) -> Self {
        Self {
            name: name.to_lowercase(),
            about: None,
            kind,
            options: Vec::new(),
            defaults: Vec::new(),
            call: None,
            prepare: None,
            methods: Vec::new(),
            run_options: RunOptions::new(),
            allow_traceback: true,
            children: Vec::new(),
            registry: root.then(Registry::default),
        }
    }

    /// A plain command. The name is lower-cased.
    pub fn new(name: &str) -> Self {
        Self::with_kind(name, Kind::Plain, false)
    }

    /// A process-executing command.
    pub fn local(name: &str) -> Self {
        Self::with_kind(name, Kind::Local, false)
    }

    /// A plain command accepting externally registered subcommands.
    pub fn root(name: &str) -> Self {
        Self::with_kind(name, Kind::Plain, true)
    }

    /// A process-executing command accepting externally registered subcommands.
    pub fn local_root(name: &str) -> Self {
        Self::with_kind(name, Kind::Local, true)
    }

    /// Lower-cased command name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Plain or process-executing.
    pub fn kind(&self) -> Kind {
        self.kind
    }

    /// Whether commands may be registered to this definition.
    pub fn is_root(&self) -> bool {
        self.registry.is_some()
    }

    /// Description; its first sentence becomes the help line.
    pub fn about(mut self, about: impl Into<String>) -> Self {
        self.about = Some(about.into());
        self
    }

    /// Adds an option to this command's schema.
    pub fn opt(mut self, opt: Opt) -> Self {
        self.options.push(opt);
        self
    }

    /// Default for a key no option exposes.
    pub fn set_default(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.defaults.push((key.into(), value.into()));
        self
    }

    /// The main body. Without one, a plain command prints its usage.
    pub fn run(mut self, routine: Routine<()>) -> Self {
        self.call = Some(routine);
        self
    }

    /// The step-producing routine of a process-executing command.
    pub fn prepare(mut self, routine: Routine<Steps>) -> Self {
        self.prepare = Some(routine);
        self
    }

    /// An additional routine reachable through `delegate(name)`.
    pub fn method(mut self, name: impl Into<String>, routine: Routine<()>) -> Self {
        self.methods.push((name.into(), routine));
        self
    }

    /// Exit codes accepted from every step of this command.
    pub fn retcode(mut self, retcode: impl Into<RetCode>) -> Self {
        self.run_options.retcode = Some(retcode.into());
        self
    }

    /// Maximum wait for every step of this command.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.run_options.timeout = Some(timeout);
        self
    }

    /// Whether the root schema gets the `--tb/--traceback` flag.
    pub fn allow_traceback(mut self, allow: bool) -> Self {
        self.allow_traceback = allow;
        self
    }

    /// A lexically nested subcommand, kept in declaration order.
    pub fn subcommand(mut self, child: Self) -> Self {
        self.children.push(child);
        self
    }

    /// Handle through which other modules add subcommands to this root.
    pub fn registry(&self) -> Result<Registry, ConfigError> {
        self.registry
            .clone()
            .ok_or_else(|| ConfigError::NotARoot(self.name.clone()))
    }

    /// Registers `child` to this root; equivalent to going through [`Self::registry`].
    pub fn register(self, child: Self) -> Result<Self, ConfigError> {
        self.registry()?.register(child);
        Ok(self)
    }

    /// Nested children followed by registered ones. Drains the registry.
    pub(crate) fn take_children(&mut self) -> Vec<Self> {
        let mut children = std::mem::take(&mut self.children);
        if let Some(registry) = &self.registry {
            children.extend(registry.take());
        }
        children
    }

    pub(crate) fn has_local(&self) -> bool {
        self.kind == Kind::Local
            || self.children.iter().any(Self::has_local)
            || self.registry.as_ref().is_some_and(|registry| {
                registry.commands.borrow().iter().any(Self::has_local)
            })
    }

    pub(crate) fn routine_names(&self) -> Vec<&str> {
        let mut names = vec![CALL_ROUTINE];
        if self.kind == Kind::Local {
            names.push(PREPARE_ROUTINE);
        }
        names.extend(self.methods.iter().map(|(name, _)| name.as_str()));
        names
    }
}

impl fmt::Debug for CommandDef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CommandDef")
            .field("name", &self.name)
            .field("kind", &self.kind)
            .field("routines", &self.routine_names())
            .field("children", &self.children)
            .field("registry", &self.registry)
            .finish()
    }
}
