// src/core/tree.rs

//! The immutable command tree and the handle used to address its nodes.

use crate::constants::{
    CALL_ROUTINE, EXECUTE_KEY, FOREGROUND_KEY, PREPARE_ROUTINE, SHOW_KEY, TRACEBACK_KEY,
};
use crate::core::definition::{CommandDef, ConfigError, Kind};
use crate::core::interpreter;
use crate::core::namespace::{Args, Namespace};
use crate::core::routine::{Context, Routine};
use crate::core::schema::{self, Opt, Schema};
use crate::core::steps::Steps;
use crate::models::{RunOptions, Value};
use crate::system::executor::{LocalRunner, ProcessRunner};
use crate::system::process::Local;
use anyhow::Result;
use std::cell::OnceCell;
use std::collections::HashMap;
use std::ffi::OsString;
use std::fmt;

const ROOT: usize = 0;

// --- NODES ---

#[derive(Debug)]
struct Node {
    name: String,
    kind: Kind,
    schema: Schema,
    /// Declaration order.
    children: Vec<usize>,
    child_ids: HashMap<String, usize>,
    /// Nearest parent first; empty for the root.
    ancestors: Vec<usize>,
    call: Option<Routine<()>>,
    prepare: Option<Routine<Steps>>,
    methods: HashMap<String, Routine<()>>,
    run_options: RunOptions,
    delegate_view: OnceCell<Args>,
}

/// An immutable command tree built from a [`CommandDef`].
///
/// Every node shares one [`Namespace`]. Nodes are addressed through the
/// lightweight [`Command`] handle.
pub struct Tree {
    nodes: Vec<Node>,
    namespace: Namespace,
    local: Local,
    runner: Box<dyn ProcessRunner>,
}

impl Tree {
    /// Builds the tree, attaching the standard flags to the root schema.
    ///
    /// # Errors
    ///
    /// Fails on sibling commands sharing a name, on an option declared twice
    /// within one command, and on empty command names.
    pub fn build(mut root: CommandDef) -> Result<Self, ConfigError> {
        let mut standard = Vec::new();
        if root.allow_traceback {
            standard.push(
                Opt::store_true(TRACEBACK_KEY)
                    .long("tb")
                    .alias("traceback")
                    .help(t!("flag.traceback")),
            );
        }
        if root.has_local() {
            standard.extend(process_flags());
        }

        let options = std::mem::take(&mut root.options);
        let defaults = std::mem::take(&mut root.defaults);
        if let Some(option) = schema::clashing_name(&options, &standard) {
            return Err(ConfigError::ReservedOption {
                command: root.name,
                option,
            });
        }
        let mut schema = Schema::new(root.name.clone(), root.about.clone());
        extend_schema(&mut schema, standard.into_iter().chain(options), defaults);

        let mut tree = Self {
            nodes: Vec::new(),
            namespace: Namespace::new(),
            local: Local::new(),
            runner: Box::new(LocalRunner::default()),
        };
        tree.add_node(root, schema, Vec::new(), &[])?;
        log::debug!("Built command tree with {} node(s)", tree.nodes.len());
        Ok(tree)
    }

    /// Replaces the engine that runs process steps.
    pub fn with_runner(mut self, runner: impl ProcessRunner + 'static) -> Self {
        self.runner = Box::new(runner);
        self
    }

    /// Replaces the helper handed to process-executing routines.
    pub fn with_local(mut self, local: Local) -> Self {
        self.local = local;
        self
    }

    fn add_node(
        &mut self,
        mut def: CommandDef,
        schema: Schema,
        ancestors: Vec<usize>,
        inherited: &[Opt],
    ) -> Result<usize, ConfigError> {
        if def.name.is_empty() {
            return Err(ConfigError::EmptyName);
        }
        if let Some(option) = schema.duplicate_option() {
            return Err(ConfigError::DuplicateOption {
                command: def.name.clone(),
                option,
            });
        }
        // Global options reach every descendant, so clap sees them there too.
        let mut in_scope = inherited.to_vec();
        in_scope.extend(schema.options().iter().filter(|opt| opt.is_global()).cloned());

        let id = self.nodes.len();
        let children = def.take_children();
        let mut methods = HashMap::new();
        for (name, routine) in def.methods {
            methods.insert(name, routine);
        }
        self.nodes.push(Node {
            name: def.name.clone(),
            kind: def.kind,
            schema,
            children: Vec::new(),
            child_ids: HashMap::new(),
            ancestors: ancestors.clone(),
            call: def.call,
            prepare: def.prepare,
            methods,
            run_options: def.run_options,
            delegate_view: OnceCell::new(),
        });

        let mut child_chain = Vec::with_capacity(ancestors.len() + 1);
        child_chain.push(id);
        child_chain.extend(ancestors);

        for mut child in children {
            if self.node(id).child_ids.contains_key(&child.name) {
                return Err(ConfigError::DuplicateCommand {
                    parent: def.name,
                    name: child.name,
                });
            }
            let options = std::mem::take(&mut child.options);
            let defaults = std::mem::take(&mut child.defaults);
            if let Some(option) = schema::clashing_name(&options, &in_scope) {
                return Err(ConfigError::ReservedOption {
                    command: child.name,
                    option,
                });
            }
            let mut child_schema = Schema::new(child.name.clone(), child.about.clone());
            extend_schema(&mut child_schema, options, defaults);

            let name = child.name.clone();
            let child_id = self.add_node(child, child_schema, child_chain.clone(), &in_scope)?;
            let node = self.node_mut(id);
            node.children.push(child_id);
            node.child_ids.insert(name, child_id);
        }
        Ok(id)
    }

    fn node(&self, id: usize) -> &Node {
        self.nodes.get(id).expect("node ids are only minted by the builder")
    }

    fn node_mut(&mut self, id: usize) -> &mut Node {
        self.nodes
            .get_mut(id)
            .expect("node ids are only minted by the builder")
    }

    /// The root command.
    pub fn root(&self) -> Command<'_> {
        Command {
            tree: self,
            id: ROOT,
        }
    }

    /// The argument record every node shares.
    pub fn namespace(&self) -> &Namespace {
        &self.namespace
    }

    /// Helper passed to process-executing routines.
    pub fn local(&self) -> &Local {
        &self.local
    }

    pub(crate) fn runner(&self) -> &dyn ProcessRunner {
        self.runner.as_ref()
    }

    /// Number of commands.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Always `false` for a built tree.
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// The command selected by the last [`Tree::parse`], if any.
    pub fn invoked(&self) -> Option<Command<'_>> {
        self.namespace
            .command()
            .map(|id| Command { tree: self, id })
    }

    fn clap_command(&self, id: usize) -> clap::Command {
        let node = self.node(id);
        let mut command = node.schema.to_clap();
        for child in &node.children {
            command = command.subcommand(self.clap_command(*child));
        }
        command
    }

    /// Parses `argv` (without the program name) into the shared namespace and
    /// returns the command it selects: the deepest subcommand named.
    ///
    /// Each level writes only the keys its own schema declares; explicit values
    /// overwrite and defaults fill keys not set yet.
    pub fn parse<I, T>(&self, argv: I) -> Result<Command<'_>, clap::Error>
    where
        I: IntoIterator<Item = T>,
        T: Into<OsString> + Clone,
    {
        let matches = self
            .clap_command(ROOT)
            .no_binary_name(true)
            .try_get_matches_from(argv)?;

        let mut id = ROOT;
        let mut level = &matches;
        loop {
            self.node(id).schema.apply(level, &self.namespace);
            let Some((name, sub_matches)) = level.subcommand() else {
                break;
            };
            match self.node(id).child_ids.get(name) {
                Some(child) => {
                    id = *child;
                    level = sub_matches;
                }
                None => break,
            }
        }

        self.namespace.set_command(id);
        let command = Command { tree: self, id };
        log::debug!("Parsed invocation of '{}'", command.path().join(" "));
        Ok(command)
    }
}

impl fmt::Debug for Tree {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Tree")
            .field("nodes", &self.nodes.len())
            .field("namespace", &self.namespace)
            .field("local", &self.local)
            .finish()
    }
}

fn extend_schema(
    schema: &mut Schema,
    options: impl IntoIterator<Item = Opt>,
    defaults: Vec<(String, Value)>,
) {
    for opt in options {
        schema.add_option(opt);
    }
    for (key, value) in defaults {
        schema.set_default(key, value);
    }
}

/// `-q`, `-d`, `-s` and `--no-show`, accepted at any depth of the tree.
fn process_flags() -> [Opt; 4] {
    [
        Opt::store_false("quiet")
            .short('q')
            .long("quiet")
            .dest(FOREGROUND_KEY)
            .help(t!("flag.quiet"))
            .global(true),
        Opt::store_false("dry_run")
            .short('d')
            .long("dry-run")
            .dest(EXECUTE_KEY)
            .help(t!("flag.dry_run"))
            .global(true),
        Opt::store_const("show", true)
            .short('s')
            .long("show")
            .dest(SHOW_KEY)
            .help(t!("flag.show"))
            .global(true),
        Opt::store_const("no_show", false)
            .long("no-show")
            .dest(SHOW_KEY)
            .help(t!("flag.no_show"))
            .global(true),
    ]
}

// --- COMMAND HANDLE ---

/// A node of a built [`Tree`].
#[derive(Clone, Copy)]
pub struct Command<'t> {
    tree: &'t Tree,
    id: usize,
}

impl<'t> Command<'t> {
    fn node(self) -> &'t Node {
        self.tree.node(self.id)
    }

    fn at(self, id: usize) -> Self {
        Self {
            tree: self.tree,
            id,
        }
    }

    /// Lower-cased command name.
    pub fn name(self) -> &'t str {
        &self.node().name
    }

    /// First sentence of the description.
    pub fn help(self) -> Option<&'t str> {
        self.node().schema.help()
    }

    /// This command's own options.
    pub fn schema(self) -> &'t Schema {
        &self.node().schema
    }

    /// Plain or process-executing.
    pub fn kind(self) -> Kind {
        self.node().kind
    }

    /// The tree this command belongs to.
    pub fn tree(self) -> &'t Tree {
        self.tree
    }

    /// The shared argument record.
    pub fn namespace(self) -> &'t Namespace {
        &self.tree.namespace
    }

    /// Whether both handles denote the same node of the same tree.
    pub fn same_as(self, other: Self) -> bool {
        std::ptr::eq(self.tree, other.tree) && self.id == other.id
    }

    /// Subcommands in declaration order.
    pub fn children(self) -> impl Iterator<Item = Self> + 't {
        self.node().children.iter().map(move |id| self.at(*id))
    }

    /// The direct child named `name`.
    pub fn child(self, name: &str) -> Option<Self> {
        self.node().child_ids.get(name).map(|id| self.at(*id))
    }

    /// Parent, grandparent, ... up to the root.
    pub fn ancestors(self) -> impl Iterator<Item = Self> + 't {
        self.node().ancestors.iter().map(move |id| self.at(*id))
    }

    /// The nearest ancestor.
    pub fn parent(self) -> Option<Self> {
        self.ancestors().next()
    }

    /// The root of the tree; `None` when called on the root itself.
    pub fn root(self) -> Option<Self> {
        self.ancestors().last()
    }

    /// Names from the root down to this command.
    pub fn path(self) -> Vec<&'t str> {
        let mut names: Vec<&str> = self.ancestors().map(Self::name).collect();
        names.reverse();
        names.push(self.name());
        names
    }

    /// Whether this is the command selected on the command line.
    pub fn is_invoked(self) -> bool {
        self.tree.namespace.command() == Some(self.id)
    }

    /// The shared namespace view, for whatever command was invoked.
    pub fn shared_args(self) -> Args {
        Args::shared(self.tree.namespace.clone())
    }

    /// This command's cached delegate view: its own defaults layered over
    /// the shared namespace, which it never modifies.
    pub fn delegate_args(self) -> Args {
        let node = self.node();
        node.delegate_view
            .get_or_init(|| Args::delegate(self.tree.namespace.clone(), node.schema.defaults()))
            .clone()
    }

    /// The shared namespace for the invoked command, the delegate view otherwise.
    pub fn args(self) -> Args {
        if self.is_invoked() {
            self.shared_args()
        } else {
            self.delegate_args()
        }
    }

    fn context(self) -> Context<'t> {
        let node = self.node();
        Context {
            args: self.args(),
            schema: &node.schema,
            local: (node.kind == Kind::Local).then_some(&self.tree.local),
        }
    }

    /// Runs the main body.
    ///
    /// Without an explicit body, a process-executing command interprets the
    /// steps of its `prepare` routine and a plain one prints its usage.
    pub fn call(self) -> Result<()> {
        let node = self.node();
        match (&node.call, node.kind) {
            (Some(routine), _) => routine.invoke(self, CALL_ROUTINE, &self.context()),
            (None, Kind::Local) => self.execute(),
            (None, Kind::Plain) => {
                self.print_usage();
                Ok(())
            }
        }
    }

    /// Invokes `call` or any routine registered with [`CommandDef::method`].
    pub fn delegate(self, routine: &str) -> Result<()> {
        if routine == CALL_ROUTINE {
            return self.call();
        }
        match self.node().methods.get(routine) {
            Some(method) => method.invoke(self, routine, &self.context()),
            None => Err(self.unknown_routine(routine).into()),
        }
    }

    /// Produces this command's steps without running them.
    pub fn prepare(self) -> Result<Steps> {
        let node = self.node();
        match (&node.prepare, node.kind) {
            (Some(routine), _) => routine.invoke(self, PREPARE_ROUTINE, &self.context()),
            (None, Kind::Local) => {
                self.print_usage();
                Ok(Steps::Empty)
            }
            (None, Kind::Plain) => Err(self.unknown_routine(PREPARE_ROUTINE).into()),
        }
    }

    /// Prepares this command's steps and drives them to completion.
    pub fn execute(self) -> Result<()> {
        let steps = self.prepare()?;
        interpreter::run(self, steps)
    }

    pub(crate) fn run_options(self) -> &'t RunOptions {
        &self.node().run_options
    }

    fn unknown_routine(self, routine: &str) -> ConfigError {
        ConfigError::UnknownRoutine {
            command: self.name().to_string(),
            routine: routine.to_string(),
        }
    }

    /// Usage line of this command's position in the tree.
    pub fn usage(self) -> String {
        self.tree
            .clap_command(self.id)
            .bin_name(self.path().join(" "))
            .render_usage()
            .to_string()
    }

    /// Prints [`Command::usage`] to stdout.
    pub fn print_usage(self) {
        println!("{}", self.usage());
    }
}

impl fmt::Debug for Command<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Command")
            .field("path", &self.path())
            .field("kind", &self.kind())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::rc::Rc;

    fn sample_def() -> CommandDef {
        CommandDef::local_root("Manage")
            .about("manage deployment. With more text.")
            .opt(
                Opt::value("env")
                    .short('e')
                    .long("env")
                    .choices(["development", "production"])
                    .default("development"),
            )
            .subcommand(
                CommandDef::local("Build")
                    .about("build app")
                    .opt(Opt::store_true("clean").long("clean"))
                    .set_default("target", "dist")
                    .subcommand(CommandDef::new("Docs")),
            )
            .subcommand(CommandDef::local("Deploy").about("deploy app"))
    }

    #[test]
    fn test_build_wires_children_and_ancestors() {
        let tree = Tree::build(sample_def()).unwrap();
        let root = tree.root();
        assert_eq!(tree.len(), 4);
        assert_eq!(root.name(), "manage");
        assert_eq!(root.help(), Some("manage deployment"));

        let names: Vec<&str> = root.children().map(Command::name).collect();
        assert_eq!(names, vec!["build", "deploy"]);

        let docs = root.child("build").unwrap().child("docs").unwrap();
        let chain: Vec<&str> = docs.ancestors().map(Command::name).collect();
        assert_eq!(chain, vec!["build", "manage"]);
        assert_eq!(docs.path(), vec!["manage", "build", "docs"]);
        assert!(docs.root().unwrap().same_as(root));
        assert!(root.root().is_none());
        assert!(root.parent().is_none());
    }

    #[test]
    fn test_duplicate_children_are_rejected() {
        let def = CommandDef::root("tool")
            .subcommand(CommandDef::new("Build"))
            .subcommand(CommandDef::new("build"));
        assert_eq!(
            Tree::build(def).unwrap_err(),
            ConfigError::DuplicateCommand {
                parent: "tool".to_string(),
                name: "build".to_string(),
            }
        );
    }

    #[test]
    fn test_duplicate_options_are_rejected() {
        let def = CommandDef::new("tool")
            .opt(Opt::store_true("verbose").long("verbose"))
            .opt(Opt::store_true("verbose").long("loud"));
        assert!(matches!(
            Tree::build(def).unwrap_err(),
            ConfigError::DuplicateOption { .. }
        ));
    }

    #[test]
    fn test_options_taken_by_standard_flags_are_rejected() {
        let short = CommandDef::local_root("tool").subcommand(
            CommandDef::local("deploy").opt(Opt::store_true("stage").short('s')),
        );
        assert_eq!(
            Tree::build(short).unwrap_err(),
            ConfigError::ReservedOption {
                command: "deploy".to_string(),
                option: "-s".to_string(),
            }
        );

        let nested_id = CommandDef::local_root("tool").subcommand(
            CommandDef::new("build")
                .subcommand(CommandDef::local("docs").opt(Opt::value("quiet").long("level"))),
        );
        assert!(matches!(
            Tree::build(nested_id).unwrap_err(),
            ConfigError::ReservedOption { ref command, .. } if command == "docs"
        ));

        let root_long = CommandDef::root("tool").opt(Opt::store_true("trace").long("tb"));
        assert!(matches!(
            Tree::build(root_long).unwrap_err(),
            ConfigError::ReservedOption { .. }
        ));
    }

    #[test]
    fn test_short_flags_are_free_without_process_commands() {
        let def = CommandDef::root("tool")
            .subcommand(CommandDef::new("deploy").opt(Opt::store_true("stage").short('s')));
        let tree = Tree::build(def).unwrap();
        tree.parse(["deploy", "-s"]).unwrap();
        assert_eq!(tree.namespace().get("stage"), Some(Value::Bool(true)));
    }

    #[test]
    fn test_show_flags_follow_command_line_order() {
        let tree = Tree::build(sample_def()).unwrap();
        tree.parse(["deploy", "--no-show", "-s"]).unwrap();
        assert_eq!(tree.namespace().get(SHOW_KEY), Some(Value::Bool(true)));

        let tree = Tree::build(sample_def()).unwrap();
        tree.parse(["-s", "deploy", "--no-show"]).unwrap();
        assert_eq!(tree.namespace().get(SHOW_KEY), Some(Value::Bool(false)));
    }

    #[test]
    fn test_registered_commands_join_the_tree() {
        let root = CommandDef::root("tool").subcommand(CommandDef::new("nested"));
        root.registry().unwrap().register(CommandDef::new("extra"));
        let tree = Tree::build(root).unwrap();
        let names: Vec<&str> = tree.root().children().map(Command::name).collect();
        assert_eq!(names, vec!["nested", "extra"]);
    }

    #[test]
    fn test_standard_flags_depend_on_tree_contents() {
        let plain = Tree::build(CommandDef::new("tool")).unwrap();
        assert!(plain.root().schema().option(TRACEBACK_KEY).is_some());
        assert!(plain.root().schema().option("quiet").is_none());

        let quiet = Tree::build(CommandDef::new("tool").allow_traceback(false)).unwrap();
        assert!(quiet.root().schema().option(TRACEBACK_KEY).is_none());

        let local = Tree::build(sample_def()).unwrap();
        for id in ["quiet", "dry_run", "show", "no_show"] {
            assert!(local.root().schema().option(id).is_some(), "missing {}", id);
        }
    }

    #[test]
    fn test_parse_selects_deepest_command_and_fills_namespace() {
        let tree = Tree::build(sample_def()).unwrap();
        let command = tree
            .parse(["-e", "production", "build", "--clean", "-d"])
            .unwrap();

        assert_eq!(command.name(), "build");
        assert!(command.is_invoked());
        assert!(tree.invoked().unwrap().same_as(command));

        let ns = tree.namespace();
        assert_eq!(ns.get("env"), Some(Value::from("production")));
        assert_eq!(ns.get("clean"), Some(Value::Bool(true)));
        assert_eq!(ns.get(EXECUTE_KEY), Some(Value::Bool(false)));
        assert_eq!(ns.get(FOREGROUND_KEY), Some(Value::Bool(true)));
        assert_eq!(ns.get(SHOW_KEY), Some(Value::Null));
        assert_eq!(ns.get("target"), Some(Value::from("dist")));
    }

    #[test]
    fn test_parse_errors_are_reported() {
        let tree = Tree::build(sample_def()).unwrap();
        assert!(tree.parse(["--env", "staging"]).is_err());
        assert!(tree.parse(["bogus"]).is_err());
    }

    #[test]
    fn test_args_are_shared_only_for_the_invoked_command() {
        let tree = Tree::build(sample_def()).unwrap();
        let deploy = tree.parse(["deploy"]).unwrap();
        let build = tree.root().child("build").unwrap();

        assert!(deploy.args().same_as(&deploy.shared_args()));
        let view = build.args();
        assert!(view.is_delegate());
        assert!(view.same_as(&build.args()));
        assert_eq!(view.get_str("target").as_deref(), Some("dist"));
        assert_eq!(view.get_bool("clean"), Some(false));
        assert!(!tree.namespace().contains("clean"));
    }

    #[test]
    fn test_plain_command_without_body_prints_usage() {
        let tree = Tree::build(sample_def()).unwrap();
        let docs = tree.root().child("build").unwrap().child("docs").unwrap();
        assert!(docs.usage().contains("manage build docs"));
        assert!(docs.call().is_ok());
    }

    #[test]
    fn test_delegate_to_methods() {
        let seen = Rc::new(RefCell::new(Vec::new()));
        let recorder = Rc::clone(&seen);
        let def = CommandDef::new("tool")
            .opt(Opt::value("name").long("name").default("world"))
            .method(
                "greet",
                Routine::args(move |cmd, args| {
                    recorder
                        .borrow_mut()
                        .push(format!("{} greets {}", cmd.name(), args.get_str("name").unwrap_or_default()));
                    Ok(())
                }),
            );
        let tree = Tree::build(def).unwrap();
        let root = tree.parse(["--name", "you"]).unwrap();
        root.delegate("greet").unwrap();
        assert_eq!(*seen.borrow(), vec!["tool greets you".to_string()]);

        let err = root.delegate("missing").unwrap_err();
        assert!(matches!(
            err.downcast_ref::<ConfigError>(),
            Some(ConfigError::UnknownRoutine { .. })
        ));
    }

    #[test]
    fn test_routine_needing_local_fails_on_plain_command_before_running() {
        let ran = Rc::new(RefCell::new(false));
        let flag = Rc::clone(&ran);
        let def = CommandDef::new("bad").run(Routine::full(move |_, _, _, _| {
            *flag.borrow_mut() = true;
            Ok(())
        }));
        let tree = Tree::build(def).unwrap();
        let err = tree.root().call().unwrap_err();
        assert_eq!(
            err.downcast_ref::<ConfigError>().map(ToString::to_string).as_deref(),
            Some("bad.call() requires too many positional arguments: 'local'")
        );
        assert!(!*ran.borrow());
    }

    #[test]
    fn test_optional_local_is_passed_when_available() {
        let seen = Rc::new(RefCell::new(Vec::new()));
        let (plain_seen, local_seen) = (Rc::clone(&seen), Rc::clone(&seen));
        let def = CommandDef::root("tool")
            .subcommand(CommandDef::new("plain").run(Routine::optional_local(
                move |_, _, _, local| {
                    plain_seen.borrow_mut().push(local.is_some());
                    Ok(())
                },
            )))
            .subcommand(CommandDef::local("proc").run(Routine::optional_local(
                move |_, _, _, local| {
                    local_seen.borrow_mut().push(local.is_some());
                    Ok(())
                },
            )));
        let tree = Tree::build(def).unwrap();
        tree.root().child("plain").unwrap().call().unwrap();
        tree.root().child("proc").unwrap().call().unwrap();
        assert_eq!(*seen.borrow(), vec![false, true]);
    }
}
