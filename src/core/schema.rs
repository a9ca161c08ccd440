// src/core/schema.rs

//! Argument schemas: the options of one command, bridged onto clap's builder API.

use crate::core::namespace::Namespace;
use crate::models::Value;
use clap::builder::PossibleValuesParser;
use clap::parser::ValueSource;
use clap::{Arg, ArgAction, ArgMatches};
use lazy_static::lazy_static;
use regex::Regex;
use std::collections::{BTreeMap, HashSet};

lazy_static! {
    // A description's help line ends at the first ". " or newline.
    static ref SENTENCE_END_RE: Regex =
        Regex::new(r"(?:\. )|\n").expect("sentence regex is valid");
}

/// Names clap takes on every command for its help flag.
const HELP_NAMES: [&str; 3] = ["help", "-h", "--help"];

/// Returns the help line of a command description: its first sentence.
pub fn first_sentence(description: &str) -> String {
    SENTENCE_END_RE
        .splitn(description, 2)
        .next()
        .unwrap_or_default()
        .to_string()
}

/// How an option turns command-line tokens into a namespace value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OptKind {
    /// A flag without value; stores the given constant when present.
    Flag(Value),
    /// `--name VALUE`, optionally restricted to a set of choices.
    Value {
        /// Accepted values; empty accepts any.
        choices: Vec<String>,
    },
    /// `--name VALUE` repeatable; collects a list.
    Append,
    /// A positional argument.
    Positional,
}

/// One declared option of a command's argument schema.
#[derive(Debug, Clone)]
pub struct Opt {
    id: String,
    dest: String,
    short: Option<char>,
    long: Option<String>,
    aliases: Vec<String>,
    kind: OptKind,
    default: Value,
    help: Option<String>,
    required: bool,
    global: bool,
}

impl Opt {
    fn with_kind(id: impl Into<String>, kind: OptKind, default: Value) -> Self {
        let id = id.into();
        Self {
            dest: id.clone(),
            id,
            short: None,
            long: None,
            aliases: Vec::new(),
            kind,
            default,
            help: None,
            required: false,
            global: false,
        }
    }

    /// Flag storing `true` when present, `false` by default.
    pub fn store_true(id: impl Into<String>) -> Self {
        Self::with_kind(id, OptKind::Flag(Value::Bool(true)), Value::Bool(false))
    }

    /// Flag storing `false` when present, `true` by default.
    pub fn store_false(id: impl Into<String>) -> Self {
        Self::with_kind(id, OptKind::Flag(Value::Bool(false)), Value::Bool(true))
    }

    /// Flag storing an arbitrary constant when present.
    pub fn store_const(id: impl Into<String>, constant: impl Into<Value>) -> Self {
        Self::with_kind(id, OptKind::Flag(constant.into()), Value::Null)
    }

    /// Option taking one value.
    pub fn value(id: impl Into<String>) -> Self {
        Self::with_kind(id, OptKind::Value { choices: Vec::new() }, Value::Null)
    }

    /// Repeatable option collecting every value.
    pub fn append(id: impl Into<String>) -> Self {
        Self::with_kind(id, OptKind::Append, Value::Null)
    }

    /// Positional arguments are required unless a default is given.
    pub fn positional(id: impl Into<String>) -> Self {
        let mut opt = Self::with_kind(id, OptKind::Positional, Value::Null);
        opt.required = true;
        opt
    }

    /// Sets the `-x` name.
    pub fn short(mut self, short: char) -> Self {
        self.short = Some(short);
        self
    }

    /// Sets the `--name` name.
    pub fn long(mut self, long: impl Into<String>) -> Self {
        self.long = Some(long.into());
        self
    }

    /// Another long name for the same option.
    pub fn alias(mut self, long: impl Into<String>) -> Self {
        self.aliases.push(long.into());
        self
    }

    /// Namespace key to write; defaults to the option id.
    pub fn dest(mut self, dest: impl Into<String>) -> Self {
        self.dest = dest.into();
        self
    }

    /// Value stored when the option is not given. Makes a positional optional.
    pub fn default(mut self, default: impl Into<Value>) -> Self {
        self.default = default.into();
        if self.kind == OptKind::Positional {
            self.required = false;
        }
        self
    }

    /// Help line shown in usage.
    pub fn help(mut self, help: impl Into<String>) -> Self {
        self.help = Some(help.into());
        self
    }

    /// Whether parsing fails without the option.
    pub fn required(mut self, required: bool) -> Self {
        self.required = required;
        self
    }

    /// Restricts the value to `choices`.
    pub fn choices<I, S>(mut self, choices: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.kind = OptKind::Value {
            choices: choices.into_iter().map(Into::into).collect(),
        };
        self
    }

    /// Also accept the option after a subcommand name.
    pub fn global(mut self, global: bool) -> Self {
        self.global = global;
        self
    }

    /// Identifier of the option.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Namespace key the option writes.
    pub fn dest_key(&self) -> &str {
        &self.dest
    }

    /// Value stored when the option is absent.
    pub fn default_value(&self) -> &Value {
        &self.default
    }

    /// How tokens become a value.
    pub fn kind(&self) -> &OptKind {
        &self.kind
    }

    /// Whether subcommands accept the option too.
    pub fn is_global(&self) -> bool {
        self.global
    }

    /// Every name clap knows the option by: id, `-s`, `--long` and aliases.
    pub(crate) fn names(&self) -> Vec<String> {
        let mut names = vec![self.id.clone()];
        names.extend(self.short.map(|short| format!("-{}", short)));
        names.extend(
            self.long
                .iter()
                .chain(&self.aliases)
                .map(|long| format!("--{}", long)),
        );
        names
    }

    /// Command-line position of the last occurrence.
    fn last_index(&self, matches: &ArgMatches) -> usize {
        matches
            .try_contains_id(&self.id)
            .unwrap_or(false)
            .then(|| matches.indices_of(&self.id))
            .flatten()
            .and_then(|indices| indices.last())
            .unwrap_or_default()
    }

    fn to_arg(&self) -> Arg {
        let mut arg = Arg::new(self.id.clone());
        if let Some(short) = self.short {
            arg = arg.short(short);
        }
        if let Some(long) = &self.long {
            arg = arg.long(long.clone());
        }
        for alias in &self.aliases {
            arg = arg.visible_alias(alias.clone());
        }

        arg = match &self.kind {
            OptKind::Flag(_) => arg.action(ArgAction::SetTrue),
            OptKind::Value { choices } if !choices.is_empty() => arg
                .action(ArgAction::Set)
                .value_parser(PossibleValuesParser::new(choices.clone())),
            OptKind::Value { .. } | OptKind::Positional => arg.action(ArgAction::Set),
            OptKind::Append => arg.action(ArgAction::Append),
        };

        let help = match (&self.help, &self.default) {
            (Some(help), Value::Str(default)) => Some(format!("{} [default: {}]", help, default)),
            (Some(help), _) => Some(help.clone()),
            (None, _) => None,
        };
        if let Some(help) = help {
            arg = arg.help(help);
        }

        arg.required(self.required).global(self.global)
    }

    /// Value for this option when it was given on the command line.
    fn explicit_value(&self, matches: &ArgMatches) -> Option<Value> {
        if matches.value_source(&self.id) != Some(ValueSource::CommandLine) {
            return None;
        }
        let value = match &self.kind {
            OptKind::Flag(constant) => constant.clone(),
            OptKind::Value { .. } | OptKind::Positional => {
                Value::from(matches.get_one::<String>(&self.id).cloned())
            }
            OptKind::Append => Value::List(
                matches
                    .get_many::<String>(&self.id)
                    .map(|values| values.cloned().collect())
                    .unwrap_or_default(),
            ),
        };
        Some(value)
    }
}

/// A command's own argument schema: its options and extra defaults.
///
/// The schema describes one level of the tree only; the tree assembles the
/// full clap command (with subcommands) when it parses or prints usage.
#[derive(Debug, Clone, Default)]
pub struct Schema {
    name: String,
    about: Option<String>,
    help: Option<String>,
    options: Vec<Opt>,
    defaults: BTreeMap<String, Value>,
}

impl Schema {
    /// An empty schema for the command `name`.
    pub fn new(name: impl Into<String>, about: Option<String>) -> Self {
        let help = about.as_deref().map(first_sentence);
        Self {
            name: name.into(),
            about,
            help,
            options: Vec::new(),
            defaults: BTreeMap::new(),
        }
    }

    /// Name of the command the schema belongs to.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The full description.
    pub fn about(&self) -> Option<&str> {
        self.about.as_deref()
    }

    /// First sentence of the description.
    pub fn help(&self) -> Option<&str> {
        self.help.as_deref()
    }

    /// Appends `opt`; declaration order is usage order.
    pub fn add_option(&mut self, opt: Opt) -> &mut Self {
        self.options.push(opt);
        self
    }

    /// A default for `key` that no option exposes.
    pub fn set_default(&mut self, key: impl Into<String>, value: impl Into<Value>) -> &mut Self {
        self.defaults.insert(key.into(), value.into());
        self
    }

    /// Options in declaration order.
    pub fn options(&self) -> &[Opt] {
        &self.options
    }

    /// The option with this id.
    pub fn option(&self, id: &str) -> Option<&Opt> {
        self.options.iter().find(|opt| opt.id == id)
    }

    /// Every `(key, default)` this schema owns, options first.
    pub fn defaults(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.options
            .iter()
            .map(|opt| (opt.dest.as_str(), &opt.default))
            .chain(self.defaults.iter().map(|(key, value)| (key.as_str(), value)))
    }

    /// First name two options of this level both claim, if any.
    pub(crate) fn duplicate_option(&self) -> Option<String> {
        let mut seen = HashSet::new();
        self.options
            .iter()
            .flat_map(Opt::names)
            .find(|name| !seen.insert(name.clone()))
    }

    /// This level as a clap command, without subcommands.
    pub(crate) fn to_clap(&self) -> clap::Command {
        let mut command = clap::Command::new(self.name.clone());
        if let Some(help) = &self.help {
            command = command.about(help.clone());
        }
        if let Some(about) = &self.about {
            command = command.long_about(about.clone());
        }
        for opt in &self.options {
            command = command.arg(opt.to_arg());
        }
        command
    }

    /// Writes this level's parse result into `namespace`: explicit values
    /// overwrite, defaults only fill keys that are still missing.
    pub(crate) fn apply(&self, matches: &ArgMatches, namespace: &Namespace) {
        let mut explicit: Vec<(usize, &Opt, Value)> = self
            .options
            .iter()
            .filter_map(|opt| {
                opt.explicit_value(matches)
                    .map(|value| (opt.last_index(matches), opt, value))
            })
            .collect();
        // Options sharing a key: the one given last wins.
        explicit.sort_by_key(|(index, ..)| *index);
        for (_, opt, value) in explicit {
            namespace.set(opt.dest.clone(), value);
        }

        for opt in &self.options {
            namespace.set_default(&opt.dest, &opt.default);
        }
        for (key, value) in &self.defaults {
            namespace.set_default(key, value);
        }
    }
}

/// First name among `options` already taken by `reserved` or by the help flag.
pub(crate) fn clashing_name(options: &[Opt], reserved: &[Opt]) -> Option<String> {
    let taken: HashSet<String> = reserved
        .iter()
        .flat_map(Opt::names)
        .chain(HELP_NAMES.iter().map(|name| name.to_string()))
        .collect();
    options
        .iter()
        .flat_map(Opt::names)
        .find(|name| taken.contains(name))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_schema() -> Schema {
        let mut schema = Schema::new(
            "deploy",
            Some("deploy app. Pushes the bundle to the target.".to_string()),
        );
        schema
            .add_option(
                Opt::value("env")
                    .short('e')
                    .long("env")
                    .choices(["development", "production"])
                    .default("development"),
            )
            .add_option(
                Opt::store_false("no_eat")
                    .long("no-eat")
                    .alias("fast")
                    .dest("should_eat"),
            )
            .add_option(Opt::append("tag").long("tag"))
            .set_default("region", "eu");
        schema
    }

    #[test]
    fn test_first_sentence() {
        assert_eq!(first_sentence("build app. Then more."), "build app");
        assert_eq!(first_sentence("line one\nline two"), "line one");
        assert_eq!(first_sentence("no break"), "no break");
    }

    #[test]
    fn test_schema_help_is_first_sentence() {
        let schema = sample_schema();
        assert_eq!(schema.help(), Some("deploy app"));
        assert_eq!(schema.about(), Some("deploy app. Pushes the bundle to the target."));
    }

    #[test]
    fn test_apply_writes_explicit_values_and_fills_defaults() {
        let schema = sample_schema();
        let matches = schema
            .to_clap()
            .no_binary_name(true)
            .try_get_matches_from(["--env", "production", "--tag", "a", "--tag", "b"])
            .unwrap();

        let ns = Namespace::new();
        schema.apply(&matches, &ns);

        assert_eq!(ns.get("env"), Some(Value::from("production")));
        assert_eq!(ns.get("should_eat"), Some(Value::Bool(true)));
        assert_eq!(
            ns.get("tag"),
            Some(Value::List(vec!["a".to_string(), "b".to_string()]))
        );
        assert_eq!(ns.get("region"), Some(Value::from("eu")));
    }

    #[test]
    fn test_flag_stores_constant() {
        let schema = sample_schema();
        let matches = schema
            .to_clap()
            .no_binary_name(true)
            .try_get_matches_from(["--no-eat"])
            .unwrap();
        let ns = Namespace::new();
        schema.apply(&matches, &ns);
        assert_eq!(ns.get("should_eat"), Some(Value::Bool(false)));
        assert_eq!(ns.get("env"), Some(Value::from("development")));
    }

    #[test]
    fn test_alias_sets_the_same_key() {
        let schema = sample_schema();
        let matches = schema
            .to_clap()
            .no_binary_name(true)
            .try_get_matches_from(["--fast"])
            .unwrap();
        let ns = Namespace::new();
        schema.apply(&matches, &ns);
        assert_eq!(ns.get("should_eat"), Some(Value::Bool(false)));
    }

    #[test]
    fn test_choices_are_enforced() {
        let schema = sample_schema();
        let result = schema
            .to_clap()
            .no_binary_name(true)
            .try_get_matches_from(["--env", "staging"]);
        assert!(result.is_err());
    }

    #[test]
    fn test_duplicate_option_detection() {
        let mut schema = Schema::new("x", None);
        schema
            .add_option(Opt::store_true("verbose").long("verbose"))
            .add_option(Opt::store_true("verbose").long("loud"));
        assert_eq!(schema.duplicate_option().as_deref(), Some("verbose"));
        assert_eq!(sample_schema().duplicate_option(), None);

        let mut shorts = Schema::new("x", None);
        shorts
            .add_option(Opt::store_true("stage").short('s'))
            .add_option(Opt::store_true("skip").short('s'));
        assert_eq!(shorts.duplicate_option().as_deref(), Some("-s"));
    }

    #[test]
    fn test_clashing_name() {
        let reserved = [Opt::store_false("quiet").short('q').long("quiet")];
        let short = [Opt::store_true("stage").short('q')];
        let id = [Opt::value("quiet").long("level")];
        let help = [Opt::store_true("hint").short('h')];
        let free = [Opt::store_true("stage").short('s').long("stage")];
        assert_eq!(clashing_name(&short, &reserved).as_deref(), Some("-q"));
        assert_eq!(clashing_name(&id, &reserved).as_deref(), Some("quiet"));
        assert_eq!(clashing_name(&help, &reserved).as_deref(), Some("-h"));
        assert_eq!(clashing_name(&free, &reserved), None);
    }

    #[test]
    fn test_last_flag_on_the_command_line_wins() {
        let mut schema = Schema::new("x", None);
        schema
            .add_option(Opt::store_const("show", true).short('s').dest("show_commands"))
            .add_option(Opt::store_const("no_show", false).long("no-show").dest("show_commands"));

        for (argv, expected) in [(["--no-show", "-s"], true), (["-s", "--no-show"], false)] {
            let matches = schema
                .to_clap()
                .no_binary_name(true)
                .try_get_matches_from(argv)
                .unwrap();
            let ns = Namespace::new();
            schema.apply(&matches, &ns);
            assert_eq!(ns.get("show_commands"), Some(Value::Bool(expected)));
        }
    }
}
