// src/core/navigator.rs

//! Path lookups between the commands of a built tree.

use crate::core::tree::Command;
use thiserror::Error;

/// Failure to resolve a lookup path.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LookupError {
    /// The command has no child with that name.
    #[error("command {command} has no child '{name}'")]
    NoChild {
        /// Path of the command looked in.
        command: String,
        /// The missing child.
        name: String,
    },
    /// The ancestor chain is shorter than the index asks.
    #[error("command {command} has no parent {index}")]
    NoParent {
        /// Path of the command looked from.
        command: String,
        /// The negative index requested.
        index: i64,
    },
    /// Non-negative indices address nothing.
    #[error("command hierarchy indices must be names (to descend) or negative integers (to ascend), not {0}")]
    InvalidIndex(i64),
}

/// One step of a lookup path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Segment {
    /// Descend into the child with this name.
    Name(String),
    /// Ascend: `-1` is the parent, `-2` the grandparent. Only negative values are valid.
    Up(i64),
}

impl From<&str> for Segment {
    fn from(name: &str) -> Self {
        Self::Name(name.to_string())
    }
}

impl From<String> for Segment {
    fn from(name: String) -> Self {
        Self::Name(name)
    }
}

impl From<i64> for Segment {
    fn from(index: i64) -> Self {
        Self::Up(index)
    }
}

impl From<i32> for Segment {
    fn from(index: i32) -> Self {
        Self::Up(i64::from(index))
    }
}

/// Anything usable as a lookup path: one segment or an ordered sequence.
pub trait IntoPath {
    fn into_path(self) -> Vec<Segment>;
}

impl IntoPath for Segment {
    fn into_path(self) -> Vec<Segment> {
        vec![self]
    }
}

impl IntoPath for &str {
    fn into_path(self) -> Vec<Segment> {
        vec![self.into()]
    }
}

impl IntoPath for String {
    fn into_path(self) -> Vec<Segment> {
        vec![self.into()]
    }
}

impl IntoPath for i64 {
    fn into_path(self) -> Vec<Segment> {
        vec![self.into()]
    }
}

impl IntoPath for i32 {
    fn into_path(self) -> Vec<Segment> {
        vec![self.into()]
    }
}

/// The empty path: resolves to the starting command.
impl IntoPath for () {
    fn into_path(self) -> Vec<Segment> {
        Vec::new()
    }
}

impl<T: Into<Segment>> IntoPath for Vec<T> {
    fn into_path(self) -> Vec<Segment> {
        self.into_iter().map(Into::into).collect()
    }
}

impl<T: Into<Segment> + Clone> IntoPath for &[T] {
    fn into_path(self) -> Vec<Segment> {
        self.iter().cloned().map(Into::into).collect()
    }
}

impl<T: Into<Segment>, const N: usize> IntoPath for [T; N] {
    fn into_path(self) -> Vec<Segment> {
        self.into_iter().map(Into::into).collect()
    }
}

impl<A: Into<Segment>, B: Into<Segment>> IntoPath for (A, B) {
    fn into_path(self) -> Vec<Segment> {
        vec![self.0.into(), self.1.into()]
    }
}

impl<A: Into<Segment>, B: Into<Segment>, C: Into<Segment>> IntoPath for (A, B, C) {
    fn into_path(self) -> Vec<Segment> {
        vec![self.0.into(), self.1.into(), self.2.into()]
    }
}

impl<'t> Command<'t> {
    /// Resolves `path` strictly left to right, starting at this command.
    ///
    /// ```
    /// use cmdtree::{CommandDef, Tree};
    ///
    /// let tree = Tree::build(
    ///     CommandDef::root("tool").subcommand(
    ///         CommandDef::new("build").subcommand(CommandDef::new("docs")),
    ///     ),
    /// )
    /// .unwrap();
    /// let docs = tree.root().lookup(("build", "docs")).unwrap();
    /// assert_eq!(docs.name(), "docs");
    /// assert!(docs.lookup(-2).unwrap().same_as(tree.root()));
    /// ```
    pub fn lookup(self, path: impl IntoPath) -> Result<Self, LookupError> {
        path.into_path()
            .into_iter()
            .try_fold(self, |command, segment| command.resolve(segment))
    }

    fn resolve(self, segment: Segment) -> Result<Self, LookupError> {
        match segment {
            Segment::Name(name) => self.child(&name).ok_or_else(|| LookupError::NoChild {
                command: self.name().to_string(),
                name,
            }),
            Segment::Up(index) if index < 0 => usize::try_from(index.unsigned_abs())
                .ok()
                .and_then(|depth| self.ancestors().nth(depth - 1))
                .ok_or_else(|| LookupError::NoParent {
                    command: self.name().to_string(),
                    index,
                }),
            Segment::Up(index) => Err(LookupError::InvalidIndex(index)),
        }
    }
}
