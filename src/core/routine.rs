// src/core/routine.rs

//! Delegation: calling a routine with as much context as it declares.
//!
//! Every routine receives the command it belongs to, followed by a prefix of
//! the contextual argument list `(args, schema[, local])`. Which prefix is
//! chosen depends on the shape the routine was registered with, so the same
//! context satisfies routines of differing arity without glue code.

use crate::core::definition::ConfigError;
use crate::core::namespace::Args;
use crate::core::schema::Schema;
use crate::core::tree::Command;
use crate::system::process::Local;
use anyhow::Result;
use std::fmt;

/// A parameter a routine declares after the command itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Param {
    /// Name reported when the parameter cannot be supplied.
    pub name: &'static str,
    /// Optional parameters are only passed when the context has them.
    pub optional: bool,
}

const ARGS: Param = Param {
    name: "args",
    optional: false,
};
const SCHEMA: Param = Param {
    name: "schema",
    optional: false,
};
const LOCAL: Param = Param {
    name: "local",
    optional: false,
};
const OPTIONAL_LOCAL: Param = Param {
    name: "local",
    optional: true,
};

type NullaryFn<R> = Box<dyn Fn(Command<'_>) -> Result<R>>;
type ArgsFn<R> = Box<dyn Fn(Command<'_>, &Args) -> Result<R>>;
type ArgsSchemaFn<R> = Box<dyn Fn(Command<'_>, &Args, &Schema) -> Result<R>>;
type FullFn<R> = Box<dyn Fn(Command<'_>, &Args, &Schema, &Local) -> Result<R>>;
type OptionalLocalFn<R> = Box<dyn Fn(Command<'_>, &Args, &Schema, Option<&Local>) -> Result<R>>;

enum Body<R> {
    Nullary(NullaryFn<R>),
    Args(ArgsFn<R>),
    ArgsSchema(ArgsSchemaFn<R>),
    Full(FullFn<R>),
    OptionalLocal(OptionalLocalFn<R>),
}

/// A command routine together with the shape of context it expects.
pub struct Routine<R> {
    body: Body<R>,
}

impl<R> Routine<R> {
    /// Receives only the command.
    pub fn nullary<F>(f: F) -> Self
    where
        F: Fn(Command<'_>) -> Result<R> + 'static,
    {
        Self {
            body: Body::Nullary(Box::new(f)),
        }
    }

    /// Receives the command and its effective arguments.
    pub fn args<F>(f: F) -> Self
    where
        F: Fn(Command<'_>, &Args) -> Result<R> + 'static,
    {
        Self {
            body: Body::Args(Box::new(f)),
        }
    }

    /// Receives the command, its arguments and its own schema.
    pub fn args_schema<F>(f: F) -> Self
    where
        F: Fn(Command<'_>, &Args, &Schema) -> Result<R> + 'static,
    {
        Self {
            body: Body::ArgsSchema(Box::new(f)),
        }
    }

    /// Also requires the process helper; only process-executing commands have one.
    pub fn full<F>(f: F) -> Self
    where
        F: Fn(Command<'_>, &Args, &Schema, &Local) -> Result<R> + 'static,
    {
        Self {
            body: Body::Full(Box::new(f)),
        }
    }

    /// Takes the process helper when available, `None` otherwise.
    pub fn optional_local<F>(f: F) -> Self
    where
        F: Fn(Command<'_>, &Args, &Schema, Option<&Local>) -> Result<R> + 'static,
    {
        Self {
            body: Body::OptionalLocal(Box::new(f)),
        }
    }

    /// The parameters declared after the command.
    pub fn params(&self) -> &'static [Param] {
        match self.body {
            Body::Nullary(_) => &[],
            Body::Args(_) => &[ARGS],
            Body::ArgsSchema(_) => &[ARGS, SCHEMA],
            Body::Full(_) => &[ARGS, SCHEMA, LOCAL],
            Body::OptionalLocal(_) => &[ARGS, SCHEMA, OPTIONAL_LOCAL],
        }
    }

    /// Invokes the routine after matching its parameters against `context`.
    ///
    /// # Errors
    ///
    /// `ConfigError::TooManyParameters` (before the body runs) when the routine
    /// requires more context than `context` holds; otherwise whatever the
    /// body returns.
    pub(crate) fn invoke(
        &self,
        command: Command<'_>,
        routine_name: &str,
        context: &Context<'_>,
    ) -> Result<R> {
        let count = match_params(self.params(), context.len()).map_err(|params| {
            ConfigError::TooManyParameters {
                command: command.name().to_string(),
                routine: routine_name.to_string(),
                params,
            }
        })?;
        log::debug!(
            "Delegating to {}.{}() with {} context argument(s){}",
            command.name(),
            routine_name,
            count,
            if context.args.is_delegate() {
                " (delegate view)"
            } else {
                ""
            }
        );

        match (&self.body, context.local) {
            (Body::Nullary(f), _) => f(command),
            (Body::Args(f), _) => f(command, &context.args),
            (Body::ArgsSchema(f), _) => f(command, &context.args, context.schema),
            (Body::Full(f), Some(local)) => f(command, &context.args, context.schema, local),
            (Body::Full(_), None) => Err(ConfigError::TooManyParameters {
                command: command.name().to_string(),
                routine: routine_name.to_string(),
                params: vec![LOCAL.name],
            }
            .into()),
            (Body::OptionalLocal(f), local) => f(
                command,
                &context.args,
                context.schema,
                if count > 2 { local } else { None },
            ),
        }
    }
}

impl<R> fmt::Debug for Routine<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<&str> = self.params().iter().map(|param| param.name).collect();
        write!(f, "Routine({})", names.join(", "))
    }
}

/// The contextual argument list of one delegation: `(args, schema[, local])`.
#[derive(Debug)]
pub(crate) struct Context<'a> {
    pub(crate) args: Args,
    pub(crate) schema: &'a Schema,
    pub(crate) local: Option<&'a Local>,
}

impl Context<'_> {
    pub(crate) fn len(&self) -> usize {
        2 + usize::from(self.local.is_some())
    }
}

/// Chooses how many context items to pass to a routine declaring `params`.
///
/// Required parameters are always selected; optional ones only while context
/// remains. If the selection exceeds `available`, the excess parameter names
/// are returned as the error.
pub fn match_params(params: &[Param], available: usize) -> Result<usize, Vec<&'static str>> {
    let selected: Vec<&Param> = params
        .iter()
        .enumerate()
        .filter(|(index, param)| *index < available || !param.optional)
        .map(|(_, param)| param)
        .collect();

    if selected.len() > available {
        return Err(selected
            .iter()
            .skip(available)
            .map(|param| param.name)
            .collect());
    }
    Ok(selected.len())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_match_params_takes_required_prefix() {
        assert_eq!(match_params(&[], 2), Ok(0));
        assert_eq!(match_params(&[ARGS], 2), Ok(1));
        assert_eq!(match_params(&[ARGS, SCHEMA], 2), Ok(2));
        assert_eq!(match_params(&[ARGS, SCHEMA, LOCAL], 3), Ok(3));
    }

    #[test]
    fn test_match_params_names_excess_required() {
        assert_eq!(match_params(&[ARGS, SCHEMA, LOCAL], 2), Err(vec!["local"]));
        assert_eq!(match_params(&[ARGS, SCHEMA, LOCAL], 0), Err(vec!["args", "schema", "local"]));
    }

    #[test]
    fn test_match_params_optional_only_when_available() {
        assert_eq!(match_params(&[ARGS, SCHEMA, OPTIONAL_LOCAL], 2), Ok(2));
        assert_eq!(match_params(&[ARGS, SCHEMA, OPTIONAL_LOCAL], 3), Ok(3));
    }

    #[test]
    fn test_routine_shapes_declare_params() {
        let routine: Routine<()> = Routine::full(|_, _, _, _| Ok(()));
        let names: Vec<&str> = routine.params().iter().map(|p| p.name).collect();
        assert_eq!(names, vec!["args", "schema", "local"]);
        assert!(Routine::<()>::nullary(|_| Ok(())).params().is_empty());
        assert_eq!(format!("{:?}", Routine::<()>::args(|_, _| Ok(()))), "Routine(args)");
    }
}
