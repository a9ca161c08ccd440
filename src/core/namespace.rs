// src/core/namespace.rs

//! The shared argument record and the two-layer views commands read it through.

use crate::models::Value;
use std::cell::RefCell;
use std::collections::BTreeMap;
use std::fmt;
use std::rc::Rc;

/// Plain key/value storage behind both layers.
pub type Record = BTreeMap<String, Value>;

#[derive(Debug, Default)]
struct NamespaceState {
    values: Record,
    /// Index of the node selected on the command line, once parsed.
    command: Option<usize>,
}

/// The single mutable argument record of one invocation tree.
///
/// Cloning is cheap and yields another handle to the *same* record; every
/// node of a tree observes one instance.
#[derive(Clone, Default)]
pub struct Namespace {
    state: Rc<RefCell<NamespaceState>>,
}

impl Namespace {
    /// An empty record.
    pub fn new() -> Self {
        Self::default()
    }

    /// A copy of the value under `key`.
    pub fn get(&self, key: &str) -> Option<Value> {
        self.state.borrow().values.get(key).cloned()
    }

    /// Whether `key` has been written.
    pub fn contains(&self, key: &str) -> bool {
        self.state.borrow().values.contains_key(key)
    }

    /// Writes `value`, replacing any previous one.
    pub fn set(&self, key: impl Into<String>, value: impl Into<Value>) {
        let key = key.into();
        let value = value.into();
        log::trace!("namespace: {} = {}", key, value);
        self.state.borrow_mut().values.insert(key, value);
    }

    /// Writes `value` only if `key` is not present yet. Returns whether it wrote.
    pub fn set_default(&self, key: &str, value: &Value) -> bool {
        let mut state = self.state.borrow_mut();
        if state.values.contains_key(key) {
            return false;
        }
        log::trace!("namespace: {} defaults to {}", key, value);
        state.values.insert(key.to_string(), value.clone());
        true
    }

    /// Every key written so far, sorted.
    pub fn keys(&self) -> Vec<String> {
        self.state.borrow().values.keys().cloned().collect()
    }

    /// A copy of the current contents.
    pub fn snapshot(&self) -> Record {
        self.state.borrow().values.clone()
    }

    /// Whether both handles point at the same record.
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.state, &other.state)
    }

    pub(crate) fn command(&self) -> Option<usize> {
        self.state.borrow().command
    }

    pub(crate) fn set_command(&self, index: usize) {
        self.state.borrow_mut().command = Some(index);
    }
}

impl fmt::Debug for Namespace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.borrow();
        f.debug_struct("Namespace")
            .field("values", &state.values)
            .field("command", &state.command)
            .finish()
    }
}

/// The argument view a routine receives.
///
/// For the command invoked on the command line this is the shared namespace
/// itself. For any other command it is that command's *delegate view*: the
/// shared namespace as base, plus an overlay holding the command's own
/// defaults for keys the base lacked when the view was created. Reads consult
/// the overlay first; writes through a delegate view land in the overlay, so
/// the shared namespace is never modified by a delegated command.
#[derive(Clone, Debug)]
pub struct Args {
    base: Namespace,
    overlay: Option<Rc<RefCell<Record>>>,
}

impl Args {
    /// A view writing straight through to the shared namespace.
    pub fn shared(base: Namespace) -> Self {
        Self {
            base,
            overlay: None,
        }
    }

    /// A delegate view: `defaults` fill every key the base does not hold yet.
    pub fn delegate<'a, I>(base: Namespace, defaults: I) -> Self
    where
        I: IntoIterator<Item = (&'a str, &'a Value)>,
    {
        let overlay: Record = defaults
            .into_iter()
            .filter(|(key, _)| !base.contains(key))
            .map(|(key, value)| (key.to_string(), value.clone()))
            .collect();
        Self {
            base,
            overlay: Some(Rc::new(RefCell::new(overlay))),
        }
    }

    /// Whether this is a delegate view with its own overlay.
    pub fn is_delegate(&self) -> bool {
        self.overlay.is_some()
    }

    /// The shared namespace underneath this view.
    pub fn namespace(&self) -> &Namespace {
        &self.base
    }

    /// Overlay first, then the shared record.
    pub fn get(&self, key: &str) -> Option<Value> {
        if let Some(overlay) = &self.overlay {
            if let Some(value) = overlay.borrow().get(key) {
                return Some(value.clone());
            }
        }
        self.base.get(key)
    }

    /// Whether either layer has `key`.
    pub fn contains(&self, key: &str) -> bool {
        self.overlay
            .as_ref()
            .is_some_and(|overlay| overlay.borrow().contains_key(key))
            || self.base.contains(key)
    }

    /// Writes to the overlay of a delegate view, to the shared record otherwise.
    pub fn set(&self, key: impl Into<String>, value: impl Into<Value>) {
        match &self.overlay {
            Some(overlay) => {
                overlay.borrow_mut().insert(key.into(), value.into());
            }
            None => self.base.set(key, value),
        }
    }

    /// Boolean value of `key`; absent or non-boolean values yield `None`.
    pub fn get_bool(&self, key: &str) -> Option<bool> {
        self.get(key).and_then(|value| value.as_bool())
    }

    /// Boolean value of `key`, `fallback` when absent or not a boolean.
    pub fn flag(&self, key: &str, fallback: bool) -> bool {
        self.get_bool(key).unwrap_or(fallback)
    }

    /// String value of `key`.
    pub fn get_str(&self, key: &str) -> Option<String> {
        match self.get(key) {
            Some(Value::Str(s)) => Some(s),
            _ => None,
        }
    }

    /// List value of `key`; a single string becomes a one-item list.
    pub fn get_list(&self, key: &str) -> Vec<String> {
        match self.get(key) {
            Some(Value::List(items)) => items,
            Some(Value::Str(s)) => vec![s],
            _ => Vec::new(),
        }
    }

    /// Identity comparison: same base record and same overlay (or both shared).
    pub fn same_as(&self, other: &Self) -> bool {
        let same_overlay = match (&self.overlay, &other.overlay) {
            (None, None) => true,
            (Some(a), Some(b)) => Rc::ptr_eq(a, b),
            _ => false,
        };
        same_overlay && self.base.ptr_eq(&other.base)
    }

    /// Every visible key/value pair, overlay entries taking precedence.
    pub fn to_record(&self) -> Record {
        let mut record = self.base.snapshot();
        if let Some(overlay) = &self.overlay {
            record.extend(
                overlay
                    .borrow()
                    .iter()
                    .map(|(key, value)| (key.clone(), value.clone())),
            );
        }
        record
    }
}
