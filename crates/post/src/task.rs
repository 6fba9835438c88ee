//! The task envelope.

use std::fmt;

use courier_core::{Callable, Value};

/// What a task calls: a registered name or a callable carried inline.
#[derive(Clone, Debug)]
pub enum Target {
    Named(String),
    Direct(Callable),
}

impl From<&str> for Target {
    fn from(name: &str) -> Self {
        Target::Named(name.to_string())
    }
}

impl From<String> for Target {
    fn from(name: String) -> Self {
        Target::Named(name)
    }
}

impl From<Callable> for Target {
    fn from(callable: Callable) -> Self {
        Target::Direct(callable)
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Target::Named(name) => f.write_str(name),
            Target::Direct(_) => f.write_str("<direct>"),
        }
    }
}

/// Second phase of a two-phase call.
#[derive(Clone, Debug)]
pub struct Continuation {
    pub callable: Callable,
    /// Placed before the primary call's results.
    pub args: Vec<Value>,
}

/// One unit of work submitted to a worker or job group.
#[derive(Clone, Debug)]
pub struct Task {
    pub target: Target,
    pub args: Vec<Value>,
    /// Invoke through the fixed calling convention only.
    pub strict: bool,
    pub continuation: Option<Continuation>,
}

impl Task {
    pub fn new(target: impl Into<Target>, args: Vec<Value>) -> Self {
        Self {
            target: target.into(),
            args,
            strict: false,
            continuation: None,
        }
    }

    pub fn strict(mut self) -> Self {
        self.strict = true;
        self
    }

    /// Run `callable` after the primary call with `args` followed by the
    /// primary call's results. Strict tasks never run a continuation.
    pub fn then(mut self, callable: Callable, args: Vec<Value>) -> Self {
        self.continuation = Some(Continuation { callable, args });
        self
    }

    /// Human-readable description used in failure records.
    pub fn describe(&self) -> String {
        let mode = if self.strict { "strict" } else { "dynamic" };
        match &self.continuation {
            Some(_) => format!("{}{:?} [{mode}, with continuation]", self.target, self.args),
            None => format!("{}{:?} [{mode}]", self.target, self.args),
        }
    }
}
