use thiserror::Error;

/// Failure raised while binding arguments to, or running, a callable.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum CallError {
    #[error("arity mismatch: expected {expected} arguments, got {got}")]
    Arity { expected: usize, got: usize },

    #[error("argument {index}: expected {expected}, found {found}")]
    ArgType {
        index: usize,
        expected: &'static str,
        found: &'static str,
    },

    #[error("strict invocation requires a fixed-signature callable")]
    StrictMismatch,

    #[error("{0}")]
    Failed(String),
}
