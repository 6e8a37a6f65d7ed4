//! Top-level error types.
//!
//! One enum per pipeline stage with hand-written `Display`/`Error` impls
//! and `From` conversions composing into a single top-level type.

use std::fmt;

use crate::{parser::ParseError, resource::ResourceError, value::Value};

/// A runtime error kind, distinct from a recoverable call failure (a call
/// simply returning `false`/`null`). Every variant here unwinds to the
/// outermost `call`.
#[derive(Debug, Clone)]
pub enum StepError {
    /// Lookup of a state element never set and with no default.
    UndefinedVariable { name: String },
    /// Arity mismatch at a call site.
    ArgumentCount {
        task: String,
        expected: usize,
        found: usize,
    },
    /// A value does not satisfy a primitive's type expectation.
    ArgumentType {
        task: String,
        expected: &'static str,
        found: &'static str,
    },
    /// A primitive required an argument to be ground, but it wasn't.
    ArgumentInstantiation { task: String },
    /// A non-fallible task failed (no method matched and it lacks
    /// `[fallible]`, or `ExactlyOnce`'s inner call failed).
    CallFailed { task: String, args: Vec<Value> },
    /// Raised by `Throw` with a rendered message.
    UserThrow { message: String },
    /// Like `UserThrow` but the stack trace is suppressed when reported.
    BailOut { message: String },
    /// Call-frame depth exceeded the configured limit.
    StackOverflow { limit: usize },
    /// The search-limit counter reached zero.
    StepTaskTimeout,
}

impl fmt::Display for StepError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UndefinedVariable { name } => write!(f, "undefined variable: {name}"),
            Self::ArgumentCount { task, expected, found } => {
                write!(f, "{task}: expected {expected} argument(s), found {found}")
            }
            Self::ArgumentType { task, expected, found } => {
                write!(f, "{task}: expected {expected}, found {found}")
            }
            Self::ArgumentInstantiation { task } => write!(f, "{task}: argument must be ground"),
            Self::CallFailed { task, args } => write!(f, "call to {task} failed with args {args:?}"),
            Self::UserThrow { message } => write!(f, "{message}"),
            Self::BailOut { message } => write!(f, "{message}"),
            Self::StackOverflow { limit } => write!(f, "stack overflow: depth exceeded {limit}"),
            Self::StepTaskTimeout => write!(f, "search limit exhausted"),
        }
    }
}

impl std::error::Error for StepError {}

impl From<ResourceError> for StepError {
    fn from(error: ResourceError) -> Self {
        match error {
            ResourceError::SearchLimitExhausted => Self::StepTaskTimeout,
            ResourceError::StackOverflow { limit } => Self::StackOverflow { limit },
        }
    }
}

/// The error type returned by [`crate::module::Module`] and
/// [`crate::engine::Engine`] APIs, composing parse-time and run-time
/// failures into one type.
#[derive(Debug, Clone)]
pub enum StepRuntimeError {
    Parse(ParseError),
    Runtime(StepError),
}

impl fmt::Display for StepRuntimeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Parse(e) => write!(f, "parse error: {e}"),
            Self::Runtime(e) => write!(f, "{e}"),
        }
    }
}

impl std::error::Error for StepRuntimeError {}

impl From<ParseError> for StepRuntimeError {
    fn from(error: ParseError) -> Self {
        Self::Parse(error)
    }
}

impl From<StepError> for StepRuntimeError {
    fn from(error: StepError) -> Self {
        Self::Runtime(error)
    }
}
