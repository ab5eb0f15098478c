//! Error types
//!
//! Split by phase: construction (`BuildError`), execution (`ExecError`),
//! operator kernels (`KernelError`) and the gradient pass (`GradientError`).
//! Construction errors never yield a partial net; execution errors abort the
//! enclosing net run and surface to its caller.

use thiserror::Error;

/// Net construction failures, raised before anything executes
#[derive(Error, Debug, Clone, PartialEq)]
pub enum BuildError {
    /// Read of a name that was never bound in a visible scope
    #[error("undefined blob '{name}' read in block '{block}'")]
    UndefinedBlob { name: String, block: String },

    /// Use of a name whose binding block has already closed
    #[error("blob '{name}' is local to block '{owner}' and not visible in '{block}'")]
    ScopeViolation {
        name: String,
        owner: String,
        block: String,
    },

    /// Structurally invalid net (unbalanced blocks, bad bindings, ...)
    #[error("invalid net: {0}")]
    InvalidNet(String),
}

/// Errors produced by operator kernels
#[derive(Error, Debug, Clone, PartialEq)]
pub enum KernelError {
    #[error("expected {expected} inputs, got {found}")]
    Arity { expected: usize, found: usize },

    #[error("missing argument '{0}'")]
    MissingArg(String),

    #[error("type error: {0}")]
    Type(String),

    #[error("shape mismatch: {0}")]
    Shape(String),
}

/// Runtime failures
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ExecError {
    #[error("blob '{name}' not found in workspace")]
    BlobNotFound { name: String },

    /// Condition blob is not a single boolean-convertible scalar
    #[error("condition blob '{blob}' is not a boolean scalar (found {found})")]
    ConditionTypeError { blob: String, found: String },

    #[error("operator type '{0}' is not registered")]
    UnknownOperator(String),

    #[error("operator '{op_type}' failed: {source}")]
    Kernel {
        op_type: String,
        #[source]
        source: KernelError,
    },

    #[error("operator '{op_type}' produced {found} outputs, declared {expected}")]
    OutputArity {
        op_type: String,
        expected: usize,
        found: usize,
    },

    #[error("blob '{name}' does not hold a scope handle")]
    NotAScope { name: String },

    /// A replay asked for state the forward pass did not retain
    #[error("replay state missing in scope '{scope}'{}", iteration_suffix(.iteration))]
    ReplayStateMissing {
        scope: String,
        iteration: Option<usize>,
    },
}

fn iteration_suffix(iteration: &Option<usize>) -> String {
    iteration
        .map(|i| format!(" for iteration {i}"))
        .unwrap_or_default()
}

/// Gradient pass failures
#[derive(Error, Debug, Clone, PartialEq)]
pub enum GradientError {
    /// A forward operator on a differentiable path has no gradient maker
    #[error("no gradient registered for operator '{op_type}'")]
    GradientUnavailable { op_type: String },

    #[error("gradient maker for '{op_type}' failed: {message}")]
    Maker { op_type: String, message: String },

    /// A `While` condition block rewrites a blob whose gradient crosses
    /// loop iterations
    #[error("blob '{blob}' is rewritten by a While condition and carries a gradient")]
    LoopConditionWrite { blob: String },

    #[error(transparent)]
    Build(#[from] BuildError),
}

pub type BuildResult<T> = Result<T, BuildError>;
pub type ExecResult<T> = Result<T, ExecError>;
