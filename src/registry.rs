//! Operator registry
//!
//! The control-flow engine never looks inside a compute operator. It finds
//! the operator's kernel by type name to run it, and the operator's gradient
//! maker by the same name to differentiate it.
//!
//! # Registering an operator
//!
//! ```ignore
//! let mut registry = OperatorRegistry::new();
//! registry.register("Double", |_op: &ComputeOp, inputs: &[&Val]| {
//!     let x = inputs[0].as_f64().unwrap_or_default();
//!     Ok(vec![Val::Num(2.0 * x)])
//! }, None);
//! ```

use std::collections::HashMap;

use crate::errors::{GradientError, KernelError};
use crate::types::{ComputeOp, Val};

/* ===================== Traits ===================== */

/// Forward computation of a registered operator
pub trait Kernel: Send + Sync {
    /// Compute output values from input values, in declared order
    fn run(&self, op: &ComputeOp, inputs: &[&Val]) -> Result<Vec<Val>, KernelError>;
}

impl<F> Kernel for F
where
    F: Fn(&ComputeOp, &[&Val]) -> Result<Vec<Val>, KernelError> + Send + Sync,
{
    fn run(&self, op: &ComputeOp, inputs: &[&Val]) -> Result<Vec<Val>, KernelError> {
        self(op, inputs)
    }
}

/// Operators emitted for one forward operator during the gradient pass
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GradientSpec {
    /// Gradient operators, run in order
    pub ops: Vec<ComputeOp>,
    /// `produces[i]` is true when `input_grads[i]` is written by `ops`
    pub produces: Vec<bool>,
}

/// Builds the gradient operators of a forward operator.
///
/// `output_grads[i]` names the blob holding the gradient of `op.outputs[i]`;
/// the maker writes the gradient of `op.inputs[j]` into `input_grads[j]` for
/// every input it differentiates.
pub trait GradientMaker: Send + Sync {
    fn make(
        &self,
        op: &ComputeOp,
        output_grads: &[String],
        input_grads: &[String],
    ) -> Result<GradientSpec, GradientError>;
}

impl<F> GradientMaker for F
where
    F: Fn(&ComputeOp, &[String], &[String]) -> Result<GradientSpec, GradientError> + Send + Sync,
{
    fn make(
        &self,
        op: &ComputeOp,
        output_grads: &[String],
        input_grads: &[String],
    ) -> Result<GradientSpec, GradientError> {
        self(op, output_grads, input_grads)
    }
}

/* ===================== Registry ===================== */

struct Entry {
    kernel: Box<dyn Kernel>,
    gradient: Option<Box<dyn GradientMaker>>,
}

/// Operator type name to kernel and optional gradient maker
#[derive(Default)]
pub struct OperatorRegistry {
    entries: HashMap<String, Entry>,
}

impl OperatorRegistry {
    /// Empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry preloaded with the standard library
    pub fn with_stdlib() -> Self {
        let mut registry = Self::new();
        crate::stdlib::register_all(&mut registry);
        registry
    }

    /// Register (or replace) an operator type
    pub fn register(
        &mut self,
        op_type: impl Into<String>,
        kernel: impl Kernel + 'static,
        gradient: Option<Box<dyn GradientMaker>>,
    ) {
        self.entries.insert(
            op_type.into(),
            Entry {
                kernel: Box::new(kernel),
                gradient,
            },
        );
    }

    pub fn kernel(&self, op_type: &str) -> Option<&dyn Kernel> {
        self.entries.get(op_type).map(|e| e.kernel.as_ref())
    }

    pub fn gradient(&self, op_type: &str) -> Option<&dyn GradientMaker> {
        self.entries
            .get(op_type)
            .and_then(|e| e.gradient.as_deref())
    }

    pub fn contains(&self, op_type: &str) -> bool {
        self.entries.contains_key(op_type)
    }

    /// Registered type names, sorted (useful for documentation)
    pub fn op_types(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.entries.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}

impl std::fmt::Debug for OperatorRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OperatorRegistry")
            .field("op_types", &self.op_types())
            .finish()
    }
}
