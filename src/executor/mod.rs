//! # Net Executor
//!
//! Runs a resolved net against a `Workspace`, one operator at a time.
//!
//! ## Core Principles
//!
//! 1. **Synchronous**: every control operator returns only after its sub-net
//!    has completed or failed
//! 2. **Registry-driven**: compute operators are opaque and dispatched by type
//!    name through the `OperatorRegistry`
//! 3. **Fail fast**: the first error aborts the net and surfaces to the caller;
//!    nothing after the failing operator is committed
//!
//! Control-flow operators live in [`control`], gradient replay in [`replay`].

pub mod control;
pub mod replay;

#[cfg(test)]
mod tests;

use tracing::{debug_span, trace};

use crate::errors::{ExecError, ExecResult};
use crate::registry::OperatorRegistry;
use crate::types::{ComputeOp, Net, Operator, ScopeRef, Val};
use crate::workspace::Workspace;

/// Interpreter for nets, borrowing the operator registry
#[derive(Debug, Clone, Copy)]
pub struct Executor<'r> {
    registry: &'r OperatorRegistry,
    /// Per-record cap on retained loop snapshots (`None` keeps everything)
    retention: Option<usize>,
}

impl<'r> Executor<'r> {
    pub fn new(registry: &'r OperatorRegistry) -> Self {
        Self {
            registry,
            retention: None,
        }
    }

    pub fn with_retention(mut self, max_loop_snapshots: Option<usize>) -> Self {
        self.retention = max_loop_snapshots;
        self
    }

    pub fn registry(&self) -> &'r OperatorRegistry {
        self.registry
    }

    /// Run every operator of `net` in order against `ws`
    pub fn run_net(&self, net: &Net, ws: &mut Workspace<'_>) -> ExecResult<()> {
        let span = debug_span!("net", name = %net.name, depth = ws.depth());
        let _enter = span.enter();

        for op in &net.ops {
            self.run_op(op, ws)?;
        }
        Ok(())
    }

    fn run_op(&self, op: &Operator, ws: &mut Workspace<'_>) -> ExecResult<()> {
        match op {
            Operator::Compute(compute) => self.run_compute(compute, ws),
            Operator::If {
                cond,
                then_net,
                else_net,
                isolated,
                scope,
            } => self.run_if(cond, then_net, else_net.as_ref(), *isolated, scope.as_deref(), ws),
            Operator::While {
                cond_net,
                cond,
                body,
                isolated,
                scope,
            } => self.run_while(cond_net, cond, body, *isolated, scope.as_deref(), ws),
            Operator::Do {
                net,
                blob_map,
                scope,
            } => self.run_do(net, blob_map, scope.as_deref(), ws),
            Operator::CreateScope { output } => {
                ws.set(output.clone(), Val::Scope(ScopeRef::new()));
                Ok(())
            }
            Operator::HasScope { scope, output } => {
                let handle = ws.scope(scope)?;
                ws.set(output.clone(), Val::Bool(!handle.is_empty()));
                Ok(())
            }
            Operator::Replay {
                scope,
                body,
                mode,
                restores,
                blob_map,
            } => self.run_replay(scope, body, *mode, restores, blob_map, ws),
        }
    }

    fn run_compute(&self, op: &ComputeOp, ws: &mut Workspace<'_>) -> ExecResult<()> {
        let kernel = self
            .registry
            .kernel(&op.op_type)
            .ok_or_else(|| ExecError::UnknownOperator(op.op_type.clone()))?;

        let inputs = op
            .inputs
            .iter()
            .map(|name| ws.get(name))
            .collect::<ExecResult<Vec<&Val>>>()?;

        let outputs = kernel
            .run(op, &inputs)
            .map_err(|source| ExecError::Kernel {
                op_type: op.op_type.clone(),
                source,
            })?;

        if outputs.len() != op.outputs.len() {
            return Err(ExecError::OutputArity {
                op_type: op.op_type.clone(),
                expected: op.outputs.len(),
                found: outputs.len(),
            });
        }

        trace!(op = %op.op_type, outputs = ?op.outputs, "compute");
        for (name, value) in op.outputs.iter().zip(outputs) {
            ws.set(name.clone(), value);
        }
        Ok(())
    }
}
