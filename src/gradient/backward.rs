//! Reverse walk over a prepared forward net
//!
//! `current` maps each blob to the blob holding its gradient at the current
//! point of the walk. A blob that is overwritten going forward leaves
//! `current` when the walk passes the overwriting operator; `last_seen` then
//! records the gradient of the value that operator wrote, or `None` when that
//! value reaches no target.
//!
//! Control operators are differentiated block by block. The blobs whose
//! gradients cross a block boundary always travel under their canonical
//! `<blob>_grad` names, so one replay iteration hands its result to the next
//! through the same blobs.

use std::collections::BTreeSet;

use tracing::{debug, trace};

use super::{grad_name, unary, GradMap, GradientBuilder, LastSeen, MissingGradient};
use crate::errors::GradientError;
use crate::types::{BlobBinding, ComputeOp, Net, Operator, ReplayMode};

/// The walk passes an operator that writes `name`
fn retire(name: &str, current: &mut GradMap, last_seen: &mut LastSeen) {
    match current.remove(name) {
        Some(grad) => {
            last_seen.insert(name.to_string(), Some(grad));
        }
        None => {
            if let Some(seen) = last_seen.get_mut(name) {
                *seen = None;
            }
        }
    }
}

/// The condition block of a `While` is not replayed, so no gradient may pass
/// through a blob it rewrites
fn check_condition_writes(
    cond_net: &Net,
    current: &GradMap,
    crossing: &BTreeSet<String>,
) -> Result<(), GradientError> {
    match cond_net
        .external_outputs
        .iter()
        .find(|name| current.contains_key(*name) || crossing.contains(*name))
    {
        Some(blob) => Err(GradientError::LoopConditionWrite { blob: blob.clone() }),
        None => Ok(()),
    }
}

/// Gradient of one block, before it is wrapped in a `Replay`
struct BlockGradient {
    ops: Vec<Operator>,
    current: GradMap,
    /// External names of the block that leave it with a gradient
    produced: BTreeSet<String>,
}

impl GradientBuilder<'_> {
    pub(super) fn backward(
        &mut self,
        ops: &[Operator],
        current: &mut GradMap,
        last_seen: &mut LastSeen,
        out: &mut Vec<Operator>,
    ) -> Result<(), GradientError> {
        for op in ops.iter().rev() {
            match op {
                Operator::Compute(compute) => {
                    self.compute_gradient(compute, current, last_seen, out)?
                }
                Operator::If {
                    cond,
                    then_net,
                    else_net,
                    scope: Some(scope),
                    ..
                } => self.if_gradient(cond, then_net, else_net.as_ref(), scope, current, out)?,
                Operator::While {
                    cond_net,
                    body,
                    scope: Some(scope),
                    ..
                } => self.while_gradient(cond_net, body, scope, current, out)?,
                Operator::Do {
                    net,
                    blob_map,
                    scope: Some(scope),
                } => self.do_gradient(net, blob_map, scope, current, last_seen, out)?,
                other => {
                    // Not differentiable: gradients stop at its outputs
                    for name in other.writes() {
                        retire(&name, current, last_seen);
                    }
                }
            }
        }
        Ok(())
    }

    /// Add `partial` into the gradient of `name`
    fn accumulate(
        &mut self,
        name: &str,
        partial: String,
        current: &mut GradMap,
        out: &mut Vec<Operator>,
    ) {
        match current.get(name) {
            Some(previous) => {
                let total = self.fresh_grad(name);
                out.push(Operator::Compute(ComputeOp::new(
                    "Sum",
                    vec![previous.clone(), partial],
                    vec![total.clone()],
                )));
                current.insert(name.to_string(), total);
            }
            None => {
                current.insert(name.to_string(), partial);
            }
        }
    }

    fn compute_gradient(
        &mut self,
        op: &ComputeOp,
        current: &mut GradMap,
        last_seen: &mut LastSeen,
        out: &mut Vec<Operator>,
    ) -> Result<(), GradientError> {
        let retire_outputs = |current: &mut GradMap, last_seen: &mut LastSeen| {
            for output in &op.outputs {
                retire(output, current, last_seen);
            }
        };

        if op.inputs.is_empty() || !op.outputs.iter().any(|o| current.contains_key(o)) {
            retire_outputs(current, last_seen);
            return Ok(());
        }

        let registry = self.registry;
        let Some(maker) = registry.gradient(&op.op_type) else {
            return match self.policy {
                MissingGradient::Fail => Err(GradientError::GradientUnavailable {
                    op_type: op.op_type.clone(),
                }),
                MissingGradient::Zero => {
                    debug!(op = %op.op_type, "no gradient registered, blocking");
                    retire_outputs(current, last_seen);
                    Ok(())
                }
            };
        };

        let mut output_grads = Vec::with_capacity(op.outputs.len());
        for output in &op.outputs {
            let grad = match current.get(output) {
                Some(grad) => grad.clone(),
                None => {
                    let zero = self.fresh_grad(output);
                    out.push(unary("ZerosLike", output, &zero));
                    zero
                }
            };
            output_grads.push(grad);
        }
        retire_outputs(current, last_seen);

        let input_grads: Vec<String> = op.inputs.iter().map(|i| self.fresh_grad(i)).collect();
        let spec = maker.make(op, &output_grads, &input_grads)?;
        trace!(op = %op.op_type, grad_ops = spec.ops.len(), "gradient");
        out.extend(spec.ops.into_iter().map(Operator::Compute));

        for (j, (input, grad)) in op.inputs.iter().zip(input_grads).enumerate() {
            if spec.produces.get(j).copied().unwrap_or(false) {
                self.accumulate(input, grad, current, out);
            }
        }
        Ok(())
    }

    /* ===================== Blocks ===================== */

    /// Walk `net` backward with canonical gradients of `incoming` flowing in
    fn block_gradient(
        &mut self,
        net: &Net,
        incoming: &BTreeSet<String>,
    ) -> Result<BlockGradient, GradientError> {
        let mut current: GradMap = incoming
            .iter()
            .map(|name| (name.clone(), grad_name(name)))
            .collect();
        let mut last_seen = LastSeen::new();
        let mut ops = Vec::new();
        self.backward(&net.ops, &mut current, &mut last_seen, &mut ops)?;

        let externals = net.externals();
        let produced = current
            .keys()
            .filter(|name| externals.contains(*name))
            .cloned()
            .collect();
        Ok(BlockGradient {
            ops,
            current,
            produced,
        })
    }

    /// Leave the gradient of every name in `crossing` under its canonical
    /// name; a name overwritten by the block without a gradient gets zero.
    fn finish_block(&self, name: &str, block: BlockGradient, crossing: &BTreeSet<String>) -> Net {
        let mut ops = block.ops;
        for blob in crossing {
            let canonical = grad_name(blob);
            match block.current.get(blob) {
                Some(grad) if *grad == canonical => {}
                Some(grad) => ops.push(unary("Copy", grad, &canonical)),
                None => ops.push(unary("ZerosLike", blob, &canonical)),
            }
        }
        Net::new(name, ops)
    }

    /// Before a block gradient: move incoming gradients to their canonical
    /// names and zero-fill the ones only the block produces
    fn canonicalize(
        &self,
        incoming: &BTreeSet<String>,
        crossing: &BTreeSet<String>,
        current: &GradMap,
        out: &mut Vec<Operator>,
    ) {
        for blob in crossing {
            let canonical = grad_name(blob);
            match current.get(blob) {
                Some(grad) if incoming.contains(blob) => {
                    if *grad != canonical {
                        out.push(unary("Copy", grad, &canonical));
                    }
                }
                _ => out.push(unary("ZerosLike", blob, &canonical)),
            }
        }
    }

    fn replay(
        &mut self,
        scope: &str,
        body: Net,
        mode: ReplayMode,
        restores: Vec<String>,
        crossing: &BTreeSet<String>,
    ) -> Operator {
        self.used_scopes.insert(scope.to_string());
        Operator::Replay {
            scope: scope.to_string(),
            body,
            mode,
            restores,
            blob_map: crossing
                .iter()
                .map(|blob| BlobBinding::in_out(grad_name(blob), grad_name(blob)))
                .collect(),
        }
    }

    /* ===================== Control Operators ===================== */

    fn if_gradient(
        &mut self,
        cond: &str,
        then_net: &Net,
        else_net: Option<&Net>,
        scope: &str,
        current: &mut GradMap,
        out: &mut Vec<Operator>,
    ) -> Result<(), GradientError> {
        let empty = Net::default();
        let else_net = else_net.unwrap_or(&empty);

        let mut externals = then_net.externals();
        externals.extend(else_net.externals());
        let incoming: BTreeSet<String> = current
            .keys()
            .filter(|name| externals.contains(*name))
            .cloned()
            .collect();
        if incoming.is_empty() {
            return Ok(());
        }

        let then_grad = self.block_gradient(then_net, &incoming)?;
        let else_grad = self.block_gradient(else_net, &incoming)?;
        let mut crossing = incoming.clone();
        crossing.extend(then_grad.produced.iter().cloned());
        crossing.extend(else_grad.produced.iter().cloned());

        self.canonicalize(&incoming, &crossing, current, out);
        let then_body = self.finish_block("then_grad", then_grad, &crossing);
        let else_body = self.finish_block("else_grad", else_grad, &crossing);
        let then_replay = self.replay(scope, then_body, ReplayMode::Block, then_net.snapshot_names(), &crossing);
        let else_replay = self.replay(scope, else_body, ReplayMode::Block, else_net.snapshot_names(), &crossing);

        debug!(scope, crossing = ?crossing, "If gradient");
        out.push(Operator::If {
            cond: cond.to_string(),
            then_net: Net::new("then", vec![then_replay]),
            else_net: Some(Net::new("else", vec![else_replay])),
            isolated: false,
            scope: None,
        });

        for blob in crossing {
            let canonical = grad_name(&blob);
            current.insert(blob, canonical);
        }
        Ok(())
    }

    fn while_gradient(
        &mut self,
        cond_net: &Net,
        body: &Net,
        scope: &str,
        current: &mut GradMap,
        out: &mut Vec<Operator>,
    ) -> Result<(), GradientError> {
        let externals = body.externals();
        let incoming: BTreeSet<String> = current
            .keys()
            .filter(|name| externals.contains(*name))
            .cloned()
            .collect();
        if incoming.is_empty() {
            return check_condition_writes(cond_net, current, &incoming);
        }

        // A gradient produced by one iteration flows into the previous one,
        // so iterate until the crossing set stops growing
        let mut crossing = incoming.clone();
        let body_grad = loop {
            let grad = self.block_gradient(body, &crossing)?;
            if grad.produced.is_subset(&crossing) {
                break grad;
            }
            crossing.extend(grad.produced.iter().cloned());
        };

        check_condition_writes(cond_net, current, &crossing)?;

        self.canonicalize(&incoming, &crossing, current, out);
        let replay_body = self.finish_block("body_grad", body_grad, &crossing);
        debug!(scope, crossing = ?crossing, "While gradient");
        let replay = self.replay(scope, replay_body, ReplayMode::Loop, body.snapshot_names(), &crossing);
        out.push(replay);

        for blob in crossing {
            let canonical = grad_name(&blob);
            current.insert(blob, canonical);
        }
        Ok(())
    }

    fn do_gradient(
        &mut self,
        net: &Net,
        blob_map: &[BlobBinding],
        scope: &str,
        current: &mut GradMap,
        last_seen: &mut LastSeen,
        out: &mut Vec<Operator>,
    ) -> Result<(), GradientError> {
        let outputs: Vec<&BlobBinding> = blob_map
            .iter()
            .filter(|b| b.direction.is_output() && current.contains_key(&b.outer))
            .collect();
        if outputs.is_empty() {
            for binding in blob_map.iter().filter(|b| b.direction.is_output()) {
                retire(&binding.outer, current, last_seen);
            }
            return Ok(());
        }

        let incoming: BTreeSet<String> = outputs.iter().map(|b| b.inner.clone()).collect();
        let inner = self.block_gradient(net, &incoming)?;
        let mut ops = inner.ops;
        let mut replay_map = Vec::new();

        for binding in &outputs {
            if let Some(grad) = current.get(&binding.outer) {
                replay_map.push(BlobBinding::input(grad.clone(), grad_name(&binding.inner)));
            }
        }
        for binding in blob_map.iter().filter(|b| b.direction.is_output()) {
            retire(&binding.outer, current, last_seen);
        }

        let mut flows = Vec::new();
        let mut restores: BTreeSet<String> = net.snapshot_names().into_iter().collect();
        for binding in blob_map.iter().filter(|b| b.direction.is_input()) {
            restores.insert(binding.inner.clone());
            let Some(grad) = inner.current.get(&binding.inner) else {
                continue;
            };
            let canonical = grad_name(&binding.inner);
            if *grad != canonical {
                ops.push(unary("Copy", grad, &canonical));
            }
            let outer_grad = self.fresh_grad(&binding.outer);
            replay_map.push(BlobBinding::output(canonical, outer_grad.clone()));
            flows.push((binding.outer.clone(), outer_grad));
        }

        debug!(scope, flows = flows.len(), "Do gradient");
        self.used_scopes.insert(scope.to_string());
        out.push(Operator::Replay {
            scope: scope.to_string(),
            body: Net::new("do_grad", ops),
            mode: ReplayMode::Block,
            restores: restores.into_iter().collect(),
            blob_map: replay_map,
        });

        for (outer, grad) in flows {
            self.accumulate(&outer, grad, current, out);
        }
        Ok(())
    }
}
