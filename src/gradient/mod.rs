//! # Gradient Pass
//!
//! Turns a forward net into a single net that runs the forward computation,
//! records what its control operators did, and then walks everything backward
//! to produce `<blob>_grad` blobs.
//!
//! ## Phases
//!
//! 1. **Prepare** ([`forward`]): give every `If`/`While`/`Do` a recording
//!    scope, and copy aside any value an operator reads or writes that a later
//!    operator overwrites, so the backward pass sees the value the forward
//!    operator actually used.
//! 2. **Seed**: `OnesLike(target)` for every target blob.
//! 3. **Walk** ([`backward`]): reverse operator order. Compute operators go
//!    through their registered gradient makers. Control operators become
//!    `Replay` operators that pop the recorded state: once per `If`/`Do`
//!    execution, once per loop iteration (newest first) for `While`.
//! 4. **Finish**: copy each final gradient to its canonical `<blob>_grad`
//!    name, drop scopes nothing replays, and resolve the combined net.
//!
//! The reported gradient of a blob is the gradient with respect to the first
//! value it held in the net (the value fed or first assigned).

mod backward;
mod forward;


use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::errors::GradientError;
use crate::registry::OperatorRegistry;
use crate::resolver::{check_readable, resolve_net};
use crate::types::{ComputeOp, Net, Operator};

/// Blob name to the blob currently holding its gradient
type GradMap = BTreeMap<String, String>;

/// Blob name to the gradient of the earliest value the walk has passed;
/// `None` when that value reaches no target
type LastSeen = BTreeMap<String, Option<String>>;

/// What to do when an operator on a gradient path has no gradient maker
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MissingGradient {
    /// Abort with `GradientUnavailable`
    #[default]
    Fail,
    /// Treat the operator as blocking: no gradient flows to its inputs
    Zero,
}

/// Result of [`GradientBuilder::add_gradient_ops`]
#[derive(Debug, Clone, PartialEq)]
pub struct GradientPass {
    /// Forward plus backward operators, resolved
    pub net: Net,
    /// Blob name to the blob holding its gradient after `net` runs
    pub grad_map: BTreeMap<String, String>,
}

/// Canonical name of the gradient of `name`
pub fn grad_name(name: &str) -> String {
    format!("{name}_grad")
}

/// Single-input, single-output compute operator
fn unary(op_type: &str, input: &str, output: &str) -> Operator {
    Operator::Compute(ComputeOp::new(
        op_type,
        vec![input.to_string()],
        vec![output.to_string()],
    ))
}

/// Names containing this marker are generated by the gradient pass
const GENERATED: char = '@';

pub struct GradientBuilder<'r> {
    registry: &'r OperatorRegistry,
    policy: MissingGradient,
    counter: usize,
    /// Scopes created while preparing the forward net, in creation order
    generated_scopes: Vec<String>,
    /// Scopes some `Replay` consumes
    used_scopes: BTreeSet<String>,
}

impl<'r> GradientBuilder<'r> {
    pub fn new(registry: &'r OperatorRegistry) -> Self {
        Self {
            registry,
            policy: MissingGradient::default(),
            counter: 0,
            generated_scopes: Vec::new(),
            used_scopes: BTreeSet::new(),
        }
    }

    pub fn with_policy(mut self, policy: MissingGradient) -> Self {
        self.policy = policy;
        self
    }

    fn next_id(&mut self) -> usize {
        let id = self.counter;
        self.counter += 1;
        id
    }

    /// Fresh blob for an intermediate gradient of `name`
    fn fresh_grad(&mut self, name: &str) -> String {
        let id = self.next_id();
        format!("{name}_grad{GENERATED}{id}")
    }

    /// Fresh blob holding a copy of `name` taken before it is overwritten
    fn fresh_saved(&mut self, name: &str) -> String {
        let id = self.next_id();
        format!("{name}{GENERATED}saved{id}")
    }

    fn fresh_scope(&mut self, kind: &str) -> String {
        let id = self.next_id();
        let name = format!("{kind}{GENERATED}scope{id}");
        self.generated_scopes.push(name.clone());
        name
    }

    /// Build the combined forward + backward net for `targets`.
    ///
    /// `net` must be resolved (built by `NetBuilder` or passed through
    /// `resolve_net`); its external names are taken as the names the driver
    /// feeds.
    pub fn add_gradient_ops(mut self, net: &Net, targets: &[&str]) -> Result<GradientPass, GradientError> {
        let initial: Vec<String> = net.externals().into_iter().collect();
        let resolved = resolve_net(net, &initial)?;

        // Phase 1
        let prepared = self.prepare_ops(&resolved.ops);
        let mut ops: Vec<Operator> = self
            .generated_scopes
            .iter()
            .map(|scope| Operator::CreateScope {
                output: scope.clone(),
            })
            .collect();
        ops.extend(prepared);
        let forward = resolve_net(&Net::new(net.name.clone(), ops), &initial)?;

        // Phase 2
        check_readable(&resolved, &initial, targets)?;
        let mut backward = Vec::new();
        let mut current = GradMap::new();
        for &target in targets {
            if current.contains_key(target) {
                continue;
            }
            let seed = self.fresh_grad(target);
            backward.push(unary("OnesLike", target, &seed));
            current.insert(target.to_string(), seed);
        }

        // Phase 3
        let mut last_seen = LastSeen::new();
        self.backward(&forward.ops, &mut current, &mut last_seen, &mut backward)?;

        // Phase 4
        let fed: BTreeSet<&str> = initial.iter().map(String::as_str).collect();
        let mut names: BTreeSet<&String> = current.keys().collect();
        names.extend(last_seen.keys());
        let mut grad_map = BTreeMap::new();
        for name in names {
            if name.contains(GENERATED) {
                continue;
            }
            let dst = grad_name(name);
            let src = match (current.get(name), last_seen.get(name)) {
                (Some(grad), _) => Some(grad),
                // First assigned by the net; that assignment is the first value
                (None, Some(Some(grad))) if !fed.contains(name.as_str()) => Some(grad),
                // The first value was overwritten before reaching a target
                _ => None,
            };
            match src {
                Some(src) if *src == dst => {}
                Some(src) => backward.push(unary("Copy", src, &dst)),
                None => backward.push(unary("ZerosLike", name, &dst)),
            }
            grad_map.insert(name.clone(), dst);
        }

        let mut ops = self.prune(forward.ops);
        ops.extend(backward);
        let combined = resolve_net(&Net::new(net.name.clone(), ops), &initial)?;

        debug!(
            net = %net.name,
            targets = ?targets,
            scopes = self.used_scopes.len(),
            gradients = grad_map.len(),
            ops = combined.ops.len(),
            "gradient ops added"
        );
        Ok(GradientPass {
            net: combined,
            grad_map,
        })
    }
}

/// `GradientBuilder::new(registry).with_policy(policy).add_gradient_ops(net, targets)`
pub fn add_gradient_ops(
    registry: &OperatorRegistry,
    net: &Net,
    targets: &[&str],
    policy: MissingGradient,
) -> Result<GradientPass, GradientError> {
    GradientBuilder::new(registry)
        .with_policy(policy)
        .add_gradient_ops(net, targets)
}
