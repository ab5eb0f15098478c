//! Forward-net preparation and scope pruning

use std::collections::{BTreeSet, HashMap};

use super::{unary, GradientBuilder};
use crate::types::{BlobBinding, Net, Operator};

impl GradientBuilder<'_> {
    /// Rewrite `ops` so every control operator records into its own scope and
    /// no operator's inputs or outputs are clobbered before the backward pass
    /// reads them.
    pub(super) fn prepare_ops(&mut self, ops: &[Operator]) -> Vec<Operator> {
        // clobbered[i]: names written by ops[i..]
        let mut clobbered = vec![BTreeSet::new(); ops.len() + 1];
        for (i, op) in ops.iter().enumerate().rev() {
            let mut names = clobbered[i + 1].clone();
            names.extend(op.writes());
            clobbered[i] = names;
        }

        let mut out = Vec::with_capacity(ops.len());
        for (i, op) in ops.iter().enumerate() {
            match op {
                Operator::Compute(compute) => {
                    let mut compute = compute.clone();
                    let mut saved: HashMap<String, String> = HashMap::new();
                    for input in compute.inputs.iter_mut() {
                        if !clobbered[i].contains(input.as_str()) {
                            continue;
                        }
                        let copy = match saved.get(input.as_str()) {
                            Some(copy) => copy.clone(),
                            None => {
                                let copy = self.fresh_saved(input);
                                out.push(unary("Copy", input, &copy));
                                saved.insert(input.clone(), copy.clone());
                                copy
                            }
                        };
                        *input = copy;
                    }

                    let mut restore = Vec::new();
                    for output in compute.outputs.iter_mut() {
                        if clobbered[i + 1].contains(output.as_str()) {
                            let copy = self.fresh_saved(output);
                            restore.push(unary("Copy", &copy, output));
                            *output = copy;
                        }
                    }

                    out.push(Operator::Compute(compute));
                    out.extend(restore);
                }

                Operator::If {
                    cond,
                    then_net,
                    else_net,
                    isolated,
                    ..
                } => {
                    let cond = if clobbered[i].contains(cond) {
                        let copy = self.fresh_saved(cond);
                        out.push(unary("Copy", cond, &copy));
                        copy
                    } else {
                        cond.clone()
                    };
                    let scope = self.fresh_scope("if");
                    out.push(Operator::If {
                        cond,
                        then_net: self.prepare_net(then_net),
                        else_net: else_net.as_ref().map(|net| self.prepare_net(net)),
                        isolated: *isolated,
                        scope: Some(scope),
                    });
                }

                Operator::While {
                    cond_net,
                    cond,
                    body,
                    isolated,
                    ..
                } => {
                    let scope = self.fresh_scope("while");
                    out.push(Operator::While {
                        cond_net: cond_net.clone(),
                        cond: cond.clone(),
                        body: self.prepare_net(body),
                        isolated: *isolated,
                        scope: Some(scope),
                    });
                }

                Operator::Do { net, blob_map, .. } => {
                    let mark = self.generated_scopes.len();
                    let net = self.prepare_net(net);
                    // Nested scopes live in the outer workspace; hand them in
                    let mut blob_map = blob_map.clone();
                    for nested in &self.generated_scopes[mark..] {
                        blob_map.push(BlobBinding::input(nested.clone(), nested.clone()));
                    }
                    let scope = self.fresh_scope("do");
                    out.push(Operator::Do {
                        net,
                        blob_map,
                        scope: Some(scope),
                    });
                }

                other => out.push(other.clone()),
            }
        }
        out
    }

    fn prepare_net(&mut self, net: &Net) -> Net {
        Net::new(net.name.clone(), self.prepare_ops(&net.ops))
    }

    /// Drop generated scopes no `Replay` consumes, along with their
    /// `CreateScope` operators and `Do` bindings
    pub(super) fn prune(&self, ops: Vec<Operator>) -> Vec<Operator> {
        ops.into_iter()
            .filter(|op| match op {
                Operator::CreateScope { output } => !self.is_unused(output),
                _ => true,
            })
            .map(|op| self.prune_op(op))
            .collect()
    }

    fn is_unused(&self, scope: &str) -> bool {
        self.generated_scopes.iter().any(|s| s == scope) && !self.used_scopes.contains(scope)
    }

    fn prune_scope(&self, scope: Option<String>) -> Option<String> {
        scope.filter(|s| !self.is_unused(s))
    }

    fn prune_net(&self, net: Net) -> Net {
        Net {
            ops: self.prune(net.ops),
            ..net
        }
    }

    fn prune_op(&self, op: Operator) -> Operator {
        match op {
            Operator::If {
                cond,
                then_net,
                else_net,
                isolated,
                scope,
            } => Operator::If {
                cond,
                then_net: self.prune_net(then_net),
                else_net: else_net.map(|net| self.prune_net(net)),
                isolated,
                scope: self.prune_scope(scope),
            },
            Operator::While {
                cond_net,
                cond,
                body,
                isolated,
                scope,
            } => Operator::While {
                cond_net,
                cond,
                body: self.prune_net(body),
                isolated,
                scope: self.prune_scope(scope),
            },
            Operator::Do {
                net,
                blob_map,
                scope,
            } => Operator::Do {
                net: self.prune_net(net),
                blob_map: blob_map
                    .into_iter()
                    .filter(|b| !(b.outer == b.inner && self.is_unused(&b.outer)))
                    .collect(),
                scope: self.prune_scope(scope),
            },
            other => other,
        }
    }
}
