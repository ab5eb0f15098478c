//! Scope Resolver
//!
//! Construction-time symbol table enforcing lexical blob visibility.
//!
//! Every block (net, branch, loop condition, loop body, `Do` body, replay
//! body) opens a frame. A write to a name that is visible from the current
//! frame is an update of the existing binding; a write to an invisible name
//! binds a new local in the current frame. When a frame closes its locals are
//! retired: later reads report `ScopeViolation` instead of `UndefinedBlob`.
//!
//! ```text
//! <initial>   x
//!   net       y = f(x)          x: external input, y: local
//!     then    x = g(y); t = ..  x: external output, y: external input, t: local
//!   net       h(t)              ScopeViolation (t is local to 'then')
//! ```

pub mod builder;

#[cfg(test)]
mod tests;

use std::collections::{BTreeSet, HashMap, HashSet};

use tracing::trace;

use crate::errors::{BuildError, BuildResult};
use crate::types::{BlobBinding, Net, Operator};

pub use builder::NetBuilder;

/// Label of the frame holding the names visible before the net starts
const INITIAL_FRAME: &str = "<initial>";

// ============================================================================
// Frames
// ============================================================================

#[derive(Debug)]
struct Frame {
    label: String,
    /// Locals in binding order
    locals: Vec<String>,
    local_set: HashSet<String>,
    reads_outer: BTreeSet<String>,
    writes_outer: BTreeSet<String>,
}

impl Frame {
    fn new(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            locals: Vec::new(),
            local_set: HashSet::new(),
            reads_outer: BTreeSet::new(),
            writes_outer: BTreeSet::new(),
        }
    }

    fn bind(&mut self, name: &str) {
        if self.local_set.insert(name.to_string()) {
            self.locals.push(name.to_string());
        }
    }
}

/// Classification of the names a closed block touched
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BlockScope {
    pub locals: Vec<String>,
    pub external_inputs: Vec<String>,
    pub external_outputs: Vec<String>,
}

impl BlockScope {
    /// Build an annotated net from this classification
    pub fn into_net(self, name: impl Into<String>, ops: Vec<Operator>) -> Net {
        Net {
            name: name.into(),
            ops,
            locals: self.locals,
            external_inputs: self.external_inputs,
            external_outputs: self.external_outputs,
        }
    }
}

// ============================================================================
// Resolver
// ============================================================================

/// Stack of open blocks plus the record of retired locals
#[derive(Debug)]
pub struct ScopeResolver {
    frames: Vec<Frame>,
    /// Retired local name -> label of the block that owned it
    retired: HashMap<String, String>,
}

impl ScopeResolver {
    /// Resolver whose outermost frame already binds `initial_scope`; the net
    /// itself is the first open block, labelled `net_name`.
    pub fn new<I, S>(initial_scope: I, net_name: &str) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut initial = Frame::new(INITIAL_FRAME);
        for name in initial_scope {
            initial.bind(name.as_ref());
        }
        Self {
            frames: vec![initial, Frame::new(net_name)],
            retired: HashMap::new(),
        }
    }

    /// Label of the innermost open block
    pub fn current_block(&self) -> &str {
        self.frames
            .last()
            .map(|f| f.label.as_str())
            .unwrap_or(INITIAL_FRAME)
    }

    /// Number of open blocks, the net itself included
    pub fn depth(&self) -> usize {
        self.frames.len() - 1
    }

    fn owner(&self, name: &str) -> Option<usize> {
        self.frames.iter().rposition(|f| f.local_set.contains(name))
    }

    pub fn is_visible(&self, name: &str) -> bool {
        self.owner(name).is_some()
    }

    /// Record a read; the name must be visible from the current block
    pub fn read(&mut self, name: &str) -> BuildResult<()> {
        match self.owner(name) {
            Some(idx) => {
                for frame in &mut self.frames[idx + 1..] {
                    frame.reads_outer.insert(name.to_string());
                }
                Ok(())
            }
            None => Err(self.invisible(name)),
        }
    }

    /// Record a write: update when visible, new local otherwise
    pub fn write(&mut self, name: &str) {
        match self.owner(name) {
            Some(idx) => {
                for frame in &mut self.frames[idx + 1..] {
                    frame.writes_outer.insert(name.to_string());
                }
            }
            None => self.bind_local(name),
        }
    }

    /// Bind `name` in the current block even if an outer binding exists
    pub fn bind_local(&mut self, name: &str) {
        if let Some(frame) = self.frames.last_mut() {
            trace!(blob = name, block = %frame.label, "bind local");
            frame.bind(name);
        }
    }

    pub fn enter_block(&mut self, label: impl Into<String>) {
        self.frames.push(Frame::new(label));
    }

    /// Close the innermost block and retire its locals
    pub fn exit_block(&mut self) -> BuildResult<BlockScope> {
        if self.frames.len() <= 1 {
            return Err(BuildError::InvalidNet(
                "block closed more times than opened".to_string(),
            ));
        }
        let frame = self
            .frames
            .pop()
            .ok_or_else(|| BuildError::InvalidNet("no open block".to_string()))?;

        for name in &frame.locals {
            self.retired.insert(name.clone(), frame.label.clone());
        }

        Ok(BlockScope {
            locals: frame.locals,
            external_inputs: frame.reads_outer.into_iter().collect(),
            external_outputs: frame.writes_outer.into_iter().collect(),
        })
    }

    fn invisible(&self, name: &str) -> BuildError {
        match self.retired.get(name) {
            Some(owner) => BuildError::ScopeViolation {
                name: name.to_string(),
                owner: owner.clone(),
                block: self.current_block().to_string(),
            },
            None => BuildError::UndefinedBlob {
                name: name.to_string(),
                block: self.current_block().to_string(),
            },
        }
    }

    // ------------------------------------------------------------------------
    // Net traversal
    // ------------------------------------------------------------------------

    fn resolve_ops(&mut self, ops: &[Operator]) -> BuildResult<Vec<Operator>> {
        ops.iter().map(|op| self.resolve_op(op)).collect()
    }

    fn resolve_block(&mut self, net: &Net, default_label: &str) -> BuildResult<Net> {
        let label = block_label(net, default_label);
        self.enter_block(label.clone());
        let ops = self.resolve_ops(&net.ops)?;
        Ok(self.exit_block()?.into_net(label, ops))
    }

    fn resolve_op(&mut self, op: &Operator) -> BuildResult<Operator> {
        match op {
            Operator::Compute(compute) => {
                for input in &compute.inputs {
                    self.read(input)?;
                }
                for output in &compute.outputs {
                    self.write(output);
                }
                Ok(op.clone())
            }

            Operator::If {
                cond,
                then_net,
                else_net,
                isolated,
                scope,
            } => {
                self.read(cond)?;
                self.read_scope(scope.as_deref())?;
                let then_net = self.resolve_block(then_net, "then")?;
                let else_net = else_net
                    .as_ref()
                    .map(|net| self.resolve_block(net, "else"))
                    .transpose()?;
                Ok(Operator::If {
                    cond: cond.clone(),
                    then_net,
                    else_net,
                    isolated: *isolated,
                    scope: scope.clone(),
                })
            }

            Operator::While {
                cond_net,
                cond,
                body,
                isolated,
                scope,
            } => {
                self.read_scope(scope.as_deref())?;

                let label = block_label(cond_net, "cond");
                self.enter_block(label.clone());
                let cond_ops = self.resolve_ops(&cond_net.ops)?;
                self.read(cond)?;
                let cond_net = self.exit_block()?.into_net(label, cond_ops);

                let body = self.resolve_block(body, "body")?;
                Ok(Operator::While {
                    cond_net,
                    cond: cond.clone(),
                    body,
                    isolated: *isolated,
                    scope: scope.clone(),
                })
            }

            Operator::Do {
                net,
                blob_map,
                scope,
            } => {
                check_bindings(blob_map)?;
                let inputs = blob_map
                    .iter()
                    .filter(|b| b.direction.is_input())
                    .map(|b| b.inner.as_str());
                let label = block_label(net, "do");
                let mut inner = ScopeResolver::new(inputs, &label);
                let inner_ops = inner.resolve_ops(&net.ops)?;
                for binding in blob_map.iter().filter(|b| b.direction.is_output()) {
                    inner.read(&binding.inner)?;
                }
                let inner_net = inner.exit_block()?.into_net(label, inner_ops);

                for binding in blob_map.iter().filter(|b| b.direction.is_input()) {
                    self.read(&binding.outer)?;
                }
                self.read_scope(scope.as_deref())?;
                for binding in blob_map.iter().filter(|b| b.direction.is_output()) {
                    self.write(&binding.outer);
                }
                Ok(Operator::Do {
                    net: inner_net,
                    blob_map: blob_map.clone(),
                    scope: scope.clone(),
                })
            }

            Operator::CreateScope { output } => {
                self.write(output);
                Ok(op.clone())
            }

            Operator::HasScope { scope, output } => {
                self.read(scope)?;
                self.write(output);
                Ok(op.clone())
            }

            Operator::Replay {
                scope,
                body,
                mode,
                restores,
                blob_map,
            } => {
                check_bindings(blob_map)?;
                self.read(scope)?;
                for binding in blob_map.iter().filter(|b| b.direction.is_input()) {
                    self.read(&binding.outer)?;
                }

                let label = block_label(body, "replay");
                self.enter_block(label.clone());
                for name in restores {
                    self.bind_local(name);
                }
                for binding in blob_map.iter().filter(|b| b.direction.is_input()) {
                    self.bind_local(&binding.inner);
                }
                let body_ops = self.resolve_ops(&body.ops)?;
                for binding in blob_map.iter().filter(|b| b.direction.is_output()) {
                    self.read(&binding.inner)?;
                }
                let body = self.exit_block()?.into_net(label, body_ops);

                for binding in blob_map.iter().filter(|b| b.direction.is_output()) {
                    self.write(&binding.outer);
                }
                Ok(Operator::Replay {
                    scope: scope.clone(),
                    body,
                    mode: *mode,
                    restores: restores.clone(),
                    blob_map: blob_map.clone(),
                })
            }
        }
    }

    fn read_scope(&mut self, scope: Option<&str>) -> BuildResult<()> {
        match scope {
            Some(name) => self.read(name),
            None => Ok(()),
        }
    }
}

fn block_label(net: &Net, default_label: &str) -> String {
    if net.name.is_empty() {
        default_label.to_string()
    } else {
        net.name.clone()
    }
}

/// Inner and outer names must each be bound at most once per direction
fn check_bindings(blob_map: &[BlobBinding]) -> BuildResult<()> {
    let mut inner_inputs = HashSet::new();
    let mut outer_outputs = HashSet::new();
    for binding in blob_map {
        if binding.direction.is_input() && !inner_inputs.insert(binding.inner.as_str()) {
            return Err(BuildError::InvalidNet(format!(
                "inner blob '{}' bound twice as input",
                binding.inner
            )));
        }
        if binding.direction.is_output() && !outer_outputs.insert(binding.outer.as_str()) {
            return Err(BuildError::InvalidNet(format!(
                "outer blob '{}' bound twice as output",
                binding.outer
            )));
        }
    }
    Ok(())
}

// ============================================================================
// Entry point
// ============================================================================

/// Validate a hand-written or deserialized net and annotate every block with
/// its locals and external inputs/outputs.
///
/// `initial_scope` lists the names the driver feeds before running the net.
/// No partial net is returned on error.
pub fn resolve_net<S: AsRef<str>>(net: &Net, initial_scope: &[S]) -> BuildResult<Net> {
    let label = block_label(net, "net");
    let mut resolver = ScopeResolver::new(initial_scope, &label);
    let ops = resolver.resolve_ops(&net.ops)?;
    Ok(resolver.exit_block()?.into_net(net.name.clone(), ops))
}

/// Check that every name in `names` can be read once `net` has run
pub(crate) fn check_readable<S: AsRef<str>>(
    net: &Net,
    initial_scope: &[S],
    names: &[&str],
) -> BuildResult<()> {
    let label = block_label(net, "net");
    let mut resolver = ScopeResolver::new(initial_scope, &label);
    resolver.resolve_ops(&net.ops)?;
    names.iter().try_for_each(|name| resolver.read(name))
}
