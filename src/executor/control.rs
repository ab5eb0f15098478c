//! If / While / Do
//!
//! `If` and `While` run their blocks either directly in the caller's
//! workspace or, when `isolated`, in a child workspace per block execution
//! that writes back only the block's external outputs. `Do` always runs its
//! net in a detached workspace wired through the blob map.
//!
//! A control operator with a `scope` pushes one `ExecutionRecord` per
//! execution onto that scope's stack, for a later `Replay`.

use tracing::{debug, warn};

use super::Executor;
use crate::errors::{ExecError, ExecResult};
use crate::types::{BlobBinding, ExecutionRecord, Net, Snapshot, Val};
use crate::workspace::Workspace;

/// What a block execution reports back to its control operator
#[derive(Debug, Default)]
pub(crate) struct BlockOutcome {
    /// Value of the watched blob, read before the block workspace is released
    pub watch: Option<Val>,
    /// Entry values of the external inputs overlaid with the final values of
    /// the external outputs and locals
    pub snapshot: Option<Snapshot>,
}

/// Boolean value of a condition blob
pub(crate) fn condition(name: &str, value: &Val) -> ExecResult<bool> {
    value
        .as_condition()
        .ok_or_else(|| ExecError::ConditionTypeError {
            blob: name.to_string(),
            found: describe(value),
        })
}

fn describe(value: &Val) -> String {
    match value {
        Val::Tensor(t) => format!("tensor of shape {:?}", t.shape),
        other => other.type_name().to_string(),
    }
}

fn block_names(net: &Net) -> impl Iterator<Item = &String> {
    net.external_outputs.iter().chain(net.locals.iter())
}

impl Executor<'_> {
    /// Run one block execution of `net`
    pub(crate) fn run_block(
        &self,
        net: &Net,
        ws: &mut Workspace<'_>,
        isolated: bool,
        watch: Option<&str>,
        record: bool,
    ) -> ExecResult<BlockOutcome> {
        let entry = record.then(|| ws.capture(&net.external_inputs));

        if !isolated {
            self.run_net(net, ws)?;
            let watch = watch.map(|name| ws.fetch(name)).transpose()?;
            let snapshot = entry.map(|mut snap| {
                snap.extend(ws.capture(block_names(net)));
                snap
            });
            return Ok(BlockOutcome { watch, snapshot });
        }

        let mut child = ws.create_child();
        self.run_net(net, &mut child)?;
        let watch = watch.map(|name| child.fetch(name)).transpose()?;
        let snapshot = entry.map(|mut snap| {
            snap.extend(child.capture(block_names(net)));
            snap
        });

        let mut released = child.destroy();
        for name in &net.external_outputs {
            if let Some(value) = released.remove(name) {
                ws.set(name.clone(), value);
            }
        }
        Ok(BlockOutcome { watch, snapshot })
    }

    pub(crate) fn run_if(
        &self,
        cond: &str,
        then_net: &Net,
        else_net: Option<&Net>,
        isolated: bool,
        scope: Option<&str>,
        ws: &mut Workspace<'_>,
    ) -> ExecResult<()> {
        let taken = condition(cond, ws.get(cond)?)?;
        let handle = scope.map(|name| ws.scope(name)).transpose()?;
        debug!(cond, taken, isolated, "If");

        let branch = if taken { Some(then_net) } else { else_net };
        let snapshot = match branch {
            Some(net) => self.run_block(net, ws, isolated, None, handle.is_some())?.snapshot,
            None => None,
        };

        if let Some(handle) = handle {
            handle.push(ExecutionRecord::single(snapshot.unwrap_or_default()));
        }
        Ok(())
    }

    pub(crate) fn run_while(
        &self,
        cond_net: &Net,
        cond: &str,
        body: &Net,
        isolated: bool,
        scope: Option<&str>,
        ws: &mut Workspace<'_>,
    ) -> ExecResult<()> {
        let handle = scope.map(|name| ws.scope(name)).transpose()?;
        let mut record = ExecutionRecord::new();
        let mut iterations = 0usize;

        loop {
            let outcome = self.run_block(cond_net, ws, isolated, Some(cond), false)?;
            let value = outcome.watch.ok_or_else(|| ExecError::BlobNotFound {
                name: cond.to_string(),
            })?;
            if !condition(cond, &value)? {
                break;
            }

            let outcome = self.run_block(body, ws, isolated, None, handle.is_some())?;
            if let Some(snapshot) = outcome.snapshot {
                if let Some(evicted) = record.push(snapshot, self.retention) {
                    warn!(
                        scope = scope.unwrap_or_default(),
                        evicted,
                        limit = ?self.retention,
                        "loop snapshot evicted by retention policy"
                    );
                }
            }
            iterations += 1;
        }

        debug!(cond, iterations, isolated, "While finished");
        if let Some(handle) = handle {
            handle.push(record);
        }
        Ok(())
    }

    pub(crate) fn run_do(
        &self,
        net: &Net,
        blob_map: &[BlobBinding],
        scope: Option<&str>,
        ws: &mut Workspace<'_>,
    ) -> ExecResult<()> {
        let handle = scope.map(|name| ws.scope(name)).transpose()?;

        let mut child = Workspace::new();
        for binding in blob_map.iter().filter(|b| b.direction.is_input()) {
            child.set(binding.inner.clone(), ws.fetch(&binding.outer)?);
        }

        self.run_net(net, &mut child)?;

        let outputs = blob_map
            .iter()
            .filter(|b| b.direction.is_output())
            .map(|b| child.fetch(&b.inner).map(|value| (b.outer.clone(), value)))
            .collect::<ExecResult<Vec<_>>>()?;

        let locals = child.destroy();
        debug!(net = %net.name, released = locals.len(), "Do finished");
        if let Some(handle) = handle {
            handle.push(ExecutionRecord::single(locals.into_iter().collect()));
        }

        for (name, value) in outputs {
            ws.set(name, value);
        }
        Ok(())
    }
}
