//! Replay of recorded block executions
//!
//! Backward nets produced by the gradient pass consume the records pushed by
//! forward `If`/`While`/`Do` operators. Each `Replay` pops exactly one record,
//! so nested blocks replay in reverse order of their forward executions.

use tracing::debug;

use super::Executor;
use crate::errors::{ExecError, ExecResult};
use crate::types::{BlobBinding, Net, ReplayMode};
use crate::workspace::Workspace;

impl Executor<'_> {
    pub(crate) fn run_replay(
        &self,
        scope: &str,
        body: &Net,
        mode: ReplayMode,
        restores: &[String],
        blob_map: &[BlobBinding],
        ws: &mut Workspace<'_>,
    ) -> ExecResult<()> {
        let handle = ws.scope(scope)?;
        let record = handle.pop().ok_or_else(|| ExecError::ReplayStateMissing {
            scope: scope.to_string(),
            iteration: None,
        })?;

        let order: Vec<usize> = match mode {
            ReplayMode::Block => vec![0],
            ReplayMode::Loop => (0..record.total()).rev().collect(),
        };
        debug!(scope, ?mode, iterations = order.len(), "Replay");

        for iteration in order {
            let snapshot =
                record
                    .iteration(iteration)
                    .ok_or_else(|| ExecError::ReplayStateMissing {
                        scope: scope.to_string(),
                        iteration: Some(iteration),
                    })?;

            let mut child = ws.create_child();
            for name in restores {
                if let Some(value) = snapshot.get(name) {
                    child.set(name.clone(), value.clone());
                }
            }
            for binding in blob_map.iter().filter(|b| b.direction.is_input()) {
                let value = ws.fetch(&binding.outer)?;
                child.set(binding.inner.clone(), value);
            }

            self.run_net(body, &mut child)?;

            let outputs = blob_map
                .iter()
                .filter(|b| b.direction.is_output())
                .map(|b| child.fetch(&b.inner).map(|value| (b.outer.clone(), value)))
                .collect::<ExecResult<Vec<_>>>()?;
            child.destroy();

            for (name, value) in outputs {
                ws.set(name, value);
            }
        }
        Ok(())
    }
}
