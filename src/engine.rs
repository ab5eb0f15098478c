//! Configured entry point
//!
//! `Engine` owns the operator registry and the loaded `Config`, and hands out
//! builders, executors and gradient passes that honor it.
//!
//! ```ignore
//! let engine = Engine::new(Config::load()?);
//! let mut b = engine.builder("net", &["x"]);
//! b.op("Mul", &["x", "x"], &["y"])?;
//! let pass = engine.add_gradient_ops(&b.build()?, &["y"])?;
//!
//! let mut ws = Workspace::new();
//! ws.feed("x", Val::Num(3.0));
//! engine.run(&pass.net, &mut ws)?;
//! ```

use tracing::info;

use crate::config::Config;
use crate::errors::{ExecResult, GradientError};
use crate::executor::Executor;
use crate::gradient::{GradientBuilder, GradientPass};
use crate::registry::OperatorRegistry;
use crate::resolver::NetBuilder;
use crate::types::Net;
use crate::workspace::Workspace;

#[derive(Debug)]
pub struct Engine {
    config: Config,
    registry: OperatorRegistry,
}

impl Engine {
    /// Engine with the standard operator library
    pub fn new(config: Config) -> Self {
        Self::with_registry(config, OperatorRegistry::with_stdlib())
    }

    pub fn with_registry(config: Config, registry: OperatorRegistry) -> Self {
        info!(
            op_types = registry.op_types().len(),
            isolate_blocks = config.execution.isolate_blocks,
            max_loop_snapshots = ?config.execution.max_loop_snapshots,
            "engine ready"
        );
        Self { config, registry }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn registry(&self) -> &OperatorRegistry {
        &self.registry
    }

    /// For registering custom operators
    pub fn registry_mut(&mut self) -> &mut OperatorRegistry {
        &mut self.registry
    }

    pub fn builder<S: AsRef<str>>(&self, name: &str, initial_scope: &[S]) -> NetBuilder {
        NetBuilder::with_scope(name, initial_scope).isolated(self.config.execution.isolate_blocks)
    }

    pub fn executor(&self) -> Executor<'_> {
        Executor::new(&self.registry).with_retention(self.config.execution.max_loop_snapshots)
    }

    pub fn run(&self, net: &Net, ws: &mut Workspace<'_>) -> ExecResult<()> {
        self.executor().run_net(net, ws)
    }

    pub fn add_gradient_ops(&self, net: &Net, targets: &[&str]) -> Result<GradientPass, GradientError> {
        GradientBuilder::new(&self.registry)
            .with_policy(self.config.gradient.missing_gradient)
            .add_gradient_ops(net, targets)
    }
}

impl Default for Engine {
    fn default() -> Self {
        Self::new(Config::default())
    }
}
