//! Control-flow engine for dataflow nets: scoped `If`/`While`/`Do` over a
//! named blob workspace, with gradients replayed through branches and loop
//! iterations.

pub mod config;
pub mod engine;
pub mod errors;
pub mod executor;
pub mod gradient;
pub mod logging;
pub mod registry;
pub mod resolver;
pub mod stdlib;
pub mod types;
pub mod workspace;

// Re-export main types
pub use types::*;

pub use config::Config;
pub use engine::Engine;
pub use errors::{BuildError, ExecError, GradientError, KernelError};
pub use executor::Executor;
pub use gradient::{add_gradient_ops, grad_name, GradientBuilder, GradientPass, MissingGradient};
pub use registry::{GradientMaker, GradientSpec, Kernel, OperatorRegistry};
pub use resolver::{resolve_net, NetBuilder};
pub use workspace::Workspace;
