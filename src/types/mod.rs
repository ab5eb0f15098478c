//! Type definitions shared by the resolver, executor and gradient pass
//!
//! - Runtime values and execution records (`Val`, `ScopeRef`)
//! - Nets and operators (`Net`, `Operator`, `ComputeOp`)

pub mod net;
pub mod values;

pub use net::{Args, BlobBinding, ComputeOp, Direction, Net, Operator, ReplayMode};
pub use values::{ExecutionRecord, Numeric, ScopeRef, Snapshot, Tensor, Val};
