//! Test helpers for executor tests
//!
//! Common utilities for building, resolving and running nets

use std::collections::HashMap;

use crate::errors::ExecResult;
use crate::executor::Executor;
use crate::registry::OperatorRegistry;
use crate::resolver::resolve_net;
use crate::types::{Net, Val};
use crate::workspace::Workspace;

/// Parse a JSON net and resolve it against `initial_scope`
pub fn parse_net(json: serde_json::Value, initial_scope: &[&str]) -> Net {
    let net: Net = serde_json::from_value(json).expect("Net deserialization failed");
    resolve_net(&net, initial_scope).expect("Net resolution failed")
}

/// Root workspace holding `feeds`
pub fn workspace(feeds: HashMap<&str, Val>) -> Workspace<'static> {
    let mut ws = Workspace::new();
    for (name, value) in feeds {
        ws.feed(name, value);
    }
    ws
}

/// Run `net` with the standard library against a fresh workspace
pub fn run(net: &Net, feeds: HashMap<&str, Val>) -> Workspace<'static> {
    let (result, ws) = try_run(net, feeds, None);
    result.expect("Net execution failed");
    ws
}

/// Like `run`, returning the result instead of panicking
pub fn try_run(
    net: &Net,
    feeds: HashMap<&str, Val>,
    retention: Option<usize>,
) -> (ExecResult<()>, Workspace<'static>) {
    let registry = OperatorRegistry::with_stdlib();
    let executor = Executor::new(&registry).with_retention(retention);
    let mut ws = workspace(feeds);
    let result = executor.run_net(net, &mut ws);
    (result, ws)
}
