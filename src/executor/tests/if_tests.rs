//! Tests for If

use super::helpers::{parse_net, run};
use crate::args;
use crate::resolver::NetBuilder;
use crate::types::{Net, Val};
use maplit::hashmap;

/// `y = x^2` when `x > 0`, `y = x^3` otherwise
fn branch_net() -> Net {
    let mut b = NetBuilder::with_scope("net", &["x"]);
    b.constant(0.0, "y").unwrap();
    b.constant(0.0, "zero").unwrap();
    let cond = b.op_auto("GT", &["x", "zero"]).unwrap();
    b.if_else(
        &cond,
        |b| b.op_with_args("Pow", &["x"], &["y"], args! { "exponent" => 2.0 }),
        |b| b.op_with_args("Pow", &["x"], &["y"], args! { "exponent" => 3.0 }),
    )
    .unwrap();
    b.build().unwrap()
}

#[test]
fn test_if_true_takes_then_branch() {
    let ws = run(&branch_net(), hashmap! { "x" => Val::Num(0.5) });
    assert_eq!(ws.fetch("y"), Ok(Val::Num(0.25)));
}

#[test]
fn test_if_false_takes_else_branch() {
    let ws = run(&branch_net(), hashmap! { "x" => Val::Num(-0.5) });
    assert_eq!(ws.fetch("y"), Ok(Val::Num(-0.125)));
}

#[test]
fn test_if_is_deterministic() {
    let net = branch_net();
    let first = run(&net, hashmap! { "x" => Val::Num(3.0) }).fetch("y");
    let second = run(&net, hashmap! { "x" => Val::Num(3.0) }).fetch("y");
    assert_eq!(first, second);
}

#[test]
fn test_if_false_without_else_is_noop() {
    let mut b = NetBuilder::with_scope("net", &["flag", "y"]);
    b.if_then("flag", |b| b.constant(42.0, "y")).unwrap();
    let net = b.build().unwrap();

    let ws = run(&net, hashmap! { "flag" => Val::Bool(false), "y" => Val::Num(1.0) });
    assert_eq!(ws.fetch("y"), Ok(Val::Num(1.0)));
}

#[test]
fn test_nested_if_local_blob_is_absent() {
    let mut b = NetBuilder::with_scope("net", &["x"]);
    b.constant(0.0, "y").unwrap();
    b.constant(0.0, "zero").unwrap();
    let outer = b.op_auto("GT", &["x", "zero"]).unwrap();
    b.if_then(&outer, |b| {
        b.op("Copy", &["x"], &["local_blob"])?;
        let inner = b.op_auto("GT", &["local_blob", "zero"])?;
        b.if_then(&inner, |b| b.op("Add", &["local_blob", "local_blob"], &["y"]))
    })
    .unwrap();
    let net = b.build().unwrap();

    let ws = run(&net, hashmap! { "x" => Val::Num(1.0) });
    assert_eq!(ws.fetch("y"), Ok(Val::Num(2.0)));
    assert!(!ws.has("local_blob"));
    assert!(!ws.has("gt#1"));
}

#[test]
fn test_unisolated_if_leaves_locals_in_workspace() {
    let mut b = NetBuilder::with_scope("net", &["x"]).isolated(false);
    b.constant(0.0, "y").unwrap();
    b.if_then("x", |b| {
        b.op("Add", &["x", "x"], &["tmp"])?;
        b.op("Copy", &["tmp"], &["y"])
    })
    .unwrap();
    let net = b.build().unwrap();

    let ws = run(&net, hashmap! { "x" => Val::Int(3) });
    assert_eq!(ws.fetch("y"), Ok(Val::Int(6)));
    // Invisible to later operators, but still physically bound
    assert_eq!(ws.fetch("tmp"), Ok(Val::Int(6)));
}

#[test]
fn test_json_if_with_int_condition() {
    let net = parse_net(
        serde_json::json!({
            "name": "main",
            "ops": [
                {"t": "If", "cond": "c", "isolated": true,
                 "then_net": {"name": "", "ops": [
                    {"t": "Compute", "op_type": "ConstantFill", "inputs": [], "outputs": ["out"],
                     "args": {"value": {"t": "Str", "v": "then"}}}
                 ]},
                 "else_net": {"name": "", "ops": [
                    {"t": "Compute", "op_type": "ConstantFill", "inputs": [], "outputs": ["out"],
                     "args": {"value": {"t": "Str", "v": "else"}}}
                 ]}}
            ]
        }),
        &["c", "out"],
    );

    let ws = run(&net, hashmap! { "c" => Val::Int(2), "out" => Val::Str(String::new()) });
    assert_eq!(ws.fetch("out"), Ok(Val::Str("then".to_string())));

    let ws = run(&net, hashmap! { "c" => Val::Int(0), "out" => Val::Str(String::new()) });
    assert_eq!(ws.fetch("out"), Ok(Val::Str("else".to_string())));
}
