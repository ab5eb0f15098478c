//! Tests for Do

use super::helpers::run;
use crate::resolver::NetBuilder;
use crate::types::{BlobBinding, Val};
use maplit::hashmap;

#[test]
fn test_do_copies_bindings_both_ways() {
    let mut b = NetBuilder::with_scope("net", &["x"]);
    b.do_block(
        vec![BlobBinding::input("x", "a"), BlobBinding::output("b", "y")],
        |inner| {
            inner.op("Mul", &["a", "a"], &["sq"])?;
            inner.op("Add", &["sq", "a"], &["b"])
        },
    )
    .unwrap();
    let net = b.build().unwrap();

    let ws = run(&net, hashmap! { "x" => Val::Int(3) });
    assert_eq!(ws.fetch("y"), Ok(Val::Int(12)));
    for hidden in ["a", "b", "sq"] {
        assert!(!ws.has(hidden), "'{hidden}' leaked out of Do");
    }
}

#[test]
fn test_do_in_out_binding_updates_outer() {
    let mut b = NetBuilder::with_scope("net", &["counter"]);
    b.do_block(vec![BlobBinding::in_out("counter", "c")], |inner| {
        inner.constant(1, "step")?;
        inner.op("Add", &["c", "step"], &["c"])
    })
    .unwrap();
    let net = b.build().unwrap();

    let ws = run(&net, hashmap! { "counter" => Val::Int(41) });
    assert_eq!(ws.fetch("counter"), Ok(Val::Int(42)));
    assert!(!ws.has("step"));
}

#[test]
fn test_do_inside_loop_gets_fresh_workspace_each_time() {
    let mut b = NetBuilder::with_scope("net", &["x", "n"]);
    b.constant(0, "zero").unwrap();
    b.constant(1, "one").unwrap();
    b.while_loop(
        |b| b.op_auto("GT", &["n", "zero"]),
        |b| {
            b.do_block(
                vec![BlobBinding::in_out("x", "v")],
                |inner| {
                    // 'seen' must never survive from a previous invocation
                    inner.constant(2, "seen")?;
                    inner.op("Mul", &["v", "seen"], &["v"])
                },
            )?;
            b.op("Sub", &["n", "one"], &["n"])
        },
    )
    .unwrap();
    let net = b.build().unwrap();

    let ws = run(&net, hashmap! { "x" => Val::Int(1), "n" => Val::Int(3) });
    assert_eq!(ws.fetch("x"), Ok(Val::Int(8)));
    assert!(!ws.has("seen"));
}
