use super::*;
use crate::args;
use crate::types::{BlobBinding, Net, Operator};

fn parse_net(json: serde_json::Value) -> Net {
    serde_json::from_value(json).expect("net json")
}

/* ===================== Resolver ===================== */

#[test]
fn test_update_versus_new_local() {
    let mut resolver = ScopeResolver::new(["x"], "net");
    resolver.read("x").unwrap();
    resolver.write("y");

    resolver.enter_block("then");
    resolver.read("y").unwrap();
    resolver.write("x");
    resolver.write("t");
    let scope = resolver.exit_block().unwrap();

    assert_eq!(scope.locals, vec!["t"]);
    assert_eq!(scope.external_inputs, vec!["y"]);
    assert_eq!(scope.external_outputs, vec!["x"]);

    let root = resolver.exit_block().unwrap();
    assert_eq!(root.locals, vec!["y"]);
    assert_eq!(root.external_inputs, vec!["x"]);
    assert_eq!(root.external_outputs, vec!["x"]);
}

#[test]
fn test_branch_local_is_scope_violation_afterwards() {
    let mut resolver = ScopeResolver::new(Vec::<String>::new(), "net");
    resolver.enter_block("then");
    resolver.write("local_blob");
    resolver.exit_block().unwrap();

    assert_eq!(
        resolver.read("local_blob"),
        Err(BuildError::ScopeViolation {
            name: "local_blob".to_string(),
            owner: "then".to_string(),
            block: "net".to_string(),
        })
    );
}

#[test]
fn test_unknown_name_is_undefined() {
    let mut resolver = ScopeResolver::new(["x"], "net");
    assert_eq!(
        resolver.read("nope"),
        Err(BuildError::UndefinedBlob {
            name: "nope".to_string(),
            block: "net".to_string(),
        })
    );
}

#[test]
fn test_nested_read_marks_every_intermediate_block() {
    let mut resolver = ScopeResolver::new(["x"], "net");
    resolver.enter_block("outer");
    resolver.enter_block("inner");
    resolver.read("x").unwrap();
    let inner = resolver.exit_block().unwrap();
    let outer = resolver.exit_block().unwrap();

    assert_eq!(inner.external_inputs, vec!["x"]);
    assert_eq!(outer.external_inputs, vec!["x"]);
}

#[test]
fn test_cannot_close_initial_frame() {
    let mut resolver = ScopeResolver::new(["x"], "net");
    resolver.exit_block().unwrap();
    assert!(matches!(
        resolver.exit_block(),
        Err(BuildError::InvalidNet(_))
    ));
}

/* ===================== resolve_net ===================== */

#[test]
fn test_resolve_json_if_net() {
    let net = parse_net(serde_json::json!({
        "name": "main",
        "ops": [
            {"t": "Compute", "op_type": "ConstantFill", "inputs": [], "outputs": ["zero"],
             "args": {"value": {"t": "Num", "v": 0.0}}},
            {"t": "Compute", "op_type": "GT", "inputs": ["x", "zero"], "outputs": ["cond"]},
            {"t": "If", "cond": "cond",
             "then_net": {"name": "", "ops": [
                {"t": "Compute", "op_type": "Copy", "inputs": ["x"], "outputs": ["tmp"]},
                {"t": "Compute", "op_type": "Add", "inputs": ["tmp", "x"], "outputs": ["y"]}
             ]}}
        ]
    }));

    let resolved = resolve_net(&net, &["x", "y"]).unwrap();
    assert_eq!(resolved.locals, vec!["zero", "cond"]);
    assert_eq!(resolved.external_inputs, vec!["x"]);
    assert_eq!(resolved.external_outputs, vec!["y"]);

    match &resolved.ops[2] {
        Operator::If { then_net, .. } => {
            assert_eq!(then_net.name, "then");
            assert_eq!(then_net.locals, vec!["tmp"]);
            assert_eq!(then_net.external_inputs, vec!["x"]);
            assert_eq!(then_net.external_outputs, vec!["y"]);
        }
        other => panic!("expected If, got {}", other.kind()),
    }
}

#[test]
fn test_resolve_rejects_read_of_branch_local() {
    let then_net = Net::new("then", vec![Operator::compute("Copy", &["x"], &["t"])]);
    let net = Net::new(
        "main",
        vec![
            Operator::If {
                cond: "c".to_string(),
                then_net,
                else_net: None,
                isolated: false,
                scope: None,
            },
            Operator::compute("Copy", &["t"], &["y"]),
        ],
    );

    assert_eq!(
        resolve_net(&net, &["x", "c"]),
        Err(BuildError::ScopeViolation {
            name: "t".to_string(),
            owner: "then".to_string(),
            block: "main".to_string(),
        })
    );
}

#[test]
fn test_while_condition_must_be_bound_by_condition_block() {
    let net = Net::new(
        "main",
        vec![Operator::While {
            cond_net: Net::new("", vec![]),
            cond: "keep_going".to_string(),
            body: Net::new("", vec![]),
            isolated: false,
            scope: None,
        }],
    );

    assert!(matches!(
        resolve_net(&net, &["i"]),
        Err(BuildError::UndefinedBlob { ref name, ref block }) if name == "keep_going" && block == "cond"
    ));
}

#[test]
fn test_do_inner_names_are_resolved_separately() {
    let inner = Net::new("", vec![Operator::compute("Add", &["a", "a"], &["b"])]);
    let net = Net::new(
        "main",
        vec![Operator::Do {
            net: inner,
            blob_map: vec![BlobBinding::input("x", "a"), BlobBinding::output("b", "y")],
            scope: None,
        }],
    );

    let resolved = resolve_net(&net, &["x"]).unwrap();
    assert_eq!(resolved.locals, vec!["y"]);
    match &resolved.ops[0] {
        Operator::Do { net, .. } => {
            assert_eq!(net.locals, vec!["b"]);
            assert_eq!(net.external_inputs, vec!["a"]);
        }
        other => panic!("expected Do, got {}", other.kind()),
    }

    // The outer name is not visible inside the Do body
    let leaky = Net::new(
        "main",
        vec![Operator::Do {
            net: Net::new("", vec![Operator::compute("Copy", &["x"], &["b"])]),
            blob_map: vec![BlobBinding::output("b", "y")],
            scope: None,
        }],
    );
    assert!(matches!(
        resolve_net(&leaky, &["x"]),
        Err(BuildError::UndefinedBlob { .. })
    ));
}

#[test]
fn test_duplicate_binding_is_invalid() {
    let net = Net::new(
        "main",
        vec![Operator::Do {
            net: Net::new("", vec![]),
            blob_map: vec![BlobBinding::input("x", "a"), BlobBinding::input("y", "a")],
            scope: None,
        }],
    );
    assert!(matches!(
        resolve_net(&net, &["x", "y"]),
        Err(BuildError::InvalidNet(_))
    ));
}

/* ===================== NetBuilder ===================== */

#[test]
fn test_builder_if_else() {
    let mut b = NetBuilder::with_scope("net", &["x"]);
    b.constant(0.0, "zero").unwrap();
    let cond = b.op_auto("GT", &["x", "zero"]).unwrap();
    assert_eq!(cond, "gt#0");

    b.if_else(
        &cond,
        |b| b.op_with_args("Pow", &["x"], &["y"], args! { "exponent" => 2.0 }),
        |b| b.op_with_args("Pow", &["x"], &["y"], args! { "exponent" => 3.0 }),
    )
    .unwrap();

    // 'y' was first bound in both branches, so it is local to each of them
    assert!(!b.is_visible("y"));
    let net = b.build().unwrap();
    assert_eq!(net.locals, vec!["zero", "gt#0"]);

    match &net.ops[2] {
        Operator::If {
            then_net,
            else_net: Some(else_net),
            isolated,
            ..
        } => {
            assert!(*isolated);
            assert_eq!(then_net.locals, vec!["y"]);
            assert_eq!(else_net.locals, vec!["y"]);
        }
        other => panic!("expected If/else, got {}", other.kind()),
    }
}

#[test]
fn test_builder_reports_error_at_offending_call() {
    let mut b = NetBuilder::with_scope("net", &["x"]);
    b.if_then("x", |b| b.op("Copy", &["x"], &["local_blob"]))
        .unwrap();

    assert_eq!(
        b.op("Copy", &["local_blob"], &["y"]),
        Err(BuildError::ScopeViolation {
            name: "local_blob".to_string(),
            owner: "then".to_string(),
            block: "net".to_string(),
        })
    );
}

#[test]
fn test_builder_while_loop_classification() {
    let mut b = NetBuilder::with_scope("net", &["i", "y"]).isolated(false);
    b.constant(7, "seven").unwrap();
    b.constant(1, "one").unwrap();
    b.while_loop(
        |b| {
            let cond = b.op_auto("LE", &["i", "seven"])?;
            b.op("Add", &["i", "one"], &["i"])?;
            Ok(cond)
        },
        |b| b.op("Add", &["y", "i"], &["y"]),
    )
    .unwrap();
    let net = b.build().unwrap();

    match &net.ops[2] {
        Operator::While {
            cond_net,
            cond,
            body,
            isolated,
            ..
        } => {
            assert!(!isolated);
            assert_eq!(cond, "le#0");
            assert_eq!(cond_net.locals, vec!["le#0"]);
            assert_eq!(cond_net.external_outputs, vec!["i"]);
            assert_eq!(body.external_inputs, vec!["i", "y"]);
            assert_eq!(body.external_outputs, vec!["y"]);
        }
        other => panic!("expected While, got {}", other.kind()),
    }
}

#[test]
fn test_builder_do_block() {
    let mut b = NetBuilder::with_scope("net", &["x"]);
    b.do_block(
        vec![BlobBinding::input("x", "a"), BlobBinding::output("b", "y")],
        |inner| {
            inner.op("Mul", &["a", "a"], &["sq"])?;
            inner.op("Copy", &["sq"], &["b"])
        },
    )
    .unwrap();
    assert!(b.is_visible("y"));
    assert!(!b.is_visible("sq"));

    let net = b.build().unwrap();
    match &net.ops[0] {
        Operator::Do { net, .. } => assert_eq!(net.locals, vec!["sq", "b"]),
        other => panic!("expected Do, got {}", other.kind()),
    }
}

#[test]
fn test_builder_do_output_must_exist_inside() {
    let mut b = NetBuilder::with_scope("net", &["x"]);
    let result = b.do_block(vec![BlobBinding::output("missing", "y")], |_| Ok(()));
    assert!(matches!(result, Err(BuildError::UndefinedBlob { .. })));
}
