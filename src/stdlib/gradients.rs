//! Gradient makers for the differentiable standard operators
//!
//! Each maker receives the forward operator, the blobs holding the gradients
//! of its outputs, and the names it must write input gradients into.

use crate::errors::GradientError;
use crate::registry::GradientSpec;
use crate::types::{ComputeOp, Val};

type MakerResult = Result<GradientSpec, GradientError>;

fn expect_shape(op: &ComputeOp, output_grads: &[String], input_grads: &[String]) -> Result<(), GradientError> {
    if output_grads.len() != op.outputs.len() || input_grads.len() != op.inputs.len() {
        return Err(GradientError::Maker {
            op_type: op.op_type.clone(),
            message: format!(
                "got {} output grads / {} input grads for {} outputs / {} inputs",
                output_grads.len(),
                input_grads.len(),
                op.outputs.len(),
                op.inputs.len()
            ),
        });
    }
    Ok(())
}

/// `SumToShape(dy, like) -> dx`, optionally scaled
fn reduce(dy: &str, like: &str, dx: &str, scale: Option<f64>) -> ComputeOp {
    let op = ComputeOp::new(
        "SumToShape",
        vec![dy.to_string(), like.to_string()],
        vec![dx.to_string()],
    );
    match scale {
        Some(scale) => op.with_arg("scale", scale),
        None => op,
    }
}

/// Gradient of every input is the output gradient reduced to its shape
fn pass_through(op: &ComputeOp, output_grads: &[String], input_grads: &[String], scales: &[Option<f64>]) -> MakerResult {
    expect_shape(op, output_grads, input_grads)?;
    let ops = op
        .inputs
        .iter()
        .zip(input_grads)
        .zip(scales.iter().copied().chain(std::iter::repeat(None)))
        .map(|((input, grad), scale)| reduce(&output_grads[0], input, grad, scale))
        .collect();
    Ok(GradientSpec {
        ops,
        produces: vec![true; op.inputs.len()],
    })
}

pub fn copy(op: &ComputeOp, output_grads: &[String], input_grads: &[String]) -> MakerResult {
    expect_shape(op, output_grads, input_grads)?;
    Ok(GradientSpec {
        ops: vec![ComputeOp::new(
            "Copy",
            vec![output_grads[0].clone()],
            vec![input_grads[0].clone()],
        )],
        produces: vec![true],
    })
}

pub fn add(op: &ComputeOp, output_grads: &[String], input_grads: &[String]) -> MakerResult {
    pass_through(op, output_grads, input_grads, &[])
}

pub fn sum(op: &ComputeOp, output_grads: &[String], input_grads: &[String]) -> MakerResult {
    pass_through(op, output_grads, input_grads, &[])
}

pub fn sub(op: &ComputeOp, output_grads: &[String], input_grads: &[String]) -> MakerResult {
    pass_through(op, output_grads, input_grads, &[None, Some(-1.0)])
}

pub fn negative(op: &ComputeOp, output_grads: &[String], input_grads: &[String]) -> MakerResult {
    pass_through(op, output_grads, input_grads, &[Some(-1.0)])
}

pub fn mul(op: &ComputeOp, output_grads: &[String], input_grads: &[String]) -> MakerResult {
    expect_shape(op, output_grads, input_grads)?;
    let mut inputs = op.inputs.clone();
    inputs.push(output_grads[0].clone());
    Ok(GradientSpec {
        ops: vec![ComputeOp::new("MulGradient", inputs, input_grads.to_vec())],
        produces: vec![true, true],
    })
}

pub fn pow(op: &ComputeOp, output_grads: &[String], input_grads: &[String]) -> MakerResult {
    expect_shape(op, output_grads, input_grads)?;
    let exponent = op
        .arg("exponent")
        .and_then(Val::as_f64)
        .ok_or_else(|| GradientError::Maker {
            op_type: op.op_type.clone(),
            message: "missing argument 'exponent'".to_string(),
        })?;
    Ok(GradientSpec {
        ops: vec![ComputeOp::new(
            "PowGradient",
            vec![op.inputs[0].clone(), output_grads[0].clone()],
            vec![input_grads[0].clone()],
        )
        .with_arg("exponent", exponent)],
        produces: vec![true],
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn names(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_pow_gradient_wiring() {
        let op = ComputeOp::new("Pow", names(&["y"]), names(&["z"])).with_arg("exponent", 2.0);
        let spec = pow(&op, &names(&["z_grad"]), &names(&["y_grad@0"])).unwrap();

        assert_eq!(spec.produces, vec![true]);
        assert_eq!(spec.ops[0].op_type, "PowGradient");
        assert_eq!(spec.ops[0].inputs, names(&["y", "z_grad"]));
        assert_eq!(spec.ops[0].arg("exponent"), Some(&Val::Num(2.0)));
    }

    #[test]
    fn test_sub_negates_second_input() {
        let op = ComputeOp::new("Sub", names(&["a", "b"]), names(&["c"]));
        let spec = sub(&op, &names(&["dc"]), &names(&["da", "db"])).unwrap();

        assert_eq!(spec.ops.len(), 2);
        assert_eq!(spec.ops[0].arg("scale"), None);
        assert_eq!(spec.ops[1].arg("scale"), Some(&Val::Num(-1.0)));
    }

    #[test]
    fn test_arity_mismatch_is_maker_error() {
        let op = ComputeOp::new("Mul", names(&["a", "b"]), names(&["c"]));
        assert!(matches!(
            mul(&op, &names(&["dc"]), &names(&["da"])),
            Err(GradientError::Maker { .. })
        ));
    }
}
