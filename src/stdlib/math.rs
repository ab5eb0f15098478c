//! Elementwise arithmetic, comparison and fill kernels
//!
//! Binary kernels broadcast a single-element operand against the other one;
//! any other shape mismatch is a `KernelError::Shape`.

use crate::errors::KernelError;
use crate::types::{ComputeOp, Numeric, Val};

type KernelResult = Result<Vec<Val>, KernelError>;

/* ===================== Helpers ===================== */

fn arity(inputs: &[&Val], expected: usize) -> Result<(), KernelError> {
    if inputs.len() != expected {
        return Err(KernelError::Arity {
            expected,
            found: inputs.len(),
        });
    }
    Ok(())
}

fn numeric(value: &Val) -> Result<Numeric, KernelError> {
    value
        .numeric()
        .ok_or_else(|| KernelError::Type(format!("expected numeric value, got {}", value.type_name())))
}

fn f64_arg(op: &ComputeOp, key: &str) -> Result<f64, KernelError> {
    op.arg(key)
        .and_then(Val::as_f64)
        .ok_or_else(|| KernelError::MissingArg(key.to_string()))
}

/// Pair up elements of two operands, broadcasting single elements
fn zip_broadcast(a: &Numeric, b: &Numeric) -> Result<(Vec<usize>, Vec<(f64, f64)>), KernelError> {
    if a.shape == b.shape {
        let pairs = a.data.iter().copied().zip(b.data.iter().copied()).collect();
        return Ok((a.shape.clone(), pairs));
    }
    if a.data.len() == 1 {
        let x = a.data[0];
        return Ok((b.shape.clone(), b.data.iter().map(|&y| (x, y)).collect()));
    }
    if b.data.len() == 1 {
        let y = b.data[0];
        return Ok((a.shape.clone(), a.data.iter().map(|&x| (x, y)).collect()));
    }
    Err(KernelError::Shape(format!(
        "cannot broadcast {:?} against {:?}",
        a.shape, b.shape
    )))
}

fn binary<F>(inputs: &[&Val], keep_integral: bool, f: F) -> KernelResult
where
    F: Fn(f64, f64) -> f64,
{
    arity(inputs, 2)?;
    let a = numeric(inputs[0])?;
    let b = numeric(inputs[1])?;
    let (shape, pairs) = zip_broadcast(&a, &b)?;
    let data = pairs.into_iter().map(|(x, y)| f(x, y)).collect();
    let integral = keep_integral && a.integral && b.integral;
    Ok(vec![Val::from_numeric(shape, data, integral)])
}

fn compare<F>(inputs: &[&Val], f: F) -> KernelResult
where
    F: Fn(f64, f64) -> bool,
{
    arity(inputs, 2)?;
    let a = numeric(inputs[0])?;
    let b = numeric(inputs[1])?;
    let (shape, pairs) = zip_broadcast(&a, &b)?;
    if shape.is_empty() {
        let (x, y) = pairs
            .first()
            .copied()
            .ok_or_else(|| KernelError::Shape("empty comparison operands".to_string()))?;
        return Ok(vec![Val::Bool(f(x, y))]);
    }
    let data = pairs
        .into_iter()
        .map(|(x, y)| if f(x, y) { 1.0 } else { 0.0 })
        .collect();
    Ok(vec![Val::from_numeric(shape, data, false)])
}

/* ===================== Fill / Copy ===================== */

/// `ConstantFill`: `value` arg, optionally broadcast into `shape`
pub fn constant_fill(op: &ComputeOp, inputs: &[&Val]) -> KernelResult {
    arity(inputs, 0)?;
    let value = op.arg("value").cloned().unwrap_or(Val::Num(0.0));
    match op.arg("shape") {
        Some(shape) => {
            let dims = numeric(shape)?
                .data
                .into_iter()
                .map(|d| d as usize)
                .collect::<Vec<_>>();
            let fill = value
                .as_f64()
                .ok_or_else(|| KernelError::Type("shaped fill needs a numeric value".to_string()))?;
            let numel = dims.iter().product();
            Ok(vec![Val::from_numeric(dims, vec![fill; numel], false)])
        }
        None => Ok(vec![value]),
    }
}

pub fn copy(_op: &ComputeOp, inputs: &[&Val]) -> KernelResult {
    arity(inputs, 1)?;
    Ok(vec![inputs[0].clone()])
}

fn fill_like(inputs: &[&Val], fill: f64) -> KernelResult {
    arity(inputs, 1)?;
    let like = numeric(inputs[0])?;
    let numel = like.data.len();
    Ok(vec![Val::from_numeric(like.shape, vec![fill; numel], false)])
}

pub fn zeros_like(_op: &ComputeOp, inputs: &[&Val]) -> KernelResult {
    fill_like(inputs, 0.0)
}

pub fn ones_like(_op: &ComputeOp, inputs: &[&Val]) -> KernelResult {
    fill_like(inputs, 1.0)
}

/* ===================== Arithmetic ===================== */

pub fn add(_op: &ComputeOp, inputs: &[&Val]) -> KernelResult {
    binary(inputs, true, |x, y| x + y)
}

pub fn sub(_op: &ComputeOp, inputs: &[&Val]) -> KernelResult {
    binary(inputs, true, |x, y| x - y)
}

pub fn mul(_op: &ComputeOp, inputs: &[&Val]) -> KernelResult {
    binary(inputs, true, |x, y| x * y)
}

/// `Pow`: `exponent` arg
pub fn pow(op: &ComputeOp, inputs: &[&Val]) -> KernelResult {
    arity(inputs, 1)?;
    let exponent = f64_arg(op, "exponent")?;
    let x = numeric(inputs[0])?;
    let data = x.data.iter().map(|v| v.powf(exponent)).collect();
    Ok(vec![Val::from_numeric(x.shape, data, false)])
}

pub fn negative(_op: &ComputeOp, inputs: &[&Val]) -> KernelResult {
    arity(inputs, 1)?;
    let x = numeric(inputs[0])?;
    let data = x.data.iter().map(|v| -v).collect();
    Ok(vec![Val::from_numeric(x.shape, data, x.integral)])
}

/// `Sum`: elementwise sum of one or more inputs
pub fn sum(_op: &ComputeOp, inputs: &[&Val]) -> KernelResult {
    let (first, rest) = inputs.split_first().ok_or(KernelError::Arity {
        expected: 1,
        found: 0,
    })?;
    let mut acc = (*first).clone();
    for value in rest {
        acc = binary(&[&acc, *value], true, |x, y| x + y)?.remove(0);
    }
    Ok(vec![acc])
}

/* ===================== Comparison ===================== */

pub fn gt(_op: &ComputeOp, inputs: &[&Val]) -> KernelResult {
    compare(inputs, |x, y| x > y)
}

pub fn ge(_op: &ComputeOp, inputs: &[&Val]) -> KernelResult {
    compare(inputs, |x, y| x >= y)
}

pub fn lt(_op: &ComputeOp, inputs: &[&Val]) -> KernelResult {
    compare(inputs, |x, y| x < y)
}

pub fn le(_op: &ComputeOp, inputs: &[&Val]) -> KernelResult {
    compare(inputs, |x, y| x <= y)
}

pub fn eq(_op: &ComputeOp, inputs: &[&Val]) -> KernelResult {
    compare(inputs, |x, y| x == y)
}

pub fn not(_op: &ComputeOp, inputs: &[&Val]) -> KernelResult {
    arity(inputs, 1)?;
    let flag = inputs[0]
        .as_condition()
        .ok_or_else(|| KernelError::Type(format!("Not expects a boolean, got {}", inputs[0].type_name())))?;
    Ok(vec![Val::Bool(!flag)])
}

/* ===================== Gradient Kernels ===================== */

/// `PowGradient(X, dY)`: `exponent * X^(exponent - 1) * dY`
pub fn pow_gradient(op: &ComputeOp, inputs: &[&Val]) -> KernelResult {
    arity(inputs, 2)?;
    let exponent = f64_arg(op, "exponent")?;
    let x = numeric(inputs[0])?;
    let dy = numeric(inputs[1])?;
    let (shape, pairs) = zip_broadcast(&x, &dy)?;
    let data = pairs
        .into_iter()
        .map(|(x, g)| exponent * x.powf(exponent - 1.0) * g)
        .collect();
    Ok(vec![Val::from_numeric(shape, data, false)])
}

/// Reduce `g` to the shape of `like`, then multiply by `scale`
fn reduce_to(g: &Numeric, like: &Numeric, scale: f64) -> Result<Val, KernelError> {
    if g.shape == like.shape {
        let data = g.data.iter().map(|v| v * scale).collect();
        return Ok(Val::from_numeric(g.shape.clone(), data, false));
    }
    if like.data.len() == 1 {
        let total: f64 = g.data.iter().sum();
        return Ok(Val::from_numeric(like.shape.clone(), vec![total * scale], false));
    }
    if g.data.len() == 1 {
        let data = vec![g.data[0] * scale; like.data.len()];
        return Ok(Val::from_numeric(like.shape.clone(), data, false));
    }
    Err(KernelError::Shape(format!(
        "cannot reduce {:?} to {:?}",
        g.shape, like.shape
    )))
}

/// `SumToShape(G, Like)`: gradient of a broadcast operand, optional `scale` arg
pub fn sum_to_shape(op: &ComputeOp, inputs: &[&Val]) -> KernelResult {
    arity(inputs, 2)?;
    let scale = op.arg("scale").and_then(Val::as_f64).unwrap_or(1.0);
    let g = numeric(inputs[0])?;
    let like = numeric(inputs[1])?;
    Ok(vec![reduce_to(&g, &like, scale)?])
}

/// `MulGradient(A, B, dY)` -> `(dA, dB)`
pub fn mul_gradient(_op: &ComputeOp, inputs: &[&Val]) -> KernelResult {
    arity(inputs, 3)?;
    let a = numeric(inputs[0])?;
    let b = numeric(inputs[1])?;
    let dy = numeric(inputs[2])?;

    let partial = |other: &Numeric, like: &Numeric| -> Result<Val, KernelError> {
        let (shape, pairs) = zip_broadcast(&dy, other)?;
        let data = pairs.into_iter().map(|(g, v)| g * v).collect();
        let full = Numeric {
            shape,
            data,
            integral: false,
        };
        reduce_to(&full, like, 1.0)
    };

    Ok(vec![partial(&b, &a)?, partial(&a, &b)?])
}
