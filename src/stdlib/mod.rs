//! Built-in operator library
//!
//! Registered into every `OperatorRegistry::with_stdlib()`.

pub mod gradients;
pub mod math;

use crate::registry::{GradientMaker, OperatorRegistry};

fn grad(maker: impl GradientMaker + 'static) -> Option<Box<dyn GradientMaker>> {
    Some(Box::new(maker))
}

/// Register every standard operator and its gradient maker
pub fn register_all(registry: &mut OperatorRegistry) {
    // Fill / copy
    registry.register("ConstantFill", math::constant_fill, None);
    registry.register("Copy", math::copy, grad(gradients::copy));
    registry.register("ZerosLike", math::zeros_like, None);
    registry.register("OnesLike", math::ones_like, None);

    // Arithmetic
    registry.register("Add", math::add, grad(gradients::add));
    registry.register("Sub", math::sub, grad(gradients::sub));
    registry.register("Mul", math::mul, grad(gradients::mul));
    registry.register("Pow", math::pow, grad(gradients::pow));
    registry.register("Negative", math::negative, grad(gradients::negative));
    registry.register("Sum", math::sum, grad(gradients::sum));

    // Comparison
    registry.register("GT", math::gt, None);
    registry.register("GE", math::ge, None);
    registry.register("LT", math::lt, None);
    registry.register("LE", math::le, None);
    registry.register("EQ", math::eq, None);
    registry.register("Not", math::not, None);

    // Gradient kernels
    registry.register("PowGradient", math::pow_gradient, None);
    registry.register("MulGradient", math::mul_gradient, None);
    registry.register("SumToShape", math::sum_to_shape, None);
}
