// ============================================================
// Layer 5 — Gradient Norm
// ============================================================
// The growth controller is fed one scalar per batch: the L2
// norm over every parameter gradient of the model,
//
//   ‖g‖ = sqrt( Σ_params Σ_elements g² )
//
// Each module sums the squared gradients of its own parameters;
// VisionTransformer::grad_norm adds them up and takes the root.
// Parameters that received no gradient contribute zero.
//
// Clipping is global as well: when ‖g‖ exceeds max_norm every
// gradient is multiplied by the same factor max_norm / ‖g‖, so
// the clipped vector keeps its direction. The same per-module
// walk rescales the optimizer-ready GradientsParams.

use burn::{
    module::Param,
    nn::{LayerNorm, Linear},
    optim::GradientsParams,
    prelude::*,
    tensor::backend::AutodiffBackend,
};

/// Factor that brings a gradient of norm `norm` down to `max_norm`, or
/// `None` when no clipping is needed.
pub fn clip_factor(norm: f64, max_norm: f64) -> Option<f64> {
    (norm.is_finite() && norm > max_norm && norm > 0.0).then(|| max_norm / norm)
}

pub(crate) fn param_sq_sum<B: AutodiffBackend, const D: usize>(
    param: &Param<Tensor<B, D>>,
    grads: &B::Gradients,
) -> f64 {
    param
        .val()
        .grad(grads)
        .map(|g| g.powf_scalar(2.0).sum().into_scalar().elem::<f64>())
        .unwrap_or(0.0)
}

pub(crate) fn linear_sq_sum<B: AutodiffBackend>(linear: &Linear<B>, grads: &B::Gradients) -> f64 {
    let bias = linear
        .bias
        .as_ref()
        .map(|b| param_sq_sum(b, grads))
        .unwrap_or(0.0);
    param_sq_sum(&linear.weight, grads) + bias
}

pub(crate) fn layer_norm_sq_sum<B: AutodiffBackend>(norm: &LayerNorm<B>, grads: &B::Gradients) -> f64 {
    param_sq_sum(&norm.gamma, grads) + param_sq_sum(&norm.beta, grads)
}

pub(crate) fn scale_param<B: AutodiffBackend, const D: usize>(
    param:  &Param<Tensor<B, D>>,
    grads:  &mut GradientsParams,
    factor: f64,
) {
    if let Some(g) = grads.remove::<B::InnerBackend, D>(param.id) {
        grads.register::<B::InnerBackend, D>(param.id, g.mul_scalar(factor));
    }
}

pub(crate) fn scale_linear<B: AutodiffBackend>(linear: &Linear<B>, grads: &mut GradientsParams, factor: f64) {
    scale_param(&linear.weight, grads, factor);
    if let Some(bias) = &linear.bias {
        scale_param(bias, grads, factor);
    }
}

pub(crate) fn scale_layer_norm<B: AutodiffBackend>(norm: &LayerNorm<B>, grads: &mut GradientsParams, factor: f64) {
    scale_param(&norm.gamma, grads, factor);
    scale_param(&norm.beta, grads, factor);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clip_factor() {
        assert_eq!(clip_factor(2.0, 0.5), Some(0.25));
        assert_eq!(clip_factor(0.4, 0.5), None);
        assert_eq!(clip_factor(0.5, 0.5), None);
        assert_eq!(clip_factor(0.0, 0.0), None);
        assert_eq!(clip_factor(f64::NAN, 0.5), None);
    }
}
