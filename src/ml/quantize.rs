// ============================================================
// Layer 5 — Fixed-Point Quantizer
// ============================================================
// Forward:  y = clamp(round(x * s), -128, 127) / s
// Backward: dy/dx = 1 where x * s lies in [-128, 127], else 0
//
// Rounding has zero gradient almost everywhere, so letting
// autodiff differentiate the forward expression would stall
// training. Instead the operator is a backend extension:
//
//   QuantizeBackend                 — trait every model backend implements
//   impl for NdArray / Wgpu         — forward only (no graph)
//   impl for Autodiff<B, C>         — forward on B plus a hand-written
//                                     Backward step that multiplies the
//                                     incoming gradient by the range mask
//
// The mask is computed during the forward pass and stored as the
// node state, so the backward step is a single element-wise mul.

use burn::{
    backend::{
        autodiff::{
            checkpoint::{base::Checkpointer, strategy::CheckpointStrategy},
            grads::Gradients,
            ops::{Backward, Ops, OpsKind},
        },
        Autodiff, NdArray, Wgpu,
    },
    prelude::*,
    tensor::{ops::FloatTensor, TensorPrimitive},
};

use crate::domain::error::VitResult;
use crate::domain::scale::{ScaleFactor, QMAX, QMIN};

/// Backends that can run the simulated fixed-point quantizer.
pub trait QuantizeBackend: Backend {
    /// Quantize `x` onto the grid of step `1 / scale`.
    ///
    /// `scale` has already been validated as positive by [`ScaleFactor`].
    fn fixed_point_quantize<const D: usize>(x: Tensor<Self, D>, scale: f32) -> Tensor<Self, D> {
        quantize_forward(x, scale)
    }
}

impl QuantizeBackend for NdArray {}

impl QuantizeBackend for Wgpu {}

impl<B: QuantizeBackend, C: CheckpointStrategy> QuantizeBackend for Autodiff<B, C> {
    fn fixed_point_quantize<const D: usize>(x: Tensor<Self, D>, scale: f32) -> Tensor<Self, D> {
        #[derive(Debug)]
        struct QuantizeBackward;

        impl<B: Backend> Backward<B, 1> for QuantizeBackward {
            // Range mask: 1.0 where the input was representable.
            type State = FloatTensor<B>;

            fn backward(
                self,
                ops: Ops<Self::State, 1>,
                grads: &mut Gradients,
                _checkpointer: &mut Checkpointer,
            ) {
                let [node_x] = ops.parents;
                let grad = grads.consume::<B>(&ops.node);

                if let Some(node) = node_x {
                    grads.register::<B>(node.id, B::float_mul(grad, ops.state));
                }
            }
        }

        let x = x.into_primitive().tensor();
        let inner = Tensor::<B, D>::from_primitive(TensorPrimitive::Float(x.primitive.clone()));
        let output = B::fixed_point_quantize(inner.clone(), scale)
            .into_primitive()
            .tensor();

        let output = match QuantizeBackward
            .prepare::<C>([x.node.clone()])
            .compute_bound()
            .stateful()
        {
            OpsKind::Tracked(prep) => {
                let mask = ste_mask(inner, scale).into_primitive().tensor();
                prep.finish(mask, output)
            }
            OpsKind::UnTracked(prep) => prep.finish(output),
        };

        Tensor::from_primitive(TensorPrimitive::Float(output))
    }
}

/// Plain forward quantization with no gradient rule attached.
pub fn quantize_forward<B: Backend, const D: usize>(x: Tensor<B, D>, scale: f32) -> Tensor<B, D> {
    x.mul_scalar(scale)
        .round()
        .clamp(QMIN, QMAX)
        .div_scalar(scale)
}

/// 1.0 where `x * scale` is inside the signed 8-bit range, 0.0 where it
/// would be clamped.
pub fn ste_mask<B: Backend, const D: usize>(x: Tensor<B, D>, scale: f32) -> Tensor<B, D> {
    let scaled = x.mul_scalar(scale);
    scaled.clone().clamp(QMIN, QMAX).equal(scaled).float()
}

/// Quantize `x` with straight-through gradients on autodiff backends.
pub fn quantize<B: QuantizeBackend, const D: usize>(x: Tensor<B, D>, scale: ScaleFactor) -> Tensor<B, D> {
    B::fixed_point_quantize(x, scale.get())
}

/// Like [`quantize`], validating a raw scale first.
pub fn try_quantize<B: QuantizeBackend, const D: usize>(x: Tensor<B, D>, scale: f32) -> VitResult<Tensor<B, D>> {
    Ok(quantize(x, ScaleFactor::new(scale)?))
}
