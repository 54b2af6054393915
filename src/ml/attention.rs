// ============================================================
// Layer 5 — Fixed-Point Multi-Head Self-Attention
// ============================================================
// x [B, N, E]
//   │ qkv linear            → [B, N, 3E]
//   │ split + reshape       → q, k, v  [B, H, N, E/H]
//   │ q·kᵀ / sqrt(E/H)      → scores   [B, H, N, N]
//   │ softmax over keys     → weights
//   │ weights · v           → context  [B, H, N, E/H]
//   │ quantize(context)        (Context placement)
//   │ merge heads           → [B, N, E]
//   │ out_proj + quantize   → y [B, N, E]
//
// With AttentionQuantization::Weights the post-softmax weights
// are quantized instead of the aggregated context. The scores
// themselves are never quantized, so softmax stays exact.

use burn::{
    nn::{Initializer, Linear},
    optim::GradientsParams,
    prelude::*,
    tensor::{activation::softmax, backend::AutodiffBackend},
};
use serde::{Deserialize, Serialize};

use crate::domain::error::{VitError, VitResult};
use crate::domain::scale::ScaleFactor;
use crate::ml::grad_norm::{linear_sq_sum, scale_linear};
use crate::ml::mlp::linear;
use crate::ml::quantize::QuantizeBackend;

/// Where the attention block quantizes between softmax and the output
/// projection.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum AttentionQuantization {
    /// Quantize the aggregated context `softmax(qkᵀ)·v`.
    #[default]
    Context,
    /// Quantize the post-softmax attention weights before aggregation.
    Weights,
}

#[derive(Config, Debug)]
pub struct FixedPointAttentionConfig {
    pub embed_dim: usize,
    pub num_heads: usize,
    pub scale:     f32,
    #[config(default = "AttentionQuantization::Context")]
    pub quantization: AttentionQuantization,
    #[config(default = "None")]
    pub initializer: Option<Initializer>,
}

impl FixedPointAttentionConfig {
    pub fn init<B: Backend>(&self, device: &B::Device) -> VitResult<FixedPointAttention<B>> {
        let scale = ScaleFactor::new(self.scale)?;
        if self.embed_dim == 0 || self.num_heads == 0 {
            return Err(VitError::config("attention width and head count must be nonzero"));
        }
        if self.embed_dim % self.num_heads != 0 {
            return Err(VitError::config(format!(
                "embed_dim {} is not divisible by num_heads {}",
                self.embed_dim, self.num_heads
            )));
        }

        Ok(FixedPointAttention {
            qkv:       linear(self.embed_dim, self.embed_dim * 3, &self.initializer, device),
            out_proj:  linear(self.embed_dim, self.embed_dim, &self.initializer, device),
            embed_dim: self.embed_dim,
            num_heads: self.num_heads,
            scale:     scale.get(),
            quantize_weights: self.quantization == AttentionQuantization::Weights,
        })
    }
}

#[derive(Module, Debug)]
pub struct FixedPointAttention<B: Backend> {
    pub qkv:      Linear<B>,
    pub out_proj: Linear<B>,
    embed_dim:    usize,
    num_heads:    usize,
    scale:        f32,
    quantize_weights: bool,
}

impl<B: Backend> FixedPointAttention<B> {
    pub fn head_dim(&self) -> usize {
        self.embed_dim / self.num_heads
    }

    pub fn quantization(&self) -> AttentionQuantization {
        if self.quantize_weights {
            AttentionQuantization::Weights
        } else {
            AttentionQuantization::Context
        }
    }

    /// `[B, N, E]` → `[B, H, N, E/H]`
    fn split_heads(&self, x: Tensor<B, 3>, batch: usize, seq_len: usize) -> Tensor<B, 4> {
        x.reshape([batch, seq_len, self.num_heads, self.head_dim()])
            .swap_dims(1, 2)
    }
}

impl<B: QuantizeBackend> FixedPointAttention<B> {
    /// Self-attention over `x: [batch, seq_len, embed_dim]`.
    pub fn forward(&self, x: Tensor<B, 3>) -> VitResult<Tensor<B, 3>> {
        let [batch, seq_len, width] = x.dims();
        if width != self.embed_dim {
            return Err(VitError::shape("FixedPointAttention input width", self.embed_dim, width));
        }

        let e = self.embed_dim;
        let qkv = self.qkv.forward(x);
        let q = self.split_heads(qkv.clone().slice([0..batch, 0..seq_len, 0..e]), batch, seq_len);
        let k = self.split_heads(qkv.clone().slice([0..batch, 0..seq_len, e..2 * e]), batch, seq_len);
        let v = self.split_heads(qkv.slice([0..batch, 0..seq_len, 2 * e..3 * e]), batch, seq_len);

        let scores = q.matmul(k.transpose()).div_scalar((self.head_dim() as f32).sqrt());
        let weights = softmax(scores, 3);

        let context = if self.quantize_weights {
            B::fixed_point_quantize(weights, self.scale).matmul(v)
        } else {
            B::fixed_point_quantize(weights.matmul(v), self.scale)
        };

        let merged = context.swap_dims(1, 2).reshape([batch, seq_len, self.embed_dim]);
        Ok(B::fixed_point_quantize(self.out_proj.forward(merged), self.scale))
    }
}

impl<B: AutodiffBackend> FixedPointAttention<B> {
    pub(crate) fn grad_sq_sum(&self, grads: &B::Gradients) -> f64 {
        linear_sq_sum(&self.qkv, grads) + linear_sq_sum(&self.out_proj, grads)
    }

    pub(crate) fn scale_grads(&self, grads: &mut GradientsParams, factor: f64) {
        scale_linear(&self.qkv, grads, factor);
        scale_linear(&self.out_proj, grads, factor);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::NdArray;
    use burn::tensor::Distribution;

    type TestBackend = NdArray;

    fn input(device: &<TestBackend as Backend>::Device) -> Tensor<TestBackend, 3> {
        Tensor::random([2, 16, 64], Distribution::Normal(0.0, 1.0), device)
    }

    #[test]
    fn test_preserves_shape() {
        let device = Default::default();
        let attn = FixedPointAttentionConfig::new(64, 4, 16.0).init::<TestBackend>(&device).unwrap();
        assert_eq!(attn.head_dim(), 16);
        let y = attn.forward(input(&device)).unwrap();
        assert_eq!(y.dims(), [2, 16, 64]);
    }

    #[test]
    fn test_weights_placement_preserves_shape() {
        let device = Default::default();
        let attn = FixedPointAttentionConfig::new(64, 8, 16.0)
            .with_quantization(AttentionQuantization::Weights)
            .init::<TestBackend>(&device)
            .unwrap();
        assert_eq!(attn.quantization(), AttentionQuantization::Weights);
        let y = attn.forward(input(&device)).unwrap();
        assert_eq!(y.dims(), [2, 16, 64]);
    }

    #[test]
    fn test_output_bounded() {
        let device = Default::default();
        let s = ScaleFactor::new(16.0).unwrap();
        let attn = FixedPointAttentionConfig::new(64, 4, s.get()).init::<TestBackend>(&device).unwrap();
        let y = attn.forward(input(&device).mul_scalar(50.0)).unwrap();
        for v in y.into_data().to_vec::<f32>().unwrap() {
            assert!(v >= s.min_value() && v <= s.max_value());
        }
    }

    #[test]
    fn test_indivisible_heads_is_config_error() {
        let device = Default::default();
        let result = FixedPointAttentionConfig::new(64, 5, 16.0).init::<TestBackend>(&device);
        assert!(matches!(result, Err(VitError::Configuration(_))));
    }

    #[test]
    fn test_width_mismatch_is_shape_error() {
        let device = Default::default();
        let attn = FixedPointAttentionConfig::new(64, 4, 16.0).init::<TestBackend>(&device).unwrap();
        let x = Tensor::<TestBackend, 3>::zeros([1, 4, 32], &device);
        assert!(matches!(attn.forward(x), Err(VitError::Shape { .. })));
    }
}
