// ============================================================
// Layer 5 — Fixed-Point Encoder Layer
// ============================================================
// Pre-norm transformer block with every residual re-quantized:
//
//   a  = q( attn( norm1(x) ) )     x1 = q( x  + a )
//   m  = q( mlp ( norm2(x1) ) )    y  = q( x1 + m )
//
// q(·) is the fixed-point quantizer at the layer's scale, so no
// full-precision sum survives from one layer to the next.

use burn::{
    nn::{Initializer, LayerNorm, LayerNormConfig},
    optim::GradientsParams,
    prelude::*,
    tensor::backend::AutodiffBackend,
};

use crate::domain::error::{VitError, VitResult};
use crate::domain::scale::ScaleFactor;
use crate::ml::attention::{AttentionQuantization, FixedPointAttention, FixedPointAttentionConfig};
use crate::ml::grad_norm::{layer_norm_sq_sum, scale_layer_norm};
use crate::ml::mlp::{FixedPointMlp, FixedPointMlpConfig};
use crate::ml::quantize::QuantizeBackend;

#[derive(Config, Debug)]
pub struct FixedPointEncoderLayerConfig {
    pub embed_dim:  usize,
    pub num_heads:  usize,
    pub hidden_dim: usize,
    pub scale:      f32,
    #[config(default = "AttentionQuantization::Context")]
    pub quantization: AttentionQuantization,
    /// Initializer for every linear in the block. Norms always start
    /// at `gamma = 1, beta = 0`.
    #[config(default = "None")]
    pub initializer: Option<Initializer>,
}

impl FixedPointEncoderLayerConfig {
    pub fn init<B: Backend>(&self, device: &B::Device) -> VitResult<FixedPointEncoderLayer<B>> {
        let scale = ScaleFactor::new(self.scale)?;

        let self_attn = FixedPointAttentionConfig::new(self.embed_dim, self.num_heads, self.scale)
            .with_quantization(self.quantization)
            .with_initializer(self.initializer.clone())
            .init(device)?;
        let mlp = FixedPointMlpConfig::new(self.embed_dim, self.hidden_dim, self.embed_dim, self.scale)
            .with_initializer(self.initializer.clone())
            .init(device)?;

        Ok(FixedPointEncoderLayer {
            self_attn,
            mlp,
            norm1:     LayerNormConfig::new(self.embed_dim).init(device),
            norm2:     LayerNormConfig::new(self.embed_dim).init(device),
            embed_dim: self.embed_dim,
            scale:     scale.get(),
        })
    }
}

#[derive(Module, Debug)]
pub struct FixedPointEncoderLayer<B: Backend> {
    pub self_attn: FixedPointAttention<B>,
    pub mlp:       FixedPointMlp<B>,
    pub norm1:     LayerNorm<B>,
    pub norm2:     LayerNorm<B>,
    embed_dim:     usize,
    scale:         f32,
}

impl<B: Backend> FixedPointEncoderLayer<B> {
    pub fn embed_dim(&self) -> usize {
        self.embed_dim
    }

    pub fn scale(&self) -> f32 {
        self.scale
    }
}

impl<B: QuantizeBackend> FixedPointEncoderLayer<B> {
    /// Shape-preserving: `[batch, seq_len, embed_dim]` in and out.
    pub fn forward(&self, x: Tensor<B, 3>) -> VitResult<Tensor<B, 3>> {
        let width = x.dims()[2];
        if width != self.embed_dim {
            return Err(VitError::shape("FixedPointEncoderLayer input width", self.embed_dim, width));
        }

        // ── Attention sub-block ──────────────────────────────────────────────
        let a = self.self_attn.forward(self.norm1.forward(x.clone()))?;
        let a = B::fixed_point_quantize(a, self.scale);
        let x1 = B::fixed_point_quantize(x + a, self.scale);

        // ── Feed-forward sub-block ───────────────────────────────────────────
        let m = self.mlp.forward(self.norm2.forward(x1.clone()))?;
        let m = B::fixed_point_quantize(m, self.scale);
        Ok(B::fixed_point_quantize(x1 + m, self.scale))
    }
}

impl<B: AutodiffBackend> FixedPointEncoderLayer<B> {
    pub(crate) fn grad_sq_sum(&self, grads: &B::Gradients) -> f64 {
        self.self_attn.grad_sq_sum(grads)
            + self.mlp.grad_sq_sum(grads)
            + layer_norm_sq_sum(&self.norm1, grads)
            + layer_norm_sq_sum(&self.norm2, grads)
    }

    pub(crate) fn scale_grads(&self, grads: &mut GradientsParams, factor: f64) {
        self.self_attn.scale_grads(grads, factor);
        self.mlp.scale_grads(grads, factor);
        scale_layer_norm(&self.norm1, grads, factor);
        scale_layer_norm(&self.norm2, grads, factor);
    }
}
