use burn::{
    module::Param,
    nn::{
        loss::CrossEntropyLossConfig,
        Initializer, Linear, LinearConfig,
    },
    optim::GradientsParams,
    prelude::*,
    tensor::backend::AutodiffBackend,
};

use crate::domain::error::{VitError, VitResult};
use crate::domain::scale::ScaleFactor;
use crate::domain::traits::GrowableModel;
use crate::ml::attention::AttentionQuantization;
use crate::ml::encoder::{FixedPointEncoderLayer, FixedPointEncoderLayerConfig};
use crate::ml::grad_norm::{clip_factor, linear_sq_sum, param_sq_sum, scale_linear, scale_param};
use crate::ml::quantize::QuantizeBackend;

// NOTE: #[derive(Config)] already generates Clone and Serialize/Deserialize.
#[derive(Config, Debug)]
pub struct VisionTransformerConfig {
    pub image_size:    usize,
    pub patch_size:    usize,
    pub num_classes:   usize,
    pub embed_dim:     usize,
    pub initial_depth: usize,
    pub num_heads:     usize,
    pub hidden_dim:    usize,
    pub scale:         f32,
    #[config(default = 3)]
    pub channels:      usize,
    #[config(default = "AttentionQuantization::Context")]
    pub attention_quantization: AttentionQuantization,
}

impl VisionTransformerConfig {
    pub fn num_patches(&self) -> usize {
        let per_side = self.image_size / self.patch_size;
        per_side * per_side
    }

    pub fn patch_dim(&self) -> usize {
        self.channels * self.patch_size * self.patch_size
    }

    /// Check every hyperparameter before any tensor is allocated.
    pub fn validate(&self) -> VitResult<()> {
        ScaleFactor::new(self.scale)?;
        if self.patch_size == 0 || self.image_size == 0 {
            return Err(VitError::config("image_size and patch_size must be nonzero"));
        }
        if self.image_size % self.patch_size != 0 {
            return Err(VitError::shape(
                "image_size divisible by patch_size",
                format!("a multiple of {}", self.patch_size),
                self.image_size,
            ));
        }
        if [self.num_classes, self.embed_dim, self.num_heads, self.hidden_dim, self.channels]
            .contains(&0)
        {
            return Err(VitError::config(
                "num_classes, embed_dim, num_heads, hidden_dim and channels must be nonzero",
            ));
        }
        if self.embed_dim % self.num_heads != 0 {
            return Err(VitError::config(format!(
                "embed_dim {} is not divisible by num_heads {}",
                self.embed_dim, self.num_heads
            )));
        }
        Ok(())
    }

    /// The block every encoder layer of this model is built from.
    pub fn layer_config(&self) -> FixedPointEncoderLayerConfig {
        FixedPointEncoderLayerConfig::new(self.embed_dim, self.num_heads, self.hidden_dim, self.scale)
            .with_quantization(self.attention_quantization)
    }

    pub fn init<B: Backend>(&self, device: &B::Device) -> VitResult<VisionTransformer<B>> {
        self.validate()?;

        let embedding = LinearConfig::new(self.patch_dim(), self.embed_dim).init(device);
        let pos_embedding = Param::from_tensor(Tensor::zeros(
            [1, self.num_patches(), self.embed_dim],
            device,
        ));
        let layer_config = self.layer_config();
        let layers = (0..self.initial_depth)
            .map(|_| layer_config.init(device))
            .collect::<VitResult<Vec<_>>>()?;
        let head = LinearConfig::new(self.embed_dim, self.num_classes).init(device);

        Ok(VisionTransformer {
            embedding,
            pos_embedding,
            layers,
            head,
            image_size: self.image_size,
            patch_size: self.patch_size,
            channels:   self.channels,
            embed_dim:  self.embed_dim,
            num_heads:  self.num_heads,
            hidden_dim: self.hidden_dim,
            scale:      self.scale,
            quantize_attention_weights:
                self.attention_quantization == AttentionQuantization::Weights,
        })
    }
}

/// Fixed-point ViT with an append-only encoder stack.
#[derive(Module, Debug)]
pub struct VisionTransformer<B: Backend> {
    pub embedding:     Linear<B>,
    pub pos_embedding: Param<Tensor<B, 3>>,
    pub layers:        Vec<FixedPointEncoderLayer<B>>,
    pub head:          Linear<B>,
    image_size:        usize,
    patch_size:        usize,
    channels:          usize,
    embed_dim:         usize,
    num_heads:         usize,
    hidden_dim:        usize,
    scale:             f32,
    quantize_attention_weights: bool,
}

impl<B: Backend> VisionTransformer<B> {
    pub fn layers(&self) -> &[FixedPointEncoderLayer<B>] {
        &self.layers
    }

    pub fn device(&self) -> B::Device {
        self.head.weight.val().device()
    }

    fn layer_config(&self) -> FixedPointEncoderLayerConfig {
        let quantization = if self.quantize_attention_weights {
            AttentionQuantization::Weights
        } else {
            AttentionQuantization::Context
        };
        FixedPointEncoderLayerConfig::new(self.embed_dim, self.num_heads, self.hidden_dim, self.scale)
            .with_quantization(quantization)
    }

    /// `[B, C, H, W]` → `[B, num_patches, C * P * P]`
    ///
    /// Patches are taken row-major over the image grid and each one is
    /// flattened channel-major, then row, then column.
    fn patchify(&self, images: Tensor<B, 4>) -> VitResult<Tensor<B, 3>> {
        let [batch, channels, height, width] = images.dims();
        let p = self.patch_size;

        if height % p != 0 || width % p != 0 {
            return Err(VitError::shape(
                "image divisible by patch_size",
                format!("multiples of {p}"),
                format!("{height}x{width}"),
            ));
        }
        if height != self.image_size || width != self.image_size {
            return Err(VitError::shape(
                "image size",
                format!("{0}x{0}", self.image_size),
                format!("{height}x{width}"),
            ));
        }
        if channels != self.channels {
            return Err(VitError::shape("image channels", self.channels, channels));
        }

        let (gh, gw) = (height / p, width / p);
        Ok(images
            .reshape([batch, channels, gh, p, gw, p])
            .permute([0, 2, 4, 1, 3, 5])
            .reshape([batch, gh * gw, channels * p * p]))
    }
}

impl<B: QuantizeBackend> VisionTransformer<B> {
    /// images: `[batch, channels, image_size, image_size]` → logits: `[batch, num_classes]`
    pub fn forward(&self, images: Tensor<B, 4>) -> VitResult<Tensor<B, 2>> {
        let patches = self.patchify(images)?;
        let [batch, num_patches, _] = patches.dims();

        let x = B::fixed_point_quantize(self.embedding.forward(patches), self.scale);
        let pos = self.pos_embedding.val().expand(Shape::new([batch, num_patches, self.embed_dim]));
        let mut x = B::fixed_point_quantize(x + pos, self.scale);

        for layer in &self.layers {
            x = layer.forward(x)?;
        }

        // Global average pool over the patch sequence.
        let pooled = x.mean_dim(1).reshape([batch, self.embed_dim]);
        Ok(self.head.forward(pooled))
    }

    /// Cross-entropy loss alongside the logits it was computed from.
    pub fn forward_loss(
        &self,
        images:  Tensor<B, 4>,
        targets: Tensor<B, 1, Int>,
    ) -> VitResult<(Tensor<B, 1>, Tensor<B, 2>)> {
        let logits = self.forward(images)?;
        let loss = CrossEntropyLossConfig::new()
            .init(&logits.device())
            .forward(logits.clone(), targets);
        Ok((loss, logits))
    }
}

impl<B: AutodiffBackend> VisionTransformer<B> {
    /// Global L2 norm over every parameter gradient in `grads`.
    pub fn grad_norm(&self, grads: &B::Gradients) -> f64 {
        let layers: f64 = self.layers.iter().map(|l| l.grad_sq_sum(grads)).sum();
        let total = linear_sq_sum(&self.embedding, grads)
            + param_sq_sum(&self.pos_embedding, grads)
            + layers
            + linear_sq_sum(&self.head, grads);
        total.sqrt()
    }

    /// Rescale every gradient in `grads` so their global L2 norm is at most
    /// `max_norm`, given the pre-clip norm from [`Self::grad_norm`].
    /// Returns the factor applied, if any.
    pub fn clip_grad_norm(&self, grads: &mut GradientsParams, norm: f64, max_norm: f64) -> Option<f64> {
        let factor = clip_factor(norm, max_norm)?;
        scale_linear(&self.embedding, grads, factor);
        scale_param(&self.pos_embedding, grads, factor);
        for layer in &self.layers {
            layer.scale_grads(grads, factor);
        }
        scale_linear(&self.head, grads, factor);
        Some(factor)
    }
}

impl<B: Backend> GrowableModel for VisionTransformer<B> {
    type Layer = FixedPointEncoderLayer<B>;

    fn depth(&self) -> usize {
        self.layers.len()
    }

    fn spawn_layer(&self, init_std: f64) -> VitResult<Self::Layer> {
        self.layer_config()
            .with_initializer(Some(Initializer::Normal { mean: 0.0, std: init_std }))
            .init(&self.device())
    }

    fn append_layer(&mut self, layer: Self::Layer) -> VitResult<()> {
        if layer.embed_dim() != self.embed_dim {
            return Err(VitError::shape("appended layer width", self.embed_dim, layer.embed_dim()));
        }
        if layer.scale() != self.scale {
            return Err(VitError::config(format!(
                "appended layer scale {} differs from model scale {}",
                layer.scale(),
                self.scale
            )));
        }
        self.layers.push(layer);
        tracing::debug!("Encoder stack grew to {} layers", self.layers.len());
        Ok(())
    }
}
