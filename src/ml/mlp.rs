use burn::{
    nn::{Initializer, Linear, LinearConfig},
    optim::GradientsParams,
    prelude::*,
    tensor::{activation::relu, backend::AutodiffBackend},
};

use crate::domain::error::{VitError, VitResult};
use crate::domain::scale::ScaleFactor;
use crate::ml::grad_norm::{linear_sq_sum, scale_linear};
use crate::ml::quantize::QuantizeBackend;

#[derive(Config, Debug)]
pub struct FixedPointMlpConfig {
    pub d_input:  usize,
    pub d_hidden: usize,
    pub d_output: usize,
    pub scale:    f32,
    /// `None` keeps Burn's default linear initializer.
    #[config(default = "None")]
    pub initializer: Option<Initializer>,
}

impl FixedPointMlpConfig {
    pub fn init<B: Backend>(&self, device: &B::Device) -> VitResult<FixedPointMlp<B>> {
        let scale = ScaleFactor::new(self.scale)?;
        if self.d_input == 0 || self.d_hidden == 0 || self.d_output == 0 {
            return Err(VitError::config("MLP widths must be nonzero"));
        }

        Ok(FixedPointMlp {
            linear1: linear(self.d_input, self.d_hidden, &self.initializer, device),
            linear2: linear(self.d_hidden, self.d_output, &self.initializer, device),
            d_input: self.d_input,
            scale:   scale.get(),
        })
    }
}

pub(crate) fn linear<B: Backend>(
    d_input:     usize,
    d_output:    usize,
    initializer: &Option<Initializer>,
    device:      &B::Device,
) -> Linear<B> {
    let config = LinearConfig::new(d_input, d_output);
    match initializer {
        Some(init) => config.with_initializer(init.clone()).init(device),
        None => config.init(device),
    }
}

/// Two-layer feed-forward block, quantized after each linear transform.
#[derive(Module, Debug)]
pub struct FixedPointMlp<B: Backend> {
    pub linear1: Linear<B>,
    pub linear2: Linear<B>,
    d_input:     usize,
    scale:       f32,
}

impl<B: QuantizeBackend> FixedPointMlp<B> {
    /// `[.., d_input]` → `[.., d_output]`
    pub fn forward<const D: usize>(&self, x: Tensor<B, D>) -> VitResult<Tensor<B, D>> {
        let width = x.dims()[D - 1];
        if width != self.d_input {
            return Err(VitError::shape("FixedPointMlp input width", self.d_input, width));
        }

        let h = B::fixed_point_quantize(self.linear1.forward(x), self.scale);
        let h = relu(h);
        Ok(B::fixed_point_quantize(self.linear2.forward(h), self.scale))
    }
}

impl<B: AutodiffBackend> FixedPointMlp<B> {
    pub(crate) fn grad_sq_sum(&self, grads: &B::Gradients) -> f64 {
        linear_sq_sum(&self.linear1, grads) + linear_sq_sum(&self.linear2, grads)
    }

    pub(crate) fn scale_grads(&self, grads: &mut GradientsParams, factor: f64) {
        scale_linear(&self.linear1, grads, factor);
        scale_linear(&self.linear2, grads, factor);
    }
}
