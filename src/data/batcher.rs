// ============================================================
// Layer 4 — Image Batcher
// ============================================================
// Implements Burn's Batcher trait: Vec<ImageSample> → ImageBatch.
//
//   pixels:  N × [C·H·W] flattened → Tensor [N, C, H, W]
//   labels:  N × usize             → Tensor [N] (Int)
//
// Every sample in a dataset shares the same dimensions, so the
// first item fixes the batch shape.

use burn::{
    data::dataloader::batcher::Batcher,
    prelude::*,
};

use crate::data::dataset::ImageSample;

#[derive(Debug, Clone)]
pub struct ImageBatch<B: Backend> {
    /// `[batch, channels, size, size]`
    pub images:  Tensor<B, 4>,
    /// `[batch]` class indices
    pub targets: Tensor<B, 1, Int>,
}

#[derive(Clone, Debug)]
pub struct ImageBatcher<B: Backend> {
    pub device: B::Device,
}

impl<B: Backend> ImageBatcher<B> {
    pub fn new(device: B::Device) -> Self {
        Self { device }
    }
}

impl<B: Backend> Batcher<ImageSample, ImageBatch<B>> for ImageBatcher<B> {
    fn batch(&self, items: Vec<ImageSample>) -> ImageBatch<B> {
        let batch_size = items.len();
        let [channels, height, width] = items[0].dims();

        let pixels: Vec<f32> = items
            .iter()
            .flat_map(|s| s.pixels.iter().copied())
            .collect();
        let labels: Vec<i32> = items.iter().map(|s| s.label as i32).collect();

        let images = Tensor::<B, 1>::from_floats(pixels.as_slice(), &self.device)
            .reshape([batch_size, channels, height, width]);
        let targets = Tensor::<B, 1, Int>::from_ints(labels.as_slice(), &self.device);

        ImageBatch { images, targets }
    }
}
