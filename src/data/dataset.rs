use burn::data::dataset::Dataset;
use rand::{rngs::StdRng, Rng, SeedableRng};
use serde::{Deserialize, Serialize};

use crate::data::splitter::split_train_val;

/// One labelled image, stored channel-major: `[channels, size, size]`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImageSample {
    pub pixels:   Vec<f32>,
    pub label:    usize,
    pub channels: usize,
    pub size:     usize,
}

impl ImageSample {
    pub fn dims(&self) -> [usize; 3] {
        [self.channels, self.size, self.size]
    }
}

pub struct ImageDataset {
    samples: Vec<ImageSample>,
}

impl ImageDataset {
    pub fn new(samples: Vec<ImageSample>) -> Self { Self { samples } }

    pub fn sample_count(&self) -> usize { self.samples.len() }

    /// Seeded, learnable toy data: each class owns a fixed prototype
    /// image in `[-1, 1]` and every sample is its prototype plus
    /// uniform noise in `[-0.5, 0.5]`.
    pub fn synthetic(
        num_samples: usize,
        num_classes: usize,
        channels:    usize,
        size:        usize,
        seed:        u64,
    ) -> Self {
        let mut rng = StdRng::seed_from_u64(seed);
        let pixels_per_image = channels * size * size;

        let num_classes = num_classes.max(1);
        let prototypes: Vec<Vec<f32>> = (0..num_classes)
            .map(|_| (0..pixels_per_image).map(|_| rng.gen_range(-1.0..=1.0)).collect())
            .collect();

        let samples = (0..num_samples)
            .map(|i| {
                let label = i % num_classes;
                let pixels = prototypes[label]
                    .iter()
                    .map(|&p| p + rng.gen_range(-0.5..=0.5))
                    .collect();
                ImageSample { pixels, label, channels, size }
            })
            .collect();

        Self { samples }
    }

    /// Shuffle with `seed` and split into (train, validation).
    pub fn split(self, train_fraction: f64, seed: u64) -> (Self, Self) {
        let (train, val) = split_train_val(self.samples, train_fraction, seed);
        (Self::new(train), Self::new(val))
    }
}

impl Dataset<ImageSample> for ImageDataset {
    fn get(&self, index: usize) -> Option<ImageSample> {
        self.samples.get(index).cloned()
    }

    fn len(&self) -> usize {
        self.samples.len()
    }
}
