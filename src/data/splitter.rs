// ============================================================
// Layer 4 — Train/Validation Splitter
// ============================================================
// Shuffles with a seeded StdRng, then cuts at
// round(len * train_fraction). The seed makes the split part of
// the run's configuration, so a resumed run validates on the
// same images it validated on before the checkpoint.

use rand::{rngs::StdRng, seq::SliceRandom, SeedableRng};

/// Shuffle `samples` with `seed` and split into (train, validation).
pub fn split_train_val<T>(mut samples: Vec<T>, train_fraction: f64, seed: u64) -> (Vec<T>, Vec<T>) {
    let mut rng = StdRng::seed_from_u64(seed);
    samples.shuffle(&mut rng);

    let total    = samples.len();
    let split_at = ((total as f64) * train_fraction.clamp(0.0, 1.0)).round() as usize;
    let val      = samples.split_off(split_at.min(total));

    tracing::debug!("Dataset split: {} training, {} validation", samples.len(), val.len());
    (samples, val)
}
