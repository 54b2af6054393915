// ============================================================
// Layer 2 — TrainUseCase
// ============================================================
// Orchestrates one training run:
//
//   Step 1: On resume, switch to the saved config   (Layer 6)
//   Step 2: Validate model + growth configuration   (Layer 5)
//   Step 3: Generate the synthetic image dataset    (Layer 4)
//   Step 4: Split train/validation                  (Layer 4)
//   Step 5: Run the training loop                   (Layer 5)
//
// train_config.json is written once, by the first run in a
// checkpoint directory; resumed runs only read it.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::data::dataset::ImageDataset;
use crate::infra::checkpoint::CheckpointManager;
use crate::ml::attention::AttentionQuantization;
use crate::ml::growth::GrowthConfig;
use crate::ml::model::VisionTransformerConfig;
use crate::ml::trainer::run_training;

// ─── Training Configuration ──────────────────────────────────────────────────
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainConfig {
    pub checkpoint_dir: String,

    // ── Model ────────────────────────────────────────────────────────────────
    pub image_size:    usize,
    pub patch_size:    usize,
    pub channels:      usize,
    pub num_classes:   usize,
    pub embed_dim:     usize,
    pub initial_depth: usize,
    pub num_heads:     usize,
    pub hidden_dim:    usize,
    pub scale:         f32,
    pub attention_quantization: AttentionQuantization,

    // ── Growth ───────────────────────────────────────────────────────────────
    pub min_epochs_before_growth: usize,
    pub grow_every_n_epochs:      usize,
    pub grad_threshold:           f64,
    pub loss_threshold:           f64,
    pub growth_init_std:          f64,

    // ── Optimisation and data ────────────────────────────────────────────────
    pub epochs:         usize,
    pub batch_size:     usize,
    pub lr:             f64,
    pub grad_clip:      Option<f32>,
    pub num_samples:    usize,
    pub train_fraction: f64,
    pub seed:           u64,
    pub resume:         bool,
    pub cpu:            bool,
}

impl Default for TrainConfig {
    fn default() -> Self {
        Self {
            checkpoint_dir: "checkpoints".to_string(),
            image_size:     32,
            patch_size:     4,
            channels:       3,
            num_classes:    3,
            embed_dim:      512,
            initial_depth:  3,
            num_heads:      16,
            hidden_dim:     256,
            scale:          256.0,
            attention_quantization: AttentionQuantization::Context,
            min_epochs_before_growth: 20,
            grow_every_n_epochs:      20,
            grad_threshold:           0.3,
            loss_threshold:           0.95,
            growth_init_std:          0.02,
            epochs:         200,
            batch_size:     64,
            lr:             1e-3,
            grad_clip:      Some(0.3),
            num_samples:    1536,
            train_fraction: 0.8,
            seed:           42,
            resume:         false,
            cpu:            false,
        }
    }
}

impl TrainConfig {
    pub fn model_config(&self) -> VisionTransformerConfig {
        VisionTransformerConfig::new(
            self.image_size, self.patch_size, self.num_classes, self.embed_dim,
            self.initial_depth, self.num_heads, self.hidden_dim, self.scale,
        )
        .with_channels(self.channels)
        .with_attention_quantization(self.attention_quantization)
    }

    pub fn growth_config(&self) -> GrowthConfig {
        GrowthConfig::new()
            .with_min_epochs_before_growth(self.min_epochs_before_growth)
            .with_grow_every_n_epochs(self.grow_every_n_epochs)
            .with_grad_threshold(self.grad_threshold)
            .with_loss_threshold(self.loss_threshold)
            .with_growth_init_std(self.growth_init_std)
    }

    /// The config a resumed run continues with: everything that shapes
    /// the model, the data or the growth decisions comes from `self`
    /// (the saved config); only the run length, the backend and the
    /// checkpoint location come from `requested`.
    pub fn resumed_with(&self, requested: &TrainConfig) -> TrainConfig {
        TrainConfig {
            checkpoint_dir: requested.checkpoint_dir.clone(),
            epochs:         requested.epochs,
            cpu:            requested.cpu,
            resume:         true,
            ..self.clone()
        }
    }
}

/// Resolve the config a run actually trains with.
pub fn effective_config(requested: &TrainConfig, ckpt_manager: &CheckpointManager) -> Result<TrainConfig> {
    if !requested.resume {
        return Ok(requested.clone());
    }
    let saved = ckpt_manager
        .load_config()
        .context("Cannot resume without the saved training config")?;
    Ok(saved.resumed_with(requested))
}

pub struct TrainUseCase {
    config: TrainConfig,
}

impl TrainUseCase {
    pub fn new(config: TrainConfig) -> Self {
        Self { config }
    }

    pub fn execute(&self) -> Result<()> {
        // ── Step 1: Saved config wins on resume ──────────────────────────────
        let ckpt_manager = CheckpointManager::new(&self.config.checkpoint_dir)?;
        let cfg = &effective_config(&self.config, &ckpt_manager)?;

        // ── Step 2: Fail fast on bad hyperparameters ─────────────────────────
        cfg.model_config().validate().context("Invalid model configuration")?;
        cfg.growth_config().validate().context("Invalid growth configuration")?;

        // ── Step 3: Synthetic dataset ────────────────────────────────────────
        let data = ImageDataset::synthetic(
            cfg.num_samples, cfg.num_classes, cfg.channels, cfg.image_size, cfg.seed,
        );
        tracing::info!("Generated {} synthetic images", data.sample_count());

        // ── Step 4: Train / validation split ─────────────────────────────────
        let (train_dataset, val_dataset) = data.split(cfg.train_fraction, cfg.seed);
        tracing::info!(
            "Split: {} train, {} validation",
            train_dataset.sample_count(),
            val_dataset.sample_count()
        );

        // ── Step 5: Training loop ────────────────────────────────────────────
        run_training(cfg, train_dataset, val_dataset, ckpt_manager)
    }
}
