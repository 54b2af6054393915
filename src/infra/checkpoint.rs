// ============================================================
// Layer 6 — Checkpoint Manager
// ============================================================
// A checkpoint is everything needed to continue a run with the
// same growth behaviour:
//
//   checkpoints/
//     model_epoch_{n}.mpk.gz    ← model record (full precision)
//     growth_epoch_{n}.json     ← GrowthState after epoch n
//     latest_epoch.json         ← { epoch, depth } of the newest save
//     train_config.json         ← TrainConfig
//
// A Burn record only loads into a module of the same structure,
// and the encoder stack may have grown since initial_depth. So
// loading first appends fresh layers up to the saved depth, then
// overwrites every parameter from the record.

use anyhow::{bail, Context, Result};
use burn::{
    prelude::*,
    record::{FullPrecisionSettings, NamedMpkGzFileRecorder, Recorder},
};
use serde::{Deserialize, Serialize};
use std::{fs, path::PathBuf};

use crate::application::train_use_case::TrainConfig;
use crate::domain::traits::GrowableModel;
use crate::ml::growth::GrowthState;
use crate::ml::model::VisionTransformer;

type ModelRecorder = NamedMpkGzFileRecorder<FullPrecisionSettings>;

/// Pointer to the newest checkpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckpointMeta {
    /// One-based epoch number the checkpoint was written after.
    pub epoch: usize,
    /// Encoder depth of the saved model.
    pub depth: usize,
}

pub struct CheckpointManager {
    dir: PathBuf,
}

impl CheckpointManager {
    pub fn new(dir: impl Into<String>) -> Result<Self> {
        let dir = PathBuf::from(dir.into());
        fs::create_dir_all(&dir)
            .with_context(|| format!("Cannot create checkpoint directory '{}'", dir.display()))?;
        Ok(Self { dir })
    }

    /// Save model weights and growth state for `epoch`, then move the
    /// latest pointer.
    pub fn save<B: Backend>(
        &self,
        model:  &VisionTransformer<B>,
        growth: &GrowthState,
        epoch:  usize,
    ) -> Result<()> {
        let path = self.dir.join(format!("model_epoch_{epoch}"));
        ModelRecorder::new()
            .record(model.clone().into_record(), path.clone())
            .with_context(|| format!("Failed to save checkpoint to '{}'", path.display()))?;

        let growth_path = self.dir.join(format!("growth_epoch_{epoch}.json"));
        fs::write(&growth_path, serde_json::to_string_pretty(growth)?)
            .with_context(|| format!("Failed to write '{}'", growth_path.display()))?;

        let meta = CheckpointMeta { epoch, depth: model.depth() };
        fs::write(self.dir.join("latest_epoch.json"), serde_json::to_string(&meta)?)
            .context("Failed to write latest_epoch.json")?;

        tracing::debug!("Saved checkpoint: epoch {} depth {}", epoch, meta.depth);
        Ok(())
    }

    /// Read the newest checkpoint pointer.
    pub fn latest(&self) -> Result<CheckpointMeta> {
        let path = self.dir.join("latest_epoch.json");
        let s = fs::read_to_string(&path)
            .context("Cannot find 'latest_epoch.json'. Have you run 'train' first?")?;
        Ok(serde_json::from_str(&s)?)
    }

    pub fn load_growth_state(&self, epoch: usize) -> Result<GrowthState> {
        let path = self.dir.join(format!("growth_epoch_{epoch}.json"));
        let s = fs::read_to_string(&path)
            .with_context(|| format!("Cannot read growth state '{}'", path.display()))?;
        Ok(serde_json::from_str(&s)?)
    }

    /// Grow `model` to `depth` layers, then load the weights saved after
    /// `epoch` into it.
    pub fn load_model<B: Backend>(
        &self,
        mut model: VisionTransformer<B>,
        epoch:     usize,
        depth:     usize,
        init_std:  f64,
        device:    &B::Device,
    ) -> Result<VisionTransformer<B>> {
        if model.depth() > depth {
            bail!(
                "Checkpoint depth {} is shallower than the freshly built model ({} layers)",
                depth,
                model.depth()
            );
        }
        while model.depth() < depth {
            let layer = model.spawn_layer(init_std)?;
            model.append_layer(layer)?;
        }

        let path = self.dir.join(format!("model_epoch_{epoch}"));
        tracing::info!("Loading checkpoint from epoch {} ({} layers)", epoch, depth);

        let record = ModelRecorder::new()
            .load(path.clone(), device)
            .with_context(|| format!("Cannot load checkpoint '{}'", path.display()))?;

        Ok(model.load_record(record))
    }

    /// Restore model, growth state and pointer of the newest checkpoint.
    pub fn load_latest<B: Backend>(
        &self,
        model:    VisionTransformer<B>,
        init_std: f64,
        device:   &B::Device,
    ) -> Result<(VisionTransformer<B>, GrowthState, CheckpointMeta)> {
        let meta   = self.latest()?;
        let model  = self.load_model(model, meta.epoch, meta.depth, init_std, device)?;
        let growth = self.load_growth_state(meta.epoch)?;
        Ok((model, growth, meta))
    }

    pub fn save_config(&self, cfg: &TrainConfig) -> Result<()> {
        let path = self.dir.join("train_config.json");
        fs::write(&path, serde_json::to_string_pretty(cfg)?)
            .with_context(|| format!("Cannot write config to '{}'", path.display()))?;
        tracing::debug!("Saved training config to '{}'", path.display());
        Ok(())
    }

    pub fn load_config(&self) -> Result<TrainConfig> {
        let path = self.dir.join("train_config.json");
        let json = fs::read_to_string(&path)
            .with_context(|| format!("Cannot read config from '{}'", path.display()))?;
        Ok(serde_json::from_str(&json)?)
    }
}
