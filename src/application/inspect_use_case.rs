// ============================================================
// Layer 2 — InspectUseCase
// ============================================================
// Reads a checkpoint directory without building a model and
// reports where the run stands: latest epoch, current depth,
// the epochs at which growth fired and the growth phase.

use anyhow::Result;

use crate::infra::checkpoint::CheckpointManager;
use crate::ml::growth::{GrowthPhase, GrowthState};

#[derive(Debug, Clone, PartialEq)]
pub struct CheckpointReport {
    pub epoch:          usize,
    pub initial_depth:  usize,
    pub depth:          usize,
    /// One-based epoch numbers at which a layer was appended.
    pub growth_epochs:  Vec<usize>,
    pub phase:          GrowthPhase,
}

impl CheckpointReport {
    fn new(epoch: usize, initial_depth: usize, depth: usize, growth: &GrowthState) -> Self {
        Self {
            epoch,
            initial_depth,
            depth,
            growth_epochs: growth.growth_epochs.iter().map(|e| e + 1).collect(),
            phase: growth.phase,
        }
    }
}

pub struct InspectUseCase {
    ckpt_manager: CheckpointManager,
}

impl InspectUseCase {
    pub fn new(checkpoint_dir: impl Into<String>) -> Result<Self> {
        Ok(Self { ckpt_manager: CheckpointManager::new(checkpoint_dir)? })
    }

    pub fn report(&self) -> Result<CheckpointReport> {
        let cfg    = self.ckpt_manager.load_config()?;
        let meta   = self.ckpt_manager.latest()?;
        let growth = self.ckpt_manager.load_growth_state(meta.epoch)?;
        Ok(CheckpointReport::new(meta.epoch, cfg.initial_depth, meta.depth, &growth))
    }
}
