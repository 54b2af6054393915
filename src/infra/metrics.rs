// ============================================================
// Layer 6 — Metrics Logger
// ============================================================
// One CSV row per epoch, appended to checkpoints/metrics.csv:
//
//   epoch,train_loss,train_acc,val_loss,val_acc,avg_grad_norm,depth,grew
//   1,1.098612,0.333333,1.097001,0.350000,0.812345,3,0
//   ...
//
// The depth and grew columns mark where the encoder stack was
// extended, so loss and gradient-norm curves can be read against
// the growth events.

use anyhow::{Context, Result};
use std::{
    fs::{self, OpenOptions},
    io::Write,
    path::PathBuf,
};
use serde::{Deserialize, Serialize};

const HEADER: &str = "epoch,train_loss,train_acc,val_loss,val_acc,avg_grad_norm,depth,grew";

/// One row of metrics for a single training epoch
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EpochMetrics {
    /// One-based epoch number
    pub epoch: usize,
    pub train_loss: f64,
    /// Fraction of training samples classified correctly, in [0, 1]
    pub train_acc: f64,
    pub val_loss: f64,
    pub val_acc: f64,
    /// Mean per-batch gradient L2 norm
    pub avg_grad_norm: f64,
    /// Encoder depth after this epoch's growth decision
    pub depth: usize,
    /// Whether a layer was appended at the end of this epoch
    pub grew: bool,
}

impl EpochMetrics {
    fn csv_row(&self) -> String {
        format!(
            "{},{:.6},{:.6},{:.6},{:.6},{:.6},{},{}",
            self.epoch,
            self.train_loss,
            self.train_acc,
            self.val_loss,
            self.val_acc,
            self.avg_grad_norm,
            self.depth,
            u8::from(self.grew),
        )
    }
}

pub struct MetricsLogger {
    csv_path: PathBuf,
}

impl MetricsLogger {
    /// Writes the CSV header if the file doesn't exist yet, so resumed
    /// runs keep appending to the same log.
    pub fn new(dir: impl Into<String>) -> Result<Self> {
        let dir = PathBuf::from(dir.into());
        fs::create_dir_all(&dir)?;

        let csv_path = dir.join("metrics.csv");
        if !csv_path.exists() {
            let mut f = fs::File::create(&csv_path)
                .with_context(|| format!("Cannot create '{}'", csv_path.display()))?;
            writeln!(f, "{HEADER}")?;
            tracing::debug!("Created metrics CSV: '{}'", csv_path.display());
        }

        Ok(Self { csv_path })
    }

    pub fn log(&self, m: &EpochMetrics) -> Result<()> {
        let mut f = OpenOptions::new()
            .append(true)
            .open(&self.csv_path)?;
        writeln!(f, "{}", m.csv_row())?;

        tracing::debug!(
            "Logged epoch {} metrics: train_loss={:.4}, val_loss={:.4}, depth={}",
            m.epoch,
            m.train_loss,
            m.val_loss,
            m.depth,
        );
        Ok(())
    }

    pub fn csv_path(&self) -> &PathBuf {
        &self.csv_path
    }
}
