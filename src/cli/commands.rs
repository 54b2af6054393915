// ============================================================
// Layer 1 — CLI Commands and Arguments
// ============================================================
// Defines the two subcommands: `train` and `inspect`
// and all their configurable flags.

use clap::{Args, Subcommand, ValueEnum};
use crate::application::train_use_case::TrainConfig;
use crate::ml::attention::AttentionQuantization;

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Train the fixed-point ViT, growing the encoder stack between epochs
    Train(TrainArgs),

    /// Print depth, epoch and growth history of the newest checkpoint
    Inspect(InspectArgs),
}

/// Which attention tensor passes through the quantizer.
#[derive(ValueEnum, Clone, Copy, Debug)]
pub enum AttentionQuantArg {
    /// Per-head context vectors, after weights @ V
    Context,
    /// Softmax attention weights, before weights @ V
    Weights,
}

impl From<AttentionQuantArg> for AttentionQuantization {
    fn from(a: AttentionQuantArg) -> Self {
        match a {
            AttentionQuantArg::Context => AttentionQuantization::Context,
            AttentionQuantArg::Weights => AttentionQuantization::Weights,
        }
    }
}

#[derive(Args, Debug)]
pub struct TrainArgs {
    /// Directory for checkpoints, metrics.csv and train_config.json
    #[arg(long, default_value = "checkpoints")]
    pub checkpoint_dir: String,

    /// Continue from the newest checkpoint in --checkpoint-dir
    #[arg(long)]
    pub resume: bool,

    /// Train on the NdArray CPU backend instead of WGPU
    #[arg(long)]
    pub cpu: bool,

    // ── Model ────────────────────────────────────────────────────────────────
    /// Square input image side length in pixels
    #[arg(long, default_value_t = 32)]
    pub image_size: usize,

    /// Square patch side length; must divide --image-size
    #[arg(long, default_value_t = 4)]
    pub patch_size: usize,

    #[arg(long, default_value_t = 3)]
    pub channels: usize,

    #[arg(long, default_value_t = 3)]
    pub num_classes: usize,

    /// Token width; must be divisible by --num-heads
    #[arg(long, default_value_t = 512)]
    pub embed_dim: usize,

    /// Encoder layers before any growth
    #[arg(long, default_value_t = 3)]
    pub initial_depth: usize,

    #[arg(long, default_value_t = 16)]
    pub num_heads: usize,

    /// Hidden width of each encoder MLP
    #[arg(long, default_value_t = 256)]
    pub hidden_dim: usize,

    /// Fixed-point scale; quantization step is 1/scale
    #[arg(long, default_value_t = 256.0)]
    pub scale: f32,

    #[arg(long, value_enum, default_value_t = AttentionQuantArg::Context)]
    pub attention_quantization: AttentionQuantArg,

    // ── Growth ───────────────────────────────────────────────────────────────
    /// Earliest zero-based epoch index at which growth may fire
    #[arg(long, default_value_t = 20)]
    pub min_epochs_before_growth: usize,

    /// Minimum epochs between two growth events
    #[arg(long, default_value_t = 20)]
    pub grow_every_n_epochs: usize,

    /// Growth requires the epoch's mean grad norm to exceed this
    #[arg(long, default_value_t = 0.3)]
    pub grad_threshold: f64,

    /// Growth requires the epoch's mean loss to exceed this
    #[arg(long, default_value_t = 0.95)]
    pub loss_threshold: f64,

    /// Std of the normal init used for appended layers
    #[arg(long, default_value_t = 0.02)]
    pub growth_init_std: f64,

    // ── Optimisation and data ────────────────────────────────────────────────
    #[arg(long, default_value_t = 200)]
    pub epochs: usize,

    #[arg(long, default_value_t = 64)]
    pub batch_size: usize,

    #[arg(long, default_value_t = 1e-3)]
    pub lr: f64,

    /// Global gradient-norm clip; 0 disables clipping
    #[arg(long, default_value_t = 0.3)]
    pub grad_clip: f32,

    /// Number of synthetic images to generate
    #[arg(long, default_value_t = 1536)]
    pub num_samples: usize,

    #[arg(long, default_value_t = 0.8)]
    pub train_fraction: f64,

    #[arg(long, default_value_t = 42)]
    pub seed: u64,
}

impl From<TrainArgs> for TrainConfig {
    fn from(a: TrainArgs) -> Self {
        TrainConfig {
            checkpoint_dir: a.checkpoint_dir,
            image_size:     a.image_size,
            patch_size:     a.patch_size,
            channels:       a.channels,
            num_classes:    a.num_classes,
            embed_dim:      a.embed_dim,
            initial_depth:  a.initial_depth,
            num_heads:      a.num_heads,
            hidden_dim:     a.hidden_dim,
            scale:          a.scale,
            attention_quantization: a.attention_quantization.into(),
            min_epochs_before_growth: a.min_epochs_before_growth,
            grow_every_n_epochs:      a.grow_every_n_epochs,
            grad_threshold:           a.grad_threshold,
            loss_threshold:           a.loss_threshold,
            growth_init_std:          a.growth_init_std,
            epochs:         a.epochs,
            batch_size:     a.batch_size,
            lr:             a.lr,
            grad_clip:      (a.grad_clip > 0.0).then_some(a.grad_clip),
            num_samples:    a.num_samples,
            train_fraction: a.train_fraction,
            seed:           a.seed,
            resume:         a.resume,
            cpu:            a.cpu,
        }
    }
}

#[derive(Args, Debug)]
pub struct InspectArgs {
    /// Directory where checkpoints were saved during training
    #[arg(long, default_value = "checkpoints")]
    pub checkpoint_dir: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cli::Cli;
    use clap::Parser;

    fn train_config(argv: &[&str]) -> TrainConfig {
        let cli = Cli::try_parse_from(argv).unwrap();
        match cli.command {
            Commands::Train(args) => args.into(),
            other => panic!("expected train, got {other:?}"),
        }
    }

    #[test]
    fn test_train_flags_map_onto_config() {
        let cfg = train_config(&[
            "gradvit", "train", "--cpu", "--resume",
            "--embed-dim", "64", "--num-heads", "4",
            "--attention-quantization", "weights",
            "--grad-clip", "1.0",
        ]);
        assert!(cfg.cpu && cfg.resume);
        assert_eq!(cfg.embed_dim, 64);
        assert_eq!(cfg.num_heads, 4);
        assert_eq!(cfg.attention_quantization, AttentionQuantization::Weights);
        assert_eq!(cfg.grad_clip, Some(1.0));
    }

    #[test]
    fn test_defaults_match_config_defaults() {
        let cfg = train_config(&["gradvit", "train"]);
        let def = TrainConfig::default();
        assert_eq!(cfg.embed_dim, def.embed_dim);
        assert_eq!(cfg.min_epochs_before_growth, def.min_epochs_before_growth);
        assert_eq!(cfg.scale, def.scale);
        assert_eq!(cfg.attention_quantization, def.attention_quantization);
        assert_eq!(cfg.grad_clip, def.grad_clip);
    }

    #[test]
    fn test_zero_grad_clip_disables_clipping() {
        let cfg = train_config(&["gradvit", "train", "--grad-clip", "0"]);
        assert_eq!(cfg.grad_clip, None);
    }

    #[test]
    fn test_inspect_parses() {
        let cli = Cli::try_parse_from(["gradvit", "inspect", "--checkpoint-dir", "runs/a"]).unwrap();
        assert!(matches!(cli.command, Commands::Inspect(ref a) if a.checkpoint_dir == "runs/a"));
    }
}
