// ============================================================
// Layer 5 — Training Loop
// ============================================================
// Per batch, strictly in this order:
//   forward → loss → backward → grad norm → observe → clip → Adam step
//
// Clipping rescales all gradients together by max_norm / ‖g‖ when
// the global norm exceeds grad_clip; the growth controller sees the
// pre-clip norm.
//
// Per epoch, after the last optimizer step and before the next
// forward pass:
//   end_epoch → maybe_grow → validation → metrics → checkpoint
//
// Adam keeps its moments keyed by ParamId, so layers appended by
// maybe_grow get fresh state on their first step while every
// existing parameter keeps its history.
//
// On resume the architecture, data and growth settings come from
// the checkpoint's train_config.json, never from the caller.

use anyhow::{Context, Result};
use burn::{
    data::dataloader::DataLoaderBuilder,
    module::AutodiffModule,
    optim::{AdamConfig, GradientsParams, Optimizer},
    prelude::*,
    tensor::backend::AutodiffBackend,
};

use crate::application::train_use_case::{effective_config, TrainConfig};
use crate::data::{batcher::ImageBatcher, dataset::ImageDataset};
use crate::domain::traits::GrowableModel;
use crate::infra::checkpoint::CheckpointManager;
use crate::infra::metrics::{EpochMetrics, MetricsLogger};
use crate::ml::growth::GrowthController;
use crate::ml::model::VisionTransformer;
use crate::ml::quantize::QuantizeBackend;

type GpuBackend = burn::backend::Autodiff<burn::backend::Wgpu>;
type CpuBackend = burn::backend::Autodiff<burn::backend::NdArray>;

pub fn run_training(
    cfg:           &TrainConfig,
    train_dataset: ImageDataset,
    val_dataset:   ImageDataset,
    ckpt_manager:  CheckpointManager,
) -> Result<()> {
    if cfg.cpu {
        let device = burn::backend::ndarray::NdArrayDevice::default();
        tracing::info!("Using NdArray device: {:?}", device);
        train_loop::<CpuBackend>(cfg, train_dataset, val_dataset, ckpt_manager, device)?;
    } else {
        let device = burn::backend::wgpu::WgpuDevice::default();
        tracing::info!("Using WGPU device: {:?}", device);
        train_loop::<GpuBackend>(cfg, train_dataset, val_dataset, ckpt_manager, device)?;
    }
    Ok(())
}

/// Aggregate statistics of one pass over a data loader.
struct PassStats {
    loss:     f64,
    accuracy: f64,
}

fn count_correct<B: Backend>(logits: Tensor<B, 2>, targets: Tensor<B, 1, Int>) -> usize {
    // argmax(1) returns [batch, 1]; flatten before comparing with [batch]
    let predicted = logits.argmax(1).flatten::<1>(0, 1);
    predicted.equal(targets).int().sum().into_scalar().elem::<i64>() as usize
}

pub fn train_loop<B>(
    cfg:           &TrainConfig,
    train_dataset: ImageDataset,
    val_dataset:   ImageDataset,
    ckpt_manager:  CheckpointManager,
    device:        B::Device,
) -> Result<VisionTransformer<B>>
where
    B: AutodiffBackend + QuantizeBackend,
    B::InnerBackend: QuantizeBackend,
{
    let cfg = &effective_config(cfg, &ckpt_manager)?;
    if !cfg.resume {
        ckpt_manager.save_config(cfg)?;
    }

    // ── Build or restore model and growth state ───────────────────────────────
    let model_cfg = cfg.model_config();
    let mut model: VisionTransformer<B> = model_cfg
        .init(&device)
        .context("Invalid model configuration")?;

    let mut controller = GrowthController::new(cfg.growth_config())
        .context("Invalid growth configuration")?;
    let mut first_epoch = 1;

    if cfg.resume {
        let (restored, state, meta) = ckpt_manager.load_latest(model, cfg.growth_init_std, &device)?;
        model = restored;
        controller = GrowthController::from_state(cfg.growth_config(), state)?;
        first_epoch = meta.epoch + 1;
        tracing::info!("Resumed from epoch {} at depth {}", meta.epoch, model.depth());
    }

    tracing::info!(
        "Model ready: depth={}, embed_dim={}, heads={}, scale={}, params={}",
        model.depth(), cfg.embed_dim, cfg.num_heads, cfg.scale, model.num_params()
    );

    // ── Adam optimiser; clipping is applied globally in the batch loop ────────
    let mut optim = AdamConfig::new().with_epsilon(1e-8).init();

    // ── Data loaders ──────────────────────────────────────────────────────────
    let train_loader = DataLoaderBuilder::new(ImageBatcher::<B>::new(device.clone()))
        .batch_size(cfg.batch_size)
        .shuffle(cfg.seed)
        .num_workers(1)
        .build(train_dataset);

    let val_loader = DataLoaderBuilder::new(ImageBatcher::<B::InnerBackend>::new(device.clone()))
        .batch_size(cfg.batch_size)
        .num_workers(1)
        .build(val_dataset);

    let metrics = MetricsLogger::new(&cfg.checkpoint_dir)?;

    // ── Epoch loop ────────────────────────────────────────────────────────────
    for epoch in first_epoch..=cfg.epochs {

        // ── Training phase ────────────────────────────────────────────────────
        let mut correct = 0usize;
        let mut total   = 0usize;

        for batch in train_loader.iter() {
            total += batch.targets.dims()[0];
            let (loss, logits) = model.forward_loss(batch.images, batch.targets.clone())?;

            let loss_val: f64 = loss.clone().into_scalar().elem::<f64>();
            correct += count_correct(logits, batch.targets);

            let grads     = loss.backward();
            let grad_norm = model.grad_norm(&grads);
            controller.observe(grad_norm, loss_val);

            let mut grads = GradientsParams::from_grads(grads, &model);
            if let Some(max_norm) = cfg.grad_clip {
                model.clip_grad_norm(&mut grads, grad_norm, max_norm as f64);
            }
            model = optim.step(cfg.lr, model, grads);
        }

        let summary = controller.end_epoch();
        let train = PassStats {
            loss:     summary.epoch_loss,
            accuracy: if total > 0 { correct as f64 / total as f64 } else { 0.0 },
        };

        // ── Growth decision (between epochs only) ─────────────────────────────
        let decision = controller.maybe_grow(&mut model)?;

        // ── Validation phase ──────────────────────────────────────────────────
        let val = validate(&model.valid(), val_loader.iter())?;

        println!(
            "Epoch {:>3}/{} | depth={} | train_loss={:.4} | train_acc={:.1}% | val_loss={:.4} | val_acc={:.1}% | grad_norm={:.4}{}",
            epoch, cfg.epochs, model.depth(),
            train.loss, train.accuracy * 100.0,
            val.loss, val.accuracy * 100.0,
            summary.avg_grad_norm,
            if decision.grew() { " | grew" } else { "" },
        );

        metrics.log(&EpochMetrics {
            epoch,
            train_loss:    train.loss,
            train_acc:     train.accuracy,
            val_loss:      val.loss,
            val_acc:       val.accuracy,
            avg_grad_norm: summary.avg_grad_norm,
            depth:         model.depth(),
            grew:          decision.grew(),
        })?;

        ckpt_manager.save(&model, controller.state(), epoch)?;
        tracing::info!("Checkpoint saved for epoch {}", epoch);
    }

    tracing::info!(
        "Training complete: final depth {}, growth epochs {:?}",
        model.depth(),
        controller.growth_epochs().iter().map(|e| e + 1).collect::<Vec<_>>()
    );
    Ok(model)
}

fn validate<B: QuantizeBackend>(
    model:   &VisionTransformer<B>,
    batches: impl Iterator<Item = crate::data::batcher::ImageBatch<B>>,
) -> Result<PassStats> {
    // Mean loss per sample: each batch's mean is weighted by its size.
    let mut loss_sum = 0.0f64;
    let mut correct = 0usize;
    let mut total   = 0usize;

    for batch in batches {
        let n = batch.targets.dims()[0];
        let (loss, logits) = model.forward_loss(batch.images, batch.targets.clone())?;
        loss_sum += loss.into_scalar().elem::<f64>() * n as f64;
        total    += n;
        correct  += count_correct(logits, batch.targets);
    }

    Ok(PassStats {
        loss:     if total > 0 { loss_sum / total as f64 } else { f64::NAN },
        accuracy: if total > 0 { correct as f64 / total as f64 } else { 0.0 },
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::dataset::ImageDataset;

    fn tiny_config(dir: &std::path::Path, epochs: usize) -> TrainConfig {
        TrainConfig {
            checkpoint_dir: dir.to_string_lossy().into_owned(),
            image_size:  8,
            patch_size:  4,
            num_classes: 2,
            embed_dim:   16,
            num_heads:   2,
            hidden_dim:  32,
            initial_depth: 1,
            epochs,
            batch_size:  4,
            num_samples: 16,
            min_epochs_before_growth: 1,
            grow_every_n_epochs:      1,
            grad_threshold: 0.0,
            loss_threshold: 0.0,
            cpu: true,
            ..TrainConfig::default()
        }
    }

    fn run(cfg: &TrainConfig) -> VisionTransformer<CpuBackend> {
        let data = ImageDataset::synthetic(cfg.num_samples, cfg.num_classes, cfg.channels, cfg.image_size, cfg.seed);
        let (train, val) = data.split(cfg.train_fraction, cfg.seed);
        let ckpt = CheckpointManager::new(&cfg.checkpoint_dir).unwrap();
        train_loop::<CpuBackend>(cfg, train, val, ckpt, Default::default()).unwrap()
    }

    fn growth_epochs(dir: &std::path::Path) -> Vec<usize> {
        let ckpt = CheckpointManager::new(dir.to_string_lossy()).unwrap();
        let meta = ckpt.latest().unwrap();
        ckpt.load_growth_state(meta.epoch).unwrap().growth_epochs
    }

    #[test]
    fn test_short_run_grows_and_checkpoints() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = tiny_config(dir.path(), 3);
        let model = run(&cfg);

        // Epoch indices 1 and 2 meet every condition.
        assert_eq!(model.depth(), 3);
        let ckpt = CheckpointManager::new(&cfg.checkpoint_dir).unwrap();
        let meta = ckpt.latest().unwrap();
        assert_eq!(meta.epoch, 3);
        assert_eq!(meta.depth, 3);
        assert_eq!(ckpt.load_config().unwrap().embed_dim, 16);
    }

    #[test]
    fn test_resumed_run_matches_uninterrupted_run() {
        let grow_every = |mut cfg: TrainConfig| {
            cfg.grow_every_n_epochs = 2;
            cfg
        };

        let straight_dir = tempfile::tempdir().unwrap();
        let straight = run(&grow_every(tiny_config(straight_dir.path(), 5)));

        let split_dir = tempfile::tempdir().unwrap();
        let first = run(&grow_every(tiny_config(split_dir.path(), 2)));
        assert_eq!(first.depth(), 2);

        // Architecture and growth flags on the resume call differ from the
        // saved run; the saved config must win.
        let resume_cfg = TrainConfig {
            resume: true,
            embed_dim: 32,
            num_heads: 4,
            grow_every_n_epochs: 1,
            ..tiny_config(split_dir.path(), 5)
        };
        let resumed = run(&resume_cfg);

        assert_eq!(resumed.depth(), straight.depth());
        assert_eq!(resumed.depth(), 3);
        assert_eq!(growth_epochs(split_dir.path()), growth_epochs(straight_dir.path()));
        assert_eq!(growth_epochs(split_dir.path()), vec![1, 3]);
        assert_eq!(resumed.head.weight.val().dims(), [16, 2]);

        let ckpt = CheckpointManager::new(split_dir.path().to_string_lossy()).unwrap();
        assert_eq!(ckpt.latest().unwrap().epoch, 5);
        let saved = ckpt.load_config().unwrap();
        assert_eq!(saved.embed_dim, 16);
        assert_eq!(saved.epochs, 2);
        assert!(!saved.resume);
    }

    #[test]
    fn test_validation_loss_is_weighted_by_batch_size() {
        use crate::data::batcher::ImageBatcher;
        use burn::backend::NdArray;
        use burn::data::dataloader::batcher::Batcher;
        use burn::data::dataset::Dataset;

        let cfg = tiny_config(std::path::Path::new("unused"), 1);
        let model = cfg.model_config().init::<NdArray>(&Default::default()).unwrap();
        let data = ImageDataset::synthetic(4, 2, 3, 8, 3);
        let items: Vec<_> = (0..4).filter_map(|i| data.get(i)).collect();
        let batcher = ImageBatcher::<NdArray>::new(Default::default());

        let whole = validate(&model, std::iter::once(batcher.batch(items.clone()))).unwrap();
        let uneven = vec![batcher.batch(items[..3].to_vec()), batcher.batch(items[3..].to_vec())];
        let split = validate(&model, uneven.into_iter()).unwrap();

        assert!((whole.loss - split.loss).abs() < 1e-5, "{} vs {}", whole.loss, split.loss);
        assert_eq!(whole.accuracy, split.accuracy);
    }

    #[test]
    fn test_resume_without_checkpoint_is_error() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = TrainConfig { resume: true, ..tiny_config(dir.path(), 2) };
        let data = ImageDataset::synthetic(8, 2, 3, 8, 0);
        let (train, val) = data.split(0.5, 0);
        let ckpt = CheckpointManager::new(&cfg.checkpoint_dir).unwrap();
        assert!(train_loop::<CpuBackend>(&cfg, train, val, ckpt, Default::default()).is_err());
    }
}
