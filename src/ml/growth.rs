// ============================================================
// Layer 5 — Growth Controller
// ============================================================
// Decides, once per epoch, whether to append one encoder layer.
//
// Per batch:   observe(grad_norm, loss)     accumulate only
// Per epoch:   end_epoch()  → EpochSummary  finalize + reset
//              maybe_grow(&mut model)       evaluate + mutate
//
// Growth happens only when all four conditions hold for the
// epoch that just finished (zero-based index e):
//
//   1. e >= min_epochs_before_growth
//   2. never grown, or e - last_growth_epoch >= grow_every_n_epochs
//   3. avg_grad_norm > grad_threshold
//   4. epoch_loss    > loss_threshold
//
// Phases:
//
//   Waiting ──(1 holds)──▶ Eligible ──(all hold)──▶ Triggered
//      ▲                      ▲                        │
//      │                      └──(2 holds again)── Cooldown ◀┘
//      └──────────────(1 fails)───────────────────────┘
//
// The controller only depends on GrowableModel, never on Burn.

use burn::config::Config;
use serde::{Deserialize, Serialize};

use crate::domain::error::{VitError, VitResult};
use crate::domain::traits::GrowableModel;

#[derive(Config, Debug)]
pub struct GrowthConfig {
    #[config(default = 20)]
    pub min_epochs_before_growth: usize,
    #[config(default = 20)]
    pub grow_every_n_epochs: usize,
    #[config(default = 0.3)]
    pub grad_threshold: f64,
    #[config(default = 0.95)]
    pub loss_threshold: f64,
    /// Standard deviation of the normal initializer for appended layers.
    #[config(default = 0.02)]
    pub growth_init_std: f64,
}

impl GrowthConfig {
    pub fn validate(&self) -> VitResult<()> {
        if !self.growth_init_std.is_finite() || self.growth_init_std <= 0.0 {
            return Err(VitError::config(format!(
                "growth_init_std must be positive, got {}",
                self.growth_init_std
            )));
        }
        if !self.grad_threshold.is_finite() || !self.loss_threshold.is_finite() {
            return Err(VitError::config("growth thresholds must be finite"));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum GrowthPhase {
    /// Before the minimum-epoch threshold.
    #[default]
    Waiting,
    /// Threshold and spacing passed; waiting on the optimization signals.
    Eligible,
    /// All conditions met; a layer is being appended.
    Triggered,
    /// Just grew; waiting for the spacing interval to elapse.
    Cooldown,
}

/// Statistics of one completed epoch.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EpochSummary {
    /// Zero-based index of the epoch.
    pub epoch:         usize,
    pub avg_grad_norm: f64,
    pub epoch_loss:    f64,
    pub batches:       usize,
}

/// Why an epoch boundary ended without growth.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum HoldReason {
    /// `maybe_grow` was called without a fresh `end_epoch`.
    NoEpochSummary,
    BelowMinEpochs { epoch: usize, min: usize },
    Spacing { since_last: usize, required: usize },
    GradNormLow { avg_grad_norm: f64, threshold: f64 },
    LossLow { epoch_loss: f64, threshold: f64 },
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum GrowthDecision {
    Grew { epoch: usize, depth: usize },
    Held(HoldReason),
}

impl GrowthDecision {
    pub fn grew(&self) -> bool {
        matches!(self, Self::Grew { .. })
    }
}

/// Everything needed to resume growth decisions exactly.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GrowthState {
    /// Number of completed epochs, which is also the index of the
    /// epoch currently accumulating.
    pub epoch:             usize,
    pub grad_norm_sum:     f64,
    pub batch_count:       usize,
    pub loss_sum:          f64,
    pub last_growth_epoch: Option<usize>,
    pub growth_epochs:     Vec<usize>,
    pub pending:           Option<EpochSummary>,
    pub phase:             GrowthPhase,
}

pub struct GrowthController {
    config: GrowthConfig,
    state:  GrowthState,
}

impl GrowthController {
    pub fn new(config: GrowthConfig) -> VitResult<Self> {
        Self::from_state(config, GrowthState::default())
    }

    /// Resume from a checkpointed state.
    pub fn from_state(config: GrowthConfig, state: GrowthState) -> VitResult<Self> {
        config.validate()?;
        Ok(Self { config, state })
    }

    pub fn config(&self) -> &GrowthConfig {
        &self.config
    }

    pub fn state(&self) -> &GrowthState {
        &self.state
    }

    pub fn phase(&self) -> GrowthPhase {
        self.state.phase
    }

    pub fn epoch(&self) -> usize {
        self.state.epoch
    }

    pub fn growth_epochs(&self) -> &[usize] {
        &self.state.growth_epochs
    }

    /// Accumulate one batch's gradient norm and loss.
    pub fn observe(&mut self, grad_norm: f64, loss: f64) {
        if !grad_norm.is_finite() || !loss.is_finite() {
            tracing::warn!(
                "Non-finite growth signal at epoch {}: grad_norm={}, loss={}",
                self.state.epoch + 1, grad_norm, loss
            );
        }
        self.state.grad_norm_sum += grad_norm;
        self.state.loss_sum += loss;
        self.state.batch_count += 1;
    }

    /// Finalize the running epoch, reset the accumulators and advance
    /// the epoch counter.
    pub fn end_epoch(&mut self) -> EpochSummary {
        let s = &mut self.state;
        let (avg_grad_norm, epoch_loss) = if s.batch_count > 0 {
            let n = s.batch_count as f64;
            (s.grad_norm_sum / n, s.loss_sum / n)
        } else {
            (0.0, 0.0)
        };

        let summary = EpochSummary {
            epoch: s.epoch,
            avg_grad_norm,
            epoch_loss,
            batches: s.batch_count,
        };

        s.grad_norm_sum = 0.0;
        s.loss_sum = 0.0;
        s.batch_count = 0;
        s.epoch += 1;
        s.pending = Some(summary);

        tracing::debug!(
            "Epoch {} finalized: avg_grad_norm={:.4}, loss={:.4}, batches={}",
            summary.epoch + 1, summary.avg_grad_norm, summary.epoch_loss, summary.batches
        );
        summary
    }

    /// Check the four growth conditions against `summary`, in order.
    pub fn evaluate(&self, summary: &EpochSummary) -> Result<(), HoldReason> {
        let cfg = &self.config;
        let e = summary.epoch;

        if e < cfg.min_epochs_before_growth {
            return Err(HoldReason::BelowMinEpochs { epoch: e, min: cfg.min_epochs_before_growth });
        }
        if let Some(last) = self.state.last_growth_epoch {
            let since_last = e.saturating_sub(last);
            if since_last < cfg.grow_every_n_epochs {
                return Err(HoldReason::Spacing { since_last, required: cfg.grow_every_n_epochs });
            }
        }
        if !(summary.avg_grad_norm > cfg.grad_threshold) {
            return Err(HoldReason::GradNormLow {
                avg_grad_norm: summary.avg_grad_norm,
                threshold:     cfg.grad_threshold,
            });
        }
        if !(summary.epoch_loss > cfg.loss_threshold) {
            return Err(HoldReason::LossLow {
                epoch_loss: summary.epoch_loss,
                threshold:  cfg.loss_threshold,
            });
        }
        Ok(())
    }

    /// Grow `model` by one layer if the last finalized epoch meets every
    /// condition. Must run between epochs, never during a forward or
    /// backward pass.
    pub fn maybe_grow<M: GrowableModel>(&mut self, model: &mut M) -> VitResult<GrowthDecision> {
        let Some(summary) = self.state.pending.take() else {
            return Ok(GrowthDecision::Held(HoldReason::NoEpochSummary));
        };

        if let Err(reason) = self.evaluate(&summary) {
            self.state.phase = match reason {
                HoldReason::BelowMinEpochs { .. } => GrowthPhase::Waiting,
                HoldReason::Spacing { .. } => GrowthPhase::Cooldown,
                _ => GrowthPhase::Eligible,
            };
            tracing::debug!("No growth after epoch {}: {:?}", summary.epoch + 1, reason);
            return Ok(GrowthDecision::Held(reason));
        }

        // On failure the summary is restored and the phase is unchanged.
        if let Err(err) = model
            .spawn_layer(self.config.growth_init_std)
            .and_then(|layer| model.append_layer(layer))
        {
            self.state.pending = Some(summary);
            return Err(err);
        }

        self.state.phase = GrowthPhase::Triggered;
        self.state.last_growth_epoch = Some(summary.epoch);
        self.state.growth_epochs.push(summary.epoch);
        self.state.phase = GrowthPhase::Cooldown;

        let depth = model.depth();
        tracing::info!(
            "Model growth triggered at epoch {} (avg_grad_norm={:.4}, loss={:.4}); depth is now {}",
            summary.epoch + 1, summary.avg_grad_norm, summary.epoch_loss, depth
        );
        Ok(GrowthDecision::Grew { epoch: summary.epoch, depth })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ml::model::VisionTransformerConfig;
    use burn::backend::NdArray;
    use burn::prelude::*;
    use burn::tensor::Distribution;

    /// Stand-in model: a layer counter.
    struct Counter {
        depth: usize,
    }

    impl GrowableModel for Counter {
        type Layer = ();

        fn depth(&self) -> usize {
            self.depth
        }

        fn spawn_layer(&self, _init_std: f64) -> VitResult<()> {
            Ok(())
        }

        fn append_layer(&mut self, _layer: ()) -> VitResult<()> {
            self.depth += 1;
            Ok(())
        }
    }

    /// Stand-in model whose appends fail until `broken` is cleared.
    struct Flaky {
        depth:  usize,
        broken: bool,
    }

    impl GrowableModel for Flaky {
        type Layer = ();

        fn depth(&self) -> usize {
            self.depth
        }

        fn spawn_layer(&self, _init_std: f64) -> VitResult<()> {
            Ok(())
        }

        fn append_layer(&mut self, _layer: ()) -> VitResult<()> {
            if self.broken {
                return Err(VitError::shape("appended layer width", 64, 32));
            }
            self.depth += 1;
            Ok(())
        }
    }

    fn config() -> GrowthConfig {
        GrowthConfig::new()
            .with_min_epochs_before_growth(4)
            .with_grow_every_n_epochs(1)
            .with_grad_threshold(1.0)
            .with_loss_threshold(0.5)
    }

    /// Run `epochs` epochs of one batch each, returning the decisions.
    fn run<M: GrowableModel>(
        ctl: &mut GrowthController,
        model: &mut M,
        epochs: usize,
        grad_norm: f64,
        loss: f64,
    ) -> Vec<GrowthDecision> {
        (0..epochs)
            .map(|_| {
                ctl.observe(grad_norm, loss);
                ctl.end_epoch();
                ctl.maybe_grow(model).unwrap()
            })
            .collect()
    }

    #[test]
    fn test_end_epoch_averages_and_resets() {
        let mut ctl = GrowthController::new(config()).unwrap();
        ctl.observe(2.0, 1.0);
        ctl.observe(4.0, 3.0);
        let summary = ctl.end_epoch();
        assert_eq!(summary, EpochSummary { epoch: 0, avg_grad_norm: 3.0, epoch_loss: 2.0, batches: 2 });
        assert_eq!(ctl.epoch(), 1);
        assert_eq!(ctl.state().batch_count, 0);
        assert_eq!(ctl.state().grad_norm_sum, 0.0);

        let empty = ctl.end_epoch();
        assert_eq!(empty, EpochSummary { epoch: 1, avg_grad_norm: 0.0, epoch_loss: 0.0, batches: 0 });
    }

    #[test]
    fn test_grows_only_when_all_conditions_hold() {
        let mut ctl = GrowthController::new(config()).unwrap();
        let mut model = Counter { depth: 2 };
        let decisions = run(&mut ctl, &mut model, 5, 5.0, 2.0);

        assert!(decisions[..4].iter().all(|d| !d.grew()));
        assert_eq!(decisions[4], GrowthDecision::Grew { epoch: 4, depth: 3 });
        assert_eq!(ctl.growth_epochs(), &[4]);
        assert_eq!(ctl.phase(), GrowthPhase::Cooldown);
    }

    #[test]
    fn test_min_epochs_condition_blocks_growth() {
        let mut ctl = GrowthController::new(config()).unwrap();
        let mut model = Counter { depth: 2 };
        let decisions = run(&mut ctl, &mut model, 4, 5.0, 2.0);

        assert_eq!(model.depth, 2);
        assert_eq!(decisions[3], GrowthDecision::Held(HoldReason::BelowMinEpochs { epoch: 3, min: 4 }));
        assert_eq!(ctl.phase(), GrowthPhase::Waiting);
    }

    #[test]
    fn test_spacing_condition_blocks_growth() {
        let mut ctl = GrowthController::new(config().with_grow_every_n_epochs(3)).unwrap();
        let mut model = Counter { depth: 2 };
        let decisions = run(&mut ctl, &mut model, 7, 5.0, 2.0);

        assert!(decisions[4].grew());
        assert_eq!(decisions[5], GrowthDecision::Held(HoldReason::Spacing { since_last: 1, required: 3 }));
        assert_eq!(decisions[6], GrowthDecision::Held(HoldReason::Spacing { since_last: 2, required: 3 }));
        assert_eq!(model.depth, 3);
        assert_eq!(ctl.phase(), GrowthPhase::Cooldown);

        // Spacing elapsed at epoch 7.
        let next = run(&mut ctl, &mut model, 1, 5.0, 2.0);
        assert_eq!(next[0], GrowthDecision::Grew { epoch: 7, depth: 4 });
    }

    #[test]
    fn test_grad_norm_condition_blocks_growth() {
        let mut ctl = GrowthController::new(config()).unwrap();
        let mut model = Counter { depth: 2 };
        // Exactly at the threshold is not enough.
        let decisions = run(&mut ctl, &mut model, 6, 1.0, 2.0);

        assert_eq!(model.depth, 2);
        assert!(matches!(decisions[5], GrowthDecision::Held(HoldReason::GradNormLow { .. })));
        assert_eq!(ctl.phase(), GrowthPhase::Eligible);
    }

    #[test]
    fn test_loss_condition_blocks_growth() {
        let mut ctl = GrowthController::new(config()).unwrap();
        let mut model = Counter { depth: 2 };
        let decisions = run(&mut ctl, &mut model, 6, 5.0, 0.4);

        assert_eq!(model.depth, 2);
        assert!(matches!(decisions[5], GrowthDecision::Held(HoldReason::LossLow { .. })));
        assert_eq!(ctl.phase(), GrowthPhase::Eligible);
    }

    #[test]
    fn test_depth_never_decreases() {
        let mut ctl = GrowthController::new(config().with_grow_every_n_epochs(2)).unwrap();
        let mut model = Counter { depth: 1 };
        let signals = [(5.0, 2.0), (0.1, 2.0), (5.0, 0.1), (5.0, 2.0), (3.0, 3.0), (0.0, 0.0)];

        let mut last_depth = model.depth();
        for epoch in 0..30 {
            let (g, l) = signals[epoch % signals.len()];
            ctl.observe(g, l);
            ctl.end_epoch();
            ctl.maybe_grow(&mut model).unwrap();
            assert!(model.depth() >= last_depth);
            last_depth = model.depth();
        }
        assert_eq!(model.depth(), 1 + ctl.growth_epochs().len());
    }

    #[test]
    fn test_maybe_grow_without_new_epoch_is_noop() {
        let mut ctl = GrowthController::new(config().with_min_epochs_before_growth(0)).unwrap();
        let mut model = Counter { depth: 2 };
        ctl.observe(5.0, 2.0);
        ctl.end_epoch();

        assert!(ctl.maybe_grow(&mut model).unwrap().grew());
        assert_eq!(
            ctl.maybe_grow(&mut model).unwrap(),
            GrowthDecision::Held(HoldReason::NoEpochSummary)
        );
        assert_eq!(model.depth, 3);
    }

    #[test]
    fn test_resumed_state_reproduces_decisions() {
        let mut uninterrupted = GrowthController::new(config().with_grow_every_n_epochs(3)).unwrap();
        let mut model_a = Counter { depth: 2 };
        run(&mut uninterrupted, &mut model_a, 6, 5.0, 2.0);

        let json = serde_json::to_string(uninterrupted.state()).unwrap();
        let state: GrowthState = serde_json::from_str(&json).unwrap();
        let mut resumed = GrowthController::from_state(config().with_grow_every_n_epochs(3), state).unwrap();
        let mut model_b = Counter { depth: model_a.depth };

        let a = run(&mut uninterrupted, &mut model_a, 6, 5.0, 2.0);
        let b = run(&mut resumed, &mut model_b, 6, 5.0, 2.0);
        assert_eq!(a, b);
        assert_eq!(uninterrupted.state(), resumed.state());
    }

    #[test]
    fn test_failed_append_leaves_state_untouched() {
        let mut ctl = GrowthController::new(config().with_min_epochs_before_growth(0)).unwrap();
        let mut model = Flaky { depth: 2, broken: true };
        ctl.observe(5.0, 2.0);
        ctl.end_epoch();
        let before = ctl.state().clone();

        assert!(matches!(ctl.maybe_grow(&mut model), Err(VitError::Shape { .. })));
        assert_eq!(ctl.state(), &before);
        assert_eq!(ctl.phase(), GrowthPhase::Waiting);
        assert!(ctl.growth_epochs().is_empty());

        // The same epoch can be retried once the model accepts layers.
        model.broken = false;
        assert_eq!(ctl.maybe_grow(&mut model).unwrap(), GrowthDecision::Grew { epoch: 0, depth: 3 });
        assert_eq!(ctl.phase(), GrowthPhase::Cooldown);
    }

    #[test]
    fn test_rejects_bad_init_std() {
        let result = GrowthController::new(GrowthConfig::new().with_growth_init_std(0.0));
        assert!(matches!(result, Err(VitError::Configuration(_))));
    }

    #[test]
    fn test_end_to_end_growth_of_real_model() {
        type B = NdArray;
        let device = Default::default();
        let mut model = VisionTransformerConfig::new(32, 8, 10, 64, 2, 4, 128, 16.0)
            .init::<B>(&device)
            .unwrap();
        let mut ctl = GrowthController::new(config()).unwrap();
        let images = Tensor::<B, 4>::random([2, 3, 32, 32], Distribution::Normal(0.0, 1.0), &device);

        for epoch in 1..=5 {
            let logits = model.forward(images.clone()).unwrap();
            assert_eq!(logits.dims(), [2, 10]);

            ctl.observe(5.0, 2.0);
            ctl.end_epoch();
            let decision = ctl.maybe_grow(&mut model).unwrap();

            let expected_depth = if epoch < 5 { 2 } else { 3 };
            assert_eq!(model.depth(), expected_depth, "depth after epoch {epoch}");
            assert_eq!(decision.grew(), epoch == 5);
        }
        assert_eq!(model.forward(images).unwrap().dims(), [2, 10]);
    }
}
