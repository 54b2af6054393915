// ============================================================
// Layer 6 — Infrastructure Layer
// ============================================================
//   checkpoint.rs — model record + GrowthState + depth pointer,
//                   and the TrainConfig JSON used to rebuild
//                   the architecture on resume
//
//   metrics.rs    — per-epoch CSV including depth and growth
//                   events

/// Model, growth state and config persistence
pub mod checkpoint;

/// Training metrics CSV logger
pub mod metrics;
