// ============================================================
// Layer 4 — Data Pipeline
// ============================================================
// Stands in for a real image dataset so the core can be trained
// end to end:
//
//   ImageDataset::synthetic  → seeded class prototypes + noise
//       │
//       ▼
//   split_train_val          → seeded shuffle and cut
//       │
//       ▼
//   ImageBatcher             → [N, C, H, W] images, [N] targets
//       │
//       ▼
//   DataLoader               → feeds batches to the training loop

/// Labelled image samples and Burn's Dataset impl
pub mod dataset;

/// Burn Batcher producing image/target tensors
pub mod batcher;

/// Seeded train/validation split
pub mod splitter;
