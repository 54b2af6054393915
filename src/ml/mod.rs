// ============================================================
// Layer 5 — ML / Model Layer (Burn)
// ============================================================
// All Burn-specific model code lives here.
//
//   quantize.rs  — fixed-point quantizer + straight-through backward
//   mlp.rs       — FixedPointMlp
//   attention.rs — FixedPointAttention
//   encoder.rs   — FixedPointEncoderLayer (pre-norm, quantized residuals)
//   model.rs     — VisionTransformer: patches → encoder stack → head
//   grad_norm.rs — global gradient L2 norm
//   growth.rs    — GrowthController state machine
//   trainer.rs   — epoch loop wiring model, optimizer and growth

pub mod quantize;

pub mod mlp;

pub mod attention;

pub mod encoder;

pub mod model;

pub mod grad_norm;

pub mod growth;

pub mod trainer;
