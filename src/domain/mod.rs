// ============================================================
// Layer 3 — Domain Layer
// ============================================================
// Plain Rust types shared by every other layer:
//
//   error.rs  — VitError (Configuration / Shape)
//   scale.rs  — ScaleFactor, the validated fixed-point grid
//   traits.rs — GrowableModel, the seam between the growth
//               controller and the Burn model
//
// Nothing here touches a tensor.

pub mod error;

pub mod scale;

pub mod traits;
