// ============================================================
// Layer 3 — Core Traits (Abstractions)
// ============================================================
// The growth controller never sees a Burn module directly.
// It only needs three things from a model:
//
//   depth()         — how many encoder layers exist now
//   spawn_layer()   — build one fresh layer of the model's width
//   append_layer()  — push that layer onto the end of the stack
//
// VisionTransformer implements this for every backend. Tests
// implement it with a plain counter so the decision logic runs
// without allocating a single tensor.

use crate::domain::error::VitResult;

/// A model whose encoder stack can be extended by one layer at a time.
///
/// Implementations must keep existing layers untouched when appending,
/// and `depth()` must never decrease.
pub trait GrowableModel {
    /// The layer type held by the stack.
    type Layer;

    /// Current number of encoder layers.
    fn depth(&self) -> usize;

    /// Build a freshly initialised layer with the model's own width,
    /// head count and scale. Weights are drawn from `Normal(0, init_std)`.
    fn spawn_layer(&self, init_std: f64) -> VitResult<Self::Layer>;

    /// Append `layer` after the last existing layer. Fails with a shape
    /// error if the layer's width differs from the stack's.
    fn append_layer(&mut self, layer: Self::Layer) -> VitResult<()>;
}
