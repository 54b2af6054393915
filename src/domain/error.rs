// ============================================================
// Layer 3 — Core Error Taxonomy
// ============================================================
// Two kinds of failure exist in the fixed-point core:
//
//   Configuration — a hyperparameter can never work
//                   (scale <= 0, heads not dividing the width)
//   Shape         — a tensor reached a layer with the wrong
//                   rank or width, or an image does not tile
//
// Both are raised synchronously by the call that detects them.
// Nothing in the core retries or recovers; the training loop
// surfaces them through anyhow.

use thiserror::Error;

/// Errors raised by the fixed-point model and its configuration.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum VitError {
    /// A configuration value is outside its legal domain.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// A tensor's dimensions do not match what a layer expects.
    #[error("shape error in {context}: expected {expected}, got {got}")]
    Shape {
        context:  &'static str,
        expected: String,
        got:      String,
    },
}

impl VitError {
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Configuration(msg.into())
    }

    pub fn shape(context: &'static str, expected: impl ToString, got: impl ToString) -> Self {
        Self::Shape {
            context,
            expected: expected.to_string(),
            got:      got.to_string(),
        }
    }
}

/// Result alias for the fixed-point core.
pub type VitResult<T> = std::result::Result<T, VitError>;
