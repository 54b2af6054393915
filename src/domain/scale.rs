use serde::{Deserialize, Serialize};

use crate::domain::error::{VitError, VitResult};

/// Smallest value on the signed 8-bit grid.
pub const QMIN: f32 = -128.0;
/// Largest value on the signed 8-bit grid.
pub const QMAX: f32 = 127.0;

/// Reciprocal of the fixed-point grid step.
///
/// A quantized value is always `k / s` for an integer `k` in
/// `[-128, 127]`, so the representable range is `[-128/s, 127/s]`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "f32", into = "f32")]
pub struct ScaleFactor(f32);

impl ScaleFactor {
    pub fn new(s: f32) -> VitResult<Self> {
        if !s.is_finite() || s <= 0.0 {
            return Err(VitError::config(format!(
                "scale factor must be a positive finite number, got {s}"
            )));
        }
        Ok(Self(s))
    }

    pub fn get(self) -> f32 {
        self.0
    }

    /// Grid step `1 / s`.
    pub fn step(self) -> f32 {
        1.0 / self.0
    }

    /// Lowest representable real value.
    pub fn min_value(self) -> f32 {
        QMIN / self.0
    }

    /// Highest representable real value.
    pub fn max_value(self) -> f32 {
        QMAX / self.0
    }

    /// Scalar form of the quantizer, used by tests and diagnostics.
    /// Ties round to even, as the tensor quantizer does.
    pub fn quantize_scalar(self, x: f32) -> f32 {
        (x * self.0).round_ties_even().clamp(QMIN, QMAX) / self.0
    }
}

impl TryFrom<f32> for ScaleFactor {
    type Error = VitError;

    fn try_from(s: f32) -> VitResult<Self> {
        Self::new(s)
    }
}

impl From<ScaleFactor> for f32 {
    fn from(s: ScaleFactor) -> f32 {
        s.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rejects_non_positive() {
        assert!(matches!(ScaleFactor::new(0.0), Err(VitError::Configuration(_))));
        assert!(matches!(ScaleFactor::new(-4.0), Err(VitError::Configuration(_))));
        assert!(ScaleFactor::new(f32::NAN).is_err());
        assert!(ScaleFactor::new(f32::INFINITY).is_err());
    }

    #[test]
    fn test_range() {
        let s = ScaleFactor::new(16.0).unwrap();
        assert_eq!(s.min_value(), -8.0);
        assert_eq!(s.max_value(), 7.9375);
        assert_eq!(s.step(), 0.0625);
    }

    #[test]
    fn test_quantize_scalar_rounds_and_clamps() {
        let s = ScaleFactor::new(16.0).unwrap();
        assert_eq!(s.quantize_scalar(0.03), 0.0);
        assert_eq!(s.quantize_scalar(0.04), 0.0625);
        assert_eq!(s.quantize_scalar(100.0), 7.9375);
        assert_eq!(s.quantize_scalar(-100.0), -8.0);
    }

    #[test]
    fn test_serde_validates() {
        let s: ScaleFactor = serde_json::from_str("16.0").unwrap();
        assert_eq!(s.get(), 16.0);
        assert!(serde_json::from_str::<ScaleFactor>("-1.0").is_err());
    }
}
