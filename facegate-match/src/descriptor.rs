use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Descriptor length produced by the reference 128-d face encoder.
pub const DEFAULT_DESCRIPTOR_LEN: usize = 128;
pub const DEFAULT_MIN_CONFIDENCE: f64 = 0.7;

/// Why an incoming descriptor was not trusted.
///
/// Payloads carry shapes and scores only, never descriptor values.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum DescriptorError {
    #[error("descriptor has {actual} values, expected {expected}")]
    WrongLength { expected: usize, actual: usize },

    #[error("descriptor component #{position} is not a finite number")]
    NotNumeric { position: usize },

    #[error("confidence {confidence:.3} is below the required minimum {minimum:.3}")]
    LowConfidence { confidence: f64, minimum: f64 },

    #[error("confidence must be a number in [0, 1]")]
    ConfidenceOutOfRange,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DescriptorRules {
    pub expected_len: usize,
    pub min_confidence: f64,
}

impl Default for DescriptorRules {
    fn default() -> Self {
        Self {
            expected_len: DEFAULT_DESCRIPTOR_LEN,
            min_confidence: DEFAULT_MIN_CONFIDENCE,
        }
    }
}

impl DescriptorRules {
    /// Check shape, numeric type and confidence before a descriptor is used.
    pub fn validate(&self, descriptor: &[f64], confidence: f64) -> Result<(), DescriptorError> {
        self.validate_shape(descriptor)?;

        if !confidence.is_finite() || !(0.0..=1.0).contains(&confidence) {
            return Err(DescriptorError::ConfidenceOutOfRange);
        }
        if confidence < self.min_confidence {
            return Err(DescriptorError::LowConfidence {
                confidence,
                minimum: self.min_confidence,
            });
        }
        Ok(())
    }

    /// Shape-only check, used for probes that come without a confidence.
    pub fn validate_shape(&self, descriptor: &[f64]) -> Result<(), DescriptorError> {
        if descriptor.len() != self.expected_len {
            return Err(DescriptorError::WrongLength {
                expected: self.expected_len,
                actual: descriptor.len(),
            });
        }
        if let Some(position) = descriptor.iter().position(|v| !v.is_finite()) {
            return Err(DescriptorError::NotNumeric { position });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_well_formed_descriptor() {
        let rules = DescriptorRules::default();
        assert!(rules.validate(&vec![0.1; 128], 0.95).is_ok());
    }

    #[test]
    fn rejects_wrong_length() {
        let rules = DescriptorRules::default();
        assert_eq!(
            rules.validate(&vec![0.1; 127], 0.95),
            Err(DescriptorError::WrongLength {
                expected: 128,
                actual: 127
            })
        );
    }

    #[test]
    fn rejects_non_finite_component() {
        let rules = DescriptorRules::default();
        let mut descriptor = vec![0.1; 128];
        descriptor[42] = f64::NAN;
        assert_eq!(
            rules.validate(&descriptor, 0.95),
            Err(DescriptorError::NotNumeric { position: 42 })
        );
        descriptor[42] = f64::INFINITY;
        assert!(rules.validate_shape(&descriptor).is_err());
    }

    #[test]
    fn confidence_minimum_is_inclusive() {
        let rules = DescriptorRules::default();
        assert!(rules.validate(&vec![0.1; 128], 0.7).is_ok());
        assert!(matches!(
            rules.validate(&vec![0.1; 128], 0.69),
            Err(DescriptorError::LowConfidence { .. })
        ));
        assert_eq!(
            rules.validate(&vec![0.1; 128], 1.5),
            Err(DescriptorError::ConfidenceOutOfRange)
        );
    }

    #[test]
    fn error_message_does_not_leak_values() {
        let rules = DescriptorRules::default();
        let mut descriptor = vec![0.123456; 128];
        descriptor[3] = f64::NAN;
        let msg = rules.validate(&descriptor, 0.9).unwrap_err().to_string();
        assert!(!msg.contains("0.123456"));
    }
}
