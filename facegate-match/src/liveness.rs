//! Heuristic anti-spoofing gate.
//!
//! The score starts at 1.0 and each signal that was checked and failed
//! multiplies it down. Signals that were not supplied are "not checked" and
//! apply no penalty. This is a tunable heuristic, not a proof of liveness.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LivenessSignals {
    pub blink_detected: Option<bool>,
    /// Normalised head displacement across the capture window.
    pub head_movement: Option<f64>,
    /// Expression classifier confidences, one per expression.
    pub expressions: Option<Vec<f64>>,
    pub texture_score: Option<f64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LivenessPolicy {
    pub anti_spoofing_threshold: f64,
    pub no_blink_penalty: f64,
    pub still_head_penalty: f64,
    pub flat_expression_penalty: f64,
    /// Movement at or below this counts as no movement.
    pub min_head_movement: f64,
    /// An expression must exceed this confidence to count.
    pub expression_confidence: f64,
}

impl Default for LivenessPolicy {
    fn default() -> Self {
        Self {
            anti_spoofing_threshold: 0.8,
            no_blink_penalty: 0.7,
            still_head_penalty: 0.8,
            flat_expression_penalty: 0.9,
            min_head_movement: 0.1,
            expression_confidence: 0.5,
        }
    }
}

/// Which signals actually took part in the assessment.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LivenessChecks {
    pub blink: bool,
    pub movement: bool,
    pub expressions: bool,
    pub texture: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LivenessAssessment {
    pub is_live: bool,
    pub score: f64,
    pub checks: LivenessChecks,
}

impl LivenessPolicy {
    pub fn assess(&self, signals: &LivenessSignals) -> LivenessAssessment {
        let mut score = 1.0;
        let mut checks = LivenessChecks::default();

        if let Some(blinked) = signals.blink_detected {
            checks.blink = true;
            if !blinked {
                score *= penalty(self.no_blink_penalty);
            }
        }

        if let Some(movement) = signals.head_movement {
            checks.movement = true;
            if movement.is_nan() || movement <= self.min_head_movement {
                score *= penalty(self.still_head_penalty);
            }
        }

        if let Some(expressions) = &signals.expressions {
            checks.expressions = true;
            let expressive = expressions
                .iter()
                .any(|&c| c > self.expression_confidence);
            if !expressive {
                score *= penalty(self.flat_expression_penalty);
            }
        }

        if let Some(texture) = signals.texture_score {
            checks.texture = true;
            score *= penalty(texture);
        }

        LivenessAssessment {
            is_live: score >= self.anti_spoofing_threshold,
            score,
            checks,
        }
    }
}

// Multipliers stay inside [0, 1] so the product does too.
fn penalty(factor: f64) -> f64 {
    if factor.is_nan() {
        0.0
    } else {
        factor.clamp(0.0, 1.0)
    }
}
