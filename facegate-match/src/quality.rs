use serde::{Deserialize, Serialize};

/// Face bounding box in capture pixels.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FaceBounds {
    pub width: f64,
    pub height: f64,
}

/// Head orientation in degrees.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Pose {
    pub yaw: f64,
    pub pitch: f64,
}

/// Auxiliary capture signals. Every field is optional; absent signals add nothing.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QualitySignals {
    pub confidence: Option<f64>,
    pub face_bounds: Option<FaceBounds>,
    pub pose: Option<Pose>,
    pub lighting_score: Option<f64>,
    pub blur_score: Option<f64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QualityWeights {
    pub confidence: f64,
    pub face_size: f64,
    pub pose: f64,
    pub lighting: f64,
    pub sharpness: f64,
    /// Face area (px²) that counts as a full-size face.
    pub face_area_norm: f64,
}

impl Default for QualityWeights {
    fn default() -> Self {
        Self {
            confidence: 0.30,
            face_size: 0.20,
            pose: 0.20,
            lighting: 0.15,
            sharpness: 0.15,
            face_area_norm: 10_000.0,
        }
    }
}

impl QualitySignals {
    pub fn with_confidence(confidence: f64) -> Self {
        Self {
            confidence: Some(confidence),
            ..Self::default()
        }
    }

    /// Composite capture quality in `[0, 1]`.
    ///
    /// The sum is not renormalised over the signals present, so sparse
    /// evidence scores lower than rich evidence of the same quality.
    pub fn score(&self, weights: &QualityWeights) -> f64 {
        let mut score = 0.0;

        if let Some(confidence) = self.confidence {
            score += unit(confidence) * weights.confidence;
        }
        if let Some(bounds) = self.face_bounds {
            score += face_size_score(bounds, weights.face_area_norm) * weights.face_size;
        }
        if let Some(pose) = self.pose {
            score += frontality(pose) * weights.pose;
        }
        if let Some(lighting) = self.lighting_score {
            score += unit(lighting) * weights.lighting;
        }
        if let Some(blur) = self.blur_score {
            score += (1.0 - unit(blur)) * weights.sharpness;
        }

        round3(score.clamp(0.0, 1.0))
    }
}

/// `1 - (|yaw| + |pitch|) / 180`, floored at zero for extreme poses.
pub fn frontality(pose: Pose) -> f64 {
    unit(1.0 - (pose.yaw.abs() + pose.pitch.abs()) / 180.0)
}

fn face_size_score(bounds: FaceBounds, norm: f64) -> f64 {
    if norm <= 0.0 {
        return 0.0;
    }
    let area = bounds.width.max(0.0) * bounds.height.max(0.0);
    unit(area / norm)
}

fn unit(v: f64) -> f64 {
    if v.is_nan() {
        0.0
    } else {
        v.clamp(0.0, 1.0)
    }
}

fn round3(v: f64) -> f64 {
    (v * 1000.0).round() / 1000.0
}
