//! Brightness-based skin-condition classifier.
//!
//! The thresholds are an uncalibrated heuristic over mean grayscale intensity,
//! not a validated cosmetic or medical measure.

use crate::types::{ClassificationLabel, FaceRegion};
use serde::{Deserialize, Serialize};

/// Mean-intensity cut points. Each bound is exclusive: a mean equal to a bound
/// falls into the darker category.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Thresholds {
    /// Mean strictly above this is [`ClassificationLabel::Glowing`].
    pub glowing_above: f64,
    /// Mean strictly above this (and not glowing) is [`ClassificationLabel::Normal`].
    pub normal_above: f64,
    /// Mean strictly above this (and not normal) is [`ClassificationLabel::Dull`];
    /// anything at or below is [`ClassificationLabel::Oily`].
    pub dull_above: f64,
}

impl Default for Thresholds {
    fn default() -> Self {
        Self {
            glowing_above: 160.0,
            normal_above: 120.0,
            dull_above: 80.0,
        }
    }
}

impl Thresholds {
    pub fn is_ordered(&self) -> bool {
        self.glowing_above >= self.normal_above && self.normal_above >= self.dull_above
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct BrightnessClassifier {
    thresholds: Thresholds,
}

impl BrightnessClassifier {
    pub fn new(thresholds: Thresholds) -> Self {
        if !thresholds.is_ordered() {
            tracing::warn!(?thresholds, "classifier thresholds are not descending");
        }
        Self { thresholds }
    }

    pub fn thresholds(&self) -> &Thresholds {
        &self.thresholds
    }

    /// Classify a face by the mean intensity of its pixels.
    pub fn classify(&self, face: &FaceRegion) -> ClassificationLabel {
        self.classify_mean(face.mean_intensity())
    }

    /// Map a mean intensity to a label.
    pub fn classify_mean(&self, mean: f64) -> ClassificationLabel {
        let t = &self.thresholds;
        if mean > t.glowing_above {
            ClassificationLabel::Glowing
        } else if mean > t.normal_above {
            ClassificationLabel::Normal
        } else if mean > t.dull_above {
            ClassificationLabel::Dull
        } else {
            ClassificationLabel::Oily
        }
    }
}
