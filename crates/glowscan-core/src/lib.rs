//! glowscan-core: Face detection and skin-condition classification.
//!
//! Detects faces with an OpenCV-format Haar cascade evaluated over integral
//! images, and labels the primary face by its mean grayscale brightness.

pub mod analysis;
pub mod annotate;
pub mod cascade;
pub mod classifier;
pub mod detector;
pub mod imgproc;
pub mod types;

pub use analysis::{analyze_frame, Analysis};
pub use cascade::{CascadeCache, CascadeError, HaarCascade};
pub use classifier::{BrightnessClassifier, Thresholds};
pub use detector::{CascadeDetector, DetectorError, DetectorParams, FaceDetector};
pub use types::{BoundingBox, ClassificationLabel, FaceRegion};
