//! One analysis pass over a colour frame: detect, classify the primary face, mark it.

use crate::annotate::{draw_rectangle, MARKER_COLOR, MARKER_THICKNESS};
use crate::classifier::BrightnessClassifier;
use crate::detector::{DetectorError, FaceDetector};
use crate::imgproc::rgb_to_gray;
use crate::types::{BoundingBox, ClassificationLabel};

/// Outcome of [`analyze_frame`].
#[derive(Debug, Clone, PartialEq)]
pub struct Analysis {
    pub label: ClassificationLabel,
    /// The face that was classified and marked, if any.
    pub face: Option<BoundingBox>,
    /// Mean grayscale intensity of the classified face.
    pub brightness: Option<f64>,
    /// How many faces the detector reported (only the first is used).
    pub faces_detected: usize,
}

impl Analysis {
    pub fn no_face() -> Self {
        Self {
            label: ClassificationLabel::NoFaceDetected,
            face: None,
            brightness: None,
            faces_detected: 0,
        }
    }
}

/// Analyse a packed RGB8 frame in place.
///
/// Only the first face in detector order is classified and outlined; any
/// others are ignored. With no face the frame is left untouched. On error the
/// frame is also left untouched.
pub fn analyze_frame(
    rgb: &mut [u8],
    width: u32,
    height: u32,
    detector: &dyn FaceDetector,
    classifier: &BrightnessClassifier,
) -> Result<Analysis, DetectorError> {
    let expected = width as usize * height as usize * 3;
    if rgb.len() != expected {
        return Err(DetectorError::InvalidFrame {
            expected,
            actual: rgb.len(),
        });
    }

    let gray = rgb_to_gray(rgb);
    let regions = detector.detect_regions(&gray, width, height)?;
    let faces_detected = regions.len();

    let Some(primary) = regions.into_iter().next() else {
        return Ok(Analysis::no_face());
    };

    let brightness = primary.mean_intensity();
    let label = classifier.classify_mean(brightness);
    draw_rectangle(rgb, width, height, primary.bbox, MARKER_COLOR, MARKER_THICKNESS);

    Ok(Analysis {
        label,
        face: Some(primary.bbox),
        brightness: Some(brightness),
        faces_detected,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Reports fixed rectangles regardless of the image.
    struct FixedDetector(Vec<BoundingBox>);

    impl FaceDetector for FixedDetector {
        fn detect(&self, _: &[u8], _: u32, _: u32) -> Result<Vec<BoundingBox>, DetectorError> {
            Ok(self.0.clone())
        }
    }

    struct FailingDetector;

    impl FaceDetector for FailingDetector {
        fn detect(&self, _: &[u8], _: u32, _: u32) -> Result<Vec<BoundingBox>, DetectorError> {
            Err(DetectorError::DetectionFailed("boom".into()))
        }
    }

    /// 20x10 frame: left half gray 200, right half gray 60.
    fn split_frame() -> Vec<u8> {
        let mut rgb = Vec::with_capacity(20 * 10 * 3);
        for _y in 0..10 {
            for x in 0..20 {
                let v = if x < 10 { 200 } else { 60 };
                rgb.extend_from_slice(&[v, v, v]);
            }
        }
        rgb
    }

    #[test]
    fn test_no_face_leaves_frame_untouched() {
        let mut rgb = split_frame();
        let original = rgb.clone();
        let analysis =
            analyze_frame(&mut rgb, 20, 10, &FixedDetector(vec![]), &BrightnessClassifier::default())
                .unwrap();
        assert_eq!(analysis, Analysis::no_face());
        assert_eq!(rgb, original);
    }

    #[test]
    fn test_first_face_is_classified_and_marked() {
        let mut rgb = split_frame();
        let bright = BoundingBox::new(2, 2, 6, 6);
        let dark = BoundingBox::new(12, 2, 6, 6);
        let detector = FixedDetector(vec![bright, dark]);

        let analysis =
            analyze_frame(&mut rgb, 20, 10, &detector, &BrightnessClassifier::default()).unwrap();
        assert_eq!(analysis.label, ClassificationLabel::Glowing);
        assert_eq!(analysis.face, Some(bright));
        assert_eq!(analysis.faces_detected, 2);

        // Marker on the first face only
        let at = |x: usize, y: usize| &rgb[(y * 20 + x) * 3..(y * 20 + x) * 3 + 3];
        assert_eq!(at(2, 2), &MARKER_COLOR);
        assert_eq!(at(12, 2), &[60, 60, 60]);
    }

    #[test]
    fn test_order_decides_subject() {
        let mut rgb = split_frame();
        let detector = FixedDetector(vec![BoundingBox::new(12, 2, 6, 6), BoundingBox::new(2, 2, 6, 6)]);
        let analysis =
            analyze_frame(&mut rgb, 20, 10, &detector, &BrightnessClassifier::default()).unwrap();
        assert_eq!(analysis.label, ClassificationLabel::Oily);
    }

    #[test]
    fn test_detector_error_leaves_frame_untouched() {
        let mut rgb = split_frame();
        let original = rgb.clone();
        let result = analyze_frame(&mut rgb, 20, 10, &FailingDetector, &BrightnessClassifier::default());
        assert!(matches!(result, Err(DetectorError::DetectionFailed(_))));
        assert_eq!(rgb, original);
    }

    #[test]
    fn test_rejects_wrong_length() {
        let mut rgb = vec![0u8; 10];
        let result =
            analyze_frame(&mut rgb, 20, 10, &FixedDetector(vec![]), &BrightnessClassifier::default());
        assert!(matches!(result, Err(DetectorError::InvalidFrame { .. })));
    }
}
