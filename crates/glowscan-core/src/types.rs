use serde::{Deserialize, Serialize};

/// Axis-aligned rectangle in pixel coordinates of the analysed frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl BoundingBox {
    pub fn new(x: u32, y: u32, width: u32, height: u32) -> Self {
        Self { x, y, width, height }
    }

    /// Clip the rectangle to an image of `width` × `height`.
    ///
    /// Returns `None` when nothing of the rectangle lies inside the image.
    pub fn clamp_to(&self, width: u32, height: u32) -> Option<Self> {
        if self.x >= width || self.y >= height {
            return None;
        }
        let w = self.width.min(width - self.x);
        let h = self.height.min(height - self.y);
        if w == 0 || h == 0 {
            return None;
        }
        Some(Self::new(self.x, self.y, w, h))
    }

    pub fn area(&self) -> u64 {
        self.width as u64 * self.height as u64
    }
}

/// A detected face: its rectangle plus the grayscale pixels it bounds.
///
/// Lives only for the duration of one analysis pass.
#[derive(Debug, Clone)]
pub struct FaceRegion {
    pub bbox: BoundingBox,
    /// Row-major grayscale samples, `bbox.width * bbox.height` bytes.
    pub pixels: Vec<u8>,
}

impl FaceRegion {
    /// Copy the pixels under `bbox` out of a grayscale image.
    ///
    /// The rectangle is clipped to the image first; `None` if it falls outside.
    pub fn crop(gray: &[u8], width: u32, height: u32, bbox: BoundingBox) -> Option<Self> {
        let bbox = bbox.clamp_to(width, height)?;
        let w = width as usize;
        let mut pixels = Vec::with_capacity(bbox.area() as usize);
        for row in bbox.y..bbox.y + bbox.height {
            let start = row as usize * w + bbox.x as usize;
            pixels.extend_from_slice(gray.get(start..start + bbox.width as usize)?);
        }
        Some(Self { bbox, pixels })
    }

    /// Arithmetic mean of the grayscale samples (0.0 to 255.0); 0.0 when empty.
    pub fn mean_intensity(&self) -> f64 {
        if self.pixels.is_empty() {
            return 0.0;
        }
        self.pixels.iter().map(|&p| p as u64).sum::<u64>() as f64 / self.pixels.len() as f64
    }
}

/// Skin-condition category derived from face brightness.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClassificationLabel {
    Glowing,
    Normal,
    Dull,
    Oily,
    NoFaceDetected,
}

impl ClassificationLabel {
    /// Human-readable condition name, `None` for [`NoFaceDetected`](Self::NoFaceDetected).
    pub fn condition(&self) -> Option<&'static str> {
        match self {
            Self::Glowing => Some("Glowing skin"),
            Self::Normal => Some("Normal skin"),
            Self::Dull => Some("Dull skin"),
            Self::Oily => Some("Oily skin"),
            Self::NoFaceDetected => None,
        }
    }

    /// Status text shown to clients and stored in history.
    pub fn status_text(&self) -> String {
        match self.condition() {
            Some(condition) => format!("1 face detected. Condition: {condition}"),
            None => NO_FACE_TEXT.to_string(),
        }
    }
}

/// Published text when the frame holds no face.
pub const NO_FACE_TEXT: &str = "No face detected";

impl std::fmt::Display for ClassificationLabel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.status_text())
    }
}
