//! Frame type, dark-frame detection and pixel format conversion to packed RGB.

/// A captured colour camera frame.
///
/// Pixels are packed RGB8, row-major, `width * height * 3` bytes.
#[derive(Clone)]
pub struct Frame {
    pub data: Vec<u8>,
    pub width: u32,
    pub height: u32,
    pub timestamp: std::time::Instant,
    pub sequence: u32,
}

impl Frame {
    /// Bytes per pixel of the packed RGB layout.
    pub const CHANNELS: usize = 3;

    /// Wrap an RGB buffer, checking that it covers `width * height` pixels.
    pub fn from_rgb(data: Vec<u8>, width: u32, height: u32, sequence: u32) -> Result<Self, FrameError> {
        let expected = width as usize * height as usize * Self::CHANNELS;
        if data.len() != expected {
            return Err(FrameError::InvalidLength {
                expected,
                actual: data.len(),
            });
        }
        Ok(Self {
            data,
            width,
            height,
            timestamp: std::time::Instant::now(),
            sequence,
        })
    }

    /// A frame filled with a single colour.
    pub fn filled(width: u32, height: u32, rgb: [u8; 3], sequence: u32) -> Self {
        let pixels = width as usize * height as usize;
        let mut data = Vec::with_capacity(pixels * Self::CHANNELS);
        for _ in 0..pixels {
            data.extend_from_slice(&rgb);
        }
        Self {
            data,
            width,
            height,
            timestamp: std::time::Instant::now(),
            sequence,
        }
    }

    pub fn pixel_count(&self) -> usize {
        self.width as usize * self.height as usize
    }

    /// Whether nearly all pixels are black (sensor still settling, lens covered).
    pub fn is_dark(&self) -> bool {
        is_dark_frame(&self.data, DARK_FRAME_RATIO)
    }
}

/// Fraction of dark pixels above which a frame counts as dark.
pub const DARK_FRAME_RATIO: f32 = 0.95;

/// Check if a packed RGB buffer is dark.
///
/// Returns true if more than `threshold_pct` of pixels have every channel
/// in the darkest bucket (0 to 31).
pub fn is_dark_frame(rgb: &[u8], threshold_pct: f32) -> bool {
    let pixels = rgb.len() / Frame::CHANNELS;
    if pixels == 0 {
        return true;
    }
    let dark_count = rgb
        .chunks_exact(Frame::CHANNELS)
        .filter(|px| px.iter().all(|&c| c < 32))
        .count();
    (dark_count as f32 / pixels as f32) > threshold_pct
}

impl std::fmt::Debug for Frame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Frame")
            .field("width", &self.width)
            .field("height", &self.height)
            .field("sequence", &self.sequence)
            .finish_non_exhaustive()
    }
}

/// Convert packed YUYV (4:2:2) to RGB using BT.601 studio-swing coefficients.
///
/// YUYV packs two pixels per 4 bytes: [Y0, U, Y1, V]; both pixels share U/V.
pub fn yuyv_to_rgb(yuyv: &[u8], width: u32, height: u32) -> Result<Vec<u8>, FrameError> {
    let expected = width as usize * height as usize * 2;
    if yuyv.len() < expected {
        return Err(FrameError::InvalidLength {
            expected,
            actual: yuyv.len(),
        });
    }

    let mut rgb = Vec::with_capacity(width as usize * height as usize * 3);
    for chunk in yuyv[..expected].chunks_exact(4) {
        let (y0, u, y1, v) = (chunk[0], chunk[1], chunk[2], chunk[3]);
        rgb.extend_from_slice(&ycbcr_to_rgb(y0, u, v));
        rgb.extend_from_slice(&ycbcr_to_rgb(y1, u, v));
    }
    Ok(rgb)
}

fn ycbcr_to_rgb(y: u8, u: u8, v: u8) -> [u8; 3] {
    let c = y as i32 - 16;
    let d = u as i32 - 128;
    let e = v as i32 - 128;
    let clip = |x: i32| x.clamp(0, 255) as u8;
    [
        clip((298 * c + 409 * e + 128) >> 8),
        clip((298 * c - 100 * d - 208 * e + 128) >> 8),
        clip((298 * c + 516 * d + 128) >> 8),
    ]
}

/// Expand 8-bit grayscale to RGB by replicating the sample into all channels.
pub fn grey_to_rgb(gray: &[u8], width: u32, height: u32) -> Result<Vec<u8>, FrameError> {
    let pixels = width as usize * height as usize;
    if gray.len() < pixels {
        return Err(FrameError::InvalidLength {
            expected: pixels,
            actual: gray.len(),
        });
    }
    Ok(gray[..pixels].iter().flat_map(|&g| [g, g, g]).collect())
}

/// Decode a Motion-JPEG buffer into RGB, checking the decoded dimensions.
pub fn mjpeg_to_rgb(jpeg: &[u8], width: u32, height: u32) -> Result<Vec<u8>, FrameError> {
    let decoded = image::load_from_memory_with_format(jpeg, image::ImageFormat::Jpeg)
        .map_err(|e| FrameError::Decode(e.to_string()))?
        .to_rgb8();
    if decoded.width() != width || decoded.height() != height {
        return Err(FrameError::Decode(format!(
            "MJPG frame is {}x{}, negotiated {width}x{height}",
            decoded.width(),
            decoded.height()
        )));
    }
    Ok(decoded.into_raw())
}

#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    #[error("invalid buffer length: expected {expected}, got {actual}")]
    InvalidLength { expected: usize, actual: usize },
    #[error("decode failed: {0}")]
    Decode(String),
}
