//! JPEG encoding and multipart framing for the live video stream.

use bytes::{BufMut, Bytes, BytesMut};
use glowscan_hw::Frame;
use image::codecs::jpeg::JpegEncoder;
use image::ExtendedColorType;
use thiserror::Error;

/// Multipart boundary token separating stream parts.
pub const BOUNDARY: &str = "frame";
/// Response content type for the video stream.
pub const CONTENT_TYPE: &str = "multipart/x-mixed-replace; boundary=frame";

#[derive(Error, Debug)]
pub enum EncodeError {
    #[error("jpeg encoding failed: {0}")]
    Jpeg(#[from] image::ImageError),
}

#[derive(Debug, Clone, Copy)]
pub struct StreamEncoder {
    quality: u8,
}

impl Default for StreamEncoder {
    fn default() -> Self {
        Self::new(80)
    }
}

impl StreamEncoder {
    /// `quality` is clamped to 1-100.
    pub fn new(quality: u8) -> Self {
        Self {
            quality: quality.clamp(1, 100),
        }
    }

    pub fn quality(&self) -> u8 {
        self.quality
    }

    /// Encode an RGB frame as a baseline JPEG.
    pub fn encode_jpeg(&self, frame: &Frame) -> Result<Bytes, EncodeError> {
        let mut buf = Vec::with_capacity(frame.data.len() / 8);
        let mut encoder = JpegEncoder::new_with_quality(&mut buf, self.quality);
        encoder.encode(&frame.data, frame.width, frame.height, ExtendedColorType::Rgb8)?;
        Ok(Bytes::from(buf))
    }
}

/// Wrap a JPEG image as one `multipart/x-mixed-replace` part.
pub fn multipart_chunk(jpeg: &[u8]) -> Bytes {
    let mut chunk = BytesMut::with_capacity(jpeg.len() + 64);
    chunk.put_slice(b"--");
    chunk.put_slice(BOUNDARY.as_bytes());
    chunk.put_slice(b"\r\nContent-Type: image/jpeg\r\n\r\n");
    chunk.put_slice(jpeg);
    chunk.put_slice(b"\r\n");
    chunk.freeze()
}
