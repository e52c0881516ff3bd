//! V4L2 camera capture via the `v4l` crate.

use crate::frame::{self, Frame};
use crate::source::FrameSource;
use std::path::Path;
use thiserror::Error;
use v4l::buffer::Type as BufType;
use v4l::io::traits::CaptureStream;
use v4l::prelude::*;
use v4l::video::Capture;
use v4l::FourCC;

const REQUESTED_WIDTH: u32 = 640;
const REQUESTED_HEIGHT: u32 = 480;
const STREAM_BUFFERS: u32 = 4;

#[derive(Error, Debug)]
pub enum CameraError {
    #[error("device not found: {0}")]
    DeviceNotFound(String),
    #[error("capture failed: {0}")]
    CaptureFailed(String),
    /// One buffer could not be decoded; the device itself is still usable.
    #[error("corrupt frame: {0}")]
    CorruptFrame(String),
    #[error("device busy")]
    DeviceBusy,
    #[error("format negotiation failed: {0}")]
    FormatNegotiationFailed(String),
    #[error("streaming not supported")]
    StreamingNotSupported,
}

/// Info about a discovered V4L2 device.
#[derive(Debug, Clone)]
pub struct DeviceInfo {
    pub path: String,
    pub name: String,
    pub driver: String,
    pub bus: String,
}

/// Negotiated pixel format for the camera.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PixelFormat {
    /// YUYV 4:2:2 packed (2 bytes/pixel).
    Yuyv,
    /// Motion-JPEG, one compressed image per buffer.
    Mjpg,
    /// Packed 24-bit RGB.
    Rgb3,
    /// 8-bit grayscale.
    Grey,
}

impl PixelFormat {
    fn from_fourcc(fourcc: FourCC) -> Option<Self> {
        match &fourcc.repr {
            b"YUYV" => Some(Self::Yuyv),
            b"MJPG" => Some(Self::Mjpg),
            b"RGB3" => Some(Self::Rgb3),
            b"GREY" => Some(Self::Grey),
            _ => None,
        }
    }
}

/// An open V4L2 capture device with a running mmap stream.
///
/// The device is released when the value is dropped.
pub struct Camera {
    // The stream holds its own reference to the device handle.
    stream: MmapStream<'static>,
    pub width: u32,
    pub height: u32,
    pub device_path: String,
    pub fourcc: FourCC,
    pixel_format: PixelFormat,
}

impl Camera {
    /// Open a V4L2 camera device by path (e.g., "/dev/video0") and start streaming.
    pub fn open(device_path: &str) -> Result<Self, CameraError> {
        if !Path::new(device_path).exists() {
            return Err(CameraError::DeviceNotFound(device_path.to_string()));
        }

        let device = Device::with_path(device_path).map_err(|e| {
            if e.to_string().contains("busy") || e.to_string().contains("EBUSY") {
                CameraError::DeviceBusy
            } else {
                CameraError::DeviceNotFound(format!("{device_path}: {e}"))
            }
        })?;

        let caps = device.query_caps().map_err(|e| {
            CameraError::CaptureFailed(format!("failed to query capabilities: {e}"))
        })?;

        tracing::info!(
            device = device_path,
            driver = %caps.driver,
            card = %caps.card,
            "opened camera"
        );

        if !caps
            .capabilities
            .contains(v4l::capability::Flags::VIDEO_CAPTURE)
        {
            return Err(CameraError::StreamingNotSupported);
        }

        // Ask for YUYV at VGA; drivers that only speak MJPG/RGB3/GREY negotiate those instead.
        let mut fmt = device.format().map_err(|e| {
            CameraError::FormatNegotiationFailed(format!("failed to get format: {e}"))
        })?;
        fmt.fourcc = FourCC::new(b"YUYV");
        fmt.width = REQUESTED_WIDTH;
        fmt.height = REQUESTED_HEIGHT;

        let negotiated = device.set_format(&fmt).map_err(|e| {
            CameraError::FormatNegotiationFailed(format!("failed to set format: {e}"))
        })?;

        let fourcc = negotiated.fourcc;
        let pixel_format = PixelFormat::from_fourcc(fourcc).ok_or_else(|| {
            CameraError::FormatNegotiationFailed(format!(
                "unsupported pixel format: {fourcc:?} (need YUYV, MJPG, RGB3, or GREY)"
            ))
        })?;

        tracing::info!(
            width = negotiated.width,
            height = negotiated.height,
            fourcc = ?fourcc,
            "negotiated format"
        );

        let stream = MmapStream::with_buffers(&device, BufType::VideoCapture, STREAM_BUFFERS)
            .map_err(|e| {
                if e.to_string().contains("busy") || e.to_string().contains("EBUSY") {
                    CameraError::DeviceBusy
                } else {
                    CameraError::CaptureFailed(format!("failed to create mmap stream: {e}"))
                }
            })?;

        Ok(Self {
            stream,
            width: negotiated.width,
            height: negotiated.height,
            device_path: device_path.to_string(),
            fourcc,
            pixel_format,
        })
    }

    pub fn pixel_format(&self) -> PixelFormat {
        self.pixel_format
    }

    /// Capture a single frame, converting to RGB.
    pub fn capture_frame(&mut self) -> Result<Frame, CameraError> {
        let (buf, meta) = self
            .stream
            .next()
            .map_err(|e| CameraError::CaptureFailed(format!("failed to dequeue buffer: {e}")))?;

        let used = (meta.bytesused as usize).min(buf.len());
        let payload = if used > 0 { &buf[..used] } else { buf };
        let sequence = meta.sequence;
        let rgb = convert_to_rgb(self.pixel_format, payload, self.width, self.height)?;

        Ok(Frame {
            data: rgb,
            width: self.width,
            height: self.height,
            timestamp: std::time::Instant::now(),
            sequence,
        })
    }

    /// Capture and drop `count` frames while auto exposure settles, then keep
    /// dropping dark frames for up to `count * 2` more attempts.
    ///
    /// Returns the number of dark frames skipped after the fixed warmup.
    pub fn discard_frames(&mut self, count: usize) -> usize {
        if count == 0 {
            return 0;
        }
        tracing::info!(count, "discarding warmup frames");
        for _ in 0..count {
            if let Err(e) = self.capture_frame() {
                tracing::debug!(error = %e, "warmup frame failed");
            }
        }

        let mut dark_skipped = 0;
        for _ in 0..count * 2 {
            match self.capture_frame() {
                Ok(frame) if frame.is_dark() => dark_skipped += 1,
                Ok(_) => break,
                Err(e) => tracing::debug!(error = %e, "warmup frame failed"),
            }
        }
        if dark_skipped > 0 {
            tracing::debug!(dark_skipped, "skipped dark frames after warmup");
        }
        dark_skipped
    }

    /// List available V4L2 video capture devices.
    pub fn list_devices() -> Vec<DeviceInfo> {
        let mut devices = Vec::new();

        for i in 0..16 {
            let path = format!("/dev/video{i}");
            if !Path::new(&path).exists() {
                continue;
            }
            let Ok(dev) = Device::with_path(&path) else {
                continue;
            };
            let Ok(caps) = dev.query_caps() else {
                continue;
            };
            if !caps.capabilities.contains(v4l::capability::Flags::VIDEO_CAPTURE) {
                continue;
            }
            devices.push(DeviceInfo {
                path,
                name: caps.card.clone(),
                driver: caps.driver.clone(),
                bus: caps.bus.clone(),
            });
        }

        devices
    }
}

impl FrameSource for Camera {
    fn next_frame(&mut self) -> Result<Option<Frame>, CameraError> {
        self.capture_frame().map(Some)
    }
}

impl Drop for Camera {
    fn drop(&mut self) {
        tracing::info!(device = %self.device_path, "released camera");
    }
}

/// Convert a raw buffer to packed RGB based on the negotiated format.
fn convert_to_rgb(
    format: PixelFormat,
    buf: &[u8],
    width: u32,
    height: u32,
) -> Result<Vec<u8>, CameraError> {
    let pixels = width as usize * height as usize;
    match format {
        PixelFormat::Rgb3 => {
            if buf.len() < pixels * 3 {
                return Err(CameraError::CorruptFrame(format!(
                    "RGB3 buffer too short: expected {}, got {}",
                    pixels * 3,
                    buf.len()
                )));
            }
            Ok(buf[..pixels * 3].to_vec())
        }
        PixelFormat::Grey => frame::grey_to_rgb(buf, width, height)
            .map_err(|e| CameraError::CorruptFrame(format!("GREY conversion failed: {e}"))),
        PixelFormat::Yuyv => frame::yuyv_to_rgb(buf, width, height)
            .map_err(|e| CameraError::CorruptFrame(format!("YUYV conversion failed: {e}"))),
        PixelFormat::Mjpg => frame::mjpeg_to_rgb(buf, width, height)
            .map_err(|e| CameraError::CorruptFrame(format!("MJPG decode failed: {e}"))),
    }
}
