//! glowscan-hw: Hardware abstraction for camera frame acquisition.
//!
//! Provides V4L2-based camera access, pixel format conversion to packed
//! RGB, and the [`FrameSource`] seam the analysis pipeline pulls from.

pub mod camera;
pub mod frame;
pub mod source;

pub use camera::{Camera, CameraError, DeviceInfo, PixelFormat};
pub use frame::Frame;
pub use source::{FrameSource, ReplaySource};
