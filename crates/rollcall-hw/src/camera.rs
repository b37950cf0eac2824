//! V4L2 camera capture via the `v4l` crate.

use crate::frame::{self, Frame};
use std::path::Path;
use thiserror::Error;
use v4l::buffer::Type as BufType;
use v4l::io::traits::CaptureStream;
use v4l::prelude::*;
use v4l::video::Capture;
use v4l::FourCC;

const MMAP_BUFFERS: u32 = 4;
const DARK_THRESHOLD: f32 = 0.95;
const EBUSY: i32 = 16;

#[derive(Error, Debug)]
pub enum CameraError {
    #[error("no camera at {0}")]
    DeviceNotFound(String),
    #[error("frame capture failed: {0}")]
    CaptureFailed(String),
    #[error("camera is in use by another process")]
    DeviceBusy,
    #[error("no usable pixel format: {0}")]
    FormatNegotiationFailed(String),
    #[error("device cannot capture video")]
    StreamingNotSupported,
}

/// A capture device found by [`Camera::list_devices`].
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
    /// Motion JPEG, one JPEG image per buffer.
    Mjpeg,
    /// 8-bit grayscale.
    Grey,
    /// 16-bit little-endian grayscale.
    Y16,
}

impl PixelFormat {
    fn from_fourcc(fourcc: FourCC) -> Option<Self> {
        match &fourcc.repr {
            b"YUYV" => Some(Self::Yuyv),
            b"MJPG" => Some(Self::Mjpeg),
            b"GREY" => Some(Self::Grey),
            b"Y16 " | b"Y16\0" => Some(Self::Y16),
            _ => None,
        }
    }
}

/// An opened camera with its negotiated geometry.
pub struct Camera {
    device: Device,
    pub width: u32,
    pub height: u32,
    pub device_path: String,
    pub fourcc: FourCC,
    pixel_format: PixelFormat,
}

impl Camera {
    /// Open a V4L2 camera (e.g. "/dev/video0") and request a `width`×`height`
    /// YUYV stream. Drivers that answer with MJPG, GREY or Y16 are accepted.
    pub fn open(device_path: &str, width: u32, height: u32) -> Result<Self, CameraError> {
        if !Path::new(device_path).exists() {
            return Err(CameraError::DeviceNotFound(device_path.to_string()));
        }
        let device = Device::with_path(device_path).map_err(|e| match e.raw_os_error() {
            Some(EBUSY) => CameraError::DeviceBusy,
            _ => CameraError::DeviceNotFound(format!("{device_path}: {e}")),
        })?;

        let caps = device
            .query_caps()
            .map_err(|e| CameraError::CaptureFailed(format!("capability query: {e}")))?;
        if !caps.capabilities.contains(v4l::capability::Flags::VIDEO_CAPTURE) {
            return Err(CameraError::StreamingNotSupported);
        }
        tracing::info!(
            device = device_path,
            driver = %caps.driver,
            card = %caps.card,
            "camera opened"
        );

        let (format, pixel_format) = negotiate(&device, width, height)?;
        Ok(Self {
            device,
            width: format.width,
            height: format.height,
            device_path: device_path.to_string(),
            fourcc: format.fourcc,
            pixel_format,
        })
    }

    /// Start streaming. Frames are pulled one at a time from the returned stream.
    pub fn stream(&self) -> Result<FrameStream<'_>, CameraError> {
        let stream = MmapStream::with_buffers(&self.device, BufType::VideoCapture, MMAP_BUFFERS)
            .map_err(|e| CameraError::CaptureFailed(format!("failed to create mmap stream: {e}")))?;
        Ok(FrameStream {
            camera: self,
            stream,
        })
    }

    /// Convert a raw buffer to RGB based on the negotiated format.
    fn buf_to_rgb(&self, buf: &[u8]) -> Result<Vec<u8>, CameraError> {
        let converted = match self.pixel_format {
            PixelFormat::Yuyv => frame::yuyv_to_rgb(buf, self.width, self.height),
            PixelFormat::Mjpeg => frame::mjpeg_to_rgb(buf, self.width, self.height),
            PixelFormat::Grey => frame::grey_to_rgb(buf, self.width, self.height),
            PixelFormat::Y16 => frame::y16_to_rgb(buf, self.width, self.height),
        };
        converted.map_err(|e| {
            CameraError::CaptureFailed(format!("{:?} conversion failed: {e}", self.pixel_format))
        })
    }

    /// Capture-capable devices among `/dev/video0` to `/dev/video15`.
    pub fn list_devices() -> Vec<DeviceInfo> {
        (0..16)
            .map(|i| format!("/dev/video{i}"))
            .filter(|path| Path::new(path).exists())
            .filter_map(|path| {
                let caps = Device::with_path(&path).ok()?.query_caps().ok()?;
                caps.capabilities
                    .contains(v4l::capability::Flags::VIDEO_CAPTURE)
                    .then(|| DeviceInfo {
                        path,
                        name: caps.card,
                        driver: caps.driver,
                        bus: caps.bus,
                    })
            })
            .collect()
    }
}

/// Ask for YUYV at the requested size and accept whatever supported format
/// the driver settles on.
fn negotiate(
    device: &Device,
    width: u32,
    height: u32,
) -> Result<(v4l::Format, PixelFormat), CameraError> {
    let mut requested = device
        .format()
        .map_err(|e| CameraError::FormatNegotiationFailed(format!("get format: {e}")))?;
    requested.fourcc = FourCC::new(b"YUYV");
    requested.width = width;
    requested.height = height;

    let format = device
        .set_format(&requested)
        .map_err(|e| CameraError::FormatNegotiationFailed(format!("set format: {e}")))?;
    let pixel_format = PixelFormat::from_fourcc(format.fourcc).ok_or_else(|| {
        CameraError::FormatNegotiationFailed(format!(
            "driver chose {:?}; supported formats are YUYV, MJPG, GREY and Y16",
            format.fourcc
        ))
    })?;
    if (format.width, format.height) != (width, height) {
        tracing::warn!(width = format.width, height = format.height, "driver adjusted frame size");
    }
    tracing::info!(
        width = format.width,
        height = format.height,
        format = ?pixel_format,
        "format negotiated"
    );
    Ok((format, pixel_format))
}

/// An active capture stream on a [`Camera`].
pub struct FrameStream<'a> {
    camera: &'a Camera,
    stream: MmapStream<'a>,
}

impl FrameStream<'_> {
    /// Block until the next frame arrives and convert it to RGB.
    pub fn next_frame(&mut self) -> Result<Frame, CameraError> {
        let (buf, meta) = self
            .stream
            .next()
            .map_err(|e| CameraError::CaptureFailed(format!("failed to dequeue buffer: {e}")))?;

        let used = (meta.bytesused as usize).min(buf.len());
        let payload = if used > 0 { &buf[..used] } else { buf };
        let sequence = meta.sequence;

        let rgb = self.camera.buf_to_rgb(payload)?;
        let is_dark = frame::is_dark_frame(&rgb, DARK_THRESHOLD);
        if is_dark {
            tracing::debug!(seq = sequence, "dark frame");
        }

        Ok(Frame {
            data: rgb,
            width: self.camera.width,
            height: self.camera.height,
            timestamp: std::time::Instant::now(),
            sequence,
            is_dark,
        })
    }

    /// Drop `count` frames while auto-exposure settles.
    pub fn discard(&mut self, count: usize) {
        if count > 0 {
            tracing::info!(count, "discarding warmup frames");
        }
        for _ in 0..count {
            if let Err(e) = self.stream.next() {
                tracing::warn!(error = %e, "warmup capture failed");
            }
        }
    }
}
