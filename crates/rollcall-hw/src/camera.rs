//! V4L2 camera capture via the `v4l` crate.

use crate::frame::{self, PixelFormat, DARK_FRAME_THRESHOLD};
use rollcall_core::{CaptureDevice, CaptureError, CaptureHandle, Frame};
use std::path::Path;
use v4l::buffer::Type as BufType;
use v4l::io::traits::CaptureStream;
use v4l::prelude::*;
use v4l::video::Capture;
use v4l::FourCC;

/// Resolution requested from the driver; it may negotiate another.
const REQUESTED_WIDTH: u32 = 640;
const REQUESTED_HEIGHT: u32 = 480;

const STREAM_BUFFERS: u32 = 4;

/// Info about a discovered V4L2 device.
#[derive(Debug, Clone)]
pub struct DeviceInfo {
    pub path: String,
    pub name: String,
    pub driver: String,
    pub bus: String,
}

/// An opened V4L2 device with a negotiated grayscale-convertible format.
pub struct Camera {
    device: Device,
    pub width: u32,
    pub height: u32,
    pub device_path: String,
    pub fourcc: FourCC,
    pixel_format: PixelFormat,
}

impl Camera {
    /// Open a V4L2 camera device by path (e.g. "/dev/video0").
    pub fn open(device_path: &str) -> Result<Self, CaptureError> {
        if !Path::new(device_path).exists() {
            return Err(CaptureError::DeviceNotFound(device_path.to_string()));
        }

        let device = Device::with_path(device_path).map_err(|e| {
            if e.raw_os_error() == Some(16) || e.to_string().contains("busy") {
                CaptureError::DeviceBusy
            } else {
                CaptureError::DeviceNotFound(format!("{device_path}: {e}"))
            }
        })?;

        let caps = device
            .query_caps()
            .map_err(|e| CaptureError::CaptureFailed(format!("failed to query capabilities: {e}")))?;
        if !caps.capabilities.contains(v4l::capability::Flags::VIDEO_CAPTURE) {
            return Err(CaptureError::StreamingNotSupported);
        }

        let mut fmt = device
            .format()
            .map_err(|e| CaptureError::FormatNegotiationFailed(format!("failed to get format: {e}")))?;
        fmt.fourcc = FourCC::new(b"YUYV");
        fmt.width = REQUESTED_WIDTH;
        fmt.height = REQUESTED_HEIGHT;

        let negotiated = device
            .set_format(&fmt)
            .map_err(|e| CaptureError::FormatNegotiationFailed(format!("failed to set format: {e}")))?;

        let pixel_format = PixelFormat::from_fourcc(negotiated.fourcc).ok_or_else(|| {
            CaptureError::FormatNegotiationFailed(format!(
                "unsupported pixel format: {:?} (need YUYV, GREY, or Y16)",
                negotiated.fourcc
            ))
        })?;

        tracing::info!(
            device = device_path,
            card = %caps.card,
            width = negotiated.width,
            height = negotiated.height,
            format = ?pixel_format,
            "camera opened"
        );

        Ok(Self {
            device,
            width: negotiated.width,
            height: negotiated.height,
            device_path: device_path.to_string(),
            fourcc: negotiated.fourcc,
            pixel_format,
        })
    }

    pub fn pixel_format(&self) -> PixelFormat {
        self.pixel_format
    }

    fn start_stream(&self) -> Result<MmapStream<'static>, CaptureError> {
        MmapStream::with_buffers(&self.device, BufType::VideoCapture, STREAM_BUFFERS)
            .map_err(|e| CaptureError::CaptureFailed(format!("failed to create mmap stream: {e}")))
    }

    fn next_frame(&self, stream: &mut MmapStream<'static>) -> Result<Frame, CaptureError> {
        let (buf, meta) = stream
            .next()
            .map_err(|e| CaptureError::CaptureFailed(format!("failed to dequeue buffer: {e}")))?;
        let sequence = meta.sequence;

        let data = frame::to_grayscale(buf, self.pixel_format, self.width, self.height)
            .map_err(|e| CaptureError::CaptureFailed(e.to_string()))?;

        Ok(Frame {
            data,
            width: self.width,
            height: self.height,
            sequence,
        })
    }

    /// Start a stream, grab one frame and stop.
    pub fn capture_frame(&self) -> Result<Frame, CaptureError> {
        let mut stream = self.start_stream()?;
        self.next_frame(&mut stream)
    }

    /// List available V4L2 video capture devices.
    pub fn list_devices() -> Vec<DeviceInfo> {
        (0..16)
            .map(|i| format!("/dev/video{i}"))
            .filter(|path| Path::new(path).exists())
            .filter_map(|path| {
                let dev = Device::with_path(&path).ok()?;
                let caps = dev.query_caps().ok()?;
                caps.capabilities
                    .contains(v4l::capability::Flags::VIDEO_CAPTURE)
                    .then(|| DeviceInfo {
                        path,
                        name: caps.card.clone(),
                        driver: caps.driver.clone(),
                        bus: caps.bus.clone(),
                    })
            })
            .collect()
    }
}

/// A V4L2 device path usable as the decision loop's camera.
///
/// Each [`CaptureDevice::open`] opens the device afresh; the device is
/// closed again when the returned handle is released.
#[derive(Debug, Clone)]
pub struct V4lCamera {
    device_path: String,
}

impl V4lCamera {
    pub fn new(device_path: impl Into<String>) -> Self {
        Self {
            device_path: device_path.into(),
        }
    }

    pub fn device_path(&self) -> &str {
        &self.device_path
    }
}

impl CaptureDevice for V4lCamera {
    fn open(&self) -> Result<Box<dyn CaptureHandle>, CaptureError> {
        let camera = Camera::open(&self.device_path)?;
        let stream = camera.start_stream()?;
        Ok(Box::new(V4lHandle {
            camera: Some(camera),
            stream: Some(stream),
        }))
    }
}

struct V4lHandle {
    // Field order matters: the stream must be torn down before the device.
    stream: Option<MmapStream<'static>>,
    camera: Option<Camera>,
}

impl CaptureHandle for V4lHandle {
    fn read(&mut self) -> Option<Frame> {
        let (Some(camera), Some(stream)) = (self.camera.as_ref(), self.stream.as_mut()) else {
            return None;
        };

        match camera.next_frame(stream) {
            Ok(frame) => {
                if frame::is_dark_frame(&frame.data, DARK_FRAME_THRESHOLD) {
                    tracing::debug!(seq = frame.sequence, "dark frame");
                }
                Some(frame)
            }
            Err(e) => {
                tracing::warn!(device = %camera.device_path, error = %e, "frame read failed");
                None
            }
        }
    }

    fn release(&mut self) {
        self.stream = None;
        if let Some(camera) = self.camera.take() {
            tracing::debug!(device = %camera.device_path, "camera closed");
        }
    }
}
