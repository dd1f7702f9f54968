//! Capture device capability and scoped acquisition.
//!
//! The decision loop only ever touches a camera through [`CaptureSession`],
//! which releases the underlying handle exactly once, on drop or on an
//! explicit [`CaptureSession::release`].

use crate::types::Frame;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum CaptureError {
    #[error("device not found: {0}")]
    DeviceNotFound(String),
    #[error("capture failed: {0}")]
    CaptureFailed(String),
    #[error("device busy")]
    DeviceBusy,
    #[error("format negotiation failed: {0}")]
    FormatNegotiationFailed(String),
    #[error("streaming not supported")]
    StreamingNotSupported,
}

/// An opened capture resource.
pub trait CaptureHandle: Send {
    /// Read one frame. `None` means the stream is exhausted or the read failed.
    fn read(&mut self) -> Option<Frame>;

    /// Release the underlying device. Called at most once.
    fn release(&mut self);
}

/// A source of capture handles (e.g. a V4L2 device path).
pub trait CaptureDevice: Send + Sync {
    fn open(&self) -> Result<Box<dyn CaptureHandle>, CaptureError>;
}

/// Scoped ownership of an open [`CaptureHandle`].
pub struct CaptureSession {
    handle: Option<Box<dyn CaptureHandle>>,
}

impl CaptureSession {
    /// Open `device` and wrap the handle so it is released on every exit path.
    pub fn acquire(device: &dyn CaptureDevice) -> Result<Self, CaptureError> {
        let handle = device.open()?;
        Ok(Self {
            handle: Some(handle),
        })
    }

    /// Read one frame; always `None` after release.
    pub fn read(&mut self) -> Option<Frame> {
        self.handle.as_mut().and_then(|h| h.read())
    }

    /// Release the device now instead of waiting for drop.
    pub fn release(&mut self) {
        if let Some(mut handle) = self.handle.take() {
            handle.release();
            tracing::debug!("capture device released");
        }
    }

    pub fn is_open(&self) -> bool {
        self.handle.is_some()
    }
}

impl Drop for CaptureSession {
    fn drop(&mut self) {
        self.release();
    }
}
