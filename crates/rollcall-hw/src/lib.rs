//! rollcall-hw: V4L2 camera capture.
//!
//! [`V4lCamera`] plugs a V4L2 device into the decision loop through the
//! core's capture traits. [`Camera`] is the underlying device handle, also
//! used directly for diagnostics.

pub mod camera;
pub mod frame;

pub use camera::{Camera, DeviceInfo, V4lCamera};
pub use frame::{is_dark_frame, PixelFormat, DARK_FRAME_THRESHOLD};
