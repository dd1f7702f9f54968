//! Raw buffer to grayscale conversion and dark-frame detection.

use thiserror::Error;
use v4l::FourCC;

/// Fraction of near-black pixels above which a frame counts as dark.
pub const DARK_FRAME_THRESHOLD: f32 = 0.95;

/// Pixels below this value count as near-black.
const DARK_PIXEL_MAX: u8 = 32;

#[derive(Debug, Error)]
pub enum FrameError {
    #[error("{format:?} buffer too short: expected {expected}, got {actual}")]
    InvalidLength {
        format: PixelFormat,
        expected: usize,
        actual: usize,
    },
}

/// Pixel formats the capture path can convert.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PixelFormat {
    /// YUYV 4:2:2 packed, two bytes per pixel; luma is every even byte.
    Yuyv,
    /// 8-bit grayscale.
    Grey,
    /// 16-bit little-endian grayscale.
    Y16,
}

impl PixelFormat {
    pub fn from_fourcc(fourcc: FourCC) -> Option<Self> {
        match &fourcc.repr {
            b"YUYV" => Some(Self::Yuyv),
            b"GREY" => Some(Self::Grey),
            b"Y16 " | b"Y16\0" => Some(Self::Y16),
            _ => None,
        }
    }

    pub fn bytes_per_pixel(self) -> usize {
        match self {
            Self::Grey => 1,
            Self::Yuyv | Self::Y16 => 2,
        }
    }
}

/// Convert one raw buffer to `width * height` grayscale bytes.
pub fn to_grayscale(
    buf: &[u8],
    format: PixelFormat,
    width: u32,
    height: u32,
) -> Result<Vec<u8>, FrameError> {
    let pixels = width as usize * height as usize;
    let expected = pixels * format.bytes_per_pixel();
    if buf.len() < expected {
        return Err(FrameError::InvalidLength {
            format,
            expected,
            actual: buf.len(),
        });
    }

    let gray = match format {
        PixelFormat::Grey => buf[..pixels].to_vec(),
        PixelFormat::Yuyv => buf[..expected].iter().step_by(2).copied().collect(),
        // Keep the high byte of each little-endian sample.
        PixelFormat::Y16 => buf[..expected].chunks_exact(2).map(|px| px[1]).collect(),
    };
    Ok(gray)
}

/// True when more than `threshold` of the pixels are near-black.
/// An empty buffer is dark.
pub fn is_dark_frame(gray: &[u8], threshold: f32) -> bool {
    if gray.is_empty() {
        return true;
    }
    let dark = gray.iter().filter(|&&p| p < DARK_PIXEL_MAX).count();
    (dark as f32 / gray.len() as f32) > threshold
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_yuyv_extracts_luma() {
        // 2x1: [Y0, U, Y1, V]
        let gray = to_grayscale(&[100, 128, 200, 128], PixelFormat::Yuyv, 2, 1).unwrap();
        assert_eq!(gray, vec![100, 200]);

        let raw: Vec<u8> = (0..16).collect();
        let gray = to_grayscale(&raw, PixelFormat::Yuyv, 4, 2).unwrap();
        assert_eq!(gray, vec![0, 2, 4, 6, 8, 10, 12, 14]);
    }

    #[test]
    fn test_grey_truncates_padding() {
        let gray = to_grayscale(&[1, 2, 3, 4, 99, 99], PixelFormat::Grey, 2, 2).unwrap();
        assert_eq!(gray, vec![1, 2, 3, 4]);
    }

    #[test]
    fn test_y16_keeps_high_byte() {
        // 0x1234 and 0xff00, little-endian.
        let gray = to_grayscale(&[0x34, 0x12, 0x00, 0xff], PixelFormat::Y16, 2, 1).unwrap();
        assert_eq!(gray, vec![0x12, 0xff]);
    }

    #[test]
    fn test_short_buffer_rejected() {
        let err = to_grayscale(&[100, 128], PixelFormat::Yuyv, 2, 1).unwrap_err();
        assert!(matches!(err, FrameError::InvalidLength { expected: 4, actual: 2, .. }));
        assert!(to_grayscale(&[0; 3], PixelFormat::Grey, 2, 2).is_err());
    }

    #[test]
    fn test_fourcc_mapping() {
        assert_eq!(PixelFormat::from_fourcc(FourCC::new(b"YUYV")), Some(PixelFormat::Yuyv));
        assert_eq!(PixelFormat::from_fourcc(FourCC::new(b"GREY")), Some(PixelFormat::Grey));
        assert_eq!(PixelFormat::from_fourcc(FourCC::new(b"Y16 ")), Some(PixelFormat::Y16));
        assert_eq!(PixelFormat::from_fourcc(FourCC::new(b"MJPG")), None);
    }

    #[test]
    fn test_dark_frame() {
        assert!(is_dark_frame(&[0u8; 1000], DARK_FRAME_THRESHOLD));
        assert!(!is_dark_frame(&[128u8; 1000], DARK_FRAME_THRESHOLD));
        assert!(is_dark_frame(&[], DARK_FRAME_THRESHOLD));
    }

    #[test]
    fn test_dark_frame_borderline() {
        // 96% dark
        let mut gray = vec![10u8; 960];
        gray.extend(vec![128u8; 40]);
        assert!(is_dark_frame(&gray, DARK_FRAME_THRESHOLD));

        // 94% dark
        let mut gray = vec![10u8; 940];
        gray.extend(vec![128u8; 60]);
        assert!(!is_dark_frame(&gray, DARK_FRAME_THRESHOLD));
    }
}
