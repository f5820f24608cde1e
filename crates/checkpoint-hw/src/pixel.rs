//! Raw capture buffer → 8-bit luma conversion.

use thiserror::Error;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum FrameError {
    #[error("buffer too short: expected {expected} bytes, got {actual}")]
    InvalidLength { expected: usize, actual: usize },
}

/// Negotiated pixel format for the camera.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PixelFormat {
    /// YUYV 4:2:2 packed (2 bytes/pixel, extract Y channel).
    Yuyv,
    /// 8-bit grayscale.
    Grey,
    /// 16-bit little-endian grayscale.
    Y16,
}

impl PixelFormat {
    pub fn bytes_per_pixel(self) -> usize {
        match self {
            PixelFormat::Grey => 1,
            PixelFormat::Yuyv | PixelFormat::Y16 => 2,
        }
    }

    /// Convert one captured buffer to `width * height` luma bytes.
    pub fn to_luma(self, buf: &[u8], width: u32, height: u32) -> Result<Vec<u8>, FrameError> {
        let pixels = (width as usize) * (height as usize);
        let expected = pixels * self.bytes_per_pixel();
        if buf.len() < expected {
            return Err(FrameError::InvalidLength {
                expected,
                actual: buf.len(),
            });
        }

        let luma = match self {
            PixelFormat::Grey => buf[..pixels].to_vec(),
            // [Y0, U, Y1, V]: luma is every even byte.
            PixelFormat::Yuyv => buf[..expected].iter().step_by(2).copied().collect(),
            // Little-endian u16; keep the high byte.
            PixelFormat::Y16 => buf[..expected].chunks_exact(2).map(|px| px[1]).collect(),
        };
        Ok(luma)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_yuyv_extracts_y_channel() {
        // 4x2 frame = 8 pixels = 16 bytes
        let yuyv: Vec<u8> = (0..16).collect();
        let luma = PixelFormat::Yuyv.to_luma(&yuyv, 4, 2).unwrap();
        assert_eq!(luma, vec![0, 2, 4, 6, 8, 10, 12, 14]);
    }

    #[test]
    fn test_grey_truncates_padding() {
        let buf = vec![7u8; 10];
        assert_eq!(PixelFormat::Grey.to_luma(&buf, 3, 2).unwrap(), vec![7u8; 6]);
    }

    #[test]
    fn test_y16_keeps_high_byte() {
        let buf = [0x34, 0x12, 0xff, 0x80];
        assert_eq!(PixelFormat::Y16.to_luma(&buf, 2, 1).unwrap(), vec![0x12, 0x80]);
    }

    #[test]
    fn test_short_buffer_rejected() {
        let err = PixelFormat::Yuyv.to_luma(&[0u8; 10], 4, 2).unwrap_err();
        assert_eq!(err, FrameError::InvalidLength { expected: 16, actual: 10 });
    }
}
