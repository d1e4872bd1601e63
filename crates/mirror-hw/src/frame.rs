//! Frame type and pixel processing: grayscale conversion, dark detection, downsampling.

use image::imageops::{self, FilterType};
use image::GrayImage;
use mirror_core::CapturedFrame;
use std::path::Path;
use std::time::Instant;

/// Fraction of near-black pixels above which a frame is considered dark.
pub const DARK_FRAME_THRESHOLD: f32 = 0.95;

/// A captured grayscale camera frame.
#[derive(Debug, Clone)]
pub struct Frame {
    /// Grayscale pixel data (width * height bytes).
    pub data: Vec<u8>,
    pub width: u32,
    pub height: u32,
    pub timestamp: Instant,
    pub sequence: u32,
    pub is_dark: bool,
}

impl Frame {
    /// Wrap grayscale pixels, flagging the frame if it is too dark to use.
    pub fn new(data: Vec<u8>, width: u32, height: u32, timestamp: Instant, sequence: u32) -> Self {
        let is_dark = is_dark_frame(&data, DARK_FRAME_THRESHOLD);
        Self {
            data,
            width,
            height,
            timestamp,
            sequence,
            is_dark,
        }
    }

    /// Average pixel brightness (0.0–255.0).
    pub fn avg_brightness(&self) -> f32 {
        if self.data.is_empty() {
            return 0.0;
        }
        self.data.iter().map(|&b| b as f32).sum::<f32>() / self.data.len() as f32
    }

    /// Write the frame as an 8-bit grayscale image; format follows the extension.
    pub fn write_image(&self, path: &Path) -> Result<(), FrameError> {
        image::save_buffer(path, &self.data, self.width, self.height, image::ColorType::L8)
            .map_err(FrameError::Encode)
    }
}

impl CapturedFrame for Frame {
    fn captured_at(&self) -> Instant {
        self.timestamp
    }

    fn downsample(&self, factor: f32) -> Self {
        let (data, width, height) = downsample(&self.data, self.width, self.height, factor);
        Self {
            data,
            width,
            height,
            timestamp: self.timestamp,
            sequence: self.sequence,
            is_dark: self.is_dark,
        }
    }
}

/// Scale a grayscale image by `factor` with bilinear filtering.
///
/// Each output dimension is `round(dim * factor)`, at least 1. Input whose
/// length does not match `width * height` is returned unchanged.
pub fn downsample(gray: &[u8], width: u32, height: u32, factor: f32) -> (Vec<u8>, u32, u32) {
    let new_w = ((width as f32 * factor).round() as u32).max(1);
    let new_h = ((height as f32 * factor).round() as u32).max(1);

    let Some(img) = GrayImage::from_raw(width, height, gray.to_vec()) else {
        tracing::warn!(width, height, len = gray.len(), "frame size mismatch; not downsampling");
        return (gray.to_vec(), width, height);
    };
    if new_w == width && new_h == height {
        return (img.into_raw(), width, height);
    }

    let resized = imageops::resize(&img, new_w, new_h, FilterType::Triangle);
    (resized.into_raw(), new_w, new_h)
}

/// Convert packed YUYV (4:2:2) to grayscale by extracting the Y channel.
///
/// YUYV packs two pixels per 4 bytes: [Y0, U, Y1, V].
pub fn yuyv_to_grayscale(yuyv: &[u8], width: u32, height: u32) -> Result<Vec<u8>, FrameError> {
    let expected = (width * height * 2) as usize;
    if yuyv.len() < expected {
        return Err(FrameError::InvalidLength {
            expected,
            actual: yuyv.len(),
        });
    }
    Ok(yuyv[..expected].iter().step_by(2).copied().collect())
}

/// Convert 16-bit little-endian grayscale to 8-bit by keeping the high byte.
pub fn y16_to_grayscale(y16: &[u8], width: u32, height: u32) -> Result<Vec<u8>, FrameError> {
    let expected = (width * height * 2) as usize;
    if y16.len() < expected {
        return Err(FrameError::InvalidLength {
            expected,
            actual: y16.len(),
        });
    }
    Ok(y16[..expected].chunks_exact(2).map(|px| px[1]).collect())
}

/// True if more than `threshold_pct` of the pixels are near black (0–31).
pub fn is_dark_frame(gray: &[u8], threshold_pct: f32) -> bool {
    if gray.is_empty() {
        return true;
    }
    let dark_count = gray.iter().filter(|&&p| p < 32).count();
    (dark_count as f32 / gray.len() as f32) > threshold_pct
}

#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    #[error("invalid frame length: expected {expected}, got {actual}")]
    InvalidLength { expected: usize, actual: usize },
    #[error("failed to encode frame: {0}")]
    Encode(#[source] image::ImageError),
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_yuyv_to_grayscale() {
        // 2x1 image: [Y0=100, U=128, Y1=200, V=128]
        let yuyv = vec![100, 128, 200, 128];
        let gray = yuyv_to_grayscale(&yuyv, 2, 1).unwrap();
        assert_eq!(gray, vec![100, 200]);
    }

    #[test]
    fn test_yuyv_invalid_length() {
        let yuyv = vec![100, 128]; // too short for 2x1
        assert!(yuyv_to_grayscale(&yuyv, 2, 1).is_err());
    }

    #[test]
    fn test_y16_keeps_high_byte() {
        // Two pixels: 0x12AB and 0xFF00, little-endian.
        let y16 = vec![0xAB, 0x12, 0x00, 0xFF];
        assert_eq!(y16_to_grayscale(&y16, 2, 1).unwrap(), vec![0x12, 0xFF]);
    }

    #[test]
    fn test_dark_frame() {
        assert!(is_dark_frame(&[0u8; 1000], 0.95));
        assert!(!is_dark_frame(&[128u8; 1000], 0.95));
        assert!(is_dark_frame(&[], 0.95));
    }

    #[test]
    fn test_dark_frame_borderline() {
        // 96% dark → dark; 94% dark → not dark.
        let mut gray = vec![10u8; 960];
        gray.extend(vec![128u8; 40]);
        assert!(is_dark_frame(&gray, 0.95));

        let mut gray = vec![10u8; 940];
        gray.extend(vec![128u8; 60]);
        assert!(!is_dark_frame(&gray, 0.95));
    }

    #[test]
    fn test_frame_new_flags_dark() {
        let frame = Frame::new(vec![0u8; 16], 4, 4, Instant::now(), 0);
        assert!(frame.is_dark);
        let frame = Frame::new(vec![200u8; 16], 4, 4, Instant::now(), 1);
        assert!(!frame.is_dark);
        assert_eq!(frame.avg_brightness(), 200.0);
    }

    #[test]
    fn test_downsample_quarter() {
        let frame = Frame::new(vec![128u8; 640 * 480], 640, 480, Instant::now(), 7);
        let small = frame.downsample(0.25);
        assert_eq!((small.width, small.height), (160, 120));
        assert_eq!(small.data.len(), 160 * 120);
        // Uniform input stays uniform, up to filter rounding.
        assert!(small.data.iter().all(|&p| (127..=129).contains(&p)));
        assert_eq!(small.timestamp, frame.timestamp);
        assert_eq!(small.sequence, 7);
    }

    #[test]
    fn test_downsample_never_collapses_to_zero() {
        let (data, w, h) = downsample(&[50u8; 4], 2, 2, 0.1);
        assert_eq!((w, h), (1, 1));
        assert_eq!(data.len(), 1);
    }

    #[test]
    fn test_downsample_size_mismatch_passthrough() {
        let (data, w, h) = downsample(&[1u8; 3], 2, 2, 0.5);
        assert_eq!((w, h), (2, 2));
        assert_eq!(data, vec![1, 1, 1]);
    }

    #[test]
    fn test_write_image_png() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("frame.png");
        let frame = Frame::new(vec![90u8; 8 * 6], 8, 6, Instant::now(), 0);
        frame.write_image(&path).unwrap();
        assert!(path.metadata().unwrap().len() > 0);
    }
}
