//! Frame type and pixel conversion from YUYV, GREY, Y16 and MJPEG to RGB.

use image::ImageFormat;

const RGB: usize = 3;

/// A captured camera frame, packed RGB.
#[derive(Clone)]
pub struct Frame {
    /// Interleaved RGB pixel data (width * height * 3 bytes).
    pub data: Vec<u8>,
    pub width: u32,
    pub height: u32,
    pub timestamp: std::time::Instant,
    pub sequence: u32,
    pub is_dark: bool,
}

impl Frame {
    /// Average luma (0.0–255.0).
    pub fn avg_brightness(&self) -> f32 {
        if self.data.len() < RGB {
            return 0.0;
        }
        let pixels = self.data.len() / RGB;
        self.data
            .chunks_exact(RGB)
            .map(|px| luma(px[0], px[1], px[2]) as f32)
            .sum::<f32>()
            / pixels as f32
    }
}

/// BT.601 luma, integer approximation.
fn luma(r: u8, g: u8, b: u8) -> u8 {
    ((77 * r as u32 + 150 * g as u32 + 29 * b as u32) >> 8) as u8
}

fn clamp_u8(v: i32) -> u8 {
    v.clamp(0, 255) as u8
}

/// Convert packed YUYV (4:2:2) to RGB.
///
/// YUYV packs two pixels per 4 bytes: [Y0, U, Y1, V]; both pixels share U/V.
pub fn yuyv_to_rgb(yuyv: &[u8], width: u32, height: u32) -> Result<Vec<u8>, FrameError> {
    let expected = (width * height * 2) as usize;
    if yuyv.len() < expected {
        return Err(FrameError::InvalidLength {
            expected,
            actual: yuyv.len(),
        });
    }

    let mut rgb = Vec::with_capacity((width * height) as usize * RGB);
    for quad in yuyv[..expected].chunks_exact(4) {
        let u = quad[1] as i32 - 128;
        let v = quad[3] as i32 - 128;
        for y in [quad[0], quad[2]] {
            // Full-range BT.601, 8.8 fixed point.
            let c = y as i32;
            rgb.push(clamp_u8(c + ((359 * v) >> 8)));
            rgb.push(clamp_u8(c - ((88 * u + 183 * v) >> 8)));
            rgb.push(clamp_u8(c + ((454 * u) >> 8)));
        }
    }
    Ok(rgb)
}

/// Replicate 8-bit grayscale into RGB.
pub fn grey_to_rgb(gray: &[u8], width: u32, height: u32) -> Result<Vec<u8>, FrameError> {
    let expected = (width * height) as usize;
    if gray.len() < expected {
        return Err(FrameError::InvalidLength {
            expected,
            actual: gray.len(),
        });
    }
    Ok(gray[..expected].iter().flat_map(|&g| [g, g, g]).collect())
}

/// Downscale 16-bit little-endian grayscale to 8 bits and replicate into RGB.
pub fn y16_to_rgb(buf: &[u8], width: u32, height: u32) -> Result<Vec<u8>, FrameError> {
    let expected = (width * height * 2) as usize;
    if buf.len() < expected {
        return Err(FrameError::InvalidLength {
            expected,
            actual: buf.len(),
        });
    }
    // High byte of each little-endian sample.
    Ok(buf[..expected]
        .chunks_exact(2)
        .flat_map(|s| [s[1], s[1], s[1]])
        .collect())
}

/// Decode one MJPEG frame, checking it matches the negotiated size.
pub fn mjpeg_to_rgb(jpeg: &[u8], width: u32, height: u32) -> Result<Vec<u8>, FrameError> {
    let decoded = image::load_from_memory_with_format(jpeg, ImageFormat::Jpeg)
        .map_err(|e| FrameError::Decode(e.to_string()))?
        .to_rgb8();
    if decoded.width() != width || decoded.height() != height {
        return Err(FrameError::Dimensions {
            expected: (width, height),
            actual: (decoded.width(), decoded.height()),
        });
    }
    Ok(decoded.into_raw())
}

/// Check if an RGB frame is dark: more than `threshold_pct` of pixels have
/// luma below 32.
pub fn is_dark_frame(rgb: &[u8], threshold_pct: f32) -> bool {
    let pixels = rgb.len() / RGB;
    if pixels == 0 {
        return true;
    }
    let dark = rgb
        .chunks_exact(RGB)
        .filter(|px| luma(px[0], px[1], px[2]) < 32)
        .count();
    (dark as f32 / pixels as f32) > threshold_pct
}

#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    #[error("invalid buffer length: expected {expected}, got {actual}")]
    InvalidLength { expected: usize, actual: usize },
    #[error("MJPEG decode failed: {0}")]
    Decode(String),
    #[error("decoded frame is {actual:?}, expected {expected:?}")]
    Dimensions {
        expected: (u32, u32),
        actual: (u32, u32),
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_yuyv_neutral_chroma_is_gray() {
        // 2x1 image: [Y0=100, U=128, Y1=200, V=128]
        let rgb = yuyv_to_rgb(&[100, 128, 200, 128], 2, 1).unwrap();
        assert_eq!(rgb, vec![100, 100, 100, 200, 200, 200]);
    }

    #[test]
    fn test_yuyv_red_chroma() {
        // Strong V pushes red up and green down.
        let rgb = yuyv_to_rgb(&[128, 128, 128, 255], 2, 1).unwrap();
        assert!(rgb[0] > 200, "red = {}", rgb[0]);
        assert!(rgb[1] < 128, "green = {}", rgb[1]);
        assert_eq!(rgb[2], 128);
    }

    #[test]
    fn test_yuyv_invalid_length() {
        assert!(matches!(
            yuyv_to_rgb(&[100, 128], 2, 1),
            Err(FrameError::InvalidLength { expected: 4, actual: 2 })
        ));
    }

    #[test]
    fn test_grey_to_rgb() {
        assert_eq!(grey_to_rgb(&[7, 9], 2, 1).unwrap(), vec![7, 7, 7, 9, 9, 9]);
        assert!(grey_to_rgb(&[7], 2, 1).is_err());
    }

    #[test]
    fn test_y16_takes_high_byte() {
        let buf = [0x34, 0x12, 0xff, 0x80];
        assert_eq!(y16_to_rgb(&buf, 2, 1).unwrap(), vec![0x12, 0x12, 0x12, 0x80, 0x80, 0x80]);
    }

    #[test]
    fn test_mjpeg_roundtrip_dimensions() {
        let img = image::RgbImage::from_pixel(8, 4, image::Rgb([90, 90, 90]));
        let mut jpeg = Vec::new();
        img.write_to(&mut std::io::Cursor::new(&mut jpeg), ImageFormat::Jpeg)
            .unwrap();

        let rgb = mjpeg_to_rgb(&jpeg, 8, 4).unwrap();
        assert_eq!(rgb.len(), 8 * 4 * 3);
        assert!(matches!(mjpeg_to_rgb(&jpeg, 16, 4), Err(FrameError::Dimensions { .. })));
        assert!(matches!(mjpeg_to_rgb(&[0, 1, 2], 8, 4), Err(FrameError::Decode(_))));
    }

    #[test]
    fn test_dark_frame_all_black() {
        assert!(is_dark_frame(&vec![0u8; 300], 0.95));
    }

    #[test]
    fn test_dark_frame_normal() {
        assert!(!is_dark_frame(&vec![128u8; 300], 0.95));
    }

    #[test]
    fn test_dark_frame_empty() {
        assert!(is_dark_frame(&[], 0.95));
    }

    #[test]
    fn test_dark_frame_borderline() {
        // 96% dark → dark; 94% dark → not dark.
        let mut rgb = vec![10u8; 96 * 3];
        rgb.extend(vec![128u8; 4 * 3]);
        assert!(is_dark_frame(&rgb, 0.95));

        let mut rgb = vec![10u8; 94 * 3];
        rgb.extend(vec![128u8; 6 * 3]);
        assert!(!is_dark_frame(&rgb, 0.95));
    }

    #[test]
    fn test_avg_brightness() {
        let frame = Frame {
            data: vec![100, 100, 100, 200, 200, 200],
            width: 2,
            height: 1,
            timestamp: std::time::Instant::now(),
            sequence: 0,
            is_dark: false,
        };
        assert!((frame.avg_brightness() - 149.5).abs() < 1.0);
    }
}
