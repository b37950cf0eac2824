//! Face crop → fixed-size sample vector.
//!
//! Samples are square colour crops flattened row-major with interleaved
//! channels, so a 100×100 face becomes 30000 `u8` values. Galleries captured
//! with OpenCV store pixels as BGR, which is the default order here.

use crate::types::FaceRect;
use image::imageops::{self, FilterType};
use image::RgbImage;
use serde::Deserialize;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

const CHANNELS: usize = 3;

/// Byte order of the three colour channels inside a sample.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChannelOrder {
    #[default]
    Bgr,
    Rgb,
}

impl FromStr for ChannelOrder {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "bgr" => Ok(Self::Bgr),
            "rgb" => Ok(Self::Rgb),
            other => Err(format!("unknown channel order {other:?} (expected bgr or rgb)")),
        }
    }
}

impl fmt::Display for ChannelOrder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Bgr => "bgr",
            Self::Rgb => "rgb",
        })
    }
}

#[derive(Error, Debug, PartialEq, Eq)]
pub enum PreprocessError {
    #[error("frame buffer holds {actual} bytes, {width}x{height} RGB needs {expected}")]
    FrameSize {
        width: u32,
        height: u32,
        expected: usize,
        actual: usize,
    },
    #[error("face rectangle lies outside the frame")]
    EmptyCrop,
}

/// Number of values in a sample produced with side length `size`.
pub fn sample_dimension(size: u32) -> usize {
    size as usize * size as usize * CHANNELS
}

/// Crop `face` (grown by `margin` pixels) out of an RGB frame, resize it to
/// `size` × `size` and lay the channels out in `order`.
pub fn face_sample(
    rgb: &[u8],
    width: u32,
    height: u32,
    face: &FaceRect,
    margin: u32,
    size: u32,
    order: ChannelOrder,
) -> Result<Vec<u8>, PreprocessError> {
    let expected = width as usize * height as usize * CHANNELS;
    if rgb.len() < expected {
        return Err(PreprocessError::FrameSize {
            width,
            height,
            expected,
            actual: rgb.len(),
        });
    }
    let window = face
        .crop_window(margin, width, height)
        .ok_or(PreprocessError::EmptyCrop)?;

    // Copy only the face rows into an owned buffer.
    let stride = width as usize * CHANNELS;
    let (x0, w) = (window.x as usize * CHANNELS, window.width as usize * CHANNELS);
    let mut pixels = Vec::with_capacity(w * window.height as usize);
    for y in window.y..window.y + window.height {
        let start = y as usize * stride + x0;
        pixels.extend_from_slice(&rgb[start..start + w]);
    }
    let crop = RgbImage::from_raw(window.width, window.height, pixels)
        .ok_or(PreprocessError::EmptyCrop)?;

    let mut sample = imageops::resize(&crop, size, size, FilterType::Triangle).into_raw();
    if order == ChannelOrder::Bgr {
        for px in sample.chunks_exact_mut(CHANNELS) {
            px.swap(0, 2);
        }
    }
    Ok(sample)
}

/// Widen a stored `u8` sample to the classifier's `f32` query form.
pub fn to_query(sample: &[u8]) -> Vec<f32> {
    sample.iter().map(|&v| f32::from(v)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn solid_frame(width: u32, height: u32, color: [u8; 3]) -> Vec<u8> {
        color
            .iter()
            .copied()
            .cycle()
            .take(width as usize * height as usize * CHANNELS)
            .collect()
    }

    fn rect(x: f32, y: f32, w: f32, h: f32) -> FaceRect {
        FaceRect { x, y, width: w, height: h, confidence: 1.0 }
    }

    #[test]
    fn test_sample_has_fixed_dimension() {
        let frame = solid_frame(64, 48, [10, 20, 30]);
        let face = rect(10.0, 10.0, 20.0, 25.0);
        let sample = face_sample(&frame, 64, 48, &face, 5, 100, ChannelOrder::Bgr).unwrap();
        assert_eq!(sample.len(), sample_dimension(100));
        assert_eq!(sample_dimension(100), 30000);
    }

    #[test]
    fn test_sample_channel_order() {
        let frame = solid_frame(32, 32, [200, 100, 50]);
        let face = rect(4.0, 4.0, 8.0, 8.0);

        let rgb = face_sample(&frame, 32, 32, &face, 2, 4, ChannelOrder::Rgb).unwrap();
        assert!(rgb.chunks(3).all(|px| px == [200, 100, 50]));

        let bgr = face_sample(&frame, 32, 32, &face, 2, 4, ChannelOrder::Bgr).unwrap();
        assert!(bgr.chunks(3).all(|px| px == [50, 100, 200]));
    }

    #[test]
    fn test_crop_at_frame_corner() {
        // Bottom-right quadrant is red; a face there clamps at the frame edge.
        let (w, h) = (20u32, 10u32);
        let mut frame = vec![0u8; (w * h) as usize * CHANNELS];
        for y in 5..10usize {
            for x in 10..20usize {
                let i = (y * w as usize + x) * CHANNELS;
                frame[i] = 255;
            }
        }
        let face = rect(12.0, 6.0, 20.0, 20.0);
        let sample = face_sample(&frame, w, h, &face, 0, 3, ChannelOrder::Rgb).unwrap();
        assert!(sample.chunks(3).all(|px| px == [255, 0, 0]));
    }

    #[test]
    fn test_channel_order_parse() {
        assert_eq!("BGR".parse::<ChannelOrder>(), Ok(ChannelOrder::Bgr));
        assert_eq!("rgb".parse::<ChannelOrder>(), Ok(ChannelOrder::Rgb));
        assert!("yuv".parse::<ChannelOrder>().is_err());
        assert_eq!(ChannelOrder::default(), ChannelOrder::Bgr);
    }

    #[test]
    fn test_crop_selects_face_region() {
        // Left half black, right half white; a face in the right half must be white.
        let (w, h) = (40u32, 20u32);
        let mut frame = vec![0u8; (w * h) as usize * CHANNELS];
        for y in 0..h as usize {
            for x in (w as usize / 2)..w as usize {
                let i = (y * w as usize + x) * CHANNELS;
                frame[i..i + CHANNELS].copy_from_slice(&[255, 255, 255]);
            }
        }
        let face = rect(25.0, 5.0, 10.0, 10.0);
        let sample = face_sample(&frame, w, h, &face, 2, 8, ChannelOrder::Rgb).unwrap();
        assert!(sample.iter().all(|&v| v == 255));
    }

    #[test]
    fn test_short_frame_rejected() {
        let face = rect(0.0, 0.0, 2.0, 2.0);
        let err = face_sample(&[0u8; 10], 4, 4, &face, 0, 2, ChannelOrder::Bgr).unwrap_err();
        assert_eq!(
            err,
            PreprocessError::FrameSize { width: 4, height: 4, expected: 48, actual: 10 }
        );
    }

    #[test]
    fn test_face_outside_frame_rejected() {
        let frame = solid_frame(16, 16, [1, 2, 3]);
        let face = rect(40.0, 40.0, 5.0, 5.0);
        let err = face_sample(&frame, 16, 16, &face, 5, 8, ChannelOrder::Bgr).unwrap_err();
        assert_eq!(err, PreprocessError::EmptyCrop);
    }

    #[test]
    fn test_to_query_widens() {
        assert_eq!(to_query(&[0, 7, 255]), vec![0.0, 7.0, 255.0]);
    }
}
