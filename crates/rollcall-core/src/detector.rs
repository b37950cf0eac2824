//! SCRFD face detector via ONNX Runtime.
//!
//! Runs an insightface SCRFD export on a letterboxed RGB frame, decodes the
//! anchor-free box outputs of the three stride levels and removes overlaps
//! with non-maximum suppression. Landmark outputs, when the model has them,
//! are ignored: attendance only needs the face rectangle.

use crate::types::FaceRect;
use image::imageops::{self, FilterType};
use image::{ImageBuffer, Rgb};
use ort::session::Session;
use ort::value::Tensor;
use std::path::Path;
use thiserror::Error;

const SCRFD_INPUT_SIZE: usize = 640;
const SCRFD_MEAN: f32 = 127.5;
const SCRFD_STD: f32 = 128.0;
const SCRFD_NMS_THRESHOLD: f32 = 0.4;
const SCRFD_STRIDES: [usize; 3] = [8, 16, 32];
const SCRFD_ANCHORS_PER_CELL: usize = 2;

/// Default minimum score for a detection to be kept.
pub const DEFAULT_CONFIDENCE_THRESHOLD: f32 = 0.5;

#[derive(Error, Debug)]
pub enum DetectorError {
    #[error("model file not found: {0}")]
    ModelNotFound(String),
    #[error("inference failed: {0}")]
    InferenceFailed(String),
    #[error("frame buffer holds {actual} bytes, {width}x{height} RGB needs {expected}")]
    FrameSize {
        width: u32,
        height: u32,
        expected: usize,
        actual: usize,
    },
    #[error("ort: {0}")]
    Ort(#[from] ort::Error),
}

/// Scale and padding applied when fitting the frame into the model input.
struct Letterbox {
    scale: f32,
    pad_x: f32,
    pad_y: f32,
}

impl Letterbox {
    fn fit(width: usize, height: usize, input: usize) -> Self {
        let scale = (input as f32 / width as f32).min(input as f32 / height as f32);
        let new_w = (width as f32 * scale).round();
        let new_h = (height as f32 * scale).round();
        Self {
            scale,
            pad_x: ((input as f32 - new_w) / 2.0).floor(),
            pad_y: ((input as f32 - new_h) / 2.0).floor(),
        }
    }

    /// Map a point from model input space back to frame space.
    fn unmap(&self, x: f32, y: f32) -> (f32, f32) {
        ((x - self.pad_x) / self.scale, (y - self.pad_y) / self.scale)
    }
}

/// Output tensor indices for one stride: (score_idx, bbox_idx).
type StrideOutputs = (usize, usize);

/// SCRFD-based face detector.
pub struct ScrfdDetector {
    session: Session,
    threshold: f32,
    /// Per-stride output indices for strides [8, 16, 32].
    strides: [StrideOutputs; 3],
}

impl ScrfdDetector {
    /// Load the SCRFD ONNX model from the given path.
    pub fn load(model_path: &Path, threshold: f32) -> Result<Self, DetectorError> {
        if !model_path.exists() {
            return Err(DetectorError::ModelNotFound(model_path.display().to_string()));
        }

        let session = Session::builder()?
            .with_intra_threads(2)?
            .commit_from_file(model_path)?;

        let output_names: Vec<String> = session
            .outputs()
            .iter()
            .map(|o| o.name().to_string())
            .collect();
        tracing::info!(
            path = %model_path.display(),
            outputs = ?output_names,
            "loaded SCRFD model"
        );

        // 6 outputs: score/bbox per stride. 9 outputs: plus keypoints.
        if output_names.len() < 6 {
            return Err(DetectorError::InferenceFailed(format!(
                "SCRFD model needs at least 6 outputs (3 strides × score/bbox), got {}",
                output_names.len()
            )));
        }

        let strides = map_outputs(&output_names);
        tracing::debug!(?strides, "SCRFD output tensor mapping");

        Ok(Self {
            session,
            threshold,
            strides,
        })
    }

    /// Detect faces in an RGB frame, best first.
    pub fn detect(
        &mut self,
        rgb: &[u8],
        width: u32,
        height: u32,
    ) -> Result<Vec<FaceRect>, DetectorError> {
        let (input, letterbox) = preprocess(rgb, width, height)?;
        let tensor = Tensor::from_array(([1usize, 3, SCRFD_INPUT_SIZE, SCRFD_INPUT_SIZE], input))?;
        let outputs = self.session.run(ort::inputs![tensor])?;

        let mut candidates = Vec::new();
        for (level, &stride) in SCRFD_STRIDES.iter().enumerate() {
            let (score_idx, bbox_idx) = self.strides[level];
            let extract_err = |what: &str, e: ort::Error| {
                DetectorError::InferenceFailed(format!("{what} stride {stride}: {e}"))
            };
            let (_, scores) = outputs[score_idx]
                .try_extract_tensor::<f32>()
                .map_err(|e| extract_err("scores", e))?;
            let (_, boxes) = outputs[bbox_idx]
                .try_extract_tensor::<f32>()
                .map_err(|e| extract_err("boxes", e))?;

            candidates.extend(decode_stride(scores, boxes, stride, &letterbox, self.threshold));
        }

        let faces = nms(candidates, SCRFD_NMS_THRESHOLD);
        tracing::trace!(faces = faces.len(), "SCRFD detections");
        Ok(faces)
    }
}

/// Letterbox an RGB frame into a normalized NCHW buffer.
fn preprocess(rgb: &[u8], width: u32, height: u32) -> Result<(Vec<f32>, Letterbox), DetectorError> {
    let expected = width as usize * height as usize * 3;
    let frame_size = DetectorError::FrameSize {
        width,
        height,
        expected,
        actual: rgb.len(),
    };
    if width == 0 || height == 0 || rgb.len() < expected {
        return Err(frame_size);
    }
    let frame: ImageBuffer<Rgb<u8>, &[u8]> =
        ImageBuffer::from_raw(width, height, &rgb[..expected]).ok_or(frame_size)?;

    let size = SCRFD_INPUT_SIZE;
    let letterbox = Letterbox::fit(width as usize, height as usize, size);
    let new_w = ((width as f32 * letterbox.scale).round() as u32).clamp(1, size as u32);
    let new_h = ((height as f32 * letterbox.scale).round() as u32).clamp(1, size as u32);
    let resized = imageops::resize(&frame, new_w, new_h, FilterType::Triangle);

    // Padding is zero after normalization.
    let plane = size * size;
    let mut input = vec![0.0f32; 3 * plane];
    let (off_x, off_y) = (letterbox.pad_x as usize, letterbox.pad_y as usize);
    for (x, y, px) in resized.enumerate_pixels() {
        let (tx, ty) = (x as usize + off_x, y as usize + off_y);
        if tx >= size || ty >= size {
            continue;
        }
        for c in 0..3 {
            input[c * plane + ty * size + tx] = (px[c] as f32 - SCRFD_MEAN) / SCRFD_STD;
        }
    }

    Ok((input, letterbox))
}

/// Find score/bbox outputs by name ("score_8", "bbox_16", ...), falling back
/// to the positional layout [0-2] = scores, [3-5] = boxes.
fn map_outputs(names: &[String]) -> [StrideOutputs; 3] {
    let find = |prefix: &str, stride: usize| {
        let wanted = format!("{prefix}_{stride}");
        names.iter().position(|n| *n == wanted)
    };

    let named: Option<Vec<StrideOutputs>> = SCRFD_STRIDES
        .iter()
        .map(|&stride| Some((find("score", stride)?, find("bbox", stride)?)))
        .collect();

    match named {
        Some(found) => [found[0], found[1], found[2]],
        None => {
            tracing::info!(?names, "SCRFD output names not recognized, using positional mapping");
            [(0, 3), (1, 4), (2, 5)]
        }
    }
}

/// Decode the detections of one stride level into frame coordinates.
fn decode_stride(
    scores: &[f32],
    boxes: &[f32],
    stride: usize,
    letterbox: &Letterbox,
    threshold: f32,
) -> Vec<FaceRect> {
    let grid_w = SCRFD_INPUT_SIZE / stride;
    let grid_h = SCRFD_INPUT_SIZE / stride;
    let anchors = grid_w * grid_h * SCRFD_ANCHORS_PER_CELL;
    let step = stride as f32;

    let mut faces = Vec::new();
    for idx in 0..anchors {
        let score = scores.get(idx).copied().unwrap_or(0.0);
        if score <= threshold {
            continue;
        }
        let Some(offsets) = boxes.get(idx * 4..idx * 4 + 4) else {
            continue;
        };

        let cell = idx / SCRFD_ANCHORS_PER_CELL;
        let cx = (cell % grid_w) as f32 * step;
        let cy = (cell / grid_w) as f32 * step;

        let (x1, y1) = letterbox.unmap(cx - offsets[0] * step, cy - offsets[1] * step);
        let (x2, y2) = letterbox.unmap(cx + offsets[2] * step, cy + offsets[3] * step);

        faces.push(FaceRect {
            x: x1,
            y: y1,
            width: x2 - x1,
            height: y2 - y1,
            confidence: score,
        });
    }
    faces
}

/// Non-maximum suppression; survivors come back sorted by confidence.
fn nms(mut faces: Vec<FaceRect>, iou_threshold: f32) -> Vec<FaceRect> {
    faces.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));

    let mut keep: Vec<FaceRect> = Vec::new();
    for face in faces {
        if keep.iter().all(|k| iou(k, &face) <= iou_threshold) {
            keep.push(face);
        }
    }
    keep
}

/// Intersection-over-union of two rectangles.
fn iou(a: &FaceRect, b: &FaceRect) -> f32 {
    let inter_w = ((a.x + a.width).min(b.x + b.width) - a.x.max(b.x)).max(0.0);
    let inter_h = ((a.y + a.height).min(b.y + b.height) - a.y.max(b.y)).max(0.0);
    let inter = inter_w * inter_h;
    let union = a.area() + b.area() - inter;
    if union > 0.0 {
        inter / union
    } else {
        0.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rect(x: f32, y: f32, w: f32, h: f32, conf: f32) -> FaceRect {
        FaceRect { x, y, width: w, height: h, confidence: conf }
    }

    #[test]
    fn test_iou_identical() {
        let a = rect(0.0, 0.0, 100.0, 100.0, 1.0);
        assert!((iou(&a, &a) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_iou_partial() {
        let a = rect(0.0, 0.0, 10.0, 10.0, 1.0);
        let b = rect(5.0, 0.0, 10.0, 10.0, 1.0);
        // 50 overlap over a 150 union.
        assert!((iou(&a, &b) - 50.0 / 150.0).abs() < 1e-6);
        assert!(iou(&a, &rect(20.0, 20.0, 5.0, 5.0, 1.0)).abs() < 1e-6);
    }

    #[test]
    fn test_nms_suppresses_overlapping() {
        let faces = vec![
            rect(5.0, 5.0, 100.0, 100.0, 0.8),
            rect(200.0, 200.0, 50.0, 50.0, 0.7),
            rect(0.0, 0.0, 100.0, 100.0, 0.9),
        ];
        let kept = nms(faces, 0.4);
        assert_eq!(kept.len(), 2);
        assert!((kept[0].confidence - 0.9).abs() < 1e-6);
        assert!((kept[1].confidence - 0.7).abs() < 1e-6);
        assert!(nms(vec![], 0.4).is_empty());
    }

    #[test]
    fn test_letterbox_unmap_roundtrip() {
        let lb = Letterbox::fit(320, 240, SCRFD_INPUT_SIZE);
        assert!((lb.scale - 2.0).abs() < 1e-6);
        assert_eq!(lb.pad_x, 0.0);
        assert_eq!(lb.pad_y, 80.0);

        let (x, y) = lb.unmap(100.0 * lb.scale + lb.pad_x, 50.0 * lb.scale + lb.pad_y);
        assert!((x - 100.0).abs() < 0.1 && (y - 50.0).abs() < 0.1);
    }

    #[test]
    fn test_map_outputs_named_any_order() {
        let names: Vec<String> = [
            "bbox_8", "score_8", "kps_8", "bbox_16", "score_16", "kps_16", "bbox_32", "score_32",
            "kps_32",
        ]
        .iter()
        .map(|s| s.to_string())
        .collect();
        assert_eq!(map_outputs(&names), [(1, 0), (4, 3), (7, 6)]);
    }

    #[test]
    fn test_map_outputs_positional_fallback() {
        let names: Vec<String> = (0..9).map(|i: usize| (400 + i).to_string()).collect();
        assert_eq!(map_outputs(&names), [(0, 3), (1, 4), (2, 5)]);
    }

    #[test]
    fn test_decode_stride_maps_to_frame_space() {
        // Frame 640x640 → identity letterbox.
        let lb = Letterbox::fit(640, 640, SCRFD_INPUT_SIZE);
        let grid = SCRFD_INPUT_SIZE / 32;
        let anchors = grid * grid * SCRFD_ANCHORS_PER_CELL;
        let mut scores = vec![0.0f32; anchors];
        let mut boxes = vec![0.0f32; anchors * 4];

        // Anchor for cell (x=2, y=1), first of the pair.
        let idx = (grid + 2) * SCRFD_ANCHORS_PER_CELL;
        scores[idx] = 0.9;
        boxes[idx * 4..idx * 4 + 4].copy_from_slice(&[1.0, 1.0, 1.0, 2.0]);

        let faces = decode_stride(&scores, &boxes, 32, &lb, 0.5);
        assert_eq!(faces.len(), 1);
        let f = faces[0];
        assert_eq!((f.x, f.y, f.width, f.height), (32.0, 0.0, 64.0, 96.0));
        assert!((f.confidence - 0.9).abs() < 1e-6);
    }

    #[test]
    fn test_decode_stride_below_threshold_dropped() {
        let lb = Letterbox::fit(640, 640, SCRFD_INPUT_SIZE);
        let faces = decode_stride(&[0.3, 0.5], &[1.0; 8], 32, &lb, 0.5);
        assert!(faces.is_empty());
    }

    #[test]
    fn test_preprocess_pads_with_zero() {
        let (w, h) = (64u32, 32u32);
        let rgb = vec![255u8; (w * h * 3) as usize];
        let (input, lb) = preprocess(&rgb, w, h).unwrap();
        assert_eq!(input.len(), 3 * SCRFD_INPUT_SIZE * SCRFD_INPUT_SIZE);
        assert_eq!(lb.pad_y, 160.0);
        // Top-left corner is padding, center is image.
        assert_eq!(input[0], 0.0);
        let center = (SCRFD_INPUT_SIZE / 2) * SCRFD_INPUT_SIZE + SCRFD_INPUT_SIZE / 2;
        assert!((input[center] - (255.0 - SCRFD_MEAN) / SCRFD_STD).abs() < 1e-4);
    }

    #[test]
    fn test_preprocess_rejects_short_buffer() {
        assert!(matches!(preprocess(&[0u8; 5], 4, 4), Err(DetectorError::FrameSize { .. })));
    }
}
