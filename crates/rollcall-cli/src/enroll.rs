//! Enrollment: capture face samples for one identity into the gallery.

use crate::session::{CropSpec, FaceLocator, FrameSource, SessionError};
use anyhow::{bail, Context, Result};
use ndarray::{concatenate, Array2, Axis};
use ndarray_npy::{read_npy, write_npy};
use std::path::{Path, PathBuf};

/// Consecutive capture failures tolerated while enrolling.
const MAX_CAPTURE_FAILURES: usize = 10;
/// Frames allowed between two accepted samples, in units of `stride`.
const STRIDES_PER_SAMPLE: usize = 30;

/// Collect `count` samples of the largest face in view, keeping every
/// `stride`-th frame that shows a face.
///
/// Gives up with [`SessionError::NoUsableFace`] when `30 × stride` frames in a
/// row produce no sample.
pub fn collect_samples(
    source: &mut impl FrameSource,
    locator: &mut impl FaceLocator,
    crop: CropSpec,
    count: usize,
    stride: usize,
) -> Result<Array2<u8>, SessionError> {
    let stride = stride.max(1);
    let mut samples: Vec<Vec<u8>> = Vec::with_capacity(count);
    let mut seen = 0usize;
    let mut failures = 0usize;
    let mut idle = 0usize;
    let budget = stride * STRIDES_PER_SAMPLE;

    while samples.len() < count {
        if idle >= budget {
            return Err(SessionError::NoUsableFace { frames: idle });
        }
        let frame = match source.next_frame() {
            Ok(frame) => {
                failures = 0;
                idle += 1;
                frame
            }
            Err(e) => {
                failures += 1;
                tracing::warn!(error = %e, failures, "frame capture failed");
                if failures >= MAX_CAPTURE_FAILURES {
                    return Err(e.into());
                }
                continue;
            }
        };
        if frame.is_dark {
            continue;
        }

        let faces = locator.locate(&frame)?;
        let Some(face) = faces
            .into_iter()
            .max_by(|a, b| a.area().total_cmp(&b.area()))
        else {
            continue;
        };

        seen += 1;
        if seen % stride != 0 {
            continue;
        }
        match crop.sample(&frame, &face) {
            Ok(sample) => {
                idle = 0;
                samples.push(sample);
                tracing::info!(
                    collected = samples.len(),
                    target = count,
                    "face sample captured"
                );
            }
            Err(e) => tracing::debug!(error = %e, "face crop rejected"),
        }
    }

    let dim = samples.first().map(Vec::len).unwrap_or(0);
    Ok(Array2::from_shape_fn((samples.len(), dim), |(i, j)| samples[i][j]))
}

/// Gallery file for an identity, rejecting names that are not plain file stems.
pub fn sample_path(gallery_dir: &Path, name: &str) -> Result<PathBuf> {
    let name = name.trim();
    if name.is_empty() || name.contains(['/', '\\']) || name.starts_with('.') {
        bail!("invalid identity name {name:?}");
    }
    Ok(gallery_dir.join(format!("{name}.npy")))
}

/// Append `samples` to the stack at `path`, creating it if needed.
pub fn save_samples(path: &Path, samples: &Array2<u8>) -> Result<usize> {
    let stack = if path.exists() {
        let existing: Array2<u8> = read_npy(path)
            .with_context(|| format!("reading existing samples {}", path.display()))?;
        if existing.ncols() != samples.ncols() {
            bail!(
                "{} holds {}-value samples, new samples have {}",
                path.display(),
                existing.ncols(),
                samples.ncols()
            );
        }
        concatenate(Axis(0), &[existing.view(), samples.view()])?
    } else {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("creating gallery directory {}", parent.display()))?;
        }
        samples.clone()
    };

    write_npy(path, &stack).with_context(|| format!("writing samples {}", path.display()))?;
    tracing::info!(path = %path.display(), total = stack.nrows(), "samples saved");
    Ok(stack.nrows())
}
