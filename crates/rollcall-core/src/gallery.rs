//! Labeled face gallery built from per-identity `.npy` sample stacks.
//!
//! Each `<name>.npy` file in the gallery directory holds a rank-2 array
//! (`samples × dimensions`) for one identity. Files are visited in file-name
//! order so class ids are stable across runs.

use crate::classifier::TrainingSet;
use crate::types::ClassId;
use ndarray::{s, Array2};
use ndarray_npy::{read_npy, ReadNpyError};
use std::path::{Path, PathBuf};
use thiserror::Error;
use walkdir::WalkDir;

const SAMPLE_EXTENSION: &str = "npy";

#[derive(Error, Debug)]
pub enum GalleryError {
    #[error("gallery directory not readable: {0}")]
    Unreadable(#[from] walkdir::Error),
    #[error("no .npy sample files found in {0}")]
    Empty(PathBuf),
    #[error("failed to load samples from {path}: {source}")]
    Load {
        path: PathBuf,
        #[source]
        source: ReadNpyError,
    },
    #[error("identity {name} has no samples")]
    NoSamples { name: String },
    #[error("identity {name} has {found}-dimensional samples, expected {expected}")]
    DimensionMismatch {
        name: String,
        expected: usize,
        found: usize,
    },
    #[error("class id {0} has no identity in the gallery")]
    UnknownClass(ClassId),
}

/// Identity names indexed by class id, plus the training set they label.
#[derive(Debug, Clone)]
pub struct Gallery {
    names: Vec<String>,
    training: TrainingSet,
}

impl Gallery {
    /// Load every `*.npy` file in `dir` as one identity.
    pub fn load(dir: &Path) -> Result<Self, GalleryError> {
        let mut identities = Vec::new();

        for entry in WalkDir::new(dir)
            .min_depth(1)
            .max_depth(1)
            .sort_by_file_name()
        {
            let entry = entry?;
            let path = entry.path();
            if !entry.file_type().is_file()
                || path.extension().and_then(|e| e.to_str()) != Some(SAMPLE_EXTENSION)
            {
                continue;
            }
            let Some(name) = path.file_stem().map(|s| s.to_string_lossy().into_owned()) else {
                continue;
            };

            let samples = read_samples(path).map_err(|source| GalleryError::Load {
                path: path.to_path_buf(),
                source,
            })?;
            tracing::debug!(
                identity = %name,
                samples = samples.nrows(),
                dimension = samples.ncols(),
                "loaded gallery file"
            );
            identities.push((name, samples));
        }

        if identities.is_empty() {
            return Err(GalleryError::Empty(dir.to_path_buf()));
        }

        let gallery = Self::from_identities(identities)?;
        tracing::info!(
            dir = %dir.display(),
            identities = gallery.names.len(),
            samples = gallery.training.len(),
            dimension = gallery.dimension(),
            "gallery loaded"
        );
        Ok(gallery)
    }

    /// Assemble a gallery from `(name, samples)` pairs; class ids follow the
    /// order of `identities`.
    pub fn from_identities(identities: Vec<(String, Array2<f32>)>) -> Result<Self, GalleryError> {
        let Some(expected) = identities.first().map(|(_, s)| s.ncols()) else {
            return Err(GalleryError::Empty(PathBuf::new()));
        };

        let mut names = Vec::with_capacity(identities.len());
        let mut labels = Vec::new();

        for (class_id, (name, samples)) in identities.iter().enumerate() {
            if samples.nrows() == 0 {
                return Err(GalleryError::NoSamples { name: name.clone() });
            }
            if samples.ncols() != expected {
                return Err(GalleryError::DimensionMismatch {
                    name: name.clone(),
                    expected,
                    found: samples.ncols(),
                });
            }
            names.push(name.clone());
            labels.extend(std::iter::repeat(class_id).take(samples.nrows()));
        }

        let mut samples = Array2::<f32>::zeros((labels.len(), expected));
        let mut offset = 0;
        for (_, stack) in &identities {
            let rows = stack.nrows();
            samples.slice_mut(s![offset..offset + rows, ..]).assign(stack);
            offset += rows;
        }

        Ok(Self {
            names,
            training: TrainingSet::from_parts(samples, labels),
        })
    }

    /// Identity name for a class id.
    pub fn name(&self, class_id: ClassId) -> Result<&str, GalleryError> {
        self.names
            .get(class_id)
            .map(String::as_str)
            .ok_or(GalleryError::UnknownClass(class_id))
    }

    /// Identity names in class-id order.
    pub fn identities(&self) -> &[String] {
        &self.names
    }

    pub fn training_set(&self) -> &TrainingSet {
        &self.training
    }

    /// Length of every sample vector.
    pub fn dimension(&self) -> usize {
        self.training.dimension()
    }

    /// Total number of samples across all identities.
    pub fn len(&self) -> usize {
        self.training.len()
    }

    pub fn is_empty(&self) -> bool {
        self.training.is_empty()
    }
}

/// Read a sample stack stored as `u8`, `f32` or `f64`, widened to `f32`.
pub fn read_samples(path: &Path) -> Result<Array2<f32>, ReadNpyError> {
    match read_npy::<_, Array2<u8>>(path) {
        Ok(a) => return Ok(a.mapv(f32::from)),
        Err(ReadNpyError::WrongDescriptor(_)) => {}
        Err(e) => return Err(e),
    }
    match read_npy::<_, Array2<f32>>(path) {
        Ok(a) => return Ok(a),
        Err(ReadNpyError::WrongDescriptor(_)) => {}
        Err(e) => return Err(e),
    }
    read_npy::<_, Array2<f64>>(path).map(|a| a.mapv(|v| v as f32))
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;
    use ndarray_npy::write_npy;

    #[test]
    fn test_load_assigns_class_ids_in_name_order() {
        let dir = tempfile::tempdir().unwrap();
        write_npy(dir.path().join("bob.npy"), &array![[1u8, 2, 3]]).unwrap();
        write_npy(dir.path().join("alice.npy"), &array![[4u8, 5, 6], [7, 8, 9]]).unwrap();
        std::fs::write(dir.path().join("notes.txt"), "ignored").unwrap();

        let gallery = Gallery::load(dir.path()).unwrap();

        assert_eq!(gallery.identities(), &["alice".to_string(), "bob".to_string()]);
        assert_eq!(gallery.name(0).unwrap(), "alice");
        assert_eq!(gallery.name(1).unwrap(), "bob");
        assert_eq!(gallery.len(), 3);
        assert_eq!(gallery.dimension(), 3);
        assert_eq!(gallery.training_set().labels(), &[0, 0, 1]);
        assert_eq!(gallery.training_set().samples().row(2).to_vec(), vec![1.0, 2.0, 3.0]);
    }

    #[test]
    fn test_load_accepts_float_samples() {
        let dir = tempfile::tempdir().unwrap();
        write_npy(dir.path().join("carol.npy"), &array![[0.5f64, 1.5]]).unwrap();
        write_npy(dir.path().join("dave.npy"), &array![[2.0f32, 3.0]]).unwrap();

        let gallery = Gallery::load(dir.path()).unwrap();
        assert_eq!(gallery.training_set().samples(), &array![[0.5f32, 1.5], [2.0, 3.0]]);
    }

    #[test]
    fn test_load_empty_directory_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("readme.md"), "no samples").unwrap();
        assert!(matches!(Gallery::load(dir.path()), Err(GalleryError::Empty(_))));
    }

    #[test]
    fn test_load_missing_directory_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("nope");
        assert!(matches!(Gallery::load(&missing), Err(GalleryError::Unreadable(_))));
    }

    #[test]
    fn test_dimension_mismatch_rejected() {
        let result = Gallery::from_identities(vec![
            ("a".into(), array![[1.0f32, 2.0]]),
            ("b".into(), array![[1.0f32, 2.0, 3.0]]),
        ]);
        match result {
            Err(GalleryError::DimensionMismatch { name, expected, found }) => {
                assert_eq!(name, "b");
                assert_eq!(expected, 2);
                assert_eq!(found, 3);
            }
            other => panic!("expected dimension mismatch, got {other:?}"),
        }
    }

    #[test]
    fn test_identity_without_samples_rejected() {
        let result = Gallery::from_identities(vec![("ghost".into(), Array2::<f32>::zeros((0, 4)))]);
        assert!(matches!(result, Err(GalleryError::NoSamples { .. })));
    }

    #[test]
    fn test_unknown_class_id() {
        let gallery = Gallery::from_identities(vec![("a".into(), array![[1.0f32]])]).unwrap();
        assert!(matches!(gallery.name(7), Err(GalleryError::UnknownClass(7))));
    }
}
