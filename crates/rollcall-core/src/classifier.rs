//! k-nearest-neighbor face classification.
//!
//! A query vector is compared against every training sample by Euclidean
//! distance. The k closest samples vote; the class with the most votes wins,
//! and a tie goes to the smallest class id. Neighbor ties at equal distance
//! keep training-set order, so the result is fully deterministic.

use crate::types::ClassId;
use ndarray::{Array2, ArrayView1};
use std::cmp::Ordering;
use std::collections::BTreeMap;
use thiserror::Error;

/// Neighbor count used when the caller does not choose one.
pub const DEFAULT_K: usize = 5;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum ClassifyError {
    #[error("training set is empty")]
    EmptyTrainingSet,
    #[error("query has {found} dimensions, training samples have {expected}")]
    DimensionMismatch { expected: usize, found: usize },
    #[error("k must be at least 1")]
    ZeroK,
    #[error("{labels} labels for {samples} samples")]
    LabelCount { samples: usize, labels: usize },
}

/// Training samples (one per row) and the class id of each row.
#[derive(Debug, Clone)]
pub struct TrainingSet {
    samples: Array2<f32>,
    labels: Vec<ClassId>,
}

impl TrainingSet {
    pub fn new(samples: Array2<f32>, labels: Vec<ClassId>) -> Result<Self, ClassifyError> {
        if samples.nrows() != labels.len() {
            return Err(ClassifyError::LabelCount {
                samples: samples.nrows(),
                labels: labels.len(),
            });
        }
        Ok(Self::from_parts(samples, labels))
    }

    /// Caller guarantees one label per sample row.
    pub(crate) fn from_parts(samples: Array2<f32>, labels: Vec<ClassId>) -> Self {
        debug_assert_eq!(samples.nrows(), labels.len());
        Self { samples, labels }
    }

    pub fn samples(&self) -> &Array2<f32> {
        &self.samples
    }

    pub fn labels(&self) -> &[ClassId] {
        &self.labels
    }

    pub fn dimension(&self) -> usize {
        self.samples.ncols()
    }

    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }
}

/// Strategy for assigning a class id to one flattened face sample.
pub trait Classifier {
    fn classify(&self, training: &TrainingSet, query: &[f32]) -> Result<ClassId, ClassifyError>;
}

/// Majority vote among the `k` nearest training samples.
#[derive(Debug, Clone, Copy)]
pub struct KnnClassifier {
    pub k: usize,
}

impl Default for KnnClassifier {
    fn default() -> Self {
        Self { k: DEFAULT_K }
    }
}

impl Classifier for KnnClassifier {
    fn classify(&self, training: &TrainingSet, query: &[f32]) -> Result<ClassId, ClassifyError> {
        classify(training, query, self.k)
    }
}

/// Euclidean distance between a training row and the query.
///
/// Accumulated in `f64`: a 30000-value face sample overflows the `f32`
/// mantissa long before the sum is complete.
fn euclidean_distance(sample: ArrayView1<f32>, query: &[f32]) -> f64 {
    sample
        .iter()
        .zip(query.iter())
        .map(|(&a, &b)| (f64::from(a) - f64::from(b)).powi(2))
        .sum::<f64>()
        .sqrt()
}

/// Ascending distance with NaN after everything else, whatever its sign bit.
fn nan_last(a: f64, b: f64) -> Ordering {
    match (a.is_nan(), b.is_nan()) {
        (false, false) => a.total_cmp(&b),
        (true, true) => Ordering::Equal,
        (true, false) => Ordering::Greater,
        (false, true) => Ordering::Less,
    }
}

/// Classify `query` by a k-nearest-neighbor vote over `training`.
///
/// `k` larger than the training set is clipped to its size.
pub fn classify(training: &TrainingSet, query: &[f32], k: usize) -> Result<ClassId, ClassifyError> {
    if training.is_empty() {
        return Err(ClassifyError::EmptyTrainingSet);
    }
    if query.len() != training.dimension() {
        return Err(ClassifyError::DimensionMismatch {
            expected: training.dimension(),
            found: query.len(),
        });
    }
    if k == 0 {
        return Err(ClassifyError::ZeroK);
    }

    let mut neighbors: Vec<(f64, ClassId)> = training
        .samples
        .rows()
        .into_iter()
        .zip(training.labels.iter())
        .map(|(row, &label)| (euclidean_distance(row, query), label))
        .collect();

    // sort_by is stable: equal distances keep training order.
    neighbors.sort_by(|a, b| nan_last(a.0, b.0));
    let k = k.min(neighbors.len());

    let mut votes: BTreeMap<ClassId, usize> = BTreeMap::new();
    for &(_, label) in &neighbors[..k] {
        *votes.entry(label).or_insert(0) += 1;
    }

    // Ascending class-id iteration with a strict comparison keeps the smallest
    // id on a count tie.
    let mut winner = neighbors[0].1;
    let mut best = 0usize;
    for (&label, &count) in &votes {
        if count > best {
            best = count;
            winner = label;
        }
    }

    tracing::trace!(k, class_id = winner, votes = best, "k-NN vote");
    Ok(winner)
}
