//! rollcall-core — face gallery, k-NN identification and attendance ledger.
//!
//! A gallery of per-identity face samples feeds a k-nearest-neighbor
//! classifier; recognised identities are marked present in a CSV ledger.
//! Face rectangles come from an SCRFD detector running on ONNX Runtime.

pub mod classifier;
pub mod detector;
pub mod gallery;
pub mod ledger;
pub mod preprocess;
pub mod types;

pub use classifier::{Classifier, ClassifyError, KnnClassifier, TrainingSet, DEFAULT_K};
pub use detector::{DetectorError, ScrfdDetector};
pub use gallery::{Gallery, GalleryError};
pub use ledger::{Ledger, LedgerError, LedgerStore, MarkOutcome};
pub use preprocess::ChannelOrder;
pub use types::{ClassId, FaceRect};
