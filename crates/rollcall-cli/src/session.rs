use rollcall_core::ledger::{Ledger, LedgerError, LedgerStore, MarkOutcome};
use rollcall_core::preprocess::{self, ChannelOrder, PreprocessError};
use rollcall_core::{
    Classifier, ClassifyError, DetectorError, FaceRect, Gallery, GalleryError, ScrfdDetector,
};
use rollcall_hw::{CameraError, Frame, FrameStream};
use thiserror::Error;

/// Consecutive capture failures tolerated before the session gives up.
const MAX_CAPTURE_FAILURES: usize = 10;

#[derive(Error, Debug)]
pub enum SessionError {
    #[error("camera error: {0}")]
    Camera(#[from] CameraError),
    #[error("detector error: {0}")]
    Detector(#[from] DetectorError),
    #[error("classifier error: {0}")]
    Classify(#[from] ClassifyError),
    #[error("gallery error: {0}")]
    Gallery(#[from] GalleryError),
    #[error("ledger error: {0}")]
    Ledger(#[from] LedgerError),
    #[error("gallery samples have {gallery} values but {size}x{size} face crops have {crop}")]
    SampleSize { gallery: usize, size: u32, crop: usize },
    #[error("no usable face in the last {frames} frames")]
    NoUsableFace { frames: usize },
}

/// Produces camera frames, one blocking call per frame.
pub trait FrameSource {
    fn next_frame(&mut self) -> Result<Frame, CameraError>;
}

impl FrameSource for FrameStream<'_> {
    fn next_frame(&mut self) -> Result<Frame, CameraError> {
        FrameStream::next_frame(self)
    }
}

/// Finds face rectangles in a frame.
pub trait FaceLocator {
    fn locate(&mut self, frame: &Frame) -> Result<Vec<FaceRect>, DetectorError>;
}

impl FaceLocator for ScrfdDetector {
    fn locate(&mut self, frame: &Frame) -> Result<Vec<FaceRect>, DetectorError> {
        self.detect(&frame.data, frame.width, frame.height)
    }
}

/// Consumes each processed frame with the faces recognised in it.
pub trait FrameSink {
    fn show(&mut self, frame: &Frame, faces: &[Recognition]);
}

/// A face recognised in one frame.
#[derive(Debug, Clone)]
pub struct Recognition {
    pub rect: FaceRect,
    pub name: String,
}

/// Counters reported at the end of a session.
#[derive(Debug, Default, Clone)]
pub struct SessionStats {
    pub frames: u64,
    pub dark_frames: u64,
    pub faces: u64,
    /// Identities newly marked present, in recognition order.
    pub marked: Vec<String>,
    pub ledger_failures: u64,
}

/// Crop geometry shared by the session and enrollment.
#[derive(Debug, Clone, Copy)]
pub struct CropSpec {
    pub size: u32,
    pub margin: u32,
    pub order: ChannelOrder,
}

impl CropSpec {
    pub fn sample(&self, frame: &Frame, face: &FaceRect) -> Result<Vec<u8>, PreprocessError> {
        preprocess::face_sample(
            &frame.data,
            frame.width,
            frame.height,
            face,
            self.margin,
            self.size,
            self.order,
        )
    }
}

/// Recognise faces and record attendance for one date.
pub struct Session<'g, C: Classifier, S: LedgerStore> {
    gallery: &'g Gallery,
    classifier: C,
    ledger: Ledger<S>,
    date: String,
    crop: CropSpec,
}

impl<'g, C: Classifier, S: LedgerStore> Session<'g, C, S> {
    /// Fails when face crops of `crop.size` cannot be compared with the gallery.
    pub fn new(
        gallery: &'g Gallery,
        classifier: C,
        ledger: Ledger<S>,
        date: impl Into<String>,
        crop: CropSpec,
    ) -> Result<Self, SessionError> {
        let crop_dim = preprocess::sample_dimension(crop.size);
        if gallery.dimension() != crop_dim {
            return Err(SessionError::SampleSize {
                gallery: gallery.dimension(),
                size: crop.size,
                crop: crop_dim,
            });
        }
        Ok(Self {
            gallery,
            classifier,
            ledger,
            date: date.into(),
            crop,
        })
    }

    /// Process frames until `max_frames` (0 = no limit) or the source fails
    /// repeatedly.
    pub fn run(
        &mut self,
        source: &mut impl FrameSource,
        locator: &mut impl FaceLocator,
        sink: &mut dyn FrameSink,
        max_frames: u64,
    ) -> Result<SessionStats, SessionError> {
        let mut stats = SessionStats::default();
        let mut failures = 0usize;

        tracing::info!(
            date = %self.date,
            identities = self.gallery.identities().len(),
            "session started"
        );

        while max_frames == 0 || stats.frames < max_frames {
            let frame = match source.next_frame() {
                Ok(frame) => {
                    failures = 0;
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
            stats.frames += 1;

            if frame.is_dark {
                stats.dark_frames += 1;
                continue;
            }

            let recognitions = self.process_frame(&frame, locator, &mut stats)?;
            sink.show(&frame, &recognitions);
        }

        tracing::info!(
            frames = stats.frames,
            faces = stats.faces,
            marked = stats.marked.len(),
            "session finished"
        );
        Ok(stats)
    }

    /// Classify every face in `frame` and record each identity in the ledger.
    pub fn process_frame(
        &mut self,
        frame: &Frame,
        locator: &mut impl FaceLocator,
        stats: &mut SessionStats,
    ) -> Result<Vec<Recognition>, SessionError> {
        let faces = locator.locate(frame)?;
        let mut recognitions = Vec::with_capacity(faces.len());

        for face in faces {
            let sample = match self.crop.sample(frame, &face) {
                Ok(sample) => sample,
                Err(e) => {
                    tracing::debug!(error = %e, ?face, "skipping face");
                    continue;
                }
            };
            stats.faces += 1;

            let query = preprocess::to_query(&sample);
            let class_id = self.classifier.classify(self.gallery.training_set(), &query)?;
            let name = self.gallery.name(class_id)?.to_string();
            tracing::debug!(%name, class_id, confidence = face.confidence, "face recognised");

            match self.ledger.ensure_present(&name, &self.date) {
                Ok(MarkOutcome::Marked) => stats.marked.push(name.clone()),
                Ok(_) => {}
                Err(e) if e.is_storage() => {
                    stats.ledger_failures += 1;
                    tracing::error!(error = %e, %name, "attendance not saved");
                }
                Err(e) => return Err(e.into()),
            }

            recognitions.push(Recognition { rect: face, name });
        }

        Ok(recognitions)
    }
}
