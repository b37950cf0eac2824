//! Frame sinks: log recognitions, or save an annotated snapshot.

use crate::session::{FrameSink, Recognition};
use image::{Rgb, RgbImage};
use rollcall_hw::Frame;
use std::path::PathBuf;

const BOX_COLOR: Rgb<u8> = Rgb([255, 255, 255]);
const LABEL_COLOR: Rgb<u8> = Rgb([0, 0, 255]);
const BOX_THICKNESS: u32 = 2;
const LABEL_HEIGHT: u32 = 8;

/// Logs the names seen in each frame, only when they change.
#[derive(Default)]
pub struct LogSink {
    last: Vec<String>,
}

impl FrameSink for LogSink {
    fn show(&mut self, frame: &Frame, faces: &[Recognition]) {
        let names: Vec<String> = faces.iter().map(|r| r.name.clone()).collect();
        if names != self.last {
            tracing::info!(seq = frame.sequence, ?names, "faces in view");
            self.last = names;
        }
    }
}

/// Writes the latest annotated frame to a PNG file, replacing it each time.
pub struct SnapshotSink {
    path: PathBuf,
    log: LogSink,
}

impl SnapshotSink {
    pub fn new(path: PathBuf) -> Self {
        Self {
            path,
            log: LogSink::default(),
        }
    }
}

impl FrameSink for SnapshotSink {
    fn show(&mut self, frame: &Frame, faces: &[Recognition]) {
        self.log.show(frame, faces);

        let Some(image) = annotate(frame, faces) else {
            tracing::warn!(seq = frame.sequence, "frame buffer does not match its dimensions");
            return;
        };
        if let Err(e) = image.save(&self.path) {
            tracing::warn!(path = %self.path.display(), error = %e, "snapshot write failed");
        }
    }
}

/// Draw a box around each face with a solid label bar above it.
pub fn annotate(frame: &Frame, faces: &[Recognition]) -> Option<RgbImage> {
    let mut image = RgbImage::from_raw(frame.width, frame.height, frame.data.clone())?;

    for face in faces {
        let Some(win) = face.rect.crop_window(0, frame.width, frame.height) else {
            continue;
        };
        let (x0, y0) = (win.x, win.y);
        let (x1, y1) = (win.x + win.width - 1, win.y + win.height - 1);

        for t in 0..BOX_THICKNESS {
            for x in x0..=x1 {
                put(&mut image, x, y0 + t, BOX_COLOR);
                put(&mut image, x, y1.saturating_sub(t), BOX_COLOR);
            }
            for y in y0..=y1 {
                put(&mut image, x0 + t, y, BOX_COLOR);
                put(&mut image, x1.saturating_sub(t), y, BOX_COLOR);
            }
        }

        for y in y0.saturating_sub(LABEL_HEIGHT)..y0 {
            for x in x0..=x1 {
                put(&mut image, x, y, LABEL_COLOR);
            }
        }
    }

    Some(image)
}

fn put(image: &mut RgbImage, x: u32, y: u32, color: Rgb<u8>) {
    if x < image.width() && y < image.height() {
        image.put_pixel(x, y, color);
    }
}
