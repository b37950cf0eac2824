/// Dense integer standing in for an identity during classification.
///
/// Assigned in gallery discovery order starting at 0. Never persisted.
pub type ClassId = usize;

/// Axis-aligned face rectangle in frame pixel coordinates.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FaceRect {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
    pub confidence: f32,
}

/// Integer crop window inside a frame, guaranteed non-empty and in bounds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CropWindow {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl FaceRect {
    pub fn area(&self) -> f32 {
        self.width.max(0.0) * self.height.max(0.0)
    }

    /// Grow the rectangle by `margin` pixels on every side and clamp it to a
    /// `frame_width` × `frame_height` frame.
    ///
    /// Returns `None` when nothing of the face remains inside the frame.
    pub fn crop_window(
        &self,
        margin: u32,
        frame_width: u32,
        frame_height: u32,
    ) -> Option<CropWindow> {
        let margin = margin as f32;
        let x0 = (self.x - margin).floor().max(0.0);
        let y0 = (self.y - margin).floor().max(0.0);
        let x1 = (self.x + self.width + margin).ceil().min(frame_width as f32);
        let y1 = (self.y + self.height + margin).ceil().min(frame_height as f32);

        if x1 <= x0 || y1 <= y0 {
            return None;
        }

        Some(CropWindow {
            x: x0 as u32,
            y: y0 as u32,
            width: (x1 - x0) as u32,
            height: (y1 - y0) as u32,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rect(x: f32, y: f32, w: f32, h: f32) -> FaceRect {
        FaceRect { x, y, width: w, height: h, confidence: 0.9 }
    }

    #[test]
    fn test_crop_window_adds_margin() {
        let win = rect(20.0, 30.0, 40.0, 50.0).crop_window(5, 200, 200).unwrap();
        assert_eq!(win, CropWindow { x: 15, y: 25, width: 50, height: 60 });
    }

    #[test]
    fn test_crop_window_clamps_to_frame() {
        // Face touching the top-left corner: margin must not go negative.
        let win = rect(2.0, 1.0, 30.0, 30.0).crop_window(5, 32, 32).unwrap();
        assert_eq!(win, CropWindow { x: 0, y: 0, width: 32, height: 32 });
    }

    #[test]
    fn test_crop_window_outside_frame() {
        assert!(rect(500.0, 500.0, 10.0, 10.0).crop_window(5, 100, 100).is_none());
        assert!(rect(10.0, 10.0, 0.0, -4.0).crop_window(0, 100, 100).is_none());
    }

    #[test]
    fn test_area_ignores_negative_extent() {
        assert_eq!(rect(0.0, 0.0, 4.0, 5.0).area(), 20.0);
        assert_eq!(rect(0.0, 0.0, -4.0, 5.0).area(), 0.0);
    }
}
