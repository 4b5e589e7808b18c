use std::sync::Arc;

use chrono::{DateTime, Utc};
use image::RgbImage;

/// An immutable captured camera frame.
///
/// Pixel data is shared behind an `Arc` so the capture thread can hand the
/// same buffer to the AI loop, the stream thread and the UI without copying.
#[derive(Clone)]
pub struct Frame {
    pixels: Arc<RgbImage>,
    /// Monotonically increasing capture sequence number.
    pub seq: u64,
    /// Wall-clock capture time.
    pub captured_at: DateTime<Utc>,
}

impl Frame {
    pub fn new(pixels: RgbImage, seq: u64) -> Self {
        Self {
            pixels: Arc::new(pixels),
            seq,
            captured_at: Utc::now(),
        }
    }

    pub fn width(&self) -> u32 {
        self.pixels.width()
    }

    pub fn height(&self) -> u32 {
        self.pixels.height()
    }

    pub fn image(&self) -> &RgbImage {
        &self.pixels
    }
}

impl std::fmt::Debug for Frame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Frame")
            .field("seq", &self.seq)
            .field("width", &self.width())
            .field("height", &self.height())
            .field("captured_at", &self.captured_at)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frames_share_pixels_across_clones() {
        let frame = Frame::new(RgbImage::new(4, 2), 7);
        let copy = frame.clone();
        assert_eq!(copy.seq, 7);
        assert_eq!(copy.width(), 4);
        assert_eq!(copy.height(), 2);
        assert!(Arc::ptr_eq(&frame.pixels, &copy.pixels));
    }
}
