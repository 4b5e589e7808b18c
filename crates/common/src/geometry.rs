use serde::{Deserialize, Serialize};

/// Axis-aligned face bounding box in frame pixel coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x1: f32,
    pub y1: f32,
    pub x2: f32,
    pub y2: f32,
}

impl BoundingBox {
    pub fn new(x1: f32, y1: f32, x2: f32, y2: f32) -> Self {
        Self { x1, y1, x2, y2 }
    }

    pub fn width(&self) -> f32 {
        (self.x2 - self.x1).max(0.0)
    }

    pub fn height(&self) -> f32 {
        (self.y2 - self.y1).max(0.0)
    }

    pub fn area(&self) -> f32 {
        self.width() * self.height()
    }

    /// Intersection over union. Degenerate (zero-area) boxes yield 0.
    pub fn iou(&self, other: &BoundingBox) -> f32 {
        let x1 = self.x1.max(other.x1);
        let y1 = self.y1.max(other.y1);
        let x2 = self.x2.min(other.x2);
        let y2 = self.y2.min(other.y2);

        let inter = (x2 - x1).max(0.0) * (y2 - y1).max(0.0);
        let union = self.area() + other.area() - inter;
        if union <= 0.0 {
            return 0.0;
        }
        inter / union
    }

    /// Grow the box by `margin` pixels on every side.
    pub fn expanded(&self, margin: f32) -> BoundingBox {
        BoundingBox {
            x1: self.x1 - margin,
            y1: self.y1 - margin,
            x2: self.x2 + margin,
            y2: self.y2 + margin,
        }
    }

    /// Clamp the box to a `width` x `height` frame.
    pub fn clamped(&self, width: u32, height: u32) -> BoundingBox {
        BoundingBox {
            x1: self.x1.clamp(0.0, width as f32),
            y1: self.y1.clamp(0.0, height as f32),
            x2: self.x2.clamp(0.0, width as f32),
            y2: self.y2.clamp(0.0, height as f32),
        }
    }
}

/// The five facial landmarks used for alignment, in pixel coordinates:
/// left eye, right eye, nose tip, left mouth corner, right mouth corner.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Landmarks(pub [[f32; 2]; 5]);

impl Landmarks {
    pub fn left_eye(&self) -> [f32; 2] {
        self.0[0]
    }

    pub fn right_eye(&self) -> [f32; 2] {
        self.0[1]
    }

    pub fn nose(&self) -> [f32; 2] {
        self.0[2]
    }

    pub fn left_mouth(&self) -> [f32; 2] {
        self.0[3]
    }

    pub fn right_mouth(&self) -> [f32; 2] {
        self.0[4]
    }

    pub fn points(&self) -> &[[f32; 2]; 5] {
        &self.0
    }

    /// Scale all points by a uniform factor (used to undo letterboxing).
    pub fn scaled(&self, factor: f32) -> Landmarks {
        let mut pts = self.0;
        for p in &mut pts {
            p[0] *= factor;
            p[1] *= factor;
        }
        Landmarks(pts)
    }
}
