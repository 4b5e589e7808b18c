//! Alignment of detected faces onto the canonical recognition template.
//!
//! Enrolment embeddings were produced from faces warped onto this exact
//! 112x112 template; the node must warp the same way or recognition
//! accuracy silently collapses.

use common::{BoundingBox, Landmarks};
use image::{imageops, Rgb, RgbImage};
use imageproc::geometric_transformations::{warp_into, Interpolation, Projection};
use nalgebra::{Matrix2, Vector2};

/// Output side length of an aligned face crop.
pub const ALIGNED_SIZE: u32 = 112;

/// Canonical template positions for the five landmarks in a 112x112 crop:
/// left eye, right eye, nose tip, left mouth corner, right mouth corner.
pub const TEMPLATE: [[f32; 2]; 5] = [
    [38.2946, 51.6963],
    [73.5318, 51.5014],
    [56.0252, 71.7366],
    [41.5493, 92.3655],
    [70.7299, 92.2041],
];

/// A face crop ready for the embedder. `aligned` is false when the crop came
/// from the bbox fallback, which degrades recognition accuracy.
#[derive(Debug, Clone)]
pub struct AlignedFace {
    pub image: RgbImage,
    pub aligned: bool,
}

/// 2-D similarity transform (isotropic scale, rotation, translation).
#[derive(Debug, Clone)]
pub struct Similarity {
    pub scale: f64,
    pub rotation: Matrix2<f64>,
    pub translation: Vector2<f64>,
}

impl Similarity {
    /// Row-major 2x3 affine matrix.
    pub fn to_affine(&self) -> [f32; 6] {
        let m = self.rotation * self.scale;
        [
            m[(0, 0)] as f32,
            m[(0, 1)] as f32,
            self.translation.x as f32,
            m[(1, 0)] as f32,
            m[(1, 1)] as f32,
            self.translation.y as f32,
        ]
    }

    pub fn rotation_determinant(&self) -> f64 {
        self.rotation.determinant()
    }

    /// Apply to a single point.
    pub fn apply(&self, p: [f32; 2]) -> [f32; 2] {
        let v = self.rotation * Vector2::new(p[0] as f64, p[1] as f64) * self.scale
            + self.translation;
        [v.x as f32, v.y as f32]
    }
}

/// Estimate the similarity transform mapping `src` onto `dst` (Umeyama).
///
/// Reflection is corrected through the sign of `det(U * Vt)`, so the
/// returned rotation always has positive determinant. Returns `None` for
/// degenerate landmark sets (zero variance).
pub fn similarity_transform(src: &[[f32; 2]; 5], dst: &[[f32; 2]; 5]) -> Option<Similarity> {
    let n = src.len() as f64;

    let mut src_mean = Vector2::zeros();
    let mut dst_mean = Vector2::zeros();
    for i in 0..src.len() {
        src_mean += Vector2::new(src[i][0] as f64, src[i][1] as f64);
        dst_mean += Vector2::new(dst[i][0] as f64, dst[i][1] as f64);
    }
    src_mean /= n;
    dst_mean /= n;

    // Covariance dst_demean^T . src_demean and source variance.
    let mut cov = Matrix2::zeros();
    let mut src_var = 0.0f64;
    for i in 0..src.len() {
        let s = Vector2::new(src[i][0] as f64, src[i][1] as f64) - src_mean;
        let d = Vector2::new(dst[i][0] as f64, dst[i][1] as f64) - dst_mean;
        cov += d * s.transpose();
        src_var += s.norm_squared();
    }
    cov /= n;
    src_var /= n;
    if src_var <= f64::EPSILON {
        return None;
    }

    let svd = cov.svd(true, true);
    let (u, v_t) = match (svd.u, svd.v_t) {
        (Some(u), Some(v_t)) => (u, v_t),
        _ => return None,
    };
    let s = svd.singular_values;

    let sign = if (u * v_t).determinant() >= 0.0 { 1.0 } else { -1.0 };
    let d = Matrix2::new(1.0, 0.0, 0.0, sign);

    let rotation = u * d * v_t;
    let scale = (s[0] + s[1] * sign) / src_var;
    let translation = dst_mean - rotation * src_mean * scale;

    Some(Similarity {
        scale,
        rotation,
        translation,
    })
}

/// Warp a face onto the canonical template using its five landmarks.
///
/// Returns `None` when the transform is degenerate; callers fall back to
/// [`align_from_bbox`].
pub fn align_face(frame: &RgbImage, landmarks: &Landmarks) -> Option<AlignedFace> {
    let sim = similarity_transform(landmarks.points(), &TEMPLATE)?;
    let a = sim.to_affine();
    let projection = Projection::from_matrix([
        a[0], a[1], a[2], //
        a[3], a[4], a[5], //
        0.0, 0.0, 1.0,
    ])?;

    let mut out = RgbImage::new(ALIGNED_SIZE, ALIGNED_SIZE);
    warp_into(frame, &projection, Interpolation::Bilinear, Rgb([0, 0, 0]), &mut out);
    Some(AlignedFace {
        image: out,
        aligned: true,
    })
}

/// Fallback crop when no landmarks are available or the warp failed: a
/// margin-padded bbox crop resized to the template size.
pub fn align_from_bbox(frame: &RgbImage, bbox: &BoundingBox, margin: f32) -> AlignedFace {
    let padded = bbox
        .expanded(bbox.width().max(bbox.height()) * margin)
        .clamped(frame.width(), frame.height());

    let (x, y) = (padded.x1 as u32, padded.y1 as u32);
    let (w, h) = (padded.width() as u32, padded.height() as u32);
    if w == 0 || h == 0 {
        return AlignedFace {
            image: RgbImage::new(ALIGNED_SIZE, ALIGNED_SIZE),
            aligned: false,
        };
    }

    let crop = imageops::crop_imm(frame, x, y, w, h).to_image();
    let resized = imageops::resize(&crop, ALIGNED_SIZE, ALIGNED_SIZE, imageops::FilterType::Triangle);
    AlignedFace {
        image: resized,
        aligned: false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn identity_when_landmarks_match_template() {
        let sim = similarity_transform(&TEMPLATE, &TEMPLATE).unwrap();
        assert_relative_eq!(sim.scale, 1.0, epsilon = 1e-6);
        assert_relative_eq!(sim.rotation[(0, 0)], 1.0, epsilon = 1e-6);
        assert_relative_eq!(sim.rotation[(0, 1)], 0.0, epsilon = 1e-6);
        assert_relative_eq!(sim.translation.norm(), 0.0, epsilon = 1e-6);
    }

    #[test]
    fn recovers_scale_and_translation() {
        let mut moved = TEMPLATE;
        for p in &mut moved {
            p[0] = p[0] * 2.0 + 30.0;
            p[1] = p[1] * 2.0 + 10.0;
        }
        let sim = similarity_transform(&moved, &TEMPLATE).unwrap();
        assert_relative_eq!(sim.scale, 0.5, epsilon = 1e-6);
        for (src, dst) in moved.iter().zip(TEMPLATE.iter()) {
            let mapped = sim.apply(*src);
            assert_relative_eq!(mapped[0], dst[0], epsilon = 1e-3);
            assert_relative_eq!(mapped[1], dst[1], epsilon = 1e-3);
        }
    }

    #[test]
    fn rotation_is_reflection_free() {
        // A mirrored landmark set must not produce a reflecting transform.
        let mut mirrored = TEMPLATE;
        for p in &mut mirrored {
            p[0] = 112.0 - p[0];
        }
        let sim = similarity_transform(&mirrored, &TEMPLATE).unwrap();
        assert!(sim.rotation_determinant() > 0.0);

        let rotated = {
            let mut pts = TEMPLATE;
            for p in &mut pts {
                // 90 degree rotation about the crop centre
                let (x, y) = (p[0] - 56.0, p[1] - 56.0);
                p[0] = -y + 56.0;
                p[1] = x + 56.0;
            }
            pts
        };
        let sim = similarity_transform(&rotated, &TEMPLATE).unwrap();
        assert!(sim.rotation_determinant() > 0.0);
        assert_relative_eq!(sim.scale, 1.0, epsilon = 1e-6);
    }

    #[test]
    fn degenerate_landmarks_yield_none() {
        let collapsed = [[5.0f32, 5.0]; 5];
        assert!(similarity_transform(&collapsed, &TEMPLATE).is_none());
    }

    #[test]
    fn aligned_output_has_template_size() {
        let frame = RgbImage::from_pixel(640, 480, Rgb([40, 80, 120]));
        let landmarks = Landmarks([
            [300.0, 200.0],
            [340.0, 200.0],
            [320.0, 225.0],
            [305.0, 250.0],
            [335.0, 250.0],
        ]);
        let aligned = align_face(&frame, &landmarks).unwrap();
        assert!(aligned.aligned);
        assert_eq!(aligned.image.width(), ALIGNED_SIZE);
        assert_eq!(aligned.image.height(), ALIGNED_SIZE);
    }

    #[test]
    fn bbox_fallback_is_flagged_degraded() {
        let frame = RgbImage::from_pixel(320, 240, Rgb([10, 20, 30]));
        let crop = align_from_bbox(&frame, &BoundingBox::new(100.0, 80.0, 180.0, 170.0), 0.1);
        assert!(!crop.aligned);
        assert_eq!(crop.image.width(), ALIGNED_SIZE);
    }

    #[test]
    fn zero_area_bbox_yields_black_crop() {
        let frame = RgbImage::from_pixel(320, 240, Rgb([10, 20, 30]));
        let crop = align_from_bbox(&frame, &BoundingBox::new(50.0, 50.0, 50.0, 50.0), 0.0);
        assert!(!crop.aligned);
        assert_eq!(crop.image.get_pixel(56, 56), &Rgb([0, 0, 0]));
    }
}
