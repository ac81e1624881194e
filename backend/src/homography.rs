//! Planar homography from camera pixels to court space.
//!
//! The source quadrilateral is a fixed inset of the frame that approximates where the court
//! sits in a typical broadcast view. It is not derived from court markings.

use anyhow::{Result, anyhow, bail};
use log::debug;
use nalgebra::{Matrix3, SMatrix, SVector, Vector3};
use opencv::core::{Point2d, Size};

/// Width of the canonical court rectangle in court units.
pub const COURT_WIDTH: f64 = 600.0;

/// Height of the canonical court rectangle in court units.
pub const COURT_HEIGHT: f64 = 400.0;

/// Fractional corners of the source quadrilateral as `(x, y)` of the frame size.
///
/// Ordered top-left, top-right, bottom-right, bottom-left.
const SOURCE_INSETS: [(f64, f64); 4] = [(0.15, 0.20), (0.85, 0.20), (0.85, 0.85), (0.15, 0.85)];

/// Minimum absolute cross product of three normalized corners to not be considered collinear.
const COLLINEAR_EPSILON: f64 = 1e-9;

const CORNER_TRIPLES: [[usize; 3]; 4] = [[0, 1, 2], [0, 1, 3], [0, 2, 3], [1, 2, 3]];

/// A 3x3 projective transform together with the quadrilaterals it maps between.
#[derive(Clone, Debug)]
pub struct Homography {
    matrix: Matrix3<f64>,
    source: [Point2d; 4],
    destination: [Point2d; 4],
}

impl Homography {
    /// Solves the transform mapping each `source` corner to the matching `destination` corner.
    ///
    /// Fails if either quadrilateral has three collinear or two coincident corners.
    pub fn from_quads(source: [Point2d; 4], destination: [Point2d; 4]) -> Result<Homography> {
        let (source_n, t_source) = normalize_quad(&source)
            .ok_or_else(|| anyhow!("degenerate source quadrilateral {source:?}"))?;
        let (destination_n, t_destination) = normalize_quad(&destination)
            .ok_or_else(|| anyhow!("degenerate destination quadrilateral {destination:?}"))?;

        let mut a = SMatrix::<f64, 8, 8>::zeros();
        let mut b = SVector::<f64, 8>::zeros();
        for (i, (src, dst)) in source_n.iter().zip(destination_n.iter()).enumerate() {
            let (x, y) = (src.x, src.y);
            let (u, v) = (dst.x, dst.y);
            let r0 = 2 * i;
            let r1 = 2 * i + 1;

            a[(r0, 0)] = x;
            a[(r0, 1)] = y;
            a[(r0, 2)] = 1.0;
            a[(r0, 6)] = -u * x;
            a[(r0, 7)] = -u * y;
            b[r0] = u;

            a[(r1, 3)] = x;
            a[(r1, 4)] = y;
            a[(r1, 5)] = 1.0;
            a[(r1, 6)] = -v * x;
            a[(r1, 7)] = -v * y;
            b[r1] = v;
        }

        let h = a
            .lu()
            .solve(&b)
            .ok_or_else(|| anyhow!("singular correspondence system"))?;
        let normalized = Matrix3::new(h[0], h[1], h[2], h[3], h[4], h[5], h[6], h[7], 1.0);
        let t_destination_inv = t_destination
            .try_inverse()
            .ok_or_else(|| anyhow!("singular destination normalization"))?;
        let mut matrix = t_destination_inv * normalized * t_source;

        let scale = matrix[(2, 2)];
        if scale.abs() > f64::EPSILON {
            matrix /= scale;
        }
        if !matrix.iter().all(|value| value.is_finite()) {
            bail!("homography is not finite");
        }

        Ok(Homography {
            matrix,
            source,
            destination,
        })
    }

    pub fn matrix(&self) -> &Matrix3<f64> {
        &self.matrix
    }

    pub fn source(&self) -> &[Point2d; 4] {
        &self.source
    }

    pub fn destination(&self) -> &[Point2d; 4] {
        &self.destination
    }

    /// Maps a single pixel point into court space.
    ///
    /// A point on the horizon line (zero homogeneous scale) maps to the origin.
    pub fn project_point(&self, point: Point2d) -> Point2d {
        let projected = self.matrix * Vector3::new(point.x, point.y, 1.0);
        let w = projected.z;
        if w.abs() > f32::EPSILON as f64 {
            Point2d::new(projected.x / w, projected.y / w)
        } else {
            Point2d::new(0.0, 0.0)
        }
    }
}

/// Computes the pixel to court homography for frames of `frame_width` x `frame_height`.
pub fn compute_homography(frame_width: i32, frame_height: i32) -> Result<Homography> {
    if frame_width <= 0 || frame_height <= 0 {
        bail!("invalid frame size {frame_width}x{frame_height}");
    }

    let homography = Homography::from_quads(
        source_quad(Size::new(frame_width, frame_height)),
        destination_quad(),
    )?;
    debug!("homography for {frame_width}x{frame_height}: {:?}", homography.matrix);

    Ok(homography)
}

/// Projects `points` into court space.
///
/// Returns an empty list when there is nothing to project or no `homography` yet.
pub fn project(points: &[Point2d], homography: Option<&Homography>) -> Vec<Point2d> {
    let Some(homography) = homography else {
        return vec![];
    };

    points
        .iter()
        .map(|point| homography.project_point(*point))
        .collect()
}

pub fn source_quad(size: Size) -> [Point2d; 4] {
    let (width, height) = (size.width as f64, size.height as f64);
    SOURCE_INSETS.map(|(x, y)| Point2d::new(x * width, y * height))
}

pub fn destination_quad() -> [Point2d; 4] {
    [
        Point2d::new(0.0, 0.0),
        Point2d::new(COURT_WIDTH, 0.0),
        Point2d::new(COURT_WIDTH, COURT_HEIGHT),
        Point2d::new(0.0, COURT_HEIGHT),
    ]
}

/// Translates `quad` to zero mean and scales it to an average distance of sqrt(2).
///
/// Returns `None` if any three corners are collinear.
fn normalize_quad(quad: &[Point2d; 4]) -> Option<([Point2d; 4], Matrix3<f64>)> {
    let cx = quad.iter().map(|p| p.x).sum::<f64>() / 4.0;
    let cy = quad.iter().map(|p| p.y).sum::<f64>() / 4.0;
    let mean_dist = quad
        .iter()
        .map(|p| ((p.x - cx).powi(2) + (p.y - cy).powi(2)).sqrt())
        .sum::<f64>()
        / 4.0;
    if !mean_dist.is_finite() || mean_dist <= f64::EPSILON {
        return None;
    }

    let scale = 2.0_f64.sqrt() / mean_dist;
    let t = Matrix3::new(
        scale,
        0.0,
        -scale * cx,
        0.0,
        scale,
        -scale * cy,
        0.0,
        0.0,
        1.0,
    );
    let normalized = quad.map(|p| Point2d::new((p.x - cx) * scale, (p.y - cy) * scale));

    for [a, b, c] in CORNER_TRIPLES.map(|triple| triple.map(|i| normalized[i])) {
        let cross = (b.x - a.x) * (c.y - a.y) - (b.y - a.y) * (c.x - a.x);
        if cross.abs() < COLLINEAR_EPSILON {
            return None;
        }
    }

    Some((normalized, t))
}

#[cfg(test)]
mod tests {
    use super::*;

    const SIZES: [(i32, i32); 6] = [
        (1, 1),
        (7, 3),
        (640, 360),
        (1280, 720),
        (1920, 1080),
        (4096, 2160),
    ];

    fn assert_close(actual: Point2d, expected: Point2d) {
        assert!(
            (actual.x - expected.x).abs() < 1e-3 && (actual.y - expected.y).abs() < 1e-3,
            "{actual:?} != {expected:?}"
        );
    }

    #[test]
    fn source_corners_map_to_court_corners() {
        for (width, height) in SIZES {
            let homography = compute_homography(width, height).unwrap();
            let projected = project(homography.source(), Some(&homography));

            assert_eq!(projected.len(), 4);
            for (actual, expected) in projected.into_iter().zip(destination_quad()) {
                assert_close(actual, expected);
            }
        }
    }

    #[test]
    fn source_quad_uses_fixed_insets() {
        let quad = source_quad(Size::new(1000, 500));

        assert_close(quad[0], Point2d::new(150.0, 100.0));
        assert_close(quad[1], Point2d::new(850.0, 100.0));
        assert_close(quad[2], Point2d::new(850.0, 425.0));
        assert_close(quad[3], Point2d::new(150.0, 425.0));
    }

    #[test]
    fn axis_aligned_inset_is_affine() {
        let homography = compute_homography(1000, 500).unwrap();
        let matrix = homography.matrix();

        assert!(matrix[(2, 0)].abs() < 1e-9);
        assert!(matrix[(2, 1)].abs() < 1e-9);
        assert_close(
            homography.project_point(Point2d::new(500.0, 262.5)),
            Point2d::new(300.0, 200.0),
        );
    }

    #[test]
    fn project_empty_or_without_homography_is_empty() {
        let homography = compute_homography(640, 360).unwrap();

        assert!(project(&[], Some(&homography)).is_empty());
        assert!(project(&[Point2d::new(1.0, 2.0)], None).is_empty());
        assert!(project(&[], None).is_empty());
    }

    #[test]
    fn project_preserves_order() {
        let homography = compute_homography(1280, 720).unwrap();
        let points = [
            Point2d::new(1088.0, 612.0),
            Point2d::new(192.0, 144.0),
            Point2d::new(640.0, 378.0),
            Point2d::new(1088.0, 144.0),
        ];
        let projected = project(&points, Some(&homography));

        assert_eq!(projected.len(), points.len());
        assert_close(projected[0], Point2d::new(600.0, 400.0));
        assert_close(projected[1], Point2d::new(0.0, 0.0));
        assert_close(projected[2], Point2d::new(300.0, 200.0));
        assert_close(projected[3], Point2d::new(600.0, 0.0));
    }

    #[test]
    fn perspective_quad_round_trips_corners() {
        let source = [
            Point2d::new(300.0, 200.0),
            Point2d::new(980.0, 210.0),
            Point2d::new(1200.0, 650.0),
            Point2d::new(60.0, 640.0),
        ];
        let homography = Homography::from_quads(source, destination_quad()).unwrap();

        for (corner, expected) in source.into_iter().zip(destination_quad()) {
            assert_close(homography.project_point(corner), expected);
        }
        assert!(homography.matrix()[(2, 1)].abs() > 1e-9);
    }

    #[test]
    fn collinear_source_is_rejected() {
        let source = [
            Point2d::new(0.0, 0.0),
            Point2d::new(100.0, 100.0),
            Point2d::new(200.0, 200.0),
            Point2d::new(0.0, 300.0),
        ];

        assert!(Homography::from_quads(source, destination_quad()).is_err());
    }

    #[test]
    fn duplicated_source_corner_is_rejected() {
        let source = [
            Point2d::new(10.0, 10.0),
            Point2d::new(10.0, 10.0),
            Point2d::new(200.0, 300.0),
            Point2d::new(0.0, 300.0),
        ];

        assert!(Homography::from_quads(source, destination_quad()).is_err());
    }

    #[test]
    fn coincident_source_is_rejected() {
        let source = [Point2d::new(5.0, 5.0); 4];

        assert!(Homography::from_quads(source, destination_quad()).is_err());
    }

    #[test]
    fn invalid_frame_size_is_rejected() {
        assert!(compute_homography(0, 720).is_err());
        assert!(compute_homography(1280, -1).is_err());
    }
}
