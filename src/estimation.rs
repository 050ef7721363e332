//! Scale, rotation and center estimation from tracked keypoints.

use nalgebra::{DMatrix, Point2, Vector2};
use serde::{Deserialize, Serialize};

#[cfg(feature = "parallel")]
use rayon::prelude::*;

use crate::cluster::Clusterer;
use crate::geometry::{bound_angle, centroid, l2_distance, median, point_angle, transform_all};
use crate::keypoint::ClassId;
use crate::optical_flow::TrackedPoint;

/// Distances and angles between every pair of initial object keypoints,
/// indexed by class index (class id − 1).
#[derive(Debug, Clone, PartialEq)]
pub struct PairwiseGeometry {
    distance: DMatrix<f32>,
    angle: DMatrix<f32>,
}

impl PairwiseGeometry {
    /// `points[i]` is the initial location of class `i + 1`.
    pub fn from_points(points: &[Point2<f32>]) -> Self {
        let n = points.len();
        Self {
            distance: DMatrix::from_fn(n, n, |i, j| l2_distance(&points[i], &points[j])),
            angle: DMatrix::from_fn(n, n, |i, j| point_angle(&points[i], &points[j])),
        }
    }

    pub fn len(&self) -> usize {
        self.distance.nrows()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn distance(&self, c1: ClassId, c2: ClassId) -> Option<f32> {
        let (i, j) = self.cell(c1, c2)?;
        Some(self.distance[(i, j)])
    }

    pub fn angle(&self, c1: ClassId, c2: ClassId) -> Option<f32> {
        let (i, j) = self.cell(c1, c2)?;
        Some(self.angle[(i, j)])
    }

    fn cell(&self, c1: ClassId, c2: ClassId) -> Option<(usize, usize)> {
        let (i, j) = (c1.index()?, c2.index()?);
        (i < self.len() && j < self.len()).then_some((i, j))
    }

    /// Scale ratio and bounded angle change of the pair relative to the
    /// reference. `None` when either sample is not finite.
    fn sample(&self, a: &TrackedPoint, b: &TrackedPoint) -> Option<(f32, f32)> {
        let scale = l2_distance(&a.location, &b.location) / self.distance(a.class, b.class)?;
        let angle = bound_angle(point_angle(&a.location, &b.location) - self.angle(a.class, b.class)?);
        (scale.is_finite() && angle.is_finite()).then_some((scale, angle))
    }
}

/// Object scale (1.0 = unchanged) and rotation in radians (0 = unchanged).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ScaleRotation {
    pub scale: f32,
    pub rotation: f32,
}

impl ScaleRotation {
    pub const IDENTITY: ScaleRotation = ScaleRotation {
        scale: 1.0,
        rotation: 0.0,
    };
}

/// Median scale ratio and angle change over every ordered pair of tracked
/// points with different classes.
///
/// `None` when no valid pair exists. The disable flags force scale to 1 or
/// rotation to 0 on a defined estimate.
pub fn estimate_scale_rotation(
    tracked: &[TrackedPoint],
    reference: &PairwiseGeometry,
    estimate_scale: bool,
    estimate_rotation: bool,
) -> Option<ScaleRotation> {
    if tracked.len() < 2 {
        return None;
    }

    let (mut scales, mut angles): (Vec<f32>, Vec<f32>) = pair_samples(tracked, reference).into_iter().unzip();
    let scale = median(&mut scales)?;
    let rotation = median(&mut angles)?;

    Some(ScaleRotation {
        scale: if estimate_scale { scale } else { 1.0 },
        rotation: if estimate_rotation { rotation } else { 0.0 },
    })
}

#[cfg(not(feature = "parallel"))]
fn pair_samples(tracked: &[TrackedPoint], reference: &PairwiseGeometry) -> Vec<(f32, f32)> {
    let mut samples = Vec::with_capacity(tracked.len() * tracked.len());
    for a in tracked {
        for b in tracked {
            if a.class != b.class {
                samples.extend(reference.sample(a, b));
            }
        }
    }
    samples
}

#[cfg(feature = "parallel")]
fn pair_samples(tracked: &[TrackedPoint], reference: &PairwiseGeometry) -> Vec<(f32, f32)> {
    tracked
        .par_iter()
        .flat_map_iter(|a| {
            tracked
                .iter()
                .filter(move |b| a.class != b.class)
                .filter_map(move |b| reference.sample(a, b))
        })
        .collect()
}

/// Consensus center and the split of tracked points into inliers and outliers.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CenterEstimate {
    pub center: Option<Point2<f32>>,
    pub inliers: Vec<TrackedPoint>,
    pub outliers: Vec<TrackedPoint>,
}

/// Each tracked point votes for the center through its class's spring,
/// transformed by `estimate`. The largest vote cluster wins.
///
/// `springs[i]` belongs to class `i + 1`. Points of unknown classes are outliers.
pub fn estimate_center(
    tracked: &[TrackedPoint],
    springs: &[Vector2<f32>],
    estimate: ScaleRotation,
    cluster_threshold: f32,
) -> CenterEstimate {
    let transformed = transform_all(springs, estimate.scale, estimate.rotation);

    let mut voters = Vec::with_capacity(tracked.len());
    let mut votes = Vec::with_capacity(tracked.len());
    let mut outliers = Vec::new();
    for point in tracked {
        match point.class.index().and_then(|i| transformed.get(i)) {
            Some(spring) => {
                voters.push(*point);
                votes.push(point.location - *spring);
            }
            None => outliers.push(*point),
        }
    }

    let mask = Clusterer::new(cluster_threshold).cluster_inliers(&votes);

    let mut inliers = Vec::new();
    let mut inlier_votes = Vec::new();
    for ((point, vote), inlier) in voters.into_iter().zip(votes).zip(mask) {
        if inlier {
            inliers.push(point);
            inlier_votes.push(vote);
        } else {
            outliers.push(point);
        }
    }

    CenterEstimate {
        center: centroid(&inlier_votes),
        inliers,
        outliers,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::{assert_abs_diff_eq, assert_relative_eq};
    use crate::geometry::transform;

    fn grid() -> Vec<Point2<f32>> {
        let mut points = Vec::new();
        for row in 0..3 {
            for col in 0..3 {
                points.push(Point2::new(10.0 + col as f32 * 10.0, 10.0 + row as f32 * 10.0));
            }
        }
        points
    }

    fn tracked(points: &[Point2<f32>]) -> Vec<TrackedPoint> {
        points
            .iter()
            .enumerate()
            .map(|(i, p)| TrackedPoint { class: ClassId::object(i), location: *p })
            .collect()
    }

    #[test]
    fn test_pairwise_geometry() {
        let geometry = PairwiseGeometry::from_points(&[Point2::new(0.0, 0.0), Point2::new(3.0, 4.0)]);
        assert_eq!(geometry.len(), 2);
        assert_relative_eq!(geometry.distance(ClassId(1), ClassId(2)).unwrap(), 5.0);
        assert_relative_eq!(geometry.distance(ClassId(2), ClassId(1)).unwrap(), 5.0);
        let forward = geometry.angle(ClassId(1), ClassId(2)).unwrap();
        let backward = geometry.angle(ClassId(2), ClassId(1)).unwrap();
        assert_relative_eq!(bound_angle(backward - forward).abs(), std::f32::consts::PI, epsilon = 1e-6);
        assert_eq!(geometry.distance(ClassId::BACKGROUND, ClassId(1)), None);
        assert_eq!(geometry.angle(ClassId(3), ClassId(1)), None);
    }

    #[test]
    fn test_pair_samples_follow_point_order() {
        let geometry = PairwiseGeometry::from_points(&[
            Point2::new(0.0, 0.0),
            Point2::new(1.0, 0.0),
            Point2::new(0.0, 2.0),
        ]);
        let mut points = tracked(&[Point2::new(0.0, 0.0), Point2::new(2.0, 0.0), Point2::new(0.0, 6.0)]);
        // Not in the reference, so it contributes no samples.
        points.push(TrackedPoint { class: ClassId::object(7), location: Point2::new(5.0, 5.0) });

        let scales: Vec<f32> = pair_samples(&points, &geometry).iter().map(|s| s.0).collect();
        let expected = [2.0, 3.0, 2.0, 8.0f32.sqrt(), 3.0, 8.0f32.sqrt()];
        assert_eq!(scales.len(), expected.len());
        for (scale, want) in scales.iter().zip(expected) {
            assert_relative_eq!(*scale, want, epsilon = 1e-5);
        }
    }

    #[test]
    fn test_unchanged_points_give_identity() {
        let points = grid();
        let geometry = PairwiseGeometry::from_points(&points);
        let estimate = estimate_scale_rotation(&tracked(&points), &geometry, true, true).unwrap();
        assert_relative_eq!(estimate.scale, 1.0, epsilon = 1e-6);
        assert_abs_diff_eq!(estimate.rotation, 0.0, epsilon = 1e-6);
    }

    #[test]
    fn test_scaled_and_rotated_points() {
        let points = grid();
        let geometry = PairwiseGeometry::from_points(&points);
        let center = Point2::new(20.0, 20.0);
        let moved: Vec<Point2<f32>> = points
            .iter()
            .map(|p| center + transform(&(p - center), 1.5, 0.25))
            .collect();

        let estimate = estimate_scale_rotation(&tracked(&moved), &geometry, true, true).unwrap();
        assert_relative_eq!(estimate.scale, 1.5, epsilon = 1e-4);
        assert_relative_eq!(estimate.rotation, 0.25, epsilon = 1e-4);

        let fixed = estimate_scale_rotation(&tracked(&moved), &geometry, false, false).unwrap();
        assert_eq!(fixed, ScaleRotation::IDENTITY);
    }

    #[test]
    fn test_undefined_estimates() {
        let points = grid();
        let geometry = PairwiseGeometry::from_points(&points);
        assert_eq!(estimate_scale_rotation(&tracked(&points[..1]), &geometry, true, true), None);

        // Two points of the same class form no valid pair.
        let same = vec![
            TrackedPoint { class: ClassId(1), location: Point2::new(0.0, 0.0) },
            TrackedPoint { class: ClassId(1), location: Point2::new(5.0, 5.0) },
        ];
        assert_eq!(estimate_scale_rotation(&same, &geometry, true, true), None);

        // Coincident initial keypoints have no usable reference distance.
        let coincident = PairwiseGeometry::from_points(&[Point2::new(1.0, 1.0), Point2::new(1.0, 1.0)]);
        let pair = tracked(&[Point2::new(0.0, 0.0), Point2::new(2.0, 0.0)]);
        assert_eq!(estimate_scale_rotation(&pair, &coincident, true, true), None);
    }

    #[test]
    fn test_center_votes_and_outliers() {
        let points = grid();
        let center = Point2::new(20.0, 20.0);
        let springs: Vec<Vector2<f32>> = points.iter().map(|p| p - center).collect();

        let mut moved: Vec<Point2<f32>> = points.iter().map(|p| p + Vector2::new(5.0, 3.0)).collect();
        moved[4] += Vector2::new(100.0, 0.0);

        let result = estimate_center(&tracked(&moved), &springs, ScaleRotation::IDENTITY, 20.0);
        let c = result.center.unwrap();
        assert_relative_eq!(c.x, 25.0, epsilon = 1e-4);
        assert_relative_eq!(c.y, 23.0, epsilon = 1e-4);
        assert_eq!(result.inliers.len(), 8);
        assert_eq!(result.outliers.len(), 1);
        assert_eq!(result.outliers[0].class, ClassId::object(4));
        assert!(result.inliers.iter().all(|p| p.class != ClassId::object(4)));
    }

    #[test]
    fn test_center_of_nothing_is_undefined() {
        let result = estimate_center(&[], &[], ScaleRotation::IDENTITY, 20.0);
        assert_eq!(result.center, None);
        assert!(result.inliers.is_empty());
    }
}
