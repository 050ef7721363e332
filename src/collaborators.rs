//! Interfaces to the external algorithms the tracker is built on.
//!
//! Concrete detectors and flow providers are injected when the tracker is
//! constructed. The OpenCV-backed defaults live in `opencv_backend`.

use nalgebra::Point2;

use crate::error::{Error, Result};
use crate::frame::GrayFrame;
use crate::keypoint::{DetectedKeypoint, Descriptor, Keypoint};

/// Finds keypoints in a frame.
pub trait KeypointDetector {
    fn detect(&mut self, frame: &GrayFrame) -> Result<Vec<DetectedKeypoint>>;
}

/// Computes descriptors for detected keypoints.
///
/// Keypoints that cannot be described (e.g. too close to the border) may be
/// dropped; the returned keypoints carry their own locations.
pub trait DescriptorExtractor {
    fn extract(&mut self, frame: &GrayFrame, keypoints: &[DetectedKeypoint]) -> Result<Vec<Keypoint>>;
}

/// Forward flow of `points` from `prev` to `cur`, and the backward flow of
/// that result from `cur` to `prev`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FlowResult {
    pub forward: Vec<Point2<f32>>,
    pub backward: Vec<Point2<f32>>,
}

/// Optical-flow provider. A point the provider fails to follow should be
/// reported with non-finite coordinates.
pub trait OpticalFlow {
    fn compute(&mut self, prev: &GrayFrame, cur: &GrayFrame, points: &[Point2<f32>]) -> Result<FlowResult>;
}

/// One nearest-neighbour candidate: index into the reference set and its distance.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Neighbor {
    pub index: usize,
    pub distance: f32,
}

/// Nearest-neighbour index over a fixed set of reference descriptors.
pub trait DescriptorMatcher {
    fn build(reference: Vec<Descriptor>) -> Self
    where
        Self: Sized;

    /// Up to `k` neighbours per query, sorted by ascending distance (ties by index).
    fn knn_match(&self, queries: &[Descriptor], k: usize) -> Result<Vec<Vec<Neighbor>>>;

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Exhaustive matcher using [`Descriptor::distance`].
#[derive(Debug, Clone, Default)]
pub struct BruteForceMatcher {
    reference: Vec<Descriptor>,
}

impl DescriptorMatcher for BruteForceMatcher {
    fn build(reference: Vec<Descriptor>) -> Self {
        Self { reference }
    }

    fn knn_match(&self, queries: &[Descriptor], k: usize) -> Result<Vec<Vec<Neighbor>>> {
        if let Some(expected) = self.reference.first().map(Descriptor::len) {
            if let Some(bad) = queries.iter().find(|q| q.len() != expected) {
                return Err(Error::Matching(format!(
                    "query descriptor has length {}, index holds length {}",
                    bad.len(),
                    expected
                )));
            }
        }

        Ok(queries
            .iter()
            .map(|query| {
                let mut neighbors: Vec<Neighbor> = self
                    .reference
                    .iter()
                    .enumerate()
                    .map(|(index, r)| Neighbor {
                        index,
                        distance: query.distance(r),
                    })
                    .collect();
                neighbors.sort_by(|a, b| {
                    a.distance
                        .total_cmp(&b.distance)
                        .then(a.index.cmp(&b.index))
                });
                neighbors.truncate(k);
                neighbors
            })
            .collect())
    }

    fn len(&self) -> usize {
        self.reference.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_brute_force_knn() {
        let matcher = BruteForceMatcher::build(vec![
            Descriptor::Binary(vec![0b0000_0000]),
            Descriptor::Binary(vec![0b0000_0111]),
            Descriptor::Binary(vec![0b0000_0001]),
            Descriptor::Binary(vec![0b1111_1111]),
        ]);
        assert_eq!(matcher.len(), 4);

        let result = matcher
            .knn_match(&[Descriptor::Binary(vec![0b0000_0011])], 2)
            .unwrap();
        assert_eq!(result.len(), 1);
        // Equal distances are ordered by reference index.
        assert_eq!(
            result[0],
            vec![
                Neighbor { index: 1, distance: 1.0 },
                Neighbor { index: 2, distance: 1.0 },
            ]
        );
    }

    #[test]
    fn test_k_larger_than_index() {
        let matcher = BruteForceMatcher::build(vec![Descriptor::Float(vec![0.0, 0.0])]);
        let result = matcher
            .knn_match(&[Descriptor::Float(vec![3.0, 4.0]), Descriptor::Float(vec![0.0, 1.0])], 2)
            .unwrap();
        assert_eq!(result[0], vec![Neighbor { index: 0, distance: 5.0 }]);
        assert_eq!(result[1], vec![Neighbor { index: 0, distance: 1.0 }]);
    }

    #[test]
    fn test_empty_index_and_mismatched_queries() {
        let empty = BruteForceMatcher::build(Vec::new());
        assert!(empty.is_empty());
        let result = empty.knn_match(&[Descriptor::Binary(vec![1])], 2).unwrap();
        assert_eq!(result, vec![Vec::<Neighbor>::new()]);

        let matcher = BruteForceMatcher::build(vec![Descriptor::Binary(vec![0, 0])]);
        assert!(matches!(
            matcher.knn_match(&[Descriptor::Binary(vec![0])], 1),
            Err(Error::Matching(_))
        ));
    }
}
