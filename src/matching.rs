//! Descriptor matching against the object model and per-class consensus.
//!
//! Newly detected keypoints are matched against the global index (object and
//! background keypoints) and, once a center is known, against the object
//! index with a spring-consistency weight. Accepted candidates compete per
//! class; tracked keypoints fill the classes nobody claimed.

use std::collections::BTreeMap;

use nalgebra::{Point2, Vector2};
use tracing::debug;

use crate::collaborators::{DescriptorMatcher, Neighbor};
use crate::config::TrackerConfig;
use crate::error::Result;
use crate::keypoint::{ActiveKeypointSet, ClassId, Descriptor, Keypoint};
use crate::optical_flow::TrackedPoint;

/// A descriptor index whose entries carry class ids.
#[derive(Debug, Clone)]
pub struct LabelledIndex<M> {
    matcher: M,
    classes: Vec<ClassId>,
}

impl<M: DescriptorMatcher> LabelledIndex<M> {
    /// `classes[i]` is the class of `descriptors[i]`.
    pub fn build(descriptors: Vec<Descriptor>, classes: Vec<ClassId>) -> Self {
        Self {
            matcher: M::build(descriptors),
            classes,
        }
    }

    pub fn len(&self) -> usize {
        self.classes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.classes.is_empty()
    }

    pub fn classes(&self) -> &[ClassId] {
        &self.classes
    }

    fn class_of(&self, neighbor: &Neighbor) -> Option<ClassId> {
        self.classes.get(neighbor.index).copied()
    }
}

/// Where a matched keypoint must lie for its class to be plausible: within
/// the cluster threshold of `center + spring`, with springs already
/// transformed by the current scale and rotation.
#[derive(Debug, Clone)]
pub struct SpringConstraint {
    pub center: Point2<f32>,
    pub springs: Vec<Vector2<f32>>,
}

impl SpringConstraint {
    fn weight(&self, class: ClassId, location: &Point2<f32>, threshold: f32) -> f32 {
        let relative = location - self.center;
        match class.index().and_then(|i| self.springs.get(i)) {
            Some(spring) if (spring - relative).norm() < threshold => 1.0,
            _ => 0.0,
        }
    }
}

/// A detected keypoint accepted as an observation of an object class.
#[derive(Debug, Clone, PartialEq)]
pub struct Candidate {
    pub class: ClassId,
    pub location: Point2<f32>,
    pub descriptor: Descriptor,
    pub confidence: f32,
}

/// Best candidate per class. A new candidate replaces the current one only
/// with strictly higher confidence.
#[derive(Debug, Clone, Default)]
pub struct CandidateSet {
    by_class: BTreeMap<ClassId, Candidate>,
}

impl CandidateSet {
    pub fn offer(&mut self, candidate: Candidate) -> bool {
        match self.by_class.get(&candidate.class) {
            Some(current) if current.confidence >= candidate.confidence => false,
            _ => {
                self.by_class.insert(candidate.class, candidate);
                true
            }
        }
    }

    pub fn len(&self) -> usize {
        self.by_class.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_class.is_empty()
    }

    pub fn get(&self, class: ClassId) -> Option<&Candidate> {
        self.by_class.get(&class)
    }

    /// Builds the next active set: every candidate, plus each carried point
    /// whose class no candidate claimed. Carried points keep the descriptor
    /// they had in `previous`.
    pub fn merge_tracked(self, carried: &[TrackedPoint], previous: &ActiveKeypointSet) -> ActiveKeypointSet {
        let mut active = ActiveKeypointSet::new();
        for (class, candidate) in &self.by_class {
            active.insert(*class, candidate.location, candidate.descriptor.clone());
        }
        for point in carried {
            if active.contains(point.class) {
                continue;
            }
            if let Some(kp) = previous.get(point.class) {
                active.insert(point.class, point.location, kp.descriptor.clone());
            }
        }
        active
    }
}

/// Matches `detected` keypoints and returns the per-class winners.
///
/// `object` is the object index together with its spring constraint; pass
/// `None` when the current center is undefined.
pub fn match_keypoints<M: DescriptorMatcher>(
    detected: &[Keypoint],
    global: &LabelledIndex<M>,
    object: Option<(&LabelledIndex<M>, &SpringConstraint)>,
    config: &TrackerConfig,
) -> Result<CandidateSet> {
    let mut candidates = CandidateSet::default();
    if detected.is_empty() {
        return Ok(candidates);
    }

    let queries: Vec<Descriptor> = detected.iter().map(|kp| kp.descriptor.clone()).collect();
    let global_matches = global.matcher.knn_match(&queries, 2)?;
    let object_matches = match object {
        Some((index, _)) => Some(index.matcher.knn_match(&queries, index.len())?),
        None => None,
    };

    let mut from_global = 0usize;
    let mut from_object = 0usize;
    for (i, keypoint) in detected.iter().enumerate() {
        let neighbors = global_matches.get(i).map(Vec::as_slice).unwrap_or(&[]);
        if let Some(candidate) = best_global(keypoint, neighbors, global, config) {
            if candidates.offer(candidate) {
                from_global += 1;
            }
        }

        if let (Some((index, constraint)), Some(all)) = (object, object_matches.as_ref()) {
            let neighbors = all.get(i).map(Vec::as_slice).unwrap_or(&[]);
            if let Some(candidate) = best_weighted(keypoint, neighbors, index, constraint, config) {
                if candidates.offer(candidate) {
                    from_object += 1;
                }
            }
        }
    }

    debug!(
        detected = detected.len(),
        from_global,
        from_object,
        matched = candidates.len(),
        "descriptor matching"
    );
    Ok(candidates)
}

fn confidence(distance: f32, config: &TrackerConfig) -> f32 {
    1.0 - distance / config.matching_confidence_scale_factor
}

/// Lowe ratio plus absolute confidence test. NaN ratios fail.
fn passes(best: f32, second: f32, config: &TrackerConfig) -> bool {
    let ratio = (1.0 - best) / (1.0 - second);
    ratio < config.matching_confidence_ratio && best > config.matching_confidence_threshold
}

fn best_global<M: DescriptorMatcher>(
    keypoint: &Keypoint,
    neighbors: &[Neighbor],
    index: &LabelledIndex<M>,
    config: &TrackerConfig,
) -> Option<Candidate> {
    let (best, second) = match neighbors {
        [best, second, ..] => (best, second),
        _ => return None,
    };
    let class = index.class_of(best)?;
    let best_conf = confidence(best.distance, config);
    let second_conf = confidence(second.distance, config);
    if class.is_background() || !passes(best_conf, second_conf, config) {
        return None;
    }
    Some(Candidate {
        class,
        location: keypoint.location,
        descriptor: keypoint.descriptor.clone(),
        confidence: best_conf,
    })
}

fn best_weighted<M: DescriptorMatcher>(
    keypoint: &Keypoint,
    neighbors: &[Neighbor],
    index: &LabelledIndex<M>,
    constraint: &SpringConstraint,
    config: &TrackerConfig,
) -> Option<Candidate> {
    let threshold = config.cluster_outlier_threshold;
    let mut weighted: Vec<(ClassId, f32)> = neighbors
        .iter()
        .filter_map(|n| {
            let class = index.class_of(n)?;
            // Out-of-place neighbours score zero even at infinite distance.
            let weighted = match constraint.weight(class, &keypoint.location, threshold) {
                w if w > 0.0 => confidence(n.distance, config) * w,
                _ => 0.0,
            };
            Some((class, weighted))
        })
        .collect();
    // Stable sort keeps distance order among equal weighted confidences.
    weighted.sort_by(|a, b| b.1.total_cmp(&a.1));

    let ((class, best), (_, second)) = match weighted.as_slice() {
        [best, second, ..] => (*best, *second),
        _ => return None,
    };
    if class.is_background() || !passes(best, second, config) {
        return None;
    }
    Some(Candidate {
        class,
        location: keypoint.location,
        descriptor: keypoint.descriptor.clone(),
        confidence: best,
    })
}
