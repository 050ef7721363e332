//! Single-linkage agglomerative clustering on cluster centroids.
//!
//! The same algorithm runs over 2D points ([`Point2<f32>`]) and n-dimensional
//! feature vectors ([`DVector<f32>`]); only the centroid metric differs.

use nalgebra::{DVector, Point2};

#[cfg(feature = "parallel")]
use rayon::prelude::*;

/// A value that can act as a cluster member and centroid.
pub trait ClusterPoint: Clone + Send + Sync {
    fn distance(&self, other: &Self) -> f32;

    /// Centroid after `point` joins as the `count`-th member.
    fn running_mean(&self, point: &Self, count: usize) -> Self;
}

impl ClusterPoint for Point2<f32> {
    fn distance(&self, other: &Self) -> f32 {
        (other - self).norm()
    }

    fn running_mean(&self, point: &Self, count: usize) -> Self {
        self + (point - self) / count as f32
    }
}

impl ClusterPoint for DVector<f32> {
    fn distance(&self, other: &Self) -> f32 {
        (other - self).norm()
    }

    fn running_mean(&self, point: &Self, count: usize) -> Self {
        self + (point - self) / count as f32
    }
}

/// Labelled members with an incrementally maintained centroid.
#[derive(Debug, Clone)]
pub struct Cluster<P, L> {
    points: Vec<P>,
    labels: Vec<L>,
    centroid: P,
}

impl<P: ClusterPoint, L: Clone + PartialEq> Cluster<P, L> {
    pub fn new(point: P, label: L) -> Self {
        Self {
            centroid: point.clone(),
            points: vec![point],
            labels: vec![label],
        }
    }

    pub fn add(&mut self, point: P, label: L) {
        self.centroid = self.centroid.running_mean(&point, self.points.len() + 1);
        self.points.push(point);
        self.labels.push(label);
    }

    /// Absorbs every member of `other`, one point at a time.
    pub fn merge(&mut self, other: Cluster<P, L>) {
        for (point, label) in other.points.into_iter().zip(other.labels) {
            self.add(point, label);
        }
    }

    pub fn centroid(&self) -> &P {
        &self.centroid
    }

    pub fn members(&self) -> usize {
        self.points.len()
    }

    pub fn points(&self) -> &[P] {
        &self.points
    }

    pub fn labels(&self) -> &[L] {
        &self.labels
    }

    pub fn includes(&self, label: &L) -> bool {
        self.labels.contains(label)
    }

    pub fn distance_from(&self, other: &Self) -> f32 {
        self.centroid.distance(&other.centroid)
    }
}

/// Agglomerative clustering with a maximum merge distance.
#[derive(Debug, Clone, Copy)]
pub struct Clusterer {
    pub max_distance: f32,
}

impl Clusterer {
    pub fn new(max_distance: f32) -> Self {
        Self { max_distance }
    }

    /// Merges the closest pair of clusters until no pair is closer than
    /// `max_distance`. A merged cluster moves to the end of the list, which
    /// decides the tie-break in [`Self::cluster_inliers`].
    pub fn clusterize<P, L>(&self, mut clusters: Vec<Cluster<P, L>>) -> Vec<Cluster<P, L>>
    where
        P: ClusterPoint,
        L: Clone + PartialEq + Send + Sync,
    {
        while clusters.len() > 1 {
            match closest_pair(&clusters) {
                Some((i, j, dist)) if dist < self.max_distance => {
                    // j > i, so removing j first leaves i in place.
                    let second = clusters.remove(j);
                    let mut merged = clusters.remove(i);
                    merged.merge(second);
                    clusters.push(merged);
                }
                _ => break,
            }
        }
        clusters
    }

    /// Singleton clusters, one per point.
    pub fn create_clusters<P, L>(&self, points: &[P], labels: &[L]) -> Vec<Cluster<P, L>>
    where
        P: ClusterPoint,
        L: Clone + PartialEq + Send + Sync,
    {
        let initial = points
            .iter()
            .zip(labels)
            .map(|(p, l)| Cluster::new(p.clone(), l.clone()))
            .collect();
        self.clusterize(initial)
    }

    /// Mask of the points that fall in the largest cluster.
    pub fn cluster_inliers<P: ClusterPoint>(&self, points: &[P]) -> Vec<bool> {
        let labels: Vec<usize> = (0..points.len()).collect();
        let clusters = self.create_clusters(points, &labels);
        match largest(&clusters) {
            Some(best) => labels.iter().map(|l| best.includes(l)).collect(),
            None => Vec::new(),
        }
    }

    /// Like [`Self::cluster_inliers`], but points sharing a label start in the
    /// same cluster and are accepted or rejected together.
    pub fn cluster_inliers_labelled<P, L>(&self, points: &[P], labels: &[L]) -> Vec<bool>
    where
        P: ClusterPoint,
        L: Clone + PartialEq + Send + Sync,
    {
        let mut groups: Vec<Cluster<P, L>> = Vec::new();
        for (point, label) in points.iter().zip(labels) {
            match groups.iter_mut().find(|c| c.labels[0] == *label) {
                Some(group) => group.add(point.clone(), label.clone()),
                None => groups.push(Cluster::new(point.clone(), label.clone())),
            }
        }
        let clusters = self.clusterize(groups);
        match largest(&clusters) {
            Some(best) => labels.iter().take(points.len()).map(|l| best.includes(l)).collect(),
            None => Vec::new(),
        }
    }
}

/// Cluster with the most members; the first one wins ties.
fn largest<P: ClusterPoint, L: Clone + PartialEq>(clusters: &[Cluster<P, L>]) -> Option<&Cluster<P, L>> {
    let mut best: Option<&Cluster<P, L>> = None;
    for c in clusters {
        if best.map_or(true, |b| c.members() > b.members()) {
            best = Some(c);
        }
    }
    best
}

/// Closest centroid pair `(i, j, distance)` with `i < j`; ties go to the
/// lexicographically first pair.
#[cfg(not(feature = "parallel"))]
fn closest_pair<P, L>(clusters: &[Cluster<P, L>]) -> Option<(usize, usize, f32)>
where
    P: ClusterPoint,
    L: Clone + PartialEq,
{
    let mut best: Option<(usize, usize, f32)> = None;
    for i in 0..clusters.len() {
        for j in (i + 1)..clusters.len() {
            let dist = clusters[i].distance_from(&clusters[j]);
            if best.map_or(dist.is_finite(), |(_, _, d)| dist < d) {
                best = Some((i, j, dist));
            }
        }
    }
    best
}

#[cfg(feature = "parallel")]
fn closest_pair<P, L>(clusters: &[Cluster<P, L>]) -> Option<(usize, usize, f32)>
where
    P: ClusterPoint,
    L: Clone + PartialEq + Send + Sync,
{
    (0..clusters.len())
        .into_par_iter()
        .flat_map_iter(|i| {
            ((i + 1)..clusters.len()).map(move |j| (i, j, clusters[i].distance_from(&clusters[j])))
        })
        .filter(|(_, _, d)| d.is_finite())
        .min_by(|a, b| {
            a.2.partial_cmp(&b.2)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then((a.0, a.1).cmp(&(b.0, b.1)))
        })
}
