//! Keypoint records and the class-indexed active set.

use nalgebra::Point2;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Stable identity of an object keypoint. Object classes start at 1; 0 is background.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ClassId(pub u32);

impl ClassId {
    pub const BACKGROUND: ClassId = ClassId(0);

    /// Class id for the `index`-th object keypoint (0-based).
    pub fn object(index: usize) -> Self {
        ClassId(index as u32 + 1)
    }

    pub fn is_background(&self) -> bool {
        self.0 == 0
    }

    /// 0-based row into per-class model tables. `None` for background.
    pub fn index(&self) -> Option<usize> {
        (self.0 as usize).checked_sub(1)
    }
}

impl fmt::Display for ClassId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Keypoint descriptor. Binary descriptors compare by Hamming distance,
/// float descriptors by Euclidean distance.
#[derive(Debug, Clone, PartialEq)]
pub enum Descriptor {
    Binary(Vec<u8>),
    Float(Vec<f32>),
}

impl Descriptor {
    pub fn len(&self) -> usize {
        match self {
            Descriptor::Binary(bytes) => bytes.len(),
            Descriptor::Float(values) => values.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Distance to `other`; infinite when the descriptors are of different kind or length.
    pub fn distance(&self, other: &Descriptor) -> f32 {
        match (self, other) {
            (Descriptor::Binary(a), Descriptor::Binary(b)) if a.len() == b.len() => a
                .iter()
                .zip(b)
                .map(|(x, y)| (x ^ y).count_ones())
                .sum::<u32>() as f32,
            (Descriptor::Float(a), Descriptor::Float(b)) if a.len() == b.len() => a
                .iter()
                .zip(b)
                .map(|(x, y)| (x - y) * (x - y))
                .sum::<f32>()
                .sqrt(),
            _ => f32::INFINITY,
        }
    }
}

/// Raw detector output, before description.
#[derive(Debug, Clone, PartialEq)]
pub struct DetectedKeypoint {
    pub location: Point2<f32>,
    pub size: f32,
    pub response: f32,
    pub octave: i32,
}

impl DetectedKeypoint {
    pub fn at(x: f32, y: f32) -> Self {
        Self {
            location: Point2::new(x, y),
            size: 0.0,
            response: 0.0,
            octave: 0,
        }
    }
}

/// A described keypoint: location plus descriptor.
#[derive(Debug, Clone, PartialEq)]
pub struct Keypoint {
    pub location: Point2<f32>,
    pub descriptor: Descriptor,
}

impl Keypoint {
    pub fn new(location: Point2<f32>, descriptor: Descriptor) -> Self {
        Self { location, descriptor }
    }
}

/// A keypoint believed to belong to the object in the current frame.
#[derive(Debug, Clone, PartialEq)]
pub struct ActiveKeypoint {
    pub location: Point2<f32>,
    /// Most recent observed descriptor for this class.
    pub descriptor: Descriptor,
}

/// Active keypoints keyed by class id; at most one entry per class.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ActiveKeypointSet {
    entries: BTreeMap<ClassId, ActiveKeypoint>,
}

impl ActiveKeypointSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Inserts or replaces the entry for `class`.
    pub fn insert(&mut self, class: ClassId, location: Point2<f32>, descriptor: Descriptor) {
        self.entries
            .insert(class, ActiveKeypoint { location, descriptor });
    }

    pub fn get(&self, class: ClassId) -> Option<&ActiveKeypoint> {
        self.entries.get(&class)
    }

    pub fn contains(&self, class: ClassId) -> bool {
        self.entries.contains_key(&class)
    }

    pub fn remove(&mut self, class: ClassId) -> Option<ActiveKeypoint> {
        self.entries.remove(&class)
    }

    /// Entries in ascending class order.
    pub fn iter(&self) -> impl Iterator<Item = (ClassId, &ActiveKeypoint)> {
        self.entries.iter().map(|(c, kp)| (*c, kp))
    }

    pub fn classes(&self) -> impl Iterator<Item = ClassId> + '_ {
        self.entries.keys().copied()
    }

    pub fn locations(&self) -> Vec<Point2<f32>> {
        self.entries.values().map(|kp| kp.location).collect()
    }
}
