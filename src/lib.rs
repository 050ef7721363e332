//! Consensus-based Matching and Tracking (CMT) of a single object.
//!
//! The tracker learns a sparse keypoint model of the object inside an
//! initial region of interest, then follows it from frame to frame with
//! forward-backward optical flow, re-detects lost keypoints by descriptor
//! matching, and rejects outliers by voting for the object center.
//!
//! Keypoint detection, description and optical flow are supplied through
//! the traits in [`collaborators`]. With the `opencv` feature, BRISK and
//! pyramidal Lucas-Kanade implementations are available in `opencv_backend`.

pub mod cluster;
pub mod collaborators;
pub mod config;
pub mod error;
pub mod estimation;
pub mod frame;
pub mod geometry;
pub mod keypoint;
pub mod matching;
pub mod optical_flow;
pub mod tracker;

#[cfg(feature = "opencv")]
pub mod opencv_backend;
#[cfg(feature = "opencv")]
pub mod visualization;

// Re-export main types
pub use crate::collaborators::{
    BruteForceMatcher, DescriptorExtractor, DescriptorMatcher, FlowResult, KeypointDetector, Neighbor, OpticalFlow,
};
pub use crate::config::TrackerConfig;
pub use crate::error::{Error, Result};
pub use crate::estimation::ScaleRotation;
pub use crate::frame::GrayFrame;
pub use crate::geometry::Rect;
pub use crate::keypoint::{ActiveKeypoint, ActiveKeypointSet, ClassId, DetectedKeypoint, Descriptor, Keypoint};
pub use crate::optical_flow::TrackedPoint;
pub use crate::tracker::{CmtTracker, FrameResult, ObjectModel, ObjectState};
