//! Scripted collaborators for end-to-end tracker tests.
//!
//! A [`Scene`] is a list of frames, each a list of labelled points. The frame
//! index is written into pixel (0, 0) of the generated [`GrayFrame`], so the
//! detector and flow provider know which scripted frame they are looking at.
//! Points keep their identity across frames through `id`.

#![allow(dead_code)]

use std::sync::Arc;

use cmtrack::{
    CmtTracker, DescriptorExtractor, DetectedKeypoint, Descriptor, Error, FlowResult, GrayFrame, Keypoint,
    KeypointDetector, OpticalFlow, Result, TrackerConfig,
};
use nalgebra::Point2;

pub const FRAME_SIZE: usize = 200;

#[derive(Debug, Clone, PartialEq)]
pub struct ScenePoint {
    pub id: u32,
    pub location: Point2<f32>,
    /// Whether the detector reports this point. Flow follows it either way.
    pub detectable: bool,
}

#[derive(Debug, Clone, Default)]
pub struct Scene {
    frames: Vec<Vec<ScenePoint>>,
    failing_flow: Vec<usize>,
}

impl Scene {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a frame and returns its index.
    pub fn push_frame(&mut self, points: Vec<ScenePoint>) -> usize {
        self.frames.push(points);
        self.frames.len() - 1
    }

    /// Makes the flow provider fail when asked to track into frame `index`.
    pub fn fail_flow_into(&mut self, index: usize) {
        self.failing_flow.push(index);
    }

    pub fn frame(&self, index: usize) -> GrayFrame {
        let mut frame = GrayFrame::filled(FRAME_SIZE, FRAME_SIZE, 0);
        frame.set(0, 0, index as u8);
        frame
    }

    pub fn points(&self, index: usize) -> &[ScenePoint] {
        &self.frames[index]
    }

    fn points_of(&self, frame: &GrayFrame) -> &[ScenePoint] {
        frame
            .get(0, 0)
            .and_then(|i| self.frames.get(i as usize))
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn tracker(self, config: TrackerConfig) -> CmtTracker {
        let scene = Arc::new(self);
        CmtTracker::new(
            Box::new(ScriptedDetector(scene.clone())),
            Box::new(ScriptedExtractor(scene.clone())),
            Box::new(ScriptedFlow(scene)),
            config,
        )
        .expect("valid config")
    }
}

/// Deterministic 64-byte binary descriptor for a point id.
pub fn descriptor(id: u32) -> Descriptor {
    let mut state = (id as u64 + 1).wrapping_mul(0x9E37_79B9_7F4A_7C15);
    let mut bytes = Vec::with_capacity(64);
    for _ in 0..64 {
        state ^= state << 13;
        state ^= state >> 7;
        state ^= state << 17;
        bytes.push((state >> 24) as u8);
    }
    Descriptor::Binary(bytes)
}

/// `cols` x `rows` grid starting at `origin`, ids from `first_id` row by row.
pub fn grid(cols: usize, rows: usize, origin: (f32, f32), spacing: f32, first_id: u32) -> Vec<ScenePoint> {
    let mut points = Vec::with_capacity(cols * rows);
    for row in 0..rows {
        for col in 0..cols {
            points.push(ScenePoint {
                id: first_id + (row * cols + col) as u32,
                location: Point2::new(origin.0 + col as f32 * spacing, origin.1 + row as f32 * spacing),
                detectable: true,
            });
        }
    }
    points
}

/// Same points, moved by `f`.
pub fn moved(points: &[ScenePoint], f: impl Fn(Point2<f32>) -> Point2<f32>) -> Vec<ScenePoint> {
    points
        .iter()
        .map(|p| ScenePoint {
            location: f(p.location),
            ..p.clone()
        })
        .collect()
}

fn locate(points: &[ScenePoint], at: &Point2<f32>) -> Option<u32> {
    points
        .iter()
        .find(|p| (p.location - at).norm() < 0.5)
        .map(|p| p.id)
}

fn position(points: &[ScenePoint], id: u32) -> Option<Point2<f32>> {
    points.iter().find(|p| p.id == id).map(|p| p.location)
}

struct ScriptedDetector(Arc<Scene>);

impl KeypointDetector for ScriptedDetector {
    fn detect(&mut self, frame: &GrayFrame) -> Result<Vec<DetectedKeypoint>> {
        Ok(self
            .0
            .points_of(frame)
            .iter()
            .filter(|p| p.detectable)
            .map(|p| DetectedKeypoint::at(p.location.x, p.location.y))
            .collect())
    }
}

struct ScriptedExtractor(Arc<Scene>);

impl DescriptorExtractor for ScriptedExtractor {
    fn extract(&mut self, frame: &GrayFrame, keypoints: &[DetectedKeypoint]) -> Result<Vec<Keypoint>> {
        let points = self.0.points_of(frame);
        Ok(keypoints
            .iter()
            .filter_map(|kp| {
                let id = locate(points, &kp.location)?;
                Some(Keypoint::new(kp.location, descriptor(id)))
            })
            .collect())
    }
}

struct ScriptedFlow(Arc<Scene>);

impl OpticalFlow for ScriptedFlow {
    fn compute(&mut self, prev: &GrayFrame, cur: &GrayFrame, points: &[Point2<f32>]) -> Result<FlowResult> {
        if let Some(index) = cur.get(0, 0) {
            if self.0.failing_flow.contains(&(index as usize)) {
                return Err(Error::OpticalFlow(format!("scripted failure into frame {index}")));
            }
        }

        let before = self.0.points_of(prev);
        let after = self.0.points_of(cur);
        let lost = Point2::new(f32::NAN, f32::NAN);

        let forward: Vec<Point2<f32>> = points
            .iter()
            .map(|p| {
                locate(before, p)
                    .and_then(|id| position(after, id))
                    .unwrap_or(lost)
            })
            .collect();
        let backward = forward
            .iter()
            .map(|p| {
                locate(after, p)
                    .and_then(|id| position(before, id))
                    .unwrap_or(lost)
            })
            .collect();

        Ok(FlowResult { forward, backward })
    }
}
