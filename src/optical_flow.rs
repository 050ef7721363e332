//! Forward-backward point tracking on top of an [`OpticalFlow`] provider.

use nalgebra::Point2;
use tracing::debug;

use crate::collaborators::OpticalFlow;
use crate::error::{Error, Result};
use crate::frame::GrayFrame;
use crate::keypoint::ClassId;

/// A keypoint that survived optical-flow tracking into the current frame.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TrackedPoint {
    pub class: ClassId,
    pub location: Point2<f32>,
}

/// Tracks `points` from `prev` to `cur` and keeps only those whose backward
/// projection lands within `error_threshold` of the start on both axes.
///
/// Output order follows input order.
pub fn track_points(
    flow: &mut dyn OpticalFlow,
    prev: &GrayFrame,
    cur: &GrayFrame,
    points: &[(ClassId, Point2<f32>)],
    error_threshold: f32,
) -> Result<Vec<TrackedPoint>> {
    if points.is_empty() {
        return Ok(Vec::new());
    }

    let locations: Vec<Point2<f32>> = points.iter().map(|(_, p)| *p).collect();
    let result = flow.compute(prev, cur, &locations)?;
    if result.forward.len() != points.len() || result.backward.len() != points.len() {
        return Err(Error::OpticalFlow(format!(
            "requested {} points, provider returned {} forward and {} backward",
            points.len(),
            result.forward.len(),
            result.backward.len()
        )));
    }

    let tracked: Vec<TrackedPoint> = points
        .iter()
        .zip(result.forward.iter().zip(&result.backward))
        .filter_map(|(&(class, original), (forward, backward))| {
            if !is_finite(forward) || !is_finite(backward) {
                return None;
            }
            let err_x = (backward.x - original.x).abs();
            let err_y = (backward.y - original.y).abs();
            (err_x <= error_threshold && err_y <= error_threshold).then_some(TrackedPoint {
                class,
                location: *forward,
            })
        })
        .collect();

    debug!(
        requested = points.len(),
        tracked = tracked.len(),
        "forward-backward flow"
    );
    Ok(tracked)
}

fn is_finite(p: &Point2<f32>) -> bool {
    p.x.is_finite() && p.y.is_finite()
}
