use opencv::{
    core::{Point, Rect as CvRect, Scalar},
    imgproc,
    prelude::*,
};

use nalgebra::Point2;

use crate::collaborators::DescriptorMatcher;
use crate::geometry::Rect;
use crate::optical_flow::TrackedPoint;
use crate::tracker::{CmtTracker, FrameResult};

// BGR
const BOX_VALID: Scalar = Scalar::new(0.0, 255.0, 0.0, 0.0);
const ACTIVE: Scalar = Scalar::new(255.0, 255.0, 255.0, 0.0);
const INLIER: Scalar = Scalar::new(255.0, 128.0, 0.0, 0.0);
const OUTLIER: Scalar = Scalar::new(0.0, 0.0, 255.0, 0.0);

const TEXT_OUTLINE: Scalar = Scalar::new(0.0, 0.0, 0.0, 0.0);
const TEXT_PLAIN: Scalar = Scalar::new(255.0, 255.0, 255.0, 0.0);
const TEXT_LOST: Scalar = Scalar::new(0.0, 0.0, 255.0, 0.0);

/// Text with a dark outline so it stays readable on any background.
pub fn draw_text(frame: &mut Mat, text: &str, origin: Point, font_scale: f64, color: Scalar) -> opencv::Result<()> {
    for (layer, thickness) in [(TEXT_OUTLINE, 3), (color, 1)] {
        imgproc::put_text(
            frame,
            text,
            origin,
            imgproc::FONT_HERSHEY_SIMPLEX,
            font_scale,
            layer,
            thickness,
            imgproc::LINE_8,
            false,
        )?;
    }
    Ok(())
}

pub fn draw_box(frame: &mut Mat, rect: &Rect, color: Scalar) -> opencv::Result<()> {
    let [x, y, w, h] = rect.to_pixel_rect();
    imgproc::rectangle(frame, CvRect::new(x, y, w, h), color, 2, imgproc::LINE_8, 0)
}

pub fn draw_points(
    frame: &mut Mat,
    points: impl IntoIterator<Item = Point2<f32>>,
    radius: i32,
    color: Scalar,
) -> opencv::Result<()> {
    for p in points {
        let center = Point::new(p.x.round() as i32, p.y.round() as i32);
        imgproc::circle(frame, center, radius, color, -1, imgproc::LINE_8, 0)?;
    }
    Ok(())
}

fn locations(points: &[TrackedPoint]) -> impl Iterator<Item = Point2<f32>> + '_ {
    points.iter().map(|p| p.location)
}

/// Bounding box, then active keypoints, inliers and outliers on top.
pub fn draw_tracking_result<M: DescriptorMatcher>(
    frame: &mut Mat,
    tracker: &CmtTracker<M>,
    result: &FrameResult,
) -> opencv::Result<()> {
    if let Some(rect) = &result.bounding_box {
        draw_box(frame, rect, BOX_VALID)?;
    }
    draw_points(frame, tracker.active_keypoints().locations(), 3, ACTIVE)?;
    draw_points(frame, locations(tracker.inliers()), 2, INLIER)?;
    draw_points(frame, locations(tracker.outliers()), 2, OUTLIER)?;
    Ok(())
}

pub fn draw_frame_info(frame: &mut Mat, frame_id: i32, fps: f64, result: &FrameResult) -> opencv::Result<()> {
    let text = format!("Frame: {} FPS: {:.1}", frame_id, fps);
    draw_text(frame, &text, Point::new(10, 30), 0.6, TEXT_PLAIN)?;

    if !result.valid {
        draw_text(frame, "LOST", Point::new(10, 60), 0.8, TEXT_LOST)?;
    } else if let (Some(scale), Some(rotation)) = (result.scale, result.rotation) {
        let text = format!("scale {:.2} rot {:.1} deg", scale, rotation.to_degrees());
        draw_text(frame, &text, Point::new(10, 60), 0.6, BOX_VALID)?;
    }
    Ok(())
}
