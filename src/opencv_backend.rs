//! OpenCV implementations of the tracker's collaborators.

use nalgebra::Point2;
use opencv::{
    core::{KeyPoint, Mat, Point2f, Ptr, Size, TermCriteria, Vector},
    features2d::BRISK,
    imgproc,
    prelude::*,
    video::calc_optical_flow_pyr_lk,
};
use serde::{Deserialize, Serialize};

use crate::collaborators::{DescriptorExtractor, FlowResult, KeypointDetector, OpticalFlow};
use crate::error::{Error, Result};
use crate::frame::GrayFrame;
use crate::keypoint::{DetectedKeypoint, Descriptor, Keypoint};

/// BRISK detector parameters.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BriskConfig {
    pub threshold: i32,
    pub octaves: i32,
    pub pattern_scale: f32,
}

impl Default for BriskConfig {
    fn default() -> Self {
        Self {
            threshold: 30,
            octaves: 3,
            pattern_scale: 1.0,
        }
    }
}

/// BRISK keypoints and binary descriptors.
pub struct BriskFeatures {
    brisk: Ptr<BRISK>,
}

impl BriskFeatures {
    pub fn new(config: BriskConfig) -> Result<Self> {
        let brisk = BRISK::create(config.threshold, config.octaves, config.pattern_scale)?;
        Ok(Self { brisk })
    }
}

impl KeypointDetector for BriskFeatures {
    fn detect(&mut self, frame: &GrayFrame) -> Result<Vec<DetectedKeypoint>> {
        let image = frame_to_mat(frame)?;
        let mut keypoints = Vector::<KeyPoint>::new();
        self.brisk
            .detect(&image, &mut keypoints, &Mat::default())
            .map_err(|e| Error::Detection(e.to_string()))?;

        Ok(keypoints
            .iter()
            .map(|kp| DetectedKeypoint {
                location: Point2::new(kp.pt().x, kp.pt().y),
                size: kp.size(),
                response: kp.response(),
                octave: kp.octave(),
            })
            .collect())
    }
}

impl DescriptorExtractor for BriskFeatures {
    fn extract(&mut self, frame: &GrayFrame, keypoints: &[DetectedKeypoint]) -> Result<Vec<Keypoint>> {
        if keypoints.is_empty() {
            return Ok(Vec::new());
        }
        let image = frame_to_mat(frame)?;
        let mut cv_keypoints = Vector::<KeyPoint>::with_capacity(keypoints.len());
        for kp in keypoints {
            cv_keypoints.push(KeyPoint::new_coords(
                kp.location.x,
                kp.location.y,
                kp.size,
                -1.0,
                kp.response,
                kp.octave,
                -1,
            )?);
        }

        // BRISK drops keypoints too close to the border; the survivors come
        // back in `cv_keypoints`, one descriptor row each.
        let mut descriptors = Mat::default();
        self.brisk
            .compute(&image, &mut cv_keypoints, &mut descriptors)
            .map_err(|e| Error::Descriptor(e.to_string()))?;

        let mut described = Vec::with_capacity(cv_keypoints.len());
        for (row, kp) in cv_keypoints.iter().enumerate() {
            let bytes = descriptors.at_row::<u8>(row as i32)?;
            described.push(Keypoint::new(
                Point2::new(kp.pt().x, kp.pt().y),
                Descriptor::Binary(bytes.to_vec()),
            ));
        }
        Ok(described)
    }
}

/// Pyramidal Lucas-Kanade parameters.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LucasKanadeConfig {
    pub window: i32,
    pub max_level: i32,
    pub max_iterations: i32,
    pub epsilon: f64,
}

impl Default for LucasKanadeConfig {
    fn default() -> Self {
        Self {
            window: 21,
            max_level: 2,
            max_iterations: 10,
            epsilon: 0.03,
        }
    }
}

/// Pyramidal Lucas-Kanade flow, run forward and then backward.
pub struct LucasKanadeFlow {
    window: Size,
    max_level: i32,
    criteria: TermCriteria,
}

impl LucasKanadeFlow {
    pub fn new(config: LucasKanadeConfig) -> Result<Self> {
        let criteria = TermCriteria::new(
            opencv::core::TermCriteria_Type::COUNT as i32 | opencv::core::TermCriteria_Type::EPS as i32,
            config.max_iterations,
            config.epsilon,
        )?;
        Ok(Self {
            window: Size::new(config.window, config.window),
            max_level: config.max_level,
            criteria,
        })
    }

    /// Points whose status is 0 come back as NaN.
    fn flow(&self, from: &Mat, to: &Mat, points: &Vector<Point2f>) -> Result<Vector<Point2f>> {
        let mut next = Vector::<Point2f>::new();
        let mut status = Vector::<u8>::new();
        let mut err = Vector::<f32>::new();
        calc_optical_flow_pyr_lk(
            from,
            to,
            points,
            &mut next,
            &mut status,
            &mut err,
            self.window,
            self.max_level,
            self.criteria,
            0,
            1e-4,
        )
        .map_err(|e| Error::OpticalFlow(e.to_string()))?;

        Ok(next
            .iter()
            .zip(status.iter())
            .map(|(p, ok)| if ok != 0 { p } else { Point2f::new(f32::NAN, f32::NAN) })
            .collect())
    }

    /// Tracks the found forward points back into `prev`. Lost points are not
    /// handed to OpenCV and stay NaN.
    fn flow_back(&self, cur: &Mat, prev: &Mat, forward: &Vector<Point2f>) -> Result<Vec<Point2f>> {
        let found: Vec<usize> = forward
            .iter()
            .enumerate()
            .filter(|(_, p)| p.x.is_finite() && p.y.is_finite())
            .map(|(i, _)| i)
            .collect();
        if found.is_empty() {
            return Ok(scatter(forward.len(), &[], std::iter::empty()));
        }
        let retrack: Vector<Point2f> = found.iter().filter_map(|&i| forward.get(i).ok()).collect();
        let back = self.flow(cur, prev, &retrack)?;
        Ok(scatter(forward.len(), &found, back.iter()))
    }
}

/// `len` NaN points with `values` written into `slots`, in order.
fn scatter(len: usize, slots: &[usize], values: impl IntoIterator<Item = Point2f>) -> Vec<Point2f> {
    let mut out = vec![Point2f::new(f32::NAN, f32::NAN); len];
    for (&slot, value) in slots.iter().zip(values) {
        if let Some(p) = out.get_mut(slot) {
            *p = value;
        }
    }
    out
}

impl OpticalFlow for LucasKanadeFlow {
    fn compute(&mut self, prev: &GrayFrame, cur: &GrayFrame, points: &[Point2<f32>]) -> Result<FlowResult> {
        let prev = frame_to_mat(prev)?;
        let cur = frame_to_mat(cur)?;
        let start: Vector<Point2f> = points.iter().map(|p| Point2f::new(p.x, p.y)).collect();

        let forward = self.flow(&prev, &cur, &start)?;
        let backward = self.flow_back(&cur, &prev, &forward)?;

        Ok(FlowResult {
            forward: forward.iter().map(|p| Point2::new(p.x, p.y)).collect(),
            backward: backward.iter().map(|p| Point2::new(p.x, p.y)).collect(),
        })
    }
}

/// Owned single-channel `Mat` with the frame's samples.
pub fn frame_to_mat(frame: &GrayFrame) -> Result<Mat> {
    let view = Mat::new_rows_cols_with_data(frame.height() as i32, frame.width() as i32, frame.data())?;
    Ok(view.try_clone()?)
}

/// Converts a BGR or grayscale 8-bit `Mat` to a [`GrayFrame`].
pub fn mat_to_frame(image: &Mat) -> Result<GrayFrame> {
    let gray = match image.channels() {
        1 => image.try_clone()?,
        3 => {
            let mut gray = Mat::default();
            imgproc::cvt_color_def(image, &mut gray, imgproc::COLOR_BGR2GRAY)?;
            gray
        }
        4 => {
            let mut gray = Mat::default();
            imgproc::cvt_color_def(image, &mut gray, imgproc::COLOR_BGRA2GRAY)?;
            gray
        }
        n => return Err(Error::InvalidFrame(format!("unsupported channel count {n}"))),
    };
    let gray = if gray.is_continuous() { gray } else { gray.try_clone()? };
    GrayFrame::new(gray.cols() as usize, gray.rows() as usize, gray.data_bytes()?.to_vec())
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    /// Checkerboard with a horizontal ramp, so corners are trackable.
    fn textured(size: usize) -> GrayFrame {
        let mut frame = GrayFrame::filled(size, size, 0);
        for y in 0..size {
            for x in 0..size {
                let square = if (x / 8 + y / 8) % 2 == 0 { 180 } else { 20 };
                frame.set(x, y, square + (x % 7) as u8 * 5);
            }
        }
        frame
    }

    #[test]
    fn test_scatter_leaves_gaps_nan() {
        let out = scatter(4, &[1, 3], [Point2f::new(1.0, 2.0), Point2f::new(3.0, 4.0)]);
        assert!(out[0].x.is_nan() && out[2].y.is_nan());
        assert_eq!(out[1], Point2f::new(1.0, 2.0));
        assert_eq!(out[3], Point2f::new(3.0, 4.0));
    }

    #[test]
    fn test_backward_pass_skips_lost_points() {
        let flow = LucasKanadeFlow::new(LucasKanadeConfig::default()).unwrap();
        let mat = frame_to_mat(&textured(64)).unwrap();
        let forward: Vector<Point2f> =
            [Point2f::new(f32::NAN, f32::NAN), Point2f::new(32.0, 32.0)].into_iter().collect();

        let back = flow.flow_back(&mat, &mat, &forward).unwrap();
        assert_eq!(back.len(), 2);
        assert!(back[0].x.is_nan() && back[0].y.is_nan());
        assert_abs_diff_eq!(back[1].x, 32.0, epsilon = 0.5);
        assert_abs_diff_eq!(back[1].y, 32.0, epsilon = 0.5);

        let all_lost: Vector<Point2f> = [Point2f::new(f32::NAN, f32::NAN)].into_iter().collect();
        let back = flow.flow_back(&mat, &mat, &all_lost).unwrap();
        assert_eq!(back.len(), 1);
        assert!(back[0].x.is_nan());
    }
}
