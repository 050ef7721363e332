//! The CMT tracker: object model, per-frame state and the frame pipeline.

use nalgebra::{Point2, Vector2};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::collaborators::{BruteForceMatcher, DescriptorExtractor, DescriptorMatcher, KeypointDetector, OpticalFlow};
use crate::config::TrackerConfig;
use crate::error::{Error, Result};
use crate::estimation::{estimate_center, estimate_scale_rotation, CenterEstimate, PairwiseGeometry, ScaleRotation};
use crate::frame::GrayFrame;
use crate::geometry::{centroid, transform, transform_all, Rect};
use crate::keypoint::{ActiveKeypointSet, ClassId, Descriptor, Keypoint};
use crate::matching::{match_keypoints, LabelledIndex, SpringConstraint};
use crate::optical_flow::{track_points, TrackedPoint};

/// Everything learned about the object at initialization. Never changes
/// until the tracker is reset.
#[derive(Debug, Clone)]
pub struct ObjectModel<M> {
    springs: Vec<Vector2<f32>>,
    descriptors: Vec<Descriptor>,
    geometry: PairwiseGeometry,
    initial_center: Point2<f32>,
    /// ROI corners relative to the initial center: TL, TR, BR, BL.
    corner_offsets: [Vector2<f32>; 4],
    global: LabelledIndex<M>,
}

impl<M: DescriptorMatcher> ObjectModel<M> {
    /// `None` when there are no object keypoints.
    pub fn build(object: &[Keypoint], background: &[Keypoint], roi: &Rect) -> Option<Self> {
        let locations: Vec<Point2<f32>> = object.iter().map(|kp| kp.location).collect();
        let initial_center = centroid(&locations)?;

        let descriptors: Vec<Descriptor> = object.iter().map(|kp| kp.descriptor.clone()).collect();
        let mut global_descriptors = descriptors.clone();
        let mut global_classes: Vec<ClassId> = (0..object.len()).map(ClassId::object).collect();
        global_descriptors.extend(background.iter().map(|kp| kp.descriptor.clone()));
        global_classes.extend(std::iter::repeat(ClassId::BACKGROUND).take(background.len()));

        Some(Self {
            springs: locations.iter().map(|p| p - initial_center).collect(),
            descriptors,
            geometry: PairwiseGeometry::from_points(&locations),
            initial_center,
            corner_offsets: roi.corners().map(|corner| corner - initial_center),
            global: LabelledIndex::build(global_descriptors, global_classes),
        })
    }

    /// Number of object keypoints found at initialization.
    pub fn initial_keypoint_count(&self) -> usize {
        self.springs.len()
    }

    pub fn initial_center(&self) -> Point2<f32> {
        self.initial_center
    }

    pub fn springs(&self) -> &[Vector2<f32>] {
        &self.springs
    }

    pub fn geometry(&self) -> &PairwiseGeometry {
        &self.geometry
    }

    pub fn global_index(&self) -> &LabelledIndex<M> {
        &self.global
    }

    /// Index over the model descriptors of the given classes.
    pub fn object_index(&self, classes: impl IntoIterator<Item = ClassId>) -> LabelledIndex<M> {
        let (descriptors, classes): (Vec<Descriptor>, Vec<ClassId>) = classes
            .into_iter()
            .filter_map(|class| {
                let descriptor = self.descriptors.get(class.index()?)?;
                Some((descriptor.clone(), class))
            })
            .unzip();
        LabelledIndex::build(descriptors, classes)
    }

    /// Axis-aligned bounds of the ROI corners moved to `center` and
    /// transformed by the scale and the negated rotation.
    pub fn bounding_box(&self, center: Point2<f32>, estimate: ScaleRotation) -> Option<Rect> {
        Rect::bounding(
            self.corner_offsets
                .iter()
                .map(|offset| center + transform(offset, estimate.scale, -estimate.rotation)),
        )
    }
}

/// Per-frame estimate of the object.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ObjectState {
    pub center: Option<Point2<f32>>,
    pub estimate: Option<ScaleRotation>,
    pub bounding_box: Option<Rect>,
    pub valid: bool,
    pub initialized: bool,
}

/// What a caller gets back for each frame.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FrameResult {
    pub bounding_box: Option<Rect>,
    pub valid: bool,
    pub center: Option<Point2<f32>>,
    pub scale: Option<f32>,
    pub rotation: Option<f32>,
}

/// Tracking is valid while more than a tenth of the initial keypoints are active.
pub fn has_enough_keypoints(active: usize, initial: usize) -> bool {
    active as f32 > initial as f32 / 10.0
}

/// Consensus-based matching and tracking of a single object.
pub struct CmtTracker<M: DescriptorMatcher = BruteForceMatcher> {
    pub config: TrackerConfig,
    detector: Box<dyn KeypointDetector>,
    extractor: Box<dyn DescriptorExtractor>,
    flow: Box<dyn OpticalFlow>,
    model: Option<ObjectModel<M>>,
    state: ObjectState,
    active: ActiveKeypointSet,
    previous_frame: Option<GrayFrame>,
    tracked: Vec<TrackedPoint>,
    inliers: Vec<TrackedPoint>,
    outliers: Vec<TrackedPoint>,
}

impl CmtTracker<BruteForceMatcher> {
    /// Tracker with the brute-force descriptor matcher.
    pub fn new(
        detector: Box<dyn KeypointDetector>,
        extractor: Box<dyn DescriptorExtractor>,
        flow: Box<dyn OpticalFlow>,
        config: TrackerConfig,
    ) -> Result<Self> {
        Self::with_matcher(detector, extractor, flow, config)
    }
}

impl<M: DescriptorMatcher> CmtTracker<M> {
    pub fn with_matcher(
        detector: Box<dyn KeypointDetector>,
        extractor: Box<dyn DescriptorExtractor>,
        flow: Box<dyn OpticalFlow>,
        config: TrackerConfig,
    ) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            detector,
            extractor,
            flow,
            model: None,
            state: ObjectState::default(),
            active: ActiveKeypointSet::new(),
            previous_frame: None,
            tracked: Vec::new(),
            inliers: Vec::new(),
            outliers: Vec::new(),
        })
    }

    /// Replaces the configuration after validating it.
    pub fn set_config(&mut self, config: TrackerConfig) -> Result<()> {
        config.validate()?;
        self.config = config;
        Ok(())
    }

    /// Builds the object model from the keypoints strictly inside `roi`.
    ///
    /// Fails with [`Error::InitializationFailed`] when the ROI holds no
    /// keypoints; the tracker is then uninitialized. Collaborator errors leave
    /// the tracker as it was.
    pub fn initialize(&mut self, frame: GrayFrame, roi: Rect) -> Result<FrameResult> {
        frame.check_roi(&roi)?;

        let detected = self.detector.detect(&frame)?;
        let keypoints = self.extractor.extract(&frame, &detected)?;
        let (object, background): (Vec<Keypoint>, Vec<Keypoint>) =
            keypoints.into_iter().partition(|kp| roi.contains(&kp.location));

        let Some(model) = ObjectModel::<M>::build(&object, &background, &roi) else {
            self.clear();
            warn!(?roi, detected = detected.len(), "no keypoints inside the region of interest");
            return Err(Error::InitializationFailed(format!(
                "no keypoints inside {roi:?}"
            )));
        };

        let mut active = ActiveKeypointSet::new();
        for (i, kp) in object.iter().enumerate() {
            active.insert(ClassId::object(i), kp.location, kp.descriptor.clone());
        }

        info!(
            object = object.len(),
            background = background.len(),
            center_x = model.initial_center.x,
            center_y = model.initial_center.y,
            "tracker initialized"
        );

        self.state = ObjectState {
            center: Some(model.initial_center),
            estimate: Some(ScaleRotation::IDENTITY),
            bounding_box: Some(roi),
            valid: true,
            initialized: true,
        };
        self.tracked = active
            .iter()
            .map(|(class, kp)| TrackedPoint { class, location: kp.location })
            .collect();
        self.inliers.clear();
        self.outliers.clear();
        self.active = active;
        self.model = Some(model);
        self.previous_frame = Some(frame);

        Ok(self.frame_result())
    }

    /// Tracks the object into `frame`. Initializes from `roi` on the first call
    /// after construction or reset; `roi` is ignored otherwise.
    ///
    /// Degraded tracking is reported through `valid`, never as an error. On an
    /// error the tracker keeps the state of the previous frame.
    pub fn process_frame(&mut self, frame: GrayFrame, roi: Rect) -> Result<FrameResult> {
        if !self.state.initialized {
            return self.initialize(frame, roi);
        }

        let (Some(model), Some(previous)) = (self.model.as_ref(), self.previous_frame.as_ref()) else {
            return Err(Error::InitializationFailed("tracker has no object model".into()));
        };
        if (frame.width(), frame.height()) != (previous.width(), previous.height()) {
            return Err(Error::InvalidFrame(format!(
                "frame is {}x{}, previous frame was {}x{}",
                frame.width(),
                frame.height(),
                previous.width(),
                previous.height()
            )));
        }

        let points: Vec<(ClassId, Point2<f32>)> =
            self.active.iter().map(|(class, kp)| (class, kp.location)).collect();
        let tracked = track_points(
            self.flow.as_mut(),
            previous,
            &frame,
            &points,
            self.config.optical_flow_error_threshold,
        )?;

        let estimate = estimate_scale_rotation(
            &tracked,
            model.geometry(),
            self.config.estimate_scale,
            self.config.estimate_rotation,
        );
        let consensus = match estimate {
            Some(estimate) => estimate_center(
                &tracked,
                model.springs(),
                estimate,
                self.config.cluster_outlier_threshold,
            ),
            None => CenterEstimate::default(),
        };
        let carried = if consensus.center.is_some() {
            &consensus.inliers
        } else {
            &tracked
        };

        let detected = self.detector.detect(&frame)?;
        let keypoints = self.extractor.extract(&frame, &detected)?;

        let object = match (consensus.center, estimate) {
            (Some(center), Some(estimate)) => Some((
                model.object_index(self.active.classes()),
                SpringConstraint {
                    center,
                    springs: transform_all(model.springs(), estimate.scale, estimate.rotation),
                },
            )),
            _ => None,
        };
        let candidates = match_keypoints(
            &keypoints,
            model.global_index(),
            object.as_ref().map(|(index, constraint)| (index, constraint)),
            &self.config,
        )?;
        let matched = candidates.len();
        let active = candidates.merge_tracked(carried, &self.active);

        let valid = consensus.center.is_some()
            && has_enough_keypoints(active.len(), model.initial_keypoint_count());
        let bounding_box = match (valid, consensus.center, estimate) {
            (true, Some(center), Some(estimate)) => model.bounding_box(center, estimate),
            _ => None,
        };

        debug!(
            tracked = tracked.len(),
            inliers = consensus.inliers.len(),
            outliers = consensus.outliers.len(),
            detected = keypoints.len(),
            matched,
            active = active.len(),
            valid,
            "frame processed"
        );
        if self.state.valid && !valid {
            warn!(
                active = active.len(),
                initial = model.initial_keypoint_count(),
                center_defined = consensus.center.is_some(),
                "tracking lost"
            );
        } else if !self.state.valid && valid {
            info!(active = active.len(), "tracking recovered");
        }

        self.state = ObjectState {
            center: consensus.center,
            estimate,
            bounding_box,
            valid,
            initialized: true,
        };
        self.active = active;
        self.tracked = tracked;
        self.inliers = consensus.inliers;
        self.outliers = consensus.outliers;
        self.previous_frame = Some(frame);

        Ok(self.frame_result())
    }

    /// Drops the model and all state; the next `process_frame` initializes again.
    pub fn reset(&mut self) {
        self.clear();
        info!("tracker reset");
    }

    fn clear(&mut self) {
        self.model = None;
        self.state = ObjectState::default();
        self.active = ActiveKeypointSet::new();
        self.previous_frame = None;
        self.tracked.clear();
        self.inliers.clear();
        self.outliers.clear();
    }

    fn frame_result(&self) -> FrameResult {
        FrameResult {
            bounding_box: self.state.bounding_box,
            valid: self.state.valid,
            center: self.state.center,
            scale: self.state.estimate.map(|e| e.scale),
            rotation: self.state.estimate.map(|e| e.rotation),
        }
    }

    pub fn is_initialized(&self) -> bool {
        self.state.initialized
    }

    pub fn is_valid(&self) -> bool {
        self.state.valid
    }

    pub fn state(&self) -> &ObjectState {
        &self.state
    }

    pub fn model(&self) -> Option<&ObjectModel<M>> {
        self.model.as_ref()
    }

    pub fn center(&self) -> Option<Point2<f32>> {
        self.state.center
    }

    pub fn scale_estimate(&self) -> Option<f32> {
        self.state.estimate.map(|e| e.scale)
    }

    pub fn rotation_estimate(&self) -> Option<f32> {
        self.state.estimate.map(|e| e.rotation)
    }

    pub fn bounding_box(&self) -> Option<Rect> {
        self.state.bounding_box
    }

    pub fn active_keypoints(&self) -> &ActiveKeypointSet {
        &self.active
    }

    /// Points that survived optical flow in the last frame.
    pub fn tracked_keypoints(&self) -> &[TrackedPoint] {
        &self.tracked
    }

    pub fn inliers(&self) -> &[TrackedPoint] {
        &self.inliers
    }

    pub fn outliers(&self) -> &[TrackedPoint] {
        &self.outliers
    }
}
