use thiserror::Error;

/// Errors raised by the tracker and its collaborators.
///
/// Degraded tracking (lost center, too few keypoints) is never an error; it is
/// reported through [`crate::FrameResult::valid`].
#[derive(Error, Debug)]
pub enum Error {
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Invalid frame: {0}")]
    InvalidFrame(String),

    #[error("Invalid ROI: {0}")]
    InvalidRoi(String),

    #[error("Initialization failed: {0}")]
    InitializationFailed(String),

    #[error("Keypoint detection failed: {0}")]
    Detection(String),

    #[error("Descriptor extraction failed: {0}")]
    Descriptor(String),

    #[error("Optical flow failed: {0}")]
    OpticalFlow(String),

    #[error("Descriptor matching failed: {0}")]
    Matching(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[cfg(feature = "opencv")]
    #[error("OpenCV error: {0}")]
    OpenCv(#[from] opencv::Error),
}

/// Result type for tracker operations
pub type Result<T> = std::result::Result<T, Error>;
