use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

use crate::error::{Error, Result};

/// Tracker options. Every field is optional in the JSON form.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackerConfig {
    /// Estimate the scale change of the object relative to its initial size.
    pub estimate_scale: bool,
    /// Estimate the in-plane rotation of the object.
    pub estimate_rotation: bool,
    /// Maximum per-axis forward-backward error for a tracked point to survive.
    pub optical_flow_error_threshold: f32,
    /// Maximum centroid distance for two vote clusters to merge; also the spring
    /// tolerance used when weighting object-model matches.
    pub cluster_outlier_threshold: f32,
    /// Descriptor distance that maps to zero confidence.
    pub matching_confidence_scale_factor: f32,
    /// Minimum confidence for a match to be accepted.
    pub matching_confidence_threshold: f32,
    /// Maximum best/second-best ratio (Lowe) for a match to be accepted.
    pub matching_confidence_ratio: f32,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            estimate_scale: true,
            estimate_rotation: false,
            optical_flow_error_threshold: 20.0,
            cluster_outlier_threshold: 20.0,
            matching_confidence_scale_factor: 512.0,
            matching_confidence_threshold: 0.7,
            matching_confidence_ratio: 0.8,
        }
    }
}

impl TrackerConfig {
    /// Load from a JSON file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let data = fs::read_to_string(path)?;
        let cfg: TrackerConfig = serde_json::from_str(&data)?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<()> {
        let positive = [
            ("optical_flow_error_threshold", self.optical_flow_error_threshold),
            ("cluster_outlier_threshold", self.cluster_outlier_threshold),
            ("matching_confidence_scale_factor", self.matching_confidence_scale_factor),
        ];
        for (name, value) in positive {
            if !value.is_finite() || value <= 0.0 {
                return Err(Error::InvalidConfig(format!(
                    "{name} must be positive and finite, got {value}"
                )));
            }
        }

        if !self.matching_confidence_threshold.is_finite() {
            return Err(Error::InvalidConfig(
                "matching_confidence_threshold must be finite".to_string(),
            ));
        }

        let ratio = self.matching_confidence_ratio;
        if !(ratio > 0.0 && ratio <= 1.0) {
            return Err(Error::InvalidConfig(format!(
                "matching_confidence_ratio must be in (0, 1], got {ratio}"
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let cfg = TrackerConfig::default();
        assert!(cfg.estimate_scale);
        assert!(!cfg.estimate_rotation);
        assert_eq!(cfg.optical_flow_error_threshold, 20.0);
        assert_eq!(cfg.cluster_outlier_threshold, 20.0);
        assert_eq!(cfg.matching_confidence_scale_factor, 512.0);
        assert_eq!(cfg.matching_confidence_threshold, 0.7);
        assert_eq!(cfg.matching_confidence_ratio, 0.8);
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let cfg: TrackerConfig =
            serde_json::from_str(r#"{ "estimate_rotation": true, "cluster_outlier_threshold": 35.0 }"#)
                .unwrap();
        assert!(cfg.estimate_rotation);
        assert!(cfg.estimate_scale);
        assert_eq!(cfg.cluster_outlier_threshold, 35.0);
        assert_eq!(cfg.matching_confidence_ratio, 0.8);
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let mut cfg = TrackerConfig::default();
        cfg.matching_confidence_scale_factor = 0.0;
        assert!(matches!(cfg.validate(), Err(Error::InvalidConfig(_))));

        let mut cfg = TrackerConfig::default();
        cfg.matching_confidence_ratio = 1.5;
        assert!(matches!(cfg.validate(), Err(Error::InvalidConfig(_))));

        let mut cfg = TrackerConfig::default();
        cfg.optical_flow_error_threshold = f32::NAN;
        assert!(matches!(cfg.validate(), Err(Error::InvalidConfig(_))));
    }

    #[test]
    fn test_from_file() {
        let path = std::env::temp_dir().join(format!("cmtrack_config_{}.json", std::process::id()));
        fs::write(&path, r#"{ "estimate_scale": false, "matching_confidence_threshold": 0.75 }"#).unwrap();

        let cfg = TrackerConfig::from_file(&path).unwrap();
        assert!(!cfg.estimate_scale);
        assert_eq!(cfg.matching_confidence_threshold, 0.75);

        fs::remove_file(&path).unwrap();
        assert!(matches!(TrackerConfig::from_file(&path), Err(Error::Io(_))));
    }
}
