//! Detection data model.

use serde::{Deserialize, Serialize};

use crate::error::PipelineError;
use crate::measure::Severity;

/// WGS84 coordinate pair attached to a request.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq)]
pub struct GeoPoint {
    pub latitude: f64,
    pub longitude: f64,
}

impl GeoPoint {
    pub fn new(latitude: f64, longitude: f64) -> Result<Self, PipelineError> {
        if !latitude.is_finite() || !(-90.0..=90.0).contains(&latitude) {
            return Err(PipelineError::InvalidInput(format!(
                "latitude {} out of range",
                latitude
            )));
        }
        if !longitude.is_finite() || !(-180.0..=180.0).contains(&longitude) {
            return Err(PipelineError::InvalidInput(format!(
                "longitude {} out of range",
                longitude
            )));
        }
        Ok(Self {
            latitude,
            longitude,
        })
    }

    /// Build from optional parts. Both absent means "location unknown";
    /// exactly one present is rejected.
    pub fn from_parts(
        latitude: Option<f64>,
        longitude: Option<f64>,
    ) -> Result<Option<Self>, PipelineError> {
        match (latitude, longitude) {
            (None, None) => Ok(None),
            (Some(lat), Some(lon)) => Self::new(lat, lon).map(Some),
            _ => Err(PipelineError::InvalidInput(
                "latitude and longitude must be given together".to_string(),
            )),
        }
    }
}

/// One incoming image. Never persisted as-is.
#[derive(Clone, Debug)]
pub struct DetectionRequest {
    pub image: Vec<u8>,
    /// `None` when the client sent no coordinates.
    pub location: Option<GeoPoint>,
}

impl DetectionRequest {
    pub fn new(image: Vec<u8>, location: Option<GeoPoint>) -> Self {
        Self { image, location }
    }
}

#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum DetectionStatus {
    #[default]
    Reported,
}

impl DetectionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DetectionStatus::Reported => "reported",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "reported" => Some(DetectionStatus::Reported),
            _ => None,
        }
    }
}

/// Fields supplied by the pipeline; identity and timestamp come from the store.
#[derive(Clone, Debug, PartialEq)]
pub struct NewDetection {
    pub location: Option<GeoPoint>,
    pub severity: Severity,
    pub area_m2: f64,
    pub depth_meters: f64,
    pub image_path: String,
    pub confidence: f32,
}

/// Persisted detection observation.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct DetectionRecord {
    pub id: i64,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub severity: Severity,
    pub area: f64,
    pub depth_meters: f64,
    pub image_path: String,
    pub confidence: f32,
    /// Store-assigned creation time, milliseconds since the Unix epoch.
    pub timestamp_ms: i64,
    pub status: DetectionStatus,
}

impl DetectionRecord {
    pub(crate) fn from_new(detection: NewDetection, id: i64, timestamp_ms: i64) -> Self {
        Self {
            id,
            latitude: detection.location.map(|p| p.latitude),
            longitude: detection.location.map(|p| p.longitude),
            severity: detection.severity,
            area: detection.area_m2,
            depth_meters: detection.depth_meters,
            image_path: detection.image_path,
            confidence: detection.confidence,
            timestamp_ms,
            status: DetectionStatus::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_coordinates_mean_unknown_location() {
        assert_eq!(GeoPoint::from_parts(None, None), Ok(None));
    }

    #[test]
    fn half_a_coordinate_is_rejected() {
        assert!(matches!(
            GeoPoint::from_parts(Some(12.0), None),
            Err(PipelineError::InvalidInput(_))
        ));
    }

    #[test]
    fn out_of_range_coordinates_are_rejected() {
        assert!(GeoPoint::new(91.0, 0.0).is_err());
        assert!(GeoPoint::new(0.0, -180.5).is_err());
        assert!(GeoPoint::new(f64::NAN, 0.0).is_err());
        assert!(GeoPoint::new(0.0, 0.0).is_ok());
    }

    #[test]
    fn record_serializes_lowercase_enums() {
        let record = DetectionRecord::from_new(
            NewDetection {
                location: None,
                severity: Severity::Medium,
                area_m2: 0.2,
                depth_meters: 0.15,
                image_path: "uploads/a.jpg".to_string(),
                confidence: 0.8,
            },
            7,
            1_700_000_000_000,
        );
        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["severity"], "medium");
        assert_eq!(json["status"], "reported");
        assert!(json["latitude"].is_null());
        assert_eq!(json["id"], 7);
    }
}
