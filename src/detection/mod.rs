//! Data model of a decoded anomaly detection response.

pub mod mask;

pub use mask::{AnomalyMask, Bitmap, MaskDelivery, SharedMemoryHandle};

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Region name the model uses for everything that is not a defect.
pub const BACKGROUND_REGION: &str = "background";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct AnomalyRegion {
    pub name: String,
    /// Fraction of the image area covered by this region, in `[0, 1]`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pixel_fraction: Option<f32>,
    /// Hex color the region is painted with in the mask, e.g. `#23A436`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_color: Option<String>,
}

impl AnomalyRegion {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            pixel_fraction: None,
            display_color: None,
        }
    }

    pub fn with_fraction(mut self, fraction: f32) -> Self {
        self.pixel_fraction = Some(fraction);
        self
    }

    pub fn with_color(mut self, color: impl Into<String>) -> Self {
        self.display_color = Some(color.into());
        self
    }

    pub fn is_background(&self) -> bool {
        self.name == BACKGROUND_REGION
    }
}

/// `anomalies` only carries meaning when `is_anomalous` is set; it is not
/// guaranteed to be empty otherwise.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct DetectionResult {
    pub is_anomalous: bool,
    pub confidence: f32,
    #[serde(default)]
    pub anomalies: Vec<AnomalyRegion>,
}

impl DetectionResult {
    pub fn normal(confidence: f32) -> Self {
        Self {
            is_anomalous: false,
            confidence,
            anomalies: Vec::new(),
        }
    }

    pub fn anomalous(confidence: f32, anomalies: Vec<AnomalyRegion>) -> Self {
        Self {
            is_anomalous: true,
            confidence,
            anomalies,
        }
    }
}

/// A full response document as handed over by the edge agent client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct DetectionResponse {
    #[serde(flatten)]
    pub result: DetectionResult,
    #[serde(default)]
    pub anomaly_mask: MaskDelivery,
}

impl DetectionResponse {
    pub fn from_json(input: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(input)
    }

    pub fn json_schema() -> schemars::schema::RootSchema {
        schemars::schema_for!(DetectionResponse)
    }
}
