pub mod config;
pub mod detection;
pub mod interpret;
pub mod manifest;
pub mod report;
pub mod upload;

pub use detection::{AnomalyMask, AnomalyRegion, DetectionResponse, DetectionResult, MaskDelivery};
pub use interpret::{
    Classification, InterpretError, InterpretOptions, InterpretationOutcome, interpret,
};
pub use manifest::{ManifestError, rewrite};
