//! Presenting interpretation outcomes: text, JSON, and image files.

use crate::interpret::{ChannelOrder, Classification, DefectMap, InterpretationOutcome};
use colored::Colorize;
use serde::Serialize;
use std::path::{Path, PathBuf};

pub const MASK_FILE_NAME: &str = "defectmask.png";
pub const BLENDED_FILE_NAME: &str = "blended.png";

/// Serializable view of an outcome. Pixel data is reduced to dimensions.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OutcomeReport {
    pub classification: Classification,
    pub confidence: f32,
    pub over_threshold_defects: DefectMap,
    pub all_defects: DefectMap,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image_size: Option<[u32; 2]>,
}

impl From<&InterpretationOutcome> for OutcomeReport {
    fn from(outcome: &InterpretationOutcome) -> Self {
        Self {
            classification: outcome.classification,
            confidence: outcome.confidence,
            over_threshold_defects: outcome.over_threshold_defects.clone(),
            all_defects: outcome.all_defects.clone(),
            image_size: outcome
                .blended_image
                .as_ref()
                .map(|image| [image.width(), image.height()]),
        }
    }
}

fn defect_names(defects: &DefectMap) -> String {
    if defects.is_empty() {
        return "none".to_string();
    }
    defects
        .iter()
        .map(|(name, color)| match color {
            Some(color) => format!("{} ({})", name, color),
            None => name.clone(),
        })
        .collect::<Vec<_>>()
        .join(", ")
}

/// One-line verdict for humans.
pub fn summary(outcome: &InterpretationOutcome, area_threshold: f32, color: bool) -> String {
    let confidence = outcome.confidence * 100.0;
    let threshold = area_threshold * 100.0;

    let (verdict, detail) = match outcome.classification {
        Classification::Normal => ("Image is normal".to_string(), String::new()),
        Classification::AnomalousWithDefects => (
            format!("Image is anomalous ({:.1}% confidence)", confidence),
            format!(
                " and contains defects with total area over {}%: {}",
                threshold,
                defect_names(&outcome.over_threshold_defects)
            ),
        ),
        Classification::AnomalousNeedsInspection => (
            format!("Image is anomalous ({:.1}% confidence)", confidence),
            format!(
                " and contains no defects with total area over {}%. Needs manual inspection for defects: {}",
                threshold,
                defect_names(&outcome.all_defects)
            ),
        ),
    };

    if !color {
        return verdict + &detail;
    }
    let verdict = if outcome.classification.is_anomalous() {
        verdict.red().bold().to_string()
    } else {
        verdict.green().to_string()
    };
    verdict + &detail
}

/// Write the mask and the blended composite into `out_dir`. Returns the
/// files written, which is none for outcomes without a mask.
///
/// PNG files are always RGB; outcome images held in BGR are swapped back
/// before encoding.
pub fn write_images(
    outcome: &InterpretationOutcome,
    out_dir: &Path,
) -> Result<Vec<PathBuf>, image::ImageError> {
    let mut written = Vec::new();
    if outcome.mask_image.is_none() && outcome.blended_image.is_none() {
        return Ok(written);
    }

    std::fs::create_dir_all(out_dir)?;
    for (image, file_name) in [
        (&outcome.mask_image, MASK_FILE_NAME),
        (&outcome.blended_image, BLENDED_FILE_NAME),
    ] {
        if let Some(image) = image {
            let path = out_dir.join(file_name);
            match outcome.channel_order {
                ChannelOrder::Rgb => image.save(&path)?,
                ChannelOrder::Bgr => ChannelOrder::Bgr.apply(image.clone()).save(&path)?,
            }
            tracing::info!("wrote {}", path.display());
            written.push(path);
        }
    }
    Ok(written)
}
