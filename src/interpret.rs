//! Turning a detection response into a verdict and a visualization.

use crate::detection::mask::BufferSizeMismatch;
use crate::detection::{AnomalyMask, DetectionResponse, DetectionResult, MaskDelivery};
use image::{Rgb, RgbImage};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;

pub const DEFAULT_AREA_THRESHOLD: f32 = 0.01;

/// Weight of the source image in the blended visualization, in tenths.
pub const SOURCE_WEIGHT_TENTHS: u16 = 7;
/// Weight of the mask in the blended visualization, in tenths.
pub const MASK_WEIGHT_TENTHS: u16 = 10 - SOURCE_WEIGHT_TENTHS;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// The caller or the edge agent is set up wrong; fix the setup.
    Configuration,
    /// The response broke its contract with this consumer.
    DataContract,
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum InterpretError {
    #[error("anomaly mask is expected but missing from the model response")]
    MissingMask,
    #[error(transparent)]
    BufferSizeMismatch(#[from] BufferSizeMismatch),
    #[error("mask is {mask_width}x{mask_height} but the source image is {image_width}x{image_height}")]
    DimensionMismatch {
        mask_width: u32,
        mask_height: u32,
        image_width: u32,
        image_height: u32,
    },
    #[error("mask delivered through shared memory segment `{0}`; configure the agent for inline byte data")]
    SharedMemoryUnsupported(String),
    #[error("area threshold must be within [0, 1], got {0}")]
    InvalidThreshold(f32),
}

impl InterpretError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            InterpretError::SharedMemoryUnsupported(_) | InterpretError::InvalidThreshold(_) => {
                ErrorKind::Configuration
            }
            InterpretError::MissingMask
            | InterpretError::BufferSizeMismatch(_)
            | InterpretError::DimensionMismatch { .. } => ErrorKind::DataContract,
        }
    }
}

/// Channel order of the images placed in an [`InterpretationOutcome`].
/// Blending always happens in RGB; the order is applied afterwards.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChannelOrder {
    #[default]
    Rgb,
    Bgr,
}

impl ChannelOrder {
    pub fn apply(self, mut image: RgbImage) -> RgbImage {
        if self == ChannelOrder::Bgr {
            for pixel in image.pixels_mut() {
                pixel.0.swap(0, 2);
            }
        }
        image
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct InterpretOptions {
    pub area_threshold: f32,
    /// The model was trained with segmentation masks, so anomalous
    /// responses must carry one.
    pub mask_expected: bool,
    pub channel_order: ChannelOrder,
}

impl Default for InterpretOptions {
    fn default() -> Self {
        Self {
            area_threshold: DEFAULT_AREA_THRESHOLD,
            mask_expected: true,
            channel_order: ChannelOrder::Rgb,
        }
    }
}

impl InterpretOptions {
    pub fn validate(&self) -> Result<(), InterpretError> {
        if (0.0..=1.0).contains(&self.area_threshold) {
            Ok(())
        } else {
            Err(InterpretError::InvalidThreshold(self.area_threshold))
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Classification {
    Normal,
    AnomalousWithDefects,
    AnomalousNeedsInspection,
}

impl Classification {
    pub fn is_anomalous(self) -> bool {
        self != Classification::Normal
    }
}

/// Defect name to display color.
pub type DefectMap = BTreeMap<String, Option<String>>;

#[derive(Debug, Clone, PartialEq)]
pub struct InterpretationOutcome {
    pub classification: Classification,
    pub confidence: f32,
    pub over_threshold_defects: DefectMap,
    pub all_defects: DefectMap,
    /// Decoded mask, in the requested channel order.
    pub mask_image: Option<RgbImage>,
    /// `0.7 * source + 0.3 * mask`, in the requested channel order.
    pub blended_image: Option<RgbImage>,
    pub channel_order: ChannelOrder,
}

/// Blend `mask` into `source` over every pixel.
///
/// Each channel is `0.7 * source + 0.3 * mask`, rounded half up and clamped
/// to `0..=255`. Integer arithmetic keeps the rounding exact. Both images
/// must share dimensions.
pub fn blend(source: &RgbImage, mask: &RgbImage) -> RgbImage {
    debug_assert_eq!(source.dimensions(), mask.dimensions());
    RgbImage::from_fn(source.width(), source.height(), |x, y| {
        let s = source.get_pixel(x, y).0;
        let m = mask.get_pixel(x, y).0;
        Rgb(std::array::from_fn(|c| {
            let weighted =
                SOURCE_WEIGHT_TENTHS * u16::from(s[c]) + MASK_WEIGHT_TENTHS * u16::from(m[c]);
            ((weighted + 5) / 10).min(255) as u8
        }))
    })
}

fn resolve_mask(
    delivery: &MaskDelivery,
    mask_expected: bool,
) -> Result<Option<AnomalyMask>, InterpretError> {
    match delivery {
        MaskDelivery::ByteData(bitmap) if !bitmap.byte_data.is_empty() => {
            Ok(Some(AnomalyMask::decode(bitmap)?))
        }
        MaskDelivery::SharedMemoryHandle(handle) => {
            Err(InterpretError::SharedMemoryUnsupported(handle.name.clone()))
        }
        MaskDelivery::ByteData(_) | MaskDelivery::Absent => {
            if mask_expected {
                Err(InterpretError::MissingMask)
            } else {
                Ok(None)
            }
        }
    }
}

pub fn interpret(
    source: &RgbImage,
    result: &DetectionResult,
    mask: &MaskDelivery,
    options: &InterpretOptions,
) -> Result<InterpretationOutcome, InterpretError> {
    options.validate()?;

    if !result.is_anomalous {
        tracing::debug!(confidence = result.confidence, "image is normal");
        return Ok(InterpretationOutcome {
            classification: Classification::Normal,
            confidence: result.confidence,
            over_threshold_defects: DefectMap::new(),
            all_defects: DefectMap::new(),
            mask_image: None,
            blended_image: None,
            channel_order: options.channel_order,
        });
    }

    let (mask_image, blended_image) = match resolve_mask(mask, options.mask_expected)? {
        Some(mask) => {
            if mask.dimensions() != source.dimensions() {
                return Err(InterpretError::DimensionMismatch {
                    mask_width: mask.width(),
                    mask_height: mask.height(),
                    image_width: source.width(),
                    image_height: source.height(),
                });
            }
            let mask = mask.into_image();
            let blended = blend(source, &mask);
            (
                Some(options.channel_order.apply(mask)),
                Some(options.channel_order.apply(blended)),
            )
        }
        None => {
            tracing::debug!("no anomaly mask in response, skipping visualization");
            (None, None)
        }
    };

    let mut over_threshold_defects = DefectMap::new();
    let mut all_defects = DefectMap::new();
    for region in result.anomalies.iter().filter(|r| !r.is_background()) {
        tracing::debug!(
            name = %region.name,
            fraction = ?region.pixel_fraction,
            "anomaly region"
        );
        if region
            .pixel_fraction
            .is_some_and(|fraction| fraction > options.area_threshold)
        {
            over_threshold_defects.insert(region.name.clone(), region.display_color.clone());
        }
        all_defects.insert(region.name.clone(), region.display_color.clone());
    }

    let classification = if over_threshold_defects.is_empty() {
        Classification::AnomalousNeedsInspection
    } else {
        Classification::AnomalousWithDefects
    };

    Ok(InterpretationOutcome {
        classification,
        confidence: result.confidence,
        over_threshold_defects,
        all_defects,
        mask_image,
        blended_image,
        channel_order: options.channel_order,
    })
}

pub fn interpret_response(
    source: &RgbImage,
    response: &DetectionResponse,
    options: &InterpretOptions,
) -> Result<InterpretationOutcome, InterpretError> {
    interpret(source, &response.result, &response.anomaly_mask, options)
}
