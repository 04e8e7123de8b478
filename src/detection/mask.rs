//! Anomaly mask transport and decoding.

use image::RgbImage;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use thiserror::Error;

const CHANNELS: usize = 3;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("mask buffer holds {actual} bytes but {width}x{height}x3 needs {expected}")]
pub struct BufferSizeMismatch {
    pub width: u32,
    pub height: u32,
    pub expected: usize,
    pub actual: usize,
}

/// Raw pixels as sent over the wire.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct Bitmap {
    pub width: u32,
    pub height: u32,
    #[serde(default)]
    pub byte_data: Vec<u8>,
}

/// Location of a mask the agent wrote to shared memory instead of inlining.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct SharedMemoryHandle {
    pub name: String,
    pub size: u64,
    #[serde(default)]
    pub offset: u64,
}

/// How the anomaly mask arrived with a response.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum MaskDelivery {
    ByteData(Bitmap),
    SharedMemoryHandle(SharedMemoryHandle),
    #[default]
    Absent,
}

impl MaskDelivery {
    pub fn from_image(image: &RgbImage) -> Self {
        MaskDelivery::ByteData(Bitmap {
            width: image.width(),
            height: image.height(),
            byte_data: image.as_raw().clone(),
        })
    }
}

/// A decoded RGB mask whose buffer is known to match its dimensions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AnomalyMask {
    image: RgbImage,
}

impl AnomalyMask {
    /// Wrap `data` as a `width` x `height` RGB image. The buffer must hold
    /// exactly three bytes per pixel; dimensions whose byte count overflows
    /// `usize` never match.
    pub fn new(width: u32, height: u32, data: Vec<u8>) -> Result<Self, BufferSizeMismatch> {
        let actual = data.len();
        let expected = (width as usize)
            .checked_mul(height as usize)
            .and_then(|pixels| pixels.checked_mul(CHANNELS));
        let image = expected
            .filter(|&expected| expected == actual)
            .and_then(|_| RgbImage::from_raw(width, height, data));
        match image {
            Some(image) => Ok(Self { image }),
            None => Err(BufferSizeMismatch {
                width,
                height,
                expected: expected.unwrap_or(usize::MAX),
                actual,
            }),
        }
    }

    pub fn decode(bitmap: &Bitmap) -> Result<Self, BufferSizeMismatch> {
        Self::new(bitmap.width, bitmap.height, bitmap.byte_data.clone())
    }

    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }

    pub fn dimensions(&self) -> (u32, u32) {
        self.image.dimensions()
    }

    pub fn into_image(self) -> RgbImage {
        self.image
    }
}
