//! Bytes to image decoding

use image::{DynamicImage, ImageReader, Limits};
use std::io::Cursor;
use std::sync::Arc;
use thiserror::Error;

/// Decoded image shared between the cache and every consumer
pub type SharedImage = Arc<DynamicImage>;

#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("Empty payload")]
    Empty,

    #[error("Unrecognized image format")]
    UnknownFormat,

    #[error("Image error: {0}")]
    Image(#[from] image::ImageError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Pure function from raw bytes to an image
pub trait Decoder: Send + Sync {
    fn decode(&self, bytes: &[u8]) -> Result<DynamicImage, DecodeError>;
}

/// Decoder backed by the `image` crate, format guessed from the bytes
#[derive(Debug, Clone, Default)]
pub struct ImageDecoder {
    max_dimension: Option<u32>,
}

impl ImageDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Refuse images wider or taller than `max` pixels
    pub fn with_max_dimension(mut self, max: u32) -> Self {
        self.max_dimension = Some(max);
        self
    }
}

impl Decoder for ImageDecoder {
    fn decode(&self, bytes: &[u8]) -> Result<DynamicImage, DecodeError> {
        if bytes.is_empty() {
            return Err(DecodeError::Empty);
        }

        let mut reader = ImageReader::new(Cursor::new(bytes)).with_guessed_format()?;
        if reader.format().is_none() {
            return Err(DecodeError::UnknownFormat);
        }

        if let Some(max) = self.max_dimension {
            let mut limits = Limits::default();
            limits.max_image_width = Some(max);
            limits.max_image_height = Some(max);
            reader.limits(limits);
        }

        Ok(reader.decode()?)
    }
}
