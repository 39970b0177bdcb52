//! PNG tile encoder.
//!
//! Tiles are layered over base maps, so output is always PNG with an alpha
//! channel. The encoder owns no state; the drawing surface it consumes is
//! scoped by the caller and released on every exit path.

use std::io::Cursor;

use bytes::Bytes;
use image::codecs::png::PngEncoder;
use image::{ExtendedColorType, ImageEncoder, ImageReader, RgbaImage};

use crate::error::TileError;

/// Encodes RGBA buffers into PNG byte streams.
#[derive(Debug, Clone, Default)]
pub struct PngTileEncoder {}

impl PngTileEncoder {
    pub fn new() -> Self {
        Self {}
    }

    /// Encode a drawn buffer.
    ///
    /// # Errors
    ///
    /// Returns [`TileError::Encode`] when the PNG stream cannot be written;
    /// the caller logs and abandons the response rather than retrying.
    pub fn encode(&self, image: &RgbaImage) -> Result<Bytes, TileError> {
        let mut out = Vec::new();
        let encoder = PngEncoder::new(&mut out);
        encoder
            .write_image(
                image.as_raw(),
                image.width(),
                image.height(),
                ExtendedColorType::Rgba8,
            )
            .map_err(|e| TileError::Encode {
                message: e.to_string(),
            })?;
        Ok(Bytes::from(out))
    }

    /// Encode a fully transparent tile of the given size.
    ///
    /// Used as the pre-built substitute whenever a query matches nothing.
    pub fn blank(&self, width: u32, height: u32) -> Result<Bytes, TileError> {
        self.encode(&RgbaImage::new(width.max(1), height.max(1)))
    }
}
