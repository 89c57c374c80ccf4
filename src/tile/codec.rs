//! PNG tile codec.
//!
//! Tiles travel to and from the remote host as lossless PNG files. Input
//! tiles are encoded in the pixel layout of the plane they were cut from;
//! result tiles are decoded in whatever layout the remote program wrote.

use std::io::Cursor;

use bytes::Bytes;
use image::{DynamicImage, ImageFormat, ImageReader};

use crate::error::TileError;

use super::key::TileKey;

/// The eight-byte PNG file signature.
pub const PNG_SIGNATURE: [u8; 8] = [0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A];

/// Encodes tiles to PNG and decodes result tiles.
#[derive(Debug, Clone, Default)]
pub struct PngTileCodec {}

impl PngTileCodec {
    pub fn new() -> Self {
        Self {}
    }

    /// Encode one tile as PNG.
    ///
    /// # Errors
    ///
    /// Returns [`TileError::Encode`] if the pixel layout cannot be written
    /// as PNG.
    pub fn encode(&self, key: &TileKey, tile: &DynamicImage) -> Result<Bytes, TileError> {
        let mut output = Vec::new();
        tile.write_to(&mut Cursor::new(&mut output), ImageFormat::Png)
            .map_err(|e| TileError::Encode {
                key: key.to_string(),
                message: e.to_string(),
            })?;
        Ok(Bytes::from(output))
    }

    /// Decode a result tile.
    ///
    /// # Errors
    ///
    /// Returns [`TileError::Decode`] if the data is not a readable PNG.
    pub fn decode(&self, key: &TileKey, data: &[u8]) -> Result<DynamicImage, TileError> {
        let reader = ImageReader::with_format(Cursor::new(data), ImageFormat::Png);
        reader.decode().map_err(|e| TileError::Decode {
            key: key.to_string(),
            message: e.to_string(),
        })
    }

    /// Read tile dimensions from the PNG header without decoding pixels.
    pub fn dimensions(&self, key: &TileKey, data: &[u8]) -> Result<(u32, u32), TileError> {
        let reader = ImageReader::with_format(Cursor::new(data), ImageFormat::Png);
        reader.into_dimensions().map_err(|e| TileError::Decode {
            key: key.to_string(),
            message: e.to_string(),
        })
    }
}

/// Whether `data` starts with the PNG signature.
#[inline]
pub fn is_png(data: &[u8]) -> bool {
    data.starts_with(&PNG_SIGNATURE)
}
