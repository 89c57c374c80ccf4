//! Tile grid geometry.
//!
//! Planes are rescaled so their pixel size matches a fixed reference before
//! tiling:
//!
//! ```text
//! magnification = pixel_width / reference_pixel_size
//! dest_width    = ceil(magnification * width)
//! tiles_x       = floor(dest_width / tile_size) + 1
//! ```
//!
//! (and likewise for height). The grid always over-covers the rescaled
//! canvas; the excess is zero padding. A canvas whose size is already a
//! multiple of the tile size still gets one extra row and column.

use crate::error::TileError;
use crate::stack::{Calibration, SourceImage};

use super::key::TileKey;

/// Default tile edge in pixels (the segmentation model's input size).
pub const DEFAULT_TILE_SIZE: u32 = 224;

/// Pixel size the segmentation model was trained at.
pub const REFERENCE_PIXEL_SIZE: f64 = 0.405;

/// Parameters that decide how an image is cut into tiles.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TilingParams {
    /// Edge length of the square tiles in pixels
    pub tile_size: u32,

    /// Physical pixel size planes are rescaled to before tiling
    pub reference_pixel_size: f64,
}

impl Default for TilingParams {
    fn default() -> Self {
        Self {
            tile_size: DEFAULT_TILE_SIZE,
            reference_pixel_size: REFERENCE_PIXEL_SIZE,
        }
    }
}

/// Geometric and calibration snapshot of a tiled image.
///
/// Recorded once when the image is tiled and required unchanged to stitch
/// the results back together.
#[derive(Debug, Clone, PartialEq)]
pub struct TileGeometry {
    pub title: String,
    pub width: u32,
    pub height: u32,
    pub n_slices: u32,
    pub n_frames: u32,
    pub calibration: Calibration,
    pub magnification: f64,
    pub dest_width: u32,
    pub dest_height: u32,
    pub tiles_x: u32,
    pub tiles_y: u32,
    pub tile_size: u32,
}

impl TileGeometry {
    /// Derive the grid for an image.
    pub fn for_image(image: &SourceImage, params: &TilingParams) -> Result<Self, TileError> {
        Self::compute(
            image.title(),
            image.width(),
            image.height(),
            image.n_slices(),
            image.n_frames(),
            image.calibration().clone(),
            params,
        )
    }

    /// Derive the grid from raw dimensions.
    ///
    /// # Errors
    ///
    /// Fails if the tile size or the magnification is unusable, or if the
    /// largest tile key would not fit in the four-digit key fields.
    pub fn compute(
        title: &str,
        width: u32,
        height: u32,
        n_slices: u32,
        n_frames: u32,
        calibration: Calibration,
        params: &TilingParams,
    ) -> Result<Self, TileError> {
        if params.tile_size == 0 {
            return Err(TileError::InvalidGeometry(
                "tile size must be greater than 0".to_string(),
            ));
        }
        if !(params.reference_pixel_size.is_finite() && params.reference_pixel_size > 0.0) {
            return Err(TileError::InvalidGeometry(format!(
                "reference pixel size must be positive, got {}",
                params.reference_pixel_size
            )));
        }
        if width == 0 || height == 0 || n_slices == 0 || n_frames == 0 {
            return Err(TileError::InvalidGeometry(format!(
                "empty image: {}x{} with {} slices and {} frames",
                width, height, n_slices, n_frames
            )));
        }

        let magnification = calibration.pixel_width / params.reference_pixel_size;
        if !(magnification.is_finite() && magnification > 0.0) {
            return Err(TileError::InvalidGeometry(format!(
                "pixel width {} gives unusable magnification",
                calibration.pixel_width
            )));
        }

        let dest_width = scaled(width, magnification)?;
        let dest_height = scaled(height, magnification)?;
        let tile_size = params.tile_size;

        let geometry = Self {
            title: title.to_string(),
            width,
            height,
            n_slices,
            n_frames,
            calibration,
            magnification,
            dest_width,
            dest_height,
            tiles_x: dest_width / tile_size + 1,
            tiles_y: dest_height / tile_size + 1,
            tile_size,
        };

        // The last tile of the last plane carries the largest key
        let last_plane = u32::try_from(geometry.plane_count())
            .map_err(|_| TileError::InvalidGeometry("too many planes".to_string()))?;
        let last_x = (geometry.tiles_x - 1)
            .checked_mul(tile_size)
            .ok_or_else(|| TileError::InvalidGeometry("grid too wide".to_string()))?;
        let last_y = (geometry.tiles_y - 1)
            .checked_mul(tile_size)
            .ok_or_else(|| TileError::InvalidGeometry("grid too tall".to_string()))?;
        TileKey::new(last_plane, last_x, last_y)?;

        Ok(geometry)
    }

    /// Width of the zero-padded canvas that is cut into tiles.
    pub fn padded_width(&self) -> u32 {
        self.tiles_x * self.tile_size
    }

    /// Height of the zero-padded canvas that is cut into tiles.
    pub fn padded_height(&self) -> u32 {
        self.tiles_y * self.tile_size
    }

    pub fn plane_count(&self) -> usize {
        self.n_slices as usize * self.n_frames as usize
    }

    pub fn tiles_per_plane(&self) -> usize {
        self.tiles_x as usize * self.tiles_y as usize
    }

    /// Total number of tiles over all planes.
    pub fn tile_count(&self) -> usize {
        self.plane_count() * self.tiles_per_plane()
    }

    /// Pixel origins of the grid cells, x outer and y inner.
    pub fn tile_origins(&self) -> impl Iterator<Item = (u32, u32)> + '_ {
        (0..self.tiles_x).flat_map(move |w| {
            (0..self.tiles_y).map(move |u| (w * self.tile_size, u * self.tile_size))
        })
    }

    /// Every key of the grid, in tiling order.
    pub fn keys(&self) -> Vec<TileKey> {
        let mut keys = Vec::with_capacity(self.tile_count());
        for index in 1..=self.plane_count() as u32 {
            for (x, y) in self.tile_origins() {
                // compute() already proved the largest key fits
                if let Ok(key) = TileKey::new(index, x, y) {
                    keys.push(key);
                }
            }
        }
        keys
    }
}

fn scaled(length: u32, magnification: f64) -> Result<u32, TileError> {
    let value = (magnification * f64::from(length)).ceil();
    if value < 1.0 || value > f64::from(u32::MAX) {
        return Err(TileError::InvalidGeometry(format!(
            "rescaling {} by {} gives {}",
            length, magnification, value
        )));
    }
    Ok(value as u32)
}
