//! Reassembles result tiles into an image with the source geometry.
//!
//! For every plane, in the same linear order as tiling, the result tiles are
//! painted onto a canvas of the rescaled (unpadded) size, which clips the
//! padding away, and the canvas is resampled back to the source size. The
//! planes are then reshaped into the original slices x frames layout and
//! given the original calibration.
//!
//! A missing or undecodable result tile aborts stitching: a silent gap would
//! corrupt the mosaic.

use image::DynamicImage;
use tracing::{debug, info};

use crate::error::TileError;
use crate::job::JobStore;
use crate::stack::{stack_index, SourceImage};

use super::codec::PngTileCodec;
use super::geometry::TileGeometry;
use super::key::TileKey;
use super::raster::{is_gray_rgb, paste, resample, to_single_channel, Layout};

/// Prefix added to the title of stitched images.
pub const OUTPUT_TITLE_PREFIX: &str = "WIDU_";

/// Rebuilds images from result tiles.
#[derive(Debug, Clone, Default)]
pub struct Stitcher {
    codec: PngTileCodec,
}

impl Stitcher {
    pub fn new() -> Self {
        Self {
            codec: PngTileCodec::new(),
        }
    }

    /// Stitch the result tiles of a job.
    ///
    /// # Errors
    ///
    /// Fails if the store has no geometry snapshot, or if any result tile of
    /// the grid is missing or cannot be decoded.
    pub fn stitch(&self, store: &JobStore) -> Result<SourceImage, TileError> {
        let geometry = store.require_geometry()?;

        info!(
            job_id = store.id(),
            tiles = store.result_len(),
            planes = geometry.plane_count(),
            "Stitching result tiles"
        );

        let mut planes = Vec::with_capacity(geometry.plane_count());
        for frame in 1..=geometry.n_frames {
            for slice in 1..=geometry.n_slices {
                let index = stack_index(geometry.n_slices, slice, frame);
                let canvas = self.assemble_plane(store, geometry, index)?;
                planes.push(resample(&canvas, geometry.width, geometry.height));
            }
        }

        // One layout for the whole stack
        if let Some(layout) = Layout::widest(&planes) {
            planes = planes.into_iter().map(|p| layout.conform(p)).collect();
        }

        if planes.iter().all(is_gray_rgb) {
            debug!(job_id = store.id(), "Reducing gray RGB result to 8-bit");
            planes = planes.into_iter().map(to_single_channel).collect();
        }

        let title = format!("{}{}", OUTPUT_TITLE_PREFIX, geometry.title);
        let mut image = SourceImage::from_planes(title, planes, geometry.calibration.clone())?;
        if geometry.plane_count() > 1 {
            image = image.reshape(geometry.n_slices, geometry.n_frames)?;
        }
        image.set_calibration(geometry.calibration.clone());

        Ok(image)
    }

    /// Paint every tile of one plane onto a canvas of the rescaled size.
    ///
    /// The canvas takes the widest layout among the plane's tiles, so a
    /// gray tile next to colored ones never drops their color.
    fn assemble_plane(
        &self,
        store: &JobStore,
        geometry: &TileGeometry,
        index: u32,
    ) -> Result<DynamicImage, TileError> {
        let mut tiles = Vec::with_capacity(geometry.tiles_per_plane());
        for (x, y) in geometry.tile_origins() {
            let key = TileKey::new(index, x, y)?;
            let data = store
                .get_result(&key)
                .ok_or_else(|| TileError::MissingTile(key.file_name()))?;
            tiles.push((x, y, self.codec.decode(&key, &data)?));
        }

        let layout = Layout::widest(tiles.iter().map(|(_, _, tile)| tile))
            .ok_or_else(|| TileError::InvalidGeometry("empty tile grid".to_string()))?;
        let mut canvas = layout.blank(geometry.dest_width, geometry.dest_height);
        for (x, y, tile) in &tiles {
            paste(&mut canvas, tile, *x, *y);
        }
        Ok(canvas)
    }
}
