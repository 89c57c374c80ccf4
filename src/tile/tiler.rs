//! Cuts a source image into fixed-size PNG tiles.
//!
//! For every plane (frames outer, slices inner):
//!
//! 1. resample bilinearly to the reference pixel size,
//! 2. pad with zeros on the right and bottom up to a whole number of tiles,
//! 3. cut the padded canvas into `tile_size` squares (x outer, y inner),
//! 4. encode each square as PNG and store it under its [`TileKey`].

use tracing::{debug, info};

use crate::error::TileError;
use crate::job::JobStore;
use crate::stack::{stack_index, SourceImage};

use super::codec::PngTileCodec;
use super::geometry::{TileGeometry, TilingParams};
use super::key::TileKey;
use super::raster::{extend_canvas, resample, working_plane};

/// Partitions images into tiles.
#[derive(Debug, Clone, Default)]
pub struct Tiler {
    params: TilingParams,
    codec: PngTileCodec,
}

impl Tiler {
    pub fn new(params: TilingParams) -> Self {
        Self {
            params,
            codec: PngTileCodec::new(),
        }
    }

    pub fn params(&self) -> &TilingParams {
        &self.params
    }

    /// Tile an image into a fresh [`JobStore`].
    pub fn tile(&self, image: &SourceImage) -> Result<JobStore, TileError> {
        let store = JobStore::new();
        self.populate(image, &store)?;
        Ok(store)
    }

    /// Tile an image into an existing, empty store.
    ///
    /// Records the geometry snapshot on the store and returns the number of
    /// tiles written.
    ///
    /// # Errors
    ///
    /// Fails if the geometry cannot be derived, if the store already holds a
    /// geometry snapshot, or if a tile cannot be encoded.
    pub fn populate(&self, image: &SourceImage, store: &JobStore) -> Result<usize, TileError> {
        let geometry = TileGeometry::for_image(image, &self.params)?;
        store.set_geometry(geometry.clone())?;

        info!(
            job_id = store.id(),
            width = geometry.width,
            height = geometry.height,
            planes = geometry.plane_count(),
            magnification = geometry.magnification,
            tiles = geometry.tile_count(),
            "Tiling image"
        );

        let mut written = 0;
        for frame in 1..=geometry.n_frames {
            for slice in 1..=geometry.n_slices {
                let index = stack_index(geometry.n_slices, slice, frame);
                let plane = image.plane(index).ok_or(TileError::PlaneCount {
                    expected: geometry.plane_count(),
                    actual: image.plane_count(),
                })?;
                written += self.tile_plane(store, &geometry, index, plane)?;
            }
        }

        debug!(job_id = store.id(), bytes = store.raw_size(), "Tiling complete");
        Ok(written)
    }

    fn tile_plane(
        &self,
        store: &JobStore,
        geometry: &TileGeometry,
        index: u32,
        plane: &image::DynamicImage,
    ) -> Result<usize, TileError> {
        let plane = working_plane(plane);
        let resized = resample(&plane, geometry.dest_width, geometry.dest_height);
        let padded = extend_canvas(&resized, geometry.padded_width(), geometry.padded_height());

        let mut written = 0;
        for (x, y) in geometry.tile_origins() {
            let key = TileKey::new(index, x, y)?;
            let tile = padded.crop_imm(x, y, geometry.tile_size, geometry.tile_size);
            store.put_raw(key, self.codec.encode(&key, &tile)?);
            written += 1;
        }
        Ok(written)
    }
}
