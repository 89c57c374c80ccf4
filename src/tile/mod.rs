//! Tiling and stitching.
//!
//! This module turns a [`SourceImage`](crate::stack::SourceImage) into a grid
//! of fixed-size PNG tiles for remote processing, and turns the processed
//! tiles back into an image with the source geometry.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────┐   resample + pad + cut    ┌──────────────────────┐
//! │ SourceImage  │ ────────── Tiler ───────▶ │ JobStore (raw tiles) │
//! └──────────────┘                           └──────────┬───────────┘
//!                                                       │ remote job
//!                                                       ▼
//! ┌──────────────┐   paste + clip + resample ┌──────────────────────┐
//! │ SourceImage  │ ◀──────── Stitcher ────── │ JobStore (results)   │
//! └──────────────┘                           └──────────────────────┘
//! ```
//!
//! # Grid
//!
//! With `magnification = pixel_width / 0.405`, each plane is resampled to
//! `ceil(magnification * width)` x `ceil(magnification * height)`, then
//! padded with zeros on the right and bottom to
//! `(floor(dest / tile_size) + 1) * tile_size` in each direction. Tiles are
//! named `SSSS-XXXX-YYYY.png` after the stack index and the pixel origin of
//! the tile in the padded canvas.
//!
//! # Components
//!
//! - [`TileKey`]: validated tile name
//! - [`TileGeometry`]: grid parameters derived from an image
//! - [`PngTileCodec`]: PNG encode/decode
//! - [`Tiler`]: image to raw tiles
//! - [`Stitcher`]: result tiles to image

mod codec;
mod geometry;
mod key;
mod raster;
mod stitcher;
mod tiler;

pub use codec::{is_png, PngTileCodec, PNG_SIGNATURE};
pub use geometry::{TileGeometry, TilingParams, DEFAULT_TILE_SIZE, REFERENCE_PIXEL_SIZE};
pub use key::{TileKey, KEY_FIELD_MAX, TILE_EXTENSION};
pub use stitcher::{Stitcher, OUTPUT_TITLE_PREFIX};
pub use tiler::Tiler;
