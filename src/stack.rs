//! Multi-frame, multi-slice image stacks.
//!
//! A [`SourceImage`] is an ordered list of 2D planes addressed by a 1-based
//! stack index. Within a frame the slice varies fastest:
//!
//! ```text
//! index = (frame - 1) * n_slices + slice
//! ```
//!
//! Only one channel is modelled; every plane must share the same width and
//! height.

use image::DynamicImage;
use serde::{Deserialize, Serialize};

use crate::error::TileError;

/// Physical calibration of an image.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Calibration {
    /// Physical width of one pixel
    pub pixel_width: f64,

    /// Physical height of one pixel
    pub pixel_height: f64,

    /// Unit of `pixel_width` and `pixel_height` (e.g. "micron")
    pub unit: String,
}

impl Calibration {
    /// Square pixels of the given size.
    pub fn new(pixel_size: f64, unit: impl Into<String>) -> Self {
        Self {
            pixel_width: pixel_size,
            pixel_height: pixel_size,
            unit: unit.into(),
        }
    }
}

impl Default for Calibration {
    fn default() -> Self {
        Self::new(1.0, "pixel")
    }
}

/// Hyperstack dimensions (channels, slices, frames).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StackDimensions {
    pub channels: u32,
    pub slices: u32,
    pub frames: u32,
}

/// Linear stack index of a (slice, frame) pair, both 1-based.
#[inline]
pub fn stack_index(n_slices: u32, slice: u32, frame: u32) -> u32 {
    (frame - 1) * n_slices + slice
}

/// Inverse of [`stack_index`]: returns `(frame, slice)` for a 1-based index.
#[inline]
pub fn stack_position(n_slices: u32, index: u32) -> (u32, u32) {
    ((index - 1) / n_slices + 1, (index - 1) % n_slices + 1)
}

/// An ordered stack of planes with calibration metadata.
#[derive(Debug, Clone)]
pub struct SourceImage {
    title: String,
    planes: Vec<DynamicImage>,
    n_slices: u32,
    n_frames: u32,
    calibration: Calibration,
}

impl SourceImage {
    /// Create a stack from planes in linear stack-index order.
    ///
    /// # Errors
    ///
    /// Returns an error if there are no planes, if `n_slices` or `n_frames`
    /// is zero, if the plane count differs from `n_slices * n_frames`, or if
    /// the planes do not share one size.
    pub fn new(
        title: impl Into<String>,
        planes: Vec<DynamicImage>,
        n_slices: u32,
        n_frames: u32,
        calibration: Calibration,
    ) -> Result<Self, TileError> {
        if n_slices == 0 || n_frames == 0 {
            return Err(TileError::InvalidGeometry(format!(
                "stack needs at least one slice and one frame, got {} x {}",
                n_slices, n_frames
            )));
        }

        let expected = n_slices as usize * n_frames as usize;
        if planes.len() != expected {
            return Err(TileError::PlaneCount {
                expected,
                actual: planes.len(),
            });
        }

        let (width, height) = (planes[0].width(), planes[0].height());
        if width == 0 || height == 0 {
            return Err(TileError::InvalidGeometry(
                "planes must not be empty".to_string(),
            ));
        }
        if let Some(index) = planes
            .iter()
            .position(|p| p.width() != width || p.height() != height)
        {
            return Err(TileError::InvalidGeometry(format!(
                "plane {} is {}x{}, expected {}x{}",
                index + 1,
                planes[index].width(),
                planes[index].height(),
                width,
                height
            )));
        }

        Ok(Self {
            title: title.into(),
            planes,
            n_slices,
            n_frames,
            calibration,
        })
    }

    /// A single-plane image.
    pub fn single(
        title: impl Into<String>,
        plane: DynamicImage,
        calibration: Calibration,
    ) -> Result<Self, TileError> {
        Self::new(title, vec![plane], 1, 1, calibration)
    }

    /// A flat stack: every plane is a slice of a single frame.
    pub fn from_planes(
        title: impl Into<String>,
        planes: Vec<DynamicImage>,
        calibration: Calibration,
    ) -> Result<Self, TileError> {
        let count = u32::try_from(planes.len())
            .map_err(|_| TileError::InvalidGeometry("too many planes".to_string()))?;
        Self::new(title, planes, count, 1, calibration)
    }

    /// Reinterpret the planes as `n_slices` slices over `n_frames` frames.
    pub fn reshape(self, n_slices: u32, n_frames: u32) -> Result<Self, TileError> {
        Self::new(
            self.title,
            self.planes,
            n_slices,
            n_frames,
            self.calibration,
        )
    }

    pub fn title(&self) -> &str {
        &self.title
    }

    pub fn width(&self) -> u32 {
        self.planes[0].width()
    }

    pub fn height(&self) -> u32 {
        self.planes[0].height()
    }

    pub fn n_slices(&self) -> u32 {
        self.n_slices
    }

    pub fn n_frames(&self) -> u32 {
        self.n_frames
    }

    /// Total number of planes (`n_slices * n_frames`).
    pub fn plane_count(&self) -> usize {
        self.planes.len()
    }

    pub fn dimensions(&self) -> StackDimensions {
        StackDimensions {
            channels: 1,
            slices: self.n_slices,
            frames: self.n_frames,
        }
    }

    pub fn calibration(&self) -> &Calibration {
        &self.calibration
    }

    pub fn set_calibration(&mut self, calibration: Calibration) {
        self.calibration = calibration;
    }

    /// Plane at a 1-based stack index.
    pub fn plane(&self, index: u32) -> Option<&DynamicImage> {
        index
            .checked_sub(1)
            .and_then(|i| self.planes.get(i as usize))
    }

    /// Plane at a 1-based (slice, frame) position.
    pub fn plane_at(&self, slice: u32, frame: u32) -> Option<&DynamicImage> {
        if slice == 0 || frame == 0 || slice > self.n_slices || frame > self.n_frames {
            return None;
        }
        self.plane(stack_index(self.n_slices, slice, frame))
    }

    /// All planes in linear stack-index order.
    pub fn planes(&self) -> &[DynamicImage] {
        &self.planes
    }

    pub fn into_planes(self) -> Vec<DynamicImage> {
        self.planes
    }
}
