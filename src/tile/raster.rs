//! Pixel-level helpers shared by the tiler and the stitcher.
//!
//! Planes are handled in one of three layouts: 8-bit gray, 16-bit gray or
//! 8-bit RGB. Everything else is converted to RGB first. Copies between
//! canvases are exact within a layout.

use std::borrow::Cow;

use image::imageops::{self, FilterType};
use image::{DynamicImage, GrayImage, ImageBuffer, Luma, Pixel};

/// Normalize a plane to one of the supported layouts.
pub(crate) fn working_plane(plane: &DynamicImage) -> Cow<'_, DynamicImage> {
    match plane {
        DynamicImage::ImageLuma8(_) | DynamicImage::ImageLuma16(_) | DynamicImage::ImageRgb8(_) => {
            Cow::Borrowed(plane)
        }
        DynamicImage::ImageLumaA8(_) => Cow::Owned(DynamicImage::ImageLuma8(plane.to_luma8())),
        DynamicImage::ImageLumaA16(_) => Cow::Owned(DynamicImage::ImageLuma16(plane.to_luma16())),
        other => Cow::Owned(DynamicImage::ImageRgb8(other.to_rgb8())),
    }
}

/// Bilinear resample to `width` x `height`. Same-size input is returned as is.
pub(crate) fn resample(plane: &DynamicImage, width: u32, height: u32) -> DynamicImage {
    if plane.width() == width && plane.height() == height {
        return plane.clone();
    }
    plane.resize_exact(width, height, FilterType::Triangle)
}

/// Pixel layout of a working plane.
///
/// Ordered from narrowest to widest. Color only ever survives in `Rgb8`, so
/// it outranks the 16-bit gray layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub(crate) enum Layout {
    Luma8,
    Luma16,
    Rgb8,
}

impl Layout {
    /// The working layout `plane` is handled in.
    pub(crate) fn of(plane: &DynamicImage) -> Self {
        match plane {
            DynamicImage::ImageLuma8(_) | DynamicImage::ImageLumaA8(_) => Layout::Luma8,
            DynamicImage::ImageLuma16(_) | DynamicImage::ImageLumaA16(_) => Layout::Luma16,
            _ => Layout::Rgb8,
        }
    }

    /// The widest layout among `planes`, or `None` if there are none.
    pub(crate) fn widest<'a>(planes: impl IntoIterator<Item = &'a DynamicImage>) -> Option<Self> {
        planes.into_iter().map(Layout::of).max()
    }

    /// A zero-filled canvas in this layout.
    pub(crate) fn blank(self, width: u32, height: u32) -> DynamicImage {
        match self {
            Layout::Luma8 => DynamicImage::ImageLuma8(ImageBuffer::new(width, height)),
            Layout::Luma16 => DynamicImage::ImageLuma16(ImageBuffer::new(width, height)),
            Layout::Rgb8 => DynamicImage::ImageRgb8(ImageBuffer::new(width, height)),
        }
    }

    /// Convert `plane` into this layout.
    pub(crate) fn conform(self, plane: DynamicImage) -> DynamicImage {
        let exact = matches!(
            (self, &plane),
            (Layout::Luma8, DynamicImage::ImageLuma8(_))
                | (Layout::Luma16, DynamicImage::ImageLuma16(_))
                | (Layout::Rgb8, DynamicImage::ImageRgb8(_))
        );
        if exact {
            return plane;
        }
        match self {
            Layout::Luma8 => DynamicImage::ImageLuma8(plane.to_luma8()),
            Layout::Luma16 => DynamicImage::ImageLuma16(plane.to_luma16()),
            Layout::Rgb8 => DynamicImage::ImageRgb8(plane.to_rgb8()),
        }
    }
}

/// Copy `tile` onto `canvas` with its top-left corner at (`x`, `y`).
///
/// The tile is converted to the canvas layout, so a canvas narrower than the
/// tile loses information. Tile pixels falling outside the canvas are
/// dropped.
pub(crate) fn paste(canvas: &mut DynamicImage, tile: &DynamicImage, x: u32, y: u32) {
    let (x, y) = (i64::from(x), i64::from(y));
    match canvas {
        DynamicImage::ImageLuma8(buf) => imageops::replace(buf, &tile.to_luma8(), x, y),
        DynamicImage::ImageLuma16(buf) => imageops::replace(buf, &tile.to_luma16(), x, y),
        DynamicImage::ImageRgb8(buf) => imageops::replace(buf, &tile.to_rgb8(), x, y),
        other => {
            let mut buf = other.to_rgb8();
            imageops::replace(&mut buf, &tile.to_rgb8(), x, y);
            *other = DynamicImage::ImageRgb8(buf);
        }
    }
}

/// Grow the canvas to `width` x `height`, anchoring the plane top-left and
/// filling the new margin with zeros.
pub(crate) fn extend_canvas(plane: &DynamicImage, width: u32, height: u32) -> DynamicImage {
    let mut canvas = Layout::of(plane).blank(width, height);
    paste(&mut canvas, plane, 0, 0);
    canvas
}

/// Whether an RGB plane only carries gray values (r == g == b everywhere).
pub(crate) fn is_gray_rgb(plane: &DynamicImage) -> bool {
    match plane {
        DynamicImage::ImageRgb8(buf) => buf.pixels().all(|p| {
            let [r, g, b] = p.0;
            r == g && g == b
        }),
        _ => false,
    }
}

/// Reduce a gray-carrying RGB plane to 8-bit single channel.
pub(crate) fn to_single_channel(plane: DynamicImage) -> DynamicImage {
    match plane {
        DynamicImage::ImageRgb8(buf) => {
            let gray = GrayImage::from_fn(buf.width(), buf.height(), |x, y| {
                Luma([buf.get_pixel(x, y).channels()[0]])
            });
            DynamicImage::ImageLuma8(gray)
        }
        other => other,
    }
}
