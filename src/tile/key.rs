//! Tile keys and their on-disk names.
//!
//! A key is the triple (stack index, x origin, y origin) rendered as
//! `SSSS-XXXX-YYYY`, each field zero-padded to four digits. The remote side
//! stores each tile as `SSSS-XXXX-YYYY.png`.
//!
//! Components above [`KEY_FIELD_MAX`] are rejected when the key is built,
//! so two distinct tiles can never share a name.

use std::fmt;
use std::str::FromStr;

use crate::error::TileError;

/// Largest value a four-digit key field can hold.
pub const KEY_FIELD_MAX: u32 = 9999;

/// File extension of tile files.
pub const TILE_EXTENSION: &str = "png";

/// Identifies one tile of one plane.
///
/// Keys order by stack index, then x, then y, which is the order the tiler
/// produces them in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TileKey {
    stack_index: u32,
    x: u32,
    y: u32,
}

impl TileKey {
    /// Build a key, rejecting components that do not fit in four digits.
    pub fn new(stack_index: u32, x: u32, y: u32) -> Result<Self, TileError> {
        check_field("stack_index", stack_index)?;
        check_field("x", x)?;
        check_field("y", y)?;
        Ok(Self { stack_index, x, y })
    }

    /// 1-based stack index of the plane this tile belongs to.
    pub fn stack_index(&self) -> u32 {
        self.stack_index
    }

    /// Pixel x origin of the tile in the padded canvas.
    pub fn x(&self) -> u32 {
        self.x
    }

    /// Pixel y origin of the tile in the padded canvas.
    pub fn y(&self) -> u32 {
        self.y
    }

    /// Remote file name, e.g. `0001-0224-0448.png`.
    pub fn file_name(&self) -> String {
        format!("{}.{}", self, TILE_EXTENSION)
    }
}

fn check_field(field: &'static str, value: u32) -> Result<(), TileError> {
    if value > KEY_FIELD_MAX {
        return Err(TileError::KeyOverflow {
            field,
            value,
            max: KEY_FIELD_MAX,
        });
    }
    Ok(())
}

impl fmt::Display for TileKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:04}-{:04}-{:04}", self.stack_index, self.x, self.y)
    }
}

impl FromStr for TileKey {
    type Err = TileError;

    /// Parse either `SSSS-XXXX-YYYY` or `SSSS-XXXX-YYYY.png`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let stem = s
            .strip_suffix(".png")
            .or_else(|| s.strip_suffix(".PNG"))
            .unwrap_or(s);

        let fields: Vec<&str> = stem.split('-').collect();
        if fields.len() != 3 {
            return Err(TileError::InvalidKey(s.to_string()));
        }

        let mut values = [0u32; 3];
        for (value, field) in values.iter_mut().zip(&fields) {
            if field.len() != 4 || !field.bytes().all(|b| b.is_ascii_digit()) {
                return Err(TileError::InvalidKey(s.to_string()));
            }
            *value = field
                .parse()
                .map_err(|_| TileError::InvalidKey(s.to_string()))?;
        }

        Self::new(values[0], values[1], values[2])
    }
}
