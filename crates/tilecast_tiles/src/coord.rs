use std::fmt;

use serde::{Deserialize, Serialize};

/// The integer position of a tile on the xz-plane of a [`TileGrid`](crate::TileGrid).
///
/// Coordinates outside of the grid are representable, e.g. as the result of
/// [`TileGrid::tile_pos`](crate::TileGrid::tile_pos) for a point outside of the world bounds.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize,
)]
pub struct TileCoord {
    /// The column of the tile along the x-axis.
    pub x: i32,
    /// The row of the tile along the z-axis.
    pub z: i32,
}

impl TileCoord {
    /// Creates a new tile coordinate.
    #[inline]
    pub const fn new(x: i32, z: i32) -> Self {
        Self { x, z }
    }
}

impl From<(i32, i32)> for TileCoord {
    #[inline]
    fn from((x, z): (i32, i32)) -> Self {
        Self { x, z }
    }
}

impl fmt::Display for TileCoord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {})", self.x, self.z)
    }
}
