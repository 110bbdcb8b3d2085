//! The layout of tiles over the world bounds.

use glam::{U16Vec3, Vec2, Vec3A};
use serde::{Deserialize, Serialize};
use tilecast::{Aabb3d, NavmeshConfig, PolygonNavmesh};

use crate::TileCoord;

/// The largest number of bits a tile reference may spend on the tile index.
pub const MAX_TILE_BITS: u32 = 14;
/// The number of bits shared between the tile index and the polygon index of a reference.
pub const REFERENCE_BITS: u32 = 22;

/// Splits the world bounds of a [`NavmeshConfig`] into square tiles of `tile_size` cells.
///
/// Tile boundaries lie on the global voxel lattice: the minimum corner of tile `(x, z)` is
/// `aabb.min + (x, z) * tile_size * cell_size`, computed from integer cell counts so that
/// neighboring tiles agree on their shared edge bit for bit.
///
/// When tiling is disabled, the grid holds exactly one tile covering the whole world.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TileGrid {
    /// The world bounds.
    pub aabb: Aabb3d,
    /// The xz-plane cell size. `[Units: wu]`
    pub cell_size: f32,
    /// The y-axis cell size. `[Units: wu]`
    pub cell_height: f32,
    /// The width and depth of a tile, or zero if tiling is disabled. `[Units: vx]`
    pub tile_size: u16,
    /// Number of tile columns.
    pub tiles_x: u32,
    /// Number of tile rows.
    pub tiles_z: u32,
    /// Bits of a reference that address a tile.
    pub tile_bits: u32,
    /// Bits of a reference that address a polygon within a tile.
    pub poly_bits: u32,
}

impl TileGrid {
    /// Lays out the tiles for `config`.
    pub fn new(config: &NavmeshConfig) -> Self {
        let extent = config.aabb.extent();
        let grid_width = (extent.x / config.cell_size + 0.5) as u32;
        let grid_height = (extent.z / config.cell_size + 0.5) as u32;
        let (tiles_x, tiles_z) = if config.is_tiled() {
            let tile_size = config.tile_size as u32;
            (
                grid_width.div_ceil(tile_size),
                grid_height.div_ceil(tile_size),
            )
        } else {
            (1, 1)
        };
        let tile_bits = (tiles_x * tiles_z)
            .max(1)
            .next_power_of_two()
            .ilog2()
            .min(MAX_TILE_BITS);
        Self {
            aabb: config.aabb,
            cell_size: config.cell_size,
            cell_height: config.cell_height,
            tile_size: config.tile_size,
            tiles_x,
            tiles_z,
            tile_bits,
            poly_bits: REFERENCE_BITS - tile_bits,
        }
    }

    /// Whether the world is split into more than one potential tile.
    #[inline]
    pub fn is_tiled(&self) -> bool {
        self.tile_size > 0
    }

    /// The upper bound on the number of tiles held at once.
    #[inline]
    pub fn max_tiles(&self) -> usize {
        1 << self.tile_bits
    }

    /// The upper bound on the number of polygons in a single tile.
    #[inline]
    pub fn max_polygons_per_tile(&self) -> usize {
        1 << self.poly_bits
    }

    /// Number of tiles in the grid.
    #[inline]
    pub fn tile_count(&self) -> usize {
        self.tiles_x as usize * self.tiles_z as usize
    }

    /// The width of a tile on the xz-plane. `[Units: wu]`
    #[inline]
    pub fn tile_world_size(&self) -> f32 {
        self.tile_size as f32 * self.cell_size
    }

    /// Whether `coord` addresses a tile of the grid.
    #[inline]
    pub fn contains(&self, coord: TileCoord) -> bool {
        coord.x >= 0
            && coord.z >= 0
            && (coord.x as u32) < self.tiles_x
            && (coord.z as u32) < self.tiles_z
    }

    /// The row-major slot of `coord`, or `None` if it is outside the grid.
    #[inline]
    pub fn index(&self, coord: TileCoord) -> Option<usize> {
        self.contains(coord)
            .then(|| coord.z as usize * self.tiles_x as usize + coord.x as usize)
    }

    /// All tile coordinates, row by row.
    pub fn coords(&self) -> impl Iterator<Item = TileCoord> + use<> {
        let (tiles_x, tiles_z) = (self.tiles_x as i32, self.tiles_z as i32);
        (0..tiles_z).flat_map(move |z| (0..tiles_x).map(move |x| TileCoord::new(x, z)))
    }

    /// Maps a world-space point to the tile whose [`TileGrid::tile_bounds`] contain it.
    ///
    /// Returns `None` if tiling is disabled. Points outside of the world bounds
    /// map to coordinates outside of the grid.
    pub fn tile_pos(&self, pos: Vec3A) -> Option<TileCoord> {
        if !self.is_tiled() {
            return None;
        }
        Some(TileCoord::new(
            self.lattice_tile(self.aabb.min.x, pos.x),
            self.lattice_tile(self.aabb.min.z, pos.z),
        ))
    }

    /// The minimum corner of the tile footprint on the xz-plane.
    pub fn tile_min(&self, coord: TileCoord) -> Vec2 {
        if !self.is_tiled() {
            return Vec2::new(self.aabb.min.x, self.aabb.min.z);
        }
        Vec2::new(
            self.lattice_to_world(self.aabb.min.x, coord.x as i64 * self.tile_size as i64),
            self.lattice_to_world(self.aabb.min.z, coord.z as i64 * self.tile_size as i64),
        )
    }

    /// The unpadded bounds of a tile, spanning the full world height.
    pub fn tile_bounds(&self, coord: TileCoord) -> Aabb3d {
        if !self.is_tiled() {
            return self.aabb;
        }
        let min = self.tile_min(coord);
        let max = self.tile_min(TileCoord::new(coord.x + 1, coord.z + 1));
        Aabb3d::new(
            Vec3A::new(min.x, self.aabb.min.y, min.y),
            Vec3A::new(max.x, self.aabb.max.y, max.y),
        )
    }

    /// Converts a polygon mesh vertex of the tile at `coord` to world space.
    ///
    /// The xz-position goes through the global cell index, so a vertex on an edge shared by
    /// two tiles maps to the same world position from either side.
    pub fn polygon_vertex_to_world(
        &self,
        coord: TileCoord,
        mesh: &PolygonNavmesh,
        vertex: U16Vec3,
    ) -> Vec3A {
        let (offset_x, offset_z) = if self.is_tiled() {
            (
                coord.x as i64 * self.tile_size as i64,
                coord.z as i64 * self.tile_size as i64,
            )
        } else {
            (0, 0)
        };
        Vec3A::new(
            self.lattice_to_world(self.aabb.min.x, offset_x + vertex.x as i64),
            mesh.aabb.min.y + vertex.y as f32 * mesh.cell_height,
            self.lattice_to_world(self.aabb.min.z, offset_z + vertex.z as i64),
        )
    }

    /// Returns whether two grids lay out tiles identically.
    pub fn is_compatible(&self, other: &TileGrid) -> bool {
        self.tiles_x == other.tiles_x
            && self.tiles_z == other.tiles_z
            && self.tile_size == other.tile_size
            && self.cell_size == other.cell_size
            && self.aabb == other.aabb
    }

    #[inline]
    fn lattice_to_world(&self, origin: f32, cells: i64) -> f32 {
        origin + cells as f32 * self.cell_size
    }

    /// The tile along one axis whose lattice bounds `[min, max)` hold `pos`.
    fn lattice_tile(&self, origin: f32, pos: f32) -> i32 {
        let tile_size = i64::from(self.tile_size);
        let cells = ((pos - origin) / self.cell_size).floor() as i64;
        let mut tile = cells
            .div_euclid(tile_size)
            .clamp(i64::from(i32::MIN) + 1, i64::from(i32::MAX) - 1);
        // The estimate can be one tile off near an edge.
        if pos < self.lattice_to_world(origin, tile * tile_size) {
            tile -= 1;
        } else if pos >= self.lattice_to_world(origin, (tile + 1) * tile_size) {
            tile += 1;
        }
        tile as i32
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tilecast::NavmeshConfigBuilder;

    fn grid(tile_size: u16, size: [f32; 2]) -> TileGrid {
        let config = NavmeshConfigBuilder {
            aabb: Aabb3d::new([0.0, -1.0, 0.0], [size[0], 1.0, size[1]]),
            tile_size,
            ..Default::default()
        }
        .build()
        .unwrap();
        TileGrid::new(&config)
    }

    #[test]
    fn partial_tiles_are_rounded_up() {
        // 100 x 34 cells at 0.3 wu per cell.
        let grid = grid(32, [30.0, 10.2]);
        assert_eq!((grid.tiles_x, grid.tiles_z), (4, 2));
        assert_eq!(grid.tile_count(), 8);
        assert_eq!(grid.tile_bits, 3);
        assert_eq!(grid.poly_bits, 19);
        assert_eq!(grid.max_tiles(), 8);
        assert_eq!(grid.max_polygons_per_tile(), 1 << 19);
    }

    #[test]
    fn tile_bits_are_capped() {
        let grid = grid(1, [90.0, 90.0]);
        assert_eq!(grid.tile_bits, MAX_TILE_BITS);
        assert_eq!(grid.poly_bits, REFERENCE_BITS - MAX_TILE_BITS);
    }

    #[test]
    fn untiled_grid_is_one_tile() {
        let grid = grid(0, [30.0, 10.0]);
        assert_eq!(grid.tile_count(), 1);
        assert_eq!(grid.tile_bits, 0);
        assert_eq!(grid.tile_bounds(TileCoord::new(0, 0)), grid.aabb);
        assert_eq!(grid.tile_pos(Vec3A::new(1.0, 0.0, 1.0)), None);
    }

    #[test]
    fn coords_are_row_major() {
        let grid = grid(32, [19.2, 19.2]);
        let coords: Vec<_> = grid.coords().collect();
        assert_eq!(
            coords,
            vec![
                TileCoord::new(0, 0),
                TileCoord::new(1, 0),
                TileCoord::new(0, 1),
                TileCoord::new(1, 1),
            ]
        );
        for (index, coord) in coords.iter().enumerate() {
            assert_eq!(grid.index(*coord), Some(index));
        }
        assert_eq!(grid.index(TileCoord::new(2, 0)), None);
        assert_eq!(grid.index(TileCoord::new(-1, 0)), None);
    }

    #[test]
    fn tile_pos_uses_floor_division() {
        let grid = grid(32, [19.2, 19.2]);
        assert_eq!(
            grid.tile_pos(Vec3A::new(10.0, 0.0, 1.0)),
            Some(TileCoord::new(1, 0))
        );
        assert_eq!(
            grid.tile_pos(Vec3A::new(-0.5, 0.0, 30.0)),
            Some(TileCoord::new(-1, 3))
        );
    }

    #[test]
    fn neighbors_share_bounds() {
        let grid = grid(32, [19.2, 19.2]);
        let left = grid.tile_bounds(TileCoord::new(0, 0));
        let right = grid.tile_bounds(TileCoord::new(1, 0));
        assert_eq!(left.max.x, right.min.x);
        assert_eq!(left.min.z, right.min.z);
    }

    #[test]
    fn tile_pos_inverts_tile_bounds_off_origin() {
        let config = NavmeshConfigBuilder {
            aabb: Aabb3d::new([1000.1, -1.0, -333.7], [1100.0, 1.0, -200.0]),
            tile_size: 32,
            ..Default::default()
        }
        .build()
        .unwrap();
        let grid = TileGrid::new(&config);
        // The next representable value towards negative infinity.
        let below = |value: f32| match value {
            v if v > 0.0 => f32::from_bits(v.to_bits() - 1),
            v if v < 0.0 => f32::from_bits(v.to_bits() + 1),
            _ => -f32::from_bits(1),
        };
        for coord in grid.coords() {
            let min = grid.tile_bounds(coord).min;
            assert_eq!(grid.tile_pos(min), Some(coord));
            let before = Vec3A::new(below(min.x), 0.0, below(min.z));
            assert_eq!(
                grid.tile_pos(before),
                Some(TileCoord::new(coord.x - 1, coord.z - 1))
            );
        }
    }
}
