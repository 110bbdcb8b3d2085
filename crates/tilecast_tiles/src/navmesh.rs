use serde::{Deserialize, Serialize};

use crate::{Tile, TileCoord, TileGrid};

/// The set of tiles built so far, one optional slot per grid cell.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TiledNavmesh {
    grid: Option<TileGrid>,
    tiles: Vec<Option<Tile>>,
}

impl TiledNavmesh {
    /// Creates an empty navmesh laid out on `grid`.
    pub fn new(grid: TileGrid) -> Self {
        Self {
            tiles: vec![None; grid.tile_count()],
            grid: Some(grid),
        }
    }

    /// The grid the tiles are laid out on, if one was set.
    #[inline]
    pub fn grid(&self) -> Option<&TileGrid> {
        self.grid.as_ref()
    }

    /// The tile at `coord`, if one was built.
    pub fn tile(&self, coord: TileCoord) -> Option<&Tile> {
        let index = self.grid.as_ref()?.index(coord)?;
        self.tiles.get(index)?.as_ref()
    }

    /// All built tiles, row by row.
    pub fn tiles(&self) -> impl Iterator<Item = &Tile> {
        self.tiles.iter().flatten()
    }

    /// Number of built tiles.
    pub fn tile_count(&self) -> usize {
        self.tiles().count()
    }

    /// Number of polygons over all built tiles.
    pub fn polygon_count(&self) -> usize {
        self.tiles().map(|tile| tile.polygon_count).sum()
    }

    /// Size of all tile blobs in bytes.
    pub fn memory_usage(&self) -> usize {
        self.tiles().map(Tile::memory_usage).sum()
    }

    /// Whether no tile is built.
    pub fn is_empty(&self) -> bool {
        self.tiles().next().is_none()
    }

    /// Drops all tiles and lays out a new grid if it differs from the current one.
    pub(crate) fn ensure_grid(&mut self, grid: &TileGrid) {
        if self.grid.as_ref() != Some(grid) {
            *self = Self::new(*grid);
        }
    }

    /// Puts `tile` into slot `index`, returning the committed tile and the one it replaced.
    pub(crate) fn insert(&mut self, index: usize, tile: Tile) -> (&Tile, Option<Tile>) {
        let slot = &mut self.tiles[index];
        let previous = slot.take();
        let tile: &Tile = slot.insert(tile);
        (tile, previous)
    }

    pub(crate) fn remove(&mut self, coord: TileCoord) -> Option<Tile> {
        let index = self.grid.as_ref()?.index(coord)?;
        self.tiles.get_mut(index)?.take()
    }

    /// Empties every slot and returns how many tiles were removed.
    pub(crate) fn clear(&mut self) -> usize {
        self.tiles.iter_mut().filter_map(Option::take).count()
    }
}

/// The serialized form of a [`TiledNavmesh`]. Encoded from borrowed tiles, decoded into owned ones.
#[derive(Debug, Serialize, Deserialize)]
pub(crate) struct TileSet<T> {
    pub(crate) grid: TileGrid,
    pub(crate) tiles: Vec<T>,
}
