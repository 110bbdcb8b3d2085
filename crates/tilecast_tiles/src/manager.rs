//! Building, replacing and removing tiles of a [`TiledNavmesh`].

use std::{
    collections::HashSet,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    time::{Duration, Instant},
};

use glam::Vec3A;
use tilecast::{
    Aabb3d, BuildIntermediates, ConfigError, NavmeshConfig, NavmeshConfigBuilder, TriMesh,
    build_navmesh,
};
use tracing::{debug, debug_span, info, info_span, warn};

use crate::{
    Tile, TileBuildError, TileBuildFailure, TileCoord, TileData, TileGrid, TileManagerError,
    TiledNavmesh,
    navmesh::TileSet,
    tile::{decode, encode},
};

/// Builds tiles of input geometry on demand and keeps them in a [`TiledNavmesh`].
///
/// Every build reads the current settings and validates them before anything is allocated.
/// A tile is only replaced once its rebuild has fully succeeded, so a failed build
/// leaves the previously committed tile in place.
#[derive(Debug, Clone)]
pub struct TileManager {
    geometry: TriMesh,
    settings: NavmeshConfigBuilder,
    navmesh: TiledNavmesh,
    failed: HashSet<TileCoord>,
    keep_intermediate_results: bool,
    intermediates: Option<RetainedIntermediates>,
    last_built_tile: Option<Aabb3d>,
    last_tile_build_time: Duration,
    total_build_time: Duration,
}

/// Where a tile is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TileStatus {
    /// Nothing was committed for the tile.
    Absent,
    /// The tile holds the result of its latest build.
    Built,
    /// The latest build of the tile failed.
    Failed {
        /// Whether an older build of the tile is still committed.
        retained_previous: bool,
    },
}

/// Controls how [`TileManager::build_all_tiles`] stops early.
#[derive(Debug, Clone, Default)]
pub struct BuildAllOptions {
    /// Checked before every tile. Tiles that were already committed stay.
    pub cancel: Option<Arc<AtomicBool>>,
    /// No new tile is started after this instant.
    pub deadline: Option<Instant>,
}

impl BuildAllOptions {
    fn stop_reason(&self) -> Option<StopReason> {
        if self
            .cancel
            .as_ref()
            .is_some_and(|cancel| cancel.load(Ordering::Relaxed))
        {
            Some(StopReason::Cancelled)
        } else if self.deadline.is_some_and(|deadline| Instant::now() >= deadline) {
            Some(StopReason::DeadlineExceeded)
        } else {
            None
        }
    }
}

/// Why [`TileManager::build_all_tiles`] skipped tiles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StopReason {
    /// The cancellation flag was raised.
    Cancelled,
    /// The deadline passed.
    DeadlineExceeded,
}

/// The outcome of [`TileManager::build_all_tiles`].
#[derive(Debug, Default)]
pub struct BuildAllReport {
    /// Tiles that were built and committed.
    pub built: Vec<TileCoord>,
    /// Tiles that failed. Their previous builds, if any, are still committed.
    pub failures: Vec<TileBuildError>,
    /// Tiles that were not attempted because the batch stopped early.
    pub skipped: Vec<TileCoord>,
    /// Wall time of the whole batch.
    pub total_build_time: Duration,
    /// Set if the batch stopped before attempting every tile.
    pub stopped: Option<StopReason>,
}

/// The fields of the most recently built tile, kept for inspection.
#[derive(Debug, Clone)]
pub struct RetainedIntermediates {
    /// The tile the fields belong to.
    pub coord: TileCoord,
    /// The fields.
    pub intermediates: BuildIntermediates,
}

impl TileManager {
    /// Creates a manager without any tiles.
    ///
    /// Invalid settings are accepted here and reported by the first build.
    pub fn new(geometry: TriMesh, settings: NavmeshConfigBuilder) -> Self {
        let mut manager = Self {
            geometry,
            settings,
            navmesh: TiledNavmesh::default(),
            failed: HashSet::new(),
            keep_intermediate_results: false,
            intermediates: None,
            last_built_tile: None,
            last_tile_build_time: Duration::ZERO,
            total_build_time: Duration::ZERO,
        };
        manager.reset();
        manager
    }

    /// The input geometry.
    #[inline]
    pub fn geometry(&self) -> &TriMesh {
        &self.geometry
    }

    /// Replaces the input geometry and removes all tiles.
    pub fn set_geometry(&mut self, geometry: TriMesh) {
        self.geometry = geometry;
        self.reset();
    }

    /// The settings every build reads.
    #[inline]
    pub fn settings(&self) -> &NavmeshConfigBuilder {
        &self.settings
    }

    /// Replaces the settings used by the next builds.
    ///
    /// Committed tiles are kept unless the new settings lay out a different grid.
    pub fn set_settings(&mut self, settings: NavmeshConfigBuilder) {
        self.settings = settings;
        if let Ok(grid) = self.grid() {
            if self.navmesh.grid() != Some(&grid) {
                self.reset();
            }
        }
    }

    /// Derives the config from the current settings.
    pub fn config(&self) -> Result<NavmeshConfig, ConfigError> {
        self.settings.clone().build()
    }

    /// The tile grid of the current settings.
    pub fn grid(&self) -> Result<TileGrid, TileManagerError> {
        Ok(TileGrid::new(&self.config()?))
    }

    /// The tiles built so far.
    #[inline]
    pub fn navmesh(&self) -> &TiledNavmesh {
        &self.navmesh
    }

    /// Maps a world-space point to the coordinate of the tile containing it.
    pub fn get_tile_pos(&self, pos: Vec3A) -> Result<TileCoord, TileManagerError> {
        self.grid()?
            .tile_pos(pos)
            .ok_or(TileManagerError::TilingDisabled)
    }

    /// Where the tile at `coord` is in its lifecycle.
    pub fn tile_status(&self, coord: TileCoord) -> TileStatus {
        let built = self.navmesh.tile(coord).is_some();
        if self.failed.contains(&coord) {
            TileStatus::Failed {
                retained_previous: built,
            }
        } else if built {
            TileStatus::Built
        } else {
            TileStatus::Absent
        }
    }

    /// Whether builds keep their intermediate fields.
    #[inline]
    pub fn keep_intermediate_results(&self) -> bool {
        self.keep_intermediate_results
    }

    /// Sets whether builds keep their intermediate fields. Turning it off drops the retained ones.
    pub fn set_keep_intermediate_results(&mut self, keep: bool) {
        self.keep_intermediate_results = keep;
        if !keep {
            self.intermediates = None;
        }
    }

    /// The fields of the most recently built tile, if they were kept.
    #[inline]
    pub fn intermediate_results(&self) -> Option<&RetainedIntermediates> {
        self.intermediates.as_ref()
    }

    /// Drops the retained intermediate fields.
    pub fn clear_intermediate_results(&mut self) {
        self.intermediates = None;
    }

    /// The bounds of the most recently committed tile.
    #[inline]
    pub fn last_built_tile_bounds(&self) -> Option<Aabb3d> {
        self.last_built_tile
    }

    /// How long the most recently committed tile took to build.
    #[inline]
    pub fn last_tile_build_time(&self) -> Duration {
        self.last_tile_build_time
    }

    /// Wall time of the last [`TileManager::build_all_tiles`].
    #[inline]
    pub fn total_build_time(&self) -> Duration {
        self.total_build_time
    }

    /// Builds the tile at `coord` and commits it, replacing any previous build of it.
    ///
    /// On failure, nothing is committed and a previous build of the tile stays in place.
    pub fn build_tile(&mut self, coord: TileCoord) -> Result<&Tile, TileBuildError> {
        let (config, grid) = match self.prepare() {
            Ok(prepared) => prepared,
            Err(err) => return Err(self.record_failure(TileBuildError::new(coord, err))),
        };
        let result = self.job(&config, &grid).build(coord);
        let tile = self.finish(result, &grid)?;
        info!(
            %coord,
            polygons = tile.polygon_count,
            bytes = tile.memory_usage(),
            build_time = ?tile.build_time,
            "Built tile"
        );
        Ok(tile)
    }

    /// Builds every tile of the grid, row by row.
    ///
    /// Failed tiles are reported and do not stop the batch. Raising the cancellation flag or
    /// passing the deadline stops it before the next tile, keeping what was committed so far.
    pub fn build_all_tiles(
        &mut self,
        options: &BuildAllOptions,
    ) -> Result<BuildAllReport, TileManagerError> {
        let start = Instant::now();
        let (config, grid) = self.prepare()?;
        let _span = info_span!("build_all_tiles", tiles = grid.tile_count()).entered();
        let mut report = BuildAllReport::default();
        // Only the last tile's intermediates survive the batch.
        let last = grid.coords().last();

        #[cfg(not(feature = "parallel"))]
        for coord in grid.coords() {
            if report.stopped.is_none() {
                report.stopped = options.stop_reason();
            }
            if report.stopped.is_some() {
                report.skipped.push(coord);
                continue;
            }
            let result = self
                .job(&config, &grid)
                .keeping_intermediates(Some(coord) == last)
                .build(coord);
            match self.finish(result, &grid) {
                Ok(_) => report.built.push(coord),
                Err(err) => report.failures.push(err),
            }
        }

        #[cfg(feature = "parallel")]
        {
            use rayon::prelude::*;

            let job = self.job(&config, &grid);
            let coords: Vec<_> = grid.coords().collect();
            let results: Vec<_> = coords
                .into_par_iter()
                .map(|coord| {
                    let job = job.keeping_intermediates(Some(coord) == last);
                    let result = options.stop_reason().is_none().then(|| job.build(coord));
                    (coord, result)
                })
                .collect();
            // Commit in grid order so the outcome does not depend on scheduling.
            for (coord, result) in results {
                let Some(result) = result else {
                    report.skipped.push(coord);
                    continue;
                };
                match self.finish(result, &grid) {
                    Ok(_) => report.built.push(coord),
                    Err(err) => report.failures.push(err),
                }
            }
            if !report.skipped.is_empty() {
                report.stopped = options.stop_reason();
            }
        }

        report.total_build_time = start.elapsed();
        self.total_build_time = report.total_build_time;
        if let Some(reason) = report.stopped {
            warn!(?reason, skipped = report.skipped.len(), "Stopped building tiles early");
        }
        info!(
            built = report.built.len(),
            failed = report.failures.len(),
            total_build_time = ?report.total_build_time,
            "Built all tiles"
        );
        Ok(report)
    }

    /// Removes the tile at `coord`. Removing a tile that does not exist does nothing.
    pub fn remove_tile(&mut self, coord: TileCoord) -> Option<Tile> {
        self.failed.remove(&coord);
        let removed = self.navmesh.remove(coord);
        if removed.is_some() {
            info!(%coord, "Removed tile");
        }
        removed
    }

    /// Removes every tile and returns how many there were.
    pub fn remove_all_tiles(&mut self) -> usize {
        self.failed.clear();
        let removed = self.navmesh.clear();
        info!(removed, "Removed all tiles");
        removed
    }

    /// Encodes all committed tiles together with their grid.
    pub fn export_tiles(&self) -> Result<Vec<u8>, TileManagerError> {
        let set = TileSet {
            grid: self.grid()?,
            tiles: self.navmesh.tiles().collect(),
        };
        Ok(encode(&set)?)
    }

    /// Replaces all tiles with ones previously produced by [`TileManager::export_tiles`].
    ///
    /// The tiles must have been built for the grid of the current settings.
    /// Nothing changes if any tile is rejected.
    pub fn import_tiles(&mut self, bytes: &[u8]) -> Result<usize, TileManagerError> {
        let set: TileSet<Tile> = decode(bytes)?;
        let (_, grid) = self.prepare()?;
        if !grid.is_compatible(&set.grid) {
            return Err(TileManagerError::GridMismatch {
                expected_x: grid.tiles_x,
                expected_z: grid.tiles_z,
                found_x: set.grid.tiles_x,
                found_z: set.grid.tiles_z,
            });
        }
        let slots = set
            .tiles
            .into_iter()
            .map(|tile| match grid.index(tile.coord) {
                Some(index) => Ok((index, tile)),
                None => Err(TileManagerError::OutOfGrid { coord: tile.coord }),
            })
            .collect::<Result<Vec<_>, _>>()?;

        self.failed.clear();
        self.navmesh.clear();
        let imported = slots.len();
        for (index, tile) in slots {
            self.navmesh.insert(index, tile);
        }
        info!(imported, "Imported tiles");
        Ok(imported)
    }

    fn reset(&mut self) {
        self.navmesh = self
            .grid()
            .map(TiledNavmesh::new)
            .unwrap_or_default();
        self.failed.clear();
        self.intermediates = None;
        self.last_built_tile = None;
        self.last_tile_build_time = Duration::ZERO;
        self.total_build_time = Duration::ZERO;
    }

    fn prepare(&mut self) -> Result<(NavmeshConfig, TileGrid), ConfigError> {
        let config = self.config()?;
        let grid = TileGrid::new(&config);
        self.navmesh.ensure_grid(&grid);
        Ok((config, grid))
    }

    fn job<'a>(&'a self, config: &'a NavmeshConfig, grid: &'a TileGrid) -> TileJob<'a> {
        TileJob {
            geometry: &self.geometry,
            config,
            grid,
            keep_intermediates: self.keep_intermediate_results,
        }
    }

    fn finish(
        &mut self,
        result: Result<BuiltTile, TileBuildError>,
        grid: &TileGrid,
    ) -> Result<&Tile, TileBuildError> {
        match result {
            Ok(built) => self.commit(built, grid),
            Err(err) => Err(self.record_failure(err)),
        }
    }

    fn commit(&mut self, built: BuiltTile, grid: &TileGrid) -> Result<&Tile, TileBuildError> {
        let coord = built.tile.coord;
        let Some(index) = grid.index(coord) else {
            return Err(self.record_failure(TileBuildError::new(
                coord,
                TileBuildFailure::OutOfGrid {
                    tiles_x: grid.tiles_x,
                    tiles_z: grid.tiles_z,
                },
            )));
        };
        if self.navmesh.tile(coord).is_none() && self.navmesh.tile_count() >= grid.max_tiles() {
            return Err(self.record_failure(TileBuildError::new(
                coord,
                TileBuildFailure::TooManyTiles {
                    max: grid.max_tiles(),
                },
            )));
        }

        self.failed.remove(&coord);
        self.last_built_tile = Some(built.tile.aabb);
        self.last_tile_build_time = built.tile.build_time;
        if let Some(intermediates) = built.intermediates {
            self.intermediates = Some(RetainedIntermediates {
                coord,
                intermediates,
            });
        }
        let (tile, previous) = self.navmesh.insert(index, built.tile);
        debug!(%coord, replaced = previous.is_some(), "Committed tile");
        Ok(tile)
    }

    fn record_failure(&mut self, err: TileBuildError) -> TileBuildError {
        if !matches!(err.source, TileBuildFailure::OutOfGrid { .. }) {
            self.failed.insert(err.coord);
        }
        warn!(coord = %err.coord, stage = %err.stage, kind = ?err.kind(), "{err}");
        err
    }
}

/// Everything a single tile build reads. Shared between threads when building in parallel.
#[derive(Clone, Copy)]
struct TileJob<'a> {
    geometry: &'a TriMesh,
    config: &'a NavmeshConfig,
    grid: &'a TileGrid,
    keep_intermediates: bool,
}

struct BuiltTile {
    tile: Tile,
    intermediates: Option<BuildIntermediates>,
}

impl TileJob<'_> {
    /// Drops intermediate results unless `keep` is set and they were requested.
    fn keeping_intermediates(self, keep: bool) -> Self {
        Self {
            keep_intermediates: self.keep_intermediates && keep,
            ..self
        }
    }

    fn build(&self, coord: TileCoord) -> Result<BuiltTile, TileBuildError> {
        let _span = debug_span!("build_tile", %coord).entered();
        let start = Instant::now();
        if !self.grid.contains(coord) {
            return Err(TileBuildError::new(
                coord,
                TileBuildFailure::OutOfGrid {
                    tiles_x: self.grid.tiles_x,
                    tiles_z: self.grid.tiles_z,
                },
            ));
        }

        let mut config = if self.grid.is_tiled() {
            self.config.tile_config(self.grid.tile_min(coord))
        } else {
            self.config.clone()
        };
        let grid_limit = self.grid.max_polygons_per_tile();
        config.max_polygons_per_tile = Some(
            self.config
                .max_polygons_per_tile
                .map_or(grid_limit, |limit| limit.min(grid_limit)),
        );

        let artifacts = build_navmesh(self.geometry, &config, self.keep_intermediates)
            .map_err(|err| TileBuildError::new(coord, err))?;
        let polygon_count = artifacts.polygon_mesh.polygon_count();
        let data = TileData {
            polygon_mesh: artifacts.polygon_mesh,
            detail_mesh: artifacts.detail_mesh,
        }
        .encode()
        .map_err(|err| TileBuildError::new(coord, err))?;

        Ok(BuiltTile {
            tile: Tile {
                coord,
                aabb: self.grid.tile_bounds(coord),
                data,
                build_time: start.elapsed(),
                triangle_count: artifacts.rasterized_triangles,
                polygon_count,
            },
            intermediates: artifacts.intermediates,
        })
    }
}

#[cfg(test)]
mod tests {
    use glam::{UVec3, Vec3A};
    use tilecast::AreaType;

    use super::*;

    fn manager() -> TileManager {
        let geometry = TriMesh {
            vertices: vec![
                Vec3A::new(0.0, 0.0, 0.0),
                Vec3A::new(19.2, 0.0, 0.0),
                Vec3A::new(0.0, 0.0, 9.6),
                Vec3A::new(19.2, 0.0, 9.6),
            ],
            indices: vec![UVec3::new(0, 2, 1), UVec3::new(1, 2, 3)],
            area_types: vec![AreaType::NOT_WALKABLE; 2],
        };
        TileManager::new(
            geometry,
            NavmeshConfigBuilder {
                aabb: Aabb3d::new([0.0, -1.0, 0.0], [19.2, 1.0, 9.6]),
                tile_size: 32,
                ..Default::default()
            },
        )
    }

    #[test]
    fn jobs_only_keep_intermediates_when_asked() {
        let mut manager = manager();
        manager.set_keep_intermediate_results(true);
        let (config, grid) = manager.prepare().unwrap();
        let job = manager.job(&config, &grid);
        let coord = TileCoord::new(0, 0);

        assert!(job.build(coord).unwrap().intermediates.is_some());
        let dropped = job.keeping_intermediates(false).build(coord).unwrap();
        assert!(dropped.intermediates.is_none());
        assert!(dropped.tile.polygon_count > 0);

        manager.set_keep_intermediate_results(false);
        let job = manager.job(&config, &grid);
        assert!(job.keeping_intermediates(true).build(coord).unwrap().intermediates.is_none());
    }
}
