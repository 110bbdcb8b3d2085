//! Tile management for [`tilecast`] navmeshes.
//!
//! A [`TileManager`] splits the bounds of its input geometry into a [`TileGrid`] of square tiles
//! and builds them on demand with [`tilecast::build_navmesh`]. Each built [`Tile`] stores its
//! polygon and detail meshes as an encoded blob in a [`TiledNavmesh`].
//!
//! ```no_run
//! use glam::Vec3A;
//! use tilecast::{Aabb3d, NavmeshConfigBuilder, TriMesh};
//! use tilecast_tiles::{BuildAllOptions, TileManager};
//!
//! # fn load_level() -> TriMesh { TriMesh::default() }
//! let geometry = load_level();
//! let settings = NavmeshConfigBuilder {
//!     aabb: Aabb3d::new([0.0, -5.0, 0.0], [100.0, 20.0, 100.0]),
//!     ..Default::default()
//! };
//! let mut manager = TileManager::new(geometry, settings);
//! let report = manager.build_all_tiles(&BuildAllOptions::default())?;
//! println!("built {} tiles", report.built.len());
//!
//! // Rebuild the tile under a changed spot.
//! let coord = manager.get_tile_pos(Vec3A::new(42.0, 0.0, 17.0))?;
//! manager.build_tile(coord)?;
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

mod coord;
mod draw_mode;
mod error;
mod grid;
mod manager;
mod navmesh;
mod tile;

pub use coord::TileCoord;
pub use draw_mode::DrawMode;
pub use error::{TileBuildError, TileBuildFailure, TileManagerError, TileStage};
pub use grid::{MAX_TILE_BITS, REFERENCE_BITS, TileGrid};
pub use manager::{
    BuildAllOptions, BuildAllReport, RetainedIntermediates, StopReason, TileManager, TileStatus,
};
pub use navmesh::TiledNavmesh;
pub use tile::{Tile, TileBlobError, TileData};
