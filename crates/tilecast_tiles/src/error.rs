use std::fmt;

use thiserror::Error;
use tilecast::{BuildStage, ConfigError, ErrorKind, NavmeshBuildError};

use crate::{TileBlobError, TileCoord};

/// The step of a tile build that failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TileStage {
    /// Checking that the tile belongs to the grid.
    Placement,
    /// Running the build pipeline.
    Pipeline(BuildStage),
    /// Encoding the meshes into the tile blob.
    Encoding,
    /// Adding the tile to the navmesh.
    Commit,
}

impl fmt::Display for TileStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TileStage::Placement => f.write_str("placement"),
            TileStage::Pipeline(stage) => stage.fmt(f),
            TileStage::Encoding => f.write_str("encoding"),
            TileStage::Commit => f.write_str("commit"),
        }
    }
}

/// A failed tile build. The navmesh is left as it was before the build started.
#[derive(Error, Debug)]
#[error("Failed to build tile {coord} during {stage}: {source}")]
pub struct TileBuildError {
    /// The tile that failed.
    pub coord: TileCoord,
    /// The step that failed.
    pub stage: TileStage,
    /// What went wrong.
    pub source: TileBuildFailure,
}

impl TileBuildError {
    pub(crate) fn new(coord: TileCoord, source: impl Into<TileBuildFailure>) -> Self {
        let source = source.into();
        let stage = match &source {
            TileBuildFailure::Build(err) => TileStage::Pipeline(err.stage()),
            TileBuildFailure::OutOfGrid { .. } => TileStage::Placement,
            TileBuildFailure::Blob(_) => TileStage::Encoding,
            TileBuildFailure::TooManyTiles { .. } => TileStage::Commit,
        };
        Self {
            coord,
            stage,
            source,
        }
    }

    /// The category of the failure.
    pub fn kind(&self) -> ErrorKind {
        match &self.source {
            TileBuildFailure::Build(err) => err.kind(),
            TileBuildFailure::OutOfGrid { .. } | TileBuildFailure::Blob(_) => {
                ErrorKind::InvalidInput
            }
            TileBuildFailure::TooManyTiles { .. } => ErrorKind::CapacityExceeded,
        }
    }
}

/// The cause of a [`TileBuildError`].
#[derive(Error, Debug)]
pub enum TileBuildFailure {
    /// The pipeline failed.
    #[error(transparent)]
    Build(#[from] NavmeshBuildError),
    /// The coordinate is not part of the grid.
    #[error("The tile is outside of the {tiles_x}x{tiles_z} tile grid")]
    OutOfGrid {
        /// Number of tile columns.
        tiles_x: u32,
        /// Number of tile rows.
        tiles_z: u32,
    },
    /// The navmesh already holds as many tiles as it can address.
    #[error("The navmesh is full, it holds at most {max} tiles")]
    TooManyTiles {
        /// The tile limit.
        max: usize,
    },
    /// The meshes could not be encoded.
    #[error(transparent)]
    Blob(#[from] TileBlobError),
}

impl From<ConfigError> for TileBuildFailure {
    fn from(err: ConfigError) -> Self {
        TileBuildFailure::Build(NavmeshBuildError::Config(err))
    }
}

/// Errors of [`TileManager`](crate::TileManager) operations that are not tile builds.
#[derive(Error, Debug)]
pub enum TileManagerError {
    /// The settings do not form a valid config.
    #[error("Invalid settings: {0}")]
    InvalidConfig(#[from] ConfigError),
    /// The operation needs a tile size greater than zero.
    #[error("Tiling is disabled, the tile size is zero")]
    TilingDisabled,
    /// Imported tiles were laid out for a different grid.
    #[error("The imported tiles use a {found_x}x{found_z} grid, expected {expected_x}x{expected_z}")]
    GridMismatch {
        /// Tile columns of the current settings.
        expected_x: u32,
        /// Tile rows of the current settings.
        expected_z: u32,
        /// Tile columns of the imported tiles.
        found_x: u32,
        /// Tile rows of the imported tiles.
        found_z: u32,
    },
    /// An imported tile does not fit the grid.
    #[error("The imported tile {coord} is outside of the tile grid")]
    OutOfGrid {
        /// The offending tile.
        coord: TileCoord,
    },
    /// The tile data could not be encoded or decoded.
    #[error(transparent)]
    Blob(#[from] TileBlobError),
}
