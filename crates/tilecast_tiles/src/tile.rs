//! Built tiles and their binary form.

use std::time::Duration;

use glam::Vec3A;
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use thiserror::Error;
use tilecast::{Aabb3d, DetailNavmesh, PolygonNavmesh};

use crate::{TileCoord, TileGrid};

/// The meshes of a single tile, as stored in [`Tile::data`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TileData {
    /// The polygon mesh, in voxel coordinates relative to the tile.
    pub polygon_mesh: PolygonNavmesh,
    /// The detail mesh, in world coordinates.
    pub detail_mesh: DetailNavmesh,
}

impl TileData {
    /// Encodes the meshes into a blob.
    pub fn encode(&self) -> Result<Vec<u8>, TileBlobError> {
        encode(self)
    }

    /// Decodes meshes previously produced by [`TileData::encode`].
    pub fn decode(bytes: &[u8]) -> Result<Self, TileBlobError> {
        decode(bytes)
    }
}

/// A tile committed to a [`TiledNavmesh`](crate::TiledNavmesh).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tile {
    /// Where the tile sits in the grid.
    pub coord: TileCoord,
    /// The unpadded bounds of the tile.
    pub aabb: Aabb3d,
    /// The encoded [`TileData`].
    pub data: Vec<u8>,
    /// How long the tile took to build.
    pub build_time: Duration,
    /// Number of input triangles that were rasterized for the tile.
    pub triangle_count: usize,
    /// Number of polygons in the tile.
    pub polygon_count: usize,
}

impl Tile {
    /// The size of the encoded meshes in bytes.
    #[inline]
    pub fn memory_usage(&self) -> usize {
        self.data.len()
    }

    /// Decodes the meshes of the tile.
    pub fn decode(&self) -> Result<TileData, TileBlobError> {
        TileData::decode(&self.data)
    }

    /// Decodes the polygon mesh and returns its vertices in world space, see
    /// [`TileGrid::polygon_vertex_to_world`].
    pub fn world_vertices(&self, grid: &TileGrid) -> Result<Vec<Vec3A>, TileBlobError> {
        let mesh = self.decode()?.polygon_mesh;
        Ok(mesh
            .vertices
            .iter()
            .map(|vertex| grid.polygon_vertex_to_world(self.coord, &mesh, *vertex))
            .collect())
    }

    /// Encodes the tile, including its metadata.
    pub fn to_bytes(&self) -> Result<Vec<u8>, TileBlobError> {
        encode(self)
    }

    /// Decodes a tile previously produced by [`Tile::to_bytes`].
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, TileBlobError> {
        decode(bytes)
    }
}

pub(crate) fn encode<T: Serialize>(val: &T) -> Result<Vec<u8>, TileBlobError> {
    Ok(bincode::serde::encode_to_vec(val, bincode::config::standard())?)
}

pub(crate) fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, TileBlobError> {
    let (val, len): (T, usize) =
        bincode::serde::decode_from_slice(bytes, bincode::config::standard())?;
    if len != bytes.len() {
        return Err(TileBlobError::TrailingBytes {
            expected: len,
            found: bytes.len(),
        });
    }
    Ok(val)
}

/// Errors that can occur while encoding or decoding tiles.
#[derive(Error, Debug)]
pub enum TileBlobError {
    /// The value could not be encoded.
    #[error("Failed to encode tile data: {0}")]
    Encode(#[from] bincode::error::EncodeError),
    /// The bytes are not a valid encoding.
    #[error("Failed to decode tile data: {0}")]
    Decode(#[from] bincode::error::DecodeError),
    /// The bytes continue past the end of the encoded value.
    #[error("Expected {expected} bytes of tile data, found {found}")]
    TrailingBytes {
        /// Length of the decoded value.
        expected: usize,
        /// Length of the input.
        found: usize,
    },
}
