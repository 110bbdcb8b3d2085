#![doc = include_str!("../../../readme.md")]

mod compact_cell;
mod compact_heightfield;
mod compact_span;
mod config;
mod contours;
mod detail_mesh;
mod distance_field;
mod erosion;
mod heightfield;
mod mark_convex_poly_area;
pub(crate) mod math;
mod pipeline;
mod poly_mesh;
mod pre_filter;
mod rasterize;
mod region;
mod span;
#[cfg(test)]
mod test_utils;
mod trimesh;
mod watershed;

pub use compact_cell::CompactCell;
pub use compact_heightfield::{CompactHeightfield, CompactHeightfieldError};
pub use compact_span::CompactSpan;
pub use config::{ConfigError, NavmeshConfig, NavmeshConfigBuilder};
pub use contours::{BuildContoursFlags, Contour, ContourSet, ContourVertex, RegionVertexId};
pub use detail_mesh::{DetailNavmesh, DetailNavmeshError, SubMesh};
pub use heightfield::{Heightfield, HeightfieldBuilder, HeightfieldBuilderError, SpanInsertionError};
pub use mark_convex_poly_area::ConvexVolume;
pub use math::Aabb3d;
pub use pipeline::{
    BuildIntermediates, BuildStage, BuildTimings, ErrorKind, NavmeshArtifacts, NavmeshBuildError,
    build_navmesh,
};
pub use poly_mesh::{PolygonNavmesh, PolygonNavmeshError};
pub use rasterize::RasterizationError;
pub use region::RegionId;
pub use span::{AreaType, Span, SpanBuilder, SpanKey, Spans};
pub use trimesh::TriMesh;
pub use watershed::RegionError;
