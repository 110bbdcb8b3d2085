//! The full build from triangle soup to detail mesh.

use std::{
    fmt,
    time::{Duration, Instant},
};

use thiserror::Error;
use tracing::{debug, debug_span};

use crate::{
    CompactHeightfield, CompactHeightfieldError, ConfigError, ContourSet, DetailNavmesh,
    DetailNavmeshError, Heightfield, HeightfieldBuilder, HeightfieldBuilderError, NavmeshConfig,
    PolygonNavmesh, PolygonNavmeshError, RasterizationError, RegionError, TriMesh,
};

/// Everything produced by [`build_navmesh`].
#[derive(Debug, Clone)]
pub struct NavmeshArtifacts {
    /// The convex polygons.
    pub polygon_mesh: PolygonNavmesh,
    /// The height-accurate triangulation of the polygons.
    pub detail_mesh: DetailNavmesh,
    /// The fields the meshes were derived from, if they were requested.
    pub intermediates: Option<BuildIntermediates>,
    /// How long each stage took.
    pub timings: BuildTimings,
    /// The number of input triangles that overlapped the build area.
    pub rasterized_triangles: usize,
}

/// The intermediate fields of a build, kept for inspection.
#[derive(Debug, Clone)]
pub struct BuildIntermediates {
    /// The filtered solid heightfield.
    pub heightfield: Heightfield,
    /// The compact heightfield with distances and regions.
    pub compact_heightfield: CompactHeightfield,
    /// The simplified region outlines.
    pub contours: ContourSet,
}

/// Wall-clock time spent in each stage of a build.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BuildTimings {
    /// Triangle selection, slope marking and rasterization.
    pub rasterization: Duration,
    /// The heightfield filters.
    pub filtering: Duration,
    /// Building the compact heightfield.
    pub compaction: Duration,
    /// Eroding the walkable area and marking area volumes.
    pub erosion: Duration,
    /// The distance field.
    pub distance_field: Duration,
    /// Watershed partitioning.
    pub regions: Duration,
    /// Tracing and simplifying contours.
    pub contours: Duration,
    /// Building the polygon mesh.
    pub polygon_mesh: Duration,
    /// Building the detail mesh.
    pub detail_mesh: Duration,
    /// The whole build.
    pub total: Duration,
}

impl BuildTimings {
    fn measure<T>(slot: &mut Duration, f: impl FnOnce() -> T) -> T {
        let start = Instant::now();
        let result = f();
        *slot = start.elapsed();
        result
    }
}

/// Builds a polygon mesh and a detail mesh from `trimesh`.
///
/// Only triangles overlapping the xz-footprint of [`NavmeshConfig::aabb`] are rasterized.
/// Flat triangles without a walkable area type become [`AreaType::DEFAULT_WALKABLE`](crate::AreaType::DEFAULT_WALKABLE),
/// triangles steeper than [`NavmeshConfig::walkable_slope_angle`] become unwalkable.
///
/// The config is validated before anything is allocated.
/// Geometry without any walkable area yields empty meshes, not an error.
pub fn build_navmesh(
    trimesh: &TriMesh,
    config: &NavmeshConfig,
    keep_intermediates: bool,
) -> Result<NavmeshArtifacts, NavmeshBuildError> {
    let _span = debug_span!("build_navmesh").entered();
    config.validate()?;
    let start = Instant::now();
    let mut timings = BuildTimings::default();

    let (mut heightfield, rasterized_triangles) =
        BuildTimings::measure(&mut timings.rasterization, || {
            let mut heightfield = HeightfieldBuilder {
                aabb: config.aabb,
                cell_size: config.cell_size,
                cell_height: config.cell_height,
            }
            .build()?;
            let mut triangles = trimesh.subset(trimesh.triangles_in_xz(&config.aabb));
            triangles.mark_walkable_triangles(config.walkable_slope_angle);
            triangles.clear_unwalkable_triangles(config.walkable_slope_angle);
            debug!(triangles = triangles.triangle_count(), "Selected triangles");
            heightfield.rasterize_triangles(&triangles, config.walkable_climb)?;
            Ok::<_, NavmeshBuildError>((heightfield, triangles.triangle_count()))
        })?;

    // Once all geometry is rasterized, we do initial pass of filtering to
    // remove unwanted overhangs caused by the conservative rasterization
    // as well as filter spans where the character cannot possibly stand.
    BuildTimings::measure(&mut timings.filtering, || {
        heightfield.filter_low_hanging_walkable_obstacles(config.walkable_climb);
        heightfield.filter_ledge_spans(config.walkable_height, config.walkable_climb);
        heightfield.filter_walkable_low_height_spans(config.walkable_height);
    });

    let mut compact = BuildTimings::measure(&mut timings.compaction, || {
        CompactHeightfield::from_heightfield(
            &heightfield,
            config.walkable_height,
            config.walkable_climb,
        )
    })?;
    debug!(spans = compact.span_count(), "Compacted heightfield");

    BuildTimings::measure(&mut timings.erosion, || {
        compact.erode_walkable_area(config.walkable_radius);
        for volume in &config.area_volumes {
            compact.mark_convex_poly_area(volume);
        }
    });

    BuildTimings::measure(&mut timings.distance_field, || compact.build_distance_field());

    BuildTimings::measure(&mut timings.regions, || {
        compact.build_regions(
            config.border_size,
            config.min_region_area,
            config.merge_region_area,
        )
    })?;
    debug!(regions = compact.max_region.bits(), "Partitioned regions");

    let contours = BuildTimings::measure(&mut timings.contours, || {
        compact.build_contours(
            config.max_simplification_error,
            config.max_edge_len,
            config.contour_flags,
        )
    });

    let polygon_mesh = BuildTimings::measure(&mut timings.polygon_mesh, || {
        contours.build_polygon_mesh(
            config.max_vertices_per_polygon as usize,
            config.max_polygons(),
        )
    })?;
    debug!(
        polygons = polygon_mesh.polygon_count(),
        vertices = polygon_mesh.vertices.len(),
        "Built polygon mesh"
    );

    let detail_mesh = BuildTimings::measure(&mut timings.detail_mesh, || {
        DetailNavmesh::new(
            &polygon_mesh,
            &compact,
            config.detail_sample_dist,
            config.detail_sample_max_error,
        )
    })?;
    timings.total = start.elapsed();
    debug!(
        triangles = detail_mesh.triangle_count(),
        total = ?timings.total,
        "Built detail mesh"
    );

    let intermediates = keep_intermediates.then(|| BuildIntermediates {
        heightfield,
        compact_heightfield: compact,
        contours,
    });

    Ok(NavmeshArtifacts {
        polygon_mesh,
        detail_mesh,
        intermediates,
        timings,
        rasterized_triangles,
    })
}

/// The stage of a build.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize, serde::Deserialize))]
pub enum BuildStage {
    /// Validating the config.
    Config,
    /// Allocating the heightfield and rasterizing triangles.
    Rasterization,
    /// Building the compact heightfield.
    Compaction,
    /// Watershed partitioning.
    Regions,
    /// Building the polygon mesh.
    PolygonMesh,
    /// Building the detail mesh.
    DetailMesh,
}

impl fmt::Display for BuildStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            BuildStage::Config => "config",
            BuildStage::Rasterization => "rasterization",
            BuildStage::Compaction => "compaction",
            BuildStage::Regions => "regions",
            BuildStage::PolygonMesh => "polygon mesh",
            BuildStage::DetailMesh => "detail mesh",
        };
        f.write_str(name)
    }
}

/// The broad category of a failed build.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize, serde::Deserialize))]
pub enum ErrorKind {
    /// A config invariant is violated. Nothing was allocated.
    InvalidConfig,
    /// The input geometry could not be processed.
    InvalidInput,
    /// A field or buffer could not be allocated.
    OutOfMemory,
    /// A count exceeded its ceiling.
    CapacityExceeded,
}

/// Errors that can occur in [`build_navmesh`].
#[derive(Error, Debug)]
pub enum NavmeshBuildError {
    /// The config is invalid.
    #[error("Invalid config: {0}")]
    Config(#[from] ConfigError),
    /// The heightfield could not be allocated.
    #[error("Failed to create heightfield: {0}")]
    Heightfield(#[from] HeightfieldBuilderError),
    /// A triangle could not be rasterized.
    #[error("Failed to rasterize triangles: {0}")]
    Rasterization(#[from] RasterizationError),
    /// The compact heightfield could not be built.
    #[error("Failed to build compact heightfield: {0}")]
    Compaction(#[from] CompactHeightfieldError),
    /// The watershed produced too many regions.
    #[error("Failed to build regions: {0}")]
    Regions(#[from] RegionError),
    /// The polygon mesh exceeded its limits.
    #[error("Failed to build polygon mesh: {0}")]
    PolygonMesh(#[from] PolygonNavmeshError),
    /// The detail mesh could not be allocated.
    #[error("Failed to build detail mesh: {0}")]
    DetailMesh(#[from] DetailNavmeshError),
}

impl NavmeshBuildError {
    /// The stage that failed.
    pub fn stage(&self) -> BuildStage {
        match self {
            NavmeshBuildError::Config(_) => BuildStage::Config,
            NavmeshBuildError::Heightfield(_) | NavmeshBuildError::Rasterization(_) => {
                BuildStage::Rasterization
            }
            NavmeshBuildError::Compaction(_) => BuildStage::Compaction,
            NavmeshBuildError::Regions(_) => BuildStage::Regions,
            NavmeshBuildError::PolygonMesh(_) => BuildStage::PolygonMesh,
            NavmeshBuildError::DetailMesh(_) => BuildStage::DetailMesh,
        }
    }

    /// The category of the failure.
    pub fn kind(&self) -> ErrorKind {
        match self {
            NavmeshBuildError::Config(_) => ErrorKind::InvalidConfig,
            NavmeshBuildError::Heightfield(_) => ErrorKind::OutOfMemory,
            NavmeshBuildError::Rasterization(_) => ErrorKind::InvalidInput,
            NavmeshBuildError::Compaction(CompactHeightfieldError::TooManyLayers { .. }) => {
                ErrorKind::CapacityExceeded
            }
            NavmeshBuildError::Compaction(CompactHeightfieldError::AllocationFailed(_)) => {
                ErrorKind::OutOfMemory
            }
            NavmeshBuildError::Regions(_) | NavmeshBuildError::PolygonMesh(_) => {
                ErrorKind::CapacityExceeded
            }
            NavmeshBuildError::DetailMesh(_) => ErrorKind::OutOfMemory,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Aabb3d, NavmeshConfigBuilder, test_utils::plane};

    fn config(size: f32) -> NavmeshConfig {
        NavmeshConfigBuilder {
            aabb: Aabb3d::new([0.0, -1.0, 0.0], [size, 1.0, size]),
            tile_size: 0,
            ..Default::default()
        }
        .build()
        .unwrap()
    }

    #[test]
    fn keeps_intermediates_on_request() {
        let artifacts = build_navmesh(&plane(10.0), &config(10.0), true).unwrap();
        let intermediates = artifacts.intermediates.unwrap();
        assert!(intermediates.compact_heightfield.span_count() > 0);
        assert!(!intermediates.contours.contours.is_empty());
        assert!(artifacts.polygon_mesh.polygon_count() > 0);
        assert!(artifacts.timings.total >= artifacts.timings.regions);
    }

    #[test]
    fn drops_intermediates_by_default() {
        let artifacts = build_navmesh(&plane(10.0), &config(10.0), false).unwrap();
        assert!(artifacts.intermediates.is_none());
    }

    #[test]
    fn invalid_config_fails_before_building() {
        let mut config = config(10.0);
        config.cell_size = 0.0;
        let error = build_navmesh(&plane(10.0), &config, false).unwrap_err();
        assert_eq!(error.stage(), BuildStage::Config);
        assert_eq!(error.kind(), ErrorKind::InvalidConfig);
    }

    #[test]
    fn polygon_limit_is_capacity_error() {
        let mut config = config(10.0);
        config.max_polygons_per_tile = Some(1);
        config.max_vertices_per_polygon = 3;
        let error = build_navmesh(&plane(10.0), &config, false).unwrap_err();
        assert_eq!(error.stage(), BuildStage::PolygonMesh);
        assert_eq!(error.kind(), ErrorKind::CapacityExceeded);
    }
}
