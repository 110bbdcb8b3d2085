use std::f32::consts::FRAC_PI_2;

use glam::{Vec2, Vec3A};
use thiserror::Error;

use crate::{Aabb3d, BuildContoursFlags, ConvexVolume, PolygonNavmesh};

/// Specifies a configuration to use when performing builds. Usually built using [`NavmeshConfigBuilder`].
///
/// This is a convenience structure that represents an aggregation of parameters used at different stages in the build process.
/// Some values are derived during the build process. Not all parameters are used for all build processes.
///
/// Units are usually in voxels (vx) or world units (wu). The units for voxels, grid size,
/// and cell size are all based on the values of cs and ch.
///
/// In this documentation, the term 'field' refers to heightfield and contour data structures that define spacial information
///  using an integer grid.
///
/// > Note:
/// >
/// > First you should decide the size of your agent's logical cylinder.
/// > If your game world uses meters as units, a reasonable starting point for a human-sized agent
/// > might be a radius of 0.4 and a height of 2.0.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize, serde::Deserialize))]
pub struct NavmeshConfig {
    /// The width of the field along the x-axis. `[Limit: >= 0] [Units: vx]`
    pub width: u16,

    /// The height of the field along the z-axis. `[Limit: >= 0] [Units: vx]`
    pub height: u16,

    /// The width/height size of tiles on the xz-plane. `[Limit: >= 0] [Units: vx]`
    ///
    /// Zero disables tiling: the whole [`Self::aabb`] is built as a single field.
    pub tile_size: u16,

    /// The size of the non-navigable border around the heightfield. `[Limit: >=0] [Units: vx]`
    ///
    /// This value represents the the closest the walkable area of the heightfield should come to the xz-plane AABB of the field.
    /// It does not have any impact on the borders around internal obstructions.
    pub border_size: u16,

    /// The xz-plane cell size to use for fields. `[Limit: > 0] [Units: wu]`.
    ///
    /// The voxelization cell size defines the voxel size along both axes of the ground plane: x and z.
    /// This value is usually derived from the character radius r. A recommended starting value for cell_size is either r/2 or r/3.
    /// Smaller values of cell_size will increase rasterization resolution and navmesh detail, but total generation time will increase exponentially.
    ///
    /// cell_size and cell_height define voxel/grid/cell size. So their values have significant side effects on all parameters defined in voxel units.
    pub cell_size: f32,

    /// The y-axis cell size to use for fields. `[Limit: > 0] [Units: wu]`
    ///
    /// The voxelization cell height is defined separately in order to allow for greater precision in height tests.
    /// A good starting point for cell_height is half the cell_size value.
    pub cell_height: f32,

    /// The field's AABB. When tiling, this is the AABB of the whole world and not of a single tile. `[Units: wu]`
    pub aabb: Aabb3d,

    /// The maximum slope that is considered walkable. `[Limits: 0 <= value < 0.5*π] [Units: Radians]`
    ///
    /// This value is defined as a maximum angle that the surface normal of a polygon can differ from the world's up vector.
    pub walkable_slope_angle: f32,

    /// Minimum floor to 'ceiling' height that will still allow the floor area to
    /// be considered walkable. `[Limit: >= 3] [Units: vx]`
    ///
    /// This value defines the worldspace height h of the agent in voxels.
    /// The value of walkable_height should be calculated as `(h / cell_height).ceil()`.
    pub walkable_height: u16,

    /// Maximum ledge height that is considered to still be traversable. `[Limit: >=0] [Units: vx]`
    ///
    /// Allows the mesh to flow over low lying obstructions such as curbs and up/down stairways.
    /// The value is usually set to how far up/down an agent can step.
    pub walkable_climb: u16,

    /// The distance to erode/shrink the walkable area of the heightfield away from
    /// obstructions.  `[Limit: >=0] [Units: vx]`
    ///
    /// If the walkable_radius value is greater than zero, the edges of the navmesh will be pushed away from all obstacles by this amount.
    pub walkable_radius: u16,

    /// The maximum allowed length for contour edges along the border of the mesh. `[Limit: >=0] [Units: vx]`
    ///
    /// Extra vertices will be inserted as needed to keep contour edges below this length.
    /// A value of zero effectively disables this feature.
    pub max_edge_len: u16,

    /// The maximum distance a simplified contour's border edges should deviate
    /// the original raw contour. `[Limit: >=0] [Units: vx]`
    ///
    /// Good values for max_simplification_error are in the range `[1.1, 1.5]`.
    pub max_simplification_error: f32,

    /// The minimum number of spans allowed to form isolated island areas. `[Limit: >=0] [Units: vx]`
    pub min_region_area: u32,

    /// Any regions with a span count smaller than this value will, if possible,
    /// be merged with larger regions. `[Limit: >=0] [Units: vx]`
    pub merge_region_area: u32,

    /// The maximum number of vertices allowed for polygons generated during the
    /// contour to polygon conversion process. `[Limit: 3..=6]`
    pub max_vertices_per_polygon: u16,

    /// The maximum number of polygons a single build may produce.
    /// `None` only limits the count to what the mesh can index, see [`PolygonNavmesh::MAX_POLYGONS`].
    pub max_polygons_per_tile: Option<usize>,

    /// Sets the sampling distance to use when generating the detail mesh.
    /// (For height detail only.) `[Limits: 0 or >= 0.9] [Units: wu]`
    pub detail_sample_dist: f32,

    /// The maximum distance the detail mesh surface should deviate from heightfield
    /// data. (For height detail only.) `[Limit: >=0] [Units: wu]`
    pub detail_sample_max_error: f32,

    /// Flags controlling the [`ContourSet`](crate::ContourSet) generation process.
    pub contour_flags: BuildContoursFlags,

    /// Volumes that define areas with specific areas.
    pub area_volumes: Vec<ConvexVolume>,
}

impl NavmeshConfig {
    /// The largest number of vertices a polygon may have.
    pub const MAX_VERTICES_PER_POLYGON: u16 = 6;

    /// Whether the config splits the world into tiles.
    #[inline]
    pub fn is_tiled(&self) -> bool {
        self.tile_size > 0
    }

    /// The world size of a tile on the xz-plane. Zero when tiling is disabled. `[Units: wu]`
    #[inline]
    pub fn tile_world_size(&self) -> f32 {
        self.tile_size as f32 * self.cell_size
    }

    /// The polygon limit applied to a single build.
    #[inline]
    pub fn max_polygons(&self) -> usize {
        self.max_polygons_per_tile
            .unwrap_or(PolygonNavmesh::MAX_POLYGONS)
            .min(PolygonNavmesh::MAX_POLYGONS)
    }

    /// Returns the config of the tile whose unpadded footprint starts at `tile_min` on the xz-plane.
    ///
    /// The resulting AABB is padded by [`Self::border_size`] cells on the x and z axes,
    /// and the field is exactly `tile_size + 2 * border_size` cells wide.
    pub fn tile_config(&self, tile_min: Vec2) -> Self {
        let tile_extent = self.tile_world_size();
        let tile_aabb = Aabb3d::new(
            Vec3A::new(tile_min.x, self.aabb.min.y, tile_min.y),
            Vec3A::new(tile_min.x + tile_extent, self.aabb.max.y, tile_min.y + tile_extent),
        );
        let side = self.tile_size + self.border_size * 2;
        Self {
            width: side,
            height: side,
            aabb: tile_aabb.expanded_xz(self.border_size as f32 * self.cell_size),
            ..self.clone()
        }
    }

    /// Checks the invariants every build relies on.
    /// Fails fast before any field is allocated.
    pub fn validate(&self) -> Result<(), ConfigError> {
        positive("cell_size", self.cell_size)?;
        positive("cell_height", self.cell_height)?;
        if self.walkable_height == 0 {
            return Err(ConfigError::NotPositive {
                name: "walkable_height",
                value: 0.0,
            });
        }
        slope(self.walkable_slope_angle)?;
        non_negative("max_simplification_error", self.max_simplification_error)?;
        non_negative("detail_sample_dist", self.detail_sample_dist)?;
        non_negative("detail_sample_max_error", self.detail_sample_max_error)?;
        vertices_per_polygon(self.max_vertices_per_polygon)?;
        if self.max_polygons_per_tile == Some(0) {
            return Err(ConfigError::NoPolygonsAllowed);
        }
        if !self.aabb.is_valid() {
            return Err(ConfigError::InvalidAabb { aabb: self.aabb });
        }
        Ok(())
    }
}

/// A builder for [`NavmeshConfig`]. The config has lots of interdependent configurations,
/// so this builder provides a convenient way to set all the necessary parameters in world units.
/// The default values are chosen to be reasonable for an agent resembling and adult human.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize, serde::Deserialize))]
pub struct NavmeshConfigBuilder {
    /// The xz-plane cell size to use for fields. `[Limit: > 0] [Units: wu]`.
    ///
    /// The general recommendation here is to use as large a value for cell_size as you can get away with.
    pub cell_size: f32,
    /// The y-axis cell size to use for fields. `[Limit: > 0] [Units: wu]`
    pub cell_height: f32,
    /// The height of the agent. `[Limit: > 0] [Units: wu]`
    ///
    /// It's often a good idea to add a little bit of padding to the height. For example,
    /// an agent that is 1.8 world units tall might want to set this value to 2.0 units.
    pub agent_height: f32,
    /// The radius of the agent. `[Limit: >= 0] [Units: wu]`
    pub agent_radius: f32,
    /// How high a step the agent can climb. `[Limit: >= 0] [Units: wu]`
    pub agent_max_climb: f32,
    /// The steepest walkable slope. `[Limits: 0 <= value < 0.5*π] [Units: Radians]`
    pub agent_max_slope: f32,
    /// The side length of the smallest island that is kept. `[Limit: >= 0] [Units: vx]`
    pub region_min_size: f32,
    /// The side length below which regions are merged into their neighbors. `[Limit: >= 0] [Units: vx]`
    pub region_merge_size: f32,
    /// The maximum contour edge length. `[Limit: >= 0] [Units: wu]`
    pub edge_max_len: f32,
    /// The maximum contour simplification error. `[Limit: >= 0] [Units: vx]`
    pub edge_max_error: f32,
    /// The maximum number of vertices per polygon. `[Limit: 3..=6]`
    pub verts_per_poly: u16,
    /// The detail mesh sampling distance in cells. Values below 0.9 disable sampling. `[Limit: >= 0] [Units: vx]`
    pub detail_sample_dist: f32,
    /// The maximum detail mesh height error in cell heights. `[Limit: >= 0] [Units: vx]`
    pub detail_sample_max_error: f32,
    /// The side length of a tile. Zero disables tiling. `[Limit: >= 0] [Units: vx]`
    pub tile_size: u16,
    /// The bounds of the input geometry. `[Units: wu]`
    pub aabb: Aabb3d,
    /// Flags controlling the contour generation.
    pub contour_flags: BuildContoursFlags,
    /// Volumes that mark areas with specific area types.
    pub area_volumes: Vec<ConvexVolume>,
    /// Overrides the number of polygons a tile may hold.
    pub max_polygons_per_tile: Option<usize>,
}

impl Default for NavmeshConfigBuilder {
    fn default() -> Self {
        Self {
            cell_size: 0.3,
            cell_height: 0.2,
            agent_height: 2.0,
            agent_radius: 0.6,
            agent_max_climb: 0.9,
            agent_max_slope: 45.0_f32.to_radians(),
            region_min_size: 8.0,
            region_merge_size: 20.0,
            edge_max_len: 12.0,
            edge_max_error: 1.3,
            verts_per_poly: 6,
            detail_sample_dist: 6.0,
            detail_sample_max_error: 1.0,
            tile_size: 32,
            aabb: Aabb3d::default(),
            contour_flags: BuildContoursFlags::default(),
            area_volumes: Vec::new(),
            max_polygons_per_tile: None,
        }
    }
}

impl NavmeshConfigBuilder {
    /// Checks the world-unit parameters without deriving anything.
    pub fn validate(&self) -> Result<(), ConfigError> {
        positive("cell_size", self.cell_size)?;
        positive("cell_height", self.cell_height)?;
        positive("agent_height", self.agent_height)?;
        non_negative("agent_radius", self.agent_radius)?;
        non_negative("agent_max_climb", self.agent_max_climb)?;
        slope(self.agent_max_slope)?;
        non_negative("region_min_size", self.region_min_size)?;
        non_negative("region_merge_size", self.region_merge_size)?;
        non_negative("edge_max_len", self.edge_max_len)?;
        non_negative("edge_max_error", self.edge_max_error)?;
        vertices_per_polygon(self.verts_per_poly)?;
        non_negative("detail_sample_dist", self.detail_sample_dist)?;
        non_negative("detail_sample_max_error", self.detail_sample_max_error)?;
        if self.max_polygons_per_tile == Some(0) {
            return Err(ConfigError::NoPolygonsAllowed);
        }
        if !self.aabb.is_valid() {
            return Err(ConfigError::InvalidAabb { aabb: self.aabb });
        }
        Ok(())
    }

    /// Builds a [`NavmeshConfig`] from the current configuration.
    ///
    /// Fails without deriving anything if a parameter is out of range.
    pub fn build(self) -> Result<NavmeshConfig, ConfigError> {
        self.validate()?;
        let walkable_radius = (self.agent_radius / self.cell_size).ceil();
        let tiled = self.tile_size > 0;
        // Reserve enough padding.
        let border_size = if tiled { walkable_radius + 3.0 } else { 0.0 };
        let (width, height) = if tiled {
            let side = self.tile_size as f32 + border_size * 2.0;
            (side, side)
        } else {
            let extent = self.aabb.extent();
            (
                (extent.x / self.cell_size + 0.5).floor(),
                (extent.z / self.cell_size + 0.5).floor(),
            )
        };
        if width >= u16::MAX as f32 || height >= u16::MAX as f32 {
            return Err(ConfigError::GridTooLarge { width, height });
        }
        let to_voxels = |value: f32| value.min(u16::MAX as f32) as u16;
        Ok(NavmeshConfig {
            width: width as u16,
            height: height as u16,
            tile_size: self.tile_size,
            border_size: border_size as u16,
            cell_size: self.cell_size,
            cell_height: self.cell_height,
            aabb: self.aabb,
            walkable_slope_angle: self.agent_max_slope,
            walkable_height: to_voxels((self.agent_height / self.cell_height).ceil()),
            walkable_climb: to_voxels((self.agent_max_climb / self.cell_height).floor()),
            walkable_radius: to_voxels(walkable_radius),
            max_edge_len: to_voxels(self.edge_max_len / self.cell_size),
            max_simplification_error: self.edge_max_error,
            min_region_area: (self.region_min_size * self.region_min_size) as u32,
            merge_region_area: (self.region_merge_size * self.region_merge_size) as u32,
            max_vertices_per_polygon: self.verts_per_poly,
            max_polygons_per_tile: self.max_polygons_per_tile,
            detail_sample_dist: if self.detail_sample_dist < 0.9 {
                0.0
            } else {
                self.cell_size * self.detail_sample_dist
            },
            detail_sample_max_error: self.cell_height * self.detail_sample_max_error,
            contour_flags: self.contour_flags,
            area_volumes: self.area_volumes,
        })
    }
}

fn positive(name: &'static str, value: f32) -> Result<(), ConfigError> {
    if value > 0.0 && value.is_finite() {
        Ok(())
    } else {
        Err(ConfigError::NotPositive { name, value })
    }
}

fn non_negative(name: &'static str, value: f32) -> Result<(), ConfigError> {
    if value >= 0.0 && value.is_finite() {
        Ok(())
    } else {
        Err(ConfigError::Negative { name, value })
    }
}

fn slope(value: f32) -> Result<(), ConfigError> {
    if (0.0..FRAC_PI_2).contains(&value) {
        Ok(())
    } else {
        Err(ConfigError::SlopeOutOfRange { value })
    }
}

fn vertices_per_polygon(value: u16) -> Result<(), ConfigError> {
    if (3..=NavmeshConfig::MAX_VERTICES_PER_POLYGON).contains(&value) {
        Ok(())
    } else {
        Err(ConfigError::VerticesPerPolygonOutOfRange { value })
    }
}

/// A violated configuration invariant.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConfigError {
    /// A parameter that must be strictly positive is not.
    #[error("{name} must be greater than zero, got {value}")]
    NotPositive {
        /// The parameter name.
        name: &'static str,
        /// The rejected value.
        value: f32,
    },
    /// A parameter that must not be negative is.
    #[error("{name} must not be negative, got {value}")]
    Negative {
        /// The parameter name.
        name: &'static str,
        /// The rejected value.
        value: f32,
    },
    /// The walkable slope is not within `[0, π/2)`.
    #[error("Walkable slope must be within [0, π/2) radians, got {value}")]
    SlopeOutOfRange {
        /// The rejected slope in radians.
        value: f32,
    },
    /// The vertex count per polygon is outside `3..=6`.
    #[error("Vertices per polygon must be within 3..=6, got {value}")]
    VerticesPerPolygonOutOfRange {
        /// The rejected vertex count.
        value: u16,
    },
    /// The polygon limit is zero.
    #[error("The polygon limit per tile must be greater than zero")]
    NoPolygonsAllowed,
    /// The bounds are not finite or inverted.
    #[error("Invalid bounds: {aabb:?}")]
    InvalidAabb {
        /// The rejected bounds.
        aabb: Aabb3d,
    },
    /// The field would have more cells per axis than can be addressed.
    #[error("Field of {width}x{height} cells is too large")]
    GridTooLarge {
        /// The field width in cells.
        width: f32,
        /// The field height in cells.
        height: f32,
    },
}

#[cfg(test)]
mod tests {
    use approx::assert_relative_eq;

    use super::*;

    fn world() -> Aabb3d {
        Aabb3d::new([0.0, -1.0, 0.0], [30.0, 5.0, 15.0])
    }

    #[test]
    fn derives_voxel_units() {
        let config = NavmeshConfigBuilder {
            aabb: world(),
            tile_size: 0,
            ..Default::default()
        }
        .build()
        .unwrap();
        assert_eq!(config.width, 100);
        assert_eq!(config.height, 50);
        assert_eq!(config.border_size, 0);
        assert_eq!(config.walkable_height, 10);
        assert_eq!(config.walkable_climb, 4);
        assert_eq!(config.walkable_radius, 2);
        assert_eq!(config.max_edge_len, 40);
        assert_eq!(config.min_region_area, 64);
        assert_eq!(config.merge_region_area, 400);
        assert_relative_eq!(config.detail_sample_dist, 1.8, epsilon = 1.0e-5);
        assert_relative_eq!(config.detail_sample_max_error, 0.2);
        assert!(!config.is_tiled());
    }

    #[test]
    fn tiles_are_padded_by_border() {
        let config = NavmeshConfigBuilder {
            aabb: world(),
            ..Default::default()
        }
        .build()
        .unwrap();
        assert_eq!(config.border_size, 5);
        assert_eq!(config.width, 42);
        let tile = config.tile_config(Vec2::new(9.6, 0.0));
        assert_relative_eq!(tile.aabb.min.x, 9.6 - 1.5, epsilon = 1.0e-5);
        assert_relative_eq!(tile.aabb.max.x, 9.6 + 9.6 + 1.5, epsilon = 1.0e-5);
        assert_relative_eq!(tile.aabb.min.z, -1.5, epsilon = 1.0e-5);
        assert_eq!(tile.aabb.min.y, -1.0);
    }

    #[test]
    fn low_detail_sample_distance_disables_sampling() {
        let config = NavmeshConfigBuilder {
            aabb: world(),
            detail_sample_dist: 0.5,
            ..Default::default()
        }
        .build()
        .unwrap();
        assert_eq!(config.detail_sample_dist, 0.0);
    }

    #[test]
    fn rejects_non_positive_cell_size() {
        let error = NavmeshConfigBuilder {
            aabb: world(),
            cell_size: 0.0,
            ..Default::default()
        }
        .build()
        .unwrap_err();
        assert_eq!(
            error,
            ConfigError::NotPositive {
                name: "cell_size",
                value: 0.0
            }
        );
    }

    #[test]
    fn rejects_out_of_range_values() {
        let base = NavmeshConfigBuilder {
            aabb: world(),
            ..Default::default()
        };
        let steep = NavmeshConfigBuilder {
            agent_max_slope: FRAC_PI_2,
            ..base.clone()
        };
        assert!(matches!(steep.validate(), Err(ConfigError::SlopeOutOfRange { .. })));
        let octagons = NavmeshConfigBuilder {
            verts_per_poly: 8,
            ..base.clone()
        };
        assert_eq!(
            octagons.validate(),
            Err(ConfigError::VerticesPerPolygonOutOfRange { value: 8 })
        );
        let inverted = NavmeshConfigBuilder {
            aabb: Aabb3d::new([1.0, 0.0, 0.0], [0.0, 1.0, 1.0]),
            ..base.clone()
        };
        assert!(matches!(inverted.validate(), Err(ConfigError::InvalidAabb { .. })));
        let negative_radius = NavmeshConfigBuilder {
            agent_radius: -1.0,
            ..base
        };
        assert!(matches!(
            negative_radius.validate(),
            Err(ConfigError::Negative {
                name: "agent_radius",
                ..
            })
        ));
    }

    #[test]
    fn derived_config_validates() {
        let mut config = NavmeshConfigBuilder {
            aabb: world(),
            ..Default::default()
        }
        .build()
        .unwrap();
        assert_eq!(config.validate(), Ok(()));
        config.cell_height = -0.1;
        assert!(config.validate().is_err());
    }
}
