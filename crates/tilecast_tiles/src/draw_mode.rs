use std::fmt;

use serde::{Deserialize, Serialize};

/// What a debug view of a [`TileManager`](crate::TileManager) shows.
///
/// The manager does not hold a draw mode. Front ends keep their own selection and use
/// [`DrawMode::is_available`] to grey out the modes that need retained build fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum DrawMode {
    /// The committed tiles.
    #[default]
    Navmesh,
    /// The committed tiles, drawn see-through.
    NavmeshTransparent,
    /// The bounds of every polygon.
    NavmeshBvTree,
    /// Polygon centers and their neighbor links.
    NavmeshNodes,
    /// Polygon edges on tile borders.
    NavmeshPortals,
    /// Nothing of the navmesh.
    NavmeshInvisible,
    /// The input geometry.
    InputMesh,
    /// All spans of the heightfield.
    Voxels,
    /// The walkable spans of the heightfield.
    VoxelsWalkable,
    /// The compact heightfield.
    Compact,
    /// The distance field of the compact heightfield.
    CompactDistance,
    /// The regions of the compact heightfield.
    CompactRegions,
    /// Links between neighboring regions.
    RegionConnections,
    /// Contours before simplification.
    RawContours,
    /// Raw and simplified contours on top of each other.
    BothContours,
    /// Simplified contours.
    Contours,
    /// The polygon mesh of the last built tile.
    PolygonMesh,
    /// The detail mesh of the last built tile.
    DetailMesh,
}

impl DrawMode {
    /// Every mode, in menu order.
    pub const ALL: [DrawMode; 18] = [
        DrawMode::Navmesh,
        DrawMode::NavmeshTransparent,
        DrawMode::NavmeshBvTree,
        DrawMode::NavmeshNodes,
        DrawMode::NavmeshPortals,
        DrawMode::NavmeshInvisible,
        DrawMode::InputMesh,
        DrawMode::Voxels,
        DrawMode::VoxelsWalkable,
        DrawMode::Compact,
        DrawMode::CompactDistance,
        DrawMode::CompactRegions,
        DrawMode::RegionConnections,
        DrawMode::RawContours,
        DrawMode::BothContours,
        DrawMode::Contours,
        DrawMode::PolygonMesh,
        DrawMode::DetailMesh,
    ];

    /// Whether the mode draws fields that only exist while
    /// [`TileManager::keep_intermediate_results`](crate::TileManager::keep_intermediate_results) is on.
    pub fn requires_intermediates(self) -> bool {
        matches!(
            self,
            DrawMode::Voxels
                | DrawMode::VoxelsWalkable
                | DrawMode::Compact
                | DrawMode::CompactDistance
                | DrawMode::CompactRegions
                | DrawMode::RegionConnections
                | DrawMode::RawContours
                | DrawMode::BothContours
                | DrawMode::Contours
        )
    }

    /// Whether the mode has something to draw.
    #[inline]
    pub fn is_available(self, has_intermediates: bool) -> bool {
        has_intermediates || !self.requires_intermediates()
    }
}

impl fmt::Display for DrawMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            DrawMode::Navmesh => "Navmesh",
            DrawMode::NavmeshTransparent => "Navmesh Trans",
            DrawMode::NavmeshBvTree => "Navmesh BVTree",
            DrawMode::NavmeshNodes => "Navmesh Nodes",
            DrawMode::NavmeshPortals => "Navmesh Portals",
            DrawMode::NavmeshInvisible => "Navmesh Invis",
            DrawMode::InputMesh => "Input Mesh",
            DrawMode::Voxels => "Voxels",
            DrawMode::VoxelsWalkable => "Walkable Voxels",
            DrawMode::Compact => "Compact",
            DrawMode::CompactDistance => "Compact Distance",
            DrawMode::CompactRegions => "Compact Regions",
            DrawMode::RegionConnections => "Region Connections",
            DrawMode::RawContours => "Raw Contours",
            DrawMode::BothContours => "Both Contours",
            DrawMode::Contours => "Contours",
            DrawMode::PolygonMesh => "Poly Mesh",
            DrawMode::DetailMesh => "Poly Mesh Detail",
        };
        f.write_str(label)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn field_views_need_intermediates() {
        assert!(DrawMode::CompactRegions.requires_intermediates());
        assert!(!DrawMode::CompactRegions.is_available(false));
        assert!(DrawMode::CompactRegions.is_available(true));
        assert!(DrawMode::Navmesh.is_available(false));
        assert!(DrawMode::DetailMesh.is_available(false));
    }

    #[test]
    fn every_mode_is_listed_once() {
        for (index, mode) in DrawMode::ALL.iter().enumerate() {
            assert!(!DrawMode::ALL[index + 1..].contains(mode));
        }
        assert_eq!(DrawMode::ALL[0], DrawMode::default());
    }
}
