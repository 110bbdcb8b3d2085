//! Fixtures shared by the unit tests of the build stages.

use glam::{UVec3, Vec3A};

use crate::{
    Aabb3d, CompactHeightfield, Heightfield, HeightfieldBuilder, TriMesh,
    heightfield::SpanInsertion,
    span::{AreaType, SpanBuilder},
};

/// A `size` x `size` walkable plane at y=0, voxelized with a cell size of 1 and a cell height of 0.5.
pub(crate) fn flat_compact_heightfield(size: f32) -> CompactHeightfield {
    let mut heightfield = HeightfieldBuilder {
        aabb: Aabb3d::new([0.0, -1.0, 0.0], [size, 1.0, size]),
        cell_size: 1.0,
        cell_height: 0.5,
    }
    .build()
    .unwrap();
    heightfield
        .rasterize_triangles(&plane(size), 1)
        .unwrap();
    CompactHeightfield::from_heightfield(&heightfield, 2, 1).unwrap()
}

pub(crate) fn plane(size: f32) -> TriMesh {
    TriMesh {
        vertices: vec![
            Vec3A::new(0.0, 0.0, 0.0),
            Vec3A::new(size, 0.0, 0.0),
            Vec3A::new(0.0, 0.0, size),
            Vec3A::new(size, 0.0, size),
        ],
        indices: vec![UVec3::new(0, 2, 1), UVec3::new(1, 2, 3)],
        area_types: vec![AreaType::DEFAULT_WALKABLE; 2],
    }
}

/// Builds a heightfield with one walkable span per `Some` entry, `rows[z][x]` being the floor height in voxels.
pub(crate) fn heightfield_from_floors(rows: &[&[Option<u16>]]) -> Heightfield {
    let depth = rows.len();
    let width = rows.first().map_or(0, |row| row.len());
    let mut heightfield = HeightfieldBuilder {
        aabb: Aabb3d::new([0.0, 0.0, 0.0], [width as f32, 64.0, depth as f32]),
        cell_size: 1.0,
        cell_height: 1.0,
    }
    .build()
    .unwrap();
    for (z, row) in rows.iter().enumerate() {
        for (x, floor) in row.iter().enumerate() {
            let Some(floor) = floor else {
                continue;
            };
            heightfield
                .add_span(SpanInsertion {
                    x: x as u16,
                    z: z as u16,
                    flag_merge_threshold: 0,
                    span: SpanBuilder {
                        min: 0,
                        max: *floor,
                        area: AreaType::DEFAULT_WALKABLE,
                        next: None,
                    }
                    .build(),
                })
                .unwrap();
        }
    }
    heightfield
}

/// Like [`heightfield_from_floors`], compacted with a walkable height of 2 and a walkable climb of 1.
pub(crate) fn compact_from_floors(rows: &[&[Option<u16>]]) -> CompactHeightfield {
    CompactHeightfield::from_heightfield(&heightfield_from_floors(rows), 2, 1).unwrap()
}
