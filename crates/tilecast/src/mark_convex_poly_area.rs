use glam::{IVec3, Vec3A};
use tracing::debug_span;

use crate::{Aabb3d, AreaType, CompactHeightfield};

impl CompactHeightfield {
    /// Sets the [`AreaType`] of the walkable spans within the given convex volume.
    ///
    /// A span is inside the volume if its floor lies between [`ConvexVolume::min_y`] and [`ConvexVolume::max_y`]
    /// and the center of its column lies inside the polygon on the xz-plane.
    pub fn mark_convex_poly_area(&mut self, volume: &ConvexVolume) {
        let _span = debug_span!("mark_convex_poly_area", area = volume.area.0).entered();
        // Compute the bounding box of the polygon
        let Some(mut aabb) = Aabb3d::from_verts(&volume.vertices) else {
            // The volume is empty
            return;
        };
        aabb.min.y = volume.min_y;
        aabb.max.y = volume.max_y;

        // Compute the grid footprint of the polygon
        let scale = Vec3A::new(self.cell_size, self.cell_height, self.cell_size);
        let min = ((aabb.min - self.aabb.min) / scale).floor();
        let max = ((aabb.max - self.aabb.min) / scale).floor();
        let mut min = IVec3::new(min.x as i32, min.y as i32, min.z as i32);
        let mut max = IVec3::new(max.x as i32, max.y as i32, max.z as i32);

        // Early-out if the polygon lies entirely outside the grid.
        if max.x < 0 || min.x >= self.width as i32 || max.z < 0 || min.z >= self.height as i32 {
            return;
        }

        // Clamp the polygon footprint to the grid
        min.x = min.x.max(0);
        max.x = max.x.min(self.width as i32 - 1);
        min.z = min.z.max(0);
        max.z = max.z.min(self.height as i32 - 1);

        for z in min.z..=max.z {
            for x in min.x..=max.x {
                let cell = self.cells[(x + z * self.width as i32) as usize];
                let point = Vec3A::new(
                    self.aabb.min.x + (x as f32 + 0.5) * self.cell_size,
                    0.0,
                    self.aabb.min.z + (z as f32 + 0.5) * self.cell_size,
                );
                if !point_in_poly(point, &volume.vertices) {
                    continue;
                }
                for i in cell.index_range() {
                    // Skip if span is removed.
                    if !self.areas[i].is_walkable() {
                        continue;
                    }

                    // Skip if y extents don't overlap.
                    let y = self.spans[i].y as i32;
                    if y < min.y || y > max.y {
                        continue;
                    }
                    self.areas[i] = volume.area;
                }
            }
        }
    }
}

fn point_in_poly(point: Vec3A, vertices: &[Vec3A]) -> bool {
    let mut inside = false;
    let mut j = vertices.len() - 1;
    for i in 0..vertices.len() {
        let xi = vertices[i].x;
        let zi = vertices[i].z;
        let xj = vertices[j].x;
        let zj = vertices[j].z;
        if ((zi > point.z) != (zj > point.z))
            && (point.x < (xj - xi) * (point.z - zi) / (zj - zi) + xi)
        {
            inside = !inside;
        }
        j = i;
    }
    inside
}

/// A convex prism that stamps an area type onto the spans it contains.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize, serde::Deserialize))]
pub struct ConvexVolume {
    /// The outline of the volume on the xz-plane. The y-coordinates are ignored.
    pub vertices: Vec<Vec3A>,
    /// The lower bound of the volume. `[Units: wu]`
    pub min_y: f32,
    /// The upper bound of the volume. `[Units: wu]`
    pub max_y: f32,
    /// The area type applied to the spans inside the volume.
    pub area: AreaType,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::flat_compact_heightfield;

    #[test]
    fn marks_spans_inside_volume() {
        let mut compact = flat_compact_heightfield(5.0);
        compact.mark_convex_poly_area(&ConvexVolume {
            vertices: vec![
                Vec3A::new(0.0, 0.0, 0.0),
                Vec3A::new(2.0, 0.0, 0.0),
                Vec3A::new(2.0, 0.0, 2.0),
                Vec3A::new(0.0, 0.0, 2.0),
            ],
            min_y: -1.0,
            max_y: 1.0,
            area: AreaType(7),
        });
        let marked: usize = compact.areas.iter().filter(|a| **a == AreaType(7)).count();
        assert_eq!(marked, 4);
        let first = compact.cell_at(0, 0).index() as usize;
        assert_eq!(compact.areas[first], AreaType(7));
        let outside = compact.cell_at(3, 3).index() as usize;
        assert_eq!(compact.areas[outside], AreaType::DEFAULT_WALKABLE);
    }

    #[test]
    fn ignores_volume_above_floor() {
        let mut compact = flat_compact_heightfield(5.0);
        compact.mark_convex_poly_area(&ConvexVolume {
            vertices: vec![
                Vec3A::new(0.0, 0.0, 0.0),
                Vec3A::new(5.0, 0.0, 0.0),
                Vec3A::new(5.0, 0.0, 5.0),
            ],
            min_y: 1.6,
            max_y: 3.0,
            area: AreaType(7),
        });
        assert!(compact.areas.iter().all(|a| *a == AreaType::DEFAULT_WALKABLE));
    }
}
