//! The triangle soup fed into rasterization.

use glam::{UVec3, Vec3A};

use crate::{
    math::{Aabb3d, TriangleIndices as _, TriangleVertices as _},
    span::AreaType,
};

/// A mesh used as input for [`Heightfield`](crate::Heightfield) rasterization.
#[derive(Debug, Clone, PartialEq, Default)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize, serde::Deserialize))]
pub struct TriMesh {
    /// The vertices composing the mesh.
    /// Follows the convention of a triangle list.
    pub vertices: Vec<Vec3A>,

    /// The indices composing the mesh.
    /// Follows the convention of a triangle list.
    pub indices: Vec<UVec3>,

    /// The area types of the trimesh. Each index corresponds 1:1 to the [`TriMesh::indices`].
    pub area_types: Vec<AreaType>,
}

impl TriMesh {
    /// Extends the trimesh with the vertices and indices of another trimesh.
    /// The indices of `other` will be offset by the number of vertices in `self`.
    ///
    /// # Panics
    ///
    /// Panics if the combined vertex count does not fit into a `u32`.
    pub fn extend(&mut self, other: TriMesh) {
        let next_vertex_index = u32::try_from(self.vertices.len())
            .expect("Cannot extend a trimesh with more than 2^32 vertices");
        self.vertices.extend(other.vertices);
        self.indices
            .extend(other.indices.iter().map(|i| i + next_vertex_index));
        self.area_types.extend(other.area_types);
    }

    /// Computes the AABB of the trimesh.
    /// Returns `None` if the trimesh is empty.
    pub fn compute_aabb(&self) -> Option<Aabb3d> {
        Aabb3d::from_verts(&self.vertices)
    }

    /// The number of triangles in the mesh.
    #[inline]
    pub fn triangle_count(&self) -> usize {
        self.indices.len()
    }

    /// Returns the corner positions of the triangle at `index`.
    #[inline]
    pub fn triangle(&self, index: usize) -> [Vec3A; 3] {
        let indices = self.indices[index];
        [
            self.vertices[indices.x as usize],
            self.vertices[indices.y as usize],
            self.vertices[indices.z as usize],
        ]
    }

    /// Marks the triangles as walkable based on the threshold angle.
    ///
    /// Triangles whose normal is within `threshold_rad` of the up vector get [`AreaType::DEFAULT_WALKABLE`],
    /// unless they already carry a walkable area type. Other triangles are left untouched.
    ///
    /// # Arguments
    ///
    /// * `threshold_rad` - The threshold angle in radians.
    ///
    pub fn mark_walkable_triangles(&mut self, threshold_rad: f32) {
        let threshold_cos = threshold_rad.cos();
        for (i, indices) in self.indices.iter().enumerate() {
            let normal = indices.normal(&self.vertices);

            if normal.y > threshold_cos && !self.area_types[i].is_walkable() {
                self.area_types[i] = AreaType::DEFAULT_WALKABLE;
            }
        }
    }

    /// Marks triangles steeper than `threshold_rad` as [`AreaType::NOT_WALKABLE`].
    pub fn clear_unwalkable_triangles(&mut self, threshold_rad: f32) {
        let threshold_cos = threshold_rad.cos();
        for (i, indices) in self.indices.iter().enumerate() {
            let normal = indices.normal(&self.vertices);

            if normal.y <= threshold_cos {
                self.area_types[i] = AreaType::NOT_WALKABLE;
            }
        }
    }

    /// The indices of the triangles whose bounds overlap `aabb` on the xz-plane.
    pub fn triangles_in_xz<'a>(&'a self, aabb: &'a Aabb3d) -> impl Iterator<Item = usize> + 'a {
        (0..self.triangle_count()).filter(move |i| self.triangle(*i).aabb().intersects_xz(aabb))
    }

    /// Copies the given triangles into a new, compacted trimesh.
    /// Vertices that are not referenced by any of the triangles are dropped.
    pub fn subset(&self, triangles: impl IntoIterator<Item = usize>) -> TriMesh {
        let mut remap = vec![u32::MAX; self.vertices.len()];
        let mut subset = TriMesh::default();
        for triangle in triangles {
            let indices = self.indices[triangle];
            let mut mapped = [0_u32; 3];
            for (slot, index) in mapped.iter_mut().zip(indices.to_array()) {
                let remapped = &mut remap[index as usize];
                if *remapped == u32::MAX {
                    *remapped = subset.vertices.len() as u32;
                    subset.vertices.push(self.vertices[index as usize]);
                }
                *slot = *remapped;
            }
            subset.indices.push(UVec3::from_array(mapped));
            subset.area_types.push(self.area_types[triangle]);
        }
        subset
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn slope() -> TriMesh {
        TriMesh {
            vertices: vec![
                Vec3A::new(0.0, 0.0, 0.0),
                Vec3A::new(0.0, 0.0, 1.0),
                Vec3A::new(1.0, 0.0, 0.0),
                // A wall facing -z
                Vec3A::new(0.0, 1.0, 0.0),
            ],
            indices: vec![UVec3::new(0, 1, 2), UVec3::new(0, 3, 2)],
            area_types: vec![AreaType::NOT_WALKABLE; 2],
        }
    }

    #[test]
    fn marks_flat_triangles_walkable() {
        let mut trimesh = slope();
        trimesh.mark_walkable_triangles(45.0_f32.to_radians());
        assert_eq!(
            trimesh.area_types,
            [AreaType::DEFAULT_WALKABLE, AreaType::NOT_WALKABLE]
        );
    }

    #[test]
    fn keeps_custom_walkable_areas() {
        let mut trimesh = slope();
        trimesh.area_types[0] = AreaType(5);
        trimesh.area_types[1] = AreaType(5);
        trimesh.mark_walkable_triangles(45.0_f32.to_radians());
        trimesh.clear_unwalkable_triangles(45.0_f32.to_radians());
        assert_eq!(trimesh.area_types, [AreaType(5), AreaType::NOT_WALKABLE]);
    }

    #[test]
    fn subset_compacts_vertices() {
        let trimesh = slope();
        let subset = trimesh.subset([1]);
        assert_eq!(subset.vertices.len(), 3);
        assert_eq!(subset.indices, [UVec3::new(0, 1, 2)]);
        assert_eq!(subset.triangle(0), trimesh.triangle(1));
    }

    #[test]
    fn selects_triangles_by_footprint() {
        let mut trimesh = slope();
        trimesh.extend(TriMesh {
            vertices: vec![
                Vec3A::new(10.0, 0.0, 10.0),
                Vec3A::new(10.0, 0.0, 11.0),
                Vec3A::new(11.0, 0.0, 10.0),
            ],
            indices: vec![UVec3::new(0, 1, 2)],
            area_types: vec![AreaType::NOT_WALKABLE],
        });
        let near_origin = Aabb3d::new([-1.0, 100.0, -1.0], [0.5, 101.0, 0.5]);
        assert_eq!(trimesh.triangles_in_xz(&near_origin).collect::<Vec<_>>(), [0, 1]);
        let far = Aabb3d::new([10.5, 0.0, 10.5], [12.0, 1.0, 12.0]);
        assert_eq!(trimesh.triangles_in_xz(&far).collect::<Vec<_>>(), [2]);
    }

    #[test]
    fn extend_offsets_indices() {
        let mut trimesh = slope();
        trimesh.extend(slope());
        assert_eq!(trimesh.vertices.len(), 8);
        assert_eq!(trimesh.indices[2], UVec3::new(4, 5, 6));
        assert_eq!(trimesh.area_types.len(), 4);
    }
}
