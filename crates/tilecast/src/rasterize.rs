//! Conservative voxelization of triangles into a [`Heightfield`].

use glam::Vec3A;
use thiserror::Error;
use tracing::debug_span;

use crate::{
    heightfield::{Heightfield, SpanInsertion, SpanInsertionError},
    math::TriangleVertices as _,
    span::{AreaType, Span, SpanBuilder},
    trimesh::TriMesh,
};

/// Holds a convex polygon produced by clipping a triangle against grid lines.
/// A triangle clipped by two pairs of parallel lines never exceeds seven vertices.
#[derive(Clone, Copy)]
struct ClipPolygon {
    vertices: [Vec3A; 12],
    len: usize,
}

impl ClipPolygon {
    const EMPTY: Self = Self {
        vertices: [Vec3A::ZERO; 12],
        len: 0,
    };

    #[inline]
    fn push(&mut self, vertex: Vec3A) {
        self.vertices[self.len] = vertex;
        self.len += 1;
    }

    #[inline]
    fn as_slice(&self) -> &[Vec3A] {
        &self.vertices[..self.len]
    }
}

#[derive(Clone, Copy)]
enum Axis {
    X,
    Z,
}

/// Splits `input` along the line `axis = offset`.
/// Returns the part below the line and the part above it.
fn divide_polygon(input: &[Vec3A], offset: f32, axis: Axis) -> (ClipPolygon, ClipPolygon) {
    let coordinate = |v: Vec3A| match axis {
        Axis::X => v.x,
        Axis::Z => v.z,
    };
    let mut deltas = [0.0_f32; 12];
    for (delta, vertex) in deltas.iter_mut().zip(input) {
        *delta = offset - coordinate(*vertex);
    }

    let mut below = ClipPolygon::EMPTY;
    let mut above = ClipPolygon::EMPTY;
    let n = input.len();
    let mut b = n.wrapping_sub(1);
    for a in 0..n {
        let same_side = (deltas[a] >= 0.0) == (deltas[b] >= 0.0);
        if !same_side {
            let s = deltas[b] / (deltas[b] - deltas[a]);
            let intersection = input[b] + (input[a] - input[b]) * s;
            below.push(intersection);
            above.push(intersection);
            // Add the a point to the right polygon. Do NOT add points that are on the dividing line
            // since these were already added above.
            if deltas[a] > 0.0 {
                below.push(input[a]);
            } else if deltas[a] < 0.0 {
                above.push(input[a]);
            }
        } else {
            // Add the a point to the right polygon. Addition is done even for points on the dividing line.
            if deltas[a] >= 0.0 {
                below.push(input[a]);
                if deltas[a] != 0.0 {
                    b = a;
                    continue;
                }
            }
            above.push(input[a]);
        }
        b = a;
    }
    (below, above)
}

impl Heightfield {
    /// Rasterizes every triangle of the [`TriMesh`] into the heightfield.
    ///
    /// Triangles with [`AreaType::NOT_WALKABLE`] are rasterized as obstacles.
    ///
    /// # Arguments
    ///
    /// - `trimesh` - The [`TriMesh`] to rasterize.
    /// - `flag_merge_threshold` - The distance where the walkable flag is favored over the non-walkable flag. `[Limit: >= 0] [Units: vx]`
    pub fn rasterize_triangles(
        &mut self,
        trimesh: &TriMesh,
        flag_merge_threshold: u16,
    ) -> Result<(), RasterizationError> {
        let _span = debug_span!("rasterize_triangles", triangles = trimesh.indices.len()).entered();
        for (i, area_type) in trimesh.area_types.iter().enumerate() {
            self.rasterize_triangle(trimesh.triangle(i), *area_type, flag_merge_threshold)?;
        }
        Ok(())
    }

    /// Rasterizes a single triangle into the heightfield.
    /// Every cell the triangle touches gets a span covering the triangle's vertical extent within that cell.
    pub fn rasterize_triangle(
        &mut self,
        triangle: [Vec3A; 3],
        area_type: AreaType,
        flag_merge_threshold: u16,
    ) -> Result<(), RasterizationError> {
        // If the triangle does not touch the bounding box of the heightfield, skip the triangle.
        if !triangle.aabb().intersects(&self.aabb) {
            return Ok(());
        }

        let inverse_cell_size = 1.0 / self.cell_size;
        let inverse_cell_height = 1.0 / self.cell_height;
        let by = self.aabb.max.y - self.aabb.min.y;
        let width = self.width as i32;
        let height = self.height as i32;
        let triangle_aabb = triangle.aabb();

        // Calculate the footprint of the triangle on the grid's z-axis
        let z0 = ((triangle_aabb.min.z - self.aabb.min.z) * inverse_cell_size) as i32;
        let z1 = ((triangle_aabb.max.z - self.aabb.min.z) * inverse_cell_size) as i32;
        // use -1 rather than 0 to cut the polygon properly at the start of the tile
        let z0 = z0.clamp(-1, height - 1);
        let z1 = z1.clamp(0, height - 1);

        let mut remaining = ClipPolygon::EMPTY;
        for vertex in triangle {
            remaining.push(vertex);
        }
        for z in z0..=z1 {
            // Clip polygon to row. Store the remaining polygon as well
            let cell_z = self.aabb.min.z + z as f32 * self.cell_size;
            let (row, rest) = divide_polygon(remaining.as_slice(), cell_z + self.cell_size, Axis::Z);
            remaining = rest;
            if row.len < 3 || z < 0 {
                continue;
            }

            // find X-axis bounds of the row
            let (min_x, max_x) = row
                .as_slice()
                .iter()
                .fold((f32::MAX, f32::MIN), |(min, max), v| (min.min(v.x), max.max(v.x)));
            let x0 = ((min_x - self.aabb.min.x) * inverse_cell_size) as i32;
            let x1 = ((max_x - self.aabb.min.x) * inverse_cell_size) as i32;
            if x1 < 0 || x0 >= width {
                continue;
            }
            let x0 = x0.clamp(-1, width - 1);
            let x1 = x1.clamp(0, width - 1);

            let mut row_remaining = row;
            for x in x0..=x1 {
                // Clip polygon to column. store the remaining polygon as well
                let cell_x = self.aabb.min.x + x as f32 * self.cell_size;
                let (cell, rest) =
                    divide_polygon(row_remaining.as_slice(), cell_x + self.cell_size, Axis::X);
                row_remaining = rest;
                if cell.len < 3 || x < 0 {
                    continue;
                }

                // Calculate min and max of the span.
                let (span_min, span_max) = cell
                    .as_slice()
                    .iter()
                    .fold((f32::MAX, f32::MIN), |(min, max), v| (min.min(v.y), max.max(v.y)));
                let span_min = span_min - self.aabb.min.y;
                let span_max = span_max - self.aabb.min.y;

                // Skip the span if it's completely outside the heightfield bounding box
                if span_max < 0.0 || span_min > by {
                    continue;
                }

                // Clamp the span to the heightfield bounding box.
                let span_min = span_min.max(0.0);
                let span_max = span_max.min(by);

                // Snap the span to the heightfield height grid.
                let span_min_cell = ((span_min * inverse_cell_height).floor() as i32)
                    .clamp(0, Span::MAX_HEIGHT as i32) as u16;
                let span_max_cell = ((span_max * inverse_cell_height).ceil() as i32)
                    .clamp(span_min_cell as i32 + 1, Span::MAX_HEIGHT as i32)
                    as u16;

                self.add_span(SpanInsertion {
                    x: x as u16,
                    z: z as u16,
                    flag_merge_threshold,
                    span: SpanBuilder {
                        min: span_min_cell,
                        max: span_max_cell,
                        area: area_type,
                        next: None,
                    }
                    .build(),
                })?;
            }
        }
        Ok(())
    }
}

/// Errors that can occur during rasterization.
#[derive(Error, Debug)]
pub enum RasterizationError {
    /// A span could not be inserted into the heightfield.
    #[error("Failed to insert span: {0}")]
    SpanInsertion(#[from] SpanInsertionError),
}
