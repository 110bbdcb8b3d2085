//! Region outlines traced from a [`CompactHeightfield`] and simplified into polygons.

use glam::{U16Vec3, Vec2};
use tracing::{debug_span, warn};

use crate::{
    Aabb3d, AreaType, CompactHeightfield,
    math::{distance_squared_point_segment_2d, intersect, left, left_on, next, prev},
    region::RegionId,
};

impl CompactHeightfield {
    /// Builds a contour set from the region outlines in the compact heightfield.
    ///
    /// The raw contours will match the region outlines exactly. The `max_error` and `max_edge_len`
    /// parameters control how closely the simplified contours will match the raw contours.
    ///
    /// Simplified contours are generated such that the vertices for portals between areas match up.
    /// (They are considered mandatory vertices.)
    ///
    /// Setting `max_edge_len` to zero will disable the edge length feature.
    ///
    /// Holes are merged into the outline of their region, so every region produces at most one contour.
    pub fn build_contours(
        &self,
        max_error: f32,
        max_edge_len: u16,
        build_flags: BuildContoursFlags,
    ) -> ContourSet {
        let _span = debug_span!("build_contours").entered();
        let border_size = self.border_size;
        let mut cset = ContourSet {
            contours: Vec::with_capacity(self.max_region.bits().max(8) as usize),
            aabb: self.aabb,
            cell_size: self.cell_size,
            cell_height: self.cell_height,
            width: self.width.saturating_sub(border_size * 2),
            height: self.height.saturating_sub(border_size * 2),
            border_size,
            max_error,
        };
        if border_size > 0 {
            // If the heightfield was built with border_size, remove the offset
            let pad = border_size as f32 * self.cell_size;
            cset.aabb.min.x += pad;
            cset.aabb.min.z += pad;
            cset.aabb.max.x -= pad;
            cset.aabb.max.z -= pad;
        }

        let mut flags = vec![0_u8; self.spans.len()];

        // Mark boundaries
        for z in 0..self.height {
            for x in 0..self.width {
                for i in self.cell_at(x, z).index_range() {
                    let region = self.spans[i].region;
                    if !region.is_walkable_region() {
                        flags[i] = 0;
                        continue;
                    }
                    let mut res = 0;
                    for dir in 0..4 {
                        let r = self
                            .neighbor(x as i32, z as i32, i, dir)
                            .map_or(RegionId::NONE, |(_, _, a_index)| self.spans[a_index].region);
                        if r == region {
                            res |= 1 << dir;
                        }
                    }
                    // Inverse, mark non connected edges.
                    flags[i] = res ^ 0xf;
                }
            }
        }

        let mut verts = Vec::with_capacity(256);
        let mut simplified = Vec::with_capacity(64);

        for z in 0..self.height {
            for x in 0..self.width {
                for i in self.cell_at(x, z).index_range() {
                    if flags[i] == 0 || flags[i] == 0xf {
                        flags[i] = 0;
                        continue;
                    }
                    let region = self.spans[i].region;
                    if !region.is_walkable_region() {
                        continue;
                    }
                    let area = self.areas[i];

                    verts.clear();
                    simplified.clear();

                    self.walk_contour(x, z, i, &mut flags, &mut verts);
                    simplify_contour(&verts, &mut simplified, max_error, max_edge_len, build_flags);
                    remove_degenerate_segments(&mut simplified);

                    // Create contour.
                    if simplified.len() >= 3 {
                        let offset = |mut vertex: ContourVertex| {
                            vertex.x = vertex.x.saturating_sub(border_size);
                            vertex.z = vertex.z.saturating_sub(border_size);
                            vertex
                        };
                        cset.contours.push(Contour {
                            vertices: simplified.iter().copied().map(offset).collect(),
                            raw_vertices: verts.iter().copied().map(offset).collect(),
                            region,
                            area,
                        });
                    }
                }
            }
        }

        cset.merge_holes(self.max_region);
        cset
    }

    fn walk_contour(
        &self,
        mut x: u16,
        mut z: u16,
        mut i: usize,
        flags: &mut [u8],
        points: &mut Vec<ContourVertex>,
    ) {
        // Choose the first non-connected edge
        let mut dir = 0;
        while flags[i] & (1 << dir) == 0 {
            dir += 1;
        }

        let start_dir = dir;
        let start_i = i;
        let area = self.areas[i];

        for _ in 0..40_000 {
            if flags[i] & (1 << dir) != 0 {
                // Choose the edge corner
                let (y, is_border_vertex) = self.corner_height(x, z, i, dir);
                let (mut p_x, mut p_z) = (x, z);
                match dir {
                    0 => p_z += 1,
                    1 => {
                        p_x += 1;
                        p_z += 1;
                    }
                    2 => p_x += 1,
                    _ => {}
                }
                let mut flags_out = RegionVertexId::NONE;
                if let Some((_, _, a_i)) = self.neighbor(x as i32, z as i32, i, dir) {
                    flags_out = RegionVertexId::from(self.spans[a_i].region);
                    if area != self.areas[a_i] {
                        flags_out |= RegionVertexId::AREA_BORDER;
                    }
                }
                if is_border_vertex {
                    flags_out |= RegionVertexId::BORDER_VERTEX;
                }
                points.push(ContourVertex {
                    x: p_x,
                    y,
                    z: p_z,
                    flags: flags_out,
                });

                // Remove visited edges
                flags[i] &= !(1 << dir);
                // Rotate clockwise
                dir = (dir + 1) & 0x3;
            } else {
                let Some((n_x, n_z, n_i)) = self.neighbor(x as i32, z as i32, i, dir) else {
                    // A connected edge always has a neighbor.
                    return;
                };
                x = n_x as u16;
                z = n_z as u16;
                i = n_i;
                // Rotate counterclockwise
                dir = (dir + 3) & 0x3;
            }
            if start_i == i && start_dir == dir {
                break;
            }
        }
    }

    /// Returns the height of the corner of span `i` that lies clockwise after the edge in `dir`,
    /// and whether that corner is a tile border vertex to be removed later.
    fn corner_height(&self, x: u16, z: u16, i: usize, dir: u8) -> (u16, bool) {
        let span = &self.spans[i];
        let mut height = span.y;
        let dir_p = (dir + 1) & 0x3;

        // Combine region and area codes in order to prevent
        // border vertices which are in between two areas to be removed.
        let region_and_area =
            |i: usize| self.spans[i].region.bits() as u32 | ((self.areas[i].0 as u32) << 16);
        let mut regs = [0_u32; 4];
        regs[0] = region_and_area(i);

        if let Some((a_x, a_z, a_i)) = self.neighbor(x as i32, z as i32, i, dir) {
            height = height.max(self.spans[a_i].y);
            regs[1] = region_and_area(a_i);
            if let Some((_, _, b_i)) = self.neighbor(a_x, a_z, a_i, dir_p) {
                height = height.max(self.spans[b_i].y);
                regs[2] = region_and_area(b_i);
            }
        }
        if let Some((a_x, a_z, a_i)) = self.neighbor(x as i32, z as i32, i, dir_p) {
            height = height.max(self.spans[a_i].y);
            regs[3] = region_and_area(a_i);
            if let Some((_, _, b_i)) = self.neighbor(a_x, a_z, a_i, dir) {
                height = height.max(self.spans[b_i].y);
                regs[2] = region_and_area(b_i);
            }
        }

        // Check if the vertex is special edge vertex, these vertices will be removed later.
        let border = RegionId::BORDER_REGION.bits() as u32;
        let is_border_vertex = (0..4).any(|j| {
            let a = regs[j];
            let b = regs[(j + 1) & 0x3];
            let c = regs[(j + 2) & 0x3];
            let d = regs[(j + 3) & 0x3];

            // The vertex is a border vertex there are two same exterior cells in a row,
            // followed by two interior cells and none of the regions are out of bounds.
            let two_same_exts = (a & b & border) != 0 && a == b;
            let two_ints = ((c | d) & border) == 0;
            let ints_same_area = (c >> 16) == (d >> 16);
            let no_zeros = a != 0 && b != 0 && c != 0 && d != 0;
            two_same_exts && two_ints && ints_same_area && no_zeros
        });
        (height, is_border_vertex)
    }
}

fn simplify_contour(
    points: &[ContourVertex],
    simplified: &mut Vec<ContourVertex>,
    max_error: f32,
    max_edge_len: u16,
    flags: BuildContoursFlags,
) {
    // Simplified vertices carry the index of their raw vertex until the final flags are computed.
    let mut work: Vec<(U16Vec3, usize)> = Vec::with_capacity(64);
    let pn = points.len();
    if pn == 0 {
        return;
    }

    // Add initial points.
    let has_connections = points.iter().any(|p| p.region() != RegionId::NONE);
    if has_connections {
        // The contour has some portals to other regions.
        // Add a new point to every location where the region changes.
        for (i, point) in points.iter().enumerate() {
            let next_point = &points[(i + 1) % pn];
            let different_regs = point.region() != next_point.region();
            let area_borders = point.flags.contains(RegionVertexId::AREA_BORDER)
                != next_point.flags.contains(RegionVertexId::AREA_BORDER);
            if different_regs || area_borders {
                work.push((point.position(), i));
            }
        }
    }

    if work.is_empty() {
        // If there is no connections at all,
        // create some initial points for the simplification process.
        // Find lower-left and upper-right vertices of the contour.
        let mut lower_left = (points[0].position(), 0);
        let mut upper_right = (points[0].position(), 0);
        for (i, point) in points.iter().enumerate() {
            let p = point.position();
            let ll = lower_left.0;
            if p.x < ll.x || (p.x == ll.x && p.z < ll.z) {
                lower_left = (p, i);
            }
            let ur = upper_right.0;
            if p.x > ur.x || (p.x == ur.x && p.z > ur.z) {
                upper_right = (p, i);
            }
        }
        work.push(lower_left);
        work.push(upper_right);
    }

    // Add points until all raw points are within
    // error tolerance to the simplified shape.
    let max_error_sq = max_error * max_error;
    let mut i = 0;
    while i < work.len() {
        let ii = (i + 1) % work.len();
        let (mut a, a_i) = work[i];
        let (mut b, b_i) = work[ii];

        // Find maximum deviation from the segment.
        let mut max_d = 0.0;
        let mut max_i = None;

        // Traverse the segment in lexilogical order so that the
        // max deviation is calculated similarly when traversing
        // opposite segments.
        let (c_inc, mut c_i, end_i) = if b.x > a.x || (b.x == a.x && b.z > a.z) {
            (1, (a_i + 1) % pn, b_i)
        } else {
            std::mem::swap(&mut a, &mut b);
            (pn - 1, (b_i + pn - 1) % pn, a_i)
        };

        // Tessellate only outer edges or edges between areas.
        let c_flags = points[c_i].flags;
        if RegionId::from(c_flags) == RegionId::NONE || c_flags.contains(RegionVertexId::AREA_BORDER) {
            while c_i != end_i {
                let p = points[c_i].position();
                let d = distance_squared_point_segment_2d(xz(p), xz(a), xz(b));
                if d > max_d {
                    max_d = d;
                    max_i = Some(c_i);
                }
                c_i = (c_i + c_inc) % pn;
            }
        }

        // If the max deviation is larger than accepted error,
        // add new point, else continue to next segment.
        match max_i {
            Some(max_i) if max_d > max_error_sq => {
                work.insert(i + 1, (points[max_i].position(), max_i));
            }
            _ => i += 1,
        }
    }

    // Split too long edges.
    let tessellate_walls = flags.contains(BuildContoursFlags::TESSELLATE_SOLID_WALL_EDGES);
    let tessellate_areas = flags.contains(BuildContoursFlags::TESSELLATE_AREA_EDGES);
    if max_edge_len > 0 && (tessellate_walls || tessellate_areas) {
        let max_edge_len_sq = max_edge_len as i64 * max_edge_len as i64;
        let mut i = 0;
        while i < work.len() {
            let ii = (i + 1) % work.len();
            let (a, a_i) = work[i];
            let (b, b_i) = work[ii];

            // Find maximum deviation from the segment.
            let mut max_i = None;
            let c_i = (a_i + 1) % pn;

            // Tessellate only outer edges or edges between areas.
            let c_flags = points[c_i].flags;
            let tess = (tessellate_walls && RegionId::from(c_flags) == RegionId::NONE)
                || (tessellate_areas && c_flags.contains(RegionVertexId::AREA_BORDER));

            if tess {
                let dx = b.x as i64 - a.x as i64;
                let dz = b.z as i64 - a.z as i64;
                if dx * dx + dz * dz > max_edge_len_sq {
                    // Round based on the segments in lexilogical order so that the
                    // max tesselation is consistent regardless in which direction
                    // segments are traversed.
                    let n = if b_i < a_i { b_i + pn - a_i } else { b_i - a_i };
                    if n > 1 {
                        max_i = Some(if b.x > a.x || (b.x == a.x && b.z > a.z) {
                            (a_i + n / 2) % pn
                        } else {
                            (a_i + n.div_ceil(2)) % pn
                        });
                    }
                }
            }

            // If the max deviation is larger than accepted error,
            // add new point, else continue to next segment.
            match max_i {
                Some(max_i) => work.insert(i + 1, (points[max_i].position(), max_i)),
                None => i += 1,
            }
        }
    }

    for (position, raw_index) in work {
        // The edge vertex flag is take from the current raw point,
        // and the neighbour region is take from the next raw point.
        let next_flags = points[(raw_index + 1) % pn].flags;
        let own_flags = points[raw_index].flags;
        let flags = (next_flags & (RegionVertexId::REGION_MASK | RegionVertexId::AREA_BORDER))
            | (own_flags & RegionVertexId::BORDER_VERTEX);
        simplified.push(ContourVertex {
            x: position.x,
            y: position.y,
            z: position.z,
            flags,
        });
    }
}

#[inline]
fn xz(v: U16Vec3) -> Vec2 {
    Vec2::new(v.x as f32, v.z as f32)
}

/// Removes adjacent vertices which are equal on the xz-plane, as they confuse the triangulator.
fn remove_degenerate_segments(simplified: &mut Vec<ContourVertex>) {
    let mut i = 0;
    while i < simplified.len() {
        let ni = next(i, simplified.len());
        if ni != i && simplified[i].xz() == simplified[ni].xz() {
            simplified.remove(i);
        } else {
            i += 1;
        }
    }
}

/// Twice the signed area of the polygon on the xz-plane, rounded towards positive.
fn calc_area_of_polygon_2d(vertices: &[ContourVertex]) -> i64 {
    let n = vertices.len();
    let mut area = 0_i64;
    for i in 0..n {
        let vi = vertices[i].xz();
        let vj = vertices[prev(i, n)].xz();
        area += vi[0] as i64 * vj[1] as i64 - vj[0] as i64 * vi[1] as i64;
    }
    (area + 1) / 2
}

impl ContourSet {
    /// Merges every hole contour into the outline of its region.
    fn merge_holes(&mut self, max_region: RegionId) {
        if self.contours.is_empty() {
            return;
        }
        // Calculate winding of all polygons.
        let winding: Vec<bool> = self
            .contours
            .iter()
            .map(|contour| calc_area_of_polygon_2d(&contour.vertices) < 0)
            .collect();
        if !winding.iter().any(|is_hole| *is_hole) {
            return;
        }

        let region_count = max_region.index() + 1;
        let mut outlines: Vec<Option<usize>> = vec![None; region_count];
        let mut holes: Vec<Vec<usize>> = vec![Vec::new(); region_count];
        for (i, contour) in self.contours.iter().enumerate() {
            let region = contour.region.index();
            if region >= region_count {
                continue;
            }
            // Positively wound contours are outlines, negative holes.
            if winding[i] {
                holes[region].push(i);
            } else if outlines[region].is_some() {
                warn!(
                    "Multiple outlines for region {}, the navmesh may be broken",
                    contour.region.bits()
                );
            } else {
                outlines[region] = Some(i);
            }
        }

        for (region, region_holes) in holes.into_iter().enumerate() {
            if region_holes.is_empty() {
                continue;
            }
            let Some(outline) = outlines[region] else {
                warn!("Missing outline for region {region}, skipping its holes");
                continue;
            };
            self.merge_region_holes(outline, region_holes);
        }

        // Holes that were merged are left without vertices.
        self.contours.retain(|contour| !contour.vertices.is_empty());
    }

    fn merge_region_holes(&mut self, outline: usize, holes: Vec<usize>) {
        // Sort holes from left to right.
        let mut holes: Vec<(usize, [i32; 2], usize)> = holes
            .into_iter()
            .map(|hole| {
                let (min, leftmost) = find_left_most_vertex(&self.contours[hole].vertices);
                (hole, min, leftmost)
            })
            .collect();
        holes.sort_by_key(|(_, min, _)| *min);

        for hole_index in 0..holes.len() {
            let (hole, _, leftmost) = holes[hole_index];
            let hole_len = self.contours[hole].vertices.len();
            let mut merge_point = None;
            let mut best_vertex = leftmost;
            for _ in 0..hole_len {
                // Find potential diagonals.
                // The 'best' vertex must be in the cone described by 3 consecutive vertices of the outline.
                // ..o j-1
                //   |
                //   |   * best
                //   |
                // j o-----o j+1
                //         :
                let corner = self.contours[hole].vertices[best_vertex].xz();
                let outline_vertices = &self.contours[outline].vertices;
                let mut diagonals: Vec<(usize, i64)> = (0..outline_vertices.len())
                    .filter(|&j| in_cone(j, outline_vertices, corner))
                    .map(|j| {
                        let v = outline_vertices[j].xz();
                        let dx = (v[0] - corner[0]) as i64;
                        let dz = (v[1] - corner[1]) as i64;
                        (j, dx * dx + dz * dz)
                    })
                    .collect();
                // Sort potential diagonals by distance, we want to make the connection as short as possible.
                diagonals.sort_by_key(|(_, distance)| *distance);

                // Find a diagonal that is not intersecting the outline not the remaining holes.
                merge_point = diagonals.iter().map(|(j, _)| *j).find(|&j| {
                    let pt = outline_vertices[j].xz();
                    !intersect_seg_contour(pt, corner, Some(j), outline_vertices)
                        && holes[hole_index..].iter().all(|(other, _, _)| {
                            !intersect_seg_contour(pt, corner, None, &self.contours[*other].vertices)
                        })
                });
                // If found non-intersecting diagonal, stop looking.
                if merge_point.is_some() {
                    break;
                }
                // All the potential diagonals for the current vertex were intersecting, try next vertex.
                best_vertex = (best_vertex + 1) % hole_len;
            }

            let Some(merge_point) = merge_point else {
                warn!(
                    "Failed to find merge points for outline of region {} and hole",
                    self.contours[outline].region.bits()
                );
                continue;
            };
            let hole_vertices = std::mem::take(&mut self.contours[hole].vertices);
            merge_contours(
                &mut self.contours[outline].vertices,
                &hole_vertices,
                merge_point,
                best_vertex,
            );
        }
    }
}

fn find_left_most_vertex(vertices: &[ContourVertex]) -> ([i32; 2], usize) {
    let mut min = vertices[0].xz();
    let mut leftmost = 0;
    for (i, vertex) in vertices.iter().enumerate().skip(1) {
        let v = vertex.xz();
        if v[0] < min[0] || (v[0] == min[0] && v[1] < min[1]) {
            min = v;
            leftmost = i;
        }
    }
    (min, leftmost)
}

fn in_cone(i: usize, vertices: &[ContourVertex], pj: [i32; 2]) -> bool {
    let n = vertices.len();
    let pi = vertices[i].xz();
    let pi1 = vertices[next(i, n)].xz();
    let pin1 = vertices[prev(i, n)].xz();

    // If P[i] is a convex vertex [ i+1 left or on (i-1,i) ].
    if left_on(pin1, pi, pi1) {
        return left(pi, pj, pin1) && left(pj, pi, pi1);
    }
    // Assume (i-1,i,i+1) not collinear.
    // else P[i] is reflex.
    !(left_on(pi, pj, pi1) && left_on(pj, pi, pin1))
}

fn intersect_seg_contour(
    d0: [i32; 2],
    d1: [i32; 2],
    skip: Option<usize>,
    vertices: &[ContourVertex],
) -> bool {
    let n = vertices.len();
    // For each edge (k,k+1) of P
    (0..n).any(|k| {
        let k1 = next(k, n);
        // Skip edges incident to i.
        if skip == Some(k) || skip == Some(k1) {
            return false;
        }
        let p0 = vertices[k].xz();
        let p1 = vertices[k1].xz();
        if d0 == p0 || d1 == p0 || d0 == p1 || d1 == p1 {
            return false;
        }
        intersect(d0, d1, p0, p1)
    })
}

/// Splices `hole` into `outline`, connecting outline vertex `ia` with hole vertex `ib`.
fn merge_contours(
    outline: &mut Vec<ContourVertex>,
    hole: &[ContourVertex],
    ia: usize,
    ib: usize,
) {
    let na = outline.len();
    let nb = hole.len();
    let mut vertices = Vec::with_capacity(na + nb + 2);
    // Copy contour A.
    for i in 0..=na {
        vertices.push(outline[(ia + i) % na]);
    }
    // Copy contour B
    for i in 0..=nb {
        vertices.push(hole[(ib + i) % nb]);
    }
    *outline = vertices;
}

/// Represents a group of related contours.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize, serde::Deserialize))]
pub struct ContourSet {
    /// An array of the contours in the set.
    pub contours: Vec<Contour>,
    /// The AABB in world space
    pub aabb: Aabb3d,
    /// The size of each cell. (On the xz-plane.)
    pub cell_size: f32,
    /// The height of each cell. (The minimum increment along the y-axis.)
    pub cell_height: f32,
    /// The width of the set. (Along the x-axis in cell units.)
    pub width: u16,
    /// The height of the set. (Along the z-axis in cell units.)
    pub height: u16,
    /// The AABB border size used to generate the source data from which the contours were derived.
    pub border_size: u16,
    /// The max edge error that this contour set was simplified with.
    pub max_error: f32,
}

bitflags::bitflags! {
    /// The neighbor information stored with each contour vertex.
    ///
    /// The low 16 bits hold the id of the region on the other side of the edge starting at the vertex.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    #[cfg_attr(feature = "serialize", derive(serde::Serialize, serde::Deserialize))]
    #[repr(transparent)]
    pub struct RegionVertexId: u32 {
        /// No neighbor.
        const NONE = 0;

        /// Applied to the region id field of contour vertices in order to extract the region id.
        /// The region id field of a vertex may have several flags applied to it.  So the
        /// fields value can't be used directly.
        const REGION_MASK = RegionId::MAX.bits() as u32;

        /// Border vertex flag.
        /// If a region ID has this bit set, then the associated element lies on
        /// a tile border. If a contour vertex's region ID has this bit set, the
        /// vertex will later be removed in order to match the segments and vertices
        /// at tile boundaries.
        /// (Used during the build process.)
        const BORDER_VERTEX = 0x10_000;

        /// Area border flag.
        /// If a region ID has this bit set, then the associated element lies on
        /// the border of an area.
        /// (Used during the region and contour build process.)
        const AREA_BORDER = 0x20_000;
    }
}

impl From<RegionId> for RegionVertexId {
    fn from(region_id: RegionId) -> Self {
        RegionVertexId::from_bits_retain(region_id.bits() as u32)
    }
}

impl From<RegionVertexId> for RegionId {
    fn from(region_vertex_id: RegionVertexId) -> Self {
        let bits = region_vertex_id.bits() & RegionVertexId::REGION_MASK.bits();
        RegionId::from_bits_retain(bits as u16)
    }
}

/// A vertex of a [`Contour`] in voxel coordinates, relative to the contour set's [`ContourSet::aabb`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize, serde::Deserialize))]
pub struct ContourVertex {
    /// The x coordinate.
    pub x: u16,
    /// The y coordinate, the height of the floor at the vertex.
    pub y: u16,
    /// The z coordinate.
    pub z: u16,
    /// The neighbor region and edge flags.
    pub flags: RegionVertexId,
}

impl ContourVertex {
    /// The id of the region on the other side of the edge starting at this vertex.
    #[inline]
    pub fn region(&self) -> RegionId {
        RegionId::from(self.flags)
    }

    #[inline]
    pub(crate) fn position(&self) -> U16Vec3 {
        U16Vec3::new(self.x, self.y, self.z)
    }

    #[inline]
    pub(crate) fn xz(&self) -> [i32; 2] {
        [self.x as i32, self.z as i32]
    }
}

/// Represents a simple, non-overlapping contour in field space.
#[derive(Debug, Clone, PartialEq, Default)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize, serde::Deserialize))]
pub struct Contour {
    /// Simplified contour vertex and connection data.
    pub vertices: Vec<ContourVertex>,
    /// Raw contour vertex and connection data.
    pub raw_vertices: Vec<ContourVertex>,
    /// Region ID of the contour.
    pub region: RegionId,
    /// Area type of the contour.
    pub area: AreaType,
}

bitflags::bitflags! {
    /// Contour build flags used in [`CompactHeightfield::build_contours`]
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
    #[cfg_attr(feature = "serialize", derive(serde::Serialize, serde::Deserialize))]
    #[repr(transparent)]
    pub struct BuildContoursFlags: u8 {
        /// Tessellate solid (impassable) edges during contour simplification.
        const TESSELLATE_SOLID_WALL_EDGES = 1;
        /// Tessellate edges between areas during contour simplification.
        const TESSELLATE_AREA_EDGES = 2;

        /// Default flags for building contours.
        const DEFAULT = Self::TESSELLATE_SOLID_WALL_EDGES.bits();
    }
}

impl Default for BuildContoursFlags {
    fn default() -> Self {
        Self::DEFAULT
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{compact_from_floors, flat_compact_heightfield};

    fn contours(compact: &mut CompactHeightfield, max_edge_len: u16) -> ContourSet {
        compact.build_distance_field();
        compact.build_regions(0, 0, 20).unwrap();
        compact.build_contours(1.3, max_edge_len, BuildContoursFlags::DEFAULT)
    }

    #[test]
    fn square_region_simplifies_to_its_corners() {
        let mut compact = flat_compact_heightfield(10.0);
        let cset = contours(&mut compact, 0);
        assert_eq!(cset.contours.len(), 1);
        let contour = &cset.contours[0];
        assert_eq!(contour.region, RegionId::from(1));
        assert_eq!(contour.area, AreaType::DEFAULT_WALKABLE);
        let mut corners: Vec<(u16, u16)> = contour.vertices.iter().map(|v| (v.x, v.z)).collect();
        corners.sort();
        assert_eq!(corners, [(0, 0), (0, 10), (10, 0), (10, 10)]);
        assert_eq!(contour.raw_vertices.len(), 40);
        assert!(calc_area_of_polygon_2d(&contour.vertices) > 0);
    }

    #[test]
    fn long_edges_are_tessellated() {
        let mut compact = flat_compact_heightfield(10.0);
        let cset = contours(&mut compact, 4);
        let contour = &cset.contours[0];
        assert!(contour.vertices.len() > 4);
        for (i, a) in contour.vertices.iter().enumerate() {
            let b = contour.vertices[(i + 1) % contour.vertices.len()];
            let dx = a.x as i32 - b.x as i32;
            let dz = a.z as i32 - b.z as i32;
            assert!(dx * dx + dz * dz <= 16);
        }
    }

    #[test]
    fn holes_are_merged_into_the_outline() {
        let floor = Some(1);
        let mut rows = vec![vec![floor; 12]; 12];
        for row in rows.iter_mut().skip(5).take(2) {
            row[5] = None;
            row[6] = None;
        }
        let rows: Vec<&[Option<u16>]> = rows.iter().map(Vec::as_slice).collect();
        let mut compact = compact_from_floors(&rows);
        compact.build_distance_field();
        compact.build_regions(0, 0, 400).unwrap();
        let cset = compact.build_contours(1.3, 0, BuildContoursFlags::DEFAULT);
        assert_eq!(cset.contours.len(), compact.max_region.bits() as usize);
        for contour in &cset.contours {
            assert!(contour.vertices.len() >= 3);
        }
    }

    #[test]
    fn border_offset_is_removed() {
        let mut compact = flat_compact_heightfield(12.0);
        compact.build_distance_field();
        compact.build_regions(2, 0, 20).unwrap();
        let cset = compact.build_contours(1.3, 0, BuildContoursFlags::DEFAULT);
        assert_eq!(cset.width, 8);
        assert_eq!(cset.border_size, 2);
        assert_eq!(cset.aabb.min.x, 2.0);
        let max_x = cset
            .contours
            .iter()
            .flat_map(|c| c.vertices.iter().map(|v| v.x))
            .max()
            .unwrap();
        assert_eq!(max_x, 8);
    }

    #[test]
    fn empty_field_has_no_contours() {
        let mut compact = compact_from_floors(&[&[None, None], &[None, None]]);
        let cset = contours(&mut compact, 12);
        assert!(cset.contours.is_empty());
    }
}
