//! Convex polygon mesh built from a [`ContourSet`].

use std::collections::VecDeque;

use glam::U16Vec3;
use thiserror::Error;
use tracing::{debug_span, warn};

use crate::{
    Aabb3d, AreaType,
    contours::{ContourSet, RegionVertexId},
    math::{area2, intersect, intersect_prop, left, left_on, next, prev},
    region::RegionId,
};

/// Represents a polygon mesh suitable for use in building a navigation mesh.
///
/// Vertices are stored on the integer voxel lattice, relative to [`PolygonNavmesh::aabb`].
#[derive(Debug, Default, Clone, PartialEq)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize, serde::Deserialize))]
pub struct PolygonNavmesh {
    /// The mesh vertices in voxel coordinates.
    pub vertices: Vec<U16Vec3>,
    /// Polygon and neighbor data. [Length: [`Self::polygon_count`] * 2 * [`Self::max_vertices_per_polygon`]]
    ///
    /// Each polygon stores `max_vertices_per_polygon` vertex indices, padded with [`Self::NO_INDEX`],
    /// followed by one entry per edge naming the polygon on the other side of that edge.
    /// Edges on a tile border carry `0x8000 | side` instead, see [`Self::PORTAL_FLAG`].
    pub polygons: Vec<u16>,
    /// The region id assigned to each polygon.
    pub regions: Vec<RegionId>,
    /// The user defined flags assigned to each polygon.
    pub flags: Vec<u16>,
    /// The area id assigned to each polygon.
    pub areas: Vec<AreaType>,
    /// The maximum number of vertices per polygon
    pub max_vertices_per_polygon: usize,
    /// The bounding box of the mesh in world space.
    pub aabb: Aabb3d,
    /// The size of each cell. (On the xz-plane.)
    pub cell_size: f32,
    /// The height of each cell. (The minimum increment along the y-axis.)
    pub cell_height: f32,
    /// The AABB border size used to generate the source data from which the mesh was derived.
    pub border_size: u16,
    /// The max error of the polygon edges in the mesh.
    pub max_edge_error: f32,
}

impl PolygonNavmesh {
    /// Marks unused vertex slots and edges without a neighbor.
    pub const NO_INDEX: u16 = 0xffff;

    /// Set on the neighbor entry of edges that lie on the tile border.
    /// The low bits hold the side: 0 = -x, 1 = +z, 2 = +x, 3 = -z.
    pub const PORTAL_FLAG: u16 = 0x8000;

    /// The largest number of vertices a mesh can hold.
    pub const MAX_VERTICES: usize = 0xfffe;

    /// The largest number of polygons a mesh can hold. Neighbor entries at or above [`Self::PORTAL_FLAG`] are portals.
    pub const MAX_POLYGONS: usize = 0x7fff;

    /// The number of polygons in the mesh.
    #[inline]
    pub fn polygon_count(&self) -> usize {
        self.regions.len()
    }

    /// The vertex indices of polygon `index`, without padding.
    pub fn polygon_vertices(&self, index: usize) -> &[u16] {
        let nvp = self.max_vertices_per_polygon;
        let poly = &self.polygons[index * nvp * 2..index * nvp * 2 + nvp];
        let len = poly.iter().position(|v| *v == Self::NO_INDEX).unwrap_or(nvp);
        &poly[..len]
    }

    /// The neighbor entries of polygon `index`, one per edge.
    pub fn polygon_neighbors(&self, index: usize) -> &[u16] {
        let nvp = self.max_vertices_per_polygon;
        let len = self.polygon_vertices(index).len();
        let start = index * nvp * 2 + nvp;
        &self.polygons[start..start + len]
    }

    fn empty(contours: &ContourSet, max_vertices_per_polygon: usize) -> Self {
        Self {
            vertices: Vec::new(),
            polygons: Vec::new(),
            regions: Vec::new(),
            flags: Vec::new(),
            areas: Vec::new(),
            max_vertices_per_polygon,
            aabb: contours.aabb,
            cell_size: contours.cell_size,
            cell_height: contours.cell_height,
            border_size: contours.border_size,
            max_edge_error: contours.max_error,
        }
    }
}

impl ContourSet {
    /// Builds a polygon mesh from the provided contours.
    ///
    /// Each contour is triangulated by ear clipping, after which neighboring polygons are merged greedily
    /// into convex polygons of at most `max_vertices_per_polygon` vertices, always picking the merge
    /// that yields the largest polygon.
    ///
    /// Fails if the mesh would hold more than `max_polygons` polygons.
    pub fn build_polygon_mesh(
        &self,
        max_vertices_per_polygon: usize,
        max_polygons: usize,
    ) -> Result<PolygonNavmesh, PolygonNavmeshError> {
        let _span = debug_span!("build_polygon_mesh").entered();
        let nvp = max_vertices_per_polygon;
        let mut mesh = PolygonNavmesh::empty(self, nvp);

        let max_vertices: usize = self
            .contours
            .iter()
            .filter(|contour| contour.vertices.len() >= 3)
            .map(|contour| contour.vertices.len())
            .sum();
        if max_vertices >= PolygonNavmesh::MAX_VERTICES {
            return Err(PolygonNavmeshError::TooManyVertices {
                count: max_vertices,
                max: PolygonNavmesh::MAX_VERTICES,
            });
        }

        let mut vertex_flags = vec![false; max_vertices];
        let mut vertex_buckets = VertexBuckets::new(max_vertices);
        let mut triangles = Vec::new();

        for contour in &self.contours {
            // Skip null contours.
            if contour.vertices.len() < 3 {
                continue;
            }

            // Triangulate contour
            let positions: Vec<[i32; 2]> = contour.vertices.iter().map(|v| v.xz()).collect();
            triangles.clear();
            if !triangulate(&positions, &mut triangles) {
                // Bad triangulation, should not happen.
                warn!(
                    "Bad triangulation of the contour of region {}",
                    contour.region.bits()
                );
            }

            // Add and merge vertices.
            let indices: Vec<u16> = contour
                .vertices
                .iter()
                .map(|vertex| {
                    let index = vertex_buckets.add(vertex.position(), &mut mesh.vertices);
                    if vertex.flags.contains(RegionVertexId::BORDER_VERTEX) {
                        // This vertex should be removed.
                        vertex_flags[index as usize] = true;
                    }
                    index
                })
                .collect();

            // Build initial polygons.
            let mut polygons: Vec<MergePolygon> = triangles
                .iter()
                .filter(|t| t[0] != t[1] && t[0] != t[2] && t[1] != t[2])
                .map(|t| MergePolygon {
                    vertices: vec![indices[t[0]], indices[t[1]], indices[t[2]]],
                    region: contour.region,
                    area: contour.area,
                })
                .collect();
            if polygons.is_empty() {
                continue;
            }

            // Merge polygons.
            if nvp > 3 {
                merge_polygons(&mut polygons, &mesh.vertices, nvp);
            }

            // Store polygons.
            for polygon in polygons {
                mesh.push_polygon(&polygon, max_polygons)?;
            }
        }

        // Remove edge vertices.
        let mut i = 0;
        while i < mesh.vertices.len() {
            if vertex_flags[i] && mesh.can_remove_vertex(i as u16) {
                mesh.remove_vertex(i as u16, max_polygons)?;
                // Fixup vertex flags
                vertex_flags.remove(i);
                continue;
            }
            i += 1;
        }

        // Calculate adjacency.
        mesh.build_adjacency();

        // Find portal edges
        if mesh.border_size > 0 {
            mesh.mark_portal_edges(self.width, self.height);
        }

        // Just allocate the mesh flags array. The user is responsible to fill it.
        mesh.flags = vec![0; mesh.polygon_count()];
        Ok(mesh)
    }
}

impl PolygonNavmesh {
    fn push_polygon(
        &mut self,
        polygon: &MergePolygon,
        max_polygons: usize,
    ) -> Result<(), PolygonNavmeshError> {
        if self.polygon_count() >= max_polygons {
            return Err(PolygonNavmeshError::TooManyPolygons { max: max_polygons });
        }
        let nvp = self.max_vertices_per_polygon;
        self.polygons.extend_from_slice(&polygon.vertices);
        self.polygons
            .extend(std::iter::repeat_n(Self::NO_INDEX, 2 * nvp - polygon.vertices.len()));
        self.regions.push(polygon.region);
        self.areas.push(polygon.area);
        Ok(())
    }

    /// Removes polygon `index` by moving the last polygon into its place.
    fn swap_remove_polygon(&mut self, index: usize) {
        let stride = self.max_vertices_per_polygon * 2;
        let last = self.polygon_count() - 1;
        if index != last {
            self.polygons
                .copy_within(last * stride..(last + 1) * stride, index * stride);
        }
        self.polygons.truncate(last * stride);
        self.regions.swap_remove(index);
        self.areas.swap_remove(index);
    }

    fn can_remove_vertex(&self, rem: u16) -> bool {
        // Count number of polygons to remove.
        let mut num_touched_verts = 0;
        let mut num_remaining_edges = 0;
        for i in 0..self.polygon_count() {
            let poly = self.polygon_vertices(i);
            let num_removed = poly.iter().filter(|v| **v == rem).count();
            if num_removed > 0 {
                num_touched_verts += num_removed;
                num_remaining_edges += poly.len() - (num_removed + 1);
            }
        }

        // There would be too few edges remaining to create a polygon.
        // This can happen for example when a tip of a triangle is marked
        // as deletion, but there are no other polys that share the vertex.
        // In this case, the vertex should not be removed.
        if num_remaining_edges <= 2 {
            return false;
        }

        // Find edges which share the removed vertex.
        let mut edges: Vec<(u16, u16, u32)> = Vec::with_capacity(num_touched_verts * 2);
        for i in 0..self.polygon_count() {
            let poly = self.polygon_vertices(i);
            let nv = poly.len();
            // Collect edges which touches the removed vertex.
            let mut k = nv - 1;
            for j in 0..nv {
                if poly[j] == rem || poly[k] == rem {
                    // Arrange edge so that a=rem.
                    let (mut a, mut b) = (poly[j], poly[k]);
                    if b == rem {
                        std::mem::swap(&mut a, &mut b);
                    }
                    // Check if the edge exists
                    let mut exists = false;
                    for edge in edges.iter_mut() {
                        if edge.1 == b {
                            // Exists, increment vertex share count.
                            edge.2 += 1;
                            exists = true;
                        }
                    }
                    // Add new edge.
                    if !exists {
                        edges.push((a, b, 1));
                    }
                }
                k = j;
            }
        }

        // There should be no more than 2 open edges.
        // This catches the case that two non-adjacent polygons
        // are sharing the removed vertex. In that case, do not remove the vertex.
        let num_open_edges = edges.iter().filter(|edge| edge.2 < 2).count();
        num_open_edges <= 2
    }

    fn remove_vertex(&mut self, rem: u16, max_polygons: usize) -> Result<(), PolygonNavmeshError> {
        let nvp = self.max_vertices_per_polygon;

        // Collect edges of the removed polygons which do not touch the removed vertex.
        let mut edges: Vec<([u16; 2], RegionId, AreaType)> = Vec::new();
        let mut i = 0;
        while i < self.polygon_count() {
            let poly = self.polygon_vertices(i);
            if !poly.contains(&rem) {
                i += 1;
                continue;
            }
            let nv = poly.len();
            let mut k = nv - 1;
            for j in 0..nv {
                if poly[j] != rem && poly[k] != rem {
                    edges.push(([poly[k], poly[j]], self.regions[i], self.areas[i]));
                }
                k = j;
            }
            // Remove the polygon.
            self.swap_remove_polygon(i);
        }

        // Remove vertex.
        self.vertices.remove(rem as usize);

        // Adjust indices to match the removed vertex layout.
        for poly in self.polygons.chunks_mut(nvp * 2) {
            for v in poly[..nvp].iter_mut() {
                if *v != Self::NO_INDEX && *v > rem {
                    *v -= 1;
                }
            }
        }
        for (edge, _, _) in edges.iter_mut() {
            for v in edge.iter_mut() {
                if *v > rem {
                    *v -= 1;
                }
            }
        }

        if edges.is_empty() {
            return Ok(());
        }

        // Start with one vertex, keep appending connected
        // segments to the start and end of the hole.
        let mut hole = VecDeque::new();
        let mut hole_regions = VecDeque::new();
        let mut hole_areas = VecDeque::new();
        let (first, region, area) = edges.swap_remove(0);
        hole.push_back(first[0]);
        hole.push_back(first[1]);
        hole_regions.push_back(region);
        hole_regions.push_back(region);
        hole_areas.push_back(area);
        hole_areas.push_back(area);

        while !edges.is_empty() {
            let mut matched = false;
            let mut i = 0;
            while i < edges.len() {
                let ([ea, eb], region, area) = edges[i];
                let added = if hole.front() == Some(&eb) {
                    // The segment matches the beginning of the hole boundary.
                    hole.push_front(ea);
                    hole_regions.push_front(region);
                    hole_areas.push_front(area);
                    true
                } else if hole.back() == Some(&ea) {
                    // The segment matches the end of the hole boundary.
                    hole.push_back(eb);
                    hole_regions.push_back(region);
                    hole_areas.push_back(area);
                    true
                } else {
                    false
                };
                if added {
                    // The edge segment was added, remove it.
                    edges.swap_remove(i);
                    matched = true;
                } else {
                    i += 1;
                }
            }
            if !matched {
                break;
            }
        }

        // A closed hole repeats its first vertex at the end.
        if hole.len() > 1 && hole.front() == hole.back() {
            hole.pop_back();
            hole_regions.pop_back();
            hole_areas.pop_back();
        }
        if hole.len() < 3 {
            return Ok(());
        }

        // Generate temp vertex array for triangulation.
        let positions: Vec<[i32; 2]> = hole
            .iter()
            .map(|v| {
                let vertex = self.vertices[*v as usize];
                [vertex.x as i32, vertex.z as i32]
            })
            .collect();

        // Triangulate the hole.
        let mut triangles = Vec::new();
        if !triangulate(&positions, &mut triangles) {
            warn!("Bad triangulation while removing a tile border vertex");
        }

        // Merge the hole triangles back to polygons.
        let mut polygons: Vec<MergePolygon> = triangles
            .iter()
            .filter(|t| t[0] != t[1] && t[0] != t[2] && t[1] != t[2])
            .map(|t| {
                // If this polygon covers multiple region types then mark it as such
                let region = if hole_regions[t[0]] != hole_regions[t[1]]
                    || hole_regions[t[1]] != hole_regions[t[2]]
                {
                    RegionId::NONE
                } else {
                    hole_regions[t[0]]
                };
                MergePolygon {
                    vertices: vec![hole[t[0]], hole[t[1]], hole[t[2]]],
                    region,
                    area: hole_areas[t[0]],
                }
            })
            .collect();
        if polygons.is_empty() {
            return Ok(());
        }

        // Merge polygons.
        if nvp > 3 {
            merge_polygons(&mut polygons, &self.vertices, nvp);
        }

        // Store polygons.
        for polygon in polygons {
            self.push_polygon(&polygon, max_polygons)?;
        }
        Ok(())
    }

    fn build_adjacency(&mut self) {
        struct Edge {
            vert: [u16; 2],
            poly_edge: [usize; 2],
            poly: [usize; 2],
        }

        let nvp = self.max_vertices_per_polygon;
        let polygon_count = self.polygon_count();
        let mut first_edge = vec![None; self.vertices.len()];
        let mut next_edge: Vec<Option<usize>> = Vec::with_capacity(polygon_count * nvp);
        let mut edges: Vec<Edge> = Vec::with_capacity(polygon_count * nvp);

        let edge_vertices = |poly: &[u16], j: usize| {
            let v0 = poly[j];
            let v1 = poly[next(j, poly.len())];
            (v0, v1)
        };

        for i in 0..polygon_count {
            let poly = self.polygon_vertices(i);
            for j in 0..poly.len() {
                let (v0, v1) = edge_vertices(poly, j);
                if v0 < v1 {
                    // Insert edge
                    next_edge.push(first_edge[v0 as usize]);
                    first_edge[v0 as usize] = Some(edges.len());
                    edges.push(Edge {
                        vert: [v0, v1],
                        poly_edge: [j, 0],
                        poly: [i, i],
                    });
                }
            }
        }

        for i in 0..polygon_count {
            let poly = self.polygon_vertices(i);
            for j in 0..poly.len() {
                let (v0, v1) = edge_vertices(poly, j);
                if v0 > v1 {
                    let mut e = first_edge[v1 as usize];
                    while let Some(edge_index) = e {
                        let edge = &mut edges[edge_index];
                        if edge.vert[1] == v0 && edge.poly[0] == edge.poly[1] {
                            edge.poly[1] = i;
                            edge.poly_edge[1] = j;
                            break;
                        }
                        e = next_edge[edge_index];
                    }
                }
            }
        }

        // Store adjacency
        for edge in &edges {
            if edge.poly[0] != edge.poly[1] {
                self.polygons[edge.poly[0] * nvp * 2 + nvp + edge.poly_edge[0]] = edge.poly[1] as u16;
                self.polygons[edge.poly[1] * nvp * 2 + nvp + edge.poly_edge[1]] = edge.poly[0] as u16;
            }
        }
    }

    fn mark_portal_edges(&mut self, width: u16, height: u16) {
        let nvp = self.max_vertices_per_polygon;
        for i in 0..self.polygon_count() {
            let nv = self.polygon_vertices(i).len();
            for j in 0..nv {
                let base = i * nvp * 2;
                // Skip connected edges.
                if self.polygons[base + nvp + j] != Self::NO_INDEX {
                    continue;
                }
                let va = self.vertices[self.polygons[base + j] as usize];
                let vb = self.vertices[self.polygons[base + next(j, nv)] as usize];

                let side = if va.x == 0 && vb.x == 0 {
                    Some(0)
                } else if va.z == height && vb.z == height {
                    Some(1)
                } else if va.x == width && vb.x == width {
                    Some(2)
                } else if va.z == 0 && vb.z == 0 {
                    Some(3)
                } else {
                    None
                };
                if let Some(side) = side {
                    self.polygons[base + nvp + j] = Self::PORTAL_FLAG | side;
                }
            }
        }
    }
}

/// A polygon that is still being merged, before it is stored in the mesh.
#[derive(Debug, Clone)]
struct MergePolygon {
    vertices: Vec<u16>,
    region: RegionId,
    area: AreaType,
}

/// Greedily merges polygons pairwise, always picking the pair whose merged polygon has the largest area.
/// Ties are broken by the length of the shared edge, then by polygon order.
fn merge_polygons(polygons: &mut Vec<MergePolygon>, vertices: &[U16Vec3], nvp: usize) {
    loop {
        // Find best polygons to merge.
        let mut best: Option<(MergeValue, usize, usize)> = None;
        for j in 0..polygons.len() {
            for k in j + 1..polygons.len() {
                let Some(value) =
                    poly_merge_value(&polygons[j].vertices, &polygons[k].vertices, vertices, nvp)
                else {
                    continue;
                };
                let better = best.as_ref().is_none_or(|(best_value, _, _)| {
                    (value.area, value.edge_length) > (best_value.area, best_value.edge_length)
                });
                if better {
                    best = Some((value, j, k));
                }
            }
        }

        let Some((value, a, b)) = best else {
            break;
        };
        // Found best, merge.
        let pb = polygons.swap_remove(b);
        let pa = &mut polygons[a];
        let na = pa.vertices.len();
        let nb = pb.vertices.len();
        let mut merged = Vec::with_capacity(na + nb - 2);
        // Add pa
        for i in 0..na - 1 {
            merged.push(pa.vertices[(value.ea + 1 + i) % na]);
        }
        // Add pb
        for i in 0..nb - 1 {
            merged.push(pb.vertices[(value.eb + 1 + i) % nb]);
        }
        pa.vertices = merged;
        if pa.region != pb.region {
            pa.region = RegionId::NONE;
        }
    }
}

struct MergeValue {
    /// Twice the area of the merged polygon.
    area: i64,
    edge_length: i64,
    ea: usize,
    eb: usize,
}

fn poly_merge_value(pa: &[u16], pb: &[u16], vertices: &[U16Vec3], nvp: usize) -> Option<MergeValue> {
    let na = pa.len();
    let nb = pb.len();

    // If the merged polygon would be too big, do not merge.
    if na + nb - 2 > nvp {
        return None;
    }

    // Check if the polygons share an edge.
    let sorted = |a: u16, b: u16| if a > b { (b, a) } else { (a, b) };
    let (ea, eb) = (0..na).find_map(|i| {
        let edge_a = sorted(pa[i], pa[(i + 1) % na]);
        (0..nb)
            .find(|&j| sorted(pb[j], pb[(j + 1) % nb]) == edge_a)
            .map(|j| (i, j))
    })?;

    let xz = |v: u16| {
        let vertex = vertices[v as usize];
        [vertex.x as i32, vertex.z as i32]
    };

    // Check to see if the merged polygon would be convex.
    let va = pa[(ea + na - 1) % na];
    let vb = pa[ea];
    let vc = pb[(eb + 2) % nb];
    if !left(xz(va), xz(vb), xz(vc)) {
        return None;
    }

    let va = pb[(eb + nb - 1) % nb];
    let vb = pb[eb];
    let vc = pa[(ea + 2) % na];
    if !left(xz(va), xz(vb), xz(vc)) {
        return None;
    }

    let a = xz(pa[ea]);
    let b = xz(pa[(ea + 1) % na]);
    let dx = (a[0] - b[0]) as i64;
    let dz = (a[1] - b[1]) as i64;

    let polygon_area = |poly: &[u16]| -> i64 {
        (1..poly.len() - 1)
            .map(|i| area2(xz(poly[0]), xz(poly[i]), xz(poly[i + 1])))
            .sum::<i64>()
            .abs()
    };

    Some(MergeValue {
        area: polygon_area(pa) + polygon_area(pb),
        edge_length: dx * dx + dz * dz,
        ea,
        eb,
    })
}

const VERTEX_BUCKET_COUNT: usize = 1 << 12;

/// Spatial hash that welds vertices with equal xz and nearly equal height.
struct VertexBuckets {
    first: Vec<Option<u16>>,
    next: Vec<Option<u16>>,
}

impl VertexBuckets {
    fn new(max_vertices: usize) -> Self {
        Self {
            first: vec![None; VERTEX_BUCKET_COUNT],
            next: vec![None; max_vertices],
        }
    }

    fn add(&mut self, position: U16Vec3, vertices: &mut Vec<U16Vec3>) -> u16 {
        let bucket = vertex_hash(position.x, position.z);
        let mut i = self.first[bucket];
        while let Some(index) = i {
            let vertex = vertices[index as usize];
            if vertex.x == position.x
                && vertex.z == position.z
                && (vertex.y as i32 - position.y as i32).abs() <= 2
            {
                return index;
            }
            i = self.next[index as usize];
        }

        // Could not find, create new.
        let index = vertices.len() as u16;
        vertices.push(position);
        self.next[index as usize] = self.first[bucket];
        self.first[bucket] = Some(index);
        index
    }
}

fn vertex_hash(x: u16, z: u16) -> usize {
    const H1: u32 = 0x8da6b343; // Large multiplicative constants;
    const H3: u32 = 0xcb1ab31f; // here arbitrarily chosen primes
    let n = H1.wrapping_mul(x as u32).wrapping_add(H3.wrapping_mul(z as u32));
    n as usize & (VERTEX_BUCKET_COUNT - 1)
}

const CAN_REMOVE: u32 = 0x8000_0000;
const INDEX_MASK: u32 = 0x0fff_ffff;

/// Ear-clips the simple polygon `vertices`, appending triangles as indices into `vertices`.
///
/// Returns `false` if the polygon could not be fully triangulated, in which case
/// the triangles found so far are kept.
pub(crate) fn triangulate(vertices: &[[i32; 2]], triangles: &mut Vec<[usize; 3]>) -> bool {
    let mut n = vertices.len();
    if n < 3 {
        return false;
    }
    let mut indices: Vec<u32> = (0..n as u32).collect();
    let index = |indices: &[u32], i: usize| (indices[i] & INDEX_MASK) as usize;
    let point = |indices: &[u32], i: usize| vertices[index(indices, i)];

    // The last bit of the index is used to indicate if the vertex can be removed.
    for i in 0..n {
        let i1 = next(i, n);
        let i2 = next(i1, n);
        if diagonal(i, i2, vertices, &indices) {
            indices[i1] |= CAN_REMOVE;
        }
    }

    while n > 3 {
        let mut min_len = -1_i64;
        let mut mini = None;
        for i in 0..n {
            let i1 = next(i, n);
            if indices[i1] & CAN_REMOVE != 0 {
                let p0 = point(&indices, i);
                let p2 = point(&indices, next(i1, n));
                let dx = (p2[0] - p0[0]) as i64;
                let dz = (p2[1] - p0[1]) as i64;
                let len = dx * dx + dz * dz;
                if min_len < 0 || len < min_len {
                    min_len = len;
                    mini = Some(i);
                }
            }
        }

        if mini.is_none() {
            // We might get here because the contour has overlapping segments, like this:
            //
            //  A o-o=====o---o B
            //   /  |C   D|    \
            //  o   o     o     o
            //  :   :     :     :
            // We'll try to recover by loosing up the inCone test a bit so that a diagonal
            // like A-B or C-D can be found and we can continue.
            min_len = -1;
            for i in 0..n {
                let i1 = next(i, n);
                let i2 = next(i1, n);
                if diagonal_loose(i, i2, vertices, &indices) {
                    let p0 = point(&indices, i);
                    let p2 = point(&indices, i2);
                    let dx = (p2[0] - p0[0]) as i64;
                    let dz = (p2[1] - p0[1]) as i64;
                    let len = dx * dx + dz * dz;
                    if min_len < 0 || len < min_len {
                        min_len = len;
                        mini = Some(i);
                    }
                }
            }
        }

        let Some(i) = mini else {
            // The contour is messed up. This sometimes happens
            // if the contour simplification is too aggressive.
            return false;
        };
        let i1 = next(i, n);
        let i2 = next(i1, n);

        triangles.push([index(&indices, i), index(&indices, i1), index(&indices, i2)]);

        // Removes P[i1] by copying P[i+1]...P[n-1] left one index.
        indices.remove(i1);
        n -= 1;
        let i1 = if i1 >= n { 0 } else { i1 };
        let i = prev(i1, n);
        // Update diagonal flags.
        if diagonal(prev(i, n), i1, vertices, &indices) {
            indices[i] |= CAN_REMOVE;
        } else {
            indices[i] &= INDEX_MASK;
        }
        if diagonal(i, next(i1, n), vertices, &indices) {
            indices[i1] |= CAN_REMOVE;
        } else {
            indices[i1] &= INDEX_MASK;
        }
    }

    // Append the remaining triangle.
    triangles.push([index(&indices, 0), index(&indices, 1), index(&indices, 2)]);
    true
}

#[inline]
fn vertex_at(vertices: &[[i32; 2]], indices: &[u32], i: usize) -> [i32; 2] {
    vertices[(indices[i] & INDEX_MASK) as usize]
}

/// Returns true iff the diagonal (i,j) is strictly internal to the polygon P in the neighborhood of the i endpoint.
fn in_cone(i: usize, j: usize, vertices: &[[i32; 2]], indices: &[u32]) -> bool {
    let n = indices.len();
    let pi = vertex_at(vertices, indices, i);
    let pj = vertex_at(vertices, indices, j);
    let pi1 = vertex_at(vertices, indices, next(i, n));
    let pin1 = vertex_at(vertices, indices, prev(i, n));

    // If P[i] is a convex vertex [ i+1 left or on (i-1,i) ].
    if left_on(pin1, pi, pi1) {
        return left(pi, pj, pin1) && left(pj, pi, pi1);
    }
    // Assume (i-1,i,i+1) not collinear.
    // else P[i] is reflex.
    !(left_on(pi, pj, pi1) && left_on(pj, pi, pin1))
}

fn in_cone_loose(i: usize, j: usize, vertices: &[[i32; 2]], indices: &[u32]) -> bool {
    let n = indices.len();
    let pi = vertex_at(vertices, indices, i);
    let pj = vertex_at(vertices, indices, j);
    let pi1 = vertex_at(vertices, indices, next(i, n));
    let pin1 = vertex_at(vertices, indices, prev(i, n));

    // If P[i] is a convex vertex [ i+1 left or on (i-1,i) ].
    if left_on(pin1, pi, pi1) {
        return left_on(pi, pj, pin1) && left_on(pj, pi, pi1);
    }
    // Assume (i-1,i,i+1) not collinear.
    // else P[i] is reflex.
    !(left_on(pi, pj, pi1) && left_on(pj, pi, pin1))
}

/// Returns true iff (v_i, v_j) is a proper internal *or* external diagonal of P, ignoring edges incident to v_i and v_j.
fn diagonalie(
    i: usize,
    j: usize,
    vertices: &[[i32; 2]],
    indices: &[u32],
    intersects: fn([i32; 2], [i32; 2], [i32; 2], [i32; 2]) -> bool,
) -> bool {
    let n = indices.len();
    let d0 = vertex_at(vertices, indices, i);
    let d1 = vertex_at(vertices, indices, j);

    // For each edge (k,k+1) of P
    for k in 0..n {
        let k1 = next(k, n);
        // Skip edges incident to i or j
        if k == i || k1 == i || k == j || k1 == j {
            continue;
        }
        let p0 = vertex_at(vertices, indices, k);
        let p1 = vertex_at(vertices, indices, k1);

        if d0 == p0 || d1 == p0 || d0 == p1 || d1 == p1 {
            continue;
        }

        if intersects(d0, d1, p0, p1) {
            return false;
        }
    }
    true
}

/// Returns true iff the diagonal (i,j) is a proper internal diagonal of P.
fn diagonal(i: usize, j: usize, vertices: &[[i32; 2]], indices: &[u32]) -> bool {
    in_cone(i, j, vertices, indices) && diagonalie(i, j, vertices, indices, intersect)
}

fn diagonal_loose(i: usize, j: usize, vertices: &[[i32; 2]], indices: &[u32]) -> bool {
    in_cone_loose(i, j, vertices, indices) && diagonalie(i, j, vertices, indices, intersect_prop)
}

/// Errors that can occur when building a [`PolygonNavmesh`].
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum PolygonNavmeshError {
    /// The contours hold more vertices than the mesh can index.
    #[error("Too many vertices: {count}, at most {max} are supported")]
    TooManyVertices {
        /// The number of contour vertices.
        count: usize,
        /// The largest supported vertex count.
        max: usize,
    },
    /// The mesh would hold more polygons than allowed.
    #[error("Too many polygons, at most {max} are allowed")]
    TooManyPolygons {
        /// The configured polygon limit.
        max: usize,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        contours::BuildContoursFlags,
        test_utils::{compact_from_floors, flat_compact_heightfield},
    };

    fn square_contours(size: f32, border: u16) -> ContourSet {
        let mut compact = flat_compact_heightfield(size);
        compact.build_distance_field();
        compact.build_regions(border, 0, 20).unwrap();
        compact.build_contours(1.3, 0, BuildContoursFlags::DEFAULT)
    }

    fn is_convex(mesh: &PolygonNavmesh, index: usize) -> bool {
        let poly = mesh.polygon_vertices(index);
        let xz = |v: u16| {
            let vertex = mesh.vertices[v as usize];
            [vertex.x as i32, vertex.z as i32]
        };
        (0..poly.len()).all(|i| {
            let a = xz(poly[i]);
            let b = xz(poly[(i + 1) % poly.len()]);
            let c = xz(poly[(i + 2) % poly.len()]);
            left_on(a, b, c)
        })
    }

    #[test]
    fn triangulates_a_square() {
        let square = [[0, 0], [0, 10], [10, 10], [10, 0]];
        let mut triangles = Vec::new();
        assert!(triangulate(&square, &mut triangles));
        assert_eq!(triangles.len(), 2);
    }

    #[test]
    fn triangulates_a_concave_polygon() {
        let l_shape = [[0, 0], [0, 10], [5, 10], [5, 5], [10, 5], [10, 0]];
        let mut triangles = Vec::new();
        assert!(triangulate(&l_shape, &mut triangles));
        assert_eq!(triangles.len(), 4);
        let area: i64 = triangles
            .iter()
            .map(|t| area2(l_shape[t[0]], l_shape[t[1]], l_shape[t[2]]).abs())
            .sum();
        assert_eq!(area, 2 * 75);
    }

    #[test]
    fn square_becomes_a_single_quad() {
        let mesh = square_contours(10.0, 0).build_polygon_mesh(6, 100).unwrap();
        assert_eq!(mesh.polygon_count(), 1);
        assert_eq!(mesh.vertices.len(), 4);
        assert_eq!(mesh.polygon_vertices(0).len(), 4);
        assert!(
            mesh.polygon_neighbors(0)
                .iter()
                .all(|n| *n == PolygonNavmesh::NO_INDEX)
        );
        assert_eq!(mesh.flags, [0]);
        assert_eq!(mesh.regions, [RegionId::from(1)]);
    }

    #[test]
    fn triangles_are_adjacent() {
        let mesh = square_contours(10.0, 0).build_polygon_mesh(3, 100).unwrap();
        assert_eq!(mesh.polygon_count(), 2);
        let connected = |a: usize, b: u16| mesh.polygon_neighbors(a).contains(&b);
        assert!(connected(0, 1));
        assert!(connected(1, 0));
    }

    #[test]
    fn polygon_limit_is_enforced() {
        let result = square_contours(10.0, 0).build_polygon_mesh(3, 1);
        assert_eq!(
            result,
            Err(PolygonNavmeshError::TooManyPolygons { max: 1 })
        );
    }

    #[test]
    fn tile_border_edges_are_portals() {
        let mesh = square_contours(12.0, 2).build_polygon_mesh(6, 100).unwrap();
        assert_eq!(mesh.polygon_count(), 1);
        let mut sides: Vec<u16> = mesh
            .polygon_neighbors(0)
            .iter()
            .map(|n| {
                assert_ne!(n & PolygonNavmesh::PORTAL_FLAG, 0);
                n & 0x3
            })
            .collect();
        sides.sort();
        assert_eq!(sides, [0, 1, 2, 3]);
    }

    #[test]
    fn polygons_around_a_hole_are_convex() {
        let floor = Some(1);
        let mut rows = vec![vec![floor; 12]; 12];
        for row in rows.iter_mut().skip(4).take(4) {
            for cell in row.iter_mut().skip(4).take(4) {
                *cell = None;
            }
        }
        let rows: Vec<&[Option<u16>]> = rows.iter().map(Vec::as_slice).collect();
        let mut compact = compact_from_floors(&rows);
        compact.build_distance_field();
        compact.build_regions(0, 0, 400).unwrap();
        let cset = compact.build_contours(1.3, 0, BuildContoursFlags::DEFAULT);
        let mesh = cset.build_polygon_mesh(6, 1000).unwrap();
        assert!(mesh.polygon_count() >= 4);
        for i in 0..mesh.polygon_count() {
            assert!(is_convex(&mesh, i));
            // No polygon covers the hole's center.
            let poly = mesh.polygon_vertices(i);
            let inside = (0..poly.len()).all(|j| {
                let a = mesh.vertices[poly[j] as usize];
                let b = mesh.vertices[poly[(j + 1) % poly.len()] as usize];
                left_on([a.x as i32, a.z as i32], [b.x as i32, b.z as i32], [6, 6])
            });
            assert!(!inside);
        }
    }

    #[test]
    fn empty_contours_give_empty_mesh() {
        let mut compact = compact_from_floors(&[&[None]]);
        compact.build_distance_field();
        compact.build_regions(0, 0, 0).unwrap();
        let mesh = compact
            .build_contours(1.3, 0, BuildContoursFlags::DEFAULT)
            .build_polygon_mesh(6, 10)
            .unwrap();
        assert_eq!(mesh.polygon_count(), 0);
        assert!(mesh.vertices.is_empty());
    }
}
