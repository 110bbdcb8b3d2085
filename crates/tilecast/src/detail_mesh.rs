//! Height-accurate triangle meshes laid over the polygons of a [`PolygonNavmesh`].

use std::collections::{TryReserveError, VecDeque};

use glam::{U8Vec3, U16Vec3, Vec2, Vec3A};
use thiserror::Error;
use tracing::{debug_span, error, warn};

use crate::{
    CompactHeightfield,
    math::{
        dir_for_offset, dir_offset_x, dir_offset_z, distance_squared_point_segment,
        distance_squared_point_segment_2d, next, prev,
    },
    poly_mesh::PolygonNavmesh,
    region::RegionId,
};

/// Contains triangle meshes that represent detailed height data associated
/// with the polygons in its associated polygon mesh object.
#[derive(Debug, Default, Clone, PartialEq)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize, serde::Deserialize))]
pub struct DetailNavmesh {
    /// The sub-mesh data, one per polygon of the polygon mesh.
    pub meshes: Vec<SubMesh>,
    /// The mesh vertices in world space.
    pub vertices: Vec<Vec3A>,
    /// The mesh triangles, indexing into the vertices of their sub-mesh, and their edge flags.
    ///
    /// Bit `2 * i` of the flags is set when edge `i` of the triangle lies on the polygon boundary,
    /// see [`DetailNavmesh::EDGE_BOUNDARY`].
    pub triangles: Vec<(U8Vec3, u8)>,
}

/// The detail mesh of a single polygon.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize, serde::Deserialize))]
pub struct SubMesh {
    /// Index of the first vertex in [`DetailNavmesh::vertices`].
    pub first_vertex: usize,
    /// Number of vertices.
    pub vertex_count: usize,
    /// Index of the first triangle in [`DetailNavmesh::triangles`].
    pub first_triangle: usize,
    /// Number of triangles.
    pub triangle_count: usize,
}

impl DetailNavmesh {
    /// Edge flag for triangle edges on the boundary of their polygon.
    pub const EDGE_BOUNDARY: u8 = 0x1;

    /// Builds a detail mesh from the provided polygon mesh.
    ///
    /// Heights are sampled from `heightfield`, which must be the compact heightfield the polygon mesh was built from.
    /// Polygon edges are sampled every `sample_distance` world units, and interior samples are added until
    /// the surface deviates less than `sample_max_error` from the triangulation.
    /// A `sample_distance` of zero only triangulates the polygon outlines.
    pub fn new(
        mesh: &PolygonNavmesh,
        heightfield: &CompactHeightfield,
        sample_distance: f32,
        sample_max_error: f32,
    ) -> Result<Self, DetailNavmeshError> {
        let _span = debug_span!("build_detail_mesh").entered();
        let mut dmesh = DetailNavmesh::default();
        if mesh.vertices.is_empty() || mesh.polygon_count() == 0 {
            return Ok(dmesh);
        }

        let chf = heightfield;
        let cs = mesh.cell_size;
        let ch = mesh.cell_height;
        let orig = mesh.aabb.min;
        let border_size = mesh.border_size;
        let height_search_radius = 1.max(mesh.max_edge_error.ceil() as i32);

        let mut bounds = Vec::new();
        bounds.try_reserve_exact(mesh.polygon_count())?;
        let mut poly_vert_count = 0;
        let mut max_hw = 0;
        let mut max_hh = 0;

        // Find max size for a polygon area.
        for i in 0..mesh.polygon_count() {
            let mut b = Bounds {
                xmin: chf.width,
                xmax: 0,
                zmin: chf.height,
                zmax: 0,
            };
            for v in mesh.polygon_vertices(i) {
                let v = mesh.vertices[*v as usize];
                b.xmin = b.xmin.min(v.x);
                b.xmax = b.xmax.max(v.x);
                b.zmin = b.zmin.min(v.z);
                b.zmax = b.zmax.max(v.z);
                poly_vert_count += 1;
            }
            b.xmin = b.xmin.saturating_sub(1);
            b.xmax = chf.width.min(b.xmax + 1);
            b.zmin = b.zmin.saturating_sub(1);
            b.zmax = chf.height.min(b.zmax + 1);
            if b.xmin < b.xmax && b.zmin < b.zmax {
                max_hw = max_hw.max(b.width());
                max_hh = max_hh.max(b.height());
            }
            bounds.push(b);
        }

        let mut hp = HeightPatch::default();
        hp.data.try_reserve_exact(max_hw as usize * max_hh as usize)?;
        dmesh.meshes.try_reserve_exact(mesh.polygon_count())?;
        dmesh.vertices.try_reserve(poly_vert_count + poly_vert_count / 2)?;
        dmesh.triangles.try_reserve((poly_vert_count + poly_vert_count / 2) * 2)?;

        let mut builder = PolyDetailBuilder::default();
        let mut queue = VecDeque::with_capacity(512);

        for (i, b) in bounds.iter().enumerate() {
            let poly_indices = mesh.polygon_vertices(i);

            // Store polygon vertices for processing.
            let poly: Vec<Vec3A> = poly_indices
                .iter()
                .map(|v| {
                    let v = mesh.vertices[*v as usize].as_vec3();
                    Vec3A::new(v.x * cs, v.y * ch, v.z * cs)
                })
                .collect();

            // Get the height data from the area of the polygon.
            hp.xmin = b.xmin;
            hp.zmin = b.zmin;
            hp.width = b.xmax.saturating_sub(b.xmin);
            hp.height = b.zmax.saturating_sub(b.zmin);
            hp.get_height_data(
                chf,
                poly_indices,
                &mesh.vertices,
                border_size,
                &mut queue,
                mesh.regions[i],
            );

            // Build detail mesh.
            builder.build(
                &poly,
                sample_distance,
                sample_max_error,
                height_search_radius,
                chf,
                &hp,
            );

            // Store detail submesh
            dmesh.meshes.push(SubMesh {
                first_vertex: dmesh.vertices.len(),
                vertex_count: builder.verts.len(),
                first_triangle: dmesh.triangles.len(),
                triangle_count: builder.tris.len(),
            });

            // Move detail verts to world space.
            dmesh.vertices.try_reserve(builder.verts.len())?;
            for vert in &builder.verts {
                let mut world = *vert + orig;
                world.y += chf.cell_height;
                dmesh.vertices.push(world);
            }

            dmesh.triangles.try_reserve(builder.tris.len())?;
            for (tri, flags) in &builder.tris {
                dmesh.triangles.push((
                    U8Vec3::new(tri[0] as u8, tri[1] as u8, tri[2] as u8),
                    *flags,
                ));
            }
        }

        Ok(dmesh)
    }

    /// The number of triangles over all sub-meshes.
    #[inline]
    pub fn triangle_count(&self) -> usize {
        self.triangles.len()
    }

    /// The world space triangles of the sub-mesh of polygon `polygon`.
    pub fn polygon_triangles(&self, polygon: usize) -> impl Iterator<Item = [Vec3A; 3]> + '_ {
        let sub_mesh = self.meshes[polygon];
        let vertices = &self.vertices[sub_mesh.first_vertex..sub_mesh.first_vertex + sub_mesh.vertex_count];
        self.triangles[sub_mesh.first_triangle..sub_mesh.first_triangle + sub_mesh.triangle_count]
            .iter()
            .map(move |(tri, _)| {
                [
                    vertices[tri.x as usize],
                    vertices[tri.y as usize],
                    vertices[tri.z as usize],
                ]
            })
    }
}

const MAX_VERTS: usize = 127;
// Max tris for delaunay is 2n-2-k (n=num verts, k=num hull verts).
const MAX_TRIS: usize = 255;
const MAX_VERTS_PER_EDGE: usize = 32;

/// Scratch buffers reused between polygons.
#[derive(Default)]
struct PolyDetailBuilder {
    verts: Vec<Vec3A>,
    tris: Vec<([usize; 3], u8)>,
    edges: Vec<DelaunayEdge>,
    samples: Vec<Sample>,
    hull: Vec<usize>,
}

struct Sample {
    x: i32,
    y: u16,
    z: i32,
    added: bool,
}

impl PolyDetailBuilder {
    fn build(
        &mut self,
        input: &[Vec3A],
        sample_dist: f32,
        sample_max_error: f32,
        height_search_radius: i32,
        chf: &CompactHeightfield,
        hp: &HeightPatch,
    ) {
        let nin = input.len();
        self.verts.clear();
        self.verts.extend_from_slice(input);
        self.edges.clear();
        self.tris.clear();
        self.hull.clear();

        let cs = chf.cell_size;
        let ch = chf.cell_height;
        let ics = 1.0 / cs;

        // Calculate minimum extents of the polygon based on input data.
        let min_extent = poly_min_extent(input);

        // Tessellate outlines.
        // This is done in separate pass in order to ensure
        // seamless height values across the ply boundaries.
        if sample_dist > 0.0 {
            let mut edge = [Vec3A::ZERO; MAX_VERTS_PER_EDGE + 1];
            let mut j = nin - 1;
            for i in 0..nin {
                let mut vj = input[j];
                let mut vi = input[i];
                let mut swapped = false;
                // Make sure the segments are always handled in same order
                // using lexological sort or else there will be seams.
                if (vj.x - vi.x).abs() < 1.0e-6 {
                    if vj.z > vi.z {
                        std::mem::swap(&mut vj, &mut vi);
                        swapped = true;
                    }
                } else if vj.x > vi.x {
                    std::mem::swap(&mut vj, &mut vi);
                    swapped = true;
                }

                // Create samples along the edge.
                let dij = vi - vj;
                let d = Vec2::new(dij.x, dij.z).length();
                let mut nn = 1 + (d / sample_dist).floor() as usize;
                if nn >= MAX_VERTS_PER_EDGE {
                    nn = MAX_VERTS_PER_EDGE - 1;
                }
                if self.verts.len() + nn >= MAX_VERTS {
                    nn = (MAX_VERTS - 1).saturating_sub(self.verts.len()).max(1);
                }
                for (k, pos) in edge.iter_mut().enumerate().take(nn + 1) {
                    let u = k as f32 / nn as f32;
                    *pos = vj + dij * u;
                    pos.y = get_height(*pos, ics, ch, height_search_radius, hp) as f32 * ch;
                }

                // Simplify samples.
                let mut idx = [0; MAX_VERTS_PER_EDGE];
                idx[1] = nn;
                let mut nidx = 2;
                let mut k = 0;
                while k < nidx - 1 {
                    let a = idx[k];
                    let b = idx[k + 1];
                    let va = edge[a];
                    let vb = edge[b];
                    // Find maximum deviation along the segment.
                    let mut maxd = 0.0;
                    let mut maxi = None;
                    for (m, point) in edge.iter().enumerate().take(b).skip(a + 1) {
                        let dev = distance_squared_point_segment(*point, va, vb);
                        if dev > maxd {
                            maxd = dev;
                            maxi = Some(m);
                        }
                    }
                    // If the max deviation is larger than accepted error,
                    // add new point, else continue to next segment.
                    match maxi {
                        Some(maxi) if maxd > sample_max_error * sample_max_error => {
                            for m in ((k + 1)..=nidx).rev() {
                                idx[m] = idx[m - 1];
                            }
                            idx[k + 1] = maxi;
                            nidx += 1;
                        }
                        _ => k += 1,
                    }
                }

                self.hull.push(j);
                // Add new vertices.
                let interior = &idx[1..nidx - 1];
                let mut push_vertex = |index: usize| {
                    self.hull.push(self.verts.len());
                    self.verts.push(edge[index]);
                };
                if swapped {
                    interior.iter().rev().for_each(|k| push_vertex(*k));
                } else {
                    interior.iter().for_each(|k| push_vertex(*k));
                }
                j = i;
            }
        } else {
            self.hull.extend(0..nin);
        }

        // If the polygon minimum extent is small (sliver or small triangle), do not try to add internal points.
        if min_extent < sample_dist * 2.0 {
            triangulate_hull(&self.verts, &self.hull, nin, &mut self.tris);
            set_tri_flags(&mut self.tris, &self.hull);
            return;
        }

        // Tessellate the base mesh.
        // We're using the triangulate_hull instead of delaunay_hull as it tends to
        // create a bit better triangulation for long thin triangles when there
        // are no internal points.
        triangulate_hull(&self.verts, &self.hull, nin, &mut self.tris);

        if self.tris.is_empty() {
            // Could not triangulate the poly, make sure there is some valid data there.
            warn!("Could not triangulate polygon ({} verts)", self.verts.len());
            return;
        }

        if sample_dist > 0.0 {
            // Create sample locations in a grid.
            let (bmin, bmax) = input[1..]
                .iter()
                .fold((input[0], input[0]), |(min, max), v| (min.min(*v), max.max(*v)));
            let x0 = (bmin.x / sample_dist).floor() as i32;
            let x1 = (bmax.x / sample_dist).ceil() as i32;
            let z0 = (bmin.z / sample_dist).floor() as i32;
            let z1 = (bmax.z / sample_dist).ceil() as i32;
            self.samples.clear();
            for z in z0..z1 {
                for x in x0..x1 {
                    let pt = Vec3A::new(
                        x as f32 * sample_dist,
                        (bmax.y + bmin.y) * 0.5,
                        z as f32 * sample_dist,
                    );
                    // Make sure the samples are not too close to the edges.
                    if dist_to_poly(input, pt) > -sample_dist / 2.0 {
                        continue;
                    }
                    self.samples.push(Sample {
                        x,
                        y: get_height(pt, ics, ch, height_search_radius, hp),
                        z,
                        added: false,
                    });
                }
            }

            // Add the samples starting from the one that has the most
            // error. The procedure stops when all samples are added
            // or when the max error is within treshold.
            for _ in 0..self.samples.len() {
                if self.verts.len() >= MAX_VERTS {
                    break;
                }

                // Find sample with most error.
                let mut best = None;
                let mut bestd = 0.0;
                for (i, sample) in self.samples.iter().enumerate() {
                    if sample.added {
                        continue;
                    }
                    // The sample location is jittered to get rid of some bad triangulations
                    // which are cause by symmetrical data from the grid structure.
                    let pt = Vec3A::new(
                        sample.x as f32 * sample_dist + jitter_x(i) * cs * 0.1,
                        sample.y as f32 * ch,
                        sample.z as f32 * sample_dist + jitter_z(i) * cs * 0.1,
                    );
                    let Some(d) = dist_to_tri_mesh(pt, &self.verts, &self.tris) else {
                        // did not hit the mesh.
                        continue;
                    };
                    if d > bestd {
                        bestd = d;
                        best = Some((i, pt));
                    }
                }
                // If the max error is within accepted threshold, stop tesselating.
                if bestd <= sample_max_error {
                    break;
                }
                let Some((best_index, best_pt)) = best else {
                    break;
                };
                // Mark sample as added.
                self.samples[best_index].added = true;
                // Add the new sample point.
                self.verts.push(best_pt);

                // Create new triangulation.
                self.edges.clear();
                self.tris.clear();
                delaunay_hull(&self.verts, &self.hull, &mut self.tris, &mut self.edges);
            }
        }

        if self.tris.len() > MAX_TRIS {
            error!(
                "Too many detail triangles, shrinking triangle count from {} to {MAX_TRIS}",
                self.tris.len()
            );
            self.tris.truncate(MAX_TRIS);
        }
        set_tri_flags(&mut self.tris, &self.hull);
    }
}

/// Edge of the Delaunay triangulation: start and end vertex, then the faces on the left and right.
#[derive(Debug, Clone, Copy)]
struct DelaunayEdge {
    s: usize,
    t: usize,
    left: FaceRef,
    right: FaceRef,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FaceRef {
    Undefined,
    Hull,
    Face(usize),
}

fn delaunay_hull(
    pts: &[Vec3A],
    hull: &[usize],
    tris: &mut Vec<([usize; 3], u8)>,
    edges: &mut Vec<DelaunayEdge>,
) {
    let mut nfaces = 0;
    let max_edges = pts.len() * 10;

    let mut j = hull.len() - 1;
    for i in 0..hull.len() {
        add_edge(edges, max_edges, hull[j], hull[i], FaceRef::Hull, FaceRef::Undefined);
        j = i;
    }

    let mut current_edge = 0;
    while current_edge < edges.len() {
        if edges[current_edge].left == FaceRef::Undefined {
            complete_facet(pts, edges, max_edges, &mut nfaces, current_edge);
        }
        if edges[current_edge].right == FaceRef::Undefined {
            complete_facet(pts, edges, max_edges, &mut nfaces, current_edge);
        }
        current_edge += 1;
    }

    // Create tris
    let mut faces = vec![[None::<usize>; 3]; nfaces];
    for e in edges.iter() {
        if let FaceRef::Face(face) = e.right {
            // Left face
            let t = &mut faces[face];
            if t[0].is_none() {
                t[0] = Some(e.s);
                t[1] = Some(e.t);
            } else if t[0] == Some(e.t) {
                t[2] = Some(e.s);
            } else if t[1] == Some(e.s) {
                t[2] = Some(e.t);
            }
        }
        if let FaceRef::Face(face) = e.left {
            // Right
            let t = &mut faces[face];
            if t[0].is_none() {
                t[0] = Some(e.t);
                t[1] = Some(e.s);
            } else if t[0] == Some(e.s) {
                t[2] = Some(e.t);
            } else if t[1] == Some(e.t) {
                t[2] = Some(e.s);
            }
        }
    }

    for (i, face) in faces.into_iter().enumerate() {
        match face {
            [Some(a), Some(b), Some(c)] => tris.push(([a, b, c], 0)),
            _ => warn!("Removing dangling face {i} [{face:?}]"),
        }
    }
}

fn add_edge(
    edges: &mut Vec<DelaunayEdge>,
    max_edges: usize,
    s: usize,
    t: usize,
    left: FaceRef,
    right: FaceRef,
) {
    if edges.len() >= max_edges {
        error!("Too many edges in the detail triangulation ({}/{max_edges})", edges.len());
        return;
    }
    // Add edge if not already in the triangulation.
    if find_edge(edges, s, t).is_none() {
        edges.push(DelaunayEdge { s, t, left, right });
    }
}

fn find_edge(edges: &[DelaunayEdge], s: usize, t: usize) -> Option<usize> {
    edges
        .iter()
        .position(|e| (e.s == s && e.t == t) || (e.s == t && e.t == s))
}

fn update_left_face(e: &mut DelaunayEdge, s: usize, t: usize, f: FaceRef) {
    if e.s == s && e.t == t && e.left == FaceRef::Undefined {
        e.left = f;
    } else if e.t == s && e.s == t && e.right == FaceRef::Undefined {
        e.right = f;
    }
}

fn complete_facet(
    pts: &[Vec3A],
    edges: &mut Vec<DelaunayEdge>,
    max_edges: usize,
    nfaces: &mut usize,
    e: usize,
) {
    const EPS: f32 = 1e-5;

    let edge = edges[e];

    // Cache s and t.
    let (s, t) = if edge.left == FaceRef::Undefined {
        (edge.s, edge.t)
    } else if edge.right == FaceRef::Undefined {
        (edge.t, edge.s)
    } else {
        // Edge already completed.
        return;
    };

    // Find best point on left of edge.
    let mut pt = None;
    let mut c = Vec3A::ZERO;
    let mut r = -1.0;
    for u in 0..pts.len() {
        if u == s || u == t {
            continue;
        }
        if vcross2(pts[s], pts[t], pts[u]) > EPS {
            if r < 0.0 {
                // The circle is not updated yet, do it now.
                pt = Some(u);
                (c, r) = circum_circle(pts[s], pts[t], pts[u]);
                continue;
            }
            let d = vdist2(c, pts[u]);
            let tol = 0.001;
            if d > r * (1.0 + tol) {
                // Outside current circumcircle, skip.
                continue;
            } else if d < r * (1.0 - tol) {
                // Inside safe circumcircle, update circle.
                pt = Some(u);
                (c, r) = circum_circle(pts[s], pts[t], pts[u]);
            } else {
                // Inside epsilon circum circle, do extra tests to make sure the edge is valid.
                // s-u and t-u cannot overlap with s-pt nor t-pt if they exists.
                if overlap_edges(pts, edges, s, u) || overlap_edges(pts, edges, t, u) {
                    continue;
                }
                // Edge is valid.
                pt = Some(u);
                (c, r) = circum_circle(pts[s], pts[t], pts[u]);
            }
        }
    }

    // Add new triangle or update edge info if s-t is on hull.
    let Some(pt) = pt else {
        update_left_face(&mut edges[e], s, t, FaceRef::Hull);
        return;
    };
    let face = FaceRef::Face(*nfaces);
    // Update face information of edge being completed.
    update_left_face(&mut edges[e], s, t, face);

    // Add new edge or update face info of old edge.
    match find_edge(edges, pt, s) {
        None => add_edge(edges, max_edges, pt, s, face, FaceRef::Undefined),
        Some(existing) => update_left_face(&mut edges[existing], pt, s, face),
    }

    // Add new edge or update face info of old edge.
    match find_edge(edges, t, pt) {
        None => add_edge(edges, max_edges, t, pt, face, FaceRef::Undefined),
        Some(existing) => update_left_face(&mut edges[existing], t, pt, face),
    }

    *nfaces += 1;
}

fn overlap_edges(pts: &[Vec3A], edges: &[DelaunayEdge], s1: usize, t1: usize) -> bool {
    edges.iter().any(|e| {
        let (s0, t0) = (e.s, e.t);
        // Same or connected edges do not overlap.
        if s0 == s1 || s0 == t1 || t0 == s1 || t0 == t1 {
            return false;
        }
        overlap_seg_seg_2d(pts[s0], pts[t0], pts[s1], pts[t1])
    })
}

fn overlap_seg_seg_2d(a: Vec3A, b: Vec3A, c: Vec3A, d: Vec3A) -> bool {
    let a1 = vcross2(a, b, d);
    let a2 = vcross2(a, b, c);
    if a1 * a2 < 0.0 {
        let a3 = vcross2(c, d, a);
        let a4 = a3 + a2 - a1;
        if a3 * a4 < 0.0 {
            return true;
        }
    }
    false
}

#[inline]
fn vcross2(p1: Vec3A, p2: Vec3A, p3: Vec3A) -> f32 {
    let u1 = p2.x - p1.x;
    let v1 = p2.z - p1.z;
    let u2 = p3.x - p1.x;
    let v2 = p3.z - p1.z;
    u1 * v2 - v1 * u2
}

#[inline]
fn vdist2(p: Vec3A, q: Vec3A) -> f32 {
    Vec2::new(p.x - q.x, p.z - q.z).length()
}

/// Returns the center and radius of the circle through the three points on the xz-plane.
fn circum_circle(p1: Vec3A, p2: Vec3A, p3: Vec3A) -> (Vec3A, f32) {
    const EPS: f32 = 1e-6;
    // Calculate the circle relative to p1, to avoid some precision issues.
    let v1 = Vec3A::ZERO;
    let v2 = p2 - p1;
    let v3 = p3 - p1;

    let cp = vcross2(v1, v2, v3);
    if cp.abs() > EPS {
        let dot2 = |v: Vec3A| v.x * v.x + v.z * v.z;
        let v1_sq = dot2(v1);
        let v2_sq = dot2(v2);
        let v3_sq = dot2(v3);
        let c = Vec3A::new(
            (v1_sq * (v2.z - v3.z) + v2_sq * (v3.z - v1.z) + v3_sq * (v1.z - v2.z)) / (2.0 * cp),
            0.0,
            (v1_sq * (v3.x - v2.x) + v2_sq * (v1.x - v3.x) + v3_sq * (v2.x - v1.x)) / (2.0 * cp),
        );
        let r = vdist2(c, v1);
        return (c + p1, r);
    }
    (p1, 0.0)
}

fn dist_to_tri_mesh(p: Vec3A, verts: &[Vec3A], tris: &[([usize; 3], u8)]) -> Option<f32> {
    tris.iter()
        .filter_map(|(tri, _)| dist_pt_tri(p, verts[tri[0]], verts[tri[1]], verts[tri[2]]))
        .min_by(f32::total_cmp)
}

/// Vertical distance from point p to triangle defined by vertices a, b, and c.
/// Returns None if the point is outside the triangle on the xz-plane.
fn dist_pt_tri(p: Vec3A, a: Vec3A, b: Vec3A, c: Vec3A) -> Option<f32> {
    let v0 = c - a;
    let v1 = b - a;
    let v2 = p - a;
    let xz = |v: Vec3A| Vec2::new(v.x, v.z);

    let dot00 = xz(v0).dot(xz(v0));
    let dot01 = xz(v0).dot(xz(v1));
    let dot02 = xz(v0).dot(xz(v2));
    let dot11 = xz(v1).dot(xz(v1));
    let dot12 = xz(v1).dot(xz(v2));

    // Compute barycentric coordinates
    let inv_denom = 1.0 / (dot00 * dot11 - dot01 * dot01);
    let u = (dot11 * dot02 - dot01 * dot12) * inv_denom;
    let v = (dot00 * dot12 - dot01 * dot02) * inv_denom;

    // If point lies inside the triangle, return interpolated y-coord.
    const EPS: f32 = 1.0e-4;
    if u >= -EPS && v >= -EPS && (u + v) <= 1.0 + EPS {
        let y = a.y + v0.y * u + v1.y * v;
        Some((y - p.y).abs())
    } else {
        None
    }
}

fn jitter_x(i: usize) -> f32 {
    ((((i as u32).wrapping_mul(0x8da6b343)) & 0xffff) as f32 / 65535.0 * 2.0) - 1.0
}

fn jitter_z(i: usize) -> f32 {
    ((((i as u32).wrapping_mul(0xd8163841)) & 0xffff) as f32 / 65535.0 * 2.0) - 1.0
}

/// Signed distance from `p` to the polygon outline on the xz-plane, negative inside.
fn dist_to_poly(verts: &[Vec3A], p: Vec3A) -> f32 {
    let xz = |v: Vec3A| Vec2::new(v.x, v.z);
    let mut dmin = f32::MAX;
    let mut inside = false;
    let mut j = verts.len() - 1;
    for i in 0..verts.len() {
        let vi = verts[i];
        let vj = verts[j];
        if (vi.z > p.z) != (vj.z > p.z)
            && p.x < (vj.x - vi.x) * (p.z - vi.z) / (vj.z - vi.z) + vi.x
        {
            inside = !inside;
        }
        dmin = dmin.min(distance_squared_point_segment_2d(xz(p), xz(vj), xz(vi)));
        j = i;
    }
    let dmin = dmin.sqrt();
    if inside { -dmin } else { dmin }
}

/// Find edges that lie on hull and mark them as such.
fn set_tri_flags(tris: &mut [([usize; 3], u8)], hull: &[usize]) {
    for (tri, tri_flags) in tris {
        let flag = |a: usize, b: usize| {
            if on_hull(a, b, hull) {
                DetailNavmesh::EDGE_BOUNDARY
            } else {
                0
            }
        };
        *tri_flags = flag(tri[0], tri[1]) | (flag(tri[1], tri[2]) << 2) | (flag(tri[2], tri[0]) << 4);
    }
}

fn on_hull(a: usize, b: usize, hull: &[usize]) -> bool {
    // All internal sampled points come after the hull so we can early out for those.
    if a >= hull.len() || b >= hull.len() {
        return false;
    }
    let mut j = hull.len() - 1;
    for i in 0..hull.len() {
        if a == hull[j] && b == hull[i] {
            return true;
        }
        j = i;
    }
    false
}

fn triangulate_hull(verts: &[Vec3A], hull: &[usize], nin: usize, tris: &mut Vec<([usize; 3], u8)>) {
    let nhull = hull.len();
    if nhull < 3 {
        return;
    }
    let mut start = 0;
    let mut left = 1;
    let mut right = nhull - 1;

    // Start from an ear with shortest perimeter.
    // This tends to favor well formed triangles as starting point.
    let mut dmin = f32::MAX;
    for i in 0..nhull {
        if hull[i] >= nin {
            // Ears are triangles with original vertices as middle vertex while others are actually line segments on edges
            continue;
        }
        let pi = prev(i, nhull);
        let ni = next(i, nhull);
        let pv = verts[hull[pi]];
        let cv = verts[hull[i]];
        let nv = verts[hull[ni]];
        let d = vdist2(pv, cv) + vdist2(cv, nv) + vdist2(nv, pv);
        if d < dmin {
            start = i;
            left = ni;
            right = pi;
            dmin = d;
        }
    }

    // Add first triangle
    tris.push(([hull[start], hull[left], hull[right]], 0));

    // Triangulate the polygon by moving left or right,
    // depending on which triangle has shorter perimeter.
    // This heuristic was chose empirically, since it seems
    // handle tessellated straight edges well.
    while next(left, nhull) != right {
        // Check to see if se should advance left or right.
        let nleft = next(left, nhull);
        let nright = prev(right, nhull);

        let cvleft = verts[hull[left]];
        let nvleft = verts[hull[nleft]];
        let cvright = verts[hull[right]];
        let nvright = verts[hull[nright]];
        let dleft = vdist2(cvleft, nvleft) + vdist2(nvleft, cvright);
        let dright = vdist2(cvright, nvright) + vdist2(cvleft, nvright);
        if dleft < dright {
            tris.push(([hull[left], hull[nleft], hull[right]], 0));
            left = nleft;
        } else {
            tris.push(([hull[left], hull[nright], hull[right]], 0));
            right = nright;
        }
    }
}

/// Returns the height at `f` in voxels, searching the patch in a spiral if the cell itself has no height.
/// Falls back to the height of `f` itself if nothing is found within `radius`.
fn get_height(f: Vec3A, ics: f32, ch: f32, radius: i32, hp: &HeightPatch) -> u16 {
    let own_height = (f.y / ch).round().clamp(0.0, (UNSET_HEIGHT - 1) as f32) as u16;
    if hp.width == 0 || hp.height == 0 {
        return own_height;
    }
    let ix = ((f.x * ics + 0.01).floor() as i32 - hp.xmin as i32).clamp(0, hp.width as i32 - 1);
    let iz = ((f.z * ics + 0.01).floor() as i32 - hp.zmin as i32).clamp(0, hp.height as i32 - 1);
    let mut h = hp.data_at(ix, iz);
    if h == UNSET_HEIGHT {
        // Special case when data might be bad.
        // Walk adjacent cells in a spiral up to 'radius', and look
        // for a pixel which has a valid height.
        let mut x = 1;
        let mut z = 0;
        let mut dx = 1;
        let mut dz = 0;
        let max_size = radius * 2 + 1;
        let max_iter = max_size * max_size - 1;

        let mut next_ring_iter_start = 8;
        let mut next_ring_iters = 16;

        let mut dmin = f32::MAX;
        for i in 0..max_iter {
            let nx = ix + x;
            let nz = iz + z;
            if nx >= 0 && nz >= 0 && nx < hp.width as i32 && nz < hp.height as i32 {
                let nh = hp.data_at(nx, nz);
                if nh != UNSET_HEIGHT {
                    let d = (nh as f32 * ch - f.y).abs();
                    if d < dmin {
                        h = nh;
                        dmin = d;
                    }
                }
            }

            // We are searching in a grid which looks approximately like this:
            //  __________
            // |2 ______ 2|
            // | |1 __ 1| |
            // | | |__| | |
            // | |______| |
            // |__________|
            // We want to find the best height as close to the center cell as possible. This means that
            // if we find a height in one of the neighbor cells to the center, we don't want to
            // expand further out than the 8 neighbors - we want to limit our search to the closest
            // of these "rings", but the best height in the ring.
            // For example, the center is just 1 cell. We checked that at the entrance to the function.
            // The next "ring" contains 8 cells (marked 1 above). Those are all the neighbors to the center cell.
            // The next one again contains 16 cells (marked 2). In general each ring has 8 additional cells, which
            // can be thought of as adding 2 cells around the "center" of each side when we expand the ring.
            // Here we detect if we are about to enter the next ring, and if we are and we have found
            // a height, we abort the search.
            if i + 1 == next_ring_iter_start {
                if h != UNSET_HEIGHT {
                    break;
                }
                next_ring_iter_start += next_ring_iters;
                next_ring_iters += 8;
            }

            if x == z || (x < 0 && x == -z) || (x > 0 && x == 1 - z) {
                let tmp = dx;
                dx = -dz;
                dz = tmp;
            }
            x += dx;
            z += dz;
        }
    }
    if h == UNSET_HEIGHT { own_height } else { h }
}

/// Calculate minimum extend of the polygon.
fn poly_min_extent(verts: &[Vec3A]) -> f32 {
    let xz = |v: Vec3A| Vec2::new(v.x, v.z);
    let nverts = verts.len();
    let mut min_dist = f32::MAX;
    for i in 0..nverts {
        let ni = next(i, nverts);
        let p1 = verts[i];
        let p2 = verts[ni];
        let mut max_edge_dist = 0.0_f32;
        for (j, v) in verts.iter().enumerate() {
            if j == i || j == ni {
                continue;
            }
            let d = distance_squared_point_segment_2d(xz(*v), xz(p1), xz(p2));
            max_edge_dist = max_edge_dist.max(d);
        }
        min_dist = min_dist.min(max_edge_dist);
    }
    min_dist.sqrt()
}

const UNSET_HEIGHT: u16 = 0xffff;

#[derive(Debug, Default, Clone, PartialEq, Eq)]
struct HeightPatch {
    data: Vec<u16>,
    xmin: u16,
    zmin: u16,
    width: u16,
    height: u16,
}

impl HeightPatch {
    fn get_height_data(
        &mut self,
        chf: &CompactHeightfield,
        poly: &[u16],
        verts: &[U16Vec3],
        bs: u16,
        queue: &mut VecDeque<(i32, i32, usize)>,
        region: RegionId,
    ) {
        // Note: Reads to the compact heightfield are offset by border size (bs)
        // since border size offset is already removed from the polymesh vertices.
        queue.clear();
        // Set all heights to UNSET_HEIGHT.
        self.data.clear();
        self.data.resize(self.data_len(), UNSET_HEIGHT);

        let mut empty = true;

        // We cannot sample from this poly if it was created from polys
        // of different regions. If it was then it could potentially be overlapping
        // with polys of that region and the heights sampled here could be wrong.
        if region != RegionId::NONE {
            // Copy the height from the same region, and mark region borders
            // as seed points to fill the rest.
            for hz in 0..self.height {
                let z = self.zmin + hz + bs;
                for hx in 0..self.width {
                    let x = self.xmin + hx + bs;
                    let Some(cell) = chf.get_cell_at(x, z) else {
                        continue;
                    };
                    for i in cell.index_range() {
                        let span = &chf.spans[i];
                        if span.region != region {
                            continue;
                        }
                        // Store height
                        *self.data_at_mut(hx as i32, hz as i32) = span.y;
                        empty = false;

                        // If any of the neighbours is not in same region,
                        // add the current location as flood fill start
                        let border = (0..4).any(|dir| {
                            chf.neighbor(x as i32, z as i32, i, dir)
                                .is_some_and(|(_, _, a_i)| chf.spans[a_i].region != region)
                        });
                        if border {
                            queue.push_back((x as i32, z as i32, i));
                        }
                        break;
                    }
                }
            }
        }

        // if the polygon does not contain any points from the current region (rare, but happens)
        // or if it could potentially be overlapping polygons of the same region,
        // then use the center as the seed point.
        if empty {
            self.seed_with_poly_center(chf, poly, verts, bs, queue);
        }

        // We assume the seed is centered in the polygon, so a BFS to collect
        // height data will ensure we do not move onto overlapping polygons and
        // sample wrong heights.
        while let Some((cx, cz, ci)) = queue.pop_front() {
            for dir in 0..4 {
                let Some((ax, az, ai)) = chf.neighbor(cx, cz, ci, dir) else {
                    continue;
                };
                let hx = ax - self.xmin as i32 - bs as i32;
                let hz = az - self.zmin as i32 - bs as i32;
                if hx < 0 || hz < 0 || hx >= self.width as i32 || hz >= self.height as i32 {
                    continue;
                }
                if self.data_at(hx, hz) != UNSET_HEIGHT {
                    continue;
                }
                *self.data_at_mut(hx, hz) = chf.spans[ai].y;
                queue.push_back((ax, az, ai));
            }
        }
    }

    fn seed_with_poly_center(
        &mut self,
        chf: &CompactHeightfield,
        poly: &[u16],
        verts: &[U16Vec3],
        bs: u16,
        queue: &mut VecDeque<(i32, i32, usize)>,
    ) {
        // Note: Reads to the compact heightfield are offset by border size (bs)
        // since border size offset is already removed from the polymesh vertices.
        const OFFSET: [(i32, i32); 9] = [
            (0, 0),
            (-1, -1),
            (0, -1),
            (1, -1),
            (1, 0),
            (1, 1),
            (0, 1),
            (-1, 1),
            (-1, 0),
        ];
        let bs = bs as i32;

        // Find cell closest to a poly vertex
        let mut start = None;
        let mut dmin = UNSET_HEIGHT as i32;
        'search: for v in poly.iter().map(|p| verts[*p as usize]) {
            for (ox, oz) in OFFSET {
                if dmin <= 0 {
                    break 'search;
                }
                let ax = v.x as i32 + ox;
                let ay = v.y as i32;
                let az = v.z as i32 + oz;
                if ax < self.xmin as i32
                    || ax >= self.xmin as i32 + self.width as i32
                    || az < self.zmin as i32
                    || az >= self.zmin as i32 + self.height as i32
                {
                    continue;
                }
                let Some(cell) = chf.get_cell_at((ax + bs) as u16, (az + bs) as u16) else {
                    continue;
                };
                for i in cell.index_range() {
                    let d = (ay - chf.spans[i].y as i32).abs();
                    if d < dmin {
                        start = Some((ax, az, i));
                        dmin = d;
                    }
                }
            }
        }

        let Some(start) = start else {
            warn!("Found no span to seed the height data of a polygon, using its own heights");
            return;
        };

        // Find center of the polygon
        let (sum_x, sum_z) = poly.iter().map(|p| verts[*p as usize]).fold((0, 0), |(x, z), v| {
            (x + v.x as i32, z + v.z as i32)
        });
        let pcx = sum_x / poly.len() as i32;
        let pcz = sum_z / poly.len() as i32;

        // Use seeds array as a stack for DFS
        let mut stack = vec![start];
        let mut dirs = [0, 1, 2, 3];
        self.data.fill(0);

        // DFS to move to the center. Note that we need a DFS here and can not just move
        // directly towards the center without recording intermediate nodes, even though the polygons
        // are convex. In very rare we can get stuck due to contour simplification if we do not
        // record nodes.
        let mut current = start;
        loop {
            let Some(top) = stack.pop() else {
                warn!("Walk towards polygon center failed to reach center");
                break;
            };
            current = top;
            let (cx, cz, ci) = current;

            if cx == pcx && cz == pcz {
                break;
            }

            // If we are already at the correct X-position, prefer direction
            // directly towards the center in the Y-axis; otherwise prefer
            // direction in the X-axis
            let direct_dir = if cx == pcx {
                dir_for_offset(0, if pcz > cz { 1 } else { -1 })
            } else {
                dir_for_offset(if pcx > cx { 1 } else { -1 }, 0)
            } as usize;

            // Push the direct dir last so we start with this on next iteration
            dirs.swap(direct_dir, 3);

            for dir in dirs {
                let Some(con) = chf.spans[ci].con(dir) else {
                    continue;
                };
                let new_x = cx + dir_offset_x(dir);
                let new_z = cz + dir_offset_z(dir);

                let hpx = new_x - self.xmin as i32;
                let hpz = new_z - self.zmin as i32;
                if hpx < 0 || hpx >= self.width as i32 || hpz < 0 || hpz >= self.height as i32 {
                    continue;
                }
                if self.data_at(hpx, hpz) != 0 {
                    continue;
                }
                *self.data_at_mut(hpx, hpz) = 1;
                let (_, _, new_index) = chf.con_indices(cx + bs, cz + bs, dir, con);
                stack.push((new_x, new_z, new_index));
            }

            dirs.swap(direct_dir, 3);
        }

        // get_height_data seeds are given in coordinates with borders
        let (cx, cz, ci) = current;
        queue.clear();
        queue.push_back((cx + bs, cz + bs, ci));
        self.data.fill(UNSET_HEIGHT);
        *self.data_at_mut(cx - self.xmin as i32, cz - self.zmin as i32) = chf.spans[ci].y;
    }

    #[inline]
    fn data_len(&self) -> usize {
        self.width as usize * self.height as usize
    }

    #[inline]
    fn data_at(&self, x: i32, z: i32) -> u16 {
        self.data[(x + z * self.width as i32) as usize]
    }

    #[inline]
    fn data_at_mut(&mut self, x: i32, z: i32) -> &mut u16 {
        &mut self.data[(x + z * self.width as i32) as usize]
    }
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
struct Bounds {
    xmin: u16,
    xmax: u16,
    zmin: u16,
    zmax: u16,
}

impl Bounds {
    #[inline]
    fn width(&self) -> u16 {
        self.xmax - self.xmin
    }

    #[inline]
    fn height(&self) -> u16 {
        self.zmax - self.zmin
    }
}

/// Errors that can occur when building a [`DetailNavmesh`].
#[derive(Error, Debug)]
pub enum DetailNavmeshError {
    /// The detail mesh storage could not be allocated.
    #[error("Failed to allocate detail mesh storage: {0}")]
    AllocationFailed(#[from] TryReserveError),
}

#[cfg(test)]
mod tests {
    use approx::assert_relative_eq;

    use super::*;
    use crate::{contours::BuildContoursFlags, test_utils::flat_compact_heightfield};

    fn detail(sample_distance: f32) -> (PolygonNavmesh, DetailNavmesh) {
        let mut compact = flat_compact_heightfield(10.0);
        compact.build_distance_field();
        compact.build_regions(0, 0, 20).unwrap();
        let mesh = compact
            .build_contours(1.3, 0, BuildContoursFlags::DEFAULT)
            .build_polygon_mesh(6, 100)
            .unwrap();
        let detail = DetailNavmesh::new(&mesh, &compact, sample_distance, 0.2).unwrap();
        (mesh, detail)
    }

    #[test]
    fn flat_polygon_detail_is_flat() {
        let (mesh, detail) = detail(3.0);
        assert_eq!(detail.meshes.len(), mesh.polygon_count());
        assert!(detail.triangle_count() >= 2);
        let first_y = detail.vertices[0].y;
        for vertex in &detail.vertices {
            assert_relative_eq!(vertex.y, first_y, epsilon = 1.0e-4);
        }
    }

    #[test]
    fn detail_vertices_are_in_world_space() {
        let (_, detail) = detail(0.0);
        let sub_mesh = detail.meshes[0];
        assert_eq!(sub_mesh.vertex_count, 4);
        assert_eq!(sub_mesh.triangle_count, 2);
        let (min_x, max_x) = detail
            .vertices
            .iter()
            .fold((f32::MAX, f32::MIN), |(min, max), v| (min.min(v.x), max.max(v.x)));
        assert_relative_eq!(min_x, 0.0);
        assert_relative_eq!(max_x, 10.0);
    }

    #[test]
    fn outline_edges_are_flagged() {
        let (_, detail) = detail(0.0);
        let boundary_edges: u32 = detail
            .triangles
            .iter()
            .map(|(_, flags)| {
                [0, 2, 4]
                    .into_iter()
                    .filter(|shift| (*flags >> shift) & DetailNavmesh::EDGE_BOUNDARY != 0)
                    .count() as u32
            })
            .sum();
        assert_eq!(boundary_edges, 4);
    }

    #[test]
    fn delaunay_triangulates_square_with_center() {
        let pts = [
            Vec3A::new(0.0, 0.0, 0.0),
            Vec3A::new(0.0, 0.0, 4.0),
            Vec3A::new(4.0, 0.0, 4.0),
            Vec3A::new(4.0, 0.0, 0.0),
            Vec3A::new(2.0, 1.0, 2.1),
        ];
        let hull = [0, 1, 2, 3];
        let mut tris = Vec::new();
        let mut edges = Vec::new();
        delaunay_hull(&pts, &hull, &mut tris, &mut edges);
        assert_eq!(tris.len(), 4);
        assert!(tris.iter().all(|(tri, _)| tri.contains(&4)));
    }

    #[test]
    fn signed_distance_is_negative_inside() {
        let square = [
            Vec3A::new(0.0, 0.0, 0.0),
            Vec3A::new(0.0, 0.0, 4.0),
            Vec3A::new(4.0, 0.0, 4.0),
            Vec3A::new(4.0, 0.0, 0.0),
        ];
        assert_relative_eq!(dist_to_poly(&square, Vec3A::new(1.0, 0.0, 2.0)), -1.0);
        assert_relative_eq!(dist_to_poly(&square, Vec3A::new(6.0, 0.0, 2.0)), 2.0);
    }

    #[test]
    fn empty_mesh_gives_empty_detail() {
        let compact = flat_compact_heightfield(4.0);
        let mesh = compact
            .build_contours(1.3, 0, BuildContoursFlags::DEFAULT)
            .build_polygon_mesh(6, 10)
            .unwrap();
        let detail = DetailNavmesh::new(&mesh, &compact, 6.0, 1.0).unwrap();
        assert_eq!(detail, DetailNavmesh::default());
    }
}
