//! Small geometric helpers shared by the build stages.

use glam::{UVec3, Vec2, Vec3A};

/// An axis-aligned bounding box in world units.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize, serde::Deserialize))]
pub struct Aabb3d {
    /// The minimum corner of the box.
    pub min: Vec3A,
    /// The maximum corner of the box.
    pub max: Vec3A,
}

impl Aabb3d {
    /// Creates a new AABB from its minimum and maximum corners.
    #[inline]
    pub fn new(min: impl Into<Vec3A>, max: impl Into<Vec3A>) -> Self {
        Self {
            min: min.into(),
            max: max.into(),
        }
    }

    /// Computes the AABB enclosing all `verts`.
    /// Returns `None` if `verts` is empty.
    pub fn from_verts(verts: &[Vec3A]) -> Option<Self> {
        let (first, rest) = verts.split_first()?;
        let (min, max) = rest
            .iter()
            .fold((*first, *first), |(min, max), v| (min.min(*v), max.max(*v)));
        Some(Self { min, max })
    }

    /// The size of the box along each axis.
    #[inline]
    pub fn extent(&self) -> Vec3A {
        self.max - self.min
    }

    /// Whether both corners are finite and `max >= min` on every axis.
    pub fn is_valid(&self) -> bool {
        self.min.is_finite() && self.max.is_finite() && self.max.cmpge(self.min).all()
    }

    /// Whether the boxes overlap, touching faces included.
    #[inline]
    pub fn intersects(&self, other: &Aabb3d) -> bool {
        self.min.cmple(other.max).all() && self.max.cmpge(other.min).all()
    }

    /// Whether the boxes overlap on the xz-plane, ignoring the y-axis.
    #[inline]
    pub fn intersects_xz(&self, other: &Aabb3d) -> bool {
        self.min.x <= other.max.x
            && self.max.x >= other.min.x
            && self.min.z <= other.max.z
            && self.max.z >= other.min.z
    }

    /// Grows the box by `amount` on the x and z axes.
    #[inline]
    pub fn expanded_xz(&self, amount: f32) -> Self {
        let pad = Vec3A::new(amount, 0.0, amount);
        Self {
            min: self.min - pad,
            max: self.max + pad,
        }
    }
}

pub(crate) trait TriangleIndices {
    fn normal(&self, vertices: &[Vec3A]) -> Vec3A;
}

impl TriangleIndices for UVec3 {
    #[inline]
    fn normal(&self, vertices: &[Vec3A]) -> Vec3A {
        let a = vertices[self[0] as usize];
        let b = vertices[self[1] as usize];
        let c = vertices[self[2] as usize];
        let ab = b - a;
        let ac = c - a;
        ab.cross(ac).normalize_or_zero()
    }
}

pub(crate) trait TriangleVertices {
    fn aabb(&self) -> Aabb3d;
}

impl TriangleVertices for [Vec3A; 3] {
    #[inline]
    fn aabb(&self) -> Aabb3d {
        let min = self[0].min(self[1]).min(self[2]);
        let max = self[0].max(self[1]).max(self[2]);
        Aabb3d { min, max }
    }
}

/// Gets the standard width (x-axis) offset for the specified direction.
/// # Arguments
/// - `direction`: The direction. [Limits: 0 <= value < 4]
/// # Returns
///
/// The width offset to apply to the current cell position to move in the direction.
#[inline]
pub(crate) fn dir_offset_x(direction: u8) -> i32 {
    const OFFSET: [i32; 4] = [-1, 0, 1, 0];
    OFFSET[direction as usize & 0x03]
}

/// Gets the standard height (z-axis) offset for the specified direction.
/// # Arguments
/// - `direction`: The direction. [Limits: 0 <= value < 4]
/// # Returns
///
/// The height offset to apply to the current cell position to move in the direction.
#[inline]
pub(crate) fn dir_offset_z(direction: u8) -> i32 {
    const OFFSET: [i32; 4] = [0, 1, 0, -1];
    OFFSET[direction as usize & 0x03]
}

/// Gets the direction for the specified offset. One of x and z should be 0.
#[inline]
pub(crate) fn dir_for_offset(x: i32, z: i32) -> u8 {
    const DIRS: [u8; 5] = [3, 0, u8::MAX, 2, 1];
    DIRS[(((z + 1) << 1) + x) as usize]
}

#[inline]
pub(crate) fn next(i: usize, n: usize) -> usize {
    if i + 1 < n { i + 1 } else { 0 }
}

#[inline]
pub(crate) fn prev(i: usize, n: usize) -> usize {
    if i >= 1 { i - 1 } else { n - 1 }
}

/// Squared distance from `pt` to the segment `p..q` on the xz-plane.
#[inline]
pub(crate) fn distance_squared_point_segment_2d(pt: Vec2, p: Vec2, q: Vec2) -> f32 {
    let pq = q - p;
    let d = pq.length_squared();
    let mut t = pq.dot(pt - p);
    if d > 0.0 {
        t /= d;
    }
    let t = t.clamp(0.0, 1.0);
    (p + pq * t - pt).length_squared()
}

/// Squared distance from `pt` to the segment `p..q`.
#[inline]
pub(crate) fn distance_squared_point_segment(pt: Vec3A, p: Vec3A, q: Vec3A) -> f32 {
    let pq = q - p;
    let d = pq.length_squared();
    let mut t = pq.dot(pt - p);
    if d > 0.0 {
        t /= d;
    }
    let t = t.clamp(0.0, 1.0);
    (p + pq * t - pt).length_squared()
}

/// Twice the signed area of the triangle `a, b, c` on the xz-plane, for integer lattice points.
#[inline]
pub(crate) fn area2(a: [i32; 2], b: [i32; 2], c: [i32; 2]) -> i64 {
    (b[0] as i64 - a[0] as i64) * (c[1] as i64 - a[1] as i64)
        - (c[0] as i64 - a[0] as i64) * (b[1] as i64 - a[1] as i64)
}

/// Whether `c` is strictly left of the directed line `a -> b`.
#[inline]
pub(crate) fn left(a: [i32; 2], b: [i32; 2], c: [i32; 2]) -> bool {
    area2(a, b, c) < 0
}

#[inline]
pub(crate) fn left_on(a: [i32; 2], b: [i32; 2], c: [i32; 2]) -> bool {
    area2(a, b, c) <= 0
}

#[inline]
pub(crate) fn collinear(a: [i32; 2], b: [i32; 2], c: [i32; 2]) -> bool {
    area2(a, b, c) == 0
}

/// Proper intersection: the segments share a point interior to both.
pub(crate) fn intersect_prop(a: [i32; 2], b: [i32; 2], c: [i32; 2], d: [i32; 2]) -> bool {
    if collinear(a, b, c) || collinear(a, b, d) || collinear(c, d, a) || collinear(c, d, b) {
        return false;
    }
    (left(a, b, c) ^ left(a, b, d)) && (left(c, d, a) ^ left(c, d, b))
}

/// Whether `c` lies on the closed segment `a..b`.
pub(crate) fn between(a: [i32; 2], b: [i32; 2], c: [i32; 2]) -> bool {
    if !collinear(a, b, c) {
        return false;
    }
    if a[0] != b[0] {
        (a[0] <= c[0] && c[0] <= b[0]) || (a[0] >= c[0] && c[0] >= b[0])
    } else {
        (a[1] <= c[1] && c[1] <= b[1]) || (a[1] >= c[1] && c[1] >= b[1])
    }
}

/// Whether the segments `a..b` and `c..d` intersect, properly or improperly.
pub(crate) fn intersect(a: [i32; 2], b: [i32; 2], c: [i32; 2], d: [i32; 2]) -> bool {
    intersect_prop(a, b, c, d)
        || between(a, b, c)
        || between(a, b, d)
        || between(c, d, a)
        || between(c, d, b)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn direction_offsets_round_trip() {
        for dir in 0..4 {
            let x = dir_offset_x(dir);
            let z = dir_offset_z(dir);
            assert_eq!(dir_for_offset(x, z), dir);
        }
    }

    #[test]
    fn aabb_from_verts() {
        let aabb = Aabb3d::from_verts(&[
            Vec3A::new(1.0, -2.0, 3.0),
            Vec3A::new(-1.0, 4.0, 0.0),
            Vec3A::new(0.5, 0.0, 7.0),
        ])
        .unwrap();
        assert_eq!(aabb.min, Vec3A::new(-1.0, -2.0, 0.0));
        assert_eq!(aabb.max, Vec3A::new(1.0, 4.0, 7.0));
        assert!(Aabb3d::from_verts(&[]).is_none());
    }

    #[test]
    fn segments_intersect() {
        assert!(intersect([0, 0], [4, 4], [0, 4], [4, 0]));
        assert!(!intersect([0, 0], [1, 1], [2, 2], [3, 0]));
        // Touching at an endpoint counts as an improper intersection.
        assert!(intersect([0, 0], [2, 0], [2, 0], [2, 2]));
        assert!(!intersect_prop([0, 0], [2, 0], [2, 0], [2, 2]));
    }

    #[test]
    fn point_segment_distance_clamps_to_endpoints() {
        let d = distance_squared_point_segment_2d(Vec2::new(3.0, 0.0), Vec2::ZERO, Vec2::X);
        assert_eq!(d, 4.0);
        let d = distance_squared_point_segment_2d(Vec2::new(0.5, 2.0), Vec2::ZERO, Vec2::X);
        assert_eq!(d, 4.0);
    }
}
