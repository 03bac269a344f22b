//! CPU-side geometry preparation: bounds, fixed-point quantization,
//! octahedral normal encoding and edge extraction.

use glam::{DMat4, DVec3, Mat3, Vec2, Vec3};
use std::collections::HashMap;

/// Largest value of a quantized position or UV component
pub const QUANTIZED_MAX: f64 = 65535.0;

/// Angle between face normals above which a shared edge is drawn
pub const DEFAULT_EDGE_THRESHOLD_DEGREES: f64 = 10.0;

const WELD_PRECISION: f64 = 1.0e4;

/// Axis-aligned bounding box
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Aabb {
    pub min: DVec3,
    pub max: DVec3,
}

impl Default for Aabb {
    fn default() -> Self {
        Aabb::EMPTY
    }
}

impl Aabb {
    pub const EMPTY: Aabb = Aabb {
        min: DVec3::splat(f64::INFINITY),
        max: DVec3::splat(f64::NEG_INFINITY),
    };

    pub fn is_empty(&self) -> bool {
        self.min.x > self.max.x || self.min.y > self.max.y || self.min.z > self.max.z
    }

    pub fn expand(&mut self, p: DVec3) {
        self.min = self.min.min(p);
        self.max = self.max.max(p);
    }

    pub fn union(&mut self, other: &Aabb) {
        if !other.is_empty() {
            self.expand(other.min);
            self.expand(other.max);
        }
    }

    /// Bounds of a flat xyz array
    pub fn from_positions(positions: &[f64]) -> Aabb {
        let mut aabb = Aabb::EMPTY;
        for p in positions.chunks_exact(3) {
            aabb.expand(DVec3::new(p[0], p[1], p[2]));
        }
        aabb
    }

    pub fn center(&self) -> DVec3 {
        (self.min + self.max) * 0.5
    }

    pub fn size(&self) -> DVec3 {
        if self.is_empty() {
            DVec3::ZERO
        } else {
            self.max - self.min
        }
    }

    /// Bounds of the eight transformed corners
    pub fn transformed(&self, m: &DMat4) -> Aabb {
        if self.is_empty() {
            return *self;
        }
        let mut out = Aabb::EMPTY;
        for i in 0..8 {
            let corner = DVec3::new(
                if i & 1 == 0 { self.min.x } else { self.max.x },
                if i & 2 == 0 { self.min.y } else { self.max.y },
                if i & 4 == 0 { self.min.z } else { self.max.z },
            );
            out.expand(m.transform_point3(corner));
        }
        out
    }

    /// Slab test
    pub fn intersects_ray(&self, origin: DVec3, dir: DVec3) -> bool {
        if self.is_empty() {
            return false;
        }
        let mut t_min = f64::NEG_INFINITY;
        let mut t_max = f64::INFINITY;
        for axis in 0..3 {
            let (o, d) = (origin[axis], dir[axis]);
            let (lo, hi) = (self.min[axis], self.max[axis]);
            if d.abs() < f64::EPSILON {
                if o < lo || o > hi {
                    return false;
                }
                continue;
            }
            let (t0, t1) = ((lo - o) / d, (hi - o) / d);
            t_min = t_min.max(t0.min(t1));
            t_max = t_max.min(t0.max(t1));
        }
        t_max >= t_min.max(0.0)
    }
}

/// Matrix mapping quantized `0..=65535` positions back into `aabb`
pub fn positions_decode_matrix(aabb: &Aabb) -> DMat4 {
    let size = aabb.size();
    let step = |extent: f64| if extent > 0.0 { extent / QUANTIZED_MAX } else { 1.0 };
    let min = if aabb.is_empty() { DVec3::ZERO } else { aabb.min };
    DMat4::from_translation(min)
        * DMat4::from_scale(DVec3::new(step(size.x), step(size.y), step(size.z)))
}

/// Quantize positions into the fixed-point space of `aabb`
pub fn quantize_positions(positions: &[f64], aabb: &Aabb) -> Vec<u16> {
    let size = aabb.size();
    let scale = |extent: f64| if extent > 0.0 { QUANTIZED_MAX / extent } else { 0.0 };
    let scale = DVec3::new(scale(size.x), scale(size.y), scale(size.z));
    positions
        .chunks_exact(3)
        .flat_map(|p| {
            let q = ((DVec3::new(p[0], p[1], p[2]) - aabb.min) * scale)
                .round()
                .clamp(DVec3::ZERO, DVec3::splat(QUANTIZED_MAX));
            [q.x as u16, q.y as u16, q.z as u16]
        })
        .collect()
}

pub fn decompress_position(q: &[u16], decode: &DMat4) -> DVec3 {
    decode.transform_point3(DVec3::new(q[0] as f64, q[1] as f64, q[2] as f64))
}

fn sign_not_zero(v: f32) -> f32 {
    if v >= 0.0 {
        1.0
    } else {
        -1.0
    }
}

fn oct_encode_rounded(n: Vec3, round_x: fn(f32) -> f32, round_y: fn(f32) -> f32) -> [i8; 2] {
    let l1 = n.x.abs() + n.y.abs() + n.z.abs();
    if l1 == 0.0 {
        return [0, 0];
    }
    let mut p = Vec2::new(n.x / l1, n.y / l1);
    if n.z < 0.0 {
        p = Vec2::new(
            (1.0 - p.y.abs()) * sign_not_zero(p.x),
            (1.0 - p.x.abs()) * sign_not_zero(p.y),
        );
    }
    [
        round_x(p.x * 127.0).clamp(-127.0, 127.0) as i8,
        round_y(p.y * 127.0).clamp(-127.0, 127.0) as i8,
    ]
}

pub fn oct_decode(oct: [i8; 2]) -> Vec3 {
    let x = oct[0] as f32 / 127.0;
    let y = oct[1] as f32 / 127.0;
    let mut v = Vec3::new(x, y, 1.0 - x.abs() - y.abs());
    if v.z < 0.0 {
        let (vx, vy) = (v.x, v.y);
        v.x = (1.0 - vy.abs()) * sign_not_zero(vx);
        v.y = (1.0 - vx.abs()) * sign_not_zero(vy);
    }
    v.normalize_or_zero()
}

/// Octahedral encoding into two snorm bytes, choosing the floor/ceil
/// combination that decodes closest to the input
pub fn oct_encode_normal(n: Vec3) -> [i8; 2] {
    let n = n.normalize_or_zero();
    let candidates: [(fn(f32) -> f32, fn(f32) -> f32); 4] = [
        (f32::floor, f32::floor),
        (f32::ceil, f32::floor),
        (f32::floor, f32::ceil),
        (f32::ceil, f32::ceil),
    ];
    let mut best = [0, 0];
    let mut best_dot = f32::NEG_INFINITY;
    for (round_x, round_y) in candidates {
        let oct = oct_encode_rounded(n, round_x, round_y);
        let dot = oct_decode(oct).dot(n);
        if dot > best_dot {
            best_dot = dot;
            best = oct;
        }
    }
    best
}

pub fn oct_encode_normals(normals: &[f32]) -> Vec<i8> {
    normals
        .chunks_exact(3)
        .flat_map(|n| oct_encode_normal(Vec3::new(n[0], n[1], n[2])))
        .collect()
}

/// Quantize UVs into `0..=65535` with the matrix that maps them back
pub fn quantize_uvs(uvs: &[f32]) -> (Vec<u16>, Mat3) {
    let mut min = Vec2::splat(f32::INFINITY);
    let mut max = Vec2::splat(f32::NEG_INFINITY);
    for uv in uvs.chunks_exact(2) {
        let uv = Vec2::new(uv[0], uv[1]);
        min = min.min(uv);
        max = max.max(uv);
    }
    if uvs.len() < 2 {
        return (Vec::new(), Mat3::IDENTITY);
    }
    let max_q = QUANTIZED_MAX as f32;
    let size = max - min;
    let step = Vec2::new(
        if size.x > 0.0 { size.x / max_q } else { 1.0 },
        if size.y > 0.0 { size.y / max_q } else { 1.0 },
    );
    let quantized = uvs
        .chunks_exact(2)
        .flat_map(|uv| {
            let q = ((Vec2::new(uv[0], uv[1]) - min) / step)
                .round()
                .clamp(Vec2::ZERO, Vec2::splat(max_q));
            [q.x as u16, q.y as u16]
        })
        .collect();
    let decode = Mat3::from_cols(
        Vec3::new(step.x, 0.0, 0.0),
        Vec3::new(0.0, step.y, 0.0),
        Vec3::new(min.x, min.y, 1.0),
    );
    (quantized, decode)
}

/// Map each vertex to the first vertex sharing its position
fn weld_vertices(positions: &[f64]) -> Vec<u32> {
    let mut seen: HashMap<(i64, i64, i64), u32> = HashMap::new();
    positions
        .chunks_exact(3)
        .enumerate()
        .map(|(i, p)| {
            let key = (
                (p[0] * WELD_PRECISION).round() as i64,
                (p[1] * WELD_PRECISION).round() as i64,
                (p[2] * WELD_PRECISION).round() as i64,
            );
            *seen.entry(key).or_insert(i as u32)
        })
        .collect()
}

struct Edge {
    a: u32,
    b: u32,
    normal: DVec3,
    faces: u32,
    sharp: bool,
}

/// Line-list indices of the feature edges of a triangle mesh: boundary and
/// non-manifold edges, and edges whose faces meet at more than
/// `threshold_degrees`
pub fn build_edge_indices(positions: &[f64], indices: &[u32], threshold_degrees: f64) -> Vec<u32> {
    let weld = weld_vertices(positions);
    let vertex = |i: u32| {
        let i = i as usize * 3;
        DVec3::new(positions[i], positions[i + 1], positions[i + 2])
    };
    let threshold_dot = threshold_degrees.to_radians().cos();

    let mut lookup: HashMap<(u32, u32), usize> = HashMap::new();
    let mut edges: Vec<Edge> = Vec::new();
    for tri in indices.chunks_exact(3) {
        if tri.iter().any(|&i| i as usize >= weld.len()) {
            continue;
        }
        let normal = (vertex(tri[1]) - vertex(tri[0]))
            .cross(vertex(tri[2]) - vertex(tri[0]))
            .normalize_or_zero();
        for (a, b) in [(tri[0], tri[1]), (tri[1], tri[2]), (tri[2], tri[0])] {
            let (wa, wb) = (weld[a as usize], weld[b as usize]);
            if wa == wb {
                continue;
            }
            let key = (wa.min(wb), wa.max(wb));
            match lookup.get(&key) {
                Some(&index) => {
                    let edge = &mut edges[index];
                    edge.faces += 1;
                    if edge.normal.dot(normal) < threshold_dot {
                        edge.sharp = true;
                    }
                }
                None => {
                    lookup.insert(key, edges.len());
                    edges.push(Edge {
                        a,
                        b,
                        normal,
                        faces: 1,
                        sharp: false,
                    });
                }
            }
        }
    }

    edges
        .iter()
        .filter(|e| e.faces != 2 || e.sharp)
        .flat_map(|e| [e.a, e.b])
        .collect()
}
