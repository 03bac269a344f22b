use glam::DVec3;

const EPSILON: f64 = 1.0e-12;

/// World-space ray
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Ray {
    pub origin: DVec3,
    pub dir: DVec3,
}

impl Ray {
    pub fn new(origin: DVec3, dir: DVec3) -> Ray {
        Ray {
            origin,
            dir: dir.normalize_or_zero(),
        }
    }

    pub fn at(&self, t: f64) -> DVec3 {
        self.origin + self.dir * t
    }
}

/// Surface hit reported by a precise pick
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct SurfacePick {
    pub world_pos: DVec3,
    pub world_normal: DVec3,
    pub distance: f64,
}

/// Möller–Trumbore, two-sided. Returns the ray parameter of the hit.
pub fn ray_triangle(ray: &Ray, a: DVec3, b: DVec3, c: DVec3) -> Option<f64> {
    let edge1 = b - a;
    let edge2 = c - a;
    let p = ray.dir.cross(edge2);
    let det = edge1.dot(p);
    if det.abs() < EPSILON {
        return None;
    }
    let inv_det = 1.0 / det;
    let s = ray.origin - a;
    let u = s.dot(p) * inv_det;
    if !(0.0..=1.0).contains(&u) {
        return None;
    }
    let q = s.cross(edge1);
    let v = ray.dir.dot(q) * inv_det;
    if v < 0.0 || u + v > 1.0 {
        return None;
    }
    let t = edge2.dot(q) * inv_det;
    (t >= 0.0).then_some(t)
}

/// Intersect world-space triangles, keeping the farthest hit along the ray
pub fn farthest_hit(
    ray: &Ray,
    triangles: impl IntoIterator<Item = [DVec3; 3]>,
) -> Option<SurfacePick> {
    let mut best: Option<SurfacePick> = None;
    for [a, b, c] in triangles {
        let Some(t) = ray_triangle(ray, a, b, c) else {
            continue;
        };
        if best.map_or(true, |hit| t > hit.distance) {
            best = Some(SurfacePick {
                world_pos: ray.at(t),
                world_normal: (b - a).cross(c - a).normalize_or_zero(),
                distance: t,
            });
        }
    }
    best
}
