//! Sphere primitive for ray tracing.

use std::f64::consts::PI;

use raypipe_math::{DVec2, DVec3, Interval, RayDescriptor};

use crate::hittable::{HitRecord, Hittable};

/// A named sphere tagged with the index of its modifier.
#[derive(Debug, Clone)]
pub struct Sphere {
    pub name: String,
    pub center: DVec3,
    pub radius: f64,
    /// Index into the scene's modifiers, `None` for void
    pub modifier: Option<usize>,
}

impl Sphere {
    pub fn new(name: impl Into<String>, center: DVec3, radius: f64, modifier: Option<usize>) -> Self {
        Self {
            name: name.into(),
            center,
            radius: radius.max(0.0),
            modifier,
        }
    }

    /// Solid angle subtended from `point`, approximated for distant spheres.
    pub fn solid_angle(&self, point: DVec3) -> f64 {
        let d2 = (self.center - point).length_squared();
        if d2 <= self.radius * self.radius {
            return 2.0 * PI;
        }
        (PI * self.radius * self.radius / d2).min(2.0 * PI)
    }

    /// Get the UV coordinates for a point on the unit sphere.
    fn get_sphere_uv(p: DVec3) -> DVec2 {
        // theta: angle down from +Y
        // phi: angle around Y axis from +X
        let theta = (-p.y).acos();
        let phi = (-p.z).atan2(p.x) + PI;
        DVec2::new(phi / (2.0 * PI), theta / PI)
    }
}

impl Hittable for Sphere {
    fn hit(&self, ray: &RayDescriptor, ray_t: Interval, rec: &mut HitRecord) -> bool {
        let oc = self.center - ray.origin;
        let a = ray.direction.length_squared();
        let h = ray.direction.dot(oc);
        let c = oc.length_squared() - self.radius * self.radius;

        let discriminant = h * h - a * c;
        if discriminant < 0.0 {
            return false;
        }

        let sqrtd = discriminant.sqrt();

        // Find the nearest root in the acceptable range
        let mut root = (h - sqrtd) / a;
        if !ray_t.surrounds(root) {
            root = (h + sqrtd) / a;
            if !ray_t.surrounds(root) {
                return false;
            }
        }

        rec.t = root;
        rec.p = ray.at(rec.t);
        let outward_normal = (rec.p - self.center) / self.radius;
        rec.set_face_normal(ray, outward_normal);
        rec.uv = Self::get_sphere_uv(outward_normal);

        true
    }
}
