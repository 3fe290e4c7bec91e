//! Hittable trait and HitRecord for ray-object intersection.

use raypipe_math::{DVec2, DVec3, Interval, RayDescriptor};

/// Record of a ray-object intersection.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct HitRecord {
    /// Point of intersection
    pub p: DVec3,
    /// Surface normal at intersection (always points against ray)
    pub normal: DVec3,
    /// Local surface coordinates
    pub uv: DVec2,
    /// Parameter t where the intersection occurs
    pub t: f64,
    /// Whether the ray hit the front face (outside) of the surface
    pub front_face: bool,
    /// Index of the object that was hit within its list
    pub object: usize,
}

impl HitRecord {
    /// Set the face normal based on ray direction and outward normal.
    ///
    /// The normal is always stored pointing against the ray direction,
    /// so we need to track whether we hit the front or back face.
    pub fn set_face_normal(&mut self, ray: &RayDescriptor, outward_normal: DVec3) {
        self.front_face = ray.direction.dot(outward_normal) < 0.0;
        self.normal = if self.front_face {
            outward_normal
        } else {
            -outward_normal
        };
    }
}

/// Trait for objects that can be hit by rays.
pub trait Hittable: Send + Sync {
    /// Test if a ray hits this object within the given interval.
    ///
    /// Returns true if hit, and fills in the hit record.
    fn hit(&self, ray: &RayDescriptor, ray_t: Interval, rec: &mut HitRecord) -> bool;
}

/// Closest hit over a list of objects. Sets [`HitRecord::object`] to the
/// index of the object that was hit.
pub fn closest_hit<H: Hittable>(
    objects: &[H],
    ray: &RayDescriptor,
    ray_t: Interval,
    rec: &mut HitRecord,
) -> bool {
    let mut hit_anything = false;
    let mut closest_so_far = ray_t.max;

    for (index, object) in objects.iter().enumerate() {
        let interval = Interval::new(ray_t.min, closest_so_far);
        if object.hit(ray, interval, rec) {
            hit_anything = true;
            closest_so_far = rec.t;
            rec.object = index;
        }
    }

    hit_anything
}
