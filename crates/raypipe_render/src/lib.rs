//! raypipe reference renderer
//!
//! A small deterministic ray tracer over sphere scenes, used to drive the
//! `rtrace` and `rcontrib` pipelines end to end. It makes no attempt at
//! physical accuracy.

mod device;
mod engine;
mod hittable;
mod material;
mod scene;
mod sphere;

pub use device::CpuDevice;
pub use engine::SceneEngine;
pub use hittable::{closest_hit, HitRecord, Hittable};
pub use material::Material;
pub use scene::{ModifierDef, Scene, SceneDescription, SceneError, SphereDef};
pub use sphere::Sphere;
