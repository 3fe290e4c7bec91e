//! Reference evaluation engine over a sphere scene.
//!
//! Shading is deterministic: diffuse surfaces send one shadow ray to each
//! light and add a constant ambient term, mirrors and glass spawn a single
//! reflected or transmitted ray.

use std::f64::consts::PI;

use raypipe_core::evaluated::{EvaluatedRay, RayKind, SurfaceHit, TreeBuilder};
use raypipe_core::Evaluator;
use raypipe_math::{Color, DVec2, DVec3, Interval, RayDescriptor};

use crate::hittable::{closest_hit, HitRecord};
use crate::material::{reflect, transmit, Material};
use crate::scene::Scene;

/// Offset keeping spawned rays off the surface they leave.
const RAY_EPSILON: f64 = 1e-6;

/// Surface name reported for the irradiance probe.
const PROBE_SURFACE: &str = "probe";

/// Evaluates rays against a [`Scene`].
#[derive(Debug, Clone)]
pub struct SceneEngine {
    scene: Scene,
}

impl SceneEngine {
    pub fn new(scene: Scene) -> Self {
        Self { scene }
    }

    pub fn scene(&self) -> &Scene {
        &self.scene
    }

    fn intersect(&self, ray: &RayDescriptor) -> Option<HitRecord> {
        let mut rec = HitRecord::default();
        let range = Interval::new(RAY_EPSILON, ray.limit());
        closest_hit(&self.scene.spheres, ray, range, &mut rec).then_some(rec)
    }

    fn surface_hit(&self, rec: &HitRecord) -> SurfaceHit {
        let sphere = &self.scene.spheres[rec.object];
        let modifier = self.scene.modifier_of(rec.object).map(|(name, _)| name.clone());
        SurfaceHit {
            point: rec.p,
            distance: rec.t,
            normal: rec.normal,
            unperturbed_normal: rec.normal,
            flipped: !rec.front_face,
            uv: rec.uv,
            surface: sphere.name.clone(),
            material: modifier.clone(),
            modifier,
        }
    }

    /// Trace one ray into `tree`, shading it unless `shade` is false.
    /// Returns the ray's index and the object it hit.
    fn trace(
        &self,
        tree: &mut TreeBuilder,
        ray: RayDescriptor,
        lineage: Lineage,
        depth: u32,
        shade: bool,
    ) -> (usize, Option<usize>) {
        let index = tree.spawn(ray, lineage.kind, lineage.parent);
        {
            let traced = tree.get_mut(index);
            traced.weight = lineage.weight;
            traced.coefficient = lineage.coefficient;
        }

        let Some(rec) = self.intersect(&ray) else {
            tree.get_mut(index).color = self.scene.background;
            tree.complete(index);
            return (index, None);
        };
        let hit = self.surface_hit(&rec);
        let traced = tree.get_mut(index);
        traced.effective_distance = rec.t;
        traced.hit = Some(hit);

        if shade {
            self.shade(tree, index, &rec, depth);
        }
        tree.complete(index);
        (index, Some(rec.object))
    }

    fn shade(&self, tree: &mut TreeBuilder, index: usize, rec: &HitRecord, depth: u32) {
        let Some((_, material)) = self.scene.modifier_of(rec.object) else {
            return;
        };
        let can_spawn = depth < self.scene.max_depth;
        let direction = tree.get(index).ray.direction;

        match *material {
            Material::Light { color } => {
                tree.get_mut(index).color = color;
            }
            Material::Plastic { color } => {
                let mut value = color * self.scene.ambient;
                if can_spawn {
                    value += self.direct_light(tree, index, rec.p, rec.normal, color, depth);
                }
                tree.get_mut(index).color = value;
            }
            Material::Mirror { color } => {
                let lineage = Lineage::child(tree, index, RayKind::Reflected, color);
                if can_spawn && lineage.weight >= self.scene.min_weight {
                    let reflected = RayDescriptor::new(rec.p, reflect(direction, rec.normal).normalize());
                    let (child, _) = self.trace(tree, reflected, lineage, depth + 1, true);
                    let child = tree.get(child);
                    let (value, distance, effective) =
                        (color * child.color, child.distance(), child.effective_distance);
                    let traced = tree.get_mut(index);
                    traced.color = value;
                    traced.mirror_color = value;
                    traced.mirror_distance = distance;
                    traced.effective_distance = rec.t + effective;
                }
            }
            Material::Glass { color, ior } => {
                let lineage = Lineage::child(tree, index, RayKind::Transmitted, color);
                if can_spawn && lineage.weight >= self.scene.min_weight {
                    let out = transmit(direction, rec.normal, rec.front_face, ior);
                    let (child, _) = self.trace(tree, RayDescriptor::new(rec.p, out), lineage, depth + 1, true);
                    let child = tree.get(child);
                    let (value, distance, effective) =
                        (color * child.color, child.distance(), child.effective_distance);
                    let traced = tree.get_mut(index);
                    traced.color = value;
                    traced.transmit_distance = distance;
                    traced.effective_distance = rec.t + effective;
                }
            }
        }
    }

    /// Light arriving from every light sphere at a diffuse point, times
    /// `albedo`.
    fn direct_light(
        &self,
        tree: &mut TreeBuilder,
        index: usize,
        point: DVec3,
        normal: DVec3,
        albedo: Color,
        depth: u32,
    ) -> Color {
        let mut total = Color::ZERO;
        for &light in &self.scene.lights {
            let sphere = &self.scene.spheres[light];
            let to_light = sphere.center - point;
            let distance = to_light.length();
            if distance <= sphere.radius {
                continue;
            }
            let direction = to_light / distance;
            let cosine = direction.dot(normal);
            if cosine <= 0.0 {
                continue;
            }
            let factor = albedo * (cosine * sphere.solid_angle(point) / PI);
            let lineage = Lineage::child(tree, index, RayKind::Shadow, factor);
            if lineage.weight < self.scene.min_weight {
                continue;
            }

            let shadow = RayDescriptor::new(point, direction).with_max_distance(Some(distance));
            let (child, object) = self.trace(tree, shadow, lineage, depth + 1, false);
            let traced = tree.get_mut(child);
            if object == Some(light) {
                traced.color = self.scene.modifier_of(light).map_or(Color::ZERO, |(_, m)| m.emitted());
                total += factor * traced.color;
            } else {
                traced.source_miss = true;
            }
        }
        total
    }
}

/// Where a ray sits in its shading tree.
#[derive(Debug, Clone, Copy)]
struct Lineage {
    kind: RayKind,
    parent: Option<usize>,
    weight: f64,
    coefficient: Color,
}

impl Lineage {
    const PRIMARY: Lineage = Lineage {
        kind: RayKind::Primary,
        parent: None,
        weight: 1.0,
        coefficient: Color::ONE,
    };

    /// Child of ray `parent` whose value is scaled by `reflectance`.
    fn child(tree: &TreeBuilder, parent: usize, kind: RayKind, reflectance: Color) -> Self {
        let p = tree.get(parent);
        Self {
            kind,
            parent: Some(parent),
            weight: p.weight * reflectance.max_element(),
            coefficient: p.coefficient * reflectance,
        }
    }
}

impl Evaluator for SceneEngine {
    fn evaluate(&self, ray: &RayDescriptor) -> EvaluatedRay {
        let mut tree = TreeBuilder::new();
        self.trace(&mut tree, *ray, Lineage::PRIMARY, 0, true);
        tree.finish()
    }

    fn cast_only(&self, ray: &RayDescriptor) -> EvaluatedRay {
        let mut tree = TreeBuilder::new();
        self.trace(&mut tree, *ray, Lineage::PRIMARY, 0, false);
        tree.finish()
    }

    fn evaluate_irradiance(&self, ray: &RayDescriptor) -> EvaluatedRay {
        let mut tree = TreeBuilder::new();
        let index = tree.spawn(*ray, RayKind::Primary, None);
        let normal = ray.direction;
        tree.get_mut(index).hit = Some(SurfaceHit {
            point: ray.origin,
            distance: 0.0,
            normal,
            unperturbed_normal: normal,
            flipped: false,
            uv: DVec2::ZERO,
            surface: PROBE_SURFACE.to_string(),
            modifier: None,
            material: None,
        });
        // White Lambertian probe
        let mut value = self.scene.ambient;
        value += self.direct_light(&mut tree, index, ray.origin, normal, Color::ONE, 0);
        let traced = tree.get_mut(index);
        traced.color = value;
        traced.effective_distance = 0.0;
        tree.complete(index);
        tree.finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use raypipe_core::NO_HIT_DISTANCE;

    const SCENE: &str = r#"{
        "modifiers": [
            { "name": "sun", "type": "light", "color": [50, 50, 50] },
            { "name": "paint", "type": "plastic", "color": [0.5, 0.5, 0.5] },
            { "name": "chrome", "type": "mirror", "color": [0.8, 0.8, 0.8] },
            { "name": "pane", "type": "glass", "color": [0.9, 0.9, 0.9] }
        ],
        "spheres": [
            { "name": "sun_disk", "modifier": "sun", "center": [0, 20, -4], "radius": 2 },
            { "name": "ball", "modifier": "paint", "center": [0, 0, -4], "radius": 1 },
            { "name": "mirror_ball", "modifier": "chrome", "center": [4, 0, 0], "radius": 1 },
            { "name": "lens", "modifier": "pane", "center": [-4, 0, 0], "radius": 1 }
        ],
        "ambient": [0.1, 0.1, 0.1]
    }"#;

    fn engine() -> SceneEngine {
        SceneEngine::new(Scene::from_json(SCENE).unwrap())
    }

    fn ray(direction: DVec3) -> RayDescriptor {
        RayDescriptor::new(DVec3::ZERO, direction.normalize())
    }

    #[test]
    fn test_miss_reports_background() {
        let evaluated = engine().evaluate(&ray(-DVec3::Y));
        assert_eq!(evaluated.len(), 1);
        assert_eq!(evaluated.primary().distance(), NO_HIT_DISTANCE);
        assert_eq!(evaluated.primary().color, Color::ZERO);
    }

    #[test]
    fn test_diffuse_hit_sends_shadow_ray() {
        // Top of the ball faces the sun
        let start = RayDescriptor::new(DVec3::new(0.0, 3.0, -4.0), -DVec3::Y);
        let evaluated = engine().evaluate(&start);
        let primary = evaluated.primary();
        assert_eq!(primary.modifier(), Some("paint"));
        assert!((primary.distance() - 2.0).abs() < 1e-9);

        let shadows: Vec<_> = evaluated.rays().iter().filter(|r| r.kind == RayKind::Shadow).collect();
        assert_eq!(shadows.len(), 1);
        let shadow = shadows[0];
        assert!(!shadow.source_miss);
        assert_eq!(shadow.modifier(), Some("sun"));
        assert_eq!(shadow.color, Color::splat(50.0));
        // Coefficient times value reproduces the direct part of the primary value
        let ambient = Color::splat(0.05);
        assert!((primary.color - ambient - shadow.contribution()).length() < 1e-12);

        let order: Vec<usize> = evaluated.completion_order().map(|(i, _)| i).collect();
        assert_eq!(*order.last().unwrap(), 0);
    }

    #[test]
    fn test_blocked_shadow_ray_misses_source() {
        // The ball sits between the probe and the sun
        let probe = RayDescriptor::new(DVec3::new(0.0, -3.0, -4.0), DVec3::Y);
        let evaluated = engine().evaluate_irradiance(&probe);
        let shadow = evaluated
            .rays()
            .iter()
            .find(|r| r.kind == RayKind::Shadow)
            .unwrap();
        assert!(shadow.source_miss);
        assert_eq!(shadow.modifier(), Some("paint"));
        assert_eq!(evaluated.primary().color, Color::splat(0.1));
    }

    #[test]
    fn test_mirror_records_reflection() {
        let evaluated = engine().evaluate(&ray(DVec3::X));
        let primary = evaluated.primary();
        assert_eq!(primary.modifier(), Some("chrome"));
        let child = &evaluated.rays()[1];
        assert_eq!(child.kind, RayKind::Reflected);
        assert_eq!(child.parent, Some(0));
        assert_eq!(child.coefficient, Color::splat(0.8));
        // Reflected straight back past the origin onto the lens
        assert_eq!(child.modifier(), Some("pane"));
        assert!((primary.mirror_distance - 6.0).abs() < 1e-9);
        assert_eq!(primary.mirror_color, primary.color);
        assert!(primary.effective_distance > 9.0);
    }

    #[test]
    fn test_glass_transmits() {
        let evaluated = engine().evaluate(&ray(-DVec3::X));
        assert_eq!(evaluated.primary().modifier(), Some("pane"));
        let child = &evaluated.rays()[1];
        assert_eq!(child.kind, RayKind::Transmitted);
        assert_eq!(evaluated.depth(1), 1);
        // Leaves through the back of the same sphere
        assert_eq!(child.modifier(), Some("pane"));
        assert!(child.hit.as_ref().unwrap().flipped);
    }

    #[test]
    fn test_cast_only_skips_shading() {
        let start = RayDescriptor::new(DVec3::new(0.0, 3.0, -4.0), -DVec3::Y);
        let evaluated = engine().cast_only(&start);
        assert_eq!(evaluated.len(), 1);
        assert_eq!(evaluated.primary().color, Color::ZERO);
        assert_eq!(evaluated.primary().hit.as_ref().unwrap().surface, "ball");
    }

    #[test]
    fn test_irradiance_probe_facing_light() {
        let probe = RayDescriptor::new(DVec3::new(0.0, 10.0, -4.0), DVec3::Y);
        let evaluated = engine().evaluate_irradiance(&probe);
        let primary = evaluated.primary();
        assert_eq!(primary.modifier(), None);
        assert!(primary.color.x > 0.1);
        let shadow = &evaluated.rays()[1];
        assert_eq!(shadow.modifier(), Some("sun"));
        assert!(!shadow.source_miss);
    }

    #[test]
    fn test_limited_ray_stops_short() {
        let limited = RayDescriptor::new(DVec3::new(0.0, 3.0, -4.0), -DVec3::Y).with_max_distance(Some(1.5));
        let evaluated = engine().evaluate(&limited);
        assert!(evaluated.primary().hit.is_none());
    }
}
