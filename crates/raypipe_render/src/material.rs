//! Surface behaviors of the reference engine.

use raypipe_math::{Color, DVec3};
use serde::{Deserialize, Serialize};

/// How a modifier shades the surfaces it governs.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Material {
    /// Emits `color`; the target of shadow rays.
    Light { color: Color },
    /// Diffuse: one shadow ray per light plus the scene's ambient term.
    Plastic { color: Color },
    /// Perfect mirror: one reflected ray.
    Mirror { color: Color },
    /// Clear dielectric: one transmitted ray.
    Glass {
        color: Color,
        #[serde(default = "default_ior")]
        ior: f64,
    },
}

fn default_ior() -> f64 {
    1.52
}

impl Material {
    pub fn color(&self) -> Color {
        match *self {
            Material::Light { color }
            | Material::Plastic { color }
            | Material::Mirror { color }
            | Material::Glass { color, .. } => color,
        }
    }

    pub fn is_light(&self) -> bool {
        matches!(self, Material::Light { .. })
    }

    /// Light leaving the surface on its own.
    pub fn emitted(&self) -> Color {
        match *self {
            Material::Light { color } => color,
            _ => Color::ZERO,
        }
    }
}

/// Reflect a vector about a normal.
#[inline]
pub fn reflect(v: DVec3, n: DVec3) -> DVec3 {
    v - 2.0 * v.dot(n) * n
}

/// Refract a vector through a surface.
#[inline]
pub fn refract(uv: DVec3, n: DVec3, etai_over_etat: f64) -> DVec3 {
    let cos_theta = (-uv).dot(n).min(1.0);
    let r_out_perp = etai_over_etat * (uv + cos_theta * n);
    let r_out_parallel = -(1.0 - r_out_perp.length_squared()).abs().sqrt() * n;
    r_out_perp + r_out_parallel
}

/// Direction leaving a dielectric, falling back to reflection past the
/// critical angle.
pub fn transmit(direction: DVec3, normal: DVec3, front_face: bool, ior: f64) -> DVec3 {
    let ratio = if front_face { 1.0 / ior } else { ior };
    let cos_theta = (-direction).dot(normal).min(1.0);
    let sin_theta = (1.0 - cos_theta * cos_theta).sqrt();
    if ratio * sin_theta > 1.0 {
        reflect(direction, normal)
    } else {
        refract(direction, normal, ratio).normalize()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reflect() {
        let v = DVec3::new(1.0, -1.0, 0.0);
        assert_eq!(reflect(v, DVec3::Y), DVec3::new(1.0, 1.0, 0.0));
    }

    #[test]
    fn test_normal_incidence_passes_straight() {
        let d = transmit(-DVec3::Z, DVec3::Z, true, 1.5);
        assert!((d - -DVec3::Z).length() < 1e-12);
    }

    #[test]
    fn test_total_internal_reflection() {
        let d = DVec3::new(0.9, -0.1, 0.0).normalize();
        let out = transmit(d, DVec3::Y, false, 1.5);
        assert!(out.y > 0.0);
    }

    #[test]
    fn test_material_from_json() {
        let m: Material = serde_json::from_str(r#"{"type": "glass", "color": [1, 1, 1]}"#).unwrap();
        assert_eq!(
            m,
            Material::Glass {
                color: Color::ONE,
                ior: 1.52
            }
        );
        assert!(!m.is_light());
        assert_eq!(m.emitted(), Color::ZERO);
    }
}
