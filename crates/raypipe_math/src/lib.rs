// Re-export glam for convenience
pub use glam::*;

// raypipe math types
mod interval;
mod ray;
pub use interval::Interval;
pub use ray::RayDescriptor;

/// RGB color with double precision components.
pub type Color = DVec3;

/// Shorthand for a black color.
pub const BLACK: Color = DVec3::ZERO;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dvec3_creation() {
        let v = DVec3::new(1.0, 2.0, 3.0);
        assert_eq!(v.x, 1.0);
        assert_eq!(v.y, 2.0);
        assert_eq!(v.z, 3.0);
    }

    #[test]
    fn test_color_is_componentwise() {
        let a = Color::new(1.0, 0.5, 0.25);
        let b = Color::new(2.0, 2.0, 4.0);
        assert_eq!(a * b, Color::new(2.0, 1.0, 1.0));
        assert_eq!(BLACK + a, a);
    }
}
