use crate::DVec3;

/// A ray read from the input stream: origin, unit direction and an optional
/// maximum distance.
///
/// A zero direction is reserved for the flush sentinel. The only way to
/// build one is [`RayDescriptor::flush_marker`], which the batched device
/// path uses to keep a flush at its position in the ray cache.
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct RayDescriptor {
    pub origin: DVec3,
    pub direction: DVec3,
    pub max_distance: Option<f64>,
}

impl RayDescriptor {
    /// Create a new ray. `direction` is expected to be normalized already.
    pub fn new(origin: DVec3, direction: DVec3) -> Self {
        Self {
            origin,
            direction,
            max_distance: None,
        }
    }

    /// Build a ray from the raw vectors found in the input stream.
    ///
    /// The direction is normalized. When `limit_distance` is set, its original
    /// length becomes the maximum distance. Returns `None` when the direction
    /// has zero length, which marks a flush request.
    pub fn from_raw(origin: DVec3, direction: DVec3, limit_distance: bool) -> Option<Self> {
        let length = direction.length();
        if length == 0.0 {
            return None;
        }
        Some(Self {
            origin,
            direction: direction / length,
            max_distance: limit_distance.then_some(length),
        })
    }

    /// Placeholder entry standing for a flush request.
    pub fn flush_marker() -> Self {
        Self {
            origin: DVec3::ZERO,
            direction: DVec3::ZERO,
            max_distance: None,
        }
    }

    /// True for the entry built by [`RayDescriptor::flush_marker`].
    #[inline]
    pub fn is_flush_marker(&self) -> bool {
        self.direction == DVec3::ZERO
    }

    /// Same ray with a different maximum distance.
    pub fn with_max_distance(mut self, max_distance: Option<f64>) -> Self {
        self.max_distance = max_distance;
        self
    }

    /// Farthest parameter a hit may have along this ray.
    #[inline]
    pub fn limit(&self) -> f64 {
        match self.max_distance {
            Some(d) if d > 0.0 => d,
            _ => f64::INFINITY,
        }
    }

    /// Get the point along the ray at parameter t.
    ///
    /// Returns: origin + t * direction
    #[inline]
    pub fn at(&self, t: f64) -> DVec3 {
        self.origin + self.direction * t
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_raw_normalizes() {
        let ray = RayDescriptor::from_raw(DVec3::ONE, DVec3::new(0.0, 3.0, 4.0), false).unwrap();
        assert_eq!(ray.origin, DVec3::ONE);
        assert!((ray.direction.length() - 1.0).abs() < 1e-12);
        assert_eq!(ray.direction, DVec3::new(0.0, 0.6, 0.8));
        assert_eq!(ray.max_distance, None);
    }

    #[test]
    fn test_from_raw_limit_distance() {
        let ray = RayDescriptor::from_raw(DVec3::ZERO, DVec3::new(0.0, 0.0, 2.5), true).unwrap();
        assert_eq!(ray.max_distance, Some(2.5));
        assert_eq!(ray.limit(), 2.5);
    }

    #[test]
    fn test_zero_direction_is_flush() {
        assert!(RayDescriptor::from_raw(DVec3::ONE, DVec3::ZERO, false).is_none());
        assert!(RayDescriptor::flush_marker().is_flush_marker());
    }

    #[test]
    fn test_ray_at() {
        let ray = RayDescriptor::new(DVec3::ZERO, DVec3::X);

        assert_eq!(ray.at(0.0), DVec3::ZERO);
        assert_eq!(ray.at(2.0), DVec3::new(2.0, 0.0, 0.0));
        assert_eq!(ray.at(-1.0), DVec3::new(-1.0, 0.0, 0.0));
        assert_eq!(ray.limit(), f64::INFINITY);
    }
}
