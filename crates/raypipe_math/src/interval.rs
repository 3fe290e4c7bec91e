/// Range of ray parameters accepted as a hit.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Interval {
    pub min: f64,
    pub max: f64,
}

impl Interval {
    pub fn new(min: f64, max: f64) -> Self {
        Self { min, max }
    }

    /// True if x lies strictly between the bounds.
    pub fn surrounds(&self, x: f64) -> bool {
        self.min < x && x < self.max
    }
}
