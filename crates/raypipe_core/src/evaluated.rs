//! Evaluation results handed from the engine to the output stage.
//!
//! A primary ray evaluates into a small tree of traced rays (shadow probes,
//! reflections, transmissions). The tree is stored flat: rays are kept in
//! spawn order with explicit parent links, and the order in which they
//! finished is recorded separately for trace output.

use raypipe_math::{Color, DVec2, DVec3, RayDescriptor, BLACK};

/// Distance reported for rays that hit nothing.
pub const NO_HIT_DISTANCE: f64 = 1e10;

/// Why a ray was spawned.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RayKind {
    #[default]
    Primary,
    Shadow,
    Reflected,
    Transmitted,
    Ambient,
}

/// Surface information for a ray that struck something.
#[derive(Debug, Clone, PartialEq)]
pub struct SurfaceHit {
    /// Intersection point
    pub point: DVec3,
    /// Distance from the ray origin to the point
    pub distance: f64,
    /// Shading (perturbed) normal
    pub normal: DVec3,
    /// Geometric normal as stored with the surface
    pub unperturbed_normal: DVec3,
    /// True when the normal was flipped to face the ray
    pub flipped: bool,
    /// Local surface coordinates
    pub uv: DVec2,
    /// Name of the surface that was hit
    pub surface: String,
    /// Modifier governing the surface, `None` for void
    pub modifier: Option<String>,
    /// Material found by following the modifier chain, `None` for void
    pub material: Option<String>,
}

impl SurfaceHit {
    /// Normal as stored with the surface, with any flip undone.
    pub fn stored_normal(&self) -> DVec3 {
        if self.flipped {
            -self.unperturbed_normal
        } else {
            self.unperturbed_normal
        }
    }
}

/// One ray of a shading tree and everything the output stage may ask about it.
#[derive(Debug, Clone, PartialEq)]
pub struct TracedRay {
    pub ray: RayDescriptor,
    pub kind: RayKind,
    /// Index of the ray that spawned this one
    pub parent: Option<usize>,
    pub hit: Option<SurfaceHit>,
    /// Value computed for the ray
    pub color: Color,
    /// Part of `color` arriving through mirror reflection
    pub mirror_color: Color,
    pub mirror_distance: f64,
    pub transmit_distance: f64,
    /// Distance to the visible object, following transparent and mirrored paths
    pub effective_distance: f64,
    pub weight: f64,
    /// Product of reflectances from the primary ray down to this one
    pub coefficient: Color,
    /// Shadow ray that ended on something other than its source
    pub source_miss: bool,
}

impl TracedRay {
    pub fn new(ray: RayDescriptor, kind: RayKind) -> Self {
        Self {
            ray,
            kind,
            parent: None,
            hit: None,
            color: BLACK,
            mirror_color: BLACK,
            mirror_distance: NO_HIT_DISTANCE,
            transmit_distance: NO_HIT_DISTANCE,
            effective_distance: NO_HIT_DISTANCE,
            weight: 1.0,
            coefficient: Color::ONE,
            source_miss: false,
        }
    }

    /// Distance to the first intersection, [`NO_HIT_DISTANCE`] on a miss.
    pub fn distance(&self) -> f64 {
        self.hit.as_ref().map_or(NO_HIT_DISTANCE, |h| h.distance)
    }

    /// Modifier of the surface that was hit, if any and not void.
    pub fn modifier(&self) -> Option<&str> {
        self.hit.as_ref().and_then(|h| h.modifier.as_deref())
    }

    /// Coefficient times value: what this ray adds to the primary result.
    pub fn contribution(&self) -> Color {
        self.coefficient * self.color
    }
}

/// The evaluated shading tree of one primary ray.
#[derive(Debug, Clone, PartialEq)]
pub struct EvaluatedRay {
    rays: Vec<TracedRay>,
    completed: Vec<usize>,
}

impl EvaluatedRay {
    /// A tree made of the primary ray alone.
    pub fn new(primary: TracedRay) -> Self {
        Self {
            rays: vec![primary],
            completed: vec![0],
        }
    }

    /// Record for a ray that was never evaluated.
    pub fn unevaluated(ray: RayDescriptor) -> Self {
        Self::new(TracedRay::new(ray, RayKind::Primary))
    }

    pub fn primary(&self) -> &TracedRay {
        &self.rays[0]
    }

    /// Rays in spawn order; the primary ray comes first.
    pub fn rays(&self) -> &[TracedRay] {
        &self.rays
    }

    pub fn len(&self) -> usize {
        self.rays.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rays.is_empty()
    }

    /// Rays in the order they finished: children before their parent, the
    /// primary ray last.
    pub fn completion_order(&self) -> impl Iterator<Item = (usize, &TracedRay)> + '_ {
        self.completed.iter().map(move |&i| (i, &self.rays[i]))
    }

    /// Number of ancestors of ray `index`.
    pub fn depth(&self, index: usize) -> usize {
        let mut depth = 0;
        let mut current = self.rays[index].parent;
        while let Some(parent) = current {
            depth += 1;
            current = self.rays[parent].parent;
        }
        depth
    }
}

/// Incremental construction of an [`EvaluatedRay`] by an engine.
///
/// Rays get their index when spawned, so children can point at a parent
/// that is still being shaded.
#[derive(Debug, Default)]
pub struct TreeBuilder {
    rays: Vec<TracedRay>,
    completed: Vec<usize>,
}

impl TreeBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a ray to the tree and return its index.
    pub fn spawn(&mut self, ray: RayDescriptor, kind: RayKind, parent: Option<usize>) -> usize {
        let mut traced = TracedRay::new(ray, kind);
        traced.parent = parent;
        self.rays.push(traced);
        self.rays.len() - 1
    }

    pub fn get(&self, index: usize) -> &TracedRay {
        &self.rays[index]
    }

    pub fn get_mut(&mut self, index: usize) -> &mut TracedRay {
        &mut self.rays[index]
    }

    /// Mark ray `index` as finished.
    pub fn complete(&mut self, index: usize) {
        debug_assert!(!self.completed.contains(&index));
        self.completed.push(index);
    }

    /// Build the tree. Rays never marked complete are appended in spawn order.
    pub fn finish(mut self) -> EvaluatedRay {
        assert!(!self.rays.is_empty(), "shading tree without a primary ray");
        if self.completed.len() < self.rays.len() {
            for i in 0..self.rays.len() {
                if !self.completed.contains(&i) {
                    self.completed.push(i);
                }
            }
        }
        EvaluatedRay {
            rays: self.rays,
            completed: self.completed,
        }
    }
}
