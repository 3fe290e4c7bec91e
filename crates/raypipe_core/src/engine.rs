//! Interface to the scene evaluation engine.

use raypipe_math::RayDescriptor;

use crate::evaluated::EvaluatedRay;

/// Ray evaluation engine used by every execution strategy.
///
/// Implementations must be shareable between worker threads; evaluation of
/// one ray must not depend on rays evaluated before it.
pub trait Evaluator: Send + Sync {
    /// Trace and shade a ray.
    fn evaluate(&self, ray: &RayDescriptor) -> EvaluatedRay;

    /// Find the first intersection only, without shading.
    fn cast_only(&self, ray: &RayDescriptor) -> EvaluatedRay;

    /// Treat the ray origin as a surface point facing along the direction and
    /// compute the irradiance arriving there.
    fn evaluate_irradiance(&self, ray: &RayDescriptor) -> EvaluatedRay;
}

/// Which engine entry point a run uses for every ray.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EvalMode {
    #[default]
    Radiance,
    Irradiance,
    CastOnly,
}

impl EvalMode {
    pub fn evaluate(self, engine: &dyn Evaluator, ray: &RayDescriptor) -> EvaluatedRay {
        match self {
            EvalMode::Radiance => engine.evaluate(ray),
            EvalMode::Irradiance => engine.evaluate_irradiance(ray),
            EvalMode::CastOnly => engine.cast_only(ray),
        }
    }
}
