//! Batched evaluation on an external device.
//!
//! The device path reads the whole ray stream into a [`RayCache`], makes one
//! blocking [`BatchDevice::batch_evaluate`] call, then replays the results in
//! input order.

use std::time::Duration;

use raypipe_math::{Color, RayDescriptor};
use thiserror::Error;

use crate::contrib::ContributionTracer;
use crate::error::PipelineError;
use crate::evaluated::EvaluatedRay;

/// Capacity of the ray cache when the number of rays is not known.
pub const DEFAULT_CACHE_CAPACITY: usize = 8;

/// Errors reported by a batch device. A failed call produces no results.
#[derive(Error, Debug)]
pub enum DeviceError {
    #[error("device evaluation failed: {0}")]
    Failed(String),

    #[error("device returned {got} results for {expected} rays")]
    ResultCount { expected: usize, got: usize },
}

/// Shape and flags for one batch call.
#[derive(Debug, Clone, PartialEq)]
pub struct BatchParams {
    pub width: usize,
    pub height: usize,
    /// Rays summed into each output record
    pub depth: usize,
    pub immediate_irradiance: bool,
    pub limit_distance: bool,
    /// Bins hold coefficient times value rather than coefficients
    pub contribution: bool,
    pub total_bins: usize,
    /// How often the device may log progress during the call
    pub report_interval: Option<Duration>,
}

impl Default for BatchParams {
    fn default() -> Self {
        Self {
            width: 1,
            height: 0,
            depth: 1,
            immediate_irradiance: false,
            limit_distance: false,
            contribution: false,
            total_bins: 0,
            report_interval: None,
        }
    }
}

/// Output of a batch call, in the order of the submitted rays.
#[derive(Debug, Clone, PartialEq)]
pub enum BatchResults {
    /// One shading tree per entry
    Rays(Vec<EvaluatedRay>),
    /// `total_bins` colors per entry
    Bins(Vec<Color>),
}

impl BatchResults {
    /// Check the result size against the submitted batch.
    pub fn validate(&self, rays: usize, total_bins: usize) -> Result<(), DeviceError> {
        let (expected, got) = match self {
            BatchResults::Rays(results) => (rays, results.len()),
            BatchResults::Bins(bins) => (rays * total_bins, bins.len()),
        };
        if expected == got {
            Ok(())
        } else {
            Err(DeviceError::ResultCount { expected, got })
        }
    }
}

/// A device that evaluates a whole ray array in one call.
///
/// Entries for which [`RayDescriptor::is_flush_marker`] holds are left
/// unevaluated. With a tracer the device returns [`BatchResults::Bins`],
/// otherwise [`BatchResults::Rays`].
pub trait BatchDevice {
    fn batch_evaluate(
        &mut self,
        params: &BatchParams,
        rays: &[RayDescriptor],
        tracer: Option<&ContributionTracer>,
    ) -> Result<BatchResults, DeviceError>;
}

/// Growable array of rays waiting for the device.
///
/// Starts at the expected ray count (or [`DEFAULT_CACHE_CAPACITY`]) and
/// doubles whenever it fills up.
#[derive(Debug)]
pub struct RayCache {
    rays: Vec<RayDescriptor>,
    capacity: usize,
    growths: usize,
}

impl RayCache {
    pub fn new(expected: Option<u64>) -> Result<Self, PipelineError> {
        let capacity = expected
            .and_then(|n| usize::try_from(n).ok())
            .filter(|&n| n > 0)
            .unwrap_or(DEFAULT_CACHE_CAPACITY);
        let mut rays = Vec::new();
        rays.try_reserve_exact(capacity)
            .map_err(|_| PipelineError::OutOfMemory { requested: capacity })?;
        Ok(Self {
            rays,
            capacity,
            growths: 0,
        })
    }

    pub fn push(&mut self, ray: RayDescriptor) -> Result<(), PipelineError> {
        if self.rays.len() == self.capacity {
            let requested = self.capacity * 2;
            self.rays
                .try_reserve_exact(requested - self.rays.len())
                .map_err(|_| PipelineError::OutOfMemory { requested })?;
            self.capacity = requested;
            self.growths += 1;
        }
        self.rays.push(ray);
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.rays.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rays.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Number of times the cache doubled.
    pub fn growths(&self) -> usize {
        self.growths
    }

    /// Entries that are real rays rather than flush markers.
    pub fn ray_count(&self) -> usize {
        self.rays.iter().filter(|r| !r.is_flush_marker()).count()
    }

    pub fn as_slice(&self) -> &[RayDescriptor] {
        &self.rays
    }
}
