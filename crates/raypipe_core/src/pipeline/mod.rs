//! Execution strategies that turn a ray stream into ordered results.
//!
//! Every strategy reads rays on the calling thread and hands results to a
//! [`ResultSink`] strictly in input order:
//!
//! - **Sequential**: evaluate each ray in turn
//! - **Pool**: scoped worker threads with a reorder buffer
//! - **Device**: cache every ray, make one batch call, replay the results
//!
//! [`run_trace`] and [`run_contrib`] pick a strategy and wire the output
//! stage for the two renderers.

mod contrib;
mod pool;
mod sequential;
mod trace;

use raypipe_math::RayDescriptor;

use crate::error::{PipelineError, PipelineResult};

pub use contrib::{run_contrib, ContribConfig};
pub use pool::run_pool;
pub use sequential::run_sequential;
pub use trace::{run_trace, TraceConfig};

/// Work done for every ray. Shared by reference between workers.
pub trait RayJob: Sync {
    type Output: Send;

    fn run(&self, ray: &RayDescriptor) -> Self::Output;
}

/// Receives results in input order.
pub trait ResultSink<T> {
    fn deliver(&mut self, result: T) -> PipelineResult<()>;

    /// Flush request read from the input.
    fn flush(&mut self) -> PipelineResult<()>;
}

/// How a run evaluates its rays.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strategy {
    Sequential,
    Pool { workers: usize },
    Device,
}

impl Strategy {
    pub fn choose(workers: usize, device: bool) -> PipelineResult<Self> {
        match (device, workers) {
            (true, w) if w > 1 => Err(PipelineError::Config(
                "multiprocessing incompatible with device implementation".into(),
            )),
            (true, _) => Ok(Strategy::Device),
            (false, 0 | 1) => Ok(Strategy::Sequential),
            (false, workers) => Ok(Strategy::Pool { workers }),
        }
    }
}

/// Row accounting derived from the declared resolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct StreamPlan {
    /// Rays to read before stopping; reading to end of input when `None`
    pub expected_rays: Option<u64>,
    /// Records between output flushes
    pub flush_interval: Option<u64>,
}

impl StreamPlan {
    /// Plan for an `x` by `y` resolution. Each record sums `accumulate` rays
    /// when it is greater than one.
    pub fn new(x: u32, y: u32, accumulate: i32) -> Self {
        let (x, y) = (u64::from(x), u64::from(y));
        let expected_rays = (y > 0).then(|| {
            let rows = if x > 1 { x * y } else { y };
            if accumulate > 1 {
                rows * accumulate as u64
            } else {
                rows
            }
        });
        let full_resolution = y > 0 && x > 1;
        let flush_interval = (x > 0 && !full_resolution).then_some(x);
        Self {
            expected_rays,
            flush_interval,
        }
    }

    /// True once `rays` satisfies the expected count.
    pub fn is_complete(&self, rays: u64) -> bool {
        self.expected_rays.is_some_and(|n| rays >= n)
    }

    /// Fail with an unexpected end of input if fewer rays than expected
    /// were read.
    pub fn check_complete(&self, rays: u64) -> PipelineResult<()> {
        match self.expected_rays {
            Some(n) if rays < n => Err(PipelineError::UnexpectedEof { remaining: n - rays }),
            _ => Ok(()),
        }
    }

    /// Reduce a worker count to the flush interval.
    pub fn limit_workers(&self, workers: usize) -> usize {
        match self.flush_interval {
            Some(interval) if workers as u64 > interval => {
                log::warn!("reducing number of processes to match flush interval");
                interval as usize
            }
            _ => workers,
        }
    }
}

/// Counts of what a strategy read.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct StreamStats {
    pub rays: u64,
    pub flushes: u64,
}

/// What a completed run produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RunSummary {
    pub rays: u64,
    pub records: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plan_without_resolution() {
        let plan = StreamPlan::new(0, 0, 1);
        assert_eq!(plan.expected_rays, None);
        assert_eq!(plan.flush_interval, None);
        assert!(!plan.is_complete(1_000_000));
        assert!(plan.check_complete(0).is_ok());
    }

    #[test]
    fn test_plan_with_full_resolution() {
        let plan = StreamPlan::new(4, 3, 1);
        assert_eq!(plan.expected_rays, Some(12));
        assert_eq!(plan.flush_interval, None);
        assert!(plan.is_complete(12));
        assert!(matches!(
            plan.check_complete(10),
            Err(PipelineError::UnexpectedEof { remaining: 2 })
        ));

        let plan = StreamPlan::new(4, 3, 5);
        assert_eq!(plan.expected_rays, Some(60));
    }

    #[test]
    fn test_plan_with_rows_only() {
        let plan = StreamPlan::new(0, 7, 1);
        assert_eq!(plan.expected_rays, Some(7));
        assert_eq!(plan.flush_interval, None);

        let plan = StreamPlan::new(1, 7, 1);
        assert_eq!(plan.expected_rays, Some(7));
        assert_eq!(plan.flush_interval, Some(1));

        let plan = StreamPlan::new(16, 0, 1);
        assert_eq!(plan.expected_rays, None);
        assert_eq!(plan.flush_interval, Some(16));
        assert_eq!(plan.limit_workers(4), 4);
        assert_eq!(StreamPlan::new(2, 0, 1).limit_workers(8), 2);
    }

    #[test]
    fn test_strategy_choice() {
        assert_eq!(Strategy::choose(1, false).unwrap(), Strategy::Sequential);
        assert_eq!(Strategy::choose(4, false).unwrap(), Strategy::Pool { workers: 4 });
        assert_eq!(Strategy::choose(1, true).unwrap(), Strategy::Device);
        let err = Strategy::choose(2, true).unwrap_err();
        assert_eq!(err.to_string(), "multiprocessing incompatible with device implementation");
    }
}
