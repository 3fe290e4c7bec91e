//! Batch device evaluating a whole ray array with rayon.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use rayon::prelude::*;

use raypipe_core::contrib::ContributionTracer;
use raypipe_core::device::{BatchDevice, BatchParams, BatchResults, DeviceError};
use raypipe_core::{EvalMode, EvaluatedRay, Evaluator};
use raypipe_math::{Color, RayDescriptor};

/// Logs completion percentage at most once per interval.
struct Progress {
    total: usize,
    done: AtomicUsize,
    interval: Option<Duration>,
    last: Mutex<Instant>,
}

impl Progress {
    fn new(total: usize, interval: Option<Duration>) -> Self {
        Self {
            total,
            done: AtomicUsize::new(0),
            interval,
            last: Mutex::new(Instant::now()),
        }
    }

    fn tick(&self) {
        let done = self.done.fetch_add(1, Ordering::Relaxed) + 1;
        let Some(interval) = self.interval else {
            return;
        };
        // Skip reporting when another thread holds the clock
        let Ok(mut last) = self.last.try_lock() else {
            return;
        };
        if last.elapsed() >= interval {
            *last = Instant::now();
            log::info!(
                "{} of {} rays evaluated ({:.1}%)",
                done,
                self.total,
                100.0 * done as f64 / self.total.max(1) as f64
            );
        }
    }
}

/// Evaluates every cached entry on the rayon thread pool.
pub struct CpuDevice<'a> {
    engine: &'a dyn Evaluator,
}

impl<'a> CpuDevice<'a> {
    pub fn new(engine: &'a dyn Evaluator) -> Self {
        Self { engine }
    }
}

impl BatchDevice for CpuDevice<'_> {
    fn batch_evaluate(
        &mut self,
        params: &BatchParams,
        rays: &[RayDescriptor],
        tracer: Option<&ContributionTracer>,
    ) -> Result<BatchResults, DeviceError> {
        let mode = if params.immediate_irradiance {
            EvalMode::Irradiance
        } else {
            EvalMode::Radiance
        };
        log::info!(
            "device batch of {} entries ({}x{}, depth {}) on {} threads",
            rays.len(),
            params.width,
            params.height,
            params.depth,
            rayon::current_num_threads()
        );
        let start = Instant::now();
        let progress = Progress::new(rays.len(), params.report_interval);
        let engine = self.engine;

        let results = match tracer {
            None => {
                let evaluated: Vec<EvaluatedRay> = rays
                    .par_iter()
                    .map(|ray| {
                        let result = if ray.is_flush_marker() {
                            EvaluatedRay::unevaluated(*ray)
                        } else {
                            mode.evaluate(engine, ray)
                        };
                        progress.tick();
                        result
                    })
                    .collect();
                BatchResults::Rays(evaluated)
            }
            Some(tracer) => {
                let total_bins = params.total_bins;
                if total_bins == 0 || tracer.total_bins() != total_bins {
                    return Err(DeviceError::Failed(format!(
                        "bin count {} does not match the tracked modifiers ({})",
                        total_bins,
                        tracer.total_bins()
                    )));
                }
                let mut bins = vec![Color::ZERO; rays.len() * total_bins];
                bins.par_chunks_mut(total_bins)
                    .zip(rays.par_iter())
                    .for_each(|(entry, ray)| {
                        if !ray.is_flush_marker() {
                            let evaluated = mode.evaluate(engine, ray);
                            tracer.accumulate_flat(&evaluated, entry);
                        }
                        progress.tick();
                    });
                BatchResults::Bins(bins)
            }
        };

        log::info!("device batch finished in {:.2?}", start.elapsed());
        Ok(results)
    }
}
