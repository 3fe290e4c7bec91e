//! Modifier contribution driver (`rcontrib`).

use std::io::BufRead;
use std::time::Duration;

use raypipe_math::RayDescriptor;

use super::{run_pool, run_sequential, RayJob, ResultSink, RunSummary, Strategy, StreamPlan};
use crate::accumulate::Accumulator;
use crate::contrib::{BinContribution, ContributionTracer};
use crate::device::{BatchDevice, BatchParams, BatchResults, RayCache};
use crate::engine::{EvalMode, Evaluator};
use crate::error::{PipelineError, PipelineResult};
use crate::output::{write_resolution, Header, OutputFormat};
use crate::reader::{InputFormat, RayEvent, RayReader};
use crate::registry::ModifierRegistry;

/// Settings for a contribution run.
#[derive(Debug, Clone)]
pub struct ContribConfig {
    pub input_format: InputFormat,
    pub output_format: OutputFormat,
    /// Rays summed into each record; `<= 0` sums until a flush or the end
    pub accumulate: i32,
    /// Bins hold coefficient times value instead of coefficients
    pub contribution: bool,
    pub irradiance: bool,
    pub limit_distance: bool,
    pub x_resolution: u32,
    pub y_resolution: u32,
    pub workers: usize,
    pub header: bool,
    pub command: String,
    pub report_interval: Option<Duration>,
}

impl Default for ContribConfig {
    fn default() -> Self {
        Self {
            input_format: InputFormat::Ascii,
            output_format: OutputFormat::Ascii,
            accumulate: 1,
            contribution: false,
            irradiance: false,
            limit_distance: false,
            x_resolution: 0,
            y_resolution: 0,
            workers: 1,
            header: true,
            command: "rcontrib".to_string(),
            report_interval: None,
        }
    }
}

impl ContribConfig {
    /// Bytes written at the top of every destination when it is opened.
    pub fn destination_header(&self) -> Vec<u8> {
        let mut bytes = Vec::new();
        if self.header {
            bytes = Header::new(self.command.as_str(), self.output_format)
                .with_variable("NCOMP=3")
                .to_bytes();
        }
        if self.x_resolution > 0 && self.y_resolution > 0 {
            // Writing into a Vec cannot fail
            let _ = write_resolution(&mut bytes, self.x_resolution, self.y_resolution);
        }
        bytes
    }

    fn eval_mode(&self) -> EvalMode {
        if self.irradiance {
            EvalMode::Irradiance
        } else {
            EvalMode::Radiance
        }
    }
}

struct ContribJob<'a> {
    engine: &'a dyn Evaluator,
    mode: EvalMode,
    tracer: &'a ContributionTracer,
}

impl RayJob for ContribJob<'_> {
    type Output = Vec<BinContribution>;

    fn run(&self, ray: &RayDescriptor) -> Vec<BinContribution> {
        let evaluated = self.mode.evaluate(self.engine, ray);
        self.tracer.trace(&evaluated)
    }
}

impl ResultSink<Vec<BinContribution>> for Accumulator {
    fn deliver(&mut self, result: Vec<BinContribution>) -> PipelineResult<()> {
        self.ray_done(&result)?;
        Ok(())
    }

    fn flush(&mut self) -> PipelineResult<()> {
        Accumulator::flush(self)?;
        Ok(())
    }
}

/// Trace every ray of `input` and accumulate contributions to the
/// modifiers of `registry`, writing records to its destinations.
///
/// Destinations were opened during registration; build the registry with
/// [`ContribConfig::destination_header`] to get headers written to them.
pub fn run_contrib<R: BufRead>(
    config: &ContribConfig,
    registry: ModifierRegistry,
    engine: &dyn Evaluator,
    device: Option<&mut dyn BatchDevice>,
    input: R,
) -> PipelineResult<RunSummary> {
    if registry.is_empty() {
        return Err(PipelineError::Config("missing required modifier argument".into()));
    }

    let plan = StreamPlan::new(config.x_resolution, config.y_resolution, config.accumulate);
    let strategy = match Strategy::choose(config.workers, device.is_some())? {
        Strategy::Pool { workers } => match plan.limit_workers(workers) {
            1 => Strategy::Sequential,
            workers => Strategy::Pool { workers },
        },
        other => other,
    };
    log::info!(
        "accumulating {} bin(s) over {} modifier(s), {:?}",
        registry.total_bins(),
        registry.len(),
        strategy
    );

    let tracer = registry.tracer(config.contribution);
    let mut accumulator = Accumulator::new(registry, config.output_format, config.accumulate)
        .with_flush_interval(plan.flush_interval);
    let mut reader =
        RayReader::new(input, config.input_format).limit_distance(config.limit_distance);
    let job = ContribJob {
        engine,
        mode: config.eval_mode(),
        tracer: &tracer,
    };

    let outcome = match (strategy, device) {
        (Strategy::Device, Some(device)) => {
            accumulate_on_device(&mut reader, device, &tracer, config, &plan, &mut accumulator)
        }
        (Strategy::Pool { workers }, _) => {
            let window = u64::from(config.accumulate.max(1) as u32);
            let drain_every = plan.flush_interval.map(|interval| interval * window);
            run_pool(&mut reader, &job, &mut accumulator, &plan, workers, drain_every)
                .map(|stats| stats.rays)
        }
        _ => run_sequential(&mut reader, &job, &mut accumulator, &plan).map(|stats| stats.rays),
    };

    // Records produced before a failure still reach their destinations
    let finished = accumulator.finish();
    let rays = outcome?;
    finished?;
    plan.check_complete(rays)?;

    Ok(RunSummary {
        rays,
        records: accumulator.records(),
    })
}

fn accumulate_on_device<R: BufRead>(
    reader: &mut RayReader<R>,
    device: &mut dyn BatchDevice,
    tracer: &ContributionTracer,
    config: &ContribConfig,
    plan: &StreamPlan,
    accumulator: &mut Accumulator,
) -> PipelineResult<u64> {
    let mut cache = RayCache::new(plan.expected_rays)?;
    let mut rays = 0u64;
    loop {
        match reader.next_event()? {
            RayEvent::Ray(ray) => {
                cache.push(ray)?;
                rays += 1;
                if plan.is_complete(rays) {
                    break;
                }
            }
            RayEvent::Flush => cache.push(RayDescriptor::flush_marker())?,
            RayEvent::EndOfInput => break,
        }
    }
    if rays == 0 {
        // Only flush markers; nothing is pending so they are no-ops
        return Ok(0);
    }

    let factor = config.accumulate.max(1) as usize;
    let mut width = config.x_resolution.max(1) as usize;
    if config.y_resolution > 0 && factor > 1 {
        width *= factor;
    }
    let total_bins = tracer.total_bins();
    let params = BatchParams {
        width,
        height: match config.y_resolution {
            0 => cache.len(),
            y => y as usize,
        },
        depth: factor,
        immediate_irradiance: config.irradiance,
        limit_distance: config.limit_distance,
        contribution: config.contribution,
        total_bins,
        report_interval: config.report_interval,
    };
    log::info!("sending {} entries to the device", cache.len());
    let results = device.batch_evaluate(&params, cache.as_slice(), Some(tracer))?;
    results.validate(cache.len(), total_bins)?;
    let BatchResults::Bins(bins) = results else {
        return Err(PipelineError::Consistency(
            "device returned shading trees for a contribution run".into(),
        ));
    };

    for (ray, entry) in cache.as_slice().iter().zip(bins.chunks(total_bins)) {
        if ray.is_flush_marker() {
            accumulator.flush()?;
        } else {
            accumulator.ray_done_flat(entry)?;
        }
    }
    Ok(rays)
}
