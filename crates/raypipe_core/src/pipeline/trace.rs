//! Per-ray output driver (`rtrace`).

use std::io::{BufRead, Write};
use std::time::Duration;

use raypipe_math::RayDescriptor;

use super::{run_pool, run_sequential, RayJob, ResultSink, RunSummary, Strategy, StreamPlan};
use crate::device::{BatchDevice, BatchParams, BatchResults, RayCache};
use crate::engine::{EvalMode, Evaluator};
use crate::error::{PipelineError, PipelineResult};
use crate::evaluated::EvaluatedRay;
use crate::output::{write_resolution, FieldList, Header, OutputFormat, RayFormatter, TraceSelection};
use crate::reader::{InputFormat, RayEvent, RayReader};

/// Settings for a per-ray output run.
#[derive(Debug, Clone)]
pub struct TraceConfig {
    pub input_format: InputFormat,
    pub output_format: OutputFormat,
    pub fields: FieldList,
    pub trace_selection: TraceSelection,
    /// Compute irradiance at the ray origin instead of radiance
    pub irradiance: bool,
    pub limit_distance: bool,
    pub x_resolution: u32,
    pub y_resolution: u32,
    pub workers: usize,
    /// Write the information header
    pub header: bool,
    /// Command line recorded in the header
    pub command: String,
    pub report_interval: Option<Duration>,
}

impl Default for TraceConfig {
    fn default() -> Self {
        Self {
            input_format: InputFormat::Ascii,
            output_format: OutputFormat::Ascii,
            fields: FieldList::default(),
            trace_selection: TraceSelection::All,
            irradiance: false,
            limit_distance: false,
            x_resolution: 0,
            y_resolution: 0,
            workers: 1,
            header: true,
            command: "rtrace".to_string(),
            report_interval: None,
        }
    }
}

impl TraceConfig {
    fn eval_mode(&self) -> EvalMode {
        if self.irradiance {
            EvalMode::Irradiance
        } else if !self.fields.needs_shading() {
            EvalMode::CastOnly
        } else {
            EvalMode::Radiance
        }
    }
}

struct TraceJob<'a> {
    engine: &'a dyn Evaluator,
    mode: EvalMode,
}

impl RayJob for TraceJob<'_> {
    type Output = EvaluatedRay;

    fn run(&self, ray: &RayDescriptor) -> EvaluatedRay {
        self.mode.evaluate(self.engine, ray)
    }
}

/// Writes records to the output and flushes it every `interval` rays.
struct TraceSink<W: Write> {
    out: W,
    formatter: RayFormatter,
    interval: Option<u64>,
    countdown: u64,
    unflushed: bool,
    records: u64,
}

impl<W: Write> TraceSink<W> {
    fn new(out: W, formatter: RayFormatter, interval: Option<u64>) -> Self {
        Self {
            out,
            formatter,
            interval,
            countdown: interval.unwrap_or(0),
            unflushed: false,
            records: 0,
        }
    }

    fn finish(&mut self) -> PipelineResult<()> {
        self.out.flush()?;
        Ok(())
    }
}

impl<W: Write> ResultSink<EvaluatedRay> for TraceSink<W> {
    fn deliver(&mut self, result: EvaluatedRay) -> PipelineResult<()> {
        if self.formatter.write_ray(&mut self.out, &result)? {
            self.records += 1;
        }
        match self.interval {
            Some(interval) => {
                self.countdown = self.countdown.saturating_sub(1);
                if self.countdown == 0 {
                    self.out.flush()?;
                    self.countdown = interval;
                    self.unflushed = false;
                } else {
                    self.unflushed = true;
                }
            }
            None => self.unflushed = true,
        }
        Ok(())
    }

    fn flush(&mut self) -> PipelineResult<()> {
        if self.unflushed {
            self.out.flush()?;
            self.countdown = self.interval.unwrap_or(0);
            self.unflushed = false;
        }
        Ok(())
    }
}

/// Trace every ray of `input` and write the configured fields to `output`.
///
/// With a `device` all rays are cached and evaluated in one batch call;
/// flush requests are dropped in that mode.
pub fn run_trace<R, W>(
    config: &TraceConfig,
    engine: &dyn Evaluator,
    device: Option<&mut dyn BatchDevice>,
    input: R,
    output: W,
) -> PipelineResult<RunSummary>
where
    R: BufRead,
    W: Write,
{
    config.fields.check_format(config.output_format)?;
    config.fields.warn_compatibility(config.irradiance);

    let mode = config.eval_mode();
    let plan = StreamPlan::new(config.x_resolution, config.y_resolution, 1);
    let strategy = Strategy::choose(config.workers, device.is_some())?;
    let strategy = match strategy {
        Strategy::Pool { .. } if mode == EvalMode::CastOnly => Strategy::Sequential,
        Strategy::Pool { workers } => match plan.limit_workers(workers) {
            1 => Strategy::Sequential,
            workers => Strategy::Pool { workers },
        },
        other => other,
    };
    log::info!("tracing with {:?} evaluation, {:?}", mode, strategy);

    let mut output = output;
    if config.header {
        Header::new(config.command.as_str(), config.output_format).write(&mut output)?;
    }
    if config.x_resolution > 0 && config.y_resolution > 0 {
        write_resolution(&mut output, config.x_resolution, config.y_resolution)?;
    }

    let formatter = RayFormatter::new(
        config.fields.clone(),
        config.output_format,
        config.trace_selection.clone(),
    );
    let mut sink = TraceSink::new(output, formatter, plan.flush_interval);
    let mut reader =
        RayReader::new(input, config.input_format).limit_distance(config.limit_distance);
    let job = TraceJob { engine, mode };

    let rays = match (strategy, device) {
        (Strategy::Device, Some(device)) => trace_on_device(&mut reader, device, config, &plan, &mut sink)?,
        (Strategy::Pool { workers }, _) => {
            run_pool(&mut reader, &job, &mut sink, &plan, workers, plan.flush_interval)?.rays
        }
        _ => run_sequential(&mut reader, &job, &mut sink, &plan)?.rays,
    };
    sink.finish()?;
    plan.check_complete(rays)?;

    Ok(RunSummary {
        rays,
        records: sink.records,
    })
}

fn trace_on_device<R, W>(
    reader: &mut RayReader<R>,
    device: &mut dyn BatchDevice,
    config: &TraceConfig,
    plan: &StreamPlan,
    sink: &mut TraceSink<W>,
) -> PipelineResult<u64>
where
    R: BufRead,
    W: Write,
{
    let mut cache = RayCache::new(plan.expected_rays)?;
    loop {
        match reader.next_event()? {
            RayEvent::Ray(ray) => {
                cache.push(ray)?;
                if plan.is_complete(cache.len() as u64) {
                    break;
                }
            }
            RayEvent::Flush => {}
            RayEvent::EndOfInput => break,
        }
    }
    if cache.is_empty() {
        return Ok(0);
    }

    let params = BatchParams {
        width: config.x_resolution.max(1) as usize,
        height: match config.y_resolution {
            0 => cache.len(),
            y => y as usize,
        },
        depth: 1,
        immediate_irradiance: config.irradiance,
        limit_distance: config.limit_distance,
        contribution: false,
        total_bins: 0,
        report_interval: config.report_interval,
    };
    log::info!("sending {} rays to the device", cache.len());
    let results = device.batch_evaluate(&params, cache.as_slice(), None)?;
    results.validate(cache.len(), 0)?;
    let BatchResults::Rays(evaluated) = results else {
        return Err(PipelineError::Consistency(
            "device returned bins for a per-ray run".into(),
        ));
    };
    for ray in evaluated {
        sink.deliver(ray)?;
    }
    Ok(cache.len() as u64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::contrib::ContributionTracer;
    use crate::device::DeviceError;
    use crate::evaluated::{RayKind, SurfaceHit, TracedRay, TreeBuilder};
    use crate::output::FieldKind;
    use raypipe_math::{DVec2, DVec3};
    use std::io::Cursor;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Rays hitting anything in front of them at distance 2; value is the
    /// origin's x coordinate.
    #[derive(Default)]
    struct FlatEngine {
        shaded: AtomicUsize,
        cast: AtomicUsize,
    }

    fn flat_tree(ray: &RayDescriptor) -> EvaluatedRay {
        let mut traced = TracedRay::new(*ray, RayKind::Primary);
        traced.hit = Some(SurfaceHit {
            point: ray.at(2.0),
            distance: 2.0,
            normal: -ray.direction,
            unperturbed_normal: -ray.direction,
            flipped: false,
            uv: DVec2::ZERO,
            surface: "plane".into(),
            modifier: Some("paint".into()),
            material: Some("paint".into()),
        });
        traced.color = DVec3::splat(ray.origin.x);
        EvaluatedRay::new(traced)
    }

    impl Evaluator for FlatEngine {
        fn evaluate(&self, ray: &RayDescriptor) -> EvaluatedRay {
            self.shaded.fetch_add(1, Ordering::SeqCst);
            flat_tree(ray)
        }

        fn cast_only(&self, ray: &RayDescriptor) -> EvaluatedRay {
            self.cast.fetch_add(1, Ordering::SeqCst);
            flat_tree(ray)
        }

        fn evaluate_irradiance(&self, ray: &RayDescriptor) -> EvaluatedRay {
            let mut tree = TreeBuilder::new();
            let index = tree.spawn(*ray, RayKind::Primary, None);
            tree.get_mut(index).color = DVec3::ONE;
            tree.complete(index);
            tree.finish()
        }
    }

    /// Device that evaluates on the calling thread and records its calls.
    #[derive(Default)]
    struct RecordingDevice {
        calls: Vec<(BatchParams, usize)>,
    }

    impl BatchDevice for RecordingDevice {
        fn batch_evaluate(
            &mut self,
            params: &BatchParams,
            rays: &[RayDescriptor],
            _tracer: Option<&ContributionTracer>,
        ) -> Result<BatchResults, DeviceError> {
            self.calls.push((params.clone(), rays.len()));
            Ok(BatchResults::Rays(rays.iter().map(flat_tree).collect()))
        }
    }

    fn config(fields: &str) -> TraceConfig {
        TraceConfig {
            fields: FieldList::parse(fields).unwrap(),
            header: false,
            ..TraceConfig::default()
        }
    }

    fn rays(count: usize) -> String {
        (0..count).map(|i| format!("{i} 0 0 0 0 1\n")).collect()
    }

    fn run(config: &TraceConfig, engine: &FlatEngine, input: &str) -> PipelineResult<(RunSummary, String)> {
        let mut out = Vec::new();
        let summary = run_trace(config, engine, None, Cursor::new(input.to_string()), &mut out)?;
        Ok((summary, String::from_utf8(out).unwrap()))
    }

    #[test]
    fn test_one_record_per_ray() {
        let engine = FlatEngine::default();
        let (summary, text) = run(&config("v"), &engine, &rays(3)).unwrap();
        assert_eq!(summary.rays, 3);
        assert_eq!(summary.records, 3);
        let firsts: Vec<&str> = text.lines().map(|l| l.split('\t').next().unwrap()).collect();
        assert_eq!(firsts, vec!["0.000000e+00", "1.000000e+00", "2.000000e+00"]);
        assert_eq!(engine.shaded.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn test_flush_request_writes_nothing() {
        let engine = FlatEngine::default();
        let input = format!("0 0 0 0 0 0\n{}0 0 0 0 0 0\n", rays(2));
        let (summary, text) = run(&config("L"), &engine, &input).unwrap();
        assert_eq!(summary.records, 2);
        assert_eq!(text, "2.000000e+00\t\n2.000000e+00\t\n");
    }

    #[test]
    fn test_cast_only_fields_skip_shading() {
        let engine = FlatEngine::default();
        let mut cfg = config("pm");
        cfg.workers = 4;
        let (summary, _) = run(&cfg, &engine, &rays(5)).unwrap();
        assert_eq!(summary.rays, 5);
        assert_eq!(engine.cast.load(Ordering::SeqCst), 5);
        assert_eq!(engine.shaded.load(Ordering::SeqCst), 0);
        assert_eq!(cfg.fields.ray_fields, vec![FieldKind::Point, FieldKind::Modifier]);
    }

    #[test]
    fn test_pool_output_matches_sequential() {
        let engine = FlatEngine::default();
        let (_, sequential) = run(&config("ovL"), &engine, &rays(40)).unwrap();
        let mut cfg = config("ovL");
        cfg.workers = 4;
        let (_, pooled) = run(&cfg, &engine, &rays(40)).unwrap();
        assert_eq!(pooled, sequential);
    }

    #[test]
    fn test_header_and_resolution() {
        let engine = FlatEngine::default();
        let cfg = TraceConfig {
            header: true,
            command: "rtrace -ov".into(),
            x_resolution: 2,
            y_resolution: 1,
            ..config("v")
        };
        let (_, text) = run(&cfg, &engine, &rays(2)).unwrap();
        assert!(text.starts_with("#?RADIANCE\nrtrace -ov\nFORMAT=ascii\n\n-Y 1 +X 2\n"));
        assert_eq!(text.lines().count(), 7);
    }

    #[test]
    fn test_truncated_input_with_declared_rows() {
        let engine = FlatEngine::default();
        let cfg = TraceConfig {
            x_resolution: 3,
            y_resolution: 1,
            ..config("v")
        };
        let input = format!("{}2 0 0 0 0", rays(2));
        let mut out = Vec::new();
        let err = run_trace(&cfg, &engine, None, Cursor::new(input), &mut out).unwrap_err();
        assert!(matches!(err, PipelineError::UnexpectedEof { remaining: 1 }));
        // Records produced before the failure were written
        assert_eq!(String::from_utf8(out).unwrap().lines().count(), 2);
    }

    #[test]
    fn test_declared_rows_stop_reading() {
        let engine = FlatEngine::default();
        let cfg = TraceConfig {
            x_resolution: 0,
            y_resolution: 2,
            ..config("v")
        };
        let (summary, _) = run(&cfg, &engine, &rays(5)).unwrap();
        assert_eq!(summary.rays, 2);
    }

    #[test]
    fn test_device_path_single_batch() {
        let engine = FlatEngine::default();
        let mut device = RecordingDevice::default();
        let input = format!("{}0 0 0 0 0 0\n{}", rays(4), rays(6));
        let mut out = Vec::new();
        let summary = run_trace(
            &config("v"),
            &engine,
            Some(&mut device),
            Cursor::new(input),
            &mut out,
        )
        .unwrap();
        assert_eq!(summary.rays, 10);
        assert_eq!(summary.records, 10);
        assert_eq!(device.calls.len(), 1);
        let (params, count) = &device.calls[0];
        assert_eq!(*count, 10);
        assert_eq!((params.width, params.height), (1, 10));
        assert_eq!(engine.shaded.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_device_rejects_workers() {
        let engine = FlatEngine::default();
        let mut device = RecordingDevice::default();
        let mut cfg = config("v");
        cfg.workers = 2;
        let err = run_trace(&cfg, &engine, Some(&mut device), Cursor::new(rays(1)), Vec::new()).unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::User);
        assert!(device.calls.is_empty());
    }

    #[test]
    fn test_rgbe_requires_single_color() {
        let engine = FlatEngine::default();
        let mut cfg = config("vL");
        cfg.output_format = OutputFormat::Rgbe;
        assert!(matches!(
            run(&cfg, &engine, &rays(1)),
            Err(PipelineError::Output(_))
        ));
    }
}
