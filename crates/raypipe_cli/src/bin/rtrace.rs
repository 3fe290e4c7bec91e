//! Trace rays read from standard input and write per-ray values.
//!
//! Run with: cargo run --release --bin rtrace -- -o ov scene.json < rays.txt

use std::io::{self, BufWriter};
use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Result;
use clap::Parser;
use raypipe_cli::{command_line, finish, init_logging, load_engine, read_names, CommonArgs};
use raypipe_core::{
    parse_io_formats, run_trace, BatchDevice, FieldList, TraceConfig, TraceSelection,
};
use raypipe_render::CpuDevice;

#[derive(Parser, Debug)]
#[command(name = "rtrace", about = "Trace rays and write the selected values for each")]
struct Args {
    #[command(flatten)]
    common: CommonArgs,

    /// Output fields, e.g. "ov", or "v~TLm" to trace every ray of the tree
    #[arg(short = 'o', long = "output", default_value = "v")]
    output: String,

    /// Trace only rays striking this modifier (repeatable)
    #[arg(long = "trace-include", conflicts_with_all = ["trace_exclude", "trace_exclude_file"])]
    trace_include: Vec<String>,

    /// Read modifiers to trace from a file
    #[arg(long = "trace-include-file", conflicts_with_all = ["trace_exclude", "trace_exclude_file"])]
    trace_include_file: Option<PathBuf>,

    /// Trace every ray except those striking this modifier (repeatable)
    #[arg(long = "trace-exclude")]
    trace_exclude: Vec<String>,

    /// Read modifiers to skip from a file
    #[arg(long = "trace-exclude-file")]
    trace_exclude_file: Option<PathBuf>,
}

impl Args {
    fn trace_selection(&self) -> Result<TraceSelection> {
        let mut include = self.trace_include.clone();
        if let Some(path) = &self.trace_include_file {
            include.extend(read_names(path)?);
        }
        let mut exclude = self.trace_exclude.clone();
        if let Some(path) = &self.trace_exclude_file {
            exclude.extend(read_names(path)?);
        }
        Ok(match (include.is_empty(), exclude.is_empty()) {
            (false, _) => TraceSelection::Include(include),
            (true, false) => TraceSelection::Exclude(exclude),
            (true, true) => TraceSelection::All,
        })
    }
}

fn run(args: Args) -> Result<()> {
    let (input_format, output_format) = parse_io_formats(&args.common.format)?;
    let config = TraceConfig {
        input_format,
        output_format,
        fields: FieldList::parse(&args.output)?,
        trace_selection: args.trace_selection()?,
        irradiance: args.common.irradiance,
        limit_distance: args.common.limit_distance,
        x_resolution: args.common.x_resolution,
        y_resolution: args.common.y_resolution,
        workers: args.common.workers,
        header: !args.common.no_header,
        command: command_line(),
        report_interval: args.common.report_interval(),
    };

    let engine = load_engine(&args.common.scene)?;
    let mut device = CpuDevice::new(&engine);
    let device = args.common.device.then_some(&mut device as &mut dyn BatchDevice);

    let stdin = io::stdin();
    let stdout = io::stdout();
    let summary = run_trace(
        &config,
        &engine,
        device,
        stdin.lock(),
        BufWriter::new(stdout.lock()),
    )?;
    log::info!("traced {} rays, wrote {} records", summary.rays, summary.records);
    Ok(())
}

fn main() -> ExitCode {
    init_logging();
    let args = Args::parse();
    finish("rtrace", run(args))
}
