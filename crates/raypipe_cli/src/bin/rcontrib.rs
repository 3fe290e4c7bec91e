//! Accumulate ray contributions to named modifiers.
//!
//! Run with: cargo run --release --bin rcontrib -- -c 16 -m sun scene.json < rays.txt

use std::io;
use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{bail, Context, Result};
use clap::Parser;
use raypipe_cli::{command_line, finish, init_logging, load_engine, CommonArgs};
use raypipe_core::{
    parse_io_formats, run_contrib, BatchDevice, BinSettings, ContribConfig, FileOpener,
    ModifierRegistry,
};
use raypipe_render::CpuDevice;

#[derive(Parser, Debug)]
#[command(name = "rcontrib", about = "Sum ray contributions to the given modifiers")]
struct Args {
    #[command(flatten)]
    common: CommonArgs,

    /// Rays summed into each record; 0 sums until a flush or end of input
    #[arg(short = 'c', long = "accumulate", default_value_t = 1, allow_negative_numbers = true)]
    accumulate: i32,

    /// Record coefficient times value instead of coefficients
    #[arg(short = 'V', long)]
    contribution: bool,

    /// Modifier to track (repeatable)
    #[arg(short = 'm', long = "modifier")]
    modifiers: Vec<String>,

    /// File listing modifiers to track (repeatable)
    #[arg(short = 'M', long = "modifier-file")]
    modifier_files: Vec<PathBuf>,

    /// Output file template; %s is the modifier, %d the bin number
    #[arg(short = 'o', long = "output")]
    output: Option<String>,

    /// Parameters for the bin expression, e.g. "MF=4,rNx=0"
    #[arg(short = 'p', long = "params", default_value = "")]
    params: String,

    /// Bin selection expression
    #[arg(short = 'b', long = "bin")]
    bin_expr: Option<String>,

    /// Number of bins for a non-constant bin expression
    #[arg(long = "bins", default_value_t = 0)]
    bin_count: i32,
}

fn run(args: Args) -> Result<()> {
    if args.modifiers.is_empty() && args.modifier_files.is_empty() {
        bail!("missing required modifier argument");
    }
    let (input_format, output_format) = parse_io_formats(&args.common.format)?;
    let config = ContribConfig {
        input_format,
        output_format,
        accumulate: args.accumulate,
        contribution: args.contribution,
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
    let settings = BinSettings {
        output: args.output.clone(),
        params: args.params.clone(),
        bin_expr: args.bin_expr.clone(),
        bin_count: args.bin_count,
    };
    let mut registry =
        ModifierRegistry::new(Box::new(FileOpener)).with_header(config.destination_header());
    registry.register_from_list(&args.modifiers, &settings)?;
    for path in &args.modifier_files {
        registry
            .register_from_file(path, &settings)
            .with_context(|| format!("reading modifiers from {}", path.display()))?;
    }

    let mut device = CpuDevice::new(&engine);
    let device = args.common.device.then_some(&mut device as &mut dyn BatchDevice);

    let stdin = io::stdin();
    let summary = run_contrib(&config, registry, &engine, device, stdin.lock())?;
    log::info!("traced {} rays, wrote {} records", summary.rays, summary.records);
    Ok(())
}

fn main() -> ExitCode {
    init_logging();
    let args = Args::parse();
    finish("rcontrib", run(args))
}
