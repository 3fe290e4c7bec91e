//! Shared plumbing for the `rtrace` and `rcontrib` binaries.

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Args;
use raypipe_core::{ErrorKind, OutputError, PipelineError, RegistryError};
use raypipe_render::{Scene, SceneEngine};

/// Options shared by both renderers.
#[derive(Args, Debug, Clone)]
pub struct CommonArgs {
    /// Scene description (JSON)
    pub scene: PathBuf,

    /// Input and output formats: one letter for both, or input then output
    /// (a = ascii, f = float, d = double, c = RGBE output)
    #[arg(short = 'f', long = "format", default_value = "a")]
    pub format: String,

    /// Horizontal resolution; records between flushes when no full
    /// resolution is given
    #[arg(short = 'x', default_value_t = 0)]
    pub x_resolution: u32,

    /// Vertical resolution
    #[arg(short = 'y', default_value_t = 0)]
    pub y_resolution: u32,

    /// Number of worker threads
    #[arg(short = 'n', long = "workers", default_value_t = 1)]
    pub workers: usize,

    /// Compute irradiance at each ray origin
    #[arg(short = 'I', long)]
    pub irradiance: bool,

    /// Use the input direction length as the maximum ray distance
    #[arg(long)]
    pub limit_distance: bool,

    /// Do not write the information header
    #[arg(long)]
    pub no_header: bool,

    /// Cache all rays and evaluate them in one batch on the CPU device
    #[arg(long)]
    pub device: bool,

    /// Seconds between progress reports from the device
    #[arg(long)]
    pub report: Option<f64>,
}

impl CommonArgs {
    pub fn report_interval(&self) -> Option<Duration> {
        self.report
            .filter(|&secs| secs > 0.0 && secs.is_finite())
            .map(Duration::from_secs_f64)
    }
}

/// Initialize logging with a default filter of `warn`, overridable with
/// `RUST_LOG`.
pub fn init_logging() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();
}

/// The command line as it should appear in output headers.
pub fn command_line() -> String {
    std::env::args().collect::<Vec<_>>().join(" ")
}

/// Load a scene file and build the engine for it.
pub fn load_engine(path: &Path) -> Result<SceneEngine> {
    let scene = Scene::load(path).with_context(|| format!("loading scene {}", path.display()))?;
    Ok(SceneEngine::new(scene))
}

/// Whitespace separated names from a file.
pub fn read_names(path: &Path) -> Result<Vec<String>> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("cannot open name file {}", path.display()))?;
    Ok(text.split_whitespace().map(String::from).collect())
}

/// Category of a fatal error, found by looking through its chain.
pub fn error_kind(err: &anyhow::Error) -> ErrorKind {
    for cause in err.chain() {
        if let Some(e) = cause.downcast_ref::<PipelineError>() {
            return e.kind();
        }
        if let Some(e) = cause.downcast_ref::<RegistryError>() {
            return e.kind();
        }
        if cause.downcast_ref::<OutputError>().is_some() {
            return ErrorKind::User;
        }
    }
    ErrorKind::System
}

/// Log a run's outcome and turn it into the process exit code.
pub fn finish(program: &str, outcome: Result<()>) -> ExitCode {
    match outcome {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            let kind = error_kind(&err);
            log::error!("{}: {}: {:#}", program, kind, err);
            ExitCode::FAILURE
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_error_kind_through_context() {
        let err = anyhow::Error::new(PipelineError::UnexpectedEof { remaining: 2 }).context("reading rays");
        assert_eq!(error_kind(&err), ErrorKind::User);

        let err = anyhow::Error::new(PipelineError::Consistency("bad".into()));
        assert_eq!(error_kind(&err), ErrorKind::Consistency);

        let err = anyhow::Error::new(OutputError::ColorFormat);
        assert_eq!(error_kind(&err), ErrorKind::User);

        assert_eq!(error_kind(&anyhow::anyhow!("disk gone")), ErrorKind::System);
    }

    #[test]
    fn test_read_names() {
        let path = std::env::temp_dir().join(format!("raypipe_names_{}.txt", std::process::id()));
        let mut file = std::fs::File::create(&path).unwrap();
        writeln!(file, "wall floor\n  sky\n").unwrap();
        drop(file);
        assert_eq!(read_names(&path).unwrap(), vec!["wall", "floor", "sky"]);
        std::fs::remove_file(&path).unwrap();
        assert!(read_names(&path).is_err());
    }
}
