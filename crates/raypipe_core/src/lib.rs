//! raypipe core - ray stream evaluation and contribution accumulation.
//!
//! This crate provides:
//!
//! - **Ray input**: ascii, float and double ray streams with flush requests
//! - **Modifier registry**: per-modifier bins, bin expressions and output destinations
//! - **Accumulation**: counter-driven emission of summed bins
//! - **Output**: per-ray fields, trace lines, headers
//! - **Pipeline**: sequential, worker pool and batched device execution
//!
//! # Example
//!
//! ```ignore
//! use raypipe_core::{run_trace, FieldList, TraceConfig};
//!
//! let config = TraceConfig {
//!     fields: FieldList::parse("ov")?,
//!     workers: 4,
//!     ..TraceConfig::default()
//! };
//! let summary = run_trace(&config, &engine, None, stdin.lock(), stdout.lock())?;
//! log::info!("traced {} rays", summary.rays);
//! ```

pub mod accumulate;
pub mod contrib;
pub mod device;
pub mod engine;
pub mod error;
pub mod evaluated;
pub mod expr;
pub mod output;
pub mod pipeline;
pub mod reader;
pub mod registry;

// Re-export commonly used types
pub use accumulate::Accumulator;
pub use contrib::{BinContribution, ContributionTracer};
pub use device::{BatchDevice, BatchParams, BatchResults, DeviceError, RayCache};
pub use engine::{EvalMode, Evaluator};
pub use error::{ErrorKind, PipelineError, PipelineResult};
pub use evaluated::{EvaluatedRay, RayKind, SurfaceHit, TracedRay, TreeBuilder, NO_HIT_DISTANCE};
pub use expr::{BinContext, BinExpr, ExprError, Params};
pub use output::{parse_io_formats, FieldList, OutputError, OutputFormat, TraceSelection};
pub use pipeline::{run_contrib, run_trace, ContribConfig, RunSummary, StreamPlan, TraceConfig};
pub use reader::{InputFormat, RayEvent, RayReader, ReadError};
pub use registry::{BinSettings, FileOpener, MemoryOpener, ModifierRegistry, RegistryError};
