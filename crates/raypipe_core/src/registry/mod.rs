//! Modifier contribution registry.
//!
//! Each tracked modifier owns a run of contiguous global bins, a compiled
//! bin selection expression and one output destination per bin. Bins are
//! summed by the accumulator and written out by [`ModifierRegistry::emit_record`].

mod destination;

use std::collections::HashMap;
use std::io;
use std::path::{Path, PathBuf};

use raypipe_math::{Color, BLACK};
use thiserror::Error;

use crate::contrib::{BinContribution, BinSelector, ContributionTracer};
use crate::error::ErrorKind;
use crate::expr::{BinExpr, ExprError, Params};
use crate::output::OutputFormat;

pub use destination::{
    DestinationId, DestinationOpener, DestinationTable, FileOpener, MemoryOpener, OutputSpec,
    SharedBuffer,
};

/// Modifier name meaning "no modifier"; it can never be tracked.
pub const VOID_MODIFIER: &str = "void";

/// Maximum number of tracked modifiers.
pub const MAX_MODIFIERS: usize = 1024;

/// Errors raised while registering modifiers or opening their outputs.
#[derive(Error, Debug)]
pub enum RegistryError {
    #[error("duplicate modifier '{0}'")]
    Duplicate(String),

    #[error("cannot track '{0}' modifier")]
    Reserved(String),

    #[error("too many modifiers ({MAX_MODIFIERS} limit)")]
    TooMany,

    #[error("too many modifiers ({limit} limit) in file '{}'", .path.display())]
    TooManyInFile { path: PathBuf, limit: usize },

    #[error("illegal non-zero constant for bin ({0})")]
    NonZeroConstantBin(String),

    #[error("unspecified or illegal bin count for modifier '{0}'")]
    BadBinCount(String),

    #[error("bin expression for modifier '{name}': {source}")]
    Expr {
        name: String,
        #[source]
        source: ExprError,
    },

    #[error("parameters for modifier '{name}': {source}")]
    Params {
        name: String,
        #[source]
        source: ExprError,
    },

    #[error("bad output specification '{spec}': {reason}")]
    BadOutputSpec { spec: String, reason: String },

    #[error("cannot open output '{name}': {source}")]
    Open {
        name: String,
        #[source]
        source: io::Error,
    },

    #[error("cannot find modifier file '{}': {source}", .path.display())]
    ModifierFile {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("modifier '{0}' is not tracked")]
    NotFound(String),
}

impl RegistryError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            RegistryError::Open { .. } | RegistryError::ModifierFile { .. } => ErrorKind::System,
            _ => ErrorKind::User,
        }
    }
}

/// Settings shared by every modifier of one registration call.
#[derive(Debug, Clone, Default)]
pub struct BinSettings {
    /// Output name template, standard output when `None`
    pub output: Option<String>,
    /// `name=value` parameter assignments
    pub params: String,
    /// Bin selection expression, the single bin `0` when `None`
    pub bin_expr: Option<String>,
    /// Number of bins for a non-constant expression
    pub bin_count: i32,
}

/// Accumulated contributions of one modifier.
#[derive(Debug)]
pub struct ModifierContribution {
    name: String,
    output: Option<OutputSpec>,
    params: Params,
    bin_expr: BinExpr,
    start_bin: usize,
    bins: Vec<Color>,
    destinations: Vec<DestinationId>,
}

impl ModifierContribution {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn nbins(&self) -> usize {
        self.bins.len()
    }

    /// Global index of this modifier's first bin.
    pub fn start_bin(&self) -> usize {
        self.start_bin
    }

    pub fn bins(&self) -> &[Color] {
        &self.bins
    }

    pub fn params(&self) -> &Params {
        &self.params
    }

    pub fn bin_expr(&self) -> &BinExpr {
        &self.bin_expr
    }

    pub fn output(&self) -> Option<&OutputSpec> {
        self.output.as_ref()
    }

    pub fn destination(&self, bin: usize) -> DestinationId {
        self.destinations[bin]
    }

    fn clear(&mut self) {
        self.bins.fill(BLACK);
    }
}

/// All tracked modifiers, in registration order.
#[derive(Debug)]
pub struct ModifierRegistry {
    modifiers: Vec<ModifierContribution>,
    index: HashMap<String, usize>,
    destinations: DestinationTable,
    total_bins: usize,
}

impl ModifierRegistry {
    pub fn new(opener: Box<dyn DestinationOpener>) -> Self {
        Self {
            modifiers: Vec::new(),
            index: HashMap::new(),
            destinations: DestinationTable::new(opener),
            total_bins: 0,
        }
    }

    /// Header written to each destination when it is opened.
    pub fn with_header(mut self, header: Vec<u8>) -> Self {
        self.destinations.set_header(header);
        self
    }

    /// Track a modifier.
    ///
    /// Fails without registering anything if the name is taken, reserved,
    /// over the limit, if its expression, parameters or output spec are
    /// invalid, or if one of its outputs cannot be opened. Outputs opened
    /// for a failed registration are closed again.
    pub fn register(
        &mut self,
        name: &str,
        settings: &BinSettings,
    ) -> Result<&ModifierContribution, RegistryError> {
        if self.index.contains_key(name) {
            return Err(RegistryError::Duplicate(name.to_string()));
        }
        if self.modifiers.len() >= MAX_MODIFIERS {
            return Err(RegistryError::TooMany);
        }
        if name == VOID_MODIFIER {
            return Err(RegistryError::Reserved(name.to_string()));
        }

        let params = Params::parse(&settings.params).map_err(|source| RegistryError::Params {
            name: name.to_string(),
            source,
        })?;
        let source = settings.bin_expr.as_deref().unwrap_or("0");
        let bin_expr = BinExpr::compile(source, &params).map_err(|source| RegistryError::Expr {
            name: name.to_string(),
            source,
        })?;
        let nbins = if bin_expr.is_constant() {
            let count = (bin_expr.eval(&Default::default()) + 1.5).trunc();
            if count != 1.0 {
                return Err(RegistryError::NonZeroConstantBin(source.to_string()));
            }
            1
        } else if settings.bin_count <= 0 {
            return Err(RegistryError::BadBinCount(name.to_string()));
        } else {
            settings.bin_count as usize
        };
        let output = settings.output.as_deref().map(OutputSpec::parse).transpose()?;

        let checkpoint = self.destinations.checkpoint();
        let mut destinations = Vec::with_capacity(nbins);
        for bin in 0..nbins {
            let target = output.as_ref().map(|spec| spec.render(name, bin));
            match self.destinations.get_or_open(target.as_deref()) {
                Ok(id) => destinations.push(id),
                Err(e) => {
                    self.destinations.rollback(checkpoint);
                    return Err(e);
                }
            }
        }

        let start_bin = self.total_bins;
        self.total_bins += nbins;
        self.modifiers.push(ModifierContribution {
            name: name.to_string(),
            output,
            params,
            bin_expr,
            start_bin,
            bins: vec![BLACK; nbins],
            destinations,
        });
        self.index.insert(name.to_string(), self.modifiers.len() - 1);
        log::debug!("tracking modifier '{}' with {} bin(s)", name, nbins);
        Ok(&self.modifiers[self.modifiers.len() - 1])
    }

    /// Track each modifier of `names` with the same settings.
    pub fn register_from_list<I, S>(&mut self, names: I, settings: &BinSettings) -> Result<(), RegistryError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        for name in names {
            self.register(name.as_ref(), settings)?;
        }
        Ok(())
    }

    /// Track every modifier named in a whitespace separated file.
    pub fn register_from_file(&mut self, path: &Path, settings: &BinSettings) -> Result<(), RegistryError> {
        let text = std::fs::read_to_string(path).map_err(|source| RegistryError::ModifierFile {
            path: path.to_path_buf(),
            source,
        })?;
        let names: Vec<&str> = text.split_whitespace().collect();
        if names.len() >= MAX_MODIFIERS - 1 {
            return Err(RegistryError::TooManyInFile {
                path: path.to_path_buf(),
                limit: MAX_MODIFIERS - 1,
            });
        }
        self.register_from_list(names, settings)
    }

    pub fn lookup(&self, name: &str) -> Result<&ModifierContribution, RegistryError> {
        self.index
            .get(name)
            .map(|&i| &self.modifiers[i])
            .ok_or_else(|| RegistryError::NotFound(name.to_string()))
    }

    pub fn len(&self) -> usize {
        self.modifiers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.modifiers.is_empty()
    }

    /// Number of bins over all modifiers.
    pub fn total_bins(&self) -> usize {
        self.total_bins
    }

    pub fn iter(&self) -> impl Iterator<Item = &ModifierContribution> {
        self.modifiers.iter()
    }

    pub fn destinations(&self) -> &DestinationTable {
        &self.destinations
    }

    /// Immutable snapshot of the bin selectors, for use on worker threads.
    pub fn tracer(&self, contribution: bool) -> ContributionTracer {
        let selectors = self
            .modifiers
            .iter()
            .map(|m| BinSelector {
                name: m.name.clone(),
                expr: m.bin_expr.clone(),
                nbins: m.nbins(),
                start_bin: m.start_bin,
            })
            .collect();
        ContributionTracer::new(selectors, contribution)
    }

    /// Add one contribution to its bin.
    pub fn add(&mut self, contribution: &BinContribution) {
        self.modifiers[contribution.modifier].bins[contribution.bin] += contribution.value;
    }

    /// Add a flat array holding every modifier's bins in global order.
    pub fn add_flat(&mut self, bins: &[Color]) {
        for modifier in &mut self.modifiers {
            let start = modifier.start_bin;
            for (bin, value) in modifier.bins.iter_mut().zip(&bins[start..]) {
                *bin += *value;
            }
        }
    }

    /// Write every modifier's bins to their destinations, clear them, and end
    /// the record on every destination.
    pub fn emit_record(&mut self, format: OutputFormat) -> io::Result<()> {
        for modifier in &mut self.modifiers {
            for (bin, value) in modifier.bins.iter().enumerate() {
                let out = self.destinations.writer(modifier.destinations[bin]);
                format.put_reals(out, &value.to_array())?;
            }
            modifier.clear();
        }
        let ids: Vec<DestinationId> = self.destinations.ids().collect();
        for id in ids {
            format.end_record(self.destinations.writer(id))?;
        }
        Ok(())
    }

    pub fn flush_all(&mut self) -> io::Result<()> {
        self.destinations.flush_all()
    }
}
