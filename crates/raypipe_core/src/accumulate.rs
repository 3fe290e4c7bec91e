//! Accumulation of modifier contributions into output records.

use std::io;

use raypipe_math::Color;

use crate::contrib::BinContribution;
use crate::output::OutputFormat;
use crate::registry::ModifierRegistry;

/// Counter-driven emission of modifier bins.
///
/// With a factor `N >= 1` every `N` completed rays produce one record. With
/// `N <= 0` contributions are summed until a flush request or the end of
/// input.
#[derive(Debug)]
pub struct Accumulator {
    registry: ModifierRegistry,
    format: OutputFormat,
    factor: i32,
    pending: u64,
    records: u64,
    flush_interval: Option<u64>,
    since_flush: u64,
}

impl Accumulator {
    pub fn new(registry: ModifierRegistry, format: OutputFormat, factor: i32) -> Self {
        Self {
            registry,
            format,
            factor,
            pending: 0,
            records: 0,
            flush_interval: None,
            since_flush: 0,
        }
    }

    /// Flush every destination after this many records.
    pub fn with_flush_interval(mut self, interval: Option<u64>) -> Self {
        self.flush_interval = interval.filter(|&n| n > 0);
        self
    }

    pub fn registry(&self) -> &ModifierRegistry {
        &self.registry
    }

    pub fn factor(&self) -> i32 {
        self.factor
    }

    /// Rays summed since the last record.
    pub fn pending(&self) -> u64 {
        self.pending
    }

    pub fn records(&self) -> u64 {
        self.records
    }

    /// Add the contributions of one completed ray and emit when the window
    /// is full.
    pub fn ray_done(&mut self, contributions: &[BinContribution]) -> io::Result<()> {
        for c in contributions {
            self.registry.add(c);
        }
        self.complete_ray()
    }

    /// Same as [`Accumulator::ray_done`] for a flat array of global bins.
    pub fn ray_done_flat(&mut self, bins: &[Color]) -> io::Result<()> {
        self.registry.add_flat(bins);
        self.complete_ray()
    }

    fn complete_ray(&mut self) -> io::Result<()> {
        self.pending += 1;
        if self.factor > 0 && self.pending >= self.factor as u64 {
            self.emit()?;
        }
        Ok(())
    }

    /// Flush request from the input: emit a short record if anything is
    /// pending, then flush every destination.
    pub fn flush(&mut self) -> io::Result<()> {
        if self.pending == 0 {
            return Ok(());
        }
        self.emit()?;
        self.since_flush = 0;
        self.registry.flush_all()
    }

    /// End of input: emit whatever is still pending and flush.
    pub fn finish(&mut self) -> io::Result<()> {
        if self.pending > 0 {
            if self.factor > 0 {
                log::warn!("partial accumulation in final record");
            }
            self.emit()?;
        }
        self.registry.flush_all()
    }

    fn emit(&mut self) -> io::Result<()> {
        self.registry.emit_record(self.format)?;
        self.pending = 0;
        self.records += 1;
        self.since_flush += 1;
        if let Some(interval) = self.flush_interval {
            if self.since_flush >= interval {
                self.since_flush = 0;
                self.registry.flush_all()?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::{BinSettings, MemoryOpener};
    use raypipe_math::{DVec3, BLACK};

    fn wall_accumulator(factor: i32) -> (Accumulator, MemoryOpener) {
        let opener = MemoryOpener::new();
        let mut registry = ModifierRegistry::new(Box::new(opener.clone()));
        registry.register("wall", &BinSettings::default()).unwrap();
        (Accumulator::new(registry, OutputFormat::Ascii, factor), opener)
    }

    fn red() -> Vec<BinContribution> {
        vec![BinContribution {
            modifier: 0,
            bin: 0,
            value: DVec3::new(1.0, 0.0, 0.0),
        }]
    }

    fn lines(opener: &MemoryOpener) -> Vec<String> {
        String::from_utf8(opener.contents("-").unwrap())
            .unwrap()
            .lines()
            .map(String::from)
            .collect()
    }

    #[test]
    fn test_three_rays_make_one_record() {
        let (mut acc, opener) = wall_accumulator(3);
        for _ in 0..3 {
            acc.ray_done(&red()).unwrap();
        }
        assert_eq!(acc.records(), 1);
        assert_eq!(
            lines(&opener),
            vec!["3.000000e+00\t0.000000e+00\t0.000000e+00\t"]
        );
        assert_eq!(acc.registry().lookup("wall").unwrap().bins(), &[BLACK]);
        acc.finish().unwrap();
        assert_eq!(acc.records(), 1);
    }

    #[test]
    fn test_partial_final_record_keeps_factor() {
        let (mut acc, opener) = wall_accumulator(3);
        for _ in 0..5 {
            acc.ray_done(&red()).unwrap();
        }
        acc.finish().unwrap();
        assert_eq!(acc.records(), 2);
        assert_eq!(acc.factor(), 3);
        let lines = lines(&opener);
        assert_eq!(lines[1], "2.000000e+00\t0.000000e+00\t0.000000e+00\t");
    }

    #[test]
    fn test_flush_emits_short_window_only_when_pending() {
        let (mut acc, opener) = wall_accumulator(4);
        acc.flush().unwrap();
        assert_eq!(acc.records(), 0);

        acc.ray_done(&red()).unwrap();
        acc.flush().unwrap();
        assert_eq!(acc.records(), 1);
        acc.flush().unwrap();
        assert_eq!(acc.records(), 1);
        assert_eq!(lines(&opener), vec!["1.000000e+00\t0.000000e+00\t0.000000e+00\t"]);
    }

    #[test]
    fn test_unbounded_accumulation() {
        let (mut acc, opener) = wall_accumulator(0);
        for _ in 0..7 {
            acc.ray_done(&red()).unwrap();
        }
        assert_eq!(acc.records(), 0);
        acc.finish().unwrap();
        assert_eq!(lines(&opener), vec!["7.000000e+00\t0.000000e+00\t0.000000e+00\t"]);
    }

    #[test]
    fn test_record_count_is_ceiling() {
        for (rays, factor, expected) in [(10u64, 3, 4u64), (9, 3, 3), (1, 1, 1), (0, 2, 0)] {
            let (mut acc, opener) = wall_accumulator(factor);
            for _ in 0..rays {
                acc.ray_done(&[]).unwrap();
            }
            acc.finish().unwrap();
            assert_eq!(acc.records(), expected);
            let written = opener.contents("-").unwrap_or_default();
            assert_eq!(written.iter().filter(|&&b| b == b'\n').count() as u64, expected);
        }
    }

    #[test]
    fn test_flat_bins() {
        let (mut acc, opener) = wall_accumulator(1);
        acc.ray_done_flat(&[DVec3::new(0.0, 2.0, 0.0)]).unwrap();
        assert_eq!(lines(&opener), vec!["0.000000e+00\t2.000000e+00\t0.000000e+00\t"]);
    }
}
