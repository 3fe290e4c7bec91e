//! Per-ray contribution lookup against tracked modifiers.

use std::collections::HashMap;

use raypipe_math::Color;

use crate::evaluated::{EvaluatedRay, TracedRay};
use crate::expr::{BinContext, BinExpr};

/// Bin selection data for one tracked modifier.
#[derive(Debug, Clone)]
pub struct BinSelector {
    pub name: String,
    pub expr: BinExpr,
    pub nbins: usize,
    pub start_bin: usize,
}

/// Value added to one bin of one modifier.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BinContribution {
    /// Position of the modifier in registration order
    pub modifier: usize,
    pub bin: usize,
    pub value: Color,
}

/// Immutable snapshot of the registry's selectors, shareable across workers.
#[derive(Debug, Clone)]
pub struct ContributionTracer {
    selectors: Vec<BinSelector>,
    by_name: HashMap<String, usize>,
    contribution: bool,
}

impl ContributionTracer {
    /// With `contribution` set, values are coefficients times ray values;
    /// otherwise they are the coefficients alone.
    pub fn new(selectors: Vec<BinSelector>, contribution: bool) -> Self {
        let by_name = selectors
            .iter()
            .enumerate()
            .map(|(i, s)| (s.name.clone(), i))
            .collect();
        Self {
            selectors,
            by_name,
            contribution,
        }
    }

    pub fn contribution(&self) -> bool {
        self.contribution
    }

    pub fn total_bins(&self) -> usize {
        self.selectors.iter().map(|s| s.nbins).sum()
    }

    /// Contributions of every ray in the tree to tracked modifiers.
    pub fn trace(&self, evaluated: &EvaluatedRay) -> Vec<BinContribution> {
        evaluated
            .completion_order()
            .filter_map(|(_, ray)| self.trace_ray(ray))
            .collect()
    }

    /// Add the tree's contributions into a flat array of global bins.
    pub fn accumulate_flat(&self, evaluated: &EvaluatedRay, bins: &mut [Color]) {
        for c in self.trace(evaluated) {
            bins[self.selectors[c.modifier].start_bin + c.bin] += c.value;
        }
    }

    fn trace_ray(&self, ray: &TracedRay) -> Option<BinContribution> {
        let modifier = ray.modifier()?;
        if ray.source_miss {
            return None;
        }
        let &index = self.by_name.get(modifier)?;
        let selector = &self.selectors[index];

        let value = selector.expr.eval(&BinContext::from_ray(ray));
        if !value.is_finite() {
            log::warn!("bad bin number ({} ignored)", value);
            return None;
        }
        if value <= -0.5 {
            return None;
        }
        let bin = (value + 0.5) as i64;
        if bin < 0 || bin as usize >= selector.nbins {
            log::warn!("bad bin number ({} ignored)", bin);
            return None;
        }
        let value = if self.contribution {
            ray.contribution()
        } else {
            ray.coefficient
        };
        Some(BinContribution {
            modifier: index,
            bin: bin as usize,
            value,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::evaluated::{RayKind, SurfaceHit, TreeBuilder};
    use crate::expr::Params;
    use raypipe_math::{DVec2, DVec3, RayDescriptor};

    fn selector(name: &str, expr: &str, nbins: usize, start_bin: usize) -> BinSelector {
        BinSelector {
            name: name.into(),
            expr: BinExpr::compile(expr, &Params::default()).unwrap(),
            nbins,
            start_bin,
        }
    }

    fn hit(modifier: Option<&str>) -> SurfaceHit {
        SurfaceHit {
            point: DVec3::new(0.0, 0.0, 1.0),
            distance: 1.0,
            normal: -DVec3::Z,
            unperturbed_normal: -DVec3::Z,
            flipped: false,
            uv: DVec2::ZERO,
            surface: "s".into(),
            modifier: modifier.map(String::from),
            material: None,
        }
    }

    /// Primary ray hitting `glass`, with a child shadow ray along `dir`
    /// reaching `lamp`.
    fn tree(dir: DVec3, source_miss: bool) -> EvaluatedRay {
        let mut tree = TreeBuilder::new();
        let primary = tree.spawn(RayDescriptor::new(DVec3::ZERO, DVec3::Z), RayKind::Primary, None);
        tree.get_mut(primary).hit = Some(hit(Some("glass")));
        tree.get_mut(primary).color = DVec3::splat(0.5);
        let shadow = tree.spawn(RayDescriptor::new(DVec3::Z, dir), RayKind::Shadow, Some(primary));
        {
            let ray = tree.get_mut(shadow);
            ray.hit = Some(hit(Some("lamp")));
            ray.color = DVec3::new(10.0, 10.0, 10.0);
            ray.coefficient = DVec3::new(0.1, 0.2, 0.3);
            ray.source_miss = source_miss;
        }
        tree.complete(shadow);
        tree.complete(primary);
        tree.finish()
    }

    #[test]
    fn test_coefficient_and_contribution_modes() {
        let selectors = vec![selector("lamp", "0", 1, 0)];
        let ev = tree(DVec3::X, false);

        let coefficients = ContributionTracer::new(selectors.clone(), false).trace(&ev);
        assert_eq!(
            coefficients,
            vec![BinContribution {
                modifier: 0,
                bin: 0,
                value: DVec3::new(0.1, 0.2, 0.3)
            }]
        );

        let contributions = ContributionTracer::new(selectors, true).trace(&ev);
        assert_eq!(contributions[0].value, DVec3::new(1.0, 2.0, 3.0));
    }

    #[test]
    fn test_bin_selection_rounds_to_nearest() {
        let tracer = ContributionTracer::new(
            vec![selector("glass", "0", 1, 0), selector("lamp", "Dx * 3", 3, 1)],
            false,
        );
        let ev = tree(DVec3::new(0.8, 0.6, 0.0), false);
        let found = tracer.trace(&ev);
        assert_eq!(found.len(), 2);
        // Shadow ray completes first
        assert_eq!((found[0].modifier, found[0].bin), (1, 2));
        assert_eq!((found[1].modifier, found[1].bin), (0, 0));

        let mut flat = vec![Color::ZERO; tracer.total_bins()];
        tracer.accumulate_flat(&ev, &mut flat);
        assert_eq!(flat[0], DVec3::ONE);
        assert_eq!(flat[3], DVec3::new(0.1, 0.2, 0.3));
    }

    #[test]
    fn test_negative_and_overflowing_bins_are_dropped() {
        let tracer = ContributionTracer::new(vec![selector("lamp", "Dx * 4", 2, 0)], false);
        // Dx * 4 = -4: silently ignored
        assert!(tracer.trace(&tree(-DVec3::X, false)).is_empty());
        // Dx * 4 = 4: past the last bin
        assert!(tracer.trace(&tree(DVec3::X, false)).is_empty());
        // Dx * 4 = -0.4 rounds to bin 0
        assert_eq!(tracer.trace(&tree(DVec3::new(-0.1, 0.0, 0.0), false)).len(), 1);
    }

    #[test]
    fn test_non_finite_bins_are_dropped() {
        // sqrt(-1) is NaN and must not round into bin 0
        let tracer = ContributionTracer::new(vec![selector("lamp", "sqrt(-Dx)", 4, 0)], false);
        assert!(tracer.trace(&tree(DVec3::X, false)).is_empty());
        let mut flat = vec![Color::ZERO; 4];
        tracer.accumulate_flat(&tree(DVec3::X, false), &mut flat);
        assert!(flat.iter().all(|c| *c == Color::ZERO));

        let tracer = ContributionTracer::new(vec![selector("lamp", "(Dx - 1) / (Dx - 1)", 4, 0)], false);
        assert!(tracer.trace(&tree(DVec3::X, false)).is_empty());
        let tracer = ContributionTracer::new(vec![selector("lamp", "-1 / (Dx - 1)", 4, 0)], false);
        assert!(tracer.trace(&tree(DVec3::X, false)).is_empty());
    }

    #[test]
    fn test_untracked_void_and_missed_sources_are_skipped() {
        let tracer = ContributionTracer::new(vec![selector("lamp", "0", 1, 0)], false);
        assert!(tracer.trace(&tree(DVec3::X, true)).is_empty());

        let mut builder = TreeBuilder::new();
        let primary = builder.spawn(RayDescriptor::new(DVec3::ZERO, DVec3::Z), RayKind::Primary, None);
        builder.get_mut(primary).hit = Some(hit(None));
        builder.complete(primary);
        assert!(tracer.trace(&builder.finish()).is_empty());

        let other = ContributionTracer::new(vec![selector("wall", "0", 1, 0)], false);
        assert!(other.trace(&tree(DVec3::X, false)).is_empty());
    }
}
