use std::collections::HashSet;

use crate::evaluated::{RayKind, TracedRay};

/// Maximum number of modifiers tracked for trace filtering.
pub const MAX_TRACE_SET: usize = 8191;

/// Which rays of a shading tree are written in trace mode.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum TraceSelection {
    #[default]
    All,
    /// Only rays striking one of these modifiers
    Include(Vec<String>),
    /// Every ray except those striking one of these modifiers
    Exclude(Vec<String>),
}

/// Decides per traced ray whether it gets a trace line.
///
/// Listed modifiers enter the tracked set the first time a ray strikes
/// them. Once the set is full further modifiers are never tracked.
#[derive(Debug)]
pub struct TraceFilter {
    selection: TraceSelection,
    follow_sources: bool,
    tracked: HashSet<String>,
    capacity: usize,
    full: bool,
}

impl TraceFilter {
    pub fn new(selection: TraceSelection, follow_sources: bool) -> Self {
        Self::with_capacity(selection, follow_sources, MAX_TRACE_SET)
    }

    fn with_capacity(selection: TraceSelection, follow_sources: bool, capacity: usize) -> Self {
        Self {
            selection,
            follow_sources,
            tracked: HashSet::new(),
            capacity,
            full: false,
        }
    }

    pub fn admits(&mut self, ray: &TracedRay) -> bool {
        if ray.kind == RayKind::Shadow && !self.follow_sources {
            return false;
        }
        let include = match &self.selection {
            TraceSelection::All => return true,
            TraceSelection::Include(_) => true,
            TraceSelection::Exclude(_) => false,
        };
        let Some(hit) = &ray.hit else {
            return !include;
        };
        let in_set = match hit.modifier.as_deref() {
            Some(name) => self.track(name),
            None => false,
        };
        in_set == include
    }

    fn track(&mut self, name: &str) -> bool {
        if self.tracked.contains(name) {
            return true;
        }
        let listed = match &self.selection {
            TraceSelection::Include(names) | TraceSelection::Exclude(names) => {
                names.iter().any(|n| n == name)
            }
            TraceSelection::All => false,
        };
        if !listed || self.full {
            return false;
        }
        if self.tracked.len() >= self.capacity {
            log::warn!("too many modifiers in trace list");
            self.full = true;
            return false;
        }
        self.tracked.insert(name.to_string());
        true
    }

    pub fn tracked_count(&self) -> usize {
        self.tracked.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::evaluated::SurfaceHit;
    use raypipe_math::{DVec2, DVec3, RayDescriptor};

    fn hitting(modifier: Option<&str>) -> TracedRay {
        let mut ray = TracedRay::new(RayDescriptor::new(DVec3::ZERO, DVec3::Z), RayKind::Reflected);
        ray.hit = Some(SurfaceHit {
            point: DVec3::Z,
            distance: 1.0,
            normal: -DVec3::Z,
            unperturbed_normal: -DVec3::Z,
            flipped: false,
            uv: DVec2::ZERO,
            surface: "ball".into(),
            modifier: modifier.map(String::from),
            material: modifier.map(String::from),
        });
        ray
    }

    fn missing() -> TracedRay {
        TracedRay::new(RayDescriptor::new(DVec3::ZERO, DVec3::Z), RayKind::Primary)
    }

    #[test]
    fn test_all_admits_everything_but_unfollowed_sources() {
        let mut filter = TraceFilter::new(TraceSelection::All, false);
        assert!(filter.admits(&missing()));
        assert!(filter.admits(&hitting(Some("red"))));

        let mut shadow = hitting(Some("lamp"));
        shadow.kind = RayKind::Shadow;
        assert!(!filter.admits(&shadow));
        assert!(TraceFilter::new(TraceSelection::All, true).admits(&shadow));
    }

    #[test]
    fn test_include_list() {
        let mut filter = TraceFilter::new(TraceSelection::Include(vec!["red".into()]), true);
        assert!(filter.admits(&hitting(Some("red"))));
        assert!(!filter.admits(&hitting(Some("blue"))));
        assert!(!filter.admits(&hitting(None)));
        assert!(!filter.admits(&missing()));
        assert_eq!(filter.tracked_count(), 1);
    }

    #[test]
    fn test_exclude_list() {
        let mut filter = TraceFilter::new(TraceSelection::Exclude(vec!["red".into()]), true);
        assert!(!filter.admits(&hitting(Some("red"))));
        assert!(filter.admits(&hitting(Some("blue"))));
        assert!(filter.admits(&missing()));
    }

    #[test]
    fn test_full_set_stops_tracking() {
        let names = vec!["a".to_string(), "b".to_string(), "c".to_string()];
        let mut filter = TraceFilter::with_capacity(TraceSelection::Include(names), true, 2);
        assert!(filter.admits(&hitting(Some("a"))));
        assert!(filter.admits(&hitting(Some("b"))));
        assert!(!filter.admits(&hitting(Some("c"))));
        assert!(!filter.admits(&hitting(Some("c"))));
        // Already tracked modifiers stay in the set
        assert!(filter.admits(&hitting(Some("a"))));
        assert_eq!(filter.tracked_count(), 2);
    }
}
