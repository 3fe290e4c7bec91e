use std::io::{self, Write};

use raypipe_math::DVec3;

use super::{FieldKind, FieldList, OutputFormat, TraceFilter, TraceSelection};
use crate::evaluated::{EvaluatedRay, TracedRay};

const VOID_NAME: &str = "void";
const MISS_NAME: &str = "*";

/// Writes the configured fields of evaluated rays.
#[derive(Debug)]
pub struct RayFormatter {
    fields: FieldList,
    format: OutputFormat,
    filter: TraceFilter,
}

impl RayFormatter {
    pub fn new(fields: FieldList, format: OutputFormat, selection: TraceSelection) -> Self {
        let follow_sources = fields.trace.as_ref().is_some_and(|t| t.follow_sources);
        Self {
            fields,
            format,
            filter: TraceFilter::new(selection, follow_sources),
        }
    }

    pub fn format(&self) -> OutputFormat {
        self.format
    }

    /// Write trace lines for the shading tree followed by the primary
    /// record. Returns whether a primary record was written.
    pub fn write_ray(&mut self, out: &mut dyn Write, evaluated: &EvaluatedRay) -> io::Result<bool> {
        if let Some(trace) = &self.fields.trace {
            if !trace.fields.is_empty() {
                for (index, ray) in evaluated.completion_order() {
                    if !self.filter.admits(ray) {
                        continue;
                    }
                    for _ in 0..evaluated.depth(index) {
                        out.write_all(b"\t")?;
                    }
                    for &field in &trace.fields {
                        write_field(self.format, out, ray, field)?;
                    }
                    self.format.end_record(out)?;
                }
            }
        }

        if self.fields.ray_fields.is_empty() {
            return Ok(false);
        }
        let primary = evaluated.primary();
        for &field in &self.fields.ray_fields {
            write_field(self.format, out, primary, field)?;
        }
        self.format.end_record(out)?;
        Ok(true)
    }
}

fn hit_vector(ray: &TracedRay, get: impl Fn(&crate::evaluated::SurfaceHit) -> DVec3) -> [f64; 3] {
    ray.hit.as_ref().map_or(DVec3::ZERO, get).to_array()
}

fn write_field(
    format: OutputFormat,
    out: &mut dyn Write,
    ray: &TracedRay,
    field: FieldKind,
) -> io::Result<()> {
    match field {
        FieldKind::Origin => format.put_reals(out, &ray.ray.origin.to_array()),
        FieldKind::Direction => format.put_reals(out, &ray.ray.direction.to_array()),
        FieldKind::Value => format.put_reals(out, &ray.color.to_array()),
        FieldKind::Mirrored => format.put_reals(out, &ray.mirror_color.to_array()),
        FieldKind::MirroredDistance => format.put_reals(out, &[ray.mirror_distance]),
        FieldKind::Transmitted => {
            format.put_reals(out, &(ray.color - ray.mirror_color).to_array())
        }
        FieldKind::TransmittedDistance => format.put_reals(out, &[ray.transmit_distance]),
        FieldKind::ValueContribution => format.put_reals(out, &ray.contribution().to_array()),
        FieldKind::EffectiveDistance => format.put_reals(out, &[ray.effective_distance]),
        FieldKind::Length => format.put_reals(out, &[ray.distance()]),
        FieldKind::LocalCoords => {
            let uv = ray.hit.as_ref().map_or([0.0; 2], |h| h.uv.to_array());
            format.put_reals(out, &uv)
        }
        FieldKind::Point => format.put_reals(out, &hit_vector(ray, |h| h.point)),
        FieldKind::Normal => format.put_reals(out, &hit_vector(ray, |h| h.normal)),
        FieldKind::UnperturbedNormal => {
            format.put_reals(out, &hit_vector(ray, |h| h.stored_normal()))
        }
        FieldKind::Surface => {
            let name = ray.hit.as_ref().map_or(MISS_NAME, |h| h.surface.as_str());
            format.put_text(out, name)
        }
        FieldKind::Weight => format.put_reals(out, &[ray.weight]),
        FieldKind::Coefficient => {
            let coefficient = if ray.source_miss {
                DVec3::ZERO
            } else {
                ray.coefficient
            };
            format.put_reals(out, &coefficient.to_array())
        }
        FieldKind::Modifier => {
            let name = ray
                .hit
                .as_ref()
                .map_or(MISS_NAME, |h| h.modifier.as_deref().unwrap_or(VOID_NAME));
            format.put_text(out, name)
        }
        FieldKind::Material => {
            let name = ray
                .hit
                .as_ref()
                .map_or(MISS_NAME, |h| h.material.as_deref().unwrap_or(VOID_NAME));
            format.put_text(out, name)
        }
        FieldKind::Spacer => out.write_all(b"~\t"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::evaluated::{RayKind, SurfaceHit, TreeBuilder};
    use raypipe_math::{DVec2, RayDescriptor};

    fn surface(point: DVec3, modifier: Option<&str>) -> SurfaceHit {
        SurfaceHit {
            point,
            distance: point.length(),
            normal: -DVec3::Z,
            unperturbed_normal: DVec3::new(0.48, 0.6, 0.64),
            flipped: true,
            uv: DVec2::new(0.25, 0.5),
            surface: "ball".into(),
            modifier: modifier.map(String::from),
            material: modifier.map(String::from),
        }
    }

    fn two_level_tree() -> EvaluatedRay {
        let mut tree = TreeBuilder::new();
        let primary = tree.spawn(RayDescriptor::new(DVec3::ZERO, DVec3::Z), RayKind::Primary, None);
        tree.get_mut(primary).hit = Some(surface(DVec3::new(0.0, 0.0, 2.0), Some("chrome")));
        tree.get_mut(primary).color = DVec3::new(0.5, 0.5, 0.5);
        let child = tree.spawn(
            RayDescriptor::new(DVec3::new(0.0, 0.0, 2.0), -DVec3::Z),
            RayKind::Reflected,
            Some(primary),
        );
        tree.get_mut(child).color = DVec3::ONE;
        tree.get_mut(child).coefficient = DVec3::splat(0.5);
        tree.complete(child);
        tree.complete(primary);
        tree.finish()
    }

    fn render(fields: &str, format: OutputFormat, selection: TraceSelection, ev: &EvaluatedRay) -> Vec<u8> {
        let mut formatter = RayFormatter::new(FieldList::parse(fields).unwrap(), format, selection);
        let mut out = Vec::new();
        formatter.write_ray(&mut out, ev).unwrap();
        out
    }

    #[test]
    fn test_primary_record_fields() {
        let ev = two_level_tree();
        let text = String::from_utf8(render("Lsm~", OutputFormat::Ascii, TraceSelection::All, &ev)).unwrap();
        assert_eq!(text, "2.000000e+00\tball\tchrome\t~\t\n");

        let text = String::from_utf8(render("N", OutputFormat::Ascii, TraceSelection::All, &ev)).unwrap();
        assert_eq!(text, "-4.800000e-01\t-6.000000e-01\t-6.400000e-01\t\n");
    }

    #[test]
    fn test_miss_prints_placeholders() {
        let ev = EvaluatedRay::unevaluated(RayDescriptor::new(DVec3::ZERO, DVec3::X));
        let text = String::from_utf8(render("pmML", OutputFormat::Ascii, TraceSelection::All, &ev)).unwrap();
        assert_eq!(
            text,
            "0.000000e+00\t0.000000e+00\t0.000000e+00\t*\t*\t1.000000e+10\t\n"
        );
    }

    #[test]
    fn test_trace_lines_are_indented_by_depth() {
        let ev = two_level_tree();
        let text = String::from_utf8(render("vtV", OutputFormat::Ascii, TraceSelection::All, &ev)).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 3);
        assert_eq!(lines[0], "\t5.000000e-01\t5.000000e-01\t5.000000e-01\t");
        assert!(lines[1].starts_with("5.000000e-01"));
        assert_eq!(lines[2], lines[1]);
    }

    #[test]
    fn test_trace_without_primary_record() {
        let ev = two_level_tree();
        let text = String::from_utf8(render(
            "tm",
            OutputFormat::Ascii,
            TraceSelection::Include(vec!["chrome".into()]),
            &ev,
        ))
        .unwrap();
        assert_eq!(text, "chrome\t\n");
    }

    #[test]
    fn test_binary_record_has_no_terminator() {
        let ev = two_level_tree();
        let out = render("vL", OutputFormat::Float, TraceSelection::All, &ev);
        assert_eq!(out.len(), 16);
        let out = render("v", OutputFormat::Rgbe, TraceSelection::All, &ev);
        assert_eq!(out, vec![128, 128, 128, 128]);
    }
}
