//! Output field selection.

use super::{OutputError, OutputFormat};

/// One quantity written per ray.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    /// `o` ray origin
    Origin,
    /// `d` ray direction
    Direction,
    /// `v` ray value
    Value,
    /// `r` value arriving through mirror reflection
    Mirrored,
    /// `R` mirrored distance
    MirroredDistance,
    /// `x` value minus its mirrored part
    Transmitted,
    /// `X` transmitted distance
    TransmittedDistance,
    /// `V` value times coefficient
    ValueContribution,
    /// `l` effective distance
    EffectiveDistance,
    /// `L` single ray length
    Length,
    /// `c` local surface coordinates
    LocalCoords,
    /// `p` intersection point
    Point,
    /// `n` perturbed normal
    Normal,
    /// `N` unperturbed normal
    UnperturbedNormal,
    /// `s` surface name
    Surface,
    /// `w` ray weight
    Weight,
    /// `W` contribution coefficient
    Coefficient,
    /// `m` modifier name
    Modifier,
    /// `M` material name
    Material,
    /// `~` spacer
    Spacer,
}

impl FieldKind {
    pub fn from_char(c: char) -> Option<Self> {
        Some(match c {
            'o' => FieldKind::Origin,
            'd' => FieldKind::Direction,
            'v' => FieldKind::Value,
            'r' => FieldKind::Mirrored,
            'R' => FieldKind::MirroredDistance,
            'x' => FieldKind::Transmitted,
            'X' => FieldKind::TransmittedDistance,
            'V' => FieldKind::ValueContribution,
            'l' => FieldKind::EffectiveDistance,
            'L' => FieldKind::Length,
            'c' => FieldKind::LocalCoords,
            'p' => FieldKind::Point,
            'n' => FieldKind::Normal,
            'N' => FieldKind::UnperturbedNormal,
            's' => FieldKind::Surface,
            'w' => FieldKind::Weight,
            'W' => FieldKind::Coefficient,
            'm' => FieldKind::Modifier,
            'M' => FieldKind::Material,
            '~' => FieldKind::Spacer,
            _ => return None,
        })
    }

    /// True when the field can only be filled by shading the ray.
    pub fn needs_shading(self) -> bool {
        matches!(
            self,
            FieldKind::Value
                | FieldKind::Mirrored
                | FieldKind::MirroredDistance
                | FieldKind::Transmitted
                | FieldKind::TransmittedDistance
                | FieldKind::ValueContribution
                | FieldKind::EffectiveDistance
                | FieldKind::Normal
                | FieldKind::Coefficient
        )
    }
}

/// Fields written for every ray of the shading tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TraceFields {
    pub fields: Vec<FieldKind>,
    /// Include shadow rays sent toward light sources (`T`)
    pub follow_sources: bool,
}

/// Ordered list of fields for the primary record, plus the optional trace
/// list that follows `t` or `T`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldList {
    pub ray_fields: Vec<FieldKind>,
    pub trace: Option<TraceFields>,
}

impl Default for FieldList {
    fn default() -> Self {
        Self {
            ray_fields: vec![FieldKind::Value],
            trace: None,
        }
    }
}

impl FieldList {
    /// Parse a field string such as `"ov"` or `"vTopm"`.
    ///
    /// A trailing `t` or `T` with nothing after it is ignored.
    pub fn parse(spec: &str) -> Result<Self, OutputError> {
        let mut ray_fields = Vec::new();
        let mut trace: Option<TraceFields> = None;
        let mut chars = spec.chars().peekable();
        while let Some(c) = chars.next() {
            match c {
                't' | 'T' => {
                    if chars.peek().is_none() {
                        break;
                    }
                    if trace.is_some() {
                        return Err(OutputError::DuplicateTrace);
                    }
                    trace = Some(TraceFields {
                        fields: Vec::new(),
                        follow_sources: c == 'T',
                    });
                }
                c => {
                    let kind = FieldKind::from_char(c).ok_or(OutputError::UnknownField(c))?;
                    match trace.as_mut() {
                        Some(t) => t.fields.push(kind),
                        None => ray_fields.push(kind),
                    }
                }
            }
        }
        Ok(Self { ray_fields, trace })
    }

    /// False when intersecting rays is enough to fill every field.
    pub fn needs_shading(&self) -> bool {
        self.trace.is_some() || self.ray_fields.iter().any(|f| f.needs_shading())
    }

    /// Log warnings for fields that will not give meaningful values.
    pub fn warn_compatibility(&self, irradiance: bool) {
        let has = |kinds: &[FieldKind]| self.ray_fields.iter().any(|f| kinds.contains(f));
        if has(&[FieldKind::ValueContribution, FieldKind::Coefficient]) {
            log::warn!("-oVW options require trace mode");
        }
        if irradiance
            && has(&[
                FieldKind::Mirrored,
                FieldKind::MirroredDistance,
                FieldKind::Transmitted,
                FieldKind::TransmittedDistance,
            ])
        {
            log::warn!("-orRxX options incompatible with -I+ and -i+");
        }
    }

    /// RGBE output only carries one color per record.
    pub fn check_format(&self, format: OutputFormat) -> Result<(), OutputError> {
        if format != OutputFormat::Rgbe {
            return Ok(());
        }
        let single_color = matches!(
            self.ray_fields.as_slice(),
            [] | [FieldKind::Value] | [FieldKind::Mirrored] | [FieldKind::Transmitted]
        );
        if single_color && self.trace.is_none() {
            Ok(())
        } else {
            Err(OutputError::ColorFormat)
        }
    }
}
