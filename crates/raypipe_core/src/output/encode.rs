//! Value encodings for output records.

use std::io::{self, Write};

use bytemuck::cast_slice;

/// Encoding of the numbers written to an output stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OutputFormat {
    /// `%e` style text, tab separated, newline terminated
    #[default]
    Ascii,
    /// Native byte order `f32`
    Float,
    /// Native byte order `f64`
    Double,
    /// Four byte shared-exponent color
    Rgbe,
}

impl OutputFormat {
    /// Map a format letter (`a`, `f`, `d`, `c`) to an encoding.
    pub fn from_char(c: char) -> Option<Self> {
        match c {
            'a' => Some(OutputFormat::Ascii),
            'f' => Some(OutputFormat::Float),
            'd' => Some(OutputFormat::Double),
            'c' => Some(OutputFormat::Rgbe),
            _ => None,
        }
    }

    /// Name used on the `FORMAT=` header line.
    pub fn name(self) -> &'static str {
        match self {
            OutputFormat::Ascii => "ascii",
            OutputFormat::Float => "float",
            OutputFormat::Double => "double",
            OutputFormat::Rgbe => "32-bit_rle_rgbe",
        }
    }

    /// Write a group of reals. RGBE accepts exactly one color.
    pub fn put_reals(self, out: &mut dyn Write, values: &[f64]) -> io::Result<()> {
        match self {
            OutputFormat::Ascii => {
                for &v in values {
                    write!(out, "{}\t", format_exp(v))?;
                }
                Ok(())
            }
            OutputFormat::Float => {
                let narrowed: Vec<f32> = values.iter().map(|&v| v as f32).collect();
                out.write_all(cast_slice(&narrowed))
            }
            OutputFormat::Double => out.write_all(cast_slice(values)),
            OutputFormat::Rgbe => match values {
                [r, g, b] => out.write_all(&rgbe(*r, *g, *b)),
                _ => Err(io::Error::new(
                    io::ErrorKind::InvalidInput,
                    format!("RGBE output needs 3 components, got {}", values.len()),
                )),
            },
        }
    }

    /// Write a name field. Names are text in every encoding.
    pub fn put_text(self, out: &mut dyn Write, text: &str) -> io::Result<()> {
        out.write_all(text.as_bytes())?;
        out.write_all(b"\t")
    }

    /// Terminate a record. Only ascii records have a terminator.
    pub fn end_record(self, out: &mut dyn Write) -> io::Result<()> {
        if self == OutputFormat::Ascii {
            out.write_all(b"\n")?;
        }
        Ok(())
    }
}

/// Format a real like C's `%e`: six fraction digits and a signed exponent
/// of at least two digits.
pub fn format_exp(value: f64) -> String {
    if value.is_nan() {
        return if value.is_sign_negative() { "-nan" } else { "nan" }.to_string();
    }
    if value.is_infinite() {
        return if value < 0.0 { "-inf" } else { "inf" }.to_string();
    }
    let text = format!("{:.6e}", value);
    match text.split_once('e') {
        Some((mantissa, exponent)) => {
            let exponent: i32 = exponent.parse().unwrap_or(0);
            let sign = if exponent < 0 { '-' } else { '+' };
            format!("{}e{}{:02}", mantissa, sign, exponent.abs())
        }
        None => text,
    }
}

/// Split a positive finite value into a mantissa in `[0.5, 1)` and a power
/// of two.
fn frexp(value: f64) -> (f64, i32) {
    if value == 0.0 || !value.is_finite() {
        return (value, 0);
    }
    let bits = value.to_bits();
    let exponent = ((bits >> 52) & 0x7ff) as i32;
    if exponent == 0 {
        let (m, e) = frexp(value * f64::powi(2.0, 54));
        return (m, e - 54);
    }
    let mantissa = f64::from_bits((bits & !(0x7ff << 52)) | (1022 << 52));
    (mantissa, exponent - 1022)
}

/// Encode a color as red, green, blue mantissas sharing one exponent byte.
pub fn rgbe(r: f64, g: f64, b: f64) -> [u8; 4] {
    let max = r.max(g).max(b);
    if max <= 1e-32 {
        return [0; 4];
    }
    let (mantissa, exponent) = frexp(max);
    let scale = mantissa * 256.0 / max;
    let channel = |c: f64| if c > 0.0 { (c * scale) as u8 } else { 0 };
    [channel(r), channel(g), channel(b), (exponent + 128) as u8]
}
