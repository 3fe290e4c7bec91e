//! Output formatting for evaluated rays and accumulated bins.
//!
//! - [`OutputFormat`]: ascii, float, double or RGBE value encoding
//! - [`FieldList`]: which quantities make up a record
//! - [`RayFormatter`]: writes per-ray records and trace lines
//! - [`Header`]: information header and resolution line

mod encode;
mod fields;
mod header;
mod record;
mod trace;

use thiserror::Error;

use crate::reader::InputFormat;

pub use encode::{format_exp, rgbe, OutputFormat};
pub use fields::{FieldKind, FieldList, TraceFields};
pub use header::{write_resolution, Header};
pub use record::RayFormatter;
pub use trace::{TraceFilter, TraceSelection, MAX_TRACE_SET};

/// Errors in the output configuration.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum OutputError {
    #[error("unknown output field '{0}'")]
    UnknownField(char),

    #[error("more than one trace marker in output fields")]
    DuplicateTrace,

    #[error("color format only with -ov, -or, -ox")]
    ColorFormat,

    #[error("unknown output format '{0}'")]
    UnknownFormat(char),

    #[error("unknown input format '{0}'")]
    UnknownInputFormat(char),
}

/// Parse a `-f` style format option: one letter for both input and output,
/// or two letters for input then output.
pub fn parse_io_formats(spec: &str) -> Result<(InputFormat, OutputFormat), OutputError> {
    let mut chars = spec.chars();
    let first = chars.next().unwrap_or('a');
    let second = chars.next().unwrap_or(first);
    let input = InputFormat::from_char(first).ok_or(OutputError::UnknownInputFormat(first))?;
    let output = OutputFormat::from_char(second).ok_or(OutputError::UnknownFormat(second))?;
    Ok((input, output))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_io_formats() {
        assert_eq!(
            parse_io_formats("d").unwrap(),
            (InputFormat::Double, OutputFormat::Double)
        );
        assert_eq!(
            parse_io_formats("ac").unwrap(),
            (InputFormat::Ascii, OutputFormat::Rgbe)
        );
        assert_eq!(
            parse_io_formats("c"),
            Err(OutputError::UnknownInputFormat('c'))
        );
        assert_eq!(parse_io_formats("fz"), Err(OutputError::UnknownFormat('z')));
    }
}
