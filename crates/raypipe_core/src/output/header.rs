//! Information header and resolution line.

use std::io::{self, Write};

use super::OutputFormat;

/// Header lines written before the first record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Header {
    pub command: String,
    /// Extra `NAME=value` lines
    pub variables: Vec<String>,
    pub format: OutputFormat,
}

impl Header {
    pub fn new(command: impl Into<String>, format: OutputFormat) -> Self {
        Self {
            command: command.into(),
            variables: Vec::new(),
            format,
        }
    }

    pub fn with_variable(mut self, line: impl Into<String>) -> Self {
        self.variables.push(line.into());
        self
    }

    pub fn write(&self, out: &mut dyn Write) -> io::Result<()> {
        writeln!(out, "#?RADIANCE")?;
        writeln!(out, "{}", self.command)?;
        for line in &self.variables {
            writeln!(out, "{}", line)?;
        }
        writeln!(out, "FORMAT={}", self.format.name())?;
        writeln!(out)
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut bytes = Vec::new();
        // Writing into a Vec cannot fail
        let _ = self.write(&mut bytes);
        bytes
    }
}

/// Standard orientation resolution line: rows top to bottom, columns left
/// to right.
pub fn write_resolution(out: &mut dyn Write, x: u32, y: u32) -> io::Result<()> {
    writeln!(out, "-Y {} +X {}", y, x)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_layout() {
        let header = Header::new("rtrace -ov scene.json", OutputFormat::Float);
        assert_eq!(
            String::from_utf8(header.to_bytes()).unwrap(),
            "#?RADIANCE\nrtrace -ov scene.json\nFORMAT=float\n\n"
        );

        let header = Header::new("rcontrib -m wall", OutputFormat::Ascii).with_variable("NCOMP=3");
        assert_eq!(
            String::from_utf8(header.to_bytes()).unwrap(),
            "#?RADIANCE\nrcontrib -m wall\nNCOMP=3\nFORMAT=ascii\n\n"
        );
    }

    #[test]
    fn test_resolution_line() {
        let mut out = Vec::new();
        write_resolution(&mut out, 640, 480).unwrap();
        assert_eq!(out, b"-Y 480 +X 640\n");
    }
}
