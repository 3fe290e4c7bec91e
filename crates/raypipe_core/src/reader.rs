//! Ray stream reader.
//!
//! Input is a sequence of vector pairs:
//!
//! ```text
//! xorg  yorg  zorg  xdir  ydir  zdir
//! ```
//!
//! The direction need not be normalized. A zero direction requests a flush.
//! Vectors are whitespace separated ascii reals, or native-order binary
//! `f32`/`f64` triples.

use std::io::{BufRead, ErrorKind as IoErrorKind};

use raypipe_math::{DVec3, RayDescriptor};
use thiserror::Error;

/// Longest ascii token accepted as a number.
const MAX_WORD_LEN: usize = 31;

/// Encoding of the input ray stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum InputFormat {
    #[default]
    Ascii,
    Float,
    Double,
}

impl InputFormat {
    /// Map a format letter (`a`, `f`, `d`) to an input format.
    pub fn from_char(c: char) -> Option<Self> {
        match c {
            'a' => Some(Self::Ascii),
            'f' => Some(Self::Float),
            'd' => Some(Self::Double),
            _ => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Ascii => "ascii",
            Self::Float => "float",
            Self::Double => "double",
        }
    }
}

/// Errors that can occur while decoding the ray stream.
#[derive(Error, Debug)]
pub enum ReadError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid number format: {0:?}")]
    InvalidNumber(String),

    #[error("short read: got {got} of {expected} bytes")]
    ShortRead { got: usize, expected: usize },

    #[error("vector truncated after {0} of 3 components")]
    Truncated(usize),
}

impl ReadError {
    /// True for malformed input, as opposed to a failing input stream.
    pub fn is_format(&self) -> bool {
        !matches!(self, ReadError::Io(_))
    }
}

/// One step of the ray stream.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum RayEvent {
    Ray(RayDescriptor),
    Flush,
    EndOfInput,
}

/// Decoder for a ray stream.
pub struct RayReader<R> {
    input: R,
    format: InputFormat,
    limit_distance: bool,
    vectors_read: u64,
}

impl<R: BufRead> RayReader<R> {
    pub fn new(input: R, format: InputFormat) -> Self {
        Self {
            input,
            format,
            limit_distance: false,
            vectors_read: 0,
        }
    }

    /// Keep the input direction length as the ray's maximum distance.
    pub fn limit_distance(mut self, limit: bool) -> Self {
        self.limit_distance = limit;
        self
    }

    pub fn format(&self) -> InputFormat {
        self.format
    }

    /// Number of complete vectors decoded so far.
    pub fn vectors_read(&self) -> u64 {
        self.vectors_read
    }

    /// Next event of the stream, with malformed input reported as the end.
    ///
    /// Only failures of the underlying stream are returned as errors.
    pub fn next_event(&mut self) -> Result<RayEvent, ReadError> {
        match self.read_ray() {
            Err(e) if e.is_format() => {
                log::debug!("input ends after {} vectors: {e}", self.vectors_read);
                Ok(RayEvent::EndOfInput)
            }
            other => other,
        }
    }

    /// Decode the next origin/direction pair.
    pub fn read_ray(&mut self) -> Result<RayEvent, ReadError> {
        let Some(origin) = self.read_vector()? else {
            return Ok(RayEvent::EndOfInput);
        };
        let Some(direction) = self.read_vector()? else {
            return Err(ReadError::Truncated(0));
        };
        Ok(match RayDescriptor::from_raw(origin, direction, self.limit_distance) {
            Some(ray) => RayEvent::Ray(ray),
            None => RayEvent::Flush,
        })
    }

    /// Decode one 3-component vector. Returns `None` on a clean end of input.
    pub fn read_vector(&mut self) -> Result<Option<DVec3>, ReadError> {
        let v = match self.format {
            InputFormat::Ascii => self.read_ascii()?,
            InputFormat::Float => self
                .read_binary::<12>()?
                .map(|b| bytemuck::pod_read_unaligned::<[f32; 3]>(&b))
                .map(|v| DVec3::new(v[0] as f64, v[1] as f64, v[2] as f64)),
            InputFormat::Double => self
                .read_binary::<24>()?
                .map(|b| DVec3::from_array(bytemuck::pod_read_unaligned::<[f64; 3]>(&b))),
        };
        if v.is_some() {
            self.vectors_read += 1;
        }
        Ok(v)
    }

    fn read_ascii(&mut self) -> Result<Option<DVec3>, ReadError> {
        let mut v = [0.0; 3];
        for (i, component) in v.iter_mut().enumerate() {
            let Some(word) = self.read_word()? else {
                if i == 0 {
                    return Ok(None);
                }
                return Err(ReadError::Truncated(i));
            };
            if !is_decimal(&word) {
                return Err(ReadError::InvalidNumber(word));
            }
            *component = word
                .parse()
                .map_err(|_| ReadError::InvalidNumber(word.clone()))?;
        }
        Ok(Some(DVec3::from_array(v)))
    }

    fn read_binary<const N: usize>(&mut self) -> Result<Option<[u8; N]>, ReadError> {
        let mut buf = [0u8; N];
        let mut got = 0;
        while got < N {
            match self.input.read(&mut buf[got..]) {
                Ok(0) => break,
                Ok(n) => got += n,
                Err(e) if e.kind() == IoErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            }
        }
        match got {
            0 => Ok(None),
            n if n == N => Ok(Some(buf)),
            n => Err(ReadError::ShortRead { got: n, expected: N }),
        }
    }

    /// Next whitespace-delimited word, `None` at end of input.
    ///
    /// At most `MAX_WORD_LEN + 1` bytes of a word are kept; the rest is
    /// skipped up to the next whitespace.
    fn read_word(&mut self) -> Result<Option<String>, ReadError> {
        let mut word = Vec::with_capacity(MAX_WORD_LEN + 1);
        loop {
            let (used, done) = {
                let buf = match self.input.fill_buf() {
                    Ok(buf) => buf,
                    Err(e) if e.kind() == IoErrorKind::Interrupted => continue,
                    Err(e) => return Err(e.into()),
                };
                if buf.is_empty() {
                    break;
                }
                let mut used = 0;
                let mut done = false;
                for &b in buf {
                    used += 1;
                    if b.is_ascii_whitespace() {
                        if !word.is_empty() {
                            done = true;
                            break;
                        }
                    } else if word.len() <= MAX_WORD_LEN {
                        word.push(b);
                    }
                }
                (used, done)
            };
            self.input.consume(used);
            if done {
                break;
            }
        }
        if word.is_empty() {
            return Ok(None);
        }
        let word = String::from_utf8_lossy(&word).into_owned();
        if word.len() > MAX_WORD_LEN {
            return Err(ReadError::InvalidNumber(word));
        }
        Ok(Some(word))
    }
}

/// Plain decimal real: sign, digits with an optional point, optional exponent.
fn is_decimal(word: &str) -> bool {
    let bytes = word.as_bytes();
    let mut i = 0;
    if matches!(bytes.first(), Some(b'+' | b'-')) {
        i += 1;
    }
    let mut digits = 0;
    while i < bytes.len() && bytes[i].is_ascii_digit() {
        i += 1;
        digits += 1;
    }
    if i < bytes.len() && bytes[i] == b'.' {
        i += 1;
        while i < bytes.len() && bytes[i].is_ascii_digit() {
            i += 1;
            digits += 1;
        }
    }
    if digits == 0 {
        return false;
    }
    if i < bytes.len() && matches!(bytes[i], b'e' | b'E') {
        i += 1;
        if i < bytes.len() && matches!(bytes[i], b'+' | b'-') {
            i += 1;
        }
        let start = i;
        while i < bytes.len() && bytes[i].is_ascii_digit() {
            i += 1;
        }
        if i == start {
            return false;
        }
    }
    i == bytes.len()
}
