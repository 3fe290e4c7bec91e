//! Output destinations for modifier bins.

use std::collections::{BTreeMap, HashMap};
use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::sync::{Arc, Mutex};

use super::RegistryError;

/// Opens the stream behind a destination name. `None` and `"-"` mean
/// standard output.
pub trait DestinationOpener {
    fn open(&mut self, name: Option<&str>) -> io::Result<Box<dyn Write>>;
}

/// Creates files, and writes unnamed destinations and `-` to standard output.
#[derive(Debug, Default)]
pub struct FileOpener;

impl DestinationOpener for FileOpener {
    fn open(&mut self, name: Option<&str>) -> io::Result<Box<dyn Write>> {
        match name {
            None | Some("-") => Ok(Box::new(BufWriter::new(io::stdout()))),
            Some(path) => Ok(Box::new(BufWriter::new(File::create(path)?))),
        }
    }
}

/// Writer appending to a buffer that stays readable after the writer moves.
#[derive(Debug, Clone, Default)]
pub struct SharedBuffer(Arc<Mutex<Vec<u8>>>);

impl SharedBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contents(&self) -> Vec<u8> {
        self.0.lock().map(|b| b.clone()).unwrap_or_default()
    }
}

impl Write for SharedBuffer {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let mut inner = self
            .0
            .lock()
            .map_err(|_| io::Error::new(io::ErrorKind::Other, "output buffer poisoned"))?;
        inner.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Keeps every destination in memory, keyed by name (`"-"` for standard
/// output).
#[derive(Debug, Clone, Default)]
pub struct MemoryOpener {
    buffers: Arc<Mutex<BTreeMap<String, SharedBuffer>>>,
}

impl MemoryOpener {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contents(&self, name: &str) -> Option<Vec<u8>> {
        let buffers = self.buffers.lock().ok()?;
        buffers.get(name).map(SharedBuffer::contents)
    }

    pub fn names(&self) -> Vec<String> {
        self.buffers
            .lock()
            .map(|b| b.keys().cloned().collect())
            .unwrap_or_default()
    }
}

impl DestinationOpener for MemoryOpener {
    fn open(&mut self, name: Option<&str>) -> io::Result<Box<dyn Write>> {
        let buffer = SharedBuffer::new();
        self.buffers
            .lock()
            .map_err(|_| io::Error::new(io::ErrorKind::Other, "output buffer poisoned"))?
            .insert(name.unwrap_or("-").to_string(), buffer.clone());
        Ok(Box::new(buffer))
    }
}

/// Parsed output name template.
///
/// `%s` expands to the modifier name, `%d` (with optional flags and width,
/// e.g. `%03d`) to the bin number, `%%` to a percent sign.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputSpec {
    pieces: Vec<Piece>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Piece {
    Literal(String),
    Modifier,
    Bin {
        left: bool,
        zero: bool,
        plus: bool,
        width: usize,
    },
}

impl OutputSpec {
    pub fn parse(template: &str) -> Result<Self, RegistryError> {
        let bad = |reason: &str| RegistryError::BadOutputSpec {
            spec: template.to_string(),
            reason: reason.to_string(),
        };
        let mut pieces = Vec::new();
        let mut literal = String::new();
        let (mut modifiers, mut bins) = (0, 0);
        let mut chars = template.chars().peekable();

        while let Some(c) = chars.next() {
            if c != '%' {
                literal.push(c);
                continue;
            }
            let (mut left, mut zero, mut plus) = (false, false, false);
            while let Some(&flag) = chars.peek() {
                match flag {
                    '-' => left = true,
                    '0' => zero = true,
                    '+' => plus = true,
                    _ => break,
                }
                chars.next();
            }
            let mut width = 0usize;
            while let Some(digit) = chars.peek().and_then(|c| c.to_digit(10)) {
                width = width * 10 + digit as usize;
                chars.next();
            }
            let plain = !(left || zero || plus) && width == 0;
            match chars.next() {
                Some('%') if plain => literal.push('%'),
                Some('s') if plain => {
                    modifiers += 1;
                    if modifiers > 1 {
                        return Err(bad("more than one modifier (%s) conversion"));
                    }
                    pieces.push(Piece::Literal(std::mem::take(&mut literal)));
                    pieces.push(Piece::Modifier);
                }
                Some('d') | Some('i') => {
                    bins += 1;
                    if bins > 1 {
                        return Err(bad("more than one bin (%d) conversion"));
                    }
                    pieces.push(Piece::Literal(std::mem::take(&mut literal)));
                    pieces.push(Piece::Bin {
                        left,
                        zero,
                        plus,
                        width,
                    });
                }
                _ => return Err(bad("unsupported conversion")),
            }
        }
        if !literal.is_empty() {
            pieces.push(Piece::Literal(literal));
        }
        pieces.retain(|p| !matches!(p, Piece::Literal(s) if s.is_empty()));
        Ok(Self { pieces })
    }

    /// True when every bin gets its own destination.
    pub fn per_bin(&self) -> bool {
        self.pieces.iter().any(|p| matches!(p, Piece::Bin { .. }))
    }

    pub fn render(&self, modifier: &str, bin: usize) -> String {
        let mut name = String::new();
        for piece in &self.pieces {
            match piece {
                Piece::Literal(s) => name.push_str(s),
                Piece::Modifier => name.push_str(modifier),
                Piece::Bin {
                    left,
                    zero,
                    plus,
                    width,
                } => {
                    let digits = if *plus {
                        format!("+{}", bin)
                    } else {
                        bin.to_string()
                    };
                    let padded = match (*left, *zero) {
                        (true, _) => format!("{:<width$}", digits, width = *width),
                        (false, true) if *plus => {
                            format!("+{:0>width$}", bin, width = width.saturating_sub(1))
                        }
                        (false, true) => format!("{:0>width$}", digits, width = *width),
                        (false, false) => format!("{:>width$}", digits, width = *width),
                    };
                    name.push_str(&padded);
                }
            }
        }
        name
    }
}

/// Index of an open destination.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DestinationId(usize);

struct Destination {
    name: Option<String>,
    writer: Box<dyn Write>,
}

/// Open destinations, shared between bins that resolve to the same name.
pub struct DestinationTable {
    opener: Box<dyn DestinationOpener>,
    header: Option<Vec<u8>>,
    entries: Vec<Destination>,
    by_name: HashMap<Option<String>, DestinationId>,
}

impl DestinationTable {
    pub fn new(opener: Box<dyn DestinationOpener>) -> Self {
        Self {
            opener,
            header: None,
            entries: Vec::new(),
            by_name: HashMap::new(),
        }
    }

    /// Bytes written to each destination as soon as it is opened.
    pub fn set_header(&mut self, header: Vec<u8>) {
        self.header = Some(header);
    }

    /// Return the destination called `name`, opening it on first use.
    pub fn get_or_open(&mut self, name: Option<&str>) -> Result<DestinationId, RegistryError> {
        let name = name.filter(|n| *n != "-");
        let key = name.map(String::from);
        if let Some(&id) = self.by_name.get(&key) {
            return Ok(id);
        }
        let label = name.unwrap_or("<stdout>").to_string();
        let mut writer = self
            .opener
            .open(name)
            .map_err(|source| RegistryError::Open {
                name: label.clone(),
                source,
            })?;
        if let Some(header) = &self.header {
            writer
                .write_all(header)
                .map_err(|source| RegistryError::Open { name: label, source })?;
        }
        let id = DestinationId(self.entries.len());
        self.entries.push(Destination { name: key.clone(), writer });
        self.by_name.insert(key, id);
        log::debug!("opened output {:?}", name);
        Ok(id)
    }

    /// Marker for [`DestinationTable::rollback`].
    pub fn checkpoint(&self) -> usize {
        self.entries.len()
    }

    /// Close every destination opened since `checkpoint` was taken.
    pub fn rollback(&mut self, checkpoint: usize) {
        if checkpoint >= self.entries.len() {
            return;
        }
        for entry in self.entries.drain(checkpoint..) {
            log::debug!("closing output {:?}", entry.name);
        }
        self.by_name.retain(|_, id| id.0 < checkpoint);
    }

    pub fn writer(&mut self, id: DestinationId) -> &mut dyn Write {
        self.entries[id.0].writer.as_mut()
    }

    pub fn name(&self, id: DestinationId) -> Option<&str> {
        self.entries[id.0].name.as_deref()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn ids(&self) -> impl Iterator<Item = DestinationId> {
        (0..self.entries.len()).map(DestinationId)
    }

    pub fn flush_all(&mut self) -> io::Result<()> {
        for entry in &mut self.entries {
            entry.writer.flush()?;
        }
        Ok(())
    }
}

impl std::fmt::Debug for DestinationTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DestinationTable")
            .field("names", &self.entries.iter().map(|e| &e.name).collect::<Vec<_>>())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dash_is_standard_output() {
        let dir = std::env::temp_dir().join(format!("raypipe_dash_{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let mut opener = FileOpener;
        let file = dir.join("bins.dat");
        opener.open(Some(file.to_str().unwrap())).unwrap();
        assert!(file.exists());
        opener.open(Some("-")).unwrap();
        assert!(!std::path::Path::new("-").exists());
        std::fs::remove_dir_all(&dir).unwrap();

        let mut table = DestinationTable::new(Box::new(MemoryOpener::new()));
        let stdout = table.get_or_open(None).unwrap();
        assert_eq!(table.get_or_open(Some("-")).unwrap(), stdout);
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn test_output_spec_rendering() {
        let spec = OutputSpec::parse("%s_%03d.dat").unwrap();
        assert!(spec.per_bin());
        assert_eq!(spec.render("sky", 7), "sky_007.dat");

        let spec = OutputSpec::parse("out/%s.txt").unwrap();
        assert!(!spec.per_bin());
        assert_eq!(spec.render("wall", 3), "out/wall.txt");

        let spec = OutputSpec::parse("100%%_%-3d|").unwrap();
        assert_eq!(spec.render("m", 4), "100%_4  |");

        let spec = OutputSpec::parse("b%+04d").unwrap();
        assert_eq!(spec.render("m", 5), "b+005");
    }

    #[test]
    fn test_output_spec_errors() {
        for template in ["%s%s", "%d_%d", "%f", "%5s", "trailing%"] {
            assert!(
                matches!(OutputSpec::parse(template), Err(RegistryError::BadOutputSpec { .. })),
                "{template}"
            );
        }
    }

    #[test]
    fn test_destinations_are_reused_by_name() {
        let opener = MemoryOpener::new();
        let mut table = DestinationTable::new(Box::new(opener.clone()));
        table.set_header(b"HEAD\n".to_vec());

        let a = table.get_or_open(Some("a.txt")).unwrap();
        let b = table.get_or_open(Some("b.txt")).unwrap();
        let again = table.get_or_open(Some("a.txt")).unwrap();
        let stdout = table.get_or_open(None).unwrap();
        assert_eq!(a, again);
        assert_ne!(a, b);
        assert_eq!(table.len(), 3);
        assert_eq!(table.name(stdout), None);

        table.writer(a).write_all(b"x").unwrap();
        table.flush_all().unwrap();
        assert_eq!(opener.contents("a.txt").unwrap(), b"HEAD\nx");
        assert_eq!(opener.contents("-").unwrap(), b"HEAD\n");
        assert_eq!(opener.names(), vec!["-", "a.txt", "b.txt"]);
    }
}
