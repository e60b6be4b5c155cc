//! Dump file access: read-only mapping, line iteration, format detection

use crate::core::errors::{ProfileError, Result};
use memmap2::Mmap;
use std::fs::File;
use std::path::{Path, PathBuf};

/// Number of leading bytes searched for the `events:` marker
const DETECT_WINDOW: usize = 2047;

#[derive(Debug)]
enum DumpBytes {
    Mapped(Mmap),
    Owned(Vec<u8>),
}

/// A profile dump mapped read-only into memory
#[derive(Debug)]
pub struct DumpFile {
    bytes: DumpBytes,
    path: PathBuf,
}

impl DumpFile {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = File::open(&path).map_err(ProfileError::Io)?;
        let len = file.metadata().map_err(ProfileError::Io)?.len();
        let bytes = if len == 0 {
            DumpBytes::Owned(Vec::new())
        } else {
            // SAFETY: the mapping is read-only; truncation of a dump while it
            // is being loaded is not supported
            let map = unsafe { Mmap::map(&file) }.map_err(ProfileError::Io)?;
            DumpBytes::Mapped(map)
        };
        Ok(Self { bytes, path })
    }

    pub fn bytes(&self) -> &[u8] {
        match &self.bytes {
            DumpBytes::Mapped(map) => map,
            DumpBytes::Owned(buf) => buf,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn name(&self) -> String {
        self.path.display().to_string()
    }

    /// Whether this file carries the `events:` marker near the start
    pub fn is_recognized(&self) -> bool {
        detect(self.bytes())
    }
}

/// Recognition: `events:` at the start of a line within the first 2047 bytes
pub fn detect(bytes: &[u8]) -> bool {
    const MARKER: &[u8] = b"events:";
    let window = &bytes[..bytes.len().min(DETECT_WINDOW)];
    window
        .windows(MARKER.len())
        .enumerate()
        .any(|(i, w)| w == MARKER && (i == 0 || window[i - 1] == b'\n'))
}

/// Line cursor over the mapped dump. Yields lines without their terminator
/// and tracks the byte offset for progress reporting.
#[derive(Debug)]
pub struct Lines<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Lines<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    /// Bytes consumed so far
    pub fn offset(&self) -> usize {
        self.pos
    }

    pub fn total(&self) -> usize {
        self.buf.len()
    }
}

impl<'a> Iterator for Lines<'a> {
    type Item = &'a [u8];

    fn next(&mut self) -> Option<&'a [u8]> {
        if self.pos >= self.buf.len() {
            return None;
        }
        let rest = &self.buf[self.pos..];
        let (mut line, advance) = match rest.iter().position(|&b| b == b'\n') {
            Some(index) => (&rest[..index], index + 1),
            None => (rest, rest.len()),
        };
        self.pos += advance;
        if line.last() == Some(&b'\r') {
            line = &line[..line.len() - 1];
        }
        Some(line)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_detect_at_start_and_mid_file() {
        assert!(detect(b"events: Ir\n"));
        assert!(detect(b"version: 1\nevents: Ir\n"));
        assert!(!detect(b"# events: Ir\n"));
        assert!(!detect(b"xevents: Ir\n"));
        assert!(!detect(b""));
    }

    #[test]
    fn test_detect_window_is_bounded() {
        let mut far = vec![b'#'; DETECT_WINDOW + 1];
        far.push(b'\n');
        far.extend_from_slice(b"events: Ir\n");
        assert!(!detect(&far));
    }

    #[test]
    fn test_lines_track_offset() {
        let mut lines = Lines::new(b"a\nbb\r\nccc");
        assert_eq!(lines.next(), Some(&b"a"[..]));
        assert_eq!(lines.offset(), 2);
        assert_eq!(lines.next(), Some(&b"bb"[..]));
        assert_eq!(lines.offset(), 6);
        assert_eq!(lines.next(), Some(&b"ccc"[..]));
        assert_eq!(lines.next(), None);
        assert_eq!(lines.offset(), lines.total());
    }
}
