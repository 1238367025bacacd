//! Path names read one per line from a byte stream.

use std::io::{self, BufRead};
use std::path::PathBuf;

/// Yields one path per input line, byte for byte.
///
/// Only the line terminator (`\n` or `\r\n`) is removed, so names with
/// surrounding spaces or bytes that are not UTF-8 come through intact.
/// An empty line yields an empty path. Stops at end of input or on the
/// first read error.
pub(crate) struct PathLines<R> {
    input: R,
    buf: Vec<u8>,
}

impl<R: BufRead> PathLines<R> {
    pub(crate) fn new(input: R) -> Self {
        Self {
            input,
            buf: Vec::new(),
        }
    }
}

impl<R: BufRead> Iterator for PathLines<R> {
    type Item = io::Result<PathBuf>;

    fn next(&mut self) -> Option<Self::Item> {
        self.buf.clear();
        match self.input.read_until(b'\n', &mut self.buf) {
            Ok(0) => None,
            Ok(_) => {
                let mut line = self.buf.as_slice();
                if let Some(rest) = line.strip_suffix(b"\n") {
                    line = rest.strip_suffix(b"\r").unwrap_or(rest);
                }
                Some(Ok(path_from_bytes(line)))
            }
            Err(e) => Some(Err(e)),
        }
    }
}

#[cfg(unix)]
fn path_from_bytes(bytes: &[u8]) -> PathBuf {
    use std::ffi::OsStr;
    use std::os::unix::ffi::OsStrExt;
    PathBuf::from(OsStr::from_bytes(bytes))
}

#[cfg(not(unix))]
fn path_from_bytes(bytes: &[u8]) -> PathBuf {
    PathBuf::from(String::from_utf8_lossy(bytes).into_owned())
}
