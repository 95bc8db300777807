//! Forward-only log tailing.

use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};

/// Reads complete lines appended to a file since the previous poll.
///
/// The file is reopened on every poll, so no handle outlives a call. A
/// trailing line without its terminator is held back until it completes.
/// A file that shrinks is treated as rotated and re-read from the start.
#[derive(Debug)]
pub struct LogTailer {
    path: PathBuf,
    offset: u64,
    pending: Vec<u8>,
}

impl LogTailer {
    /// Starts at the current end of `path`, skipping existing content.
    pub fn at_end(log: impl Into<PathBuf>) -> io::Result<Self> {
        let path = log.into();
        let offset = match path.metadata() {
            Ok(metadata) => metadata.len(),
            Err(error) if error.kind() == io::ErrorKind::NotFound => 0,
            Err(error) => return Err(error),
        };
        Ok(Self {
            path,
            offset,
            pending: Vec::new(),
        })
    }

    /// Starts at the beginning of `path`.
    #[must_use]
    pub fn from_start(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            offset: 0,
            pending: Vec::new(),
        }
    }

    /// Starts at byte `offset` of `path`.
    #[must_use]
    pub fn at_offset(path: impl Into<PathBuf>, offset: u64) -> Self {
        Self {
            path: path.into(),
            offset,
            pending: Vec::new(),
        }
    }

    /// File being tailed.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Bytes consumed so far.
    #[must_use]
    pub const fn offset(&self) -> u64 {
        self.offset
    }

    /// Returns the complete lines appended since the last poll, in order.
    pub fn poll(&mut self) -> io::Result<Vec<String>> {
        let mut file = match File::open(&self.path) {
            Ok(file) => file,
            Err(error) if error.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(error) => return Err(error),
        };
        let length = file.metadata()?.len();
        if length < self.offset {
            self.offset = 0;
            self.pending.clear();
        }
        if length == self.offset {
            return Ok(Vec::new());
        }

        file.seek(SeekFrom::Start(self.offset))?;
        let mut appended = Vec::new();
        file.take(length - self.offset).read_to_end(&mut appended)?;
        self.offset += u64::try_from(appended.len()).unwrap_or(u64::MAX);
        self.pending.extend_from_slice(&appended);
        Ok(self.drain_lines())
    }

    fn drain_lines(&mut self) -> Vec<String> {
        let mut lines = Vec::new();
        while let Some(end) = self.pending.iter().position(|byte| *byte == b'\n') {
            let raw: Vec<u8> = self.pending.drain(..=end).collect();
            let text = String::from_utf8_lossy(&raw);
            lines.push(text.trim_end_matches(['\n', '\r']).to_owned());
        }
        lines
    }
}

#[cfg(test)]
mod tests {
    use std::fs::{self, OpenOptions};
    use std::io::Write;

    use tempfile::TempDir;

    use super::*;

    fn append(path: &Path, text: &str) {
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .expect("open log");
        file.write_all(text.as_bytes()).expect("append");
    }

    #[test]
    fn skips_existing_content_when_attached_at_end() {
        let temp = TempDir::new().expect("temp dir");
        let log = temp.path().join("node.log");
        append(&log, "old line\n");
        let mut tailer = LogTailer::at_end(&log).expect("attach");

        append(&log, "new line\n");
        assert_eq!(tailer.poll().expect("poll"), ["new line"]);
        assert!(tailer.poll().expect("poll").is_empty());
    }

    #[test]
    fn buffers_partial_lines_until_terminated() {
        let temp = TempDir::new().expect("temp dir");
        let log = temp.path().join("node.log");
        let mut tailer = LogTailer::from_start(&log);

        append(&log, "first\r\nsec");
        assert_eq!(tailer.poll().expect("poll"), ["first"]);
        append(&log, "ond\nthird\n");
        assert_eq!(tailer.poll().expect("poll"), ["second", "third"]);
    }

    #[test]
    fn truncated_file_is_reread_from_start() {
        let temp = TempDir::new().expect("temp dir");
        let log = temp.path().join("node.log");
        append(&log, "a much longer first generation line\n");
        let mut tailer = LogTailer::at_end(&log).expect("attach");

        fs::write(&log, "rotated\n").expect("truncate");
        assert_eq!(tailer.poll().expect("poll"), ["rotated"]);
    }

    #[test]
    fn resumes_from_a_recorded_offset() {
        let temp = TempDir::new().expect("temp dir");
        let log = temp.path().join("node.log");
        append(&log, "before\n");
        let mut tailer = LogTailer::at_offset(&log, 7);

        append(&log, "after\n");
        assert_eq!(tailer.poll().expect("poll"), ["after"]);
    }

    #[test]
    fn missing_file_yields_nothing() {
        let temp = TempDir::new().expect("temp dir");
        let mut tailer = LogTailer::from_start(temp.path().join("absent.log"));
        assert!(tailer.poll().expect("poll").is_empty());
        assert_eq!(tailer.offset(), 0);
    }
}
