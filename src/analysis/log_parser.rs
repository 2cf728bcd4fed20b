//! Log reader for newline-delimited JSON trace files.
//!
//! Each line is decoded on its own. A line that does not decode is counted
//! and skipped, and a missing file reads as empty. Field presence is not
//! checked here; that happens once records are tagged with their node.

use std::fs::File;
use std::io::{self, BufRead, BufReader};
use std::path::Path;

use serde::de::DeserializeOwned;

/// Records decoded from one JSONL file
#[derive(Debug, Clone)]
pub struct JsonlContents<T> {
    pub records: Vec<T>,
    /// Non-blank lines that failed to decode
    pub malformed_lines: usize,
    /// The file did not exist
    pub missing: bool,
}

impl<T> JsonlContents<T> {
    fn empty(missing: bool) -> Self {
        Self {
            records: Vec::new(),
            malformed_lines: 0,
            missing,
        }
    }
}

/// Read a JSONL file into records of type `T`.
///
/// Only I/O failures other than "not found" are returned as errors.
pub fn read_jsonl_file<T: DeserializeOwned>(path: &Path) -> io::Result<JsonlContents<T>> {
    let file = match File::open(path) {
        Ok(f) => f,
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            log::debug!("No trace file at {}", path.display());
            return Ok(JsonlContents::empty(true));
        }
        Err(e) => return Err(e),
    };

    read_jsonl(BufReader::with_capacity(64 * 1024, file))
}

/// Decode JSONL records from any buffered reader
pub fn read_jsonl<T: DeserializeOwned, R: BufRead>(mut reader: R) -> io::Result<JsonlContents<T>> {
    let mut contents = JsonlContents::empty(false);
    let mut line = Vec::new();

    loop {
        line.clear();
        if reader.read_until(b'\n', &mut line)? == 0 {
            break;
        }

        let trimmed = line.trim_ascii();
        if trimmed.is_empty() {
            continue;
        }

        // Bad UTF-8 and truncated writes both land here
        match serde_json::from_slice::<T>(trimmed) {
            Ok(record) => contents.records.push(record),
            Err(_) => contents.malformed_lines += 1,
        }
    }

    Ok(contents)
}
