//! Streaming reader for replay scripts
//!
//! `ScriptReader` reads one CSV row at a time and converts it through
//! `csv_format::convert_script_record`, yielding
//! `Result<ScriptCommand, String>` per row.
//!
//! # Error Handling
//!
//! - Fatal errors (file not found, I/O errors) are returned from `new()`
//! - Malformed rows are yielded as `Err` with their line number, so the
//!   caller can log them and continue

use std::fs::File;
use std::path::Path;

use csv::{ReaderBuilder, Trim};

use crate::io::csv_format::{convert_script_record, ScriptCommand, ScriptRecord};

/// Iterator over the commands of a replay script
#[derive(Debug)]
pub struct ScriptReader {
    reader: csv::Reader<File>,
    line_num: usize,
}

impl ScriptReader {
    /// Open a script file
    ///
    /// Fields are trimmed and rows may omit trailing columns.
    ///
    /// # Returns
    ///
    /// * `Ok(ScriptReader)` if the file opened successfully
    /// * `Err(String)` if the file could not be opened
    pub fn new(path: &Path) -> Result<Self, String> {
        let file = File::open(path)
            .map_err(|e| format!("Failed to open file '{}': {}", path.display(), e))?;

        let reader = ReaderBuilder::new()
            .trim(Trim::All)
            .flexible(true)
            .buffer_capacity(8 * 1024)
            .from_reader(file);

        Ok(Self {
            reader,
            line_num: 1,
        })
    }
}

impl Iterator for ScriptReader {
    type Item = Result<ScriptCommand, String>;

    fn next(&mut self) -> Option<Self::Item> {
        let mut deserializer = self.reader.deserialize::<ScriptRecord>();
        let row = deserializer.next()?;
        self.line_num += 1;

        Some(match row {
            Ok(record) => convert_script_record(&record)
                .map_err(|e| format!("Line {}: {}", self.line_num, e)),
            Err(e) => Err(format!("Line {}: CSV parse error: {}", self.line_num, e)),
        })
    }
}
