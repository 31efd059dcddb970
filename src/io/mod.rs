//! I/O module
//!
//! Handles replay script parsing and summary output.
//!
//! # Components
//!
//! - `csv_format` - CSV format handling (record conversion, output serialization)
//! - `script_reader` - Streaming script reader with iterator interface
//! - `replay` - Drives a `LedgerApp` from a script

pub mod csv_format;
pub mod replay;
pub mod script_reader;

pub use csv_format::{
    convert_script_record, write_users_csv, ScriptCommand, ScriptRecord, UserSummary,
};
pub use replay::{ReplayStats, Replayer};
pub use script_reader::ScriptReader;
