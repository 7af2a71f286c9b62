//! I/O module
//!
//! Handles CSV parsing and output.
//!
//! # Components
//!
//! - `csv_format` - CSV format handling (record conversion, output serialization)
//! - `async_reader` - Asynchronous replay reader feeding a request channel

pub mod async_reader;
pub mod csv_format;

pub use async_reader::{spawn_replay, AsyncReader};
pub use csv_format::{
    convert_csv_record, write_journal_csv, write_ledgers_csv, write_report_csv, CsvRecord,
};
