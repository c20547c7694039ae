//! Structure-data file parsing

pub mod models;
pub mod parser;

pub use models::{CompoundRecord, RecordPolicy, SdfRecord, RECORD_TERMINATOR, STRUCTURE_END};
pub use parser::{ParserOptions, SdfRecords};
