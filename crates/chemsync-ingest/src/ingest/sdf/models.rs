//! Record types produced by the SDF parser and consumed by the loader

use serde::{Deserialize, Serialize};

use crate::error::{IngestError, Result};

/// Line that closes every record of a structure-data file
pub const RECORD_TERMINATOR: &str = "$$$$";

/// Line that closes the connection table of a molfile
pub const STRUCTURE_END: &str = "M  END";

/// How record boundaries are found in the stream
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum RecordPolicy {
    /// Structure block is everything before the first `>` line
    #[default]
    Scanning,
    /// Structure block is sized by the counts line of a 4-line header
    Structured,
}

impl RecordPolicy {
    pub fn as_str(&self) -> &'static str {
        match self {
            RecordPolicy::Scanning => "scanning",
            RecordPolicy::Structured => "structured",
        }
    }
}

impl std::str::FromStr for RecordPolicy {
    type Err = IngestError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "scanning" | "scan" => Ok(RecordPolicy::Scanning),
            "structured" | "counts" => Ok(RecordPolicy::Structured),
            other => Err(IngestError::Config(format!("unknown record policy: {}", other))),
        }
    }
}

/// One record as extracted from the stream
///
/// `id` is `None` when the metadata block carried no identifier tag; callers
/// turn that into [`IngestError::MissingIdentifier`] via [`SdfRecord::require_id`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SdfRecord {
    pub id: Option<i32>,
    /// Verbatim structure block, `\n` separated, trailing newline included
    pub molfile: String,
    /// 1-based position of the record within its source stream
    pub ordinal: usize,
    /// Line number the record started on
    pub line: usize,
}

impl SdfRecord {
    pub fn require_id(&self, source_name: &str) -> Result<i32> {
        self.id.ok_or_else(|| IngestError::MissingIdentifier {
            source_name: source_name.to_string(),
            record: self.ordinal,
        })
    }

    /// Convert into a storable record, failing when the identifier is absent
    pub fn into_compound(self, source_name: &str) -> Result<CompoundRecord> {
        let id = self.require_id(source_name)?;
        Ok(CompoundRecord {
            id,
            molfile: self.molfile,
        })
    }
}

/// Row written to the compound store
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompoundRecord {
    /// External stable identifier
    pub id: i32,
    /// Serialized structure block, stored byte-for-byte
    pub molfile: String,
}

impl CompoundRecord {
    pub fn new(id: i32, molfile: impl Into<String>) -> Self {
        Self {
            id,
            molfile: molfile.into(),
        }
    }
}
