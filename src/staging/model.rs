use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// One row as returned by the ERP source. Field order is preserved.
pub type RawRow = Map<String, Value>;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MappedRow {
    pub fields: Map<String, Value>,
    /// Natural key used for duplicate detection and upserts.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub record_key: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidationResult {
    pub is_valid: bool,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
    pub is_duplicate: bool,
}

impl ValidationResult {
    pub fn from_messages(errors: Vec<String>, warnings: Vec<String>) -> Self {
        Self {
            is_valid: errors.is_empty(),
            errors,
            warnings,
            is_duplicate: false,
        }
    }

    pub fn fault(message: impl Into<String>) -> Self {
        Self {
            is_valid: false,
            errors: vec![message.into()],
            warnings: Vec::new(),
            is_duplicate: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StagedRow {
    pub row_index: usize,
    pub raw: RawRow,
    pub mapped: MappedRow,
    pub validation: ValidationResult,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub matched_reference_id: Option<String>,
}

impl StagedRow {
    pub fn is_valid(&self) -> bool {
        self.validation.is_valid
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StagingResult {
    pub run_id: String,
    pub rows: Vec<StagedRow>,
    pub valid_count: usize,
    pub error_count: usize,
    pub duplicate_count: usize,
}

impl StagingResult {
    pub fn empty(run_id: String) -> Self {
        Self {
            run_id,
            rows: Vec::new(),
            valid_count: 0,
            error_count: 0,
            duplicate_count: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DuplicatePolicy {
    /// Later rows sharing a key become invalid.
    #[default]
    Reject,
    /// Later rows sharing a key keep their validity and carry a warning.
    Warn,
}

impl DuplicatePolicy {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "reject" => Some(Self::Reject),
            "warn" => Some(Self::Warn),
            _ => None,
        }
    }
}
