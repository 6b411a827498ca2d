//! Shared data model: rows, datasets, groups, and redaction vocabulary.

use std::{fmt, str::FromStr};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::sql::TableBinding;

/// One parsed input record, keeping the header order of the source file.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Row {
    cells: Vec<(String, String)>,
}

impl Row {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_record(headers: &[String], values: Vec<String>) -> Self {
        let cells = headers.iter().cloned().zip(values).collect();
        Self { cells }
    }

    pub fn from_pairs<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let mut row = Self::new();
        for (column, value) in pairs {
            row.set(column, value);
        }
        row
    }

    pub fn get(&self, column: &str) -> Option<&str> {
        self.cells
            .iter()
            .find(|(name, _)| name == column)
            .map(|(_, value)| value.as_str())
    }

    /// Replaces the value in place, or appends the column when it is new.
    pub fn set(&mut self, column: impl Into<String>, value: impl Into<String>) {
        let column = column.into();
        let value = value.into();
        match self.cells.iter_mut().find(|(name, _)| *name == column) {
            Some((_, slot)) => *slot = value,
            None => self.cells.push((column, value)),
        }
    }

    pub fn remove(&mut self, column: &str) -> Option<String> {
        let idx = self.cells.iter().position(|(name, _)| name == column)?;
        Some(self.cells.remove(idx).1)
    }

    pub fn contains(&self, column: &str) -> bool {
        self.cells.iter().any(|(name, _)| name == column)
    }

    pub fn columns(&self) -> impl Iterator<Item = &str> {
        self.cells.iter().map(|(name, _)| name.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.cells
            .iter()
            .map(|(name, value)| (name.as_str(), value.as_str()))
    }

    pub fn len(&self) -> usize {
        self.cells.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RedactionAction {
    Drop,
    Mask,
    Hash,
    None,
}

impl RedactionAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            RedactionAction::Drop => "drop",
            RedactionAction::Mask => "mask",
            RedactionAction::Hash => "hash",
            RedactionAction::None => "none",
        }
    }
}

impl fmt::Display for RedactionAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RedactionAction {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "drop" => Ok(RedactionAction::Drop),
            "mask" => Ok(RedactionAction::Mask),
            "hash" => Ok(RedactionAction::Hash),
            "none" | "keep" => Ok(RedactionAction::None),
            other => Err(format!(
                "Unknown redaction action '{other}' (expected drop, mask, hash, or none)"
            )),
        }
    }
}

/// Dataset-level summary of what was done to its PII columns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PiiSummary {
    None,
    Drop,
    Mask,
    Hash,
    Mixed,
}

impl PiiSummary {
    pub fn as_str(&self) -> &'static str {
        match self {
            PiiSummary::None => "none",
            PiiSummary::Drop => "drop",
            PiiSummary::Mask => "mask",
            PiiSummary::Hash => "hash",
            PiiSummary::Mixed => "mixed",
        }
    }
}

impl From<RedactionAction> for PiiSummary {
    fn from(action: RedactionAction) -> Self {
        match action {
            RedactionAction::Drop => PiiSummary::Drop,
            RedactionAction::Mask => PiiSummary::Mask,
            RedactionAction::Hash => PiiSummary::Hash,
            RedactionAction::None => PiiSummary::None,
        }
    }
}

impl fmt::Display for PiiSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PiiSummary {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "mixed" => Ok(PiiSummary::Mixed),
            other => other.parse::<RedactionAction>().map(PiiSummary::from),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Dataset {
    pub id: Uuid,
    pub display_name: String,
    pub storage_table_name: String,
    pub pii_action: PiiSummary,
    pub pii_columns: Vec<String>,
    pub created_at: DateTime<Utc>,
}

impl Dataset {
    pub fn binding(&self) -> TableBinding {
        TableBinding::new(&self.display_name, &self.storage_table_name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatasetGroup {
    pub id: Uuid,
    pub name: String,
    pub members: Vec<Uuid>,
    pub created_at: DateTime<Utc>,
}
