//! Declared schemas: the table-less track where the user describes tables
//! instead of uploading them.
//!
//! A schema is loaded from JSON or YAML, validated, stored in the catalog, and
//! only ever used to build prompts. Nothing is executed against it.

use std::{fs, path::Path};

use chrono::{DateTime, Utc};
use log::{debug, warn};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

pub const DEFAULT_SCHEMA_NAME: &str = "Untitled Schema";

#[derive(Debug, Error)]
pub enum SchemaError {
    #[error("failed to read schema file {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid JSON schema: {0}")]
    Json(#[from] serde_json::Error),
    #[error("invalid YAML schema: {0}")]
    Yaml(#[from] serde_yaml::Error),
    #[error("schema must declare at least one table")]
    NoTables,
    #[error("table #{0} has an empty name")]
    UnnamedTable(usize),
    #[error("table '{0}' declares no columns")]
    NoColumns(String),
    #[error("column #{index} of table '{table}' has an empty name")]
    UnnamedColumn { table: String, index: usize },
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchemaData {
    pub tables: Vec<SchemaTable>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SchemaTable {
    pub name: String,
    #[serde(default)]
    pub columns: Vec<SchemaColumn>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub primary_key: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub foreign_keys: Vec<ForeignKey>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchemaColumn {
    pub name: String,
    #[serde(rename = "type")]
    pub data_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nullable: Option<bool>,
}

impl SchemaColumn {
    /// Columns are nullable unless declared otherwise.
    pub fn is_nullable(&self) -> bool {
        self.nullable.unwrap_or(true)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ForeignKey {
    pub column: String,
    pub references: ColumnRef,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnRef {
    pub table: String,
    pub column: String,
}

/// A schema as stored in the catalog.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchemaRecord {
    pub id: Uuid,
    pub name: String,
    pub data: SchemaData,
    pub created_at: DateTime<Utc>,
}

impl SchemaRecord {
    pub fn new(name: Option<&str>, data: SchemaData) -> Self {
        let name = name
            .map(str::trim)
            .filter(|name| !name.is_empty())
            .unwrap_or(DEFAULT_SCHEMA_NAME);
        Self {
            id: Uuid::new_v4(),
            name: name.to_string(),
            data,
            created_at: Utc::now(),
        }
    }
}

impl SchemaData {
    pub fn table(&self, name: &str) -> Option<&SchemaTable> {
        self.tables.iter().find(|table| table.name == name)
    }

    pub fn table_names(&self) -> Vec<&str> {
        self.tables.iter().map(|table| table.name.as_str()).collect()
    }

    /// Parses JSON text, or YAML when `yaml` is set.
    pub fn parse(text: &str, yaml: bool) -> Result<Self, SchemaError> {
        let data = if yaml {
            serde_yaml::from_str(text)?
        } else {
            serde_json::from_str(text)?
        };
        Ok(data)
    }

    /// Reads and validates a schema file; `.yaml` and `.yml` are read as YAML.
    pub fn load(path: &Path) -> Result<Self, SchemaError> {
        let text = fs::read_to_string(path).map_err(|source| SchemaError::Read {
            path: path.display().to_string(),
            source,
        })?;
        let yaml = path
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| ext.eq_ignore_ascii_case("yaml") || ext.eq_ignore_ascii_case("yml"));
        let data = Self::parse(&text, yaml)?;
        data.validate()?;
        debug!("Loaded schema with {} table(s) from {path:?}", data.tables.len());
        Ok(data)
    }

    /// Structural checks. Foreign keys pointing at undeclared tables are
    /// logged and accepted.
    pub fn validate(&self) -> Result<(), SchemaError> {
        if self.tables.is_empty() {
            return Err(SchemaError::NoTables);
        }
        for (idx, table) in self.tables.iter().enumerate() {
            if table.name.trim().is_empty() {
                return Err(SchemaError::UnnamedTable(idx + 1));
            }
            if table.columns.is_empty() {
                return Err(SchemaError::NoColumns(table.name.clone()));
            }
            if let Some(index) = table
                .columns
                .iter()
                .position(|column| column.name.trim().is_empty())
            {
                return Err(SchemaError::UnnamedColumn {
                    table: table.name.clone(),
                    index: index + 1,
                });
            }
            for fk in &table.foreign_keys {
                if self.table(&fk.references.table).is_none() {
                    warn!(
                        "Foreign key {}.{} references undeclared table '{}'",
                        table.name, fk.column, fk.references.table
                    );
                }
            }
        }
        Ok(())
    }
}
