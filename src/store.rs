//! Embedded relational storage behind a narrow engine contract.
//!
//! [`StorageEngine`] is what the query pipeline needs from storage: table
//! creation, bulk inserts, bounded execution, and column introspection.
//! [`SqliteStore`] implements it on a single rusqlite connection that the
//! caller opens, passes down, and closes explicitly. The same handle also
//! keeps the catalog of datasets, dataset groups, and declared schemas.

use std::{fs, path::Path, str::FromStr};

use chrono::{DateTime, Utc};
use log::{debug, info};
use rusqlite::{Connection, OptionalExtension, params, params_from_iter, types::ValueRef};
use serde::Serialize;
use thiserror::Error;
use uuid::Uuid;

use crate::{
    model::{Dataset, DatasetGroup, PiiSummary, Row},
    schema::{SchemaData, SchemaRecord},
    table_name,
};

/// Synthetic row key added to every stored dataset table.
pub const ROW_ID_COLUMN: &str = "id";

const CATALOG_DDL: &str = r#"
CREATE TABLE IF NOT EXISTS datasets (
    id TEXT PRIMARY KEY,
    name TEXT NOT NULL,
    table_name TEXT NOT NULL,
    pii_action TEXT NOT NULL,
    pii_columns TEXT NOT NULL,
    created_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS schemas (
    id TEXT PRIMARY KEY,
    name TEXT NOT NULL,
    schema_json TEXT NOT NULL,
    created_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS dataset_groups (
    id TEXT PRIMARY KEY,
    name TEXT NOT NULL,
    created_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS dataset_group_members (
    group_id TEXT NOT NULL,
    dataset_id TEXT NOT NULL,
    position INTEGER NOT NULL,
    PRIMARY KEY (group_id, dataset_id),
    FOREIGN KEY (group_id) REFERENCES dataset_groups(id),
    FOREIGN KEY (dataset_id) REFERENCES datasets(id)
);
"#;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("dataset not found: {0}")]
    DatasetNotFound(Uuid),
    #[error("dataset group not found: {0}")]
    GroupNotFound(Uuid),
    #[error("schema not found: {0}")]
    SchemaNotFound(Uuid),
    #[error("dataset group member {0} does not reference a stored dataset")]
    UnknownGroupMember(Uuid),
    #[error("'{0}' is not a valid storage identifier")]
    InvalidIdentifier(String),
    #[error("dataset {id} has unrecognized PII summary '{value}'")]
    UnknownPiiSummary { id: String, value: String },
}

pub type Result<T> = std::result::Result<T, StoreError>;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ColumnInfo {
    pub name: String,
    pub data_type: String,
}

/// Rows returned by a query, every cell rendered as text.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ResultSet {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<String>>,
    /// Set when rows beyond a cap were discarded.
    pub truncated: bool,
}

impl ResultSet {
    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    /// Hard slice to at most `max_rows`.
    pub fn cap(mut self, max_rows: usize) -> Self {
        if self.rows.len() > max_rows {
            self.rows.truncate(max_rows);
            self.truncated = true;
        }
        self
    }
}

pub trait StorageEngine {
    /// Creates a text-typed table with a synthetic `id` key.
    fn create_table(&self, name: &str, columns: &[String]) -> Result<()>;

    /// Inserts rows in one transaction; absent cells are stored as empty strings.
    fn insert_rows(&self, name: &str, columns: &[String], rows: &[Row]) -> Result<usize>;

    /// Runs a read query, reading at most `max_rows` rows.
    fn execute(&self, sql: &str, max_rows: usize) -> Result<ResultSet>;

    fn introspect_columns(&self, name: &str) -> Result<Vec<ColumnInfo>>;
}

#[derive(Debug)]
pub struct SqliteStore {
    conn: Connection,
}

impl SqliteStore {
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)?;
        let mode: String =
            conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get(0))?;
        debug!("Opened store at {path:?} (journal mode {mode})");
        Self::with_connection(conn)
    }

    pub fn open_in_memory() -> Result<Self> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> Result<Self> {
        conn.execute_batch(CATALOG_DDL)?;
        Ok(Self { conn })
    }

    pub fn close(self) -> Result<()> {
        self.conn.close().map_err(|(_, err)| StoreError::from(err))
    }

    pub fn save_dataset(&self, dataset: &Dataset) -> Result<()> {
        self.conn.execute(
            "INSERT INTO datasets (id, name, table_name, pii_action, pii_columns, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                dataset.id.to_string(),
                dataset.display_name,
                dataset.storage_table_name,
                dataset.pii_action.as_str(),
                serde_json::to_string(&dataset.pii_columns)?,
                dataset.created_at.to_rfc3339(),
            ],
        )?;
        info!(
            "Registered dataset '{}' as table {}",
            dataset.display_name, dataset.storage_table_name
        );
        Ok(())
    }

    pub fn dataset(&self, id: Uuid) -> Result<Dataset> {
        let raw = self
            .conn
            .query_row(
                "SELECT id, name, table_name, pii_action, pii_columns, created_at
                 FROM datasets WHERE id = ?1",
                params![id.to_string()],
                RawDataset::from_row,
            )
            .optional()?
            .ok_or(StoreError::DatasetNotFound(id))?;
        raw.into_dataset()
    }

    pub fn datasets(&self) -> Result<Vec<Dataset>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, name, table_name, pii_action, pii_columns, created_at
             FROM datasets ORDER BY created_at, name",
        )?;
        let raws = stmt
            .query_map([], RawDataset::from_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        raws.into_iter().map(RawDataset::into_dataset).collect()
    }

    /// Drops a dataset's storage table and its catalog row.
    pub fn remove_dataset(&self, dataset: &Dataset) -> Result<()> {
        ensure_identifier(&dataset.storage_table_name)?;
        let tx = self.conn.unchecked_transaction()?;
        tx.execute_batch(&format!(
            "DROP TABLE IF EXISTS {}",
            quote_identifier(&dataset.storage_table_name)
        ))?;
        tx.execute(
            "DELETE FROM datasets WHERE id = ?1",
            params![dataset.id.to_string()],
        )?;
        tx.commit()?;
        info!(
            "Removed dataset '{}' and table {}",
            dataset.display_name, dataset.storage_table_name
        );
        Ok(())
    }

    /// Stores a group after checking every member references a stored dataset.
    pub fn save_group(&self, group: &DatasetGroup) -> Result<()> {
        for member in &group.members {
            let exists = self
                .conn
                .query_row(
                    "SELECT 1 FROM datasets WHERE id = ?1",
                    params![member.to_string()],
                    |_| Ok(()),
                )
                .optional()?
                .is_some();
            if !exists {
                return Err(StoreError::UnknownGroupMember(*member));
            }
        }

        let tx = self.conn.unchecked_transaction()?;
        tx.execute(
            "INSERT INTO dataset_groups (id, name, created_at) VALUES (?1, ?2, ?3)",
            params![group.id.to_string(), group.name, group.created_at.to_rfc3339()],
        )?;
        for (position, member) in group.members.iter().enumerate() {
            tx.execute(
                "INSERT INTO dataset_group_members (group_id, dataset_id, position)
                 VALUES (?1, ?2, ?3)",
                params![group.id.to_string(), member.to_string(), position as i64],
            )?;
        }
        tx.commit()?;
        info!(
            "Registered dataset group '{}' with {} member(s)",
            group.name,
            group.members.len()
        );
        Ok(())
    }

    pub fn group(&self, id: Uuid) -> Result<DatasetGroup> {
        let (name, created_at) = self
            .conn
            .query_row(
                "SELECT name, created_at FROM dataset_groups WHERE id = ?1",
                params![id.to_string()],
                |row| Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?)),
            )
            .optional()?
            .ok_or(StoreError::GroupNotFound(id))?;

        let mut stmt = self.conn.prepare(
            "SELECT dataset_id FROM dataset_group_members WHERE group_id = ?1 ORDER BY position",
        )?;
        let members = stmt
            .query_map(params![id.to_string()], |row| row.get::<_, String>(0))?
            .collect::<std::result::Result<Vec<_>, _>>()?
            .iter()
            .map(|raw| parse_uuid(raw))
            .collect::<Result<Vec<_>>>()?;

        Ok(DatasetGroup {
            id,
            name,
            members,
            created_at: parse_timestamp(&created_at)?,
        })
    }

    pub fn groups(&self) -> Result<Vec<DatasetGroup>> {
        let mut stmt = self
            .conn
            .prepare("SELECT id FROM dataset_groups ORDER BY created_at, name")?;
        let ids = stmt
            .query_map([], |row| row.get::<_, String>(0))?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        ids.iter()
            .map(|raw| parse_uuid(raw).and_then(|id| self.group(id)))
            .collect()
    }

    /// Member datasets of a group, in group order.
    pub fn group_datasets(&self, group: &DatasetGroup) -> Result<Vec<Dataset>> {
        group.members.iter().map(|id| self.dataset(*id)).collect()
    }

    pub fn save_schema(&self, record: &SchemaRecord) -> Result<()> {
        self.conn.execute(
            "INSERT INTO schemas (id, name, schema_json, created_at) VALUES (?1, ?2, ?3, ?4)",
            params![
                record.id.to_string(),
                record.name,
                serde_json::to_string(&record.data)?,
                record.created_at.to_rfc3339(),
            ],
        )?;
        info!(
            "Registered schema '{}' with {} table(s)",
            record.name,
            record.data.tables.len()
        );
        Ok(())
    }

    pub fn schema(&self, id: Uuid) -> Result<SchemaRecord> {
        let (name, schema_json, created_at) = self
            .conn
            .query_row(
                "SELECT name, schema_json, created_at FROM schemas WHERE id = ?1",
                params![id.to_string()],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                    ))
                },
            )
            .optional()?
            .ok_or(StoreError::SchemaNotFound(id))?;
        Ok(SchemaRecord {
            id,
            name,
            data: serde_json::from_str::<SchemaData>(&schema_json)?,
            created_at: parse_timestamp(&created_at)?,
        })
    }
}

impl StorageEngine for SqliteStore {
    fn create_table(&self, name: &str, columns: &[String]) -> Result<()> {
        ensure_identifier(name)?;
        let mut defs = Vec::with_capacity(columns.len() + 1);
        // A source column called "id" takes the place of the synthetic key.
        if !columns
            .iter()
            .any(|column| column.eq_ignore_ascii_case(ROW_ID_COLUMN))
        {
            defs.push(format!("{ROW_ID_COLUMN} INTEGER PRIMARY KEY AUTOINCREMENT"));
        }
        defs.extend(
            columns
                .iter()
                .map(|column| format!("{} TEXT", quote_identifier(column))),
        );
        let ddl = format!(
            "CREATE TABLE IF NOT EXISTS {} ({})",
            quote_identifier(name),
            defs.join(", ")
        );
        debug!("{ddl}");
        self.conn.execute_batch(&ddl)?;
        Ok(())
    }

    fn insert_rows(&self, name: &str, columns: &[String], rows: &[Row]) -> Result<usize> {
        ensure_identifier(name)?;
        if columns.is_empty() {
            return Ok(0);
        }
        let column_list = columns
            .iter()
            .map(|column| quote_identifier(column))
            .collect::<Vec<_>>()
            .join(", ");
        let placeholders = (1..=columns.len())
            .map(|idx| format!("?{idx}"))
            .collect::<Vec<_>>()
            .join(", ");
        let sql = format!(
            "INSERT INTO {} ({column_list}) VALUES ({placeholders})",
            quote_identifier(name)
        );

        let tx = self.conn.unchecked_transaction()?;
        {
            let mut stmt = tx.prepare(&sql)?;
            for row in rows {
                stmt.execute(params_from_iter(
                    columns.iter().map(|column| row.get(column).unwrap_or("")),
                ))?;
            }
        }
        tx.commit()?;
        debug!("Inserted {} row(s) into {name}", rows.len());
        Ok(rows.len())
    }

    fn execute(&self, sql: &str, max_rows: usize) -> Result<ResultSet> {
        let mut stmt = self.conn.prepare(sql)?;
        let columns = stmt
            .column_names()
            .into_iter()
            .map(str::to_string)
            .collect::<Vec<_>>();
        let mut result = ResultSet {
            columns,
            ..ResultSet::default()
        };

        let mut rows = stmt.query([])?;
        while let Some(row) = rows.next()? {
            if result.rows.len() == max_rows {
                result.truncated = true;
                break;
            }
            let cells = (0..result.columns.len())
                .map(|idx| row.get_ref(idx).map(render_cell))
                .collect::<std::result::Result<Vec<_>, _>>()?;
            result.rows.push(cells);
        }
        Ok(result)
    }

    fn introspect_columns(&self, name: &str) -> Result<Vec<ColumnInfo>> {
        ensure_identifier(name)?;
        let mut stmt = self
            .conn
            .prepare(&format!("PRAGMA table_info({})", quote_identifier(name)))?;
        let columns = stmt
            .query_map([], |row| {
                Ok(ColumnInfo {
                    name: row.get(1)?,
                    data_type: row.get(2)?,
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(columns)
    }
}

struct RawDataset {
    id: String,
    name: String,
    table_name: String,
    pii_action: String,
    pii_columns: String,
    created_at: String,
}

impl RawDataset {
    fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            name: row.get(1)?,
            table_name: row.get(2)?,
            pii_action: row.get(3)?,
            pii_columns: row.get(4)?,
            created_at: row.get(5)?,
        })
    }

    fn into_dataset(self) -> Result<Dataset> {
        let pii_action = PiiSummary::from_str(&self.pii_action).map_err(|_| {
            StoreError::UnknownPiiSummary {
                id: self.id.clone(),
                value: self.pii_action.clone(),
            }
        })?;
        Ok(Dataset {
            id: parse_uuid(&self.id)?,
            display_name: self.name,
            storage_table_name: self.table_name,
            pii_action,
            pii_columns: serde_json::from_str(&self.pii_columns)?,
            created_at: parse_timestamp(&self.created_at)?,
        })
    }
}

fn parse_uuid(raw: &str) -> Result<Uuid> {
    Uuid::parse_str(raw).map_err(|err| conversion_error(0, err))
}

fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|ts| ts.with_timezone(&Utc))
        .map_err(|err| conversion_error(0, err))
}

fn conversion_error<E>(column: usize, err: E) -> StoreError
where
    E: std::error::Error + Send + Sync + 'static,
{
    StoreError::Sqlite(rusqlite::Error::FromSqlConversionFailure(
        column,
        rusqlite::types::Type::Text,
        Box::new(err),
    ))
}

fn ensure_identifier(name: &str) -> Result<()> {
    if table_name::is_valid(name) {
        Ok(())
    } else {
        Err(StoreError::InvalidIdentifier(name.to_string()))
    }
}

fn quote_identifier(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

fn render_cell(value: ValueRef<'_>) -> String {
    match value {
        ValueRef::Null => String::new(),
        ValueRef::Integer(i) => i.to_string(),
        ValueRef::Real(f) => f.to_string(),
        ValueRef::Text(bytes) => String::from_utf8_lossy(bytes).into_owned(),
        ValueRef::Blob(bytes) => format!("<{} bytes>", bytes.len()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn execute_stops_reading_at_the_row_bound() {
        let store = SqliteStore::open_in_memory().unwrap();
        let columns = vec!["n".to_string()];
        store.create_table("numbers", &columns).unwrap();
        let rows = (0..5)
            .map(|n| Row::from_pairs([("n", n.to_string())]))
            .collect::<Vec<_>>();
        store.insert_rows("numbers", &columns, &rows).unwrap();

        let result = store.execute("SELECT n FROM numbers", 3).unwrap();
        assert_eq!(result.row_count(), 3);
        assert!(result.truncated);
    }

    #[test]
    fn source_id_column_replaces_synthetic_key() {
        let store = SqliteStore::open_in_memory().unwrap();
        let columns = vec!["id".to_string(), "label".to_string()];
        store.create_table("items", &columns).unwrap();
        let names = store
            .introspect_columns("items")
            .unwrap()
            .into_iter()
            .map(|c| c.name)
            .collect::<Vec<_>>();
        assert_eq!(names, vec!["id", "label"]);
    }

    #[test]
    fn invalid_identifiers_are_refused() {
        let store = SqliteStore::open_in_memory().unwrap();
        let err = store.create_table("1; DROP", &[]).unwrap_err();
        assert!(matches!(err, StoreError::InvalidIdentifier(_)));
    }

    #[test]
    fn unknown_pii_summary_is_an_error() {
        let store = SqliteStore::open_in_memory().unwrap();
        let id = Uuid::new_v4();
        store
            .conn
            .execute(
                "INSERT INTO datasets (id, name, table_name, pii_action, pii_columns, created_at)
                 VALUES (?1, 'Legacy', 'dataset_legacy_00000000', 'bogus', '[]', ?2)",
                params![id.to_string(), Utc::now().to_rfc3339()],
            )
            .unwrap();

        let err = store.dataset(id).unwrap_err();
        assert!(
            matches!(&err, StoreError::UnknownPiiSummary { value, .. } if value == "bogus"),
            "{err}"
        );
        assert!(store.datasets().is_err());
    }

    #[test]
    fn removed_dataset_leaves_no_table_or_catalog_row() {
        let store = SqliteStore::open_in_memory().unwrap();
        let id = Uuid::new_v4();
        let dataset = Dataset {
            id,
            display_name: "Scratch".to_string(),
            storage_table_name: crate::table_name::storage_table_name("Scratch", &id),
            pii_action: PiiSummary::None,
            pii_columns: Vec::new(),
            created_at: Utc::now(),
        };
        store
            .create_table(&dataset.storage_table_name, &["label".to_string()])
            .unwrap();
        store.save_dataset(&dataset).unwrap();

        store.remove_dataset(&dataset).unwrap();
        assert!(matches!(store.dataset(id), Err(StoreError::DatasetNotFound(_))));
        assert!(store.introspect_columns(&dataset.storage_table_name).unwrap().is_empty());
    }
}
