//! Turning CSV uploads into stored datasets.
//!
//! [`prepare`] stages an upload with its PII report; [`commit`] redacts it
//! under a [`RedactionPlan`], creates the storage table, and records the
//! dataset in the catalog. Several committed uploads form a dataset group.

use std::path::Path;

use anyhow::{Context, Result, ensure};
use chrono::Utc;
use itertools::Itertools;
use log::{debug, info, warn};
use thiserror::Error;
use uuid::Uuid;

use crate::{
    cli::{LoadArgs, ProbeArgs},
    io_utils,
    model::{Dataset, DatasetGroup, RedactionAction, Row},
    pii::{self, PiiReport},
    printable_delimiter,
    redact::{ActionMap, RedactionPlan, redact},
    store::{SqliteStore, StorageEngine, StoreError},
    table, table_name,
};

/// Rows kept for display before a dataset is committed.
pub const PREVIEW_ROWS: usize = 20;

const GROUP_PREFIX: &str = "Group_";

#[derive(Debug, Error)]
pub enum IngestError {
    #[error("'{0}' contains no data rows")]
    EmptyInput(String),
    #[error("no columns of '{0}' remain after redaction")]
    NoColumnsLeft(String),
    #[error("a dataset group needs at least one upload")]
    EmptyGroup,
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// A parsed file awaiting redaction choices.
#[derive(Debug, Clone)]
pub struct Upload {
    pub display_name: String,
    pub headers: Vec<String>,
    pub rows: Vec<Row>,
    pub report: PiiReport,
}

impl Upload {
    pub fn total_rows(&self) -> usize {
        self.rows.len()
    }

    pub fn preview(&self) -> &[Row] {
        &self.rows[..self.rows.len().min(PREVIEW_ROWS)]
    }
}

pub fn prepare(
    display_name: &str,
    headers: Vec<String>,
    rows: Vec<Row>,
) -> Result<Upload, IngestError> {
    if rows.is_empty() {
        return Err(IngestError::EmptyInput(display_name.to_string()));
    }
    let report = pii::report(&headers, &rows);
    debug!(
        "Prepared '{display_name}': {} row(s), {} PII column(s)",
        rows.len(),
        report.columns.len()
    );
    Ok(Upload {
        display_name: display_name.to_string(),
        headers,
        rows,
        report,
    })
}

/// An upload with its redaction resolved, checked but not yet written.
struct Staged<'a> {
    upload: &'a Upload,
    applied: ActionMap,
    columns: Vec<String>,
}

fn stage<'a>(upload: &'a Upload, plan: &RedactionPlan) -> Result<Staged<'a>, IngestError> {
    // Overrides naming columns this file lacks have nothing to act on.
    let applied = plan
        .resolve(&upload.report)
        .iter()
        .filter(|(column, _)| upload.headers.iter().any(|header| header == column))
        .collect::<ActionMap>();
    let columns = upload
        .headers
        .iter()
        .filter(|header| applied.get(header) != Some(RedactionAction::Drop))
        .cloned()
        .collect::<Vec<_>>();
    if columns.is_empty() {
        return Err(IngestError::NoColumnsLeft(upload.display_name.clone()));
    }
    Ok(Staged {
        upload,
        applied,
        columns,
    })
}

fn write(store: &SqliteStore, staged: &Staged<'_>) -> Result<Dataset, IngestError> {
    let Staged {
        upload,
        applied,
        columns,
    } = staged;
    let rows = redact(&upload.rows, &upload.report, &RedactionPlan::PerColumn(applied.clone()));

    let id = Uuid::new_v4();
    let dataset = Dataset {
        id,
        display_name: upload.display_name.clone(),
        storage_table_name: table_name::storage_table_name(&upload.display_name, &id),
        pii_action: applied.summary(),
        pii_columns: applied.redacted_columns(),
        created_at: Utc::now(),
    };
    let stored = store
        .create_table(&dataset.storage_table_name, columns)
        .and_then(|()| store.insert_rows(&dataset.storage_table_name, columns, &rows))
        .and_then(|inserted| store.save_dataset(&dataset).map(|()| inserted));
    match stored {
        Ok(inserted) => {
            info!(
                "Stored {inserted} row(s) of '{}' (PII: {})",
                dataset.display_name, dataset.pii_action
            );
            Ok(dataset)
        }
        Err(err) => {
            discard(store, std::slice::from_ref(&dataset));
            Err(err.into())
        }
    }
}

/// Best-effort removal of datasets written before a failure.
fn discard(store: &SqliteStore, datasets: &[Dataset]) {
    for dataset in datasets {
        if let Err(err) = store.remove_dataset(dataset) {
            warn!(
                "Could not remove partially stored dataset '{}': {err}",
                dataset.display_name
            );
        }
    }
}

/// Redacts and stores an upload, returning its catalog entry.
pub fn commit(
    store: &SqliteStore,
    upload: &Upload,
    plan: &RedactionPlan,
) -> Result<Dataset, IngestError> {
    write(store, &stage(upload, plan)?)
}

/// Commits each upload under its own plan and groups the results.
///
/// Every upload is staged before anything is written, and datasets already
/// written are removed again when a later step fails.
pub fn commit_group(
    store: &SqliteStore,
    staged: &[(Upload, RedactionPlan)],
) -> Result<(DatasetGroup, Vec<Dataset>), IngestError> {
    if staged.is_empty() {
        return Err(IngestError::EmptyGroup);
    }
    let staged = staged
        .iter()
        .map(|(upload, plan)| stage(upload, plan))
        .collect::<Result<Vec<_>, _>>()?;

    let mut datasets = Vec::with_capacity(staged.len());
    for entry in &staged {
        match write(store, entry) {
            Ok(dataset) => datasets.push(dataset),
            Err(err) => {
                discard(store, &datasets);
                return Err(err);
            }
        }
    }

    let group = DatasetGroup {
        id: Uuid::new_v4(),
        name: group_name(&datasets),
        members: datasets.iter().map(|dataset| dataset.id).collect(),
        created_at: Utc::now(),
    };
    if let Err(err) = store.save_group(&group) {
        discard(store, &datasets);
        return Err(err.into());
    }
    Ok((group, datasets))
}

pub fn group_name(datasets: &[Dataset]) -> String {
    format!(
        "{GROUP_PREFIX}{}",
        datasets.iter().map(|dataset| &dataset.display_name).join("_")
    )
}

/// Builds the plan for one upload from the CLI choices.
///
/// With no choices each flagged column gets its suggested action. A uniform
/// action alone applies to every flagged column. Overrides are layered on top
/// of whichever base applies.
pub fn plan_for(
    report: &PiiReport,
    uniform: Option<RedactionAction>,
    overrides: &[(String, RedactionAction)],
) -> RedactionPlan {
    match (uniform, overrides.is_empty()) {
        (Some(action), true) => RedactionPlan::Uniform(action),
        (uniform, _) => {
            let mut map = match uniform {
                Some(action) => ActionMap::uniform(report, action),
                None => ActionMap::suggested(report),
            };
            for (column, action) in overrides {
                map.set(column, *action);
            }
            RedactionPlan::PerColumn(map)
        }
    }
}

fn read_upload(path: &Path, delimiter: Option<u8>, encoding_label: Option<&str>) -> Result<Upload> {
    let encoding = io_utils::resolve_encoding(encoding_label)?;
    info!(
        "Reading '{}' with delimiter '{}'",
        path.display(),
        printable_delimiter(io_utils::resolve_input_delimiter(path, delimiter))
    );
    let (headers, rows) = io_utils::read_rows(path, delimiter, encoding)?;
    let upload = prepare(&io_utils::display_stem(path), headers, rows)
        .with_context(|| format!("Preparing {path:?}"))?;
    Ok(upload)
}

pub fn probe(args: &ProbeArgs) -> Result<()> {
    let upload = read_upload(&args.input, args.delimiter, args.input_encoding.as_deref())?;
    println!(
        "{}: {} row(s), {} column(s)",
        upload.display_name,
        upload.total_rows(),
        upload.headers.len()
    );

    if upload.report.is_empty() {
        println!("No PII columns detected.");
    } else {
        let headers = ["column", "confidence", "suggested", "reason"]
            .map(str::to_string)
            .to_vec();
        let rows = upload
            .report
            .columns
            .iter()
            .map(|column| {
                vec![
                    column.name.clone(),
                    column.confidence.as_str().to_string(),
                    column.suggested_action.to_string(),
                    column.reason.clone(),
                ]
            })
            .collect::<Vec<_>>();
        print!("{}", table::render_table(&headers, &rows));
    }

    let shown = &upload.preview()[..upload.preview().len().min(args.preview_rows)];
    if !shown.is_empty() {
        println!();
        print!("{}", table::render_rows(&upload.headers, shown));
    }
    Ok(())
}

pub fn execute(db: &Path, args: &LoadArgs) -> Result<()> {
    ensure!(!args.inputs.is_empty(), "At least one --input is required");
    let staged = args
        .inputs
        .iter()
        .map(|path| {
            let upload =
                read_upload(path, args.delimiter, args.input_encoding.as_deref())?;
            let plan = plan_for(&upload.report, args.pii_action, &args.actions);
            Ok((upload, plan))
        })
        .collect::<Result<Vec<_>>>()?;

    let store = SqliteStore::open(db).with_context(|| format!("Opening database {db:?}"))?;
    if let [(upload, plan)] = staged.as_slice() {
        let dataset = commit(&store, upload, plan)
            .with_context(|| format!("Storing dataset '{}'", upload.display_name))?;
        print_dataset(&dataset);
    } else {
        let (group, datasets) =
            commit_group(&store, &staged).context("Storing dataset group")?;
        for dataset in &datasets {
            print_dataset(dataset);
        }
        println!("group {} {}", group.id, group.name);
    }
    store.close().context("Closing database")?;
    Ok(())
}

fn print_dataset(dataset: &Dataset) {
    let pii = if dataset.pii_columns.is_empty() {
        dataset.pii_action.to_string()
    } else {
        format!("{} ({})", dataset.pii_action, dataset.pii_columns.join(", "))
    };
    println!(
        "dataset {} {} -> {} [pii: {pii}]",
        dataset.id, dataset.display_name, dataset.storage_table_name
    );
}
