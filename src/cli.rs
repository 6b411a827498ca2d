use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};
use uuid::Uuid;

use crate::model::RedactionAction;

#[derive(Debug, Parser)]
#[command(
    author,
    version,
    about = "Load CSV data with PII redaction and query it through guarded SQL",
    long_about = None
)]
pub struct Cli {
    /// SQLite database holding dataset tables and the catalog
    #[arg(
        long,
        global = true,
        env = "SQLMATE_DB",
        default_value = "data/sqlmate.db"
    )]
    pub db: PathBuf,
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Report PII columns in a CSV file and preview its first rows
    Probe(ProbeArgs),
    /// Redact and store one CSV file as a dataset, or several as a dataset group
    Load(LoadArgs),
    /// List stored datasets and dataset groups
    Datasets,
    /// Validate a SQL statement and print its normalized form
    Check(CheckArgs),
    /// Run SQL against a dataset or group through the safety pipeline
    Query(QueryArgs),
    /// Register a JSON or YAML schema and print its prompt
    Schema(SchemaArgs),
    /// Print the generation prompt and suggested questions for a dataset or group
    Prompt(PromptArgs),
}

#[derive(Debug, Args)]
pub struct ProbeArgs {
    /// Input CSV file to inspect ('-' reads stdin)
    #[arg(short = 'i', long = "input")]
    pub input: PathBuf,
    /// Number of rows to show in the preview
    #[arg(long, default_value_t = crate::ingest::PREVIEW_ROWS)]
    pub preview_rows: usize,
    /// CSV delimiter character (supports ',', 'tab', ';', '|')
    #[arg(long, value_parser = parse_delimiter)]
    pub delimiter: Option<u8>,
    /// Character encoding of the input file (defaults to utf-8)
    #[arg(long = "input-encoding")]
    pub input_encoding: Option<String>,
}

#[derive(Debug, Args)]
pub struct LoadArgs {
    /// Input CSV file; repeat to load several files as one dataset group
    #[arg(short = 'i', long = "input", required = true, action = clap::ArgAction::Append)]
    pub inputs: Vec<PathBuf>,
    /// Action applied to every detected PII column (drop, mask, hash, none)
    #[arg(long = "pii-action", value_parser = parse_action)]
    pub pii_action: Option<RedactionAction>,
    /// Per-column override such as `email=hash`; repeatable
    #[arg(long = "action", value_parser = parse_column_action, action = clap::ArgAction::Append)]
    pub actions: Vec<(String, RedactionAction)>,
    /// CSV delimiter character (supports ',', 'tab', ';', '|')
    #[arg(long, value_parser = parse_delimiter)]
    pub delimiter: Option<u8>,
    /// Character encoding of the input files (defaults to utf-8)
    #[arg(long = "input-encoding")]
    pub input_encoding: Option<String>,
}

#[derive(Debug, Args)]
pub struct CheckArgs {
    /// SQL statement to validate
    #[arg(long)]
    pub sql: String,
}

/// Exactly one of a dataset or a dataset group.
#[derive(Debug, Args)]
#[group(required = true, multiple = false)]
pub struct TargetArgs {
    /// Dataset id
    #[arg(long)]
    pub dataset: Option<Uuid>,
    /// Dataset group id
    #[arg(long)]
    pub group: Option<Uuid>,
}

#[derive(Debug, Args)]
pub struct QueryArgs {
    #[command(flatten)]
    pub target: TargetArgs,
    /// SQL written against display table names
    #[arg(long)]
    pub sql: String,
}

#[derive(Debug, Args)]
pub struct SchemaArgs {
    /// Schema file (.json, .yaml, or .yml)
    #[arg(short = 'i', long = "input")]
    pub input: PathBuf,
    /// Name stored with the schema
    #[arg(long)]
    pub name: Option<String>,
}

#[derive(Debug, Args)]
pub struct PromptArgs {
    #[command(flatten)]
    pub target: TargetArgs,
}

pub fn parse_delimiter(value: &str) -> Result<u8, String> {
    match value {
        "tab" | "\t" => Ok(b'\t'),
        "comma" | "," => Ok(b','),
        "|" | "pipe" => Ok(b'|'),
        ";" | "semicolon" => Ok(b';'),
        other => {
            let mut chars = other.chars();
            let first = chars
                .next()
                .ok_or_else(|| "Delimiter cannot be empty".to_string())?;
            if chars.next().is_some() {
                return Err("Delimiter must be a single character".to_string());
            }
            if !first.is_ascii() {
                return Err("Delimiter must be ASCII".to_string());
            }
            Ok(first as u8)
        }
    }
}

pub fn parse_action(value: &str) -> Result<RedactionAction, String> {
    value.parse()
}

/// Parses `column=action`.
pub fn parse_column_action(value: &str) -> Result<(String, RedactionAction), String> {
    let (column, action) = value
        .split_once('=')
        .ok_or_else(|| format!("Expected column=action, got '{value}'"))?;
    let column = column.trim();
    if column.is_empty() {
        return Err(format!("Missing column name in '{value}'"));
    }
    Ok((column.to_string(), parse_action(action)?))
}
