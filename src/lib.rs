pub mod cli;
pub mod ingest;
pub mod io_utils;
pub mod llm;
pub mod model;
pub mod pii;
pub mod prompt;
pub mod query;
pub mod redact;
pub mod schema;
pub mod sql;
pub mod store;
pub mod table;
pub mod table_name;

use std::{env, path::Path, sync::OnceLock};

use anyhow::{Context, Result};
use clap::Parser;
use log::{LevelFilter, info};

use crate::{
    cli::{Cli, Commands, PromptArgs, SchemaArgs},
    prompt::DatasetContext,
    schema::{SchemaData, SchemaRecord},
    store::{SqliteStore, StorageEngine},
};

static LOGGER: OnceLock<()> = OnceLock::new();

fn init_logging() {
    LOGGER.get_or_init(|| {
        let mut builder = env_logger::Builder::from_env(env_logger::Env::default());
        if env::var("RUST_LOG").is_err() {
            builder.filter_module("sqlmate", LevelFilter::Info);
        }
        let _ = builder.format_timestamp_millis().try_init();
    });
}

pub fn run() -> Result<()> {
    init_logging();
    let cli = Cli::parse();
    match cli.command {
        Commands::Probe(args) => ingest::probe(&args),
        Commands::Load(args) => ingest::execute(&cli.db, &args),
        Commands::Datasets => handle_datasets(&cli.db),
        Commands::Check(args) => query::check(&args),
        Commands::Query(args) => query::execute(&cli.db, &args),
        Commands::Schema(args) => handle_schema(&cli.db, &args),
        Commands::Prompt(args) => handle_prompt(&cli.db, &args),
    }
}

fn open_store(db: &Path) -> Result<SqliteStore> {
    SqliteStore::open(db).with_context(|| format!("Opening database {db:?}"))
}

fn handle_datasets(db: &Path) -> Result<()> {
    let store = open_store(db)?;
    let datasets = store.datasets().context("Listing datasets")?;
    let groups = store.groups().context("Listing dataset groups")?;

    let headers = ["id", "name", "table", "pii", "pii columns", "created"]
        .map(str::to_string)
        .to_vec();
    let rows = datasets
        .iter()
        .map(|dataset| {
            vec![
                dataset.id.to_string(),
                dataset.display_name.clone(),
                dataset.storage_table_name.clone(),
                dataset.pii_action.to_string(),
                dataset.pii_columns.join(", "),
                dataset.created_at.format("%Y-%m-%d %H:%M:%S").to_string(),
            ]
        })
        .collect::<Vec<_>>();
    print!("{}", table::render_table(&headers, &rows));

    if !groups.is_empty() {
        println!();
        let headers = ["group", "name", "members"].map(str::to_string).to_vec();
        let rows = groups
            .iter()
            .map(|group| {
                vec![
                    group.id.to_string(),
                    group.name.clone(),
                    group.members.len().to_string(),
                ]
            })
            .collect::<Vec<_>>();
        print!("{}", table::render_table(&headers, &rows));
    }
    store.close().context("Closing database")?;
    Ok(())
}

fn handle_schema(db: &Path, args: &SchemaArgs) -> Result<()> {
    info!("Registering schema from '{}'", args.input.display());
    let data = SchemaData::load(&args.input)
        .with_context(|| format!("Loading schema from {:?}", args.input))?;
    let record = SchemaRecord::new(args.name.as_deref(), data);
    let store = open_store(db)?;
    store.save_schema(&record).context("Storing schema")?;
    store.close().context("Closing database")?;

    println!("schema {} {}", record.id, record.name);
    println!();
    println!("{}", prompt::schema_prompt(&record.data));
    print_suggestions(&prompt::suggest_questions_for_schema(&record.data));
    Ok(())
}

fn handle_prompt(db: &Path, args: &PromptArgs) -> Result<()> {
    let store = open_store(db)?;
    let datasets = query::resolve_target(&store, &args.target)?;
    let contexts = datasets
        .into_iter()
        .map(|dataset| {
            let columns = store
                .introspect_columns(&dataset.storage_table_name)
                .with_context(|| format!("Reading columns of '{}'", dataset.display_name))?;
            Ok(DatasetContext::new(dataset, columns))
        })
        .collect::<Result<Vec<_>>>()?;
    store.close().context("Closing database")?;

    println!("{}", prompt::dataset_prompt(&contexts));
    if let Some(first) = contexts.first() {
        let columns = first
            .visible_columns()
            .map(|column| column.name.clone())
            .collect::<Vec<_>>();
        print_suggestions(&prompt::suggest_questions_for_columns(&columns));
    }
    Ok(())
}

fn print_suggestions(questions: &[String]) {
    if questions.is_empty() {
        return;
    }
    println!("Suggested questions:");
    for question in questions {
        println!("  - {question}");
    }
}

pub(crate) fn printable_delimiter(delimiter: u8) -> String {
    match delimiter {
        b',' => ",".to_string(),
        b'\t' => "\\t".to_string(),
        b'\n' => "\\n".to_string(),
        other => (other as char).to_string(),
    }
}
