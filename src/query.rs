//! Question-to-result orchestration.
//!
//! A question moves through generation, validation, rewriting, and execution.
//! An execution failure triggers exactly one regeneration with the error
//! appended to the question; a validator rejection is final. A failed
//! regeneration still reports the execution error and its SQL. Every stage
//! transition is logged and kept in the outcome's trace.

use std::{fmt, path::Path};

use anyhow::{Context, Result, bail};
use log::{debug, info, warn};
use serde::Serialize;
use thiserror::Error;

use crate::{
    cli::{CheckArgs, QueryArgs, TargetArgs},
    llm::{LlmError, SqlGenerator},
    model::Dataset,
    prompt::{self, DatasetContext},
    schema::SchemaRecord,
    sql::{self, ROW_CAP, SafetyViolation, TableBinding},
    store::{ResultSet, SqliteStore, StorageEngine, StoreError},
    table,
};

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("SQL generation failed: {0}")]
    Generation(#[from] LlmError),
    #[error("SQL rejected: {violation}")]
    Rejected {
        violation: SafetyViolation,
        sql: String,
    },
    #[error("query execution failed: {message}")]
    Execution { message: String, sql: String },
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl PipelineError {
    /// SQL that was rejected or failed, when there is one.
    pub fn sql(&self) -> Option<&str> {
        match self {
            PipelineError::Rejected { sql, .. } | PipelineError::Execution { sql, .. } => {
                Some(sql.as_str())
            }
            _ => None,
        }
    }
}

/// What a question is asked against.
#[derive(Debug, Clone)]
pub enum QueryScope {
    /// One dataset, or the members of a group in group order.
    Datasets(Vec<Dataset>),
    /// Declared schema; SQL is generated and validated but never executed.
    Schema(SchemaRecord),
}

impl QueryScope {
    pub fn bindings(&self) -> Vec<TableBinding> {
        match self {
            QueryScope::Datasets(datasets) => datasets.iter().map(Dataset::binding).collect(),
            QueryScope::Schema(_) => Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Stage {
    QuestionReceived,
    SqlGenerated,
    SqlValidated,
    Rejected,
    SqlRewritten,
    Executed,
    RetryGenerated,
    Failed,
    Returned,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

#[derive(Debug, Default)]
struct Trace {
    stages: Vec<Stage>,
}

impl Trace {
    fn enter(&mut self, stage: Stage) {
        debug!("Query stage: {stage}");
        self.stages.push(stage);
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct QueryOutcome {
    /// SQL as executed (storage names), or as validated for schema scope.
    pub sql: String,
    pub explanation: String,
    pub warnings: Vec<String>,
    /// Absent for schema scope.
    pub result: Option<ResultSet>,
    /// Generation attempts made, 1 or 2.
    pub attempts: usize,
    pub trace: Vec<Stage>,
}

/// Validated and rewritten SQL together with its rows.
#[derive(Debug, Clone, Serialize)]
pub struct SqlRun {
    pub sql: String,
    pub result: ResultSet,
}

pub struct QueryPipeline<'a> {
    store: &'a dyn StorageEngine,
    generator: &'a dyn SqlGenerator,
}

impl<'a> QueryPipeline<'a> {
    pub fn new(store: &'a dyn StorageEngine, generator: &'a dyn SqlGenerator) -> Self {
        Self { store, generator }
    }

    /// Prompt describing `scope` to the generator.
    pub fn prompt_for(&self, scope: &QueryScope) -> Result<String, PipelineError> {
        match scope {
            QueryScope::Datasets(datasets) => {
                let contexts = datasets
                    .iter()
                    .map(|dataset| {
                        let columns = self.store.introspect_columns(&dataset.storage_table_name)?;
                        Ok(DatasetContext::new(dataset.clone(), columns))
                    })
                    .collect::<Result<Vec<_>, StoreError>>()?;
                Ok(prompt::dataset_prompt(&contexts))
            }
            QueryScope::Schema(record) => Ok(prompt::schema_prompt(&record.data)),
        }
    }

    pub fn ask(&self, question: &str, scope: &QueryScope) -> Result<QueryOutcome, PipelineError> {
        let mut trace = Trace::default();
        trace.enter(Stage::QuestionReceived);
        let prompt = self.prompt_for(scope)?;
        let bindings = scope.bindings();

        let mut response = self.generator.generate_sql(&prompt, question)?;
        trace.enter(Stage::SqlGenerated);
        let mut warnings = Vec::new();
        let mut attempts = 1;

        loop {
            warnings.append(&mut response.warnings);
            let sanitized = match sql::sanitize(&response.sql) {
                Ok(sanitized) => sanitized,
                Err(violation) => {
                    trace.enter(Stage::Rejected);
                    warn!("Generated SQL rejected: {violation}");
                    return Err(PipelineError::Rejected {
                        violation,
                        sql: response.sql,
                    });
                }
            };
            trace.enter(Stage::SqlValidated);

            if let QueryScope::Schema(_) = scope {
                trace.enter(Stage::Returned);
                return Ok(QueryOutcome {
                    sql: sanitized,
                    explanation: response.explanation,
                    warnings,
                    result: None,
                    attempts,
                    trace: trace.stages,
                });
            }

            let rewritten = sql::rewrite(&sanitized, &bindings);
            trace.enter(Stage::SqlRewritten);

            match self.store.execute(&rewritten, ROW_CAP) {
                Ok(result) => {
                    trace.enter(Stage::Executed);
                    trace.enter(Stage::Returned);
                    return Ok(QueryOutcome {
                        sql: rewritten,
                        explanation: response.explanation,
                        warnings,
                        result: Some(result.cap(ROW_CAP)),
                        attempts,
                        trace: trace.stages,
                    });
                }
                Err(err) if attempts == 1 => {
                    warn!("Query failed ({err}); regenerating SQL once");
                    let retry_question = retry_question(question, &err);
                    response = match self.generator.generate_sql(&prompt, &retry_question) {
                        Ok(response) => response,
                        Err(regen_err) => {
                            trace.enter(Stage::Failed);
                            return Err(PipelineError::Execution {
                                message: format!("{err}; regenerating the query failed: {regen_err}"),
                                sql: rewritten,
                            });
                        }
                    };
                    trace.enter(Stage::RetryGenerated);
                    attempts += 1;
                }
                Err(err) => {
                    trace.enter(Stage::Failed);
                    return Err(PipelineError::Execution {
                        message: err.to_string(),
                        sql: rewritten,
                    });
                }
            }
        }
    }
}

fn retry_question(question: &str, err: &StoreError) -> String {
    format!("{question}\n\nThe previous SQL failed with this error: {err}\nCorrect the query.")
}

/// Validates then rewrites caller-supplied SQL.
pub fn prepare_sql(raw: &str, bindings: &[TableBinding]) -> Result<String, SafetyViolation> {
    let sanitized = sql::sanitize(raw)?;
    Ok(sql::rewrite(&sanitized, bindings))
}

/// Direct execution path: validate, rewrite, execute, cap.
pub fn run_sql(
    store: &dyn StorageEngine,
    raw: &str,
    bindings: &[TableBinding],
) -> Result<SqlRun, PipelineError> {
    let sql = prepare_sql(raw, bindings).map_err(|violation| PipelineError::Rejected {
        violation,
        sql: raw.to_string(),
    })?;
    debug!("Executing {sql}");
    let result = store
        .execute(&sql, ROW_CAP)
        .map_err(|err| PipelineError::Execution {
            message: err.to_string(),
            sql: sql.clone(),
        })?;
    Ok(SqlRun {
        sql,
        result: result.cap(ROW_CAP),
    })
}

/// Loads the datasets a CLI target names.
pub fn resolve_target(store: &SqliteStore, target: &TargetArgs) -> Result<Vec<Dataset>> {
    match (target.dataset, target.group) {
        (Some(id), None) => Ok(vec![
            store
                .dataset(id)
                .with_context(|| format!("Loading dataset {id}"))?,
        ]),
        (None, Some(id)) => {
            let group = store
                .group(id)
                .with_context(|| format!("Loading dataset group {id}"))?;
            store
                .group_datasets(&group)
                .with_context(|| format!("Loading members of group '{}'", group.name))
        }
        _ => bail!("Pass exactly one of --dataset or --group"),
    }
}

pub fn execute(db: &Path, args: &QueryArgs) -> Result<()> {
    let store = SqliteStore::open(db).with_context(|| format!("Opening database {db:?}"))?;
    let datasets = resolve_target(&store, &args.target)?;
    let bindings = QueryScope::Datasets(datasets).bindings();
    let run = run_sql(&store, &args.sql, &bindings).context("Running query")?;
    info!("Executed: {}", run.sql);
    print!("{}", table::render_result(&run.result));
    store.close().context("Closing database")?;
    Ok(())
}

pub fn check(args: &CheckArgs) -> Result<()> {
    let report = sql::validate(&args.sql);
    match (report.safe, report.sanitized) {
        (true, Some(sanitized)) => {
            println!("{sanitized}");
            Ok(())
        }
        (_, first) => {
            if let Some(first) = first {
                eprintln!("first statement: {first}");
            }
            bail!(
                "{}",
                report
                    .error
                    .unwrap_or_else(|| "SQL failed validation".to_string())
            )
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejected_direct_sql_keeps_the_input() {
        let store = SqliteStore::open_in_memory().unwrap();
        let err = run_sql(&store, "DELETE FROM t", &[]).unwrap_err();
        assert_eq!(err.sql(), Some("DELETE FROM t"));
        assert!(matches!(
            err,
            PipelineError::Rejected {
                violation: SafetyViolation::ForbiddenKeyword("DELETE"),
                ..
            }
        ));
    }

    #[test]
    fn execution_error_carries_rewritten_sql() {
        let store = SqliteStore::open_in_memory().unwrap();
        let bindings = [TableBinding::new("Missing", "dataset_missing_00000000")];
        let err = run_sql(&store, "SELECT * FROM Missing", &bindings).unwrap_err();
        assert_eq!(
            err.sql(),
            Some("SELECT * FROM \"dataset_missing_00000000\" LIMIT 200")
        );
    }
}
