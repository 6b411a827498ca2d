//! Prompt text handed to the SQL generator, and canned question suggestions.

use std::{fmt::Write as _, sync::OnceLock};

use itertools::Itertools;
use log::{debug, warn};
use regex::Regex;
use serde::Deserialize;

use crate::{
    llm::SqlGenerator,
    model::{Dataset, PiiSummary},
    schema::SchemaData,
    store::{ColumnInfo, ROW_ID_COLUMN},
};

const SUGGESTION_LIMIT: usize = 5;

/// Question put to the generator by [`recommend_questions`].
pub const RECOMMENDATION_REQUEST: &str = "Analyze the schema above and write 5 meaningful questions a user could ask of it.
Each question must be concrete and answerable with this schema alone.
Include questions that use the foreign key relationships between tables.

Reply with JSON in exactly this shape:
{
  \"recommendations\": [\"question 1\", \"question 2\", \"question 3\", \"question 4\", \"question 5\"]
}";

const SHARED_RULES: &[&str] = &[
    "Generate SELECT statements only.",
    "Do not use INSERT, UPDATE, DELETE, DROP, ALTER, CREATE, or TRUNCATE.",
    "A LIMIT 200 clause is added automatically when LIMIT is missing.",
];

/// Prompt for a declared schema.
pub fn schema_prompt(schema: &SchemaData) -> String {
    let mut prompt = String::from("The database schema is:\n\n");
    for table in &schema.tables {
        let _ = writeln!(prompt, "Table: {}", table.name);
        if !table.primary_key.is_empty() {
            let _ = writeln!(prompt, "  PRIMARY KEY: {}", table.primary_key.join(", "));
        }
        prompt.push_str("  Columns:\n");
        for column in &table.columns {
            let nullability = if column.is_nullable() { "NULL" } else { "NOT NULL" };
            let _ = writeln!(
                prompt,
                "    - {} ({}, {nullability})",
                column.name, column.data_type
            );
        }
        if !table.foreign_keys.is_empty() {
            prompt.push_str("  Foreign keys:\n");
            for fk in &table.foreign_keys {
                let _ = writeln!(
                    prompt,
                    "    - {} -> {}.{}",
                    fk.column, fk.references.table, fk.references.column
                );
            }
        }
        prompt.push('\n');
    }

    prompt.push_str("Rules:\n");
    push_rules(&mut prompt, SHARED_RULES);
    push_rules(
        &mut prompt,
        &[
            "Use only the tables and columns listed above.",
            "The SQL must be correct and executable.",
        ],
    );
    prompt
}

/// A stored dataset together with its introspected columns.
#[derive(Debug, Clone)]
pub struct DatasetContext {
    pub dataset: Dataset,
    pub columns: Vec<ColumnInfo>,
}

impl DatasetContext {
    pub fn new(dataset: Dataset, columns: Vec<ColumnInfo>) -> Self {
        Self { dataset, columns }
    }

    /// Columns a question can refer to; the synthetic row key is hidden.
    pub fn visible_columns(&self) -> impl Iterator<Item = &ColumnInfo> {
        self.columns
            .iter()
            .filter(|column| column.name != ROW_ID_COLUMN)
    }

    fn is_pii(&self, column: &str) -> bool {
        self.dataset.pii_columns.iter().any(|name| name == column)
    }
}

/// Prompt for one dataset or a group of them.
///
/// The model is told to use display names as table names; storage names are
/// substituted afterwards by the rewriter.
pub fn dataset_prompt(contexts: &[DatasetContext]) -> String {
    let mut prompt = String::from("The database schema is:\n\n");
    for context in contexts {
        let dataset = &context.dataset;
        let _ = writeln!(prompt, "Table: {}", dataset.display_name);
        prompt.push_str("  Columns:\n");
        for column in context.visible_columns() {
            let data_type = if column.data_type.is_empty() {
                "TEXT"
            } else {
                column.data_type.as_str()
            };
            let marker = if context.is_pii(&column.name) {
                format!(" [PII processed: {}]", dataset.pii_action)
            } else {
                String::new()
            };
            let _ = writeln!(prompt, "    - {} ({data_type}){marker}", column.name);
        }

        let processed = context
            .visible_columns()
            .filter(|column| context.is_pii(&column.name))
            .map(|column| column.name.as_str())
            .collect::<Vec<_>>();
        if !processed.is_empty() && dataset.pii_action != PiiSummary::None {
            let _ = writeln!(
                prompt,
                "\n  Important: these columns were recognized as PII and processed with '{}':",
                dataset.pii_action
            );
            for name in &processed {
                let _ = writeln!(prompt, "    - {name}");
            }
            prompt.push_str(
                "  When the question asks to exclude PII-processed (or hashed, dropped, masked) columns,\n  leave the columns above out of the SELECT list.\n",
            );
        }
        prompt.push('\n');
    }

    prompt.push_str("Rules:\n");
    push_rules(&mut prompt, SHARED_RULES);
    match contexts {
        [single] => {
            let _ = writeln!(
                prompt,
                "- The table name is \"{}\".",
                single.dataset.display_name
            );
        }
        _ => {
            let names = contexts
                .iter()
                .map(|context| format!("\"{}\"", context.dataset.display_name))
                .join(", ");
            let _ = writeln!(prompt, "- The available tables are {names}.");
            prompt.push_str(
                "- Combine tables with JOIN on columns that share a meaning, and give each table an alias.\n",
            );
        }
    }
    push_rules(
        &mut prompt,
        &[
            "For \"top N\" or \"first N\" questions use ORDER BY with LIMIT.",
            "SELECT * is fine for \"all columns\", but list columns explicitly when PII-processed columns must be excluded.",
            "Every column is stored as TEXT. Numeric comparisons, arithmetic, and numeric sorting need CAST(column AS REAL) or CAST(column AS INTEGER).\n  e.g. WHERE CAST(discount AS REAL) >= 2000\n  e.g. ORDER BY CAST(quantity AS INTEGER) DESC",
            "The SQL must be correct and executable.",
        ],
    );
    prompt
}

fn push_rules(prompt: &mut String, rules: &[&str]) {
    for rule in rules {
        let _ = writeln!(prompt, "- {rule}");
    }
}

/// Starter questions for a dataset, derived from its column names.
pub fn suggest_questions_for_columns(columns: &[String]) -> Vec<String> {
    let columns = columns
        .iter()
        .filter(|name| name.as_str() != ROW_ID_COLUMN)
        .collect::<Vec<_>>();
    let Some(first) = columns.first() else {
        return Vec::new();
    };
    let pairing = match columns.get(1) {
        Some(second) => format!("Show the {first} and {second} columns together"),
        None => format!("Show the distinct values of {first}"),
    };
    [
        "Show all rows".to_string(),
        format!("Show the values of the {first} column"),
        "How many rows are there?".to_string(),
        pairing,
        "Show the 10 most recent rows".to_string(),
    ]
    .into_iter()
    .take(SUGGESTION_LIMIT)
    .collect()
}

/// Template questions for a declared schema.
pub fn suggest_questions_for_schema(schema: &SchemaData) -> Vec<String> {
    let names = schema.table_names();
    let Some(first) = names.first() else {
        return Vec::new();
    };
    let relation = match names.get(1) {
        Some(second) => format!("Join the {first} and {second} tables and show the result"),
        None => format!("How many records are in the {first} table?"),
    };
    [
        format!("Show all data in the {first} table"),
        "List every table with its column count".to_string(),
        relation,
        "Show the 10 most recently created records".to_string(),
        "Show the record count for each table".to_string(),
    ]
    .into_iter()
    .take(SUGGESTION_LIMIT)
    .collect()
}

#[derive(Debug, Deserialize)]
struct RecommendationEnvelope {
    recommendations: Vec<serde_json::Value>,
}

fn list_marker_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"^(?:\d+[.)]\s*|[-*•]\s+)").expect("list marker pattern compiles")
    })
}

/// Questions the generator proposes for a declared schema.
///
/// The reply is read as a `{"recommendations": [...]}` object first, then as
/// numbered, bulleted, or question-mark lines. When generation fails or
/// neither reading yields a question, the schema templates are returned.
pub fn recommend_questions(generator: &dyn SqlGenerator, schema: &SchemaData) -> Vec<String> {
    let response = match generator.generate_sql(&schema_prompt(schema), RECOMMENDATION_REQUEST) {
        Ok(response) => response,
        Err(err) => {
            warn!("Question recommendation failed ({err}); using templates");
            return suggest_questions_for_schema(schema);
        }
    };

    let texts = [response.explanation.as_str(), response.sql.as_str()];
    let recommended = texts
        .iter()
        .filter_map(|text| recommendations_from_json(text))
        .chain(texts.iter().map(|text| recommendations_from_lines(text)))
        .find(|questions| !questions.is_empty());
    match recommended {
        Some(questions) => questions,
        None => {
            debug!("No questions found in the recommendation reply; using templates");
            suggest_questions_for_schema(schema)
        }
    }
}

fn recommendations_from_json(text: &str) -> Option<Vec<String>> {
    let start = text.find('{')?;
    let end = text.rfind('}')?;
    if end <= start {
        return None;
    }
    let envelope = serde_json::from_str::<RecommendationEnvelope>(&text[start..=end]).ok()?;
    Some(
        envelope
            .recommendations
            .iter()
            .filter_map(serde_json::Value::as_str)
            .map(str::trim)
            .filter(|question| !question.is_empty())
            .map(str::to_string)
            .take(SUGGESTION_LIMIT)
            .collect(),
    )
}

fn recommendations_from_lines(text: &str) -> Vec<String> {
    text.lines()
        .map(str::trim)
        .filter_map(|line| match list_marker_pattern().find(line) {
            Some(marker) => Some(line[marker.end()..].trim()),
            None if line.contains('?') => Some(line),
            None => None,
        })
        .filter(|question| !question.is_empty() && !question.starts_with(['{', '[']))
        .map(str::to_string)
        .take(SUGGESTION_LIMIT)
        .collect()
}
