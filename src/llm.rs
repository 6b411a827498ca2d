//! Boundary to the language model that turns questions into SQL.
//!
//! No network client ships here. Callers implement [`ChatModel`] for their
//! provider (or [`SqlGenerator`] directly) and get reply parsing plus model
//! fallback from [`ModelFallback`].

use std::sync::OnceLock;

use log::{debug, warn};
use regex::Regex;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const DEFAULT_MODEL: &str = "gpt-4o-mini";

/// Alternates tried, in order, when the preferred model is not accessible.
pub const FALLBACK_MODELS: &[&str] = &[
    "gpt-4o-mini",
    "gpt-4-turbo",
    "gpt-4o",
    "gpt-4",
    "gpt-3.5-turbo",
];

/// Preferred model plus alternates.
pub const MAX_MODEL_ATTEMPTS: usize = 3;

pub const SYSTEM_PROMPT: &str = "You are an expert at writing SQL. Translate the user's natural-language question into one correct SELECT query.

Guidelines:
1. When the user asks to exclude PII-processed (hashed, dropped, masked) columns, leave the PII-processed columns named in the schema out of the SELECT list.
2. For \"top N\" or \"first N\" questions use ORDER BY with LIMIT. Without an explicit sort key, order by id or the first column.
3. When all columns are requested together with a PII exclusion, list the columns explicitly instead of SELECT *.
4. Every column is stored as TEXT. Numeric comparisons (>=, >, <, <=, =), arithmetic, and numeric sorting must use CAST(column AS REAL) or CAST(column AS INTEGER).
   e.g. WHERE CAST(discount AS REAL) >= 2000
   e.g. ORDER BY CAST(quantity AS INTEGER) DESC
   e.g. SELECT CAST(unit_price AS REAL) * CAST(quantity AS INTEGER) AS total
5. The reply must be valid JSON.";

const EXTRACTED_EXPLANATION: &str = "The reply was not valid JSON; the SQL was extracted from its text.";
const FORMAT_WARNING: &str = "The reply did not follow the expected format.";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LlmResponse {
    #[serde(default)]
    pub sql: String,
    #[serde(default)]
    pub explanation: String,
    #[serde(default)]
    pub warnings: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LlmError {
    #[error("model '{model}' is not accessible")]
    AccessDenied { model: String },
    #[error("model provider error: {0}")]
    Provider(String),
    #[error("the model returned an empty reply")]
    EmptyReply,
}

/// Produces SQL for a question against the schema described by `prompt`.
pub trait SqlGenerator {
    fn generate_sql(&self, prompt: &str, question: &str) -> Result<LlmResponse, LlmError>;
}

/// One chat completion call against a named model.
pub trait ChatModel {
    fn complete(&self, model: &str, system: &str, user: &str) -> Result<String, LlmError>;
}

impl<C: ChatModel + ?Sized> ChatModel for &C {
    fn complete(&self, model: &str, system: &str, user: &str) -> Result<String, LlmError> {
        (**self).complete(model, system, user)
    }
}

/// User message sent alongside [`SYSTEM_PROMPT`].
pub fn user_message(prompt: &str, question: &str) -> String {
    format!(
        "{prompt}\n\nQuestion: {question}\n\nReply with JSON in exactly this shape:\n{{\n  \"sql\": \"SELECT ...\",\n  \"explanation\": \"...\",\n  \"warnings\": []\n}}"
    )
}

/// Tries the preferred model, then alternates from [`FALLBACK_MODELS`] while
/// the provider reports the model as inaccessible.
#[derive(Debug, Clone)]
pub struct ModelFallback<C> {
    chat: C,
    model: String,
}

impl<C: ChatModel> ModelFallback<C> {
    pub fn new(chat: C, model: impl Into<String>) -> Self {
        Self {
            chat,
            model: model.into(),
        }
    }

    pub fn candidates(&self) -> Vec<&str> {
        std::iter::once(self.model.as_str())
            .chain(
                FALLBACK_MODELS
                    .iter()
                    .copied()
                    .filter(|candidate| *candidate != self.model),
            )
            .take(MAX_MODEL_ATTEMPTS)
            .collect()
    }
}

impl<C: ChatModel> SqlGenerator for ModelFallback<C> {
    fn generate_sql(&self, prompt: &str, question: &str) -> Result<LlmResponse, LlmError> {
        let user = user_message(prompt, question);
        let mut last_error = None;
        for candidate in self.candidates() {
            match self.chat.complete(candidate, SYSTEM_PROMPT, &user) {
                Ok(content) => {
                    if content.trim().is_empty() {
                        return Err(LlmError::EmptyReply);
                    }
                    let mut response = parse_reply(&content);
                    if candidate != self.model {
                        response.warnings.push(format!(
                            "Model '{}' was not accessible; '{candidate}' was used instead.",
                            self.model
                        ));
                    }
                    return Ok(response);
                }
                Err(err @ LlmError::AccessDenied { .. }) => {
                    warn!("{err}; trying the next model");
                    last_error = Some(err);
                }
                Err(err) => return Err(err),
            }
        }
        Err(last_error.unwrap_or(LlmError::AccessDenied {
            model: self.model.clone(),
        }))
    }
}

fn sql_fence_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"(?s)```sql\s*(.*?)\s*```").expect("sql fence pattern compiles")
    })
}

fn select_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"(?i)\bSELECT\b").expect("select pattern compiles"))
}

/// Reads a model reply: a JSON envelope when possible, otherwise SQL pulled
/// out of a ```sql fence or the first `SELECT` run up to a blank line.
///
/// A JSON reply carrying neither `sql` nor `explanation` is kept whole in
/// `explanation`.
pub fn parse_reply(content: &str) -> LlmResponse {
    let trimmed = content.trim();
    if let Some(mut response) = parse_envelope(trimmed) {
        if response.sql.is_empty() && response.explanation.is_empty() {
            // JSON of another shape; callers asking for it read it from here.
            response.explanation = trimmed.to_string();
        }
        return response;
    }

    debug!("Reply is not a JSON envelope; extracting SQL from text");
    let sql = sql_fence_pattern()
        .captures(trimmed)
        .map(|caps| caps[1].to_string())
        .or_else(|| {
            select_pattern().find(trimmed).map(|start| {
                let run = &trimmed[start.start()..];
                run.split("\n\n").next().unwrap_or(run).trim().to_string()
            })
        })
        .unwrap_or_else(|| trimmed.to_string());
    LlmResponse {
        sql,
        explanation: EXTRACTED_EXPLANATION.to_string(),
        warnings: vec![FORMAT_WARNING.to_string()],
    }
}

fn parse_envelope(content: &str) -> Option<LlmResponse> {
    if let Ok(response) = serde_json::from_str::<LlmResponse>(content) {
        return Some(response);
    }
    // Envelope wrapped in prose or a ```json fence.
    let start = content.find('{')?;
    let end = content.rfind('}')?;
    if end <= start {
        return None;
    }
    serde_json::from_str::<LlmResponse>(&content[start..=end]).ok()
}
