use std::sync::OnceLock;

use log::debug;
use regex::Regex;
use serde::Serialize;
use thiserror::Error;

/// Maximum rows a query may return, enforced in the SQL text and again on results.
pub const ROW_CAP: usize = 200;

const STATEMENT_SEPARATOR: char = ';';

const FORBIDDEN_KEYWORDS: &[&str] = &[
    "INSERT", "UPDATE", "DELETE", "DROP", "ALTER", "CREATE", "TRUNCATE", "EXEC", "EXECUTE",
    "GRANT", "REVOKE", "MERGE", "REPLACE",
];

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SafetyViolation {
    #[error("multiple SQL statements are not allowed; only the first statement can be used")]
    MultipleStatements { first: String },
    #[error("forbidden keyword \"{0}\" is not allowed")]
    ForbiddenKeyword(&'static str),
    #[error("only SELECT statements are allowed")]
    NotSelect,
}

/// Verdict for a candidate statement.
///
/// `sanitized` carries the normalized SQL when `safe`, and the first statement
/// as a recovery hint when several were submitted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SafetyReport {
    pub safe: bool,
    pub error: Option<String>,
    pub sanitized: Option<String>,
    #[serde(skip)]
    pub violation: Option<SafetyViolation>,
}

impl SafetyReport {
    fn passed(sanitized: String) -> Self {
        Self {
            safe: true,
            error: None,
            sanitized: Some(sanitized),
            violation: None,
        }
    }

    fn failed(violation: SafetyViolation) -> Self {
        let sanitized = match &violation {
            SafetyViolation::MultipleStatements { first } => Some(first.clone()),
            _ => None,
        };
        Self {
            safe: false,
            error: Some(violation.to_string()),
            sanitized,
            violation: Some(violation),
        }
    }
}

fn keyword_patterns() -> &'static [(&'static str, Regex)] {
    static PATTERNS: OnceLock<Vec<(&'static str, Regex)>> = OnceLock::new();
    PATTERNS.get_or_init(|| {
        FORBIDDEN_KEYWORDS
            .iter()
            .map(|keyword| {
                let regex = Regex::new(&format!(r"(?i)\b{keyword}\b"))
                    .expect("forbidden keyword pattern compiles");
                (*keyword, regex)
            })
            .collect()
    })
}

fn limit_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"(?i)\bLIMIT\s+(?P<first>-?\d+)(?:\s*,\s*(?P<count>-?\d+))?")
            .expect("limit pattern compiles")
    })
}

/// Classifies `sql` and, when it is safe, normalizes it to a single
/// row-capped statement.
pub fn validate(sql: &str) -> SafetyReport {
    match check(sql) {
        Ok(sanitized) => SafetyReport::passed(sanitized),
        Err(violation) => {
            debug!("Rejected SQL ({violation}): {sql}");
            SafetyReport::failed(violation)
        }
    }
}

/// Returns the normalized SQL, or the violation that made it unsafe.
pub fn sanitize(sql: &str) -> Result<String, SafetyViolation> {
    check(sql)
}

fn check(sql: &str) -> Result<String, SafetyViolation> {
    let statements = sql
        .split(STATEMENT_SEPARATOR)
        .map(str::trim)
        .filter(|statement| !statement.is_empty())
        .collect::<Vec<_>>();
    if statements.len() > 1 {
        return Err(SafetyViolation::MultipleStatements {
            first: statements[0].to_string(),
        });
    }

    if let Some((keyword, _)) = keyword_patterns()
        .iter()
        .find(|(_, pattern)| pattern.is_match(sql))
    {
        return Err(SafetyViolation::ForbiddenKeyword(*keyword));
    }

    let statement = statements.first().copied().unwrap_or_default();
    if !statement.to_ascii_uppercase().starts_with("SELECT") {
        return Err(SafetyViolation::NotSelect);
    }

    Ok(cap_limit(statement))
}

/// Appends `LIMIT <cap>` when absent (after any ORDER BY, which precedes it in
/// the text) and lowers an existing limit above the cap.
///
/// In the `LIMIT <offset>, <count>` form only the count is capped. A negative
/// count means "no limit" to SQLite and is replaced by the cap.
fn cap_limit(statement: &str) -> String {
    let Some(captures) = limit_pattern().captures(statement) else {
        debug!("No LIMIT clause; appending LIMIT {ROW_CAP}");
        return format!("{statement} LIMIT {ROW_CAP}");
    };

    let (offset, count) = match captures.name("count") {
        Some(count) => (Some(&captures["first"]), count.as_str()),
        None => (None, &captures["first"]),
    };
    let within_cap = count
        .parse::<usize>()
        .map(|limit| limit <= ROW_CAP)
        .unwrap_or(false);
    if within_cap {
        return statement.to_string();
    }

    debug!("Lowering LIMIT {count} to {ROW_CAP}");
    let replacement = match offset {
        Some(offset) => format!("LIMIT {offset}, {ROW_CAP}"),
        None => format!("LIMIT {ROW_CAP}"),
    };
    limit_pattern()
        .replace(statement, regex::NoExpand(&replacement))
        .into_owned()
}
