use std::sync::OnceLock;

use log::debug;
use regex::{Captures, Regex};
use serde::{Deserialize, Serialize};

/// Clause keywords that introduce a table reference.
const TABLE_CLAUSE: &str =
    r"FROM|(?:(?:INNER|CROSS|(?:LEFT|RIGHT|FULL)(?:\s+OUTER)?)\s+)?JOIN";

/// A user-facing table name and the storage table it stands for.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableBinding {
    pub display_name: String,
    pub storage_table_name: String,
}

impl TableBinding {
    pub fn new(display_name: impl Into<String>, storage_table_name: impl Into<String>) -> Self {
        Self {
            display_name: display_name.into(),
            storage_table_name: storage_table_name.into(),
        }
    }

    /// `<clause> <name>` where the name is bare, or wrapped in `"`, `'` or backticks.
    fn reference_pattern(&self) -> Regex {
        let name = regex::escape(&self.display_name);
        let pattern = format!(
            r#"(?i)\b(?P<clause>{TABLE_CLAUSE})\s+(?:"{name}"|'{name}'|`{name}`|{name}(?P<tail>[^\p{{L}}\p{{N}}_]|$))"#
        );
        Regex::new(&pattern).expect("escaped display name always forms a valid pattern")
    }
}

fn quoted_reference_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(&format!(r#"(?i)\b(?:{TABLE_CLAUSE})\s+["'`]"#))
            .expect("quoted reference pattern compiles")
    })
}

fn from_keyword_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"(?i)\bFROM\b").expect("FROM pattern compiles"))
}

fn bare_from_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"(?i)\b(?P<clause>FROM)\s+[\p{L}_][\p{L}\p{N}_]*")
            .expect("bare FROM pattern compiles")
    })
}

fn leading_select_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"(?i)^\s*SELECT\b").expect("SELECT pattern compiles"))
}

fn trailing_clause_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"(?i)\b(?:WHERE|GROUP\s+BY|HAVING|ORDER\s+BY|LIMIT)\b")
            .expect("clause pattern compiles")
    })
}

/// Replaces display names after FROM/JOIN clauses with quoted storage names.
///
/// With exactly one binding the rewriter also repairs two degenerate shapes: a
/// statement with no FROM at all gets one after its select list, and a bare
/// unknown identifier after FROM is swapped for the storage table. With more
/// bindings the target would be a guess, so unmatched SQL is passed through
/// and left to fail at execution.
pub fn rewrite(sql: &str, bindings: &[TableBinding]) -> String {
    let mut rewritten = sql.to_string();
    for binding in bindings {
        let pattern = binding.reference_pattern();
        if !pattern.is_match(&rewritten) {
            debug!(
                "No reference to '{}' found in generated SQL",
                binding.display_name
            );
            continue;
        }
        let replacement = format!("\"{}\"", binding.storage_table_name);
        rewritten = pattern
            .replace_all(&rewritten, |caps: &Captures| {
                let tail = caps.name("tail").map(|m| m.as_str()).unwrap_or("");
                format!("{} {replacement}{tail}", &caps["clause"])
            })
            .into_owned();
        debug!(
            "Rewrote '{}' to {replacement}",
            binding.display_name
        );
    }

    match bindings {
        [single] if !quoted_reference_pattern().is_match(&rewritten) => {
            single_table_fallback(&rewritten, &single.storage_table_name)
        }
        _ => rewritten,
    }
}

fn single_table_fallback(sql: &str, storage_table_name: &str) -> String {
    let target = format!("\"{storage_table_name}\"");

    if from_keyword_pattern().is_match(sql) {
        debug!("Replacing unrecognized FROM target with {target}");
        return bare_from_pattern()
            .replace(sql, |caps: &Captures| format!("{} {target}", &caps["clause"]))
            .into_owned();
    }

    let Some(select) = leading_select_pattern().find(sql) else {
        return sql.to_string();
    };
    debug!("Injecting FROM {target} into statement without a FROM clause");
    let body = &sql[select.end()..];
    let split_at = trailing_clause_pattern()
        .find(body)
        .map(|m| m.start())
        .unwrap_or(body.len());
    let list = body[..split_at].trim();
    let rest = body[split_at..].trim();

    let mut injected = sql[..select.end()].to_string();
    injected.push(' ');
    injected.push_str(if list.is_empty() { "*" } else { list });
    injected.push_str(" FROM ");
    injected.push_str(&target);
    if !rest.is_empty() {
        injected.push(' ');
        injected.push_str(rest);
    }
    injected
}
