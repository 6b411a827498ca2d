//! Storage identifiers derived from user-facing file names.
//!
//! Display names (original filenames) never reach executed SQL directly. They
//! are reduced to `[a-z0-9_]` identifiers that cannot collide with SQL
//! keywords; uniqueness across uploads comes from the id suffix added by
//! [`storage_table_name`].

use std::sync::OnceLock;

use regex::Regex;
use uuid::Uuid;

pub const MAX_IDENTIFIER_LEN: usize = 63;
const DEFAULT_IDENTIFIER: &str = "dataset";
const IDENTIFIER_PREFIX: &str = "t_";
const STORAGE_PREFIX: &str = "dataset";
const ID_SUFFIX_LEN: usize = 8;

const RESERVED_WORDS: &[&str] = &[
    "select", "from", "where", "insert", "update", "delete", "drop", "create", "alter", "table",
    "index", "view", "trigger", "database", "schema", "union", "join", "inner", "left", "right",
    "outer", "on", "as", "and", "or", "not", "in", "like", "between", "is", "null", "order", "by",
    "group", "having", "limit", "offset", "distinct", "case", "when", "then", "else", "end", "if",
    "exists", "all", "any", "some", "with", "primary", "key", "foreign", "references",
    "constraint", "unique", "check", "default",
];

fn extension_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"\.[^/.]+$").expect("valid extension pattern"))
}

/// Removes the final `.ext` segment, leaving names without one untouched.
pub fn strip_extension(file_name: &str) -> &str {
    match extension_pattern().find(file_name) {
        Some(found) => &file_name[..found.start()],
        None => file_name,
    }
}

/// Maps an arbitrary display name to a valid SQL identifier. Never fails.
pub fn sanitize(display_name: &str) -> String {
    let lowered = strip_extension(display_name).to_lowercase();

    let mut collapsed = String::with_capacity(lowered.len());
    for ch in lowered.chars() {
        let mapped = if ch.is_ascii_lowercase() || ch.is_ascii_digit() {
            ch
        } else {
            '_'
        };
        if mapped == '_' && collapsed.ends_with('_') {
            continue;
        }
        collapsed.push(mapped);
    }

    let trimmed = collapsed.trim_matches('_');
    let mut name = if trimmed.is_empty() {
        DEFAULT_IDENTIFIER.to_string()
    } else {
        trimmed.to_string()
    };

    if name.starts_with(|ch: char| ch.is_ascii_digit()) {
        name.insert_str(0, IDENTIFIER_PREFIX);
    }
    if RESERVED_WORDS.contains(&name.as_str()) {
        name.insert_str(0, IDENTIFIER_PREFIX);
    }

    if name.len() > MAX_IDENTIFIER_LEN {
        name.truncate(MAX_IDENTIFIER_LEN);
        let kept = name.trim_end_matches('_').len();
        name.truncate(kept);
    }
    name
}

pub fn is_valid(name: &str) -> bool {
    !name.is_empty()
        && name.chars().all(|ch| ch.is_ascii_alphanumeric() || ch == '_')
        && !name.starts_with(|ch: char| ch.is_ascii_digit())
}

/// Physical table name for a dataset: `dataset_<sanitized>_<id prefix>`.
pub fn storage_table_name(display_name: &str, id: &Uuid) -> String {
    let suffix = id.simple().to_string();
    format!(
        "{STORAGE_PREFIX}_{}_{}",
        sanitize(display_name),
        &suffix[..ID_SUFFIX_LEN]
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strip_extension_only_removes_last_segment() {
        assert_eq!(strip_extension("orders.2024.csv"), "orders.2024");
        assert_eq!(strip_extension("orders"), "orders");
        assert_eq!(strip_extension("dir.v2/orders"), "dir.v2/orders");
    }

    #[test]
    fn sanitize_truncates_without_trailing_underscore() {
        let long = format!("{}_{}", "a".repeat(62), "tail");
        let name = sanitize(&long);
        assert_eq!(name.len(), 62);
        assert!(!name.ends_with('_'));
    }
}
