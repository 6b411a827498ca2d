//! Field-level redaction of PII columns across a row set.

use std::borrow::Cow;

use log::debug;

use crate::{
    model::{PiiSummary, RedactionAction, Row},
    pii::PiiReport,
};

const MASK_CHAR: char = '*';
const SHORT_MASK: &str = "**";
const HASH_PREFIX: &str = "hash_";

/// Ordered column → action assignments. Later assignments override earlier ones.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ActionMap {
    entries: Vec<(String, RedactionAction)>,
}

impl ActionMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Each reported column with the action the detector suggested.
    pub fn suggested(report: &PiiReport) -> Self {
        let mut map = Self::new();
        for column in &report.columns {
            map.set(&column.name, column.suggested_action);
        }
        map
    }

    pub fn uniform(report: &PiiReport, action: RedactionAction) -> Self {
        let mut map = Self::new();
        for column in report.column_names() {
            map.set(column, action);
        }
        map
    }

    pub fn set(&mut self, column: &str, action: RedactionAction) {
        match self.entries.iter_mut().find(|(name, _)| name == column) {
            Some((_, slot)) => *slot = action,
            None => self.entries.push((column.to_string(), action)),
        }
    }

    pub fn get(&self, column: &str) -> Option<RedactionAction> {
        self.entries
            .iter()
            .find(|(name, _)| name == column)
            .map(|(_, action)| *action)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, RedactionAction)> {
        self.entries
            .iter()
            .map(|(name, action)| (name.as_str(), *action))
    }

    /// Columns that were actually acted on, in assignment order.
    pub fn redacted_columns(&self) -> Vec<String> {
        self.iter()
            .filter(|(_, action)| *action != RedactionAction::None)
            .map(|(name, _)| name.to_string())
            .collect()
    }

    /// Dataset-level summary: none, the single column's action, or mixed.
    pub fn summary(&self) -> PiiSummary {
        let acted = self
            .iter()
            .filter(|(_, action)| *action != RedactionAction::None)
            .map(|(_, action)| action)
            .collect::<Vec<_>>();
        match acted.as_slice() {
            [] => PiiSummary::None,
            [single] => PiiSummary::from(*single),
            _ => PiiSummary::Mixed,
        }
    }
}

impl<S: Into<String>> FromIterator<(S, RedactionAction)> for ActionMap {
    fn from_iter<T: IntoIterator<Item = (S, RedactionAction)>>(iter: T) -> Self {
        let mut map = Self::new();
        for (column, action) in iter {
            map.set(&column.into(), action);
        }
        map
    }
}

/// How the user chose to treat the reported columns.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RedactionPlan {
    /// One action for every column the report flagged.
    Uniform(RedactionAction),
    /// Explicit per-column actions; unlisted columns are untouched.
    PerColumn(ActionMap),
}

impl RedactionPlan {
    pub fn resolve(&self, report: &PiiReport) -> ActionMap {
        match self {
            RedactionPlan::Uniform(action) => ActionMap::uniform(report, *action),
            RedactionPlan::PerColumn(map) => map.clone(),
        }
    }
}

/// Applies the plan to every row. Input rows are left untouched.
pub fn redact(rows: &[Row], report: &PiiReport, plan: &RedactionPlan) -> Vec<Row> {
    let actions = plan.resolve(report);
    debug!(
        "Redacting {} row(s) across {} column assignment(s)",
        rows.len(),
        actions.entries.len()
    );
    rows.iter().map(|row| redact_row(row, &actions)).collect()
}

fn redact_row(row: &Row, actions: &ActionMap) -> Row {
    let mut processed = row.clone();
    for (column, action) in actions.iter() {
        match action {
            RedactionAction::None => {}
            RedactionAction::Drop => {
                processed.remove(column);
            }
            RedactionAction::Mask | RedactionAction::Hash => {
                let Some(value) = processed.get(column).map(str::to_string) else {
                    continue;
                };
                let replaced = if action == RedactionAction::Mask {
                    mask_value(&value)
                } else {
                    hash_value(&value)
                };
                if let Cow::Owned(replacement) = replaced {
                    processed.set(column, replacement);
                }
            }
        }
    }
    processed
}

/// Keeps the edges of a value and stars out the rest.
///
/// Lengths are counted in characters: `""` stays empty, up to two characters
/// become `**`, up to four keep the first character, longer values keep two
/// characters at each end.
pub fn mask_value(value: &str) -> Cow<'_, str> {
    let chars = value.chars().collect::<Vec<_>>();
    let len = chars.len();
    match len {
        0 => Cow::Borrowed(value),
        1..=2 => Cow::Owned(SHORT_MASK.to_string()),
        3..=4 => {
            let mut masked = String::with_capacity(value.len());
            masked.push(chars[0]);
            masked.extend(std::iter::repeat_n(MASK_CHAR, len - 1));
            Cow::Owned(masked)
        }
        _ => {
            let mut masked = String::with_capacity(value.len());
            masked.extend(&chars[..2]);
            masked.extend(std::iter::repeat_n(MASK_CHAR, len - 4));
            masked.extend(&chars[len - 2..]);
            Cow::Owned(masked)
        }
    }
}

/// Stable, non-cryptographic token: `hash_<hex>`.
///
/// Rolling `h * 31 + unit` over UTF-16 code units, wrapped to 32 bits; the
/// absolute value is rendered so the token never carries a sign.
pub fn hash_value(value: &str) -> Cow<'_, str> {
    if value.is_empty() {
        return Cow::Borrowed(value);
    }
    let hash = value.encode_utf16().fold(0i32, |acc, unit| {
        acc.wrapping_shl(5)
            .wrapping_sub(acc)
            .wrapping_add(i32::from(unit))
    });
    Cow::Owned(format!("{HASH_PREFIX}{:x}", i64::from(hash).abs()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mask_counts_characters_not_bytes() {
        assert_eq!(mask_value("홍길동"), "홍**");
        assert_eq!(mask_value("김철수님안녕"), "김철**안녕");
    }

    #[test]
    fn mask_keeps_first_char_for_short_values() {
        assert_eq!(mask_value("abc"), "a**");
        assert_eq!(mask_value("abcd"), "a***");
        assert_eq!(mask_value("abcde"), "ab*de");
    }

    #[test]
    fn hash_matches_known_tokens() {
        // h("a") = 97, h("ab") = 97 * 31 + 98 = 3105
        assert_eq!(hash_value("a"), "hash_61");
        assert_eq!(hash_value("ab"), "hash_c21");
        assert_eq!(hash_value(""), "");
    }

    #[test]
    fn summary_counts_only_acted_columns() {
        let map: ActionMap = [
            ("email", RedactionAction::Drop),
            ("phone", RedactionAction::None),
        ]
        .into_iter()
        .collect();
        assert_eq!(map.summary(), PiiSummary::Drop);
        assert_eq!(map.redacted_columns(), vec!["email".to_string()]);

        let mixed: ActionMap = [
            ("email", RedactionAction::Drop),
            ("phone", RedactionAction::Drop),
        ]
        .into_iter()
        .collect();
        assert_eq!(mixed.summary(), PiiSummary::Mixed);
    }
}
