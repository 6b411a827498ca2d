//! Heuristic PII classification of columns.
//!
//! Classification is an ordered pipeline over a rule table:
//!
//! 1. column name contains a known non-PII keyword: not PII, stop;
//! 2. column name contains a known PII keyword (first hit is recorded);
//! 3. more than half of the sampled non-empty values match a named value pattern;
//! 4. keyword and pattern: high confidence, either alone: medium.
//!
//! The rules are plain data in [`PiiRules`], so extending the vocabulary never
//! touches the control flow in [`PiiRules::detect`].

use std::{borrow::Cow, fmt, sync::OnceLock};

use log::debug;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::model::{RedactionAction, Row};

/// Maximum number of leading values inspected per column.
pub const SAMPLE_LIMIT: usize = 20;

/// Names qualified by a non-personal noun. These win over every other rule.
const NON_PII_KEYWORDS: &[&str] = &[
    "product_name",
    "order_name",
    "item_name",
    "goods_name",
    "category_name",
    "type_name",
    "status_name",
    "company_name",
    "organization_name",
    "org_name",
    "table_name",
    "column_name",
    "field_name",
    "file_name",
    "folder_name",
    "path_name",
    "상품명",
    "주문명",
    "항목명",
    "카테고리명",
];

// A bare "name" is deliberately absent: it is decided by value shape alone.
const PII_KEYWORDS: &[&str] = &[
    "customer_name",
    "user_name",
    "client_name",
    "person_name",
    "first_name",
    "last_name",
    "middle_name",
    "full_name",
    "이름",
    "성명",
    "email",
    "이메일",
    "mail",
    "phone",
    "전화",
    "tel",
    "mobile",
    "휴대폰",
    "address",
    "주소",
    "addr",
    "ssn",
    "주민",
    "주민번호",
    "social",
    "계좌",
    "account",
    "bank",
    "card",
    "카드",
    "credit",
    "ip",
    "ipaddress",
    "ip_address",
    "password",
    "비밀번호",
    "passwd",
    "pwd",
    "birth",
    "생년월일",
    "birthday",
    "user_id",
    "userid",
];

const VALUE_PATTERNS: &[(&str, &str)] = &[
    ("email", r"^[^\s@]+@[^\s@]+\.[^\s@]+$"),
    ("phone", r"^[0-9\s\-()+]{10,}$"),
    ("ip", r"^(?:[0-9]{1,3}\.){3}[0-9]{1,3}$"),
    ("ssn", r"^[0-9]{6}-?[0-9]{7}$"),
    ("account", r"^[0-9]{10,}$"),
    ("card", r"^[0-9]{4}[\s\-]?[0-9]{4}[\s\-]?[0-9]{4}[\s\-]?[0-9]{4}$"),
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Confidence {
    Low,
    Medium,
    High,
}

impl Confidence {
    pub fn as_str(&self) -> &'static str {
        match self {
            Confidence::Low => "low",
            Confidence::Medium => "medium",
            Confidence::High => "high",
        }
    }

    pub fn suggested_action(&self) -> RedactionAction {
        match self {
            Confidence::High => RedactionAction::Drop,
            Confidence::Medium | Confidence::Low => RedactionAction::Mask,
        }
    }
}

impl fmt::Display for Confidence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Detection {
    pub is_pii: bool,
    pub reason: String,
    pub confidence: Confidence,
}

impl Detection {
    fn not_pii(reason: String, confidence: Confidence) -> Self {
        Self {
            is_pii: false,
            reason,
            confidence,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PiiColumn {
    pub name: String,
    pub reason: String,
    pub confidence: Confidence,
    pub suggested_action: RedactionAction,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PiiReport {
    pub columns: Vec<PiiColumn>,
}

impl PiiReport {
    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    pub fn get(&self, name: &str) -> Option<&PiiColumn> {
        self.columns.iter().find(|column| column.name == name)
    }

    pub fn column_names(&self) -> impl Iterator<Item = &str> {
        self.columns.iter().map(|column| column.name.as_str())
    }
}

#[derive(Debug, Clone)]
pub struct ValuePattern {
    pub name: Cow<'static, str>,
    regex: Regex,
}

impl ValuePattern {
    pub fn new(name: impl Into<Cow<'static, str>>, pattern: &str) -> Result<Self, regex::Error> {
        Ok(Self {
            name: name.into(),
            regex: Regex::new(pattern)?,
        })
    }

    pub fn is_match(&self, value: &str) -> bool {
        self.regex.is_match(value)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct PatternHit<'a> {
    pattern: &'a str,
    matches: usize,
    sampled: usize,
}

/// Keyword tables and value patterns driving classification, in priority order.
#[derive(Debug, Clone)]
pub struct PiiRules {
    non_pii_keywords: Vec<Cow<'static, str>>,
    pii_keywords: Vec<Cow<'static, str>>,
    patterns: Vec<ValuePattern>,
}

impl Default for PiiRules {
    fn default() -> Self {
        let patterns = VALUE_PATTERNS
            .iter()
            .map(|(name, pattern)| {
                ValuePattern::new(*name, pattern).expect("built-in PII pattern compiles")
            })
            .collect();
        Self {
            non_pii_keywords: NON_PII_KEYWORDS.iter().map(|k| Cow::Borrowed(*k)).collect(),
            pii_keywords: PII_KEYWORDS.iter().map(|k| Cow::Borrowed(*k)).collect(),
            patterns,
        }
    }
}

impl PiiRules {
    pub fn with_non_pii_keyword(mut self, keyword: impl Into<String>) -> Self {
        self.non_pii_keywords
            .push(Cow::Owned(keyword.into().to_lowercase()));
        self
    }

    pub fn with_pii_keyword(mut self, keyword: impl Into<String>) -> Self {
        self.pii_keywords
            .push(Cow::Owned(keyword.into().to_lowercase()));
        self
    }

    /// Appends a value pattern; earlier patterns keep precedence.
    pub fn with_pattern(mut self, pattern: ValuePattern) -> Self {
        self.patterns.push(pattern);
        self
    }

    pub fn detect<S: AsRef<str>>(&self, column_name: &str, sample_values: &[S]) -> Detection {
        let lower_name = column_name.to_lowercase();

        if let Some(keyword) = find_keyword(&lower_name, &self.non_pii_keywords) {
            return Detection::not_pii(
                format!("column name contains \"{keyword}\", which marks a non-personal field"),
                Confidence::High,
            );
        }

        let keyword = find_keyword(&lower_name, &self.pii_keywords);
        let hit = self.pattern_hit(sample_values);

        let detection = match (keyword, hit) {
            (Some(keyword), Some(hit)) => Detection {
                is_pii: true,
                reason: format!(
                    "column name contains \"{keyword}\" and values match the {} pattern ({}/{} samples)",
                    hit.pattern, hit.matches, hit.sampled
                ),
                confidence: Confidence::High,
            },
            (Some(keyword), None) => Detection {
                is_pii: true,
                reason: format!("column name contains \"{keyword}\""),
                confidence: Confidence::Medium,
            },
            (None, Some(hit)) => Detection {
                is_pii: true,
                reason: format!(
                    "values match the {} pattern ({}/{} samples)",
                    hit.pattern, hit.matches, hit.sampled
                ),
                confidence: Confidence::Medium,
            },
            (None, None) => Detection::not_pii(String::new(), Confidence::Low),
        };
        debug!(
            "PII check for '{column_name}': pii={} confidence={}",
            detection.is_pii, detection.confidence
        );
        detection
    }

    /// Classifies every column, sampling values from the first rows.
    pub fn report(&self, columns: &[String], rows: &[Row]) -> PiiReport {
        let sampled_rows = &rows[..rows.len().min(SAMPLE_LIMIT)];
        let columns = columns
            .iter()
            .filter_map(|column| {
                let samples = sampled_rows
                    .iter()
                    .filter_map(|row| row.get(column))
                    .collect::<Vec<_>>();
                let detection = self.detect(column, &samples);
                detection.is_pii.then(|| PiiColumn {
                    name: column.clone(),
                    reason: detection.reason,
                    suggested_action: detection.confidence.suggested_action(),
                    confidence: detection.confidence,
                })
            })
            .collect();
        PiiReport { columns }
    }

    fn pattern_hit<'a, S: AsRef<str>>(&'a self, sample_values: &[S]) -> Option<PatternHit<'a>> {
        let samples: Vec<&str> = sample_values
            .iter()
            .take(SAMPLE_LIMIT)
            .map(|value| value.as_ref())
            .filter(|value| !value.trim().is_empty())
            .collect();
        if samples.is_empty() {
            return None;
        }

        self.patterns.iter().find_map(|pattern| {
            let matches = samples.iter().filter(|value| pattern.is_match(value)).count();
            (matches * 2 > samples.len()).then(|| PatternHit {
                pattern: pattern.name.as_ref(),
                matches,
                sampled: samples.len(),
            })
        })
    }
}

fn find_keyword<'a>(lower_name: &str, keywords: &'a [Cow<'static, str>]) -> Option<&'a str> {
    keywords
        .iter()
        .map(|keyword| keyword.as_ref())
        .find(|keyword| lower_name.contains(keyword))
}

fn default_rules() -> &'static PiiRules {
    static RULES: OnceLock<PiiRules> = OnceLock::new();
    RULES.get_or_init(PiiRules::default)
}

/// Classifies a single column with the built-in rules.
pub fn detect<S: AsRef<str>>(column_name: &str, sample_values: &[S]) -> Detection {
    default_rules().detect(column_name, sample_values)
}

/// Builds a report over all columns with the built-in rules.
pub fn report(columns: &[String], rows: &[Row]) -> PiiReport {
    default_rules().report(columns, rows)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bare_name_column_is_decided_by_values_only() {
        let plain = detect("name", &["Alice", "Bob"]);
        assert!(!plain.is_pii);

        let emails = detect("name", &["a@b.com", "c@d.com", "e@f.com"]);
        assert!(emails.is_pii);
        assert_eq!(emails.confidence, Confidence::Medium);
        assert!(emails.reason.contains("3/3"));
    }

    #[test]
    fn exactly_half_matching_is_not_enough() {
        let detection = detect("notes", &["a@b.com", "plain text"]);
        assert!(!detection.is_pii);
    }

    #[test]
    fn blank_samples_are_ignored_in_the_ratio() {
        let detection = detect("contact", &["a@b.com", "", "  ", "c@d.com", "n/a"]);
        assert!(detection.is_pii);
        assert!(detection.reason.contains("2/3"));
    }

    #[test]
    fn custom_keyword_extends_the_rule_table() {
        let rules = PiiRules::default().with_pii_keyword("Nickname");
        let detection = rules.detect("nickname", &Vec::<String>::new());
        assert!(detection.is_pii);
        assert_eq!(detection.confidence, Confidence::Medium);
    }

    #[test]
    fn custom_pattern_is_consulted_after_builtins() {
        let rules = PiiRules::default()
            .with_pattern(ValuePattern::new("passport", r"^[A-Z][0-9]{8}$").unwrap());
        let detection = rules.detect("doc", &["M12345678", "K87654321"]);
        assert!(detection.is_pii);
        assert!(detection.reason.contains("passport"));
    }
}
