use sqlmate::model::{RedactionAction, Row};
use sqlmate::pii::{Confidence, detect, report};

#[test]
fn email_keyword_and_values_is_high_confidence() {
    let detection = detect("email", &["a@b.com", "c@d.com"]);
    assert!(detection.is_pii);
    assert_eq!(detection.confidence, Confidence::High);
    assert!(detection.reason.contains("email"));
    assert!(detection.reason.contains("2/2"));
}

#[test]
fn non_pii_keyword_wins_over_everything() {
    let detection = detect("product_name", &["a@b.com", "c@d.com"]);
    assert!(!detection.is_pii);
    assert_eq!(detection.confidence, Confidence::High);
}

#[test]
fn keyword_without_matching_values_is_medium() {
    let detection = detect("Customer_Name", &["Kim", "Lee"]);
    assert!(detection.is_pii);
    assert_eq!(detection.confidence, Confidence::Medium);
}

#[test]
fn values_without_keyword_are_medium() {
    let detection = detect("contact", &["010-1234-5678", "010-9876-5432", "unknown"]);
    assert!(detection.is_pii);
    assert_eq!(detection.confidence, Confidence::Medium);
    assert!(detection.reason.contains("phone"));
}

#[test]
fn korean_keywords_are_recognized() {
    assert!(detect("고객 이메일", &Vec::<String>::new()).is_pii);
    assert!(!detect("상품명", &["a@b.com"]).is_pii);
}

#[test]
fn unrelated_column_is_low_confidence_not_pii() {
    let detection = detect("quantity", &["1", "2", "3"]);
    assert!(!detection.is_pii);
    assert_eq!(detection.confidence, Confidence::Low);
}

#[test]
fn only_the_first_twenty_values_are_sampled() {
    let mut values = vec!["plain"; 20];
    values.extend(vec!["a@b.com"; 30]);
    assert!(!detect("notes", &values).is_pii);
}

#[test]
fn report_lists_flagged_columns_with_suggestions() {
    let headers = ["name", "email", "phone", "amount"].map(str::to_string).to_vec();
    let rows = (0..5)
        .map(|i| {
            Row::from_pairs([
                ("name", format!("Person {i}")),
                ("email", format!("p{i}@example.com")),
                ("phone", "n/a".to_string()),
                ("amount", (i * 10).to_string()),
            ])
        })
        .collect::<Vec<_>>();
    let report = report(&headers, &rows);

    assert_eq!(report.column_names().collect::<Vec<_>>(), vec!["email", "phone"]);
    let email = report.get("email").unwrap();
    assert_eq!(email.confidence, Confidence::High);
    assert_eq!(email.suggested_action, RedactionAction::Drop);
    let phone = report.get("phone").unwrap();
    assert_eq!(phone.confidence, Confidence::Medium);
    assert_eq!(phone.suggested_action, RedactionAction::Mask);
}

#[test]
fn report_round_trips_through_json() {
    let headers = vec!["email".to_string()];
    let rows = vec![Row::from_pairs([("email", "x@y.io")])];
    let report = report(&headers, &rows);
    let json = serde_json::to_string(&report).unwrap();
    assert!(json.contains("\"confidence\":\"high\""));
    assert!(json.contains("\"suggested_action\":\"drop\""));
    let back: sqlmate::pii::PiiReport = serde_json::from_str(&json).unwrap();
    assert_eq!(back, report);
}
