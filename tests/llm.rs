use std::cell::RefCell;

use sqlmate::llm::{
    ChatModel, FALLBACK_MODELS, LlmError, ModelFallback, SYSTEM_PROMPT, SqlGenerator, parse_reply,
};
use sqlmate::prompt::{RECOMMENDATION_REQUEST, recommend_questions, suggest_questions_for_schema};
use sqlmate::schema::SchemaData;

/// Replies per model; models without a reply are reported as inaccessible.
struct FakeChat {
    replies: Vec<(&'static str, Result<&'static str, LlmError>)>,
    seen: RefCell<Vec<(String, String)>>,
}

impl FakeChat {
    fn new(replies: Vec<(&'static str, Result<&'static str, LlmError>)>) -> Self {
        Self {
            replies,
            seen: RefCell::default(),
        }
    }
}

impl ChatModel for FakeChat {
    fn complete(&self, model: &str, system: &str, user: &str) -> Result<String, LlmError> {
        assert_eq!(system, SYSTEM_PROMPT);
        self.seen
            .borrow_mut()
            .push((model.to_string(), user.to_string()));
        match self.replies.iter().find(|(name, _)| *name == model) {
            Some((_, reply)) => reply.clone().map(str::to_string),
            None => Err(LlmError::AccessDenied {
                model: model.to_string(),
            }),
        }
    }
}

#[test]
fn preferred_model_answers_without_warnings() {
    let chat = FakeChat::new(vec![(
        "gpt-4o",
        Ok(r#"{"sql":"SELECT * FROM Sales","explanation":"all rows","warnings":["check totals"]}"#),
    )]);
    let generator = ModelFallback::new(chat, "gpt-4o");
    let response = generator.generate_sql("Table: Sales", "show everything").unwrap();
    assert_eq!(response.sql, "SELECT * FROM Sales");
    assert_eq!(response.warnings, vec!["check totals".to_string()]);
}

#[test]
fn user_message_carries_prompt_and_question() {
    let chat = FakeChat::new(vec![("gpt-4o-mini", Ok(r#"{"sql":"SELECT 1"}"#))]);
    let generator = ModelFallback::new(&chat, "gpt-4o-mini");
    generator.generate_sql("Table: Sales", "how many rows?").unwrap();
    let seen = chat.seen.borrow();
    assert_eq!(seen.len(), 1);
    assert_eq!(seen[0].0, "gpt-4o-mini");
    assert!(seen[0].1.starts_with("Table: Sales\n\nQuestion: how many rows?"));
}

#[test]
fn denied_models_are_tried_in_fallback_order() {
    let chat = FakeChat::new(vec![]);
    let generator = ModelFallback::new(&chat, "gpt-4");
    let err = generator.generate_sql("p", "q").unwrap_err();
    let tried = chat
        .seen
        .borrow()
        .iter()
        .map(|(model, _)| model.clone())
        .collect::<Vec<_>>();
    assert_eq!(tried, vec!["gpt-4", "gpt-4o-mini", "gpt-4-turbo"]);
    assert_eq!(
        err,
        LlmError::AccessDenied {
            model: "gpt-4-turbo".to_string()
        }
    );
}

#[test]
fn second_alternate_is_used_after_two_denials() {
    let chat = FakeChat::new(vec![("gpt-4-turbo", Ok("```sql\nSELECT 2\n```"))]);
    let generator = ModelFallback::new(chat, "my-model");
    let response = generator.generate_sql("p", "q").unwrap();
    assert_eq!(response.sql, "SELECT 2");
    assert!(response.warnings.iter().any(|w| w.contains("'my-model' was not accessible")));
    assert!(response.warnings.iter().any(|w| w.contains("expected format")));
}

#[test]
fn provider_errors_are_not_retried() {
    let chat = FakeChat::new(vec![(
        "gpt-4o-mini",
        Err(LlmError::Provider("rate limited".to_string())),
    )]);
    let generator = ModelFallback::new(chat, "gpt-4o-mini");
    let err = generator.generate_sql("p", "q").unwrap_err();
    assert_eq!(err, LlmError::Provider("rate limited".to_string()));
}

#[test]
fn empty_reply_is_an_error() {
    let chat = FakeChat::new(vec![("gpt-4o-mini", Ok("   "))]);
    let generator = ModelFallback::new(chat, "gpt-4o-mini");
    assert_eq!(generator.generate_sql("p", "q").unwrap_err(), LlmError::EmptyReply);
}

#[test]
fn fallback_list_starts_with_the_default_model() {
    assert_eq!(FALLBACK_MODELS[0], sqlmate::llm::DEFAULT_MODEL);
}

#[test]
fn envelope_inside_prose_is_found() {
    let reply = parse_reply("Sure!\n```json\n{\"sql\": \"SELECT a FROM t\", \"explanation\": \"x\"}\n```");
    assert_eq!(reply.sql, "SELECT a FROM t");
    assert_eq!(reply.explanation, "x");
    assert!(reply.warnings.is_empty());
}

#[test]
fn unparseable_reply_falls_back_to_raw_text() {
    let reply = parse_reply("I cannot answer that.");
    assert_eq!(reply.sql, "I cannot answer that.");
    assert!(!reply.warnings.is_empty());
}

fn shop_schema() -> SchemaData {
    SchemaData::parse(
        r#"{"tables":[
            {"name":"users","columns":[{"name":"id","type":"INTEGER"}]},
            {"name":"orders","columns":[{"name":"user_id","type":"INTEGER"}],
             "foreignKeys":[{"column":"user_id","references":{"table":"users","column":"id"}}]}
        ]}"#,
        false,
    )
    .expect("valid schema")
}

#[test]
fn recommendations_are_read_from_the_json_reply() {
    let chat = FakeChat::new(vec![(
        "gpt-4o-mini",
        Ok(r#"{"recommendations": [
            "How many users are there?",
            "  ",
            "Which users placed the most orders?",
            "List orders with their user id",
            "Which users have no orders?",
            "How many orders per user?",
            "What is the newest order?"
        ]}"#),
    )]);
    let generator = ModelFallback::new(&chat, "gpt-4o-mini");
    let questions = recommend_questions(&generator, &shop_schema());
    assert_eq!(
        questions,
        vec![
            "How many users are there?",
            "Which users placed the most orders?",
            "List orders with their user id",
            "Which users have no orders?",
            "How many orders per user?",
        ]
    );

    let seen = chat.seen.borrow();
    assert!(seen[0].1.contains("Table: orders"));
    assert!(seen[0].1.contains(RECOMMENDATION_REQUEST));
}

#[test]
fn recommendations_fall_back_to_listed_lines() {
    let chat = FakeChat::new(vec![(
        "gpt-4o-mini",
        Ok("Here are some ideas:\n1. How many users signed up?\n2) Which orders have no user?\n- List users with more than 3 orders\nThanks"),
    )]);
    let generator = ModelFallback::new(chat, "gpt-4o-mini");
    assert_eq!(
        recommend_questions(&generator, &shop_schema()),
        vec![
            "How many users signed up?",
            "Which orders have no user?",
            "List users with more than 3 orders",
        ]
    );
}

#[test]
fn recommendations_use_templates_when_generation_fails_or_says_nothing() {
    let schema = shop_schema();
    let templates = suggest_questions_for_schema(&schema);
    assert_eq!(templates.len(), 5);

    let failing = ModelFallback::new(
        FakeChat::new(vec![(
            "gpt-4o-mini",
            Err(LlmError::Provider("timeout".to_string())),
        )]),
        "gpt-4o-mini",
    );
    assert_eq!(recommend_questions(&failing, &schema), templates);

    let unhelpful = ModelFallback::new(
        FakeChat::new(vec![("gpt-4o-mini", Ok("I cannot help with that."))]),
        "gpt-4o-mini",
    );
    assert_eq!(recommend_questions(&unhelpful, &schema), templates);
}
