//! End-to-end exchange tests.
//!
//! Each test drives a store through the stream driver with recorded backend
//! event streams, the way the chat view does during a session.

use tokio::sync::mpsc;

use docchat_chat::{
    ChatError, ConversationPayload, ConversationStore, ExchangeOutcome, StreamDriver,
    TransportEvent,
};
use docchat_core::config::{AnswerMode, DocchatConfig, MatchMode};
use docchat_core::types::{DocumentRef, Role, TurnStatus};

// =============================================================================
// Helpers
// =============================================================================

/// A config with a greeting and substring exclusion of internal documents.
fn make_config() -> DocchatConfig {
    let mut config = DocchatConfig::default();
    config.chat.prologue = Some("Hi! I'm your assistant, what can I do for you?".to_string());
    config.references.excluded_doc_names = vec!["who-are-you".to_string()];
    config.references.match_mode = MatchMode::Substring;
    config
}

/// Encode one answer frame as a stream event.
fn answer_event(id: &str, answer: &str, reference: serde_json::Value) -> String {
    let frame = serde_json::json!({
        "retcode": 0,
        "retmsg": "",
        "data": {"answer": answer, "reference": reference, "id": id}
    });
    format!("data:{}\n\n", frame)
}

fn end_event() -> String {
    "data:{\"retcode\":0,\"retmsg\":\"\",\"data\":true}\n\n".to_string()
}

/// Queue the given events on a fresh channel and close it.
async fn transport(events: Vec<TransportEvent>) -> mpsc::Receiver<TransportEvent> {
    let (tx, rx) = mpsc::channel(events.len().max(1));
    for event in events {
        tx.send(event).await.unwrap();
    }
    rx
}

fn chunk(text: impl Into<String>) -> TransportEvent {
    TransportEvent::Chunk(text.into())
}

// =============================================================================
// Tests
// =============================================================================

#[tokio::test]
async fn test_two_exchanges_keep_order_and_references() {
    let config = make_config();
    let mut store = ConversationStore::from_config(&config.chat);
    let mut driver = StreamDriver::from_config(&config);
    assert_eq!(store.visible_prompts(&config.chat.predefined_prompts).len(), 4);

    let reference = serde_json::json!({
        "doc_aggs": [{"doc_id": "d1", "doc_name": "Handbook.pdf"}],
        "chunks": [
            {"doc_id": "d1", "docnm_kwd": "Handbook.pdf", "content_with_weight": "..."},
            {"doc_id": "d9", "docnm_kwd": "who-are-you.md"},
            {"doc_id": "d2", "doc_name": "Policies.docx"}
        ]
    });
    let rx = transport(vec![
        chunk(answer_event("a1", "Onboarding", serde_json::json!({}))),
        chunk(answer_event("a1", "Onboarding takes a week.", reference)),
        chunk(end_event()),
    ])
    .await;
    let outcome = driver
        .drive(&mut store, "How long is onboarding?", vec![], rx)
        .await
        .unwrap();
    assert_eq!(
        outcome,
        ExchangeOutcome::Completed {
            turn_id: "a1".into(),
            references: vec![
                DocumentRef::new("d1", "Handbook.pdf"),
                DocumentRef::new("d2", "Policies.docx"),
            ],
        }
    );
    assert!(store.visible_prompts(&config.chat.predefined_prompts).is_empty());

    let rx = transport(vec![
        chunk(answer_event("a2", "Ask HR.", serde_json::json!([]))),
        chunk(end_event()),
    ])
    .await;
    driver
        .drive(&mut store, "Who do I ask?", vec!["upload-1".to_string()], rx)
        .await
        .unwrap();

    let roles: Vec<Role> = store.snapshot().iter().map(|t| t.role).collect();
    assert_eq!(
        roles,
        vec![
            Role::Assistant,
            Role::User,
            Role::Assistant,
            Role::User,
            Role::Assistant
        ]
    );
    assert_eq!(store.snapshot()[3].document_ids, vec!["upload-1"]);
    assert_eq!(store.snapshot()[4].content, "Ask HR.");
    assert!(store.snapshot()[4].references.is_empty());
    assert!(store.snapshot().iter().all(|t| t.status == TurnStatus::Complete));
}

#[tokio::test]
async fn test_failure_before_content_restores_previous_state() {
    let config = make_config();
    let mut store = ConversationStore::from_config(&config.chat);
    let mut driver = StreamDriver::from_config(&config);
    let before = store.snapshot().to_vec();

    let rx = transport(vec![TransportEvent::Failed("connection refused".to_string())]).await;
    let outcome = driver.drive(&mut store, "Hello?", vec![], rx).await.unwrap();

    assert!(matches!(outcome, ExchangeOutcome::RolledBack { .. }));
    assert_eq!(store.snapshot(), before.as_slice());
    assert!(!driver.is_active());
}

#[tokio::test]
async fn test_failure_mid_stream_keeps_annotated_partial_answer() {
    let config = make_config();
    let mut store = ConversationStore::new(config.chat.max_message_length);
    let mut driver = StreamDriver::from_config(&config);

    let rx = transport(vec![
        chunk(answer_event("a1", "The policy says", serde_json::json!({}))),
        TransportEvent::Failed("stream reset".to_string()),
    ])
    .await;
    let outcome = driver.drive(&mut store, "Policy?", vec![], rx).await.unwrap();

    let reason = format!("{}: stream reset", config.chat.error_marker);
    assert_eq!(
        outcome,
        ExchangeOutcome::Partial {
            turn_id: "a1".into(),
            reason: reason.clone(),
        }
    );
    let answer = &store.snapshot()[1];
    assert_eq!(answer.content, "The policy says");
    assert_eq!(answer.status, TurnStatus::Failed { reason });

    // The conversation can continue after a partial answer.
    let rx = transport(vec![chunk(answer_event("a2", "Retry worked.", serde_json::json!({})))]).await;
    driver.drive(&mut store, "Again?", vec![], rx).await.unwrap();
    assert_eq!(store.len(), 4);
}

#[tokio::test]
async fn test_backend_error_frame_rolls_back() {
    let config = make_config();
    let mut store = ConversationStore::new(config.chat.max_message_length);
    let mut driver = StreamDriver::from_config(&config);

    let error = "data:{\"retcode\":1,\"retmsg\":\"An error occurred\",\"data\":{\"answer\":\"\",\"reference\":[],\"id\":\"r\"}}\n\n";
    let rx = transport(vec![chunk(error)]).await;
    let outcome = driver.drive(&mut store, "Q", vec![], rx).await.unwrap();

    match outcome {
        ExchangeOutcome::RolledBack { reason } => assert!(reason.contains("An error occurred")),
        other => panic!("expected rollback, got {:?}", other),
    }
    assert!(store.is_empty());
}

#[tokio::test]
async fn test_unparsable_events_are_ignored() {
    let config = make_config();
    let mut store = ConversationStore::new(config.chat.max_message_length);
    let mut driver = StreamDriver::from_config(&config);

    let rx = transport(vec![
        chunk("data:{broken\n\n"),
        chunk(answer_event("a1", "Fine.", serde_json::json!({}))),
    ])
    .await;
    let outcome = driver.drive(&mut store, "Q", vec![], rx).await.unwrap();
    assert!(matches!(outcome, ExchangeOutcome::Completed { .. }));
    assert_eq!(store.snapshot()[1].content, "Fine.");
}

#[tokio::test]
async fn test_delta_mode_stream() {
    let mut config = make_config();
    config.stream.answer_mode = AnswerMode::Delta;
    let mut store = ConversationStore::new(config.chat.max_message_length);
    let mut driver = StreamDriver::from_config(&config);

    let rx = transport(vec![
        chunk(answer_event("a1", "a", serde_json::json!({}))),
        chunk(answer_event("a1", "b", serde_json::json!({}))),
    ])
    .await;
    driver.drive(&mut store, "Q", vec![], rx).await.unwrap();
    assert_eq!(store.snapshot()[1].content, "ab");
}

#[tokio::test]
async fn test_rejected_message_leaves_store_untouched() {
    let config = make_config();
    let mut store = ConversationStore::from_config(&config.chat);
    let mut driver = StreamDriver::from_config(&config);

    let rx = transport(vec![]).await;
    let err = driver.drive(&mut store, " \n ", vec![], rx).await.unwrap_err();
    assert!(matches!(err, ChatError::InvalidInput));
    assert_eq!(store.len(), 1);
    assert!(!driver.is_active());
}

#[test]
fn test_hydrate_then_continue() {
    let config = make_config();
    let payload: ConversationPayload = serde_json::from_str(
        r#"{
            "id": "conv-1",
            "message": [
                {"role": "assistant", "content": "Hi!"},
                {"id": "u1", "role": "user", "content": "Q1"},
                {"id": "a1", "role": "assistant", "content": "A1"}
            ],
            "reference": [{"doc_aggs": [{"doc_id": "d1", "doc_name": "A.pdf"}]}]
        }"#,
    )
    .unwrap();

    let mut driver = StreamDriver::from_config(&config);
    let mut store =
        ConversationStore::from_payload(&payload, driver.resolver(), config.chat.max_message_length)
            .unwrap();
    assert_eq!(
        store.snapshot()[2].references,
        vec![DocumentRef::new("d1", "A.pdf")]
    );

    driver.start(&mut store, "Q2", vec![]).unwrap();
    driver
        .handle_text(&mut store, &answer_event("a2", "Partial", serde_json::json!({})))
        .unwrap();
    // A reused server id is a sequencing bug; the exchange is abandoned.
    let err = driver
        .handle_text(&mut store, &answer_event("a1", "Partial answer", serde_json::json!({})))
        .unwrap_err();
    assert!(err.is_programmer_error());
    let outcome = driver.abort(&mut store).unwrap();
    assert!(matches!(outcome, ExchangeOutcome::Partial { .. }));
    assert_eq!(store.len(), 5);
    assert_eq!(store.snapshot()[4].content, "Partial");
    assert!(store.snapshot()[4].is_failed());
}
