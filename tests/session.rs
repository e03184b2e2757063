mod support;

use ollama_connect::models::{Provider, Role};
use ollama_connect::{Controller, Database, Session};
use serde_json::json;
use std::sync::Arc;
use support::{config_for, MockResponse, MockServer};

async fn echo_server() -> MockServer {
    MockServer::start(|request| {
        let body = request.json();
        if request.path == "/api/generate" {
            return MockResponse::streamed(["{\"response\":\"streamed \"}\n", "{\"response\":\"answer\"}\n"]);
        }
        let turns = body["messages"].as_array().map(Vec::len).unwrap_or_default();
        MockResponse::json(200, json!({"message": {"role": "assistant", "content": format!("reply to {} turns", turns)}}))
    })
    .await
}

#[tokio::test]
async fn chat_rounds_carry_full_history() {
    let server = echo_server().await;
    let controller = Controller::from_config(&config_for(&server.base_url), None).expect("controller");

    let session = controller.send_message(Session::default(), "llama3.2", "one").await;
    let session = controller.send_message(session, "llama3.2", "two").await;

    let contents: Vec<&str> = session.history("llama3.2").iter().map(|turn| turn.content.as_str()).collect();
    assert_eq!(contents, vec!["one", "reply to 1 turns", "two", "reply to 3 turns"]);
    assert!(session.history("llama3.2")[3].elapsed_secs.is_some());
}

#[tokio::test]
async fn streamed_round_is_recorded_after_exhaustion() {
    let server = echo_server().await;
    let controller = Controller::from_config(&config_for(&server.base_url), None).expect("controller");

    let mut fragments = Vec::new();
    let session = controller
        .stream_message(Session::default(), "llama3.2", "hello", |fragment| fragments.push(fragment.to_string()))
        .await;

    assert_eq!(fragments, vec!["streamed ", "answer"]);
    let history = session.history("llama3.2");
    assert_eq!(history[0].role, Role::User);
    assert_eq!(history[1].content, "streamed answer");
}

#[tokio::test]
async fn saved_thread_survives_reopening_the_store() {
    let server = echo_server().await;
    let dir = tempfile::tempdir().expect("tempdir");
    let db_path = dir.path().join("conversations.db");
    let config = config_for(&server.base_url);

    let conversation_id = {
        let store = Arc::new(Database::open(&db_path).expect("db"));
        let controller = Controller::from_config(&config, Some(store.clone())).expect("controller");
        let session = controller
            .send_message(Session::default(), "llama3.2", "Plan a weekend in Lisbon\nwith kids")
            .await;
        let (session, saved) = controller.save_thread(session, "llama3.2");
        let conversation_id = saved.expect("save");

        let session = controller.send_message(session, "llama3.2", "Add a rainy-day option").await;
        let (_, saved) = controller.save_thread(session, "llama3.2");
        assert_eq!(saved.expect("save again"), conversation_id);
        conversation_id
    };

    let store = Arc::new(Database::open(&db_path).expect("reopen"));
    let conversation = store.get_conversation(&conversation_id).expect("stored");
    assert_eq!(conversation.title, "Plan a weekend in Lisbon");
    assert_eq!(conversation.provider, Provider::Local);
    assert_eq!(store.count_messages(&conversation_id), 4);

    let controller = Controller::from_config(&config, Some(store)).expect("controller");
    let (session, loaded) = controller.load_conversation(Session::new(Provider::Gemini), &conversation_id);
    loaded.expect("load");
    assert_eq!(session.provider, Provider::Local);
    assert_eq!(session.history("llama3.2").len(), 4);
    assert_eq!(session.history("llama3.2")[2].content, "Add a rainy-day option");
}
