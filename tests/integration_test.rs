//! Integration tests for the HTTP gateway
//!
//! These tests run the full router against an in-memory store and a mock
//! upstream provider, so they need neither an API key nor a database.

use axum::body::Body;
use axum::http::{header, Method, Request, StatusCode};
use axum::Router;
use chat_relay::config::UpstreamConfig;
use chat_relay::storage::ConversationStore;
use chat_relay::{api, Gateway, InMemoryStore, LLMClient};
use serde_json::{json, Value};
use std::sync::Arc;
use tower::ServiceExt;
use uuid::Uuid;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn upstream_config(base_url: &str) -> UpstreamConfig {
    UpstreamConfig {
        api_key: "sk-test".to_string(),
        proxy_url: None,
        base_url: base_url.to_string(),
        model: "gpt-4o".to_string(),
        temperature: 0.7,
        max_tokens: None,
        system_prompt: None,
        timeout_ms: 2000,
        max_retries: 2,
        base_delay_ms: 1,
        max_delay_ms: 5,
        max_elapsed_ms: 5000,
    }
}

fn app(mock_server: &MockServer) -> (Router, InMemoryStore) {
    let store = InMemoryStore::new();
    let client = LLMClient::new(&upstream_config(&mock_server.uri())).unwrap();
    let gateway = Gateway::new(Arc::new(store.clone()), Arc::new(client));
    (api::router(gateway), store)
}

fn completion(content: &str) -> ResponseTemplate {
    ResponseTemplate::new(200).set_body_json(json!({
        "choices": [{"message": {"role": "assistant", "content": content}}]
    }))
}

async fn send(app: &Router, request: Request<Body>) -> (StatusCode, Value) {
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let json = serde_json::from_slice(&body).unwrap_or(Value::Null);
    (status, json)
}

fn post_json(uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method(Method::POST)
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

fn get(uri: &str) -> Request<Body> {
    Request::builder()
        .method(Method::GET)
        .uri(uri)
        .body(Body::empty())
        .unwrap()
}

#[tokio::test]
async fn test_chat_creates_conversation_and_history() {
    let mock_server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(completion("hello"))
        .expect(1)
        .mount(&mock_server)
        .await;
    let (app, _store) = app(&mock_server);

    let (status, body) = send(&app, post_json("/v1/chat", json!({"role": "user", "content": "hi"}))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["reply"], "hello");
    assert_eq!(body["position"], 2);

    let conversation_id = body["conversation_id"].as_str().unwrap().to_string();
    let (status, history) = send(&app, get(&format!("/v1/conversations/{}/messages", conversation_id))).await;
    assert_eq!(status, StatusCode::OK);

    let messages = history["messages"].as_array().unwrap();
    assert_eq!(messages.len(), 2);
    assert_eq!(messages[0]["role"], "user");
    assert_eq!(messages[0]["content"], "hi");
    assert_eq!(messages[0]["position"], 1);
    assert_eq!(messages[1]["role"], "assistant");
    assert_eq!(messages[1]["content"], "hello");
    assert_eq!(messages[1]["position"], 2);
}

#[tokio::test]
async fn test_chat_continues_existing_conversation() {
    let mock_server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(completion("sure"))
        .expect(2)
        .mount(&mock_server)
        .await;
    let (app, _store) = app(&mock_server);

    let (_, first) = send(&app, post_json("/v1/chat", json!({"content": "hi"}))).await;
    let conversation_id = first["conversation_id"].clone();

    let (status, second) = send(
        &app,
        post_json(
            "/v1/chat",
            json!({"conversation_id": conversation_id, "role": "user", "content": "again"}),
        ),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(second["conversation_id"], conversation_id);
    assert_eq!(second["position"], 4);
}

#[tokio::test]
async fn test_unknown_conversation_is_404() {
    let mock_server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(completion("unused"))
        .expect(0)
        .mount(&mock_server)
        .await;
    let (app, _store) = app(&mock_server);

    let (status, body) = send(
        &app,
        post_json(
            "/v1/chat",
            json!({"conversation_id": Uuid::new_v4(), "content": "hi"}),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"]["kind"], "not_found");

    let (status, _) = send(&app, get(&format!("/v1/conversations/{}/messages", Uuid::new_v4()))).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_malformed_requests_are_400() {
    let mock_server = MockServer::start().await;
    let (app, _store) = app(&mock_server);

    let request = Request::builder()
        .method(Method::POST)
        .uri("/v1/chat")
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from("{not json"))
        .unwrap();
    let (status, body) = send(&app, request).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["kind"], "validation");

    let (status, body) = send(&app, post_json("/v1/chat", json!({"role": "assistant", "content": "hi"}))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["kind"], "validation");

    let (status, _) = send(&app, post_json("/v1/chat", json!({"content": ""}))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = send(&app, get("/v1/conversations/not-a-uuid/messages")).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_upstream_rejection_is_502_and_keeps_user_message() {
    let mock_server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(401).set_body_string("invalid api key"))
        .expect(1)
        .mount(&mock_server)
        .await;
    let (app, store) = app(&mock_server);
    let conversation_id = store.create_conversation().await.unwrap();

    let (status, body) = send(
        &app,
        post_json(
            "/v1/chat",
            json!({"conversation_id": conversation_id, "content": "hi"}),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_GATEWAY);
    assert_eq!(body["error"]["kind"], "upstream");

    let history = store.load_history(conversation_id).await.unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].content, "hi");
}

#[tokio::test]
async fn test_exhausted_upstream_is_503() {
    let mock_server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(500))
        .expect(3)
        .mount(&mock_server)
        .await;
    let (app, store) = app(&mock_server);
    let conversation_id = store.create_conversation().await.unwrap();

    let (status, body) = send(
        &app,
        post_json(
            "/v1/chat",
            json!({"conversation_id": conversation_id, "content": "hi"}),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body["error"]["kind"], "upstream");

    let history = store.load_history(conversation_id).await.unwrap();
    assert_eq!(history.len(), 1);
}

#[tokio::test]
async fn test_reused_message_id_is_409() {
    let mock_server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(completion("ok"))
        .expect(1)
        .mount(&mock_server)
        .await;
    let (app, _store) = app(&mock_server);
    let message_id = Uuid::new_v4();

    let (status, first) = send(
        &app,
        post_json("/v1/chat", json!({"content": "hi", "message_id": message_id})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let (status, body) = send(
        &app,
        post_json(
            "/v1/chat",
            json!({
                "conversation_id": first["conversation_id"],
                "content": "hi again",
                "message_id": message_id
            }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["error"]["kind"], "conflict");
}

#[tokio::test]
async fn test_get_message_creates_dialog_implicitly() {
    let mock_server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(completion("privet"))
        .expect(1)
        .mount(&mock_server)
        .await;
    let (app, store) = app(&mock_server);
    let dialog_id = Uuid::new_v4();

    let (status, body) = send(
        &app,
        post_json(
            "/get_message",
            json!({"dialog_id": dialog_id, "last_msg_text": "hello"}),
        ),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["new_msg_text"], "privet");
    assert_eq!(body["dialog_id"], dialog_id.to_string());
    assert_eq!(store.load_history(dialog_id).await.unwrap().len(), 2);
}

#[tokio::test]
async fn test_health() {
    let mock_server = MockServer::start().await;
    let (app, _store) = app(&mock_server);

    let (status, body) = send(&app, get("/health")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
}
