use std::net::SocketAddr;
use std::time::Duration;

use axum::{
    Router,
    extract::Json,
    http::{HeaderMap, StatusCode, header},
    response::IntoResponse,
    routing::post,
};
use flowgate_core::error::GatewayError;
use flowgate_gateway::{
    GatewayClient, GatewayRequest, GatewaySchedule, GatewayTransport, SseDecoder, SummarizeRequest,
    TriggerScheduleRequest, detect_terminal,
};
use serde_json::{Value, json};
use tokio::sync::oneshot;

async fn start_mock_gateway() -> (SocketAddr, oneshot::Sender<()>) {
    let (tx, rx) = oneshot::channel::<()>();

    let app = Router::new()
        .route("/chat/", post(mock_chat))
        .route("/chat/stream", post(mock_stream))
        .route("/chat/trigger-schedule", post(mock_trigger))
        .route("/chat/summarize", post(mock_summarize));

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        axum::serve(listener, app)
            .with_graceful_shutdown(async {
                rx.await.ok();
            })
            .await
            .unwrap();
    });

    (addr, tx)
}

async fn mock_chat(headers: HeaderMap, Json(body): Json<Value>) -> impl IntoResponse {
    let auth = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("")
        .to_string();
    let query = body["query"].as_str().unwrap_or("").to_string();
    if query == "overflow" {
        return (
            StatusCode::UNPROCESSABLE_ENTITY,
            Json(json!({"error": "context_length_exceeded: prompt is too long"})),
        );
    }
    (
        StatusCode::OK,
        Json(json!({
            "messages": [{"role": "assistant", "content": format!("{auth}|{query}")}],
            "skills": ["search"],
            "usage": {"promptTokens": 3, "completionTokens": 2, "totalTokens": 5}
        })),
    )
}

async fn mock_stream() -> impl IntoResponse {
    let body = concat!(
        "event: message\n",
        "data: {\"type\":\"text_delta\",\"delta\":\"Hel\"}\n\n",
        "data: {\"type\":\"text_delta\",\"delta\":\"lo\"}\r\n\r\n",
        "data: [DONE]\n",
        "event: done\n",
        "data: {\"messages\":[{\"role\":\"assistant\",\"content\":\"Hello\"}]}",
    );
    ([(header::CONTENT_TYPE, "text/event-stream")], body)
}

async fn mock_trigger(Json(body): Json<Value>) -> impl IntoResponse {
    let command = body["schedule"]["command"].as_str().unwrap_or("").to_string();
    Json(json!({"messages": [{"role": "assistant", "content": command}]}))
}

async fn mock_summarize() -> impl IntoResponse {
    (StatusCode::BAD_GATEWAY, "upstream exploded")
}

fn client(addr: SocketAddr) -> GatewayClient {
    GatewayClient::new(format!("http://{addr}/"), Duration::from_secs(5)).unwrap()
}

fn request(query: &str) -> GatewayRequest {
    GatewayRequest {
        query: query.into(),
        timezone: "UTC".into(),
        ..Default::default()
    }
}

#[tokio::test]
async fn chat_sends_token_verbatim_and_parses_response() {
    let (addr, shutdown) = start_mock_gateway().await;
    let resp = client(addr).chat(&request("ping"), "Bearer t0k").await.unwrap();

    assert_eq!(resp.messages[0].text_content(), "Bearer t0k|ping");
    assert_eq!(resp.skills, vec!["search".to_string()]);
    assert_eq!(resp.usage.unwrap().total_tokens, 5);
    let _ = shutdown.send(());
}

#[tokio::test]
async fn chat_error_is_typed_and_sanitized() {
    let (addr, shutdown) = start_mock_gateway().await;
    let err = client(addr).chat(&request("overflow"), "").await.unwrap_err();

    match &err {
        GatewayError::Http { status, message } => {
            assert_eq!(*status, 422);
            assert_eq!(message, "context_length_exceeded: prompt is too long");
        }
        other => panic!("unexpected error {other:?}"),
    }
    assert!(flowgate_gateway::is_context_overflow(&err));
    let _ = shutdown.send(());
}

#[tokio::test]
async fn summarize_raw_error_body() {
    let (addr, shutdown) = start_mock_gateway().await;
    let req = SummarizeRequest {
        model: Default::default(),
        messages: vec![],
    };
    let err = client(addr).summarize(&req, "").await.unwrap_err();
    assert_eq!(
        err,
        GatewayError::Http {
            status: 502,
            message: "upstream exploded".into()
        }
    );
    assert!(flowgate_gateway::is_retryable(&err));
    let _ = shutdown.send(());
}

#[tokio::test]
async fn trigger_schedule_posts_schedule() {
    let (addr, shutdown) = start_mock_gateway().await;
    let req = TriggerScheduleRequest {
        request: request(""),
        schedule: GatewaySchedule {
            id: "s1".into(),
            command: "daily report".into(),
            ..Default::default()
        },
    };
    let resp = client(addr).trigger_schedule(&req, "").await.unwrap();
    assert_eq!(resp.messages[0].text_content(), "daily report");
    let _ = shutdown.send(());
}

#[tokio::test]
async fn stream_yields_lines_and_terminal() {
    let (addr, shutdown) = start_mock_gateway().await;
    let mut lines = client(addr).open_stream(&request("hi"), "").await.unwrap();

    let mut decoder = SseDecoder::new();
    let mut payloads = Vec::new();
    while let Some(line) = lines.recv().await {
        if let Some(frame) = decoder.decode(&line.unwrap()) {
            payloads.push(frame);
        }
    }

    assert_eq!(payloads.len(), 3);
    assert_eq!(payloads[0].event, "message");
    let last = payloads.last().unwrap();
    let terminal = detect_terminal(&last.event, &last.data).unwrap();
    assert_eq!(terminal.messages[0].text_content(), "Hello");
    let _ = shutdown.send(());
}

#[tokio::test]
async fn connection_refused_is_network_error() {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let err = client(addr).chat(&request("x"), "").await.unwrap_err();
    assert!(matches!(err, GatewayError::Network(_)));
}
