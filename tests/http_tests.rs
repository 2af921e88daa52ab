//! HTTP transport and gateway against wiremock and paced TCP servers.

use std::sync::Arc;
use std::time::Duration;

use pretty_assertions::assert_eq;
use serde_json::json;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use wiremock::matchers::{body_json, body_partial_json, header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

use threadline::config::ThreadlineConfig;
use threadline::error::ThreadlineError;
use threadline::gateway::{HttpMessageGateway, MessageGateway};
use threadline::notify::TracingNotifier;
use threadline::session::{Collaborators, Composer, SessionStatus, SubmitOutcome};
use threadline::transport::{HttpSseTransport, StreamRequest, StreamTransport};
use threadline::types::*;

fn config_for(server: &MockServer) -> ThreadlineConfig {
    ThreadlineConfig::builder()
        .base_url(server.uri())
        .csrf_token("tok-123")
        .build()
}

fn sse(records: &[serde_json::Value]) -> String {
    records
        .iter()
        .map(|r| format!("data: {r}\n\n"))
        .collect()
}

fn event_stream(body: String) -> ResponseTemplate {
    ResponseTemplate::new(200).set_body_raw(body, "text/event-stream")
}

async fn collect(transport: &HttpSseTransport, request: StreamRequest) -> Vec<StreamEvent> {
    let mut handle = transport.open(&request).await.expect("open stream");
    let mut events = Vec::new();
    while let Some(event) = handle.next_event().await {
        events.push(event);
    }
    events
}

fn stored(id: u64, role: &str, content: &str) -> serde_json::Value {
    json!({
        "id": id,
        "role": role,
        "content": content,
        "created_at": format!("2024-05-01T10:00:0{id}Z"),
    })
}

#[tokio::test]
async fn sse_transport_decodes_thread_stream() {
    let server = MockServer::start().await;
    let body = sse(&[
        json!({"type": "start"}),
        json!({"type": "content", "text": "Hel"}),
        json!({"type": "heartbeat"}),
        json!({"type": "tool_start", "tool_call_id": "c1", "function_name": "search", "arguments": "{}"}),
        json!({"type": "tool_end", "tool_call_id": "c1", "content": "3 results", "formatted_content": "<b>3</b>"}),
        json!({"type": "end"}),
    ]);
    Mock::given(method("GET"))
        .and(path("/llm/thread/stream"))
        .and(query_param("thread_id", "7"))
        .and(header("accept", "text/event-stream"))
        .and(header("x-csrf-token", "tok-123"))
        .respond_with(event_stream(body))
        .expect(1)
        .mount(&server)
        .await;

    let transport = HttpSseTransport::new(config_for(&server)).unwrap();
    let events = collect(&transport, StreamRequest::reply(ThreadId(7))).await;

    assert_eq!(
        events,
        vec![
            StreamEvent::Start,
            StreamEvent::content("Hel"),
            StreamEvent::ToolStart {
                call_id: "c1".into(),
                function_name: "search".into(),
                arguments: "{}".into(),
            },
            StreamEvent::ToolEnd {
                call_id: "c1".into(),
                content: "3 results".into(),
                formatted_content: Some("<b>3</b>".into()),
            },
            StreamEvent::End,
        ]
    );
}

#[tokio::test]
async fn interpretation_stream_sends_mode() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/llm/thread/stream"))
        .and(query_param("mode", "interpretation"))
        .respond_with(event_stream("data: [DONE]\n\n".to_string()))
        .expect(1)
        .mount(&server)
        .await;

    let transport = HttpSseTransport::new(config_for(&server)).unwrap();
    let events = collect(&transport, StreamRequest::interpretation(ThreadId(7))).await;
    assert_eq!(events, vec![StreamEvent::End]);
}

#[tokio::test]
async fn malformed_record_becomes_error_event() {
    let server = MockServer::start().await;
    let body = format!(
        "{}data: {{not json\n\n{}",
        sse(&[json!({"type": "content", "text": "a"})]),
        sse(&[json!({"type": "end"})])
    );
    Mock::given(method("GET"))
        .respond_with(event_stream(body))
        .mount(&server)
        .await;

    let transport = HttpSseTransport::new(config_for(&server)).unwrap();
    let events = collect(&transport, StreamRequest::reply(ThreadId(1))).await;

    assert_eq!(events.len(), 2);
    assert_eq!(events[0], StreamEvent::content("a"));
    assert!(matches!(&events[1], StreamEvent::Error { message } if message.contains("malformed")));
}

#[tokio::test]
async fn body_without_terminal_event_is_an_error() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(event_stream(sse(&[json!({"type": "content", "text": "cut"})])))
        .mount(&server)
        .await;

    let transport = HttpSseTransport::new(config_for(&server)).unwrap();
    let events = collect(&transport, StreamRequest::reply(ThreadId(1))).await;

    assert_eq!(events[0], StreamEvent::content("cut"));
    assert!(matches!(events.last(), Some(StreamEvent::Error { .. })));
}

#[tokio::test]
async fn stream_open_maps_http_status() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(502).set_body_string("bad gateway"))
        .mount(&server)
        .await;

    let transport = HttpSseTransport::new(config_for(&server)).unwrap();
    let err = transport
        .open(&StreamRequest::reply(ThreadId(1)))
        .await
        .unwrap_err();
    assert!(matches!(err, ThreadlineError::Api { status: 502, .. }));
    assert!(err.is_retryable());
}

#[tokio::test]
async fn gateway_posts_tool_result_shape() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/llm/thread/post_message"))
        .and(header("x-csrf-token", "tok-123"))
        .and(body_json(json!({
            "thread_id": 7,
            "role": "tool",
            "content": "3 results",
            "tool_call_id": "c1",
            "tool_function_name": "search",
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": 11,
            "role": "tool",
            "content": "3 results",
            "created_at": "2024-05-01T10:00:00Z",
            "tool_call_id": "c1",
            "tool_function_name": "search",
        })))
        .expect(1)
        .mount(&server)
        .await;

    let gateway = HttpMessageGateway::new(config_for(&server)).unwrap();
    let message = gateway
        .post_message(ThreadId(7), PostMessage::tool_result("c1", "search", "3 results"))
        .await
        .unwrap();

    assert_eq!(message.id, MessageId(11));
    assert_eq!(message.role, Role::Tool);
    assert_eq!(message.tool_function_name.as_deref(), Some("search"));
}

#[tokio::test]
async fn gateway_maps_failures() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/llm/thread/post_message"))
        .respond_with(
            ResponseTemplate::new(500).set_body_json(json!({"error": {"message": "db locked"}})),
        )
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/llm/message/vote"))
        .respond_with(ResponseTemplate::new(403).set_body_string("session expired"))
        .mount(&server)
        .await;

    let gateway = HttpMessageGateway::new(config_for(&server)).unwrap();
    let err = gateway
        .post_message(ThreadId(7), PostMessage::assistant("hi"))
        .await
        .unwrap_err();
    assert!(matches!(err, ThreadlineError::Api { status: 500, ref message } if message == "db locked"));

    let err = gateway.vote(MessageId(3), VoteValue::Up).await.unwrap_err();
    assert!(matches!(err, ThreadlineError::Authentication(_)));
}

#[tokio::test]
async fn gateway_vote_body() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/llm/message/vote"))
        .and(body_json(json!({"message_id": 5, "vote_value": -1})))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"ok": true})))
        .expect(1)
        .mount(&server)
        .await;

    let gateway = HttpMessageGateway::new(config_for(&server)).unwrap();
    gateway.vote(MessageId(5), VoteValue::Down).await.unwrap();
}

#[tokio::test]
async fn composer_round_trip_over_http() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/llm/thread/post_message"))
        .and(body_partial_json(json!({"role": "user"})))
        .respond_with(ResponseTemplate::new(200).set_body_json(stored(1, "user", "Hi")))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/llm/thread/post_message"))
        .and(body_partial_json(json!({"role": "assistant", "content": "Hello"})))
        .respond_with(ResponseTemplate::new(200).set_body_json(stored(2, "assistant", "Hello")))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/llm/thread/stream"))
        .and(query_param("thread_id", "7"))
        .respond_with(event_stream(sse(&[
            json!({"type": "start"}),
            json!({"type": "content", "text": "Hel"}),
            json!({"type": "content", "text": "lo"}),
            json!({"type": "end"}),
        ])))
        .expect(1)
        .mount(&server)
        .await;

    let config = config_for(&server);
    let collaborators = Collaborators {
        transport: Arc::new(HttpSseTransport::new(config.clone()).unwrap()),
        gateway: Arc::new(HttpMessageGateway::new(config.clone()).unwrap()),
        notifier: Arc::new(TracingNotifier),
    };
    let composer = Composer::new(ThreadId(7), config, collaborators);

    let turn = match composer.submit("Hi").await.unwrap() {
        SubmitOutcome::Started(turn) => turn,
        SubmitOutcome::AlreadyStreaming => panic!("expected a new turn"),
    };
    let report = turn.finished().await.unwrap();

    assert_eq!(report.final_status, SessionStatus::Idle);
    assert_eq!(report.persisted.len(), 1);
    assert_eq!(report.persisted[0].content, "Hello");
    let ids: Vec<_> = composer
        .entries()
        .iter()
        .filter_map(|e| e.message_id())
        .collect();
    assert_eq!(ids, vec![MessageId(1), MessageId(2)]);
}

/// Serve one chunked SSE response, pausing `gap` before each record.
async fn paced_server(records: Vec<serde_json::Value>, gap: Duration) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let (mut socket, _) = listener.accept().await.unwrap();
        let mut request = Vec::new();
        let mut buf = [0u8; 1024];
        while !request.windows(4).any(|w| w == b"\r\n\r\n") {
            let n = socket.read(&mut buf).await.unwrap();
            if n == 0 {
                return;
            }
            request.extend_from_slice(&buf[..n]);
        }
        let head = "HTTP/1.1 200 OK\r\ncontent-type: text/event-stream\r\ntransfer-encoding: chunked\r\n\r\n";
        if socket.write_all(head.as_bytes()).await.is_err() {
            return;
        }
        for record in records {
            tokio::time::sleep(gap).await;
            let data = format!("data: {record}\n\n");
            let chunk = format!("{:x}\r\n{data}\r\n", data.len());
            if socket.write_all(chunk.as_bytes()).await.is_err() {
                return;
            }
        }
        let _ = socket.write_all(b"0\r\n\r\n").await;
    });
    format!("http://{addr}")
}

#[tokio::test]
async fn slow_stream_outlives_request_timeout() {
    let mut records: Vec<_> = (0..4)
        .map(|i| json!({"type": "content", "text": format!("c{i}")}))
        .collect();
    records.push(json!({"type": "end"}));
    let base_url = paced_server(records, Duration::from_millis(500)).await;
    let config = ThreadlineConfig::builder()
        .base_url(base_url)
        .request_timeout_secs(1)
        .build();

    let transport = HttpSseTransport::new(config).unwrap();
    let events = collect(&transport, StreamRequest::reply(ThreadId(1))).await;

    assert_eq!(
        events,
        vec![
            StreamEvent::content("c0"),
            StreamEvent::content("c1"),
            StreamEvent::content("c2"),
            StreamEvent::content("c3"),
            StreamEvent::End,
        ]
    );
}

#[tokio::test]
async fn silent_stream_times_out() {
    let records = vec![json!({"type": "end"})];
    let base_url = paced_server(records, Duration::from_secs(3)).await;
    let config = ThreadlineConfig::builder()
        .base_url(base_url)
        .request_timeout_secs(1)
        .build();

    let transport = HttpSseTransport::new(config).unwrap();
    let events = collect(&transport, StreamRequest::reply(ThreadId(1))).await;

    assert_eq!(events.len(), 1);
    assert!(matches!(events[0], StreamEvent::Error { .. }));
}
