//! End-to-end: real WebSocket server and client, a fake OpenAI-compatible
//! model speaking SSE over a raw TCP socket, and an in-memory threat store.

use futures_util::{SinkExt, StreamExt};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use threat_chat_client::{connect, Message, SendMessageRequest};
use threat_chat_server::{
    serve, ChatHandler, ConnectionRegistry, ContextRetriever, HandlerSettings, KeywordIndex,
    MemoryStore, OpenAiCompatibleClient, ServerState, ThreatItem, ThreatStore,
};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::tungstenite::Message as WsMessage;

#[derive(Debug, Clone)]
struct Captured {
    head: String,
    body: serde_json::Value,
}

struct FakeModel {
    base_url: String,
    requests: Arc<Mutex<Vec<Captured>>>,
}

async fn read_request(sock: &mut TcpStream) -> Option<Captured> {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 4096];
    let head_end = loop {
        let n = sock.read(&mut chunk).await.ok()?;
        if n == 0 {
            return None;
        }
        buf.extend_from_slice(&chunk[..n]);
        if let Some(pos) = buf.windows(4).position(|w| w == b"\r\n\r\n") {
            break pos;
        }
    };
    let head = String::from_utf8_lossy(&buf[..head_end]).to_string();
    let len = head
        .lines()
        .filter_map(|l| l.split_once(':'))
        .find(|(k, _)| k.trim().eq_ignore_ascii_case("content-length"))
        .and_then(|(_, v)| v.trim().parse::<usize>().ok())
        .unwrap_or(0);
    let body_start = head_end + 4;
    while buf.len() < body_start + len {
        let n = sock.read(&mut chunk).await.ok()?;
        if n == 0 {
            break;
        }
        buf.extend_from_slice(&chunk[..n]);
    }
    let end = buf.len().min(body_start + len);
    let body = serde_json::from_slice(&buf[body_start..end]).unwrap_or(serde_json::Value::Null);
    Some(Captured { head, body })
}

/// Answer every request with `status` and `body`, then close the socket.
async fn spawn_fake_model(status: &'static str, body: String) -> FakeModel {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let requests = Arc::new(Mutex::new(Vec::new()));
    let seen = requests.clone();
    tokio::spawn(async move {
        while let Ok((mut sock, _)) = listener.accept().await {
            if let Some(req) = read_request(&mut sock).await {
                seen.lock().unwrap().push(req);
            }
            let response = format!(
                "HTTP/1.1 {}\r\nContent-Type: text/event-stream\r\nConnection: close\r\n\r\n{}",
                status, body
            );
            let _ = sock.write_all(response.as_bytes()).await;
            let _ = sock.shutdown().await;
        }
    });
    FakeModel {
        base_url: format!("http://127.0.0.1:{}/v1", port),
        requests,
    }
}

/// Accepts requests and never answers.
async fn spawn_silent_model() -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    tokio::spawn(async move {
        let mut held = Vec::new();
        while let Ok((sock, _)) = listener.accept().await {
            held.push(sock);
        }
    });
    format!("http://127.0.0.1:{}/v1", port)
}

fn sse(parts: &[&str]) -> String {
    let mut out = String::new();
    for p in parts {
        let frame = serde_json::json!({
            "id": "chatcmpl-1",
            "model": "deepseek-chat",
            "choices": [{"index": 0, "delta": {"content": p}, "finish_reason": null}]
        });
        out.push_str(&format!("data: {}\n\n", frame));
    }
    out.push_str("data: [DONE]\n\n");
    out
}

async fn start_server(base_url: &str, store: Arc<dyn ThreatStore>, timeout: Duration) -> String {
    let index = Arc::new(KeywordIndex::threat_terms().unwrap());
    let backend = Arc::new(OpenAiCompatibleClient::new(base_url, Some("test-key".into())).unwrap());
    let registry = Arc::new(ConnectionRegistry::new());
    let settings = HandlerSettings {
        base_prompt: "You are a security analyst.".into(),
        ..HandlerSettings::default()
    };
    let handler = ChatHandler::new(
        ContextRetriever::new(index, store),
        backend,
        registry.clone(),
        settings,
    );
    let state = Arc::new(ServerState {
        handler: Arc::new(handler),
        registry,
        invocation_timeout: timeout,
    });

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    tokio::spawn(async move {
        let _ = serve(listener, state).await;
    });
    format!("ws://127.0.0.1:{}", port)
}

fn threat_store() -> Arc<dyn ThreatStore> {
    Arc::new(MemoryStore::new(vec![
        ThreatItem::new("LockBit affiliates exploit exposed RDP.")
            .with_category("malware", ["ransomware"]),
        ThreatItem::new("Credential harvesting via fake invoices.")
            .with_category("vector", ["phishing"]),
    ]))
}

#[tokio::test]
async fn streams_augmented_reply_end_to_end() {
    let model = spawn_fake_model("200 OK", sse(&["Ransomware ", "encrypts ", "files."])).await;
    let url = start_server(&model.base_url, threat_store(), Duration::from_secs(10)).await;

    let mut client = connect(&url).await.expect("connect");
    let request = SendMessageRequest::new(vec![
        Message::user("How does ransomware spread?"),
        Message::assistant(""),
    ]);
    let reply = client.collect_reply(&request).await.expect("reply");

    assert_eq!(reply.text, "Ransomware encrypts files.");
    assert!(reply.error.is_none());

    let requests = model.requests.lock().unwrap();
    assert_eq!(requests.len(), 1);
    let req = &requests[0];
    assert!(req.head.starts_with("POST /v1/chat/completions"));
    assert!(req
        .head
        .lines()
        .any(|l| l.eq_ignore_ascii_case("authorization: Bearer test-key")));
    assert_eq!(req.body["stream"], true);
    assert_eq!(req.body["max_tokens"], 4096);

    let messages = req.body["messages"].as_array().unwrap();
    assert_eq!(messages.len(), 2);
    assert_eq!(messages[0]["role"], "system");
    let system = messages[0]["content"].as_str().unwrap();
    assert!(system.starts_with("You are a security analyst."));
    assert!(system.contains("1. LockBit affiliates exploit exposed RDP."));
    assert!(!system.contains("fake invoices"));
    assert_eq!(messages[1]["content"], "How does ransomware spread?");
}

#[tokio::test]
async fn missing_messages_gets_400_and_no_model_call() {
    let model = spawn_fake_model("200 OK", sse(&["never"])).await;
    let url = start_server(&model.base_url, threat_store(), Duration::from_secs(10)).await;

    let mut client = connect(&url).await.unwrap();
    let reply = client
        .collect_reply(&SendMessageRequest::default())
        .await
        .unwrap();

    assert_eq!(reply.text, "");
    assert_eq!(reply.error.as_deref(), Some("Messages are required"));
    assert!(model.requests.lock().unwrap().is_empty());
}

#[tokio::test]
async fn model_rejection_gets_500_error_frame() {
    let model = spawn_fake_model(
        "401 Unauthorized",
        r#"{"error":{"message":"bad key"}}"#.to_string(),
    )
    .await;
    let url = start_server(&model.base_url, threat_store(), Duration::from_secs(10)).await;

    let (ws, _) = tokio_tungstenite::connect_async(url.as_str()).await.unwrap();
    let (mut write, mut read) = ws.split();
    let request = serde_json::json!({"action": "sendMessage", "messages": [{"role": "user", "content": "hi"}]});
    write.send(WsMessage::Text(request.to_string())).await.unwrap();

    let mut frames = Vec::new();
    let mut closed = false;
    while let Some(Ok(msg)) = read.next().await {
        match msg {
            WsMessage::Text(t) => frames.push(serde_json::from_str::<serde_json::Value>(&t).unwrap()),
            WsMessage::Close(_) => {
                closed = true;
                break;
            }
            _ => {}
        }
    }
    assert!(closed);
    assert_eq!(frames.len(), 1);
    assert_eq!(frames[0]["error"]["status"], 500);
    assert!(frames[0]["error"]["message"].as_str().unwrap().contains("bad key"));
}

#[tokio::test]
async fn unparseable_frame_gets_400_and_close() {
    let model = spawn_fake_model("200 OK", sse(&[])).await;
    let url = start_server(&model.base_url, threat_store(), Duration::from_secs(10)).await;

    let (mut ws, _) = tokio_tungstenite::connect_async(url.as_str()).await.unwrap();
    ws.send(WsMessage::Text(r#"{"action":"dance"}"#.into()))
        .await
        .unwrap();

    let first = ws.next().await.unwrap().unwrap();
    let value: serde_json::Value = match first {
        WsMessage::Text(t) => serde_json::from_str(&t).unwrap(),
        other => panic!("expected error frame, got {:?}", other),
    };
    assert_eq!(value["error"]["status"], 400);
    assert!(matches!(ws.next().await, Some(Ok(WsMessage::Close(_)))));
}

#[tokio::test]
async fn store_failure_still_streams_reply() {
    let model = spawn_fake_model("200 OK", sse(&["Still here."])).await;
    let url = start_server(
        &model.base_url,
        Arc::new(MemoryStore::failing()),
        Duration::from_secs(10),
    )
    .await;

    let mut client = connect(&url).await.unwrap();
    let reply = client
        .collect_reply(&SendMessageRequest::new(vec![Message::user("ransomware?")]))
        .await
        .unwrap();
    assert_eq!(reply.text, "Still here.");

    let requests = model.requests.lock().unwrap();
    assert_eq!(
        requests[0].body["messages"][0]["content"],
        "You are a security analyst."
    );
}

#[tokio::test]
async fn invocation_timeout_closes_connection() {
    let base_url = spawn_silent_model().await;
    let url = start_server(&base_url, threat_store(), Duration::from_millis(300)).await;

    let mut client = connect(&url).await.unwrap();
    let reply = tokio::time::timeout(
        Duration::from_secs(10),
        client.collect_reply(&SendMessageRequest::new(vec![Message::user("hi")])),
    )
    .await
    .expect("server should close after the invocation timeout")
    .unwrap();
    assert_eq!(reply.text, "");
    assert!(reply.error.is_none());
}

#[tokio::test]
async fn model_error_before_any_text_gets_500_error_frame() {
    let model = spawn_fake_model(
        "200 OK",
        "data: {\"error\":{\"message\":\"Rate limit exceeded\"}}\n\n".to_string(),
    )
    .await;
    let url = start_server(&model.base_url, threat_store(), Duration::from_secs(10)).await;

    let mut client = connect(&url).await.unwrap();
    let reply = client
        .collect_reply(&SendMessageRequest::new(vec![Message::user("hi")]))
        .await
        .unwrap();

    assert_eq!(reply.text, "");
    let error = reply.error.expect("error frame expected");
    assert!(error.contains("Rate limit exceeded"));
}
