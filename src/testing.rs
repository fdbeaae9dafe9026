//! Helpers shared by the unit tests: an in-process submission channel
//! server, a scripted judge API and a recording channel listener.

use crate::{
    api::JudgeApi,
    channel::ChannelListener,
    errors::{ChannelError, HistoryError, SubmitError},
    history::SubmissionHistoryItem,
    message::{
        submit::{SubmitPayload, SubmitResponse},
        update::SubmissionUpdate,
    },
    verdict::SubmissionStatus,
};
use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use serde_json::json;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, oneshot};
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::WebSocketStream;

const TIMEOUT: Duration = Duration::from_secs(5);

pub fn update_json(submission_id: &str, status: &str, score: u32) -> serde_json::Value {
    json!({
        "submission_id": submission_id,
        "case_id": "c1",
        "score": score,
        "status": status,
        "testcases": [{
            "number": 1,
            "verdict": if status == "Judging" { "Running" } else { status },
            "input": "1 2\n",
            "expected_output": "3\n",
            "actual_output": "3\n",
            "time_ms": 12,
            "memory_kb": 2048
        }]
    })
}

pub fn update(submission_id: &str, status: SubmissionStatus, score: f64) -> SubmissionUpdate {
    SubmissionUpdate {
        submission_id: submission_id.to_string(),
        case_id: "c1".to_string(),
        score,
        status,
        testcases: Vec::new(),
    }
}

pub fn history_item(submission_id: &str, status: SubmissionStatus) -> SubmissionHistoryItem {
    serde_json::from_value(json!({
        "user_id": "u1",
        "username": "alice",
        "name": "Alice",
        "submission_id": submission_id,
        "contest_id": "contest",
        "case_id": "c1",
        "case_code": "APLUSB",
        "status": status,
        "score": 0,
        "submit_time": "2024-05-01T10:00:00Z",
        "language_id": 71
    }))
    .unwrap()
}

pub struct WsServer {
    pub url: String,
    connections: mpsc::UnboundedReceiver<ServerConnection>,
}

pub struct ServerConnection {
    pub path: String,
    ws: WebSocketStream<TcpStream>,
}

impl WsServer {
    pub async fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("ws://{}", listener.local_addr().unwrap());
        let (tx, connections) = mpsc::unbounded_channel();

        tokio::spawn(async move {
            while let Ok((socket, _)) = listener.accept().await {
                let tx = tx.clone();
                tokio::spawn(async move {
                    let mut path = String::new();
                    let ws = tokio_tungstenite::accept_hdr_async(
                        socket,
                        |request: &Request, response: Response| -> Result<Response, ErrorResponse> {
                            path = request.uri().path().to_string();
                            Ok(response)
                        },
                    )
                    .await;
                    if let Ok(ws) = ws {
                        let _ = tx.send(ServerConnection { path, ws });
                    }
                });
            }
        });

        Self { url, connections }
    }

    /// A websocket URL nobody listens on.
    pub async fn unused_url() -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        format!("ws://{}", listener.local_addr().unwrap())
    }

    pub async fn accept_within(&mut self, wait: Duration) -> Option<ServerConnection> {
        tokio::time::timeout(wait, self.connections.recv())
            .await
            .ok()
            .flatten()
    }

    pub async fn accept(&mut self) -> ServerConnection {
        tokio::time::timeout(TIMEOUT, self.connections.recv())
            .await
            .expect("no channel connection arrived")
            .unwrap()
    }
}

impl ServerConnection {
    pub async fn send_json(&mut self, value: serde_json::Value) {
        self.send_text(&value.to_string()).await;
    }

    pub async fn send_text(&mut self, text: &str) {
        self.ws.send(Message::Text(text.to_string())).await.unwrap();
    }

    /// Whether the client ended the connection within the timeout.
    pub async fn wait_closed(&mut self) -> bool {
        let closed = async {
            loop {
                match self.ws.next().await {
                    None | Some(Err(_)) | Some(Ok(Message::Close(_))) => return,
                    Some(Ok(_)) => continue,
                }
            }
        };
        tokio::time::timeout(TIMEOUT, closed).await.is_ok()
    }

    pub async fn close(mut self) {
        self.ws.close(None).await.unwrap();
    }
}

/// One request seen by [`HttpServer`].
#[derive(Debug)]
pub struct HttpRequest {
    pub method: String,
    pub target: String,
    pub body: String,
}

impl HttpRequest {
    /// Value of a text field of a multipart body.
    pub fn form_field(&self, name: &str) -> Option<&str> {
        let start = self.body.find(&format!("name=\"{name}\""))?;
        let rest = &self.body[start..];
        let value = &rest[rest.find("\r\n\r\n")? + 4..];
        Some(&value[..value.find("\r\n--")?])
    }
}

/// HTTP server answering every request with the same status and body.
pub struct HttpServer {
    pub url: String,
    requests: mpsc::UnboundedReceiver<HttpRequest>,
}

impl HttpServer {
    pub async fn respond(status: u16, body: &str) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("http://{}", listener.local_addr().unwrap());
        let (tx, requests) = mpsc::unbounded_channel();
        let body = body.to_string();

        tokio::spawn(async move {
            while let Ok((mut socket, _)) = listener.accept().await {
                let Some(request) = read_request(&mut socket).await else {
                    continue;
                };
                let _ = tx.send(request);

                let reason = reqwest::StatusCode::from_u16(status)
                    .ok()
                    .and_then(|status| status.canonical_reason())
                    .unwrap_or("Unknown");
                let response = format!(
                    "HTTP/1.1 {status} {reason}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
                    body.len()
                );
                let _ = socket.write_all(response.as_bytes()).await;
                let _ = socket.shutdown().await;
            }
        });

        Self { url, requests }
    }

    pub async fn request(&mut self) -> HttpRequest {
        tokio::time::timeout(TIMEOUT, self.requests.recv())
            .await
            .expect("no HTTP request arrived")
            .unwrap()
    }
}

async fn read_request(socket: &mut TcpStream) -> Option<HttpRequest> {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 4096];

    let header_end = loop {
        if let Some(end) = buf.windows(4).position(|w| w == b"\r\n\r\n") {
            break end + 4;
        }
        let n = socket.read(&mut chunk).await.ok()?;
        if n == 0 {
            return None;
        }
        buf.extend_from_slice(&chunk[..n]);
    };

    let head = String::from_utf8_lossy(&buf[..header_end]).into_owned();
    let mut request_line = head.lines().next()?.split(' ');
    let method = request_line.next()?.to_string();
    let target = request_line.next()?.to_string();
    let content_length = head
        .lines()
        .filter_map(|line| line.split_once(':'))
        .find(|(name, _)| name.eq_ignore_ascii_case("content-length"))
        .and_then(|(_, value)| value.trim().parse::<usize>().ok())
        .unwrap_or(0);

    while buf.len() < header_end + content_length {
        let n = socket.read(&mut chunk).await.ok()?;
        if n == 0 {
            break;
        }
        buf.extend_from_slice(&chunk[..n]);
    }

    Some(HttpRequest {
        method,
        target,
        body: String::from_utf8_lossy(&buf[header_end..]).into_owned(),
    })
}

#[derive(Clone, Debug, PartialEq)]
pub enum ChannelEvent {
    Open,
    Update(SubmissionUpdate),
    Close,
    Error(String),
}

pub struct Recorder {
    events: mpsc::UnboundedSender<ChannelEvent>,
}

pub struct RecordedEvents(mpsc::UnboundedReceiver<ChannelEvent>);

impl Recorder {
    pub fn new() -> (Arc<Self>, RecordedEvents) {
        let (events, rx) = mpsc::unbounded_channel();
        (Arc::new(Self { events }), RecordedEvents(rx))
    }
}

impl RecordedEvents {
    pub async fn next(&mut self) -> ChannelEvent {
        tokio::time::timeout(TIMEOUT, self.0.recv())
            .await
            .expect("no channel event arrived")
            .unwrap()
    }

    pub fn try_next(&mut self) -> Option<ChannelEvent> {
        self.0.try_recv().ok()
    }
}

#[async_trait]
impl ChannelListener for Recorder {
    async fn on_update(&self, update: SubmissionUpdate) {
        let _ = self.events.send(ChannelEvent::Update(update));
    }

    async fn on_open(&self) {
        let _ = self.events.send(ChannelEvent::Open);
    }

    async fn on_close(&self) {
        let _ = self.events.send(ChannelEvent::Close);
    }

    async fn on_error(&self, error: ChannelError) {
        let _ = self.events.send(ChannelEvent::Error(error.to_string()));
    }
}

type SubmitReply = Result<SubmitResponse, SubmitError>;

/// Judge API whose submit replies are released by the test.
#[derive(Default)]
pub struct FakeApi {
    replies: Mutex<VecDeque<oneshot::Receiver<SubmitReply>>>,
    submitted: Mutex<Vec<SubmitPayload>>,
    history: Mutex<Vec<SubmissionHistoryItem>>,
    history_fails: Mutex<bool>,
    history_calls: Mutex<usize>,
}

impl FakeApi {
    /// Queues a reply for the next submit call and returns its trigger.
    pub fn defer_submit(&self) -> oneshot::Sender<SubmitReply> {
        let (tx, rx) = oneshot::channel();
        self.replies.lock().unwrap().push_back(rx);
        tx
    }

    pub fn accept_submit(&self, submission_id: &str) {
        let _ = self.defer_submit().send(Ok(accepted(submission_id)));
    }

    pub fn reject_submit(&self, message: &str) {
        let _ = self
            .defer_submit()
            .send(Err(SubmitError::Rejected(message.to_string())));
    }

    pub fn submitted(&self) -> Vec<SubmitPayload> {
        self.submitted.lock().unwrap().clone()
    }

    pub fn set_history(&self, items: Vec<SubmissionHistoryItem>) {
        *self.history.lock().unwrap() = items;
    }

    pub fn fail_history(&self, fail: bool) {
        *self.history_fails.lock().unwrap() = fail;
    }

    pub fn history_calls(&self) -> usize {
        *self.history_calls.lock().unwrap()
    }
}

pub fn accepted(submission_id: &str) -> SubmitResponse {
    SubmitResponse {
        submission_id: submission_id.to_string(),
        status: SubmissionStatus::Judging,
    }
}

#[async_trait]
impl JudgeApi for FakeApi {
    async fn submit(&self, payload: SubmitPayload) -> Result<SubmitResponse, SubmitError> {
        self.submitted.lock().unwrap().push(payload);
        let reply = self
            .replies
            .lock()
            .unwrap()
            .pop_front()
            .expect("unexpected submit call");
        reply
            .await
            .unwrap_or_else(|_| Err(SubmitError::InvalidResponse("reply dropped".into())))
    }

    async fn fetch_history(
        &self,
        _contest_id: &str,
        _class_transaction_id: Option<&str>,
    ) -> Result<Vec<SubmissionHistoryItem>, HistoryError> {
        *self.history_calls.lock().unwrap() += 1;
        if *self.history_fails.lock().unwrap() {
            return Err(HistoryError::Status(reqwest::StatusCode::INTERNAL_SERVER_ERROR));
        }
        Ok(self.history.lock().unwrap().clone())
    }
}
