//! Mock debugging endpoint: wiremock serves `/json/list`, a tungstenite
//! listener plays the target's WebSocket.

#![allow(dead_code)]

use devtools::{ClientConfig, ConnectionEvent, ReconnectPolicy};
use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, mpsc};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::WebSocketStream;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

pub const WAIT: Duration = Duration::from_secs(5);

pub const INBOX: (&str, &str) = ("PAGE-1", "https://web.example.com/inbox");

pub struct MockDebugger {
    pub http: MockServer,
    ws_port: u16,
    connections: mpsc::UnboundedReceiver<MockConnection>,
}

impl MockDebugger {
    pub async fn start() -> Self {
        Self::with_pages(&[INBOX]).await
    }

    pub async fn with_pages(pages: &[(&str, &str)]) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let ws_port = listener.local_addr().unwrap().port();
        let (tx, rx) = mpsc::unbounded_channel();

        tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                let tx = tx.clone();
                tokio::spawn(async move {
                    if let Ok(ws) = tokio_tungstenite::accept_async(stream).await {
                        let _ = tx.send(MockConnection { ws });
                    }
                });
            }
        });

        let mock = Self {
            http: MockServer::start().await,
            ws_port,
            connections: rx,
        };
        mock.serve(mock.pages(pages)).await;
        mock
    }

    pub fn port(&self) -> u16 {
        self.http.address().port()
    }

    /// Client config pointed at this mock, with a fast backoff
    pub fn config(&self) -> ClientConfig {
        ClientConfig::new(self.port())
            .with_timeout(WAIT)
            .with_reconnect(ReconnectPolicy {
                max_attempts: 5,
                base_delay_ms: 10,
            })
    }

    pub fn ws_url(&self, id: &str) -> String {
        format!("ws://127.0.0.1:{}/devtools/page/{id}", self.ws_port)
    }

    pub fn pages(&self, pages: &[(&str, &str)]) -> Value {
        Value::Array(
            pages
                .iter()
                .map(|(id, url)| {
                    json!({
                        "id": id,
                        "type": "page",
                        "title": id,
                        "url": url,
                        "webSocketDebuggerUrl": self.ws_url(id),
                    })
                })
                .collect(),
        )
    }

    /// Answer `/json/list` with `targets`
    pub async fn serve(&self, targets: Value) {
        Mock::given(method("GET"))
            .and(path("/json/list"))
            .respond_with(ResponseTemplate::new(200).set_body_json(targets))
            .mount(&self.http)
            .await;
    }

    /// Drop all mocks (discovery now answers 404) and the request log
    pub async fn stop_serving(&self) {
        self.http.reset().await;
    }

    /// Accept discovery requests but never answer them in time
    pub async fn go_silent(&self) {
        self.http.reset().await;
        Mock::given(method("GET"))
            .and(path("/json/list"))
            .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(60)))
            .mount(&self.http)
            .await;
    }

    pub async fn discovery_requests(&self) -> usize {
        self.http
            .received_requests()
            .await
            .map(|requests| requests.len())
            .unwrap_or(0)
    }

    pub async fn accept(&mut self) -> MockConnection {
        tokio::time::timeout(WAIT, self.connections.recv())
            .await
            .expect("timed out waiting for a WebSocket connection")
            .expect("listener stopped")
    }

    pub async fn try_accept(&mut self, wait: Duration) -> Option<MockConnection> {
        tokio::time::timeout(wait, self.connections.recv())
            .await
            .ok()
            .flatten()
    }
}

pub struct MockConnection {
    ws: WebSocketStream<TcpStream>,
}

impl MockConnection {
    pub async fn next_request(&mut self) -> Value {
        self.try_next_request(WAIT)
            .await
            .expect("no request arrived")
    }

    /// Next request frame, or `None` on close or after `wait`
    pub async fn try_next_request(&mut self, wait: Duration) -> Option<Value> {
        loop {
            match tokio::time::timeout(wait, self.ws.next()).await.ok()?? {
                Ok(Message::Text(text)) => return Some(serde_json::from_str(&text).unwrap()),
                Ok(Message::Close(_)) | Err(_) => return None,
                Ok(_) => continue,
            }
        }
    }

    pub async fn respond(&mut self, request: &Value, result: Value) {
        self.send_json(json!({ "id": request["id"], "result": result }))
            .await;
    }

    pub async fn send_json(&mut self, frame: Value) {
        self.send_raw(&frame.to_string()).await;
    }

    pub async fn send_raw(&mut self, text: &str) {
        self.ws.send(Message::Text(text.to_string())).await.unwrap();
    }

    pub async fn close(mut self) {
        let _ = self.ws.close(None).await;
    }
}

/// Next lifecycle event matching `pred`, skipping others
pub async fn wait_for(
    events: &mut broadcast::Receiver<ConnectionEvent>,
    pred: impl Fn(&ConnectionEvent) -> bool,
) -> ConnectionEvent {
    tokio::time::timeout(WAIT, async {
        loop {
            let event = events.recv().await.expect("event bus closed");
            if pred(&event) {
                return event;
            }
        }
    })
    .await
    .expect("timed out waiting for connection event")
}
