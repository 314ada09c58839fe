//! Local WebSocket server for status channel integration tests

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use parking_lot::Mutex;
use serde_json::Value;
use status_channel::{ChannelConfig, ConnectionState, ReconnectConfig, StatusChannel, StaticToken};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, watch};
use tokio_tungstenite::tungstenite::handshake::server::{Request, Response};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::WebSocketStream;

pub const WAIT: Duration = Duration::from_secs(5);

/// Accepts every connection and hands it to the test
pub struct TestServer {
    pub url: String,
    uris: Arc<Mutex<Vec<String>>>,
    connections: mpsc::UnboundedReceiver<ServerConnection>,
}

impl TestServer {
    pub async fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let url = format!("ws://{}/ws/status", listener.local_addr().expect("addr"));
        let uris = Arc::new(Mutex::new(Vec::new()));
        let (tx, connections) = mpsc::unbounded_channel();

        let seen = uris.clone();
        tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                let seen = seen.clone();
                let callback = move |request: &Request, response: Response| {
                    seen.lock().push(request.uri().to_string());
                    Ok(response)
                };
                if let Ok(ws) = tokio_tungstenite::accept_hdr_async(stream, callback).await {
                    if tx.send(ServerConnection { ws }).is_err() {
                        break;
                    }
                }
            }
        });

        Self {
            url,
            uris,
            connections,
        }
    }

    /// Request URIs of every accepted handshake, in order.
    pub fn uris(&self) -> Vec<String> {
        self.uris.lock().clone()
    }

    pub async fn accept(&mut self) -> ServerConnection {
        tokio::time::timeout(WAIT, self.connections.recv())
            .await
            .expect("no connection within timeout")
            .expect("server stopped")
    }

    /// Asserts no further connection arrives within `window`.
    pub async fn expect_no_connection(&mut self, window: Duration) {
        let next = tokio::time::timeout(window, self.connections.recv()).await;
        assert!(next.is_err(), "unexpected reconnection");
    }
}

pub struct ServerConnection {
    ws: WebSocketStream<TcpStream>,
}

impl ServerConnection {
    /// Next text frame sent by the client, parsed as JSON.
    pub async fn recv_json(&mut self) -> Value {
        loop {
            let frame = tokio::time::timeout(WAIT, self.ws.next())
                .await
                .expect("no frame within timeout")
                .expect("client closed")
                .expect("read frame");
            if let Message::Text(text) = frame {
                return serde_json::from_str(&text).expect("client frame is JSON");
            }
        }
    }

    pub async fn send_json(&mut self, value: Value) {
        self.send_text(value.to_string()).await;
    }

    pub async fn send_text(&mut self, text: impl Into<String>) {
        self.ws
            .send(Message::Text(text.into()))
            .await
            .expect("send frame");
    }

    /// Answers the query `request` with `data`.
    pub async fn reply(&mut self, request: &Value, code: i64, data: Value) {
        self.send_json(serde_json::json!({
            "code": code,
            "data": {
                "action": request["action"],
                "msg_uuid": request["msg_uuid"],
                "data": data,
            },
            "timestamp": 1718000000000i64,
        }))
        .await;
    }

    pub async fn push_status(&mut self, entries: Value) {
        self.send_json(serde_json::json!({
            "code": 0,
            "data": { "action": "status_update", "data": entries },
            "timestamp": 1718000000000i64,
        }))
        .await;
    }

    pub async fn close(mut self) {
        let _ = self.ws.close(None).await;
    }

    /// Waits until the client sends a close frame or drops the socket.
    pub async fn expect_closed(mut self) {
        loop {
            match tokio::time::timeout(WAIT, self.ws.next())
                .await
                .expect("client did not close")
            {
                Some(Ok(Message::Close(_))) | None | Some(Err(_)) => return,
                Some(Ok(_)) => {}
            }
        }
    }
}

pub fn config(url: &str, interval_ms: u64, max_attempts: u32) -> ChannelConfig {
    ChannelConfig {
        reconnect: ReconnectConfig {
            enabled: true,
            interval_ms,
            max_attempts,
        },
        ..ChannelConfig::default().with_url(url)
    }
}

pub fn channel(config: ChannelConfig) -> StatusChannel {
    StatusChannel::new(config, Arc::new(StaticToken("tok".to_string())))
}

/// URL of a port nothing listens on.
pub async fn dead_url() -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("addr");
    drop(listener);
    format!("ws://{addr}/ws/status")
}

pub async fn wait_for_state(
    rx: &mut watch::Receiver<ConnectionState>,
    predicate: impl FnMut(&ConnectionState) -> bool,
) -> ConnectionState {
    let state = tokio::time::timeout(WAIT, rx.wait_for(predicate))
        .await
        .expect("state not reached within timeout")
        .expect("channel dropped");
    *state
}
