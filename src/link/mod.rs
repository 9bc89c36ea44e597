//! Streaming backend link
//!
//! A websocket connection to the remote inference service. Encoded frames
//! go out as binary messages and every response is decoded and fanned out
//! to subscribers. At most one connection exists at a time; connecting
//! again tears the previous one down first.

use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::LinkError;
use crate::shared::OrchestratorResponse;

const RESPONSE_CAPACITY: usize = 16;
const CLOSE_TIMEOUT: Duration = Duration::from_secs(2);

struct Connection {
    id: Uuid,
    outgoing: mpsc::UnboundedSender<Message>,
    writer: JoinHandle<()>,
    reader: JoinHandle<()>,
}

/// Client side of the streaming backend
pub struct BackendLink {
    connect_timeout: Duration,
    connection: Mutex<Option<Connection>>,
    responses: broadcast::Sender<Arc<OrchestratorResponse>>,
}

impl BackendLink {
    pub fn new(connect_timeout: Duration) -> Self {
        let (responses, _) = broadcast::channel(RESPONSE_CAPACITY);
        Self {
            connect_timeout,
            connection: Mutex::new(None),
            responses,
        }
    }

    /// Open a connection, closing any existing one first. Returns the id
    /// of the new connection.
    pub async fn connect(&self, url: &str) -> Result<Uuid, LinkError> {
        self.disconnect().await;

        if !url.starts_with("ws://") && !url.starts_with("wss://") {
            return Err(LinkError::Endpoint(url.to_string()));
        }

        let (stream, _) = tokio::time::timeout(self.connect_timeout, connect_async(url))
            .await
            .map_err(|_| LinkError::Timeout(url.to_string()))??;

        let id = Uuid::new_v4();
        let (mut sink, mut source) = stream.split();
        let (outgoing, mut queue) = mpsc::unbounded_channel::<Message>();

        let writer = tokio::spawn(async move {
            while let Some(message) = queue.recv().await {
                let closing = matches!(message, Message::Close(_));
                if let Err(e) = sink.send(message).await {
                    warn!("Backend send failed: {}", e);
                    break;
                }
                if closing {
                    break;
                }
            }
            let _ = sink.close().await;
        });

        let responses = self.responses.clone();
        let reader = tokio::spawn(async move {
            while let Some(message) = source.next().await {
                let decoded = match message {
                    Ok(Message::Text(text)) => serde_json::from_str::<OrchestratorResponse>(&text),
                    Ok(Message::Binary(data)) => serde_json::from_slice::<OrchestratorResponse>(&data),
                    Ok(Message::Close(frame)) => {
                        debug!("Backend closed connection {}: {:?}", id, frame);
                        break;
                    }
                    Ok(_) => continue,
                    Err(e) => {
                        warn!("Backend receive failed on {}: {}", id, e);
                        break;
                    }
                };

                match decoded {
                    Ok(response) => {
                        // No subscribers is fine
                        let _ = responses.send(Arc::new(response));
                    }
                    Err(e) => warn!("Ignoring undecodable backend message: {}", LinkError::from(e)),
                }
            }
            debug!("Backend receive loop for {} ended", id);
        });

        *self.connection.lock() = Some(Connection {
            id,
            outgoing,
            writer,
            reader,
        });

        info!("Connected to backend {} ({})", url, id);
        Ok(id)
    }

    /// Queue one encoded frame. Failures are logged, never returned.
    pub fn send(&self, data: Vec<u8>) {
        let guard = self.connection.lock();
        match guard.as_ref() {
            Some(conn) => {
                if conn.outgoing.send(Message::Binary(data)).is_err() {
                    warn!("Backend connection {} is closed, frame dropped", conn.id);
                }
            }
            None => debug!("No backend connection, frame dropped"),
        }
    }

    /// Close the current connection with a normal-closure code. A no-op
    /// when not connected.
    pub async fn disconnect(&self) {
        let Some(conn) = self.connection.lock().take() else {
            return;
        };

        conn.reader.abort();
        let close = Message::Close(Some(CloseFrame {
            code: CloseCode::Normal,
            reason: "".into(),
        }));
        if conn.outgoing.send(close).is_ok() {
            drop(conn.outgoing);
            if tokio::time::timeout(CLOSE_TIMEOUT, conn.writer).await.is_err() {
                warn!("Backend close timed out");
            }
        } else {
            conn.writer.abort();
        }

        info!("Disconnected from backend ({})", conn.id);
    }

    /// Receive every decoded response from now on
    pub fn subscribe(&self) -> broadcast::Receiver<Arc<OrchestratorResponse>> {
        self.responses.subscribe()
    }

    pub fn connection_id(&self) -> Option<Uuid> {
        self.connection.lock().as_ref().map(|c| c.id)
    }

    /// Connection exists and its receive loop is still running
    pub fn is_connected(&self) -> bool {
        self.connection
            .lock()
            .as_ref()
            .map(|c| !c.reader.is_finished())
            .unwrap_or(false)
    }
}

impl Drop for BackendLink {
    fn drop(&mut self) {
        if let Some(conn) = self.connection.get_mut().take() {
            conn.reader.abort();
            conn.writer.abort();
        }
    }
}
