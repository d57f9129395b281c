//! Realtime change feed
//!
//! Server-pushed note changes for one notebook at a time. Delivery is
//! at-least-once and unordered across entities; ordering within a note is
//! guaranteed only by the version gate in reconciliation, never by arrival
//! order. Feed failures end the subscription; the caller re-subscribes.

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::{connect_async, tungstenite::Message};

use crate::error::{Error, Result};
use crate::models::{Note, NotebookId};

/// A live subscription; dropping it tears the feed down.
pub struct RealtimeSubscription {
    notebook_id: NotebookId,
    task: JoinHandle<()>,
}

impl RealtimeSubscription {
    #[must_use]
    pub const fn new(notebook_id: NotebookId, task: JoinHandle<()>) -> Self {
        Self { notebook_id, task }
    }

    #[must_use]
    pub const fn notebook_id(&self) -> NotebookId {
        self.notebook_id
    }
}

impl Drop for RealtimeSubscription {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// Source of server-pushed note changes scoped to a notebook.
#[async_trait]
pub trait RealtimeFeed: Send + Sync {
    /// Open a feed for `notebook_id`, forwarding inbound notes into `sink`.
    async fn subscribe(
        &self,
        notebook_id: NotebookId,
        sink: mpsc::UnboundedSender<Note>,
    ) -> Result<RealtimeSubscription>;
}

/// WebSocket-backed change feed.
///
/// One note JSON document per text frame; ping frames are answered, any
/// transport error ends the stream.
pub struct WebSocketFeed {
    endpoint: String,
    api_key: String,
}

impl WebSocketFeed {
    pub fn new(endpoint: impl Into<String>, api_key: impl Into<String>) -> Result<Self> {
        let endpoint = endpoint.into().trim().trim_end_matches('/').to_string();
        if endpoint.is_empty() {
            return Err(Error::InvalidInput("endpoint must not be empty".into()));
        }
        Ok(Self {
            endpoint: ws_base_url(&endpoint),
            api_key: api_key.into(),
        })
    }

    fn feed_url(&self, notebook_id: NotebookId) -> String {
        format!(
            "{}/realtime/v1?apikey={}&notebook_id=eq.{}",
            self.endpoint,
            urlencoding::encode(&self.api_key),
            notebook_id
        )
    }
}

#[async_trait]
impl RealtimeFeed for WebSocketFeed {
    async fn subscribe(
        &self,
        notebook_id: NotebookId,
        sink: mpsc::UnboundedSender<Note>,
    ) -> Result<RealtimeSubscription> {
        let url = self.feed_url(notebook_id);
        let (stream, _) = connect_async(&url)
            .await
            .map_err(|error| Error::Remote(error.to_string()))?;
        let (mut sender, mut receiver) = stream.split();

        let subscribe_frame = serde_json::json!({
            "event": "subscribe",
            "notebook_id": notebook_id.as_str(),
        });
        sender
            .send(Message::Text(subscribe_frame.to_string().into()))
            .await
            .map_err(|error| Error::Remote(error.to_string()))?;

        let task = tokio::spawn(async move {
            while let Some(frame) = receiver.next().await {
                match frame {
                    Ok(Message::Text(text)) => match serde_json::from_str::<Note>(&text) {
                        Ok(note) if note.notebook_id == notebook_id => {
                            if sink.send(note).is_err() {
                                break;
                            }
                        }
                        Ok(note) => {
                            tracing::debug!(note = %note.id, "ignoring note outside subscribed notebook");
                        }
                        Err(error) => {
                            tracing::debug!(%error, "ignoring non-note frame");
                        }
                    },
                    Ok(Message::Ping(data)) => {
                        if sender.send(Message::Pong(data)).await.is_err() {
                            break;
                        }
                    }
                    Ok(Message::Close(_)) => break,
                    Ok(_) => {}
                    Err(error) => {
                        tracing::warn!(%error, notebook = %notebook_id, "realtime feed failed");
                        break;
                    }
                }
            }
            tracing::debug!(notebook = %notebook_id, "realtime feed closed");
        });

        Ok(RealtimeSubscription::new(notebook_id, task))
    }
}

/// Convert an http(s) endpoint to its ws(s) counterpart.
fn ws_base_url(endpoint: &str) -> String {
    if let Some(rest) = endpoint.strip_prefix("http://") {
        format!("ws://{rest}")
    } else if let Some(rest) = endpoint.strip_prefix("https://") {
        format!("wss://{rest}")
    } else if endpoint.starts_with("ws://") || endpoint.starts_with("wss://") {
        endpoint.to_string()
    } else {
        format!("wss://{endpoint}")
    }
}
