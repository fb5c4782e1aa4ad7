// src/pocketbase/realtime.rs
//
// PocketBase realtime change feed. The server speaks SSE: the first event
// (`PB_CONNECT`) carries a client id, which we echo back in a subscription
// POST; record changes then arrive as events named after their collection.

use super::client::PocketBaseClient;
use anyhow::{Context, Result};
use eventsource_client::{Client, ClientBuilder, SSE};
use futures::StreamExt;
use serde::Deserialize;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordAction {
    Create,
    Update,
    Delete,
}

#[derive(Debug, Clone)]
pub struct RealtimeEvent {
    pub collection: String,
    pub action: RecordAction,
    pub record: serde_json::Value,
}

#[derive(Debug, Deserialize)]
struct ConnectPayload {
    #[serde(rename = "clientId")]
    client_id: String,
}

#[derive(Debug, Deserialize)]
struct ChangePayload {
    action: String,
    record: serde_json::Value,
}

/// One SSE connection's worth of change events. When the connection drops
/// the stream ends; the caller reconnects by building a new listener.
pub struct RealtimeListener {
    receiver: mpsc::Receiver<RealtimeEvent>,
    handle: tokio::task::JoinHandle<()>,
}

impl RealtimeListener {
    pub fn connect(pb: Arc<PocketBaseClient>, collections: &'static [&'static str]) -> Result<Self> {
        let url = pb
            .base_url()
            .join("api/realtime")
            .context("Invalid realtime endpoint")?;

        let client = ClientBuilder::for_url(url.as_str())
            .map_err(|e| anyhow::anyhow!("SSE client build failed: {e}"))?
            .header("Authorization", &format!("Bearer {}", pb.token()))
            .map_err(|e| anyhow::anyhow!("SSE header rejected: {e}"))?
            .build();

        let (tx, rx) = mpsc::channel(64);
        let handle = tokio::spawn(async move {
            let mut stream = client.stream();
            while let Some(event) = stream.next().await {
                match event {
                    Ok(SSE::Connected(_)) => {
                        debug!("Realtime SSE transport connected");
                    }
                    Ok(SSE::Event(ev)) if ev.event_type == "PB_CONNECT" => {
                        let payload: ConnectPayload = match serde_json::from_str(&ev.data) {
                            Ok(p) => p,
                            Err(e) => {
                                warn!("Bad PB_CONNECT payload: {e}");
                                break;
                            }
                        };
                        if let Err(e) = pb.subscribe_realtime(&payload.client_id, collections).await
                        {
                            warn!("Realtime subscription failed: {e:#}");
                            break;
                        }
                        debug!("Subscribed to {} collections", collections.len());
                    }
                    Ok(SSE::Event(ev)) => {
                        // Topic may carry a record-id suffix ("coll/recordId").
                        let collection = ev
                            .event_type
                            .split('/')
                            .next()
                            .unwrap_or(&ev.event_type)
                            .to_string();
                        if !collections.contains(&collection.as_str()) {
                            continue;
                        }
                        let payload: ChangePayload = match serde_json::from_str(&ev.data) {
                            Ok(p) => p,
                            Err(e) => {
                                warn!("Undecodable change event on {collection}: {e}");
                                continue;
                            }
                        };
                        let action = match payload.action.as_str() {
                            "create" => RecordAction::Create,
                            "update" => RecordAction::Update,
                            "delete" => RecordAction::Delete,
                            other => {
                                debug!("Ignoring unknown action {other:?}");
                                continue;
                            }
                        };
                        let event = RealtimeEvent {
                            collection,
                            action,
                            record: payload.record,
                        };
                        if tx.send(event).await.is_err() {
                            break;
                        }
                    }
                    Ok(SSE::Comment(_)) => {}
                    Err(e) => {
                        warn!("Realtime stream error: {e}");
                        break;
                    }
                }
            }
        });

        Ok(Self {
            receiver: rx,
            handle,
        })
    }

    /// Next change event; `None` once the connection has dropped.
    pub async fn next(&mut self) -> Option<RealtimeEvent> {
        self.receiver.recv().await
    }
}

impl Drop for RealtimeListener {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_change_payload_decodes() {
        let payload: ChangePayload = serde_json::from_str(
            r#"{"action":"update","record":{"id":"t1","name":"lobby"}}"#,
        )
        .unwrap();
        assert_eq!(payload.action, "update");
        assert_eq!(payload.record["name"], "lobby");
    }

    #[test]
    fn test_connect_payload_decodes() {
        let payload: ConnectPayload =
            serde_json::from_str(r#"{"clientId":"abc123"}"#).unwrap();
        assert_eq!(payload.client_id, "abc123");
    }
}
