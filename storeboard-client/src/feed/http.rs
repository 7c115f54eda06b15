//! HTTP implementation of `RemoteBackend`
//!
//! Talks to a PostgREST-style endpoint: `/rest/v1/{table}` for reads and
//! mutations, `/realtime/v1/{table}` for a line-delimited SSE change
//! stream. One configured client instance is shared across the process.

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::Deserialize;
use serde_json::Value;
use std::time::Duration;
use storeboard_common::config::ClientConfig;
use storeboard_common::events::{ChangeEvent, Collection};
use storeboard_common::{Error, Result};
use tokio::sync::mpsc;
use tracing::{info, warn};

use super::RemoteBackend;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
const RECONNECT_DELAY: Duration = Duration::from_secs(5);
const EVENT_CHANNEL_CAPACITY: usize = 64;

#[derive(Clone)]
pub struct HttpBackend {
    client: reqwest::Client,
    /// Built without a total request timeout; a healthy change stream
    /// stays open indefinitely.
    stream_client: reqwest::Client,
    base_url: String,
    api_key: String,
    table_prefix: String,
}

/// Change stream wire frame
#[derive(Debug, Deserialize)]
struct WireChange {
    op: String,
    #[serde(default)]
    row: Option<Value>,
    #[serde(default)]
    old: Option<Value>,
}

impl HttpBackend {
    /// Build a backend from configuration; `None` when the remote service
    /// is not configured.
    pub fn from_config(config: &ClientConfig) -> Option<HttpBackend> {
        if !config.is_remote_configured() {
            return None;
        }
        // is_remote_configured() guarantees both values are present
        let base_url = config.remote_url.clone()?;
        let api_key = config.api_key.clone()?;

        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .ok()?;
        let stream_client = reqwest::Client::builder()
            .connect_timeout(REQUEST_TIMEOUT)
            .build()
            .ok()?;

        Some(HttpBackend {
            client,
            stream_client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
            table_prefix: config.table_prefix.clone(),
        })
    }

    fn table(&self, collection: Collection) -> String {
        format!("{}{}", self.table_prefix, collection.as_str())
    }

    fn rest_url(&self, collection: Collection) -> String {
        format!("{}/rest/v1/{}", self.base_url, self.table(collection))
    }

    fn stream_url(&self, collection: Collection) -> String {
        format!("{}/realtime/v1/{}", self.base_url, self.table(collection))
    }

    fn request(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        builder
            .header("apikey", &self.api_key)
            .header("Authorization", format!("Bearer {}", self.api_key))
    }

    /// Expect exactly one row back from an insert/update response
    fn single_row(mut rows: Vec<Value>, context: &str) -> Result<Value> {
        if rows.is_empty() {
            return Err(Error::Remote(format!("{}: no row returned", context)));
        }
        Ok(rows.swap_remove(0))
    }
}

#[async_trait]
impl RemoteBackend for HttpBackend {
    fn is_configured(&self) -> bool {
        true
    }

    async fn select(&self, collection: Collection) -> Result<Vec<Value>> {
        let response = self
            .request(self.client.get(self.rest_url(collection)))
            .query(&[("select", "*"), ("order", "created_at.desc")])
            .send()
            .await?
            .error_for_status()?;
        Ok(response.json().await?)
    }

    async fn insert(&self, collection: Collection, row: Value) -> Result<Value> {
        let response = self
            .request(self.client.post(self.rest_url(collection)))
            .header("Prefer", "return=representation")
            .json(&vec![row])
            .send()
            .await?;

        if response.status() == StatusCode::CONFLICT {
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Conflict(format!(
                "insert into {}: {}",
                collection, body
            )));
        }

        let rows: Vec<Value> = response.error_for_status()?.json().await?;
        Self::single_row(rows, "insert")
    }

    async fn update(&self, collection: Collection, id: &str, patch: Value) -> Result<Value> {
        let response = self
            .request(self.client.patch(self.rest_url(collection)))
            .query(&[("id", format!("eq.{}", id))])
            .header("Prefer", "return=representation")
            .json(&patch)
            .send()
            .await?
            .error_for_status()?;

        let rows: Vec<Value> = response.json().await?;
        if rows.is_empty() {
            return Err(Error::NotFound(format!("{} id {}", collection, id)));
        }
        Self::single_row(rows, "update")
    }

    async fn delete(&self, collection: Collection, id: &str) -> Result<()> {
        self.request(self.client.delete(self.rest_url(collection)))
            .query(&[("id", format!("eq.{}", id))])
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }

    async fn subscribe(&self, collection: Collection) -> Result<mpsc::Receiver<ChangeEvent>> {
        let (tx, rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        let backend = self.clone();

        tokio::spawn(async move {
            let mut first_connect = true;
            loop {
                if !first_connect {
                    tokio::time::sleep(RECONNECT_DELAY).await;
                    // Tell the engine the stream resumed so it re-reads the
                    // collection; events may have been lost while down.
                    if tx.send(ChangeEvent::Resumed).await.is_err() {
                        return;
                    }
                }
                first_connect = false;

                let request = backend
                    .request(backend.stream_client.get(backend.stream_url(collection)))
                    .header("Accept", "text/event-stream");

                let mut response = match request.send().await {
                    Ok(response) if response.status().is_success() => response,
                    Ok(response) => {
                        warn!(
                            "Change stream for {} refused with {}",
                            collection,
                            response.status()
                        );
                        continue;
                    }
                    Err(e) => {
                        warn!("Change stream for {} unreachable: {}", collection, e);
                        continue;
                    }
                };

                info!("Change stream connected for {}", collection);
                let mut buffer = String::new();
                while let Ok(Some(chunk)) = response.chunk().await {
                    buffer.push_str(&String::from_utf8_lossy(&chunk));
                    while let Some(newline) = buffer.find('\n') {
                        let line: String = buffer.drain(..=newline).collect();
                        let Some(event) = parse_stream_line(collection, line.trim()) else {
                            continue;
                        };
                        if tx.send(event).await.is_err() {
                            return;
                        }
                    }
                }
                warn!("Change stream for {} ended, reconnecting", collection);
            }
        });

        Ok(rx)
    }
}

/// Decode one SSE line into a change event; comments, heartbeats, and
/// unparseable frames are dropped.
fn parse_stream_line(collection: Collection, line: &str) -> Option<ChangeEvent> {
    let payload = line.strip_prefix("data:")?.trim();
    if payload.is_empty() {
        return None;
    }

    let change: WireChange = match serde_json::from_str(payload) {
        Ok(change) => change,
        Err(e) => {
            warn!("Discarding malformed {} change frame: {}", collection, e);
            return None;
        }
    };

    match change.op.as_str() {
        "INSERT" | "UPDATE" => change.row.map(|row| ChangeEvent::Upsert { row }),
        "DELETE" => {
            let id = change
                .old
                .as_ref()
                .or(change.row.as_ref())
                .and_then(|v| v.get("id"))
                .and_then(Value::as_str)?;
            Some(ChangeEvent::Remove { id: id.to_string() })
        }
        other => {
            warn!("Unknown change op '{}' for {}", other, collection);
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_upsert_frame() {
        let line = r#"data: {"op": "UPDATE", "row": {"id": "o1", "status": "READY"}}"#;
        match parse_stream_line(Collection::Orders, line) {
            Some(ChangeEvent::Upsert { row }) => assert_eq!(row["status"], "READY"),
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn test_parse_delete_frame_uses_old_id() {
        let line = r#"data: {"op": "DELETE", "old": {"id": "o2"}}"#;
        match parse_stream_line(Collection::Orders, line) {
            Some(ChangeEvent::Remove { id }) => assert_eq!(id, "o2"),
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn test_from_config_requires_usable_remote_values() {
        let mut config = ClientConfig {
            remote_url: Some("https://backend.example.com/".to_string()),
            api_key: Some("anon-key".to_string()),
            data_dir: std::path::PathBuf::from("/tmp"),
            device_id: None,
            heartbeat_interval_secs: 30,
            table_prefix: "app_8c186_".to_string(),
        };

        let backend = HttpBackend::from_config(&config).unwrap();
        assert_eq!(
            backend.rest_url(Collection::Orders),
            "https://backend.example.com/rest/v1/app_8c186_orders"
        );

        config.api_key = Some("undefined".to_string());
        assert!(HttpBackend::from_config(&config).is_none());
    }

    #[test]
    fn test_non_data_lines_dropped() {
        assert!(parse_stream_line(Collection::Orders, ": heartbeat").is_none());
        assert!(parse_stream_line(Collection::Orders, "").is_none());
        assert!(parse_stream_line(Collection::Orders, "data:").is_none());
        assert!(parse_stream_line(Collection::Orders, "data: {not json}").is_none());
    }
}
