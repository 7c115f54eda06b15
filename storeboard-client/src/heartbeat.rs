//! Device presence heartbeat
//!
//! A paired display stamps its device row every interval so the console
//! can tell live boards from dead ones. Failures are logged and the next
//! tick tries again; a board never stops rendering because presence
//! reporting is down.

use chrono::Utc;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use storeboard_common::events::Collection;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::feed::RemoteBackend;

pub struct HeartbeatService {
    handle: Option<JoinHandle<()>>,
}

impl HeartbeatService {
    /// Start heartbeating for a device. The first beat is sent immediately,
    /// then once per interval.
    pub fn start(
        remote: Arc<dyn RemoteBackend>,
        device_id: String,
        interval: Duration,
    ) -> HeartbeatService {
        let handle = tokio::spawn(async move {
            if !remote.is_configured() {
                debug!("Remote service not configured, heartbeat disabled");
                return;
            }
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                let patch = json!({
                    "is_online": true,
                    "last_heartbeat": Utc::now(),
                });
                match remote.update(Collection::Devices, &device_id, patch).await {
                    Ok(_) => debug!("Heartbeat sent for device {}", device_id),
                    Err(e) => warn!("Heartbeat for device {} failed: {}", device_id, e),
                }
            }
        });
        HeartbeatService {
            handle: Some(handle),
        }
    }

    pub fn stop(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
    }
}

impl Drop for HeartbeatService {
    fn drop(&mut self) {
        self.stop();
    }
}
