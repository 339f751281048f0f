// src/service/push.rs

//! Out-of-band push channel messages.
//!
//! The push channel only refreshes UI-facing progress. Dispatch and
//! reconciliation never wait for it: if messages are lost, late or
//! malformed, results are still complete.

use serde::Deserialize;
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, info};

use crate::dispatch::{DispatchEvent, StatusRegistry};
use crate::types::DeviceId;

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceNotification {
    pub device_id: DeviceId,
    pub success: bool,
    #[serde(default)]
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModuleStatusMessage {
    pub module_id: String,
    pub status: String,
    #[serde(default)]
    pub device_notifications: Vec<DeviceNotification>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PushMessage {
    ModuleStatus(ModuleStatusMessage),
}

impl PushMessage {
    /// Decode one raw push frame. Unknown message types and malformed frames
    /// yield `None`.
    pub fn decode(raw: &str) -> Option<PushMessage> {
        match serde_json::from_str::<PushMessage>(raw) {
            Ok(msg) => Some(msg),
            Err(err) => {
                debug!(error = %err, "ignoring undecodable or unknown push message");
                None
            }
        }
    }
}

/// Drains raw push frames, settles reported devices in the status registry
/// and republishes them to dispatch observers.
#[derive(Debug)]
pub struct PushForwarder {
    registry: StatusRegistry,
    events: broadcast::Sender<DispatchEvent>,
}

impl PushForwarder {
    pub fn new(registry: StatusRegistry, events: broadcast::Sender<DispatchEvent>) -> Self {
        Self { registry, events }
    }

    /// Handle a single raw frame. Returns `true` if it was a known message.
    pub fn handle_frame(&self, raw: &str) -> bool {
        let Some(PushMessage::ModuleStatus(msg)) = PushMessage::decode(raw) else {
            return false;
        };

        let settled: Vec<DeviceId> = msg
            .device_notifications
            .iter()
            .map(|n| n.device_id.clone())
            .collect();
        self.registry.settle_module(&msg.module_id, &settled);

        // No subscribers is fine; the channel is best-effort.
        let _ = self.events.send(DispatchEvent::ModuleStatus {
            module_id: msg.module_id,
            status: msg.status,
            notifications: msg.device_notifications,
        });
        true
    }

    /// Run until the frame channel closes.
    pub async fn run(self, mut frames: mpsc::Receiver<String>) {
        info!("push forwarder started");
        while let Some(frame) = frames.recv().await {
            self.handle_frame(&frame);
        }
        info!("push forwarder finished (channel closed)");
    }
}
