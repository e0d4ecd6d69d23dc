//! Host-initiated notifications.
//!
//! Fire-and-forget: each emission is posted at most once with no
//! acknowledgment and no retry. Payloads carry no diff; subscribers re-fetch
//! whatever state they display.

use serde_json::Value;
use tokio::sync::mpsc;

use crate::bridge::protocol::{Envelope, NotificationSchema};

/// Posts notifications onto the host's outbound channel.
#[derive(Debug, Clone)]
pub struct NotificationEmitter {
    tx: mpsc::UnboundedSender<Envelope>,
}

impl NotificationEmitter {
    pub fn new(tx: mpsc::UnboundedSender<Envelope>) -> Self {
        Self { tx }
    }

    /// Post a typed notification. Returns whether it was handed to the transport.
    pub fn emit<N: NotificationSchema>(&self, notification: &N) -> bool {
        match serde_json::to_value(notification) {
            Ok(payload) => self.emit_raw(N::NAME, payload),
            Err(e) => {
                tracing::error!(command = N::NAME, error = %e, "Failed to encode notification");
                false
            }
        }
    }

    /// Post a notification with an unchecked payload.
    pub fn emit_raw(&self, command: &str, payload: Value) -> bool {
        match self.tx.send(Envelope::notification(command, payload)) {
            Ok(()) => {
                tracing::debug!(command, "Notification emitted");
                true
            }
            Err(_) => {
                tracing::debug!(command, "No UI attached, notification dropped");
                false
            }
        }
    }
}
