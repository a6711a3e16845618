use log::debug;
use tokio::sync::mpsc;

use crate::models::websocket::ServerMessage;

/// Outbound side of a session. Controllers publish state changes here and
/// whoever renders the session (the WebSocket writer, a test) drains them.
#[derive(Clone)]
pub struct EventBus {
    tx: mpsc::UnboundedSender<ServerMessage>,
}

impl EventBus {
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<ServerMessage>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    pub fn publish(&self, event: ServerMessage) {
        if self.tx.send(event).is_err() {
            debug!("Event receiver dropped; discarding event");
        }
    }
}
