use std::sync::Arc;

use chatrelay::{IncomingMessage, MessageKind, Response};
use tracing::{debug, warn};

use crate::error::ChatError;
use crate::registry::{ConnectionId, SessionRegistry};

/// Resolves chat messages to target connections and queues the notifications.
///
/// Delivery only enqueues onto each target's [`crate::outbox::Outbox`]; a slow
/// or vanished peer costs a log line, not a stall.
#[derive(Clone)]
pub struct Router {
    registry: Arc<SessionRegistry>,
}

impl Router {
    pub fn new(registry: Arc<SessionRegistry>) -> Self {
        Self { registry }
    }

    /// Deliver `content` to every registered connection except the sender.
    /// Returns how many deliveries were queued.
    pub fn broadcast(&self, sender: ConnectionId, content: &str) -> Result<usize, ChatError> {
        let sessions = self.registry.snapshot();
        let sender_name = sessions
            .iter()
            .find(|s| s.connection_id == sender)
            .map(|s| s.user.username.clone())
            .ok_or(ChatError::NotRegistered)?;

        let notification = Response::incoming(IncomingMessage {
            sender: sender_name.clone(),
            content: content.to_string(),
            kind: MessageKind::Broadcast,
        });

        let mut delivered = 0;
        for session in sessions.iter().filter(|s| s.connection_id != sender) {
            match session.outbox.deliver(notification.clone()) {
                Ok(()) => delivered += 1,
                Err(err) => warn!(
                    from = %sender_name,
                    to = %session.user.username,
                    "broadcast delivery skipped: {err}"
                ),
            }
        }
        debug!(from = %sender_name, delivered, "broadcast queued");
        Ok(delivered)
    }

    /// Deliver `content` to the session registered as `recipient`.
    pub fn direct(
        &self,
        sender: ConnectionId,
        recipient: &str,
        content: &str,
    ) -> Result<(), ChatError> {
        let sender_name = self
            .registry
            .username_of(sender)
            .ok_or(ChatError::NotRegistered)?;
        let target = self
            .registry
            .lookup(recipient)
            .ok_or_else(|| ChatError::RecipientNotFound(recipient.to_string()))?;

        let notification = Response::incoming(IncomingMessage {
            sender: sender_name.clone(),
            content: content.to_string(),
            kind: MessageKind::Direct,
        });
        target.outbox.deliver(notification).map_err(|err| {
            warn!(from = %sender_name, to = %recipient, "direct delivery failed: {err}");
            ChatError::DeliveryFailed(recipient.to_string())
        })?;
        debug!(from = %sender_name, to = %recipient, "direct message queued");
        Ok(())
    }
}
