//! Delivery of asynchronous batch results to the acting account.
//!
//! Delivery is best effort: a notifier never fails the batch it reports on.

use crate::model::actor::AccountId;
use crate::service::bulk::BatchEvent;
use log::{info, warn};
use tokio::sync::mpsc;

/// Topic carrying results of an account's own item operations.
pub const MEMBER_ITEMS_TOPIC: &str = "item/member";

/// Sink for per-account notifications.
pub trait ActorNotifier: Send + Sync {
    fn notify(&self, account_id: AccountId, topic: &str, event: BatchEvent);
}

/// One delivered notification.
#[derive(Debug, Clone, PartialEq)]
pub struct Notification {
    pub account_id: AccountId,
    pub topic: String,
    pub event: BatchEvent,
}

/// Forwards notifications into an unbounded tokio channel.
#[derive(Debug, Clone)]
pub struct ChannelNotifier {
    sender: mpsc::UnboundedSender<Notification>,
}

impl ChannelNotifier {
    /// Creates a notifier and the receiving end a transport layer drains.
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<Notification>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (Self { sender }, receiver)
    }
}

impl ActorNotifier for ChannelNotifier {
    fn notify(&self, account_id: AccountId, topic: &str, event: BatchEvent) {
        let batch_id = event.batch_id();
        let notification = Notification {
            account_id,
            topic: topic.to_string(),
            event,
        };
        if self.sender.send(notification).is_err() {
            warn!(
                "event=notify module=notifier status=error batch_id={} reason=receiver_closed",
                batch_id
            );
        }
    }
}

/// Writes a one-line summary of every notification to the log.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogNotifier;

impl ActorNotifier for LogNotifier {
    fn notify(&self, account_id: AccountId, topic: &str, event: BatchEvent) {
        match &event {
            BatchEvent::Completed {
                batch_id, results, ..
            } => {
                let failed = results.values().filter(|outcome| !outcome.is_success()).count();
                info!(
                    "event=notify module=notifier status=ok account_id={} topic={} batch_id={} items={} failed={}",
                    account_id,
                    topic,
                    batch_id,
                    results.len(),
                    failed
                );
            }
            BatchEvent::BatchFailed { batch_id, .. } => {
                warn!(
                    "event=notify module=notifier status=error account_id={} topic={} batch_id={}",
                    account_id, topic, batch_id
                );
            }
        }
    }
}
