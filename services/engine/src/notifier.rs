//! Post-commit settlement notifications
//!
//! Notifications are best-effort: they run after the transition has
//! committed and a failure is logged, never rolled back.

use async_trait::async_trait;
use tokio::sync::broadcast;

use crate::domain::SettlementEvent;

#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, event: &SettlementEvent) -> anyhow::Result<()>;
}

/// Writes each event to the structured log
#[derive(Debug, Default, Clone, Copy)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn notify(&self, event: &SettlementEvent) -> anyhow::Result<()> {
        tracing::info!(
            event_id = %event.event_id,
            kind = ?event.kind,
            reference = %event.reference,
            user_id = ?event.user_id.map(|u| u.get()),
            amount = ?event.amount.map(|a| a.to_string()),
            "Settlement event"
        );
        Ok(())
    }
}

/// Fans events out to in-process subscribers (websocket feeds, tests)
#[derive(Clone)]
pub struct BroadcastNotifier {
    sender: broadcast::Sender<SettlementEvent>,
}

impl BroadcastNotifier {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SettlementEvent> {
        self.sender.subscribe()
    }
}

#[async_trait]
impl Notifier for BroadcastNotifier {
    async fn notify(&self, event: &SettlementEvent) -> anyhow::Result<()> {
        // No subscribers is not an error
        let _ = self.sender.send(event.clone());
        Ok(())
    }
}

/// Hand an event to the notifier, swallowing and logging any failure
pub async fn dispatch(notifier: &dyn Notifier, event: SettlementEvent) {
    if let Err(e) = notifier.notify(&event).await {
        tracing::warn!(
            error = %e,
            event_id = %event.event_id,
            kind = ?event.kind,
            "Notification failed"
        );
        metrics::counter!("notification_failures_total").increment(1);
    }
}
