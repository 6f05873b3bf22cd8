//! Campaign event bus — fire-and-forget progress/completion notifications.
//!
//! Live observers subscribe through a broadcast channel; a bounded in-memory
//! history ring (last 100) serves late-attaching UIs. Emitting never blocks
//! and never fails: a bus with no subscribers simply records history.

use std::collections::VecDeque;
use std::sync::Mutex;

use tokio::sync::broadcast;
use wacast_core::types::CampaignEvent;

const HISTORY_CAP: usize = 100;

/// Broadcast fan-out plus bounded history.
pub struct EventBus {
    tx: broadcast::Sender<CampaignEvent>,
    history: Mutex<VecDeque<CampaignEvent>>,
}

impl EventBus {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(256);
        Self { tx, history: Mutex::new(VecDeque::new()) }
    }

    /// Record and fan out an event. Lossy by design: subscribers that lag
    /// past the channel capacity miss events, the history ring keeps the
    /// most recent 100.
    pub fn emit(&self, event: CampaignEvent) {
        if let Ok(mut history) = self.history.lock() {
            history.push_back(event.clone());
            if history.len() > HISTORY_CAP {
                history.pop_front();
            }
        }
        let _ = self.tx.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<CampaignEvent> {
        self.tx.subscribe()
    }

    /// Snapshot of recent events, oldest first.
    pub fn history(&self) -> Vec<CampaignEvent> {
        self.history
            .lock()
            .map(|h| h.iter().cloned().collect())
            .unwrap_or_default()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wacast_core::types::ContactStatus;

    fn progress(contact_id: i64) -> CampaignEvent {
        CampaignEvent::Progress {
            campaign_id: 1,
            contact_id,
            status: ContactStatus::Sent,
            account_id: Some(1),
            error: None,
        }
    }

    #[tokio::test]
    async fn test_subscriber_receives_events() {
        let bus = EventBus::new();
        let mut rx = bus.subscribe();
        bus.emit(progress(42));
        match rx.recv().await.unwrap() {
            CampaignEvent::Progress { contact_id, .. } => assert_eq!(contact_id, 42),
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[test]
    fn test_emit_without_subscribers_is_fine() {
        let bus = EventBus::new();
        bus.emit(CampaignEvent::Completed { campaign_id: 9 });
        assert_eq!(bus.history().len(), 1);
    }

    #[test]
    fn test_history_ring_capped() {
        let bus = EventBus::new();
        for i in 0..150 {
            bus.emit(progress(i));
        }
        let history = bus.history();
        assert_eq!(history.len(), 100);
        match &history[0] {
            CampaignEvent::Progress { contact_id, .. } => assert_eq!(*contact_id, 50),
            other => panic!("unexpected event: {other:?}"),
        }
    }
}
