//! Per-account send loop. One worker per (campaign, account) pair.
//!
//! Each cycle re-reads the campaign, gates on the hour window and daily cap,
//! claims one contact and delivers it. Delays go through `tokio::select!`
//! against the running flag so pause/stop wake the worker immediately; a
//! send already in flight is always allowed to finish.

use std::sync::Arc;
use std::time::Duration;

use chrono::{Local, Timelike, Utc};
use rand::Rng;

use wacast_core::config::SchedulerConfig;
use wacast_core::error::Result;
use wacast_core::traits::{MessageTransport, Store};
use wacast_core::types::{Campaign, CampaignContact, CampaignEvent, CampaignStatus, ContactStatus};

use crate::campaigns::CampaignState;
use crate::failure::{self, FailureKind};
use crate::notify::EventBus;
use crate::queue::{Claim, ContactClaimQueue};
use crate::template;

enum Wake {
    /// Sleep this long (interruptible by shutdown), then cycle again.
    After(Duration),
    /// No claimable work left anywhere in the campaign.
    Exhausted,
    /// Campaign gone, no longer Running, or shutdown observed.
    Exit,
}

pub struct AccountWorker {
    campaign_id: i64,
    account_id: i64,
    store: Arc<dyn Store>,
    transport: Arc<dyn MessageTransport>,
    queue: ContactClaimQueue,
    events: Arc<EventBus>,
    state: Arc<CampaignState>,
    pacing: SchedulerConfig,
}

impl AccountWorker {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        campaign_id: i64,
        account_id: i64,
        store: Arc<dyn Store>,
        transport: Arc<dyn MessageTransport>,
        queue: ContactClaimQueue,
        events: Arc<EventBus>,
        state: Arc<CampaignState>,
        pacing: SchedulerConfig,
    ) -> Self {
        Self {
            campaign_id,
            account_id,
            store,
            transport,
            queue,
            events,
            state,
            pacing,
        }
    }

    pub(crate) async fn run(self) {
        let mut running = self.state.subscribe_running();
        let reason = loop {
            if !self.state.is_running() {
                break Wake::Exit;
            }
            match self.cycle().await {
                Wake::After(delay) => {
                    tokio::select! {
                        _ = running.changed() => {}
                        _ = tokio::time::sleep(delay) => {}
                    }
                }
                other => break other,
            }
        };

        let remaining = self.state.worker_finished();
        tracing::debug!(
            "Campaign {} worker for account {} exited, {} still active",
            self.campaign_id,
            self.account_id,
            remaining
        );

        // The last worker to find the queue empty completes the campaign.
        if matches!(reason, Wake::Exhausted) && remaining == 0 && self.state.is_running() {
            self.complete_campaign().await;
        }
    }

    async fn complete_campaign(&self) {
        // Persist before flipping the running flag: observers woken by the
        // flag must already see the terminal status.
        if let Err(e) = self
            .store
            .set_campaign_status(self.campaign_id, CampaignStatus::Completed)
            .await
        {
            tracing::error!("Failed to mark campaign {} completed: {e}", self.campaign_id);
            self.state.shutdown();
            return;
        }
        tracing::info!("✅ Campaign {} completed", self.campaign_id);
        if let Err(e) = self
            .store
            .record_activity("campaign_completed", "Campaign completed", Some(self.campaign_id))
            .await
        {
            tracing::warn!("Failed to record completion activity: {e}");
        }
        self.events.emit(CampaignEvent::Completed {
            campaign_id: self.campaign_id,
        });
        self.state.shutdown();
    }

    async fn cycle(&self) -> Wake {
        let campaign = match self.store.get_campaign(self.campaign_id).await {
            Ok(Some(c)) => c,
            Ok(None) => {
                tracing::warn!("Campaign {} disappeared, worker exiting", self.campaign_id);
                return Wake::Exit;
            }
            Err(e) => {
                tracing::warn!("Campaign {} load failed: {e}", self.campaign_id);
                return Wake::After(self.retry_delay());
            }
        };
        if campaign.status != CampaignStatus::Running {
            return Wake::Exit;
        }

        let now = Local::now();
        if !crate::window::is_within_window(now.hour(), campaign.start_hour, campaign.end_hour) {
            let next = crate::window::next_window_start(now, campaign.start_hour, campaign.end_hour);
            tracing::debug!(
                "Campaign {} outside window ({}-{}h), sleeping until {}",
                self.campaign_id,
                campaign.start_hour,
                campaign.end_hour,
                next.to_rfc3339()
            );
            return Wake::After((next - now).to_std().unwrap_or_default());
        }

        self.state.reset_counter_if_new_day(now.date_naive());

        match self.send_cycle(&campaign).await {
            Ok(wake) => wake,
            Err(e) => {
                tracing::warn!(
                    "Campaign {} account {}: send cycle error: {e}",
                    self.campaign_id,
                    self.account_id
                );
                Wake::After(self.retry_delay())
            }
        }
    }

    async fn send_cycle(&self, campaign: &Campaign) -> Result<Wake> {
        if self.state.sent_today(self.account_id) >= campaign.max_messages_per_day {
            let now = Local::now();
            let next = crate::window::tomorrow_at_hour(now, campaign.start_hour);
            tracing::debug!(
                "Campaign {} account {} hit the daily cap of {}, sleeping until {}",
                self.campaign_id,
                self.account_id,
                campaign.max_messages_per_day,
                next.to_rfc3339()
            );
            return Ok(Wake::After((next - now).to_std().unwrap_or_default()));
        }

        if !self.transport.is_connected(self.account_id) {
            // This account's session may be holding claims; free its own
            // rows so other accounts can pick them up, then recheck later.
            // Claims held by other accounts are left alone.
            let released = self
                .store
                .release_stuck_sending_contacts(self.campaign_id, self.account_id)
                .await?;
            if released > 0 {
                tracing::info!(
                    "Campaign {}: account {} released {} of its stuck sending contact(s)",
                    self.campaign_id,
                    self.account_id,
                    released
                );
            }
            return Ok(Wake::After(self.paced_delay(campaign)));
        }

        match self.queue.claim_next(self.campaign_id, self.account_id).await? {
            Claim::Empty => Ok(Wake::Exhausted),
            Claim::RetryLater => Ok(Wake::After(Duration::from_secs(self.pacing.stuck_recheck_secs))),
            Claim::Contact(contact) => self.deliver(campaign, contact).await,
        }
    }

    async fn deliver(&self, campaign: &Campaign, contact: CampaignContact) -> Result<Wake> {
        let text = template::render(
            &campaign.message,
            contact.name.as_deref(),
            &contact.phone_number,
        );
        let outcome = match &campaign.media {
            Some(media) => {
                let caption = media.caption.as_deref().unwrap_or(&text);
                self.transport
                    .send_media(self.account_id, &contact.phone_number, &media.path, caption)
                    .await
            }
            None => {
                self.transport
                    .send_text(self.account_id, &contact.phone_number, &text)
                    .await
            }
        };

        match outcome {
            Ok(()) => {
                let at = Utc::now();
                self.store
                    .mark_contact_sent(contact.id, self.account_id, at)
                    .await?;
                self.state.record_send(self.account_id);
                if let Err(e) = self
                    .store
                    .increment_daily_sent_stat(&at.format("%Y-%m-%d").to_string())
                    .await
                {
                    tracing::warn!("Failed to bump daily sent stat: {e}");
                }
                tracing::info!(
                    "Campaign {} account {}: sent to {}",
                    self.campaign_id,
                    self.account_id,
                    contact.phone_number
                );
                self.events.emit(CampaignEvent::Progress {
                    campaign_id: self.campaign_id,
                    contact_id: contact.id,
                    status: ContactStatus::Sent,
                    account_id: Some(self.account_id),
                    error: None,
                });
                Ok(Wake::After(self.paced_delay(campaign)))
            }
            Err(e) => {
                let error_text = e.to_string();
                match failure::classify(&error_text) {
                    FailureKind::Permanent => {
                        tracing::warn!(
                            "Campaign {} contact {}: permanent failure: {}",
                            self.campaign_id,
                            contact.phone_number,
                            error_text
                        );
                        self.store.mark_contact_failed(contact.id, &error_text).await?;
                        if failure::disables_account(&error_text) {
                            self.transport.set_connected(self.account_id, false);
                            tracing::warn!(
                                "Account {} taken out of rotation: {}",
                                self.account_id,
                                error_text
                            );
                        }
                        self.events.emit(CampaignEvent::Progress {
                            campaign_id: self.campaign_id,
                            contact_id: contact.id,
                            status: ContactStatus::Failed,
                            account_id: Some(self.account_id),
                            error: Some(error_text),
                        });
                    }
                    FailureKind::Transient => {
                        tracing::debug!(
                            "Campaign {} contact {}: transient failure, will retry: {}",
                            self.campaign_id,
                            contact.phone_number,
                            error_text
                        );
                        self.store.mark_contact_pending(contact.id).await?;
                        self.events.emit(CampaignEvent::Progress {
                            campaign_id: self.campaign_id,
                            contact_id: contact.id,
                            status: ContactStatus::Pending,
                            account_id: Some(self.account_id),
                            error: Some(error_text),
                        });
                    }
                }
                Ok(Wake::After(self.retry_delay()))
            }
        }
    }

    /// Uniform delay between successful sends, humanizing the cadence.
    fn paced_delay(&self, campaign: &Campaign) -> Duration {
        let lo = campaign.min_delay_secs.min(campaign.max_delay_secs);
        let hi = campaign.min_delay_secs.max(campaign.max_delay_secs);
        Duration::from_secs(u64::from(rand::thread_rng().gen_range(lo..=hi)))
    }

    fn retry_delay(&self) -> Duration {
        let lo = self.pacing.retry_delay_min_secs;
        let hi = self.pacing.retry_delay_max_secs.max(lo);
        Duration::from_secs(rand::thread_rng().gen_range(lo..=hi))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::campaigns::CampaignScheduler;
    use crate::notify::EventBus;
    use crate::testing::{MemoryStore, MockTransport};
    use wacast_core::types::MediaAttachment;

    fn scheduler_with(
        store: Arc<MemoryStore>,
        transport: Arc<MockTransport>,
    ) -> Arc<CampaignScheduler> {
        Arc::new(CampaignScheduler::new(
            store,
            transport,
            Arc::new(EventBus::new()),
            SchedulerConfig::default(),
        ))
    }

    fn campaign_template() -> Campaign {
        Campaign {
            id: 0,
            name: "w".into(),
            message: "Hi {{name}}".into(),
            status: CampaignStatus::Draft,
            min_delay_secs: 1,
            max_delay_secs: 1,
            max_messages_per_day: 1000,
            start_hour: 0,
            end_hour: 24,
            media: None,
            scheduled_start_at: None,
            started_at: None,
            completed_at: None,
            created_at: Utc::now(),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn daily_cap_stops_sending_for_the_day() {
        let store = Arc::new(MemoryStore::new());
        let transport = Arc::new(MockTransport::new());
        let mut campaign = campaign_template();
        campaign.max_messages_per_day = 2;
        let id = store.add_campaign(campaign, &[1]);
        for i in 0..5 {
            store.add_contact(id, &format!("555{i:03}"), None);
        }

        let scheduler = scheduler_with(store.clone(), transport.clone());
        scheduler.start_campaign(id).await.unwrap();
        tokio::time::sleep(std::time::Duration::from_secs(120)).await;

        assert_eq!(transport.sent_count(), 2);
        // Not completed: contacts remain for tomorrow.
        assert_eq!(store.campaign(id).status, CampaignStatus::Running);
        let pending = store
            .contacts_of(id)
            .iter()
            .filter(|c| c.status == ContactStatus::Pending)
            .count();
        assert_eq!(pending, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn window_gate_defers_sending() {
        let store = Arc::new(MemoryStore::new());
        let transport = Arc::new(MockTransport::new());
        let mut campaign = campaign_template();
        // A one-hour window that never contains the current hour.
        let excluded = (Local::now().hour() + 2) % 24;
        campaign.start_hour = excluded;
        campaign.end_hour = excluded + 1;
        let id = store.add_campaign(campaign, &[1]);
        store.add_contact(id, "555001", None);

        let scheduler = scheduler_with(store.clone(), transport.clone());
        scheduler.start_campaign(id).await.unwrap();
        tokio::time::sleep(std::time::Duration::from_secs(30)).await;

        assert_eq!(transport.sent_count(), 0);
        assert_eq!(
            store.contact_by_phone(id, "555001").status,
            ContactStatus::Pending
        );
    }

    #[tokio::test(start_paused = true)]
    async fn permanent_failure_marks_contact_failed() {
        let store = Arc::new(MemoryStore::new());
        let transport = Arc::new(MockTransport::new());
        let id = store.add_campaign(campaign_template(), &[1]);
        store.add_contact(id, "555001", None);
        store.add_contact(id, "555002", None);
        transport.fail_always("555001", "recipient is not registered on whatsapp");

        let scheduler = scheduler_with(store.clone(), transport.clone());
        scheduler.start_campaign(id).await.unwrap();
        tokio::time::sleep(std::time::Duration::from_secs(300)).await;

        let failed = store.contact_by_phone(id, "555001");
        assert_eq!(failed.status, ContactStatus::Failed);
        assert!(failed.error.unwrap().contains("not registered"));
        assert_eq!(store.contact_by_phone(id, "555002").status, ContactStatus::Sent);
        assert_eq!(store.campaign(id).status, CampaignStatus::Completed);
    }

    #[tokio::test(start_paused = true)]
    async fn transient_failure_retries_and_succeeds() {
        let store = Arc::new(MemoryStore::new());
        let transport = Arc::new(MockTransport::new());
        let id = store.add_campaign(campaign_template(), &[1]);
        store.add_contact(id, "555001", None);
        transport.fail_once("555001", "rate limit hit, try again later");

        let scheduler = scheduler_with(store.clone(), transport.clone());
        scheduler.start_campaign(id).await.unwrap();
        tokio::time::sleep(std::time::Duration::from_secs(300)).await;

        assert_eq!(store.contact_by_phone(id, "555001").status, ContactStatus::Sent);
        assert_eq!(transport.sent_count(), 1);
        assert_eq!(store.campaign(id).status, CampaignStatus::Completed);
    }

    #[tokio::test(start_paused = true)]
    async fn ban_disables_account_and_other_account_finishes() {
        let store = Arc::new(MemoryStore::new());
        let transport = Arc::new(MockTransport::new());
        let id = store.add_campaign(campaign_template(), &[1, 2]);
        store.add_contact(id, "555001", None);
        store.add_contact(id, "555002", None);
        store.add_contact(id, "555003", None);
        // Whichever account reaches this contact first gets banned.
        transport.fail_once("555001", "account has been banned");

        let scheduler = scheduler_with(store.clone(), transport.clone());
        scheduler.start_campaign(id).await.unwrap();
        tokio::time::sleep(std::time::Duration::from_secs(600)).await;

        assert!(!transport.is_connected(1) || !transport.is_connected(2));
        assert_eq!(store.contact_by_phone(id, "555001").status, ContactStatus::Failed);
        assert_eq!(store.contact_by_phone(id, "555002").status, ContactStatus::Sent);
        assert_eq!(store.contact_by_phone(id, "555003").status, ContactStatus::Sent);
    }

    #[tokio::test(start_paused = true)]
    async fn disconnected_account_releases_stuck_rows() {
        let store = Arc::new(MemoryStore::new());
        let transport = Arc::new(MockTransport::new());
        let id = store.add_campaign(campaign_template(), &[1]);
        let stuck = store.add_contact(id, "555001", None);
        // A stale claim left over from this account's previous session.
        store.force_contact_status(stuck, ContactStatus::Sending, Some(1));
        transport.set_connected(1, false);

        let scheduler = scheduler_with(store.clone(), transport.clone());
        scheduler.start_campaign(id).await.unwrap();
        tokio::time::sleep(std::time::Duration::from_secs(5)).await;

        // Row freed but nothing sent while offline.
        assert_eq!(
            store.contact_by_phone(id, "555001").status,
            ContactStatus::Pending
        );
        assert_eq!(transport.sent_count(), 0);

        // Reconnect: sending proceeds to completion.
        transport.set_connected(1, true);
        tokio::time::sleep(std::time::Duration::from_secs(30)).await;
        assert_eq!(store.contact_by_phone(id, "555001").status, ContactStatus::Sent);
        assert_eq!(store.campaign(id).status, CampaignStatus::Completed);
    }

    #[tokio::test(start_paused = true)]
    async fn disconnected_account_leaves_other_claims_alone() {
        let store = Arc::new(MemoryStore::new());
        let transport = Arc::new(MockTransport::new());
        let id = store.add_campaign(campaign_template(), &[2]);
        // Account 1 is mid-send on this contact.
        let in_flight = store.add_contact(id, "555001", None);
        store.force_contact_status(in_flight, ContactStatus::Sending, Some(1));
        transport.set_connected(2, false);

        let scheduler = scheduler_with(store.clone(), transport.clone());
        scheduler.start_campaign(id).await.unwrap();
        tokio::time::sleep(std::time::Duration::from_secs(60)).await;

        // Account 2's offline cleanup must not release the row, or a third
        // account could re-claim it and deliver the same contact twice.
        let contact = store.contact_by_phone(id, "555001");
        assert_eq!(contact.status, ContactStatus::Sending);
        assert_eq!(contact.sent_by_account_id, Some(1));
        assert_eq!(transport.sent_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn media_campaign_sends_attachment_with_caption() {
        let store = Arc::new(MemoryStore::new());
        let transport = Arc::new(MockTransport::new());
        let mut campaign = campaign_template();
        campaign.media = Some(MediaAttachment {
            path: "/tmp/promo.jpg".into(),
            kind: "image".into(),
            caption: None,
        });
        let id = store.add_campaign(campaign, &[1]);
        store.add_contact(id, "555001", Some("Ana"));

        let scheduler = scheduler_with(store.clone(), transport.clone());
        scheduler.start_campaign(id).await.unwrap();
        tokio::time::sleep(std::time::Duration::from_secs(30)).await;

        let sent = transport.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].media_path.as_deref(), Some("/tmp/promo.jpg"));
        // Caption falls back to the rendered message text.
        assert_eq!(sent[0].body, "Hi Ana");
    }
}
