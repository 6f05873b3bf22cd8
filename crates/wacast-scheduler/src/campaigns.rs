//! Campaign lifecycle: start, pause, stop, reset, and restart recovery.
//!
//! One `CampaignState` per active campaign, shared by all of its account
//! workers. The running flag is a `watch` channel so sleeping workers wake
//! promptly on pause/stop instead of finishing their delay first. In-flight
//! sends are never aborted: shutdown waits for workers to drain.

use std::collections::HashMap;
use std::sync::Mutex as StdMutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use chrono::{Duration as ChronoDuration, Local, NaiveDate, Timelike, Utc};
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;

use wacast_core::config::SchedulerConfig;
use wacast_core::error::Result;
use wacast_core::traits::{MessageTransport, Store};
use wacast_core::types::CampaignStatus;

use crate::counter::DailyCounter;
use crate::notify::EventBus;
use crate::queue::ContactClaimQueue;
use crate::window;
use crate::worker::AccountWorker;

/// Shared per-campaign runtime state.
pub struct CampaignState {
    running_tx: watch::Sender<bool>,
    counter: StdMutex<DailyCounter>,
    active_workers: AtomicUsize,
}

impl CampaignState {
    fn new(counter: DailyCounter) -> Self {
        let (running_tx, _) = watch::channel(true);
        Self {
            running_tx,
            counter: StdMutex::new(counter),
            active_workers: AtomicUsize::new(0),
        }
    }

    pub fn is_running(&self) -> bool {
        *self.running_tx.borrow()
    }

    /// Flip the running flag off, waking every sleeping worker.
    pub fn shutdown(&self) {
        let _ = self.running_tx.send(false);
    }

    pub(crate) fn subscribe_running(&self) -> watch::Receiver<bool> {
        self.running_tx.subscribe()
    }

    pub fn sent_today(&self, account_id: i64) -> u32 {
        self.counter.lock().unwrap_or_else(|e| e.into_inner()).get(account_id)
    }

    pub fn record_send(&self, account_id: i64) {
        self.counter.lock().unwrap_or_else(|e| e.into_inner()).increment(account_id);
    }

    pub fn reset_counter_if_new_day(&self, today: NaiveDate) -> bool {
        self.counter
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .reset_if_new_day(today)
    }

    fn counter_snapshot(&self) -> DailyCounter {
        self.counter.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub(crate) fn worker_started(&self) {
        self.active_workers.fetch_add(1, Ordering::SeqCst);
    }

    /// Deregister a worker; returns how many are still active.
    pub(crate) fn worker_finished(&self) -> usize {
        self.active_workers.fetch_sub(1, Ordering::SeqCst) - 1
    }

    pub fn active_workers(&self) -> usize {
        self.active_workers.load(Ordering::SeqCst)
    }
}

struct CampaignRuntime {
    state: Arc<CampaignState>,
    handles: Vec<JoinHandle<()>>,
}

/// Orchestrates account workers over active campaigns.
pub struct CampaignScheduler {
    store: Arc<dyn Store>,
    transport: Arc<dyn MessageTransport>,
    events: Arc<EventBus>,
    config: SchedulerConfig,
    registry: Mutex<HashMap<i64, CampaignRuntime>>,
}

impl CampaignScheduler {
    pub fn new(
        store: Arc<dyn Store>,
        transport: Arc<dyn MessageTransport>,
        events: Arc<EventBus>,
        config: SchedulerConfig,
    ) -> Self {
        Self {
            store,
            transport,
            events,
            config,
            registry: Mutex::new(HashMap::new()),
        }
    }

    pub fn events(&self) -> Arc<EventBus> {
        self.events.clone()
    }

    pub async fn is_active(&self, campaign_id: i64) -> bool {
        self.registry
            .lock()
            .await
            .get(&campaign_id)
            .is_some_and(|rt| rt.state.is_running() && rt.state.active_workers() > 0)
    }

    #[cfg(test)]
    pub(crate) async fn registered(&self, campaign_id: i64) -> bool {
        self.registry.lock().await.contains_key(&campaign_id)
    }

    #[cfg(test)]
    pub(crate) async fn campaign_state(&self, campaign_id: i64) -> Option<Arc<CampaignState>> {
        self.registry
            .lock()
            .await
            .get(&campaign_id)
            .map(|rt| rt.state.clone())
    }

    /// Spawn one worker per participating account. Idempotent: a second call
    /// while the campaign is active is a no-op. Restarting a paused campaign
    /// carries its same-day counters over so the daily cap survives the pause.
    /// Stopped and completed campaigns are terminal and never restarted here;
    /// rerunning one goes through `reset_campaign` first.
    pub async fn start_campaign(self: &Arc<Self>, campaign_id: i64) -> Result<()> {
        let mut registry = self.registry.lock().await;
        if let Some(rt) = registry.get(&campaign_id) {
            if rt.state.is_running() && rt.state.active_workers() > 0 {
                tracing::debug!("Campaign {campaign_id} already active, ignoring start");
                return Ok(());
            }
        }

        let Some(campaign) = self.store.get_campaign(campaign_id).await? else {
            tracing::warn!("Campaign {campaign_id} not found, nothing to start");
            return Ok(());
        };
        if matches!(
            campaign.status,
            CampaignStatus::Stopped | CampaignStatus::Completed
        ) {
            tracing::warn!(
                "Campaign {campaign_id} is {}, refusing to start",
                campaign.status.as_str()
            );
            return Ok(());
        }
        let accounts = self.store.list_participating_accounts(campaign_id).await?;
        if accounts.is_empty() {
            tracing::warn!("Campaign {campaign_id} has no participating accounts, not starting");
            return Ok(());
        }

        let counter = match registry.remove(&campaign_id) {
            Some(mut old) => {
                old.state.shutdown();
                for handle in old.handles.drain(..) {
                    let _ = handle.await;
                }
                old.state.counter_snapshot()
            }
            None => DailyCounter::new(Local::now().date_naive()),
        };
        let state = Arc::new(CampaignState::new(counter));

        self.store
            .set_campaign_status(campaign_id, CampaignStatus::Running)
            .await?;

        let queue = ContactClaimQueue::new(self.store.clone());
        let mut handles = Vec::with_capacity(accounts.len());
        for account_id in &accounts {
            state.worker_started();
            let worker = AccountWorker::new(
                campaign_id,
                *account_id,
                self.store.clone(),
                self.transport.clone(),
                queue.clone(),
                self.events.clone(),
                state.clone(),
                self.config.clone(),
            );
            handles.push(tokio::spawn(worker.run()));
            tracing::info!("📤 Campaign {campaign_id}: worker spawned for account {account_id}");
        }
        registry.insert(campaign_id, CampaignRuntime { state: state.clone(), handles });

        // Drop the registry entry once the workers complete the campaign,
        // so long uptimes do not accumulate finished runs. Pause keeps the
        // entry (counters carry over) and stop removes it itself.
        let scheduler = Arc::clone(self);
        tokio::spawn(async move {
            let mut running = state.subscribe_running();
            while *running.borrow() {
                if running.changed().await.is_err() {
                    break;
                }
            }
            let completed = matches!(
                scheduler.store.get_campaign(campaign_id).await,
                Ok(Some(c)) if c.status == CampaignStatus::Completed
            );
            if completed {
                let mut registry = scheduler.registry.lock().await;
                if registry
                    .get(&campaign_id)
                    .is_some_and(|rt| Arc::ptr_eq(&rt.state, &state))
                {
                    registry.remove(&campaign_id);
                }
            }
        });

        if let Err(e) = self
            .store
            .record_activity(
                "campaign_started",
                &format!("Campaign '{}' started with {} account(s)", campaign.name, accounts.len()),
                Some(campaign_id),
            )
            .await
        {
            tracing::warn!("Failed to record start activity: {e}");
        }
        Ok(())
    }

    /// Stop sending but keep the runtime entry so same-day counters survive
    /// a later restart. Contacts keep their statuses.
    pub async fn pause_campaign(&self, campaign_id: i64) -> Result<()> {
        {
            let mut registry = self.registry.lock().await;
            match registry.get_mut(&campaign_id) {
                Some(rt) => {
                    rt.state.shutdown();
                    for handle in rt.handles.drain(..) {
                        let _ = handle.await;
                    }
                }
                None => tracing::debug!("Campaign {campaign_id} not active, pausing status only"),
            }
        }
        self.store
            .set_campaign_status(campaign_id, CampaignStatus::Paused)
            .await?;
        tracing::info!("⏸️ Campaign {campaign_id} paused");
        if let Err(e) = self
            .store
            .record_activity("campaign_paused", "Campaign paused", Some(campaign_id))
            .await
        {
            tracing::warn!("Failed to record pause activity: {e}");
        }
        Ok(())
    }

    /// Terminal stop: drain workers, drop the runtime entry, persist Stopped.
    pub async fn stop_campaign(&self, campaign_id: i64) -> Result<()> {
        if let Some(mut rt) = self.registry.lock().await.remove(&campaign_id) {
            rt.state.shutdown();
            for handle in rt.handles.drain(..) {
                let _ = handle.await;
            }
        }
        self.store
            .set_campaign_status(campaign_id, CampaignStatus::Stopped)
            .await?;
        tracing::info!("⏹️ Campaign {campaign_id} stopped");
        if let Err(e) = self
            .store
            .record_activity("campaign_stopped", "Campaign stopped", Some(campaign_id))
            .await
        {
            tracing::warn!("Failed to record stop activity: {e}");
        }
        Ok(())
    }

    /// Stop, revert every contact to pending, and return the campaign to
    /// Draft so it can be rerun from scratch.
    pub async fn reset_campaign(&self, campaign_id: i64) -> Result<()> {
        self.stop_campaign(campaign_id).await?;
        self.store.reset_campaign_contacts(campaign_id).await?;
        self.store
            .set_campaign_status(campaign_id, CampaignStatus::Draft)
            .await?;
        tracing::info!("🔄 Campaign {campaign_id} reset to draft");
        if let Err(e) = self
            .store
            .record_activity("campaign_reset", "Campaign reset to draft", Some(campaign_id))
            .await
        {
            tracing::warn!("Failed to record reset activity: {e}");
        }
        Ok(())
    }

    /// Restart recovery: pick up campaigns that were Running when the process
    /// died. Stale ones are paused for operator review, in-window ones start
    /// immediately, out-of-window ones are deferred to the next window open.
    pub async fn resume_running_campaigns(self: &Arc<Self>) -> Result<()> {
        let campaigns = self
            .store
            .list_campaigns_with_status(CampaignStatus::Running)
            .await?;
        if campaigns.is_empty() {
            return Ok(());
        }
        tracing::info!("Found {} campaign(s) to resume after restart", campaigns.len());

        let max_age = ChronoDuration::days(self.config.resume_max_age_days);
        for campaign in campaigns {
            if let Some(started) = campaign.started_at {
                if Utc::now() - started > max_age {
                    tracing::warn!(
                        "Campaign {} started {} which is over {} days ago, pausing instead of resuming",
                        campaign.id,
                        started.to_rfc3339(),
                        self.config.resume_max_age_days
                    );
                    self.store
                        .set_campaign_status(campaign.id, CampaignStatus::Paused)
                        .await?;
                    if let Err(e) = self
                        .store
                        .record_activity(
                            "campaign_stale",
                            &format!(
                                "Campaign '{}' paused at startup: running since {}",
                                campaign.name,
                                started.to_rfc3339()
                            ),
                            Some(campaign.id),
                        )
                        .await
                    {
                        tracing::warn!("Failed to record stale activity: {e}");
                    }
                    continue;
                }
            }

            let now = Local::now();
            if window::is_within_window(now.hour(), campaign.start_hour, campaign.end_hour) {
                self.start_campaign(campaign.id).await?;
                if let Err(e) = self
                    .store
                    .record_activity(
                        "campaign_resumed",
                        &format!("Campaign '{}' auto-resumed after restart", campaign.name),
                        Some(campaign.id),
                    )
                    .await
                {
                    tracing::warn!("Failed to record resume activity: {e}");
                }
            } else {
                let next = window::next_window_start(now, campaign.start_hour, campaign.end_hour);
                let wait = (next - now).to_std().unwrap_or_default();
                tracing::info!(
                    "Campaign {} is outside its sending window, deferring resume until {}",
                    campaign.id,
                    next.to_rfc3339()
                );
                if let Err(e) = self
                    .store
                    .record_activity(
                        "campaign_resumed",
                        &format!(
                            "Campaign '{}' auto-resumed, waiting for window at {}",
                            campaign.name,
                            next.to_rfc3339()
                        ),
                        Some(campaign.id),
                    )
                    .await
                {
                    tracing::warn!("Failed to record resume activity: {e}");
                }
                let scheduler = Arc::clone(self);
                let id = campaign.id;
                tokio::spawn(async move {
                    tokio::time::sleep(wait).await;
                    // The operator may have paused or stopped the campaign
                    // while the timer was armed.
                    match scheduler.store.get_campaign(id).await {
                        Ok(Some(c)) if c.status == CampaignStatus::Running => {
                            if let Err(e) = scheduler.start_campaign(id).await {
                                tracing::error!("Deferred resume of campaign {id} failed: {e}");
                            }
                        }
                        Ok(_) => {
                            tracing::info!(
                                "Campaign {id} is no longer running, skipping deferred resume"
                            );
                        }
                        Err(e) => {
                            tracing::error!("Deferred resume check for campaign {id} failed: {e}");
                        }
                    }
                });
            }
        }
        Ok(())
    }

    /// Long-lived task that clears per-account daily counters shortly after
    /// local midnight. Workers also reset lazily at cycle start, so this only
    /// matters for counters nobody is cycling on.
    pub fn spawn_midnight_reset(self: &Arc<Self>) -> JoinHandle<()> {
        let scheduler = Arc::clone(self);
        tokio::spawn(async move {
            loop {
                let now = Local::now();
                let next_midnight = window::tomorrow_at_hour(now, 0);
                let wait = (next_midnight - now)
                    .to_std()
                    .unwrap_or(std::time::Duration::from_secs(60));
                tokio::time::sleep(wait).await;
                let today = Local::now().date_naive();
                let registry = scheduler.registry.lock().await;
                for (id, rt) in registry.iter() {
                    if rt.state.reset_counter_if_new_day(today) {
                        tracing::info!("Campaign {id}: daily counters reset at midnight");
                    }
                }
            }
        })
    }
}
