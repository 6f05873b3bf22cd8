//! Periodic poller that launches campaigns whose scheduled start time has
//! arrived. One-shot semantics: a due campaign gets exactly one launch
//! attempt, and is stopped if that attempt does not leave it Running, so a
//! misconfigured campaign cannot be retried every tick forever.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::task::JoinHandle;

use wacast_core::traits::Store;
use wacast_core::types::CampaignStatus;

use crate::campaigns::CampaignScheduler;

pub struct ScheduledCampaignChecker {
    scheduler: Arc<CampaignScheduler>,
    store: Arc<dyn Store>,
    interval: Duration,
}

impl ScheduledCampaignChecker {
    pub fn new(scheduler: Arc<CampaignScheduler>, store: Arc<dyn Store>, interval_secs: u64) -> Self {
        Self {
            scheduler,
            store,
            interval: Duration::from_secs(interval_secs),
        }
    }

    /// Run the poll loop until the task is dropped. The first tick fires
    /// immediately, so campaigns that came due while the process was down
    /// start right away.
    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(self.interval);
            loop {
                ticker.tick().await;
                if let Err(e) = self.check_once().await {
                    tracing::error!("Scheduled campaign check failed: {e}");
                }
            }
        })
    }

    async fn check_once(&self) -> wacast_core::error::Result<()> {
        let due = self.store.due_scheduled_campaigns(Utc::now()).await?;
        for campaign in due {
            tracing::info!(
                "⏰ Campaign {} is due (scheduled for {}), launching",
                campaign.id,
                campaign
                    .scheduled_start_at
                    .map(|at| at.to_rfc3339())
                    .unwrap_or_default()
            );
            if let Err(e) = self.scheduler.start_campaign(campaign.id).await {
                tracing::error!("Failed to launch scheduled campaign {}: {e}", campaign.id);
            }

            // Single launch attempt: a campaign still in Draft afterwards is
            // parked as Stopped rather than re-tried on the next tick.
            match self.store.get_campaign(campaign.id).await? {
                Some(after) if after.status == CampaignStatus::Draft => {
                    tracing::warn!(
                        "Scheduled campaign {} did not start, marking it stopped",
                        campaign.id
                    );
                    self.store
                        .set_campaign_status(campaign.id, CampaignStatus::Stopped)
                        .await?;
                    if let Err(e) = self
                        .store
                        .record_activity(
                            "campaign_schedule_failed",
                            &format!("Scheduled campaign '{}' failed to start", campaign.name),
                            Some(campaign.id),
                        )
                        .await
                    {
                        tracing::warn!("Failed to record schedule failure: {e}");
                    }
                }
                _ => {}
            }
        }
        Ok(())
    }
}
