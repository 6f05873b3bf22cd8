//! Contact claim queue — the claim/release protocol over pending contacts.
//!
//! Atomicity lives in the store (`claim_next_pending_contact` is a single
//! compare-and-swap style update); this layer adds the blacklist cleanup
//! pass and distinguishes "queue exhausted" from "retry later".

use std::sync::Arc;

use wacast_core::error::Result;
use wacast_core::traits::Store;
use wacast_core::types::CampaignContact;

/// Outcome of one claim attempt.
#[derive(Debug)]
pub enum Claim {
    /// Exclusive claim granted: the contact is now `sending`.
    Contact(CampaignContact),
    /// Nothing claimable right now, but contacts are stuck in `sending`
    /// (their claiming account went offline). Re-poll after a cooldown —
    /// the disconnected-account safety net will release them.
    RetryLater,
    /// No pending work remains for this campaign.
    Empty,
}

/// Claim queue for one store. Cheap to clone per worker.
#[derive(Clone)]
pub struct ContactClaimQueue {
    store: Arc<dyn Store>,
}

impl ContactClaimQueue {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    /// Hand out at most one claimable contact, excluding blacklisted phone
    /// numbers and rows already `sent`/`failed`/`sending`.
    pub async fn claim_next(&self, campaign_id: i64, account_id: i64) -> Result<Claim> {
        if let Some(contact) = self
            .store
            .claim_next_pending_contact(campaign_id, account_id)
            .await?
        {
            return Ok(Claim::Contact(contact));
        }

        // No claimable row. Blacklisted pending rows are unreachable by the
        // claim query; park them as failed so the campaign can terminate.
        if self.store.count_blacklisted_pending(campaign_id).await? > 0 {
            let n = self.store.fail_all_blacklisted_pending(campaign_id).await?;
            tracing::info!(
                "Campaign {}: failed {} blacklisted pending contact(s)",
                campaign_id,
                n
            );
        }

        if self.store.count_stuck_sending(campaign_id).await? > 0 {
            return Ok(Claim::RetryLater);
        }
        Ok(Claim::Empty)
    }
}
