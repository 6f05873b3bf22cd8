//! Capability traits consumed by the scheduler.
//!
//! The scheduler never touches SQL or the wire directly: it is written
//! against `Store` (durable campaign/contact state) and `MessageTransport`
//! (per-account connectivity + send). Both are object-safe so they can be
//! injected as `Arc<dyn ...>` and replaced with in-memory doubles in tests.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::Result;
use crate::types::{Campaign, CampaignContact, CampaignStatus};

/// Durable campaign/contact/account state.
#[async_trait]
pub trait Store: Send + Sync {
    async fn get_campaign(&self, id: i64) -> Result<Option<Campaign>>;

    /// Account ids bound to the campaign. Read once at campaign start.
    async fn list_participating_accounts(&self, campaign_id: i64) -> Result<Vec<i64>>;

    /// Atomically claim one pending, non-blacklisted contact for `account_id`
    /// by transitioning it `pending → sending`. At most one claimant per row:
    /// the implementation must make the select-and-update a single atomic
    /// operation, never a read-then-write.
    async fn claim_next_pending_contact(
        &self,
        campaign_id: i64,
        account_id: i64,
    ) -> Result<Option<CampaignContact>>;

    async fn mark_contact_sent(
        &self,
        contact_id: i64,
        account_id: i64,
        at: DateTime<Utc>,
    ) -> Result<()>;

    async fn mark_contact_failed(&self, contact_id: i64, error: &str) -> Result<()>;

    /// Release a claim: revert the contact to `pending` for retry.
    async fn mark_contact_pending(&self, contact_id: i64) -> Result<()>;

    /// Revert `sending` rows claimed by `account_id` back to `pending`.
    /// Used when that account went offline mid-flight. Scoped to the one
    /// account so another worker's in-flight claim is never released out
    /// from under it. Returns the number released.
    async fn release_stuck_sending_contacts(&self, campaign_id: i64, account_id: i64)
    -> Result<u64>;

    async fn count_stuck_sending(&self, campaign_id: i64) -> Result<u64>;

    async fn count_blacklisted_pending(&self, campaign_id: i64) -> Result<u64>;

    /// Mark every blacklisted pending contact `failed` with the error
    /// "Contact in BlackList". Idempotent cleanup pass.
    async fn fail_all_blacklisted_pending(&self, campaign_id: i64) -> Result<u64>;

    /// Persist a status change, applying the timestamp policy:
    /// Running stamps `started_at` if unset, Stopped/Completed stamp
    /// `completed_at`, Draft clears both, Paused touches neither.
    async fn set_campaign_status(&self, id: i64, status: CampaignStatus) -> Result<()>;

    /// Bulk-revert every contact of the campaign to `pending`, clearing
    /// sent_by/sent_at/error. The only wholesale contact rewrite.
    async fn reset_campaign_contacts(&self, campaign_id: i64) -> Result<()>;

    async fn list_campaigns_with_status(&self, status: CampaignStatus) -> Result<Vec<Campaign>>;

    /// Draft campaigns whose `scheduled_start_at` is non-null and ≤ `now`.
    async fn due_scheduled_campaigns(&self, now: DateTime<Utc>) -> Result<Vec<Campaign>>;

    async fn record_activity(&self, kind: &str, message: &str, related_id: Option<i64>)
    -> Result<()>;

    /// Bump the global sent counter for the given date key (YYYY-MM-DD).
    async fn increment_daily_sent_stat(&self, date_key: &str) -> Result<()>;
}

/// Per-account connection handle to the messaging network.
///
/// Connectivity is a polled query, not an event stream: the scheduler asks
/// `is_connected` at each cycle and stays decoupled from session wiring.
#[async_trait]
pub trait MessageTransport: Send + Sync {
    fn is_connected(&self, account_id: i64) -> bool;

    /// Force the connectivity flag. The worker uses this to take a banned
    /// account out of rotation for every campaign at once.
    fn set_connected(&self, account_id: i64, connected: bool);

    async fn send_text(&self, account_id: i64, to: &str, text: &str) -> Result<()>;

    async fn send_media(
        &self,
        account_id: i64,
        to: &str,
        path: &str,
        caption: &str,
    ) -> Result<()>;
}
