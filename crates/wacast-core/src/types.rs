//! Campaign data model — the entities the scheduler and store exchange.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Campaign lifecycle status.
///
/// Transitions are monotone within one run:
/// draft → running → {paused ↔ running} → {stopped | completed}.
/// Only `reset` returns a campaign to draft.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CampaignStatus {
    Draft,
    Running,
    Paused,
    Stopped,
    Completed,
}

impl CampaignStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CampaignStatus::Draft => "draft",
            CampaignStatus::Running => "running",
            CampaignStatus::Paused => "paused",
            CampaignStatus::Stopped => "stopped",
            CampaignStatus::Completed => "completed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "draft" => Some(CampaignStatus::Draft),
            "running" => Some(CampaignStatus::Running),
            "paused" => Some(CampaignStatus::Paused),
            "stopped" => Some(CampaignStatus::Stopped),
            "completed" => Some(CampaignStatus::Completed),
            _ => None,
        }
    }
}

/// Optional media attached to a campaign message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MediaAttachment {
    /// Local file path of the media.
    pub path: String,
    /// Media kind: "image", "video", "document".
    pub kind: String,
    /// Explicit caption. When absent the rendered message text is used.
    pub caption: Option<String>,
}

/// A bulk-messaging campaign.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Campaign {
    pub id: i64,
    pub name: String,
    /// Message template. Supports `{{name}}` and `{{phone}}` placeholders.
    pub message: String,
    pub status: CampaignStatus,
    /// Inclusive lower bound of the randomized per-send delay, in seconds.
    pub min_delay_secs: u32,
    /// Inclusive upper bound of the randomized per-send delay, in seconds.
    pub max_delay_secs: u32,
    /// Per-account daily send cap.
    pub max_messages_per_day: u32,
    /// Working window start hour (0–23). The window is `[start, end)`.
    pub start_hour: u32,
    /// Working window end hour. `start=0, end=24` means always on.
    pub end_hour: u32,
    pub media: Option<MediaAttachment>,
    /// When set on a draft campaign, the checker promotes it at this time.
    pub scheduled_start_at: Option<DateTime<Utc>>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

/// Delivery status of one contact within a campaign.
///
/// `Sending` is a transient claim state: it grants one worker exclusive
/// rights to attempt delivery and must never persist as a terminal state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContactStatus {
    Pending,
    Sending,
    Sent,
    Failed,
}

impl ContactStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ContactStatus::Pending => "pending",
            ContactStatus::Sending => "sending",
            ContactStatus::Sent => "sent",
            ContactStatus::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(ContactStatus::Pending),
            "sending" => Some(ContactStatus::Sending),
            "sent" => Some(ContactStatus::Sent),
            "failed" => Some(ContactStatus::Failed),
            _ => None,
        }
    }
}

/// One recipient row of a campaign.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CampaignContact {
    pub id: i64,
    pub campaign_id: i64,
    pub phone_number: String,
    pub name: Option<String>,
    pub status: ContactStatus,
    pub sent_by_account_id: Option<i64>,
    pub sent_at: Option<DateTime<Utc>>,
    pub error: Option<String>,
}

/// A sending account (WhatsApp identity) referenced by campaigns.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Account {
    pub id: i64,
    pub label: String,
    /// Transport-level identity (Cloud API phone number id).
    pub phone_number_id: String,
}

/// Fire-and-forget events emitted toward UI/observers.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum CampaignEvent {
    /// One contact changed delivery status.
    Progress {
        campaign_id: i64,
        contact_id: i64,
        status: ContactStatus,
        account_id: Option<i64>,
        error: Option<String>,
    },
    /// All contacts of the campaign reached a terminal state.
    Completed { campaign_id: i64 },
}
