//! In-memory doubles for scheduler tests: a `Store` with the same claim
//! semantics as the SQLite store and a scriptable `MessageTransport`.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use wacast_core::error::{Result, WacastError};
use wacast_core::traits::{MessageTransport, Store};
use wacast_core::types::{Campaign, CampaignContact, CampaignStatus, ContactStatus};

#[derive(Default)]
struct StoreInner {
    campaigns: HashMap<i64, Campaign>,
    participants: HashMap<i64, Vec<i64>>,
    contacts: Vec<CampaignContact>,
    blacklist: HashSet<String>,
    activities: Vec<(String, String, Option<i64>)>,
    daily: HashMap<String, u64>,
    next_campaign_id: i64,
    next_contact_id: i64,
}

pub struct MemoryStore {
    inner: Mutex<StoreInner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(StoreInner {
                next_campaign_id: 1,
                next_contact_id: 1,
                ..StoreInner::default()
            }),
        }
    }

    /// Always-on campaign with 1s fixed pacing and a generous cap.
    pub fn add_campaign_defaults(&self, accounts: &[i64]) -> i64 {
        self.add_campaign(
            Campaign {
                id: 0,
                name: "test".into(),
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
            },
            accounts,
        )
    }

    pub fn add_campaign(&self, mut campaign: Campaign, accounts: &[i64]) -> i64 {
        let mut inner = self.inner.lock().unwrap();
        let id = inner.next_campaign_id;
        inner.next_campaign_id += 1;
        campaign.id = id;
        inner.campaigns.insert(id, campaign);
        inner.participants.insert(id, accounts.to_vec());
        id
    }

    pub fn add_contact(&self, campaign_id: i64, phone: &str, name: Option<&str>) -> i64 {
        let mut inner = self.inner.lock().unwrap();
        let id = inner.next_contact_id;
        inner.next_contact_id += 1;
        inner.contacts.push(CampaignContact {
            id,
            campaign_id,
            phone_number: phone.to_string(),
            name: name.map(String::from),
            status: ContactStatus::Pending,
            sent_by_account_id: None,
            sent_at: None,
            error: None,
        });
        id
    }

    pub fn blacklist(&self, phone: &str) {
        self.inner.lock().unwrap().blacklist.insert(phone.to_string());
    }

    /// Force a contact's status, for seeding stuck rows.
    pub fn force_contact_status(&self, contact_id: i64, status: ContactStatus, account: Option<i64>) {
        let mut inner = self.inner.lock().unwrap();
        if let Some(c) = inner.contacts.iter_mut().find(|c| c.id == contact_id) {
            c.status = status;
            c.sent_by_account_id = account;
        }
    }

    pub fn contacts_of(&self, campaign_id: i64) -> Vec<CampaignContact> {
        self.inner
            .lock()
            .unwrap()
            .contacts
            .iter()
            .filter(|c| c.campaign_id == campaign_id)
            .cloned()
            .collect()
    }

    pub fn contact_by_phone(&self, campaign_id: i64, phone: &str) -> CampaignContact {
        self.contacts_of(campaign_id)
            .into_iter()
            .find(|c| c.phone_number == phone)
            .expect("contact exists")
    }

    pub fn campaign(&self, id: i64) -> Campaign {
        self.inner.lock().unwrap().campaigns.get(&id).cloned().expect("campaign exists")
    }

    pub fn set_started_at(&self, id: i64, at: DateTime<Utc>) {
        let mut inner = self.inner.lock().unwrap();
        if let Some(c) = inner.campaigns.get_mut(&id) {
            c.started_at = Some(at);
        }
    }

    pub fn set_scheduled_start_at(&self, id: i64, at: DateTime<Utc>) {
        let mut inner = self.inner.lock().unwrap();
        if let Some(c) = inner.campaigns.get_mut(&id) {
            c.scheduled_start_at = Some(at);
        }
    }

    pub fn activities(&self) -> Vec<(String, String, Option<i64>)> {
        self.inner.lock().unwrap().activities.clone()
    }

    pub fn activity_count(&self, kind: &str) -> usize {
        self.activities().iter().filter(|(k, _, _)| k == kind).count()
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn get_campaign(&self, id: i64) -> Result<Option<Campaign>> {
        Ok(self.inner.lock().unwrap().campaigns.get(&id).cloned())
    }

    async fn list_participating_accounts(&self, campaign_id: i64) -> Result<Vec<i64>> {
        Ok(self
            .inner
            .lock()
            .unwrap()
            .participants
            .get(&campaign_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn claim_next_pending_contact(
        &self,
        campaign_id: i64,
        account_id: i64,
    ) -> Result<Option<CampaignContact>> {
        let mut inner = self.inner.lock().unwrap();
        let blacklist = inner.blacklist.clone();
        if let Some(c) = inner.contacts.iter_mut().find(|c| {
            c.campaign_id == campaign_id
                && c.status == ContactStatus::Pending
                && !blacklist.contains(&c.phone_number)
        }) {
            c.status = ContactStatus::Sending;
            c.sent_by_account_id = Some(account_id);
            return Ok(Some(c.clone()));
        }
        Ok(None)
    }

    async fn mark_contact_sent(
        &self,
        contact_id: i64,
        account_id: i64,
        at: DateTime<Utc>,
    ) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        if let Some(c) = inner.contacts.iter_mut().find(|c| c.id == contact_id) {
            c.status = ContactStatus::Sent;
            c.sent_by_account_id = Some(account_id);
            c.sent_at = Some(at);
            c.error = None;
        }
        Ok(())
    }

    async fn mark_contact_failed(&self, contact_id: i64, error: &str) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        if let Some(c) = inner.contacts.iter_mut().find(|c| c.id == contact_id) {
            c.status = ContactStatus::Failed;
            c.error = Some(error.to_string());
        }
        Ok(())
    }

    async fn mark_contact_pending(&self, contact_id: i64) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        if let Some(c) = inner.contacts.iter_mut().find(|c| c.id == contact_id) {
            c.status = ContactStatus::Pending;
            c.sent_by_account_id = None;
            c.sent_at = None;
            c.error = None;
        }
        Ok(())
    }

    async fn release_stuck_sending_contacts(&self, campaign_id: i64, account_id: i64) -> Result<u64> {
        let mut inner = self.inner.lock().unwrap();
        let mut n = 0;
        for c in inner.contacts.iter_mut().filter(|c| {
            c.campaign_id == campaign_id
                && c.status == ContactStatus::Sending
                && c.sent_by_account_id == Some(account_id)
        }) {
            c.status = ContactStatus::Pending;
            c.sent_by_account_id = None;
            n += 1;
        }
        Ok(n)
    }

    async fn count_stuck_sending(&self, campaign_id: i64) -> Result<u64> {
        Ok(self
            .inner
            .lock()
            .unwrap()
            .contacts
            .iter()
            .filter(|c| c.campaign_id == campaign_id && c.status == ContactStatus::Sending)
            .count() as u64)
    }

    async fn count_blacklisted_pending(&self, campaign_id: i64) -> Result<u64> {
        let inner = self.inner.lock().unwrap();
        Ok(inner
            .contacts
            .iter()
            .filter(|c| {
                c.campaign_id == campaign_id
                    && c.status == ContactStatus::Pending
                    && inner.blacklist.contains(&c.phone_number)
            })
            .count() as u64)
    }

    async fn fail_all_blacklisted_pending(&self, campaign_id: i64) -> Result<u64> {
        let mut inner = self.inner.lock().unwrap();
        let blacklist = inner.blacklist.clone();
        let mut n = 0;
        for c in inner.contacts.iter_mut().filter(|c| {
            c.campaign_id == campaign_id
                && c.status == ContactStatus::Pending
                && blacklist.contains(&c.phone_number)
        }) {
            c.status = ContactStatus::Failed;
            c.error = Some("Contact in BlackList".to_string());
            n += 1;
        }
        Ok(n)
    }

    async fn set_campaign_status(&self, id: i64, status: CampaignStatus) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        let campaign = inner
            .campaigns
            .get_mut(&id)
            .ok_or_else(|| WacastError::Store(format!("campaign {id} not found")))?;
        campaign.status = status;
        match status {
            CampaignStatus::Running => {
                campaign.started_at.get_or_insert_with(Utc::now);
            }
            CampaignStatus::Stopped | CampaignStatus::Completed => {
                campaign.completed_at = Some(Utc::now());
            }
            CampaignStatus::Draft => {
                campaign.started_at = None;
                campaign.completed_at = None;
            }
            CampaignStatus::Paused => {}
        }
        Ok(())
    }

    async fn reset_campaign_contacts(&self, campaign_id: i64) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        for c in inner.contacts.iter_mut().filter(|c| c.campaign_id == campaign_id) {
            c.status = ContactStatus::Pending;
            c.sent_by_account_id = None;
            c.sent_at = None;
            c.error = None;
        }
        Ok(())
    }

    async fn list_campaigns_with_status(&self, status: CampaignStatus) -> Result<Vec<Campaign>> {
        let mut out: Vec<Campaign> = self
            .inner
            .lock()
            .unwrap()
            .campaigns
            .values()
            .filter(|c| c.status == status)
            .cloned()
            .collect();
        out.sort_by_key(|c| c.id);
        Ok(out)
    }

    async fn due_scheduled_campaigns(&self, now: DateTime<Utc>) -> Result<Vec<Campaign>> {
        let mut out: Vec<Campaign> = self
            .inner
            .lock()
            .unwrap()
            .campaigns
            .values()
            .filter(|c| {
                c.status == CampaignStatus::Draft
                    && c.scheduled_start_at.is_some_and(|at| at <= now)
            })
            .cloned()
            .collect();
        out.sort_by_key(|c| c.id);
        Ok(out)
    }

    async fn record_activity(
        &self,
        kind: &str,
        message: &str,
        related_id: Option<i64>,
    ) -> Result<()> {
        self.inner
            .lock()
            .unwrap()
            .activities
            .push((kind.to_string(), message.to_string(), related_id));
        Ok(())
    }

    async fn increment_daily_sent_stat(&self, date_key: &str) -> Result<()> {
        *self.inner.lock().unwrap().daily.entry(date_key.to_string()).or_insert(0) += 1;
        Ok(())
    }
}

/// One delivered message, as the mock saw it.
#[derive(Debug, Clone)]
pub struct SentRecord {
    pub account_id: i64,
    pub to: String,
    pub body: String,
    pub media_path: Option<String>,
}

#[derive(Default)]
struct TransportInner {
    disconnected: HashSet<i64>,
    fail_once: HashMap<String, VecDeque<String>>,
    fail_always: HashMap<String, String>,
    sent: Vec<SentRecord>,
}

/// Scriptable transport: all accounts connected by default, failures are
/// injected per destination.
pub struct MockTransport {
    inner: Mutex<TransportInner>,
}

impl MockTransport {
    pub fn new() -> Self {
        Self { inner: Mutex::new(TransportInner::default()) }
    }

    /// Fail the next send to `phone` with `error`, then succeed.
    pub fn fail_once(&self, phone: &str, error: &str) {
        self.inner
            .lock()
            .unwrap()
            .fail_once
            .entry(phone.to_string())
            .or_default()
            .push_back(error.to_string());
    }

    /// Fail every send to `phone` with `error`.
    pub fn fail_always(&self, phone: &str, error: &str) {
        self.inner
            .lock()
            .unwrap()
            .fail_always
            .insert(phone.to_string(), error.to_string());
    }

    pub fn sent(&self) -> Vec<SentRecord> {
        self.inner.lock().unwrap().sent.clone()
    }

    pub fn sent_count(&self) -> usize {
        self.inner.lock().unwrap().sent.len()
    }

    fn try_send(&self, account_id: i64, to: &str, body: &str, media_path: Option<&str>) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        if let Some(err) = inner.fail_always.get(to).cloned() {
            return Err(WacastError::Transport(err));
        }
        if let Some(queue) = inner.fail_once.get_mut(to) {
            if let Some(err) = queue.pop_front() {
                return Err(WacastError::Transport(err));
            }
        }
        inner.sent.push(SentRecord {
            account_id,
            to: to.to_string(),
            body: body.to_string(),
            media_path: media_path.map(String::from),
        });
        Ok(())
    }
}

#[async_trait]
impl MessageTransport for MockTransport {
    fn is_connected(&self, account_id: i64) -> bool {
        !self.inner.lock().unwrap().disconnected.contains(&account_id)
    }

    fn set_connected(&self, account_id: i64, connected: bool) {
        let mut inner = self.inner.lock().unwrap();
        if connected {
            inner.disconnected.remove(&account_id);
        } else {
            inner.disconnected.insert(account_id);
        }
    }

    async fn send_text(&self, account_id: i64, to: &str, text: &str) -> Result<()> {
        self.try_send(account_id, to, text, None)
    }

    async fn send_media(&self, account_id: i64, to: &str, path: &str, caption: &str) -> Result<()> {
        self.try_send(account_id, to, caption, Some(path))
    }
}
