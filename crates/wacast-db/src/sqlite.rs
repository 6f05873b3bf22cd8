//! SQLite store implementation.
//!
//! All scheduler-visible mutations go through the `Store` trait. The claim
//! operation (`pending → sending`) is one UPDATE over a scalar subquery with
//! RETURNING, executed under the connection lock — the select and the update
//! can never interleave with another worker's claim.

use std::path::Path;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension, params};

use wacast_core::error::{Result, WacastError};
use wacast_core::traits::Store;
use wacast_core::types::{Campaign, CampaignContact, CampaignStatus, ContactStatus, MediaAttachment};

/// Tag that excludes a phone number from claiming.
pub const BLACKLIST_TAG: &str = "BlackList";

const BLACKLIST_ERROR: &str = "Contact in BlackList";

/// SQLite-backed store.
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

/// Fields for creating a campaign row.
#[derive(Debug, Clone)]
pub struct NewCampaign {
    pub name: String,
    pub message: String,
    pub min_delay_secs: u32,
    pub max_delay_secs: u32,
    pub max_messages_per_day: u32,
    pub start_hour: u32,
    pub end_hour: u32,
    pub media: Option<MediaAttachment>,
    pub scheduled_start_at: Option<DateTime<Utc>>,
}

impl Default for NewCampaign {
    fn default() -> Self {
        Self {
            name: String::new(),
            message: String::new(),
            min_delay_secs: 30,
            max_delay_secs: 90,
            max_messages_per_day: 100,
            start_hour: 0,
            end_hour: 24,
            media: None,
            scheduled_start_at: None,
        }
    }
}

fn store_err(e: impl std::fmt::Display) -> WacastError {
    WacastError::Store(e.to_string())
}

fn parse_ts(s: Option<String>) -> Option<DateTime<Utc>> {
    s.and_then(|s| DateTime::parse_from_rfc3339(&s).ok())
        .map(|d| d.with_timezone(&Utc))
}

impl SqliteStore {
    /// Open or create the database at `path`.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path).map_err(store_err)?;
        conn.execute_batch("PRAGMA journal_mode=WAL;").ok();
        let store = Self { conn: Mutex::new(conn) };
        store.migrate()?;
        Ok(store)
    }

    /// In-memory database, used by tests.
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().map_err(store_err)?;
        let store = Self { conn: Mutex::new(conn) };
        store.migrate()?;
        Ok(store)
    }

    fn migrate(&self) -> Result<()> {
        let conn = self.lock()?;
        conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS accounts (
                id INTEGER PRIMARY KEY,
                label TEXT NOT NULL DEFAULT '',
                phone_number_id TEXT NOT NULL DEFAULT ''
            );

            CREATE TABLE IF NOT EXISTS campaigns (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                name TEXT NOT NULL,
                message TEXT NOT NULL DEFAULT '',
                status TEXT NOT NULL DEFAULT 'draft',
                min_delay_secs INTEGER NOT NULL DEFAULT 30,
                max_delay_secs INTEGER NOT NULL DEFAULT 90,
                max_messages_per_day INTEGER NOT NULL DEFAULT 100,
                start_hour INTEGER NOT NULL DEFAULT 0,
                end_hour INTEGER NOT NULL DEFAULT 24,
                media_json TEXT,
                scheduled_start_at TEXT,
                started_at TEXT,
                completed_at TEXT,
                created_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS campaign_accounts (
                campaign_id INTEGER NOT NULL,
                account_id INTEGER NOT NULL,
                PRIMARY KEY (campaign_id, account_id)
            );

            CREATE TABLE IF NOT EXISTS campaign_contacts (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                campaign_id INTEGER NOT NULL,
                phone_number TEXT NOT NULL,
                name TEXT,
                status TEXT NOT NULL DEFAULT 'pending',
                sent_by_account_id INTEGER,
                sent_at TEXT,
                error TEXT
            );
            CREATE INDEX IF NOT EXISTS idx_contacts_campaign_status
                ON campaign_contacts(campaign_id, status);

            CREATE TABLE IF NOT EXISTS contact_tags (
                phone_number TEXT NOT NULL,
                tag TEXT NOT NULL,
                PRIMARY KEY (phone_number, tag)
            );

            CREATE TABLE IF NOT EXISTS activity_log (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                kind TEXT NOT NULL,
                message TEXT NOT NULL,
                related_id INTEGER,
                created_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS daily_stats (
                date TEXT PRIMARY KEY,
                sent_count INTEGER NOT NULL DEFAULT 0
            );
            ",
        )
        .map_err(store_err)?;
        Ok(())
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(store_err)
    }

    // ─── Setup helpers (used by the binary and tests) ─────────

    /// Register a sending account.
    pub fn upsert_account(&self, id: i64, label: &str, phone_number_id: &str) -> Result<()> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT OR REPLACE INTO accounts (id, label, phone_number_id) VALUES (?1, ?2, ?3)",
            params![id, label, phone_number_id],
        )
        .map_err(store_err)?;
        Ok(())
    }

    /// Create a campaign in draft status. Returns its id.
    pub fn insert_campaign(&self, new: &NewCampaign) -> Result<i64> {
        let conn = self.lock()?;
        let media_json = match &new.media {
            Some(m) => Some(serde_json::to_string(m).map_err(store_err)?),
            None => None,
        };
        conn.execute(
            "INSERT INTO campaigns
             (name, message, status, min_delay_secs, max_delay_secs, max_messages_per_day,
              start_hour, end_hour, media_json, scheduled_start_at, created_at)
             VALUES (?1, ?2, 'draft', ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
            params![
                new.name,
                new.message,
                new.min_delay_secs,
                new.max_delay_secs,
                new.max_messages_per_day,
                new.start_hour,
                new.end_hour,
                media_json,
                new.scheduled_start_at.map(|t| t.to_rfc3339()),
                Utc::now().to_rfc3339(),
            ],
        )
        .map_err(store_err)?;
        Ok(conn.last_insert_rowid())
    }

    /// Bind an account to a campaign.
    pub fn bind_account(&self, campaign_id: i64, account_id: i64) -> Result<()> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT OR IGNORE INTO campaign_accounts (campaign_id, account_id) VALUES (?1, ?2)",
            params![campaign_id, account_id],
        )
        .map_err(store_err)?;
        Ok(())
    }

    /// Add contacts to a campaign as pending rows.
    pub fn add_contacts(&self, campaign_id: i64, contacts: &[(String, Option<String>)]) -> Result<()> {
        let mut conn = self.lock()?;
        let tx = conn.transaction().map_err(store_err)?;
        for (phone, name) in contacts {
            tx.execute(
                "INSERT INTO campaign_contacts (campaign_id, phone_number, name) VALUES (?1, ?2, ?3)",
                params![campaign_id, phone, name],
            )
            .map_err(store_err)?;
        }
        tx.commit().map_err(store_err)?;
        Ok(())
    }

    /// Tag a phone number. `BLACKLIST_TAG` excludes it from claiming.
    pub fn add_tag(&self, phone_number: &str, tag: &str) -> Result<()> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT OR IGNORE INTO contact_tags (phone_number, tag) VALUES (?1, ?2)",
            params![phone_number, tag],
        )
        .map_err(store_err)?;
        Ok(())
    }

    /// All contacts of a campaign in insertion order.
    pub fn list_contacts(&self, campaign_id: i64) -> Result<Vec<CampaignContact>> {
        let conn = self.lock()?;
        let mut stmt = conn
            .prepare(
                "SELECT id, campaign_id, phone_number, name, status, sent_by_account_id, sent_at, error
                 FROM campaign_contacts WHERE campaign_id = ?1 ORDER BY id",
            )
            .map_err(store_err)?;
        let rows = stmt
            .query_map([campaign_id], map_contact)
            .map_err(store_err)?
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(store_err)?;
        Ok(rows)
    }

    /// Recent activity records, newest first.
    pub fn recent_activity(&self, limit: usize) -> Result<Vec<(String, String, Option<i64>)>> {
        let conn = self.lock()?;
        let mut stmt = conn
            .prepare(
                "SELECT kind, message, related_id FROM activity_log ORDER BY id DESC LIMIT ?1",
            )
            .map_err(store_err)?;
        let rows = stmt
            .query_map([limit as i64], |row| {
                Ok((row.get(0)?, row.get(1)?, row.get(2)?))
            })
            .map_err(store_err)?
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(store_err)?;
        Ok(rows)
    }

    /// Sent count recorded for a date key.
    pub fn daily_sent_stat(&self, date_key: &str) -> Result<u64> {
        let conn = self.lock()?;
        let count: i64 = conn
            .query_row(
                "SELECT sent_count FROM daily_stats WHERE date = ?1",
                [date_key],
                |r| r.get(0),
            )
            .optional()
            .map_err(store_err)?
            .unwrap_or(0);
        Ok(count as u64)
    }
}

fn map_campaign(row: &rusqlite::Row<'_>) -> rusqlite::Result<Campaign> {
    let status_str: String = row.get(3)?;
    let media_json: Option<String> = row.get(9)?;
    Ok(Campaign {
        id: row.get(0)?,
        name: row.get(1)?,
        message: row.get(2)?,
        status: CampaignStatus::parse(&status_str).unwrap_or(CampaignStatus::Draft),
        min_delay_secs: row.get(4)?,
        max_delay_secs: row.get(5)?,
        max_messages_per_day: row.get(6)?,
        start_hour: row.get(7)?,
        end_hour: row.get(8)?,
        media: media_json.and_then(|j| serde_json::from_str(&j).ok()),
        scheduled_start_at: parse_ts(row.get(10)?),
        started_at: parse_ts(row.get(11)?),
        completed_at: parse_ts(row.get(12)?),
        created_at: parse_ts(row.get(13)?).unwrap_or_else(Utc::now),
    })
}

fn map_contact(row: &rusqlite::Row<'_>) -> rusqlite::Result<CampaignContact> {
    let status_str: String = row.get(4)?;
    Ok(CampaignContact {
        id: row.get(0)?,
        campaign_id: row.get(1)?,
        phone_number: row.get(2)?,
        name: row.get(3)?,
        status: ContactStatus::parse(&status_str).unwrap_or(ContactStatus::Pending),
        sent_by_account_id: row.get(5)?,
        sent_at: parse_ts(row.get(6)?),
        error: row.get(7)?,
    })
}

const CAMPAIGN_COLS: &str = "id, name, message, status, min_delay_secs, max_delay_secs, \
     max_messages_per_day, start_hour, end_hour, media_json, scheduled_start_at, \
     started_at, completed_at, created_at";

#[async_trait]
impl Store for SqliteStore {
    async fn get_campaign(&self, id: i64) -> Result<Option<Campaign>> {
        let conn = self.lock()?;
        conn.query_row(
            &format!("SELECT {CAMPAIGN_COLS} FROM campaigns WHERE id = ?1"),
            [id],
            map_campaign,
        )
        .optional()
        .map_err(store_err)
    }

    async fn list_participating_accounts(&self, campaign_id: i64) -> Result<Vec<i64>> {
        let conn = self.lock()?;
        let mut stmt = conn
            .prepare("SELECT account_id FROM campaign_accounts WHERE campaign_id = ?1 ORDER BY account_id")
            .map_err(store_err)?;
        let ids = stmt
            .query_map([campaign_id], |row| row.get(0))
            .map_err(store_err)?
            .collect::<std::result::Result<Vec<i64>, _>>()
            .map_err(store_err)?;
        Ok(ids)
    }

    async fn claim_next_pending_contact(
        &self,
        campaign_id: i64,
        account_id: i64,
    ) -> Result<Option<CampaignContact>> {
        let conn = self.lock()?;
        // Single statement: the subquery picks the oldest claimable row and
        // the UPDATE flips it to `sending` atomically. No read-then-write.
        conn.query_row(
            "UPDATE campaign_contacts
             SET status = 'sending', sent_by_account_id = ?2
             WHERE id = (
                 SELECT id FROM campaign_contacts
                 WHERE campaign_id = ?1 AND status = 'pending'
                   AND phone_number NOT IN (
                       SELECT phone_number FROM contact_tags WHERE tag = ?3
                   )
                 ORDER BY id LIMIT 1
             )
             RETURNING id, campaign_id, phone_number, name, status,
                       sent_by_account_id, sent_at, error",
            params![campaign_id, account_id, BLACKLIST_TAG],
            map_contact,
        )
        .optional()
        .map_err(store_err)
    }

    async fn mark_contact_sent(
        &self,
        contact_id: i64,
        account_id: i64,
        at: DateTime<Utc>,
    ) -> Result<()> {
        let conn = self.lock()?;
        conn.execute(
            "UPDATE campaign_contacts
             SET status = 'sent', sent_by_account_id = ?2, sent_at = ?3, error = NULL
             WHERE id = ?1",
            params![contact_id, account_id, at.to_rfc3339()],
        )
        .map_err(store_err)?;
        Ok(())
    }

    async fn mark_contact_failed(&self, contact_id: i64, error: &str) -> Result<()> {
        let conn = self.lock()?;
        conn.execute(
            "UPDATE campaign_contacts SET status = 'failed', error = ?2 WHERE id = ?1",
            params![contact_id, error],
        )
        .map_err(store_err)?;
        Ok(())
    }

    async fn mark_contact_pending(&self, contact_id: i64) -> Result<()> {
        let conn = self.lock()?;
        conn.execute(
            "UPDATE campaign_contacts
             SET status = 'pending', sent_by_account_id = NULL, sent_at = NULL, error = NULL
             WHERE id = ?1",
            params![contact_id],
        )
        .map_err(store_err)?;
        Ok(())
    }

    async fn release_stuck_sending_contacts(&self, campaign_id: i64, account_id: i64) -> Result<u64> {
        let conn = self.lock()?;
        let n = conn
            .execute(
                "UPDATE campaign_contacts
                 SET status = 'pending', sent_by_account_id = NULL
                 WHERE campaign_id = ?1 AND status = 'sending'
                   AND sent_by_account_id = ?2",
                params![campaign_id, account_id],
            )
            .map_err(store_err)?;
        if n > 0 {
            tracing::info!(
                "Released {} stuck sending contact(s) claimed by account {} in campaign {}",
                n,
                account_id,
                campaign_id
            );
        }
        Ok(n as u64)
    }

    async fn count_stuck_sending(&self, campaign_id: i64) -> Result<u64> {
        let conn = self.lock()?;
        let n: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM campaign_contacts WHERE campaign_id = ?1 AND status = 'sending'",
                [campaign_id],
                |r| r.get(0),
            )
            .map_err(store_err)?;
        Ok(n as u64)
    }

    async fn count_blacklisted_pending(&self, campaign_id: i64) -> Result<u64> {
        let conn = self.lock()?;
        let n: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM campaign_contacts
                 WHERE campaign_id = ?1 AND status = 'pending'
                   AND phone_number IN (SELECT phone_number FROM contact_tags WHERE tag = ?2)",
                params![campaign_id, BLACKLIST_TAG],
                |r| r.get(0),
            )
            .map_err(store_err)?;
        Ok(n as u64)
    }

    async fn fail_all_blacklisted_pending(&self, campaign_id: i64) -> Result<u64> {
        let conn = self.lock()?;
        let n = conn
            .execute(
                "UPDATE campaign_contacts SET status = 'failed', error = ?3
                 WHERE campaign_id = ?1 AND status = 'pending'
                   AND phone_number IN (SELECT phone_number FROM contact_tags WHERE tag = ?2)",
                params![campaign_id, BLACKLIST_TAG, BLACKLIST_ERROR],
            )
            .map_err(store_err)?;
        Ok(n as u64)
    }

    async fn set_campaign_status(&self, id: i64, status: CampaignStatus) -> Result<()> {
        let conn = self.lock()?;
        let now = Utc::now().to_rfc3339();
        match status {
            CampaignStatus::Running => conn.execute(
                "UPDATE campaigns SET status = ?2, started_at = COALESCE(started_at, ?3) WHERE id = ?1",
                params![id, status.as_str(), now],
            ),
            CampaignStatus::Stopped | CampaignStatus::Completed => conn.execute(
                "UPDATE campaigns SET status = ?2, completed_at = ?3 WHERE id = ?1",
                params![id, status.as_str(), now],
            ),
            CampaignStatus::Draft => conn.execute(
                "UPDATE campaigns SET status = ?2, started_at = NULL, completed_at = NULL WHERE id = ?1",
                params![id, status.as_str()],
            ),
            CampaignStatus::Paused => conn.execute(
                "UPDATE campaigns SET status = ?2 WHERE id = ?1",
                params![id, status.as_str()],
            ),
        }
        .map_err(store_err)?;
        Ok(())
    }

    async fn reset_campaign_contacts(&self, campaign_id: i64) -> Result<()> {
        let conn = self.lock()?;
        conn.execute(
            "UPDATE campaign_contacts
             SET status = 'pending', sent_by_account_id = NULL, sent_at = NULL, error = NULL
             WHERE campaign_id = ?1",
            params![campaign_id],
        )
        .map_err(store_err)?;
        Ok(())
    }

    async fn list_campaigns_with_status(&self, status: CampaignStatus) -> Result<Vec<Campaign>> {
        let conn = self.lock()?;
        let mut stmt = conn
            .prepare(&format!(
                "SELECT {CAMPAIGN_COLS} FROM campaigns WHERE status = ?1 ORDER BY id"
            ))
            .map_err(store_err)?;
        let rows = stmt
            .query_map([status.as_str()], map_campaign)
            .map_err(store_err)?
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(store_err)?;
        Ok(rows)
    }

    async fn due_scheduled_campaigns(&self, now: DateTime<Utc>) -> Result<Vec<Campaign>> {
        let conn = self.lock()?;
        let mut stmt = conn
            .prepare(&format!(
                "SELECT {CAMPAIGN_COLS} FROM campaigns
                 WHERE status = 'draft' AND scheduled_start_at IS NOT NULL
                   AND scheduled_start_at <= ?1
                 ORDER BY id"
            ))
            .map_err(store_err)?;
        let rows = stmt
            .query_map([now.to_rfc3339()], map_campaign)
            .map_err(store_err)?
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(store_err)?;
        Ok(rows)
    }

    async fn record_activity(
        &self,
        kind: &str,
        message: &str,
        related_id: Option<i64>,
    ) -> Result<()> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO activity_log (kind, message, related_id, created_at) VALUES (?1, ?2, ?3, ?4)",
            params![kind, message, related_id, Utc::now().to_rfc3339()],
        )
        .map_err(store_err)?;
        Ok(())
    }

    async fn increment_daily_sent_stat(&self, date_key: &str) -> Result<()> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO daily_stats (date, sent_count) VALUES (?1, 1)
             ON CONFLICT(date) DO UPDATE SET sent_count = sent_count + 1",
            params![date_key],
        )
        .map_err(store_err)?;
        Ok(())
    }
}
