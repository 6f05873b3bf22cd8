//! # Wacast Scheduler
//!
//! The campaign dispatch engine: turns a campaign definition + contact list
//! + pool of accounts into a correctly-paced, claim-exclusive delivery
//! stream that survives restarts and degrades gracefully when an account
//! goes offline mid-run.
//!
//! ## Architecture
//! ```text
//! CampaignScheduler (lifecycle: start/pause/stop/reset/resume)
//!   ├── CampaignState registry: per-campaign running flag + daily counters
//!   ├── AccountWorker × N (one tokio task per (campaign, account))
//!   │     wake → window gate → daily-cap gate → claim → send → record
//!   │          → re-arm with randomized delay
//!   ├── ContactClaimQueue: atomic pending→sending claims (store-enforced)
//!   ├── midnight task: daily counter reset even with no traffic
//!   └── on progress/completion → EventBus (broadcast + history)
//!
//! ScheduledCampaignChecker (tokio interval)
//!   └── draft + scheduled_start_at ≤ now → one start attempt
//! ```
//!
//! Concurrency model: workers of one campaign share no mutable state except
//! the registry entry (mutated only between awaits) and race for contacts
//! exclusively through the store's atomic claim — that claim is the
//! correctness boundary, not task scheduling order.

pub mod campaigns;
pub mod checker;
pub mod counter;
pub mod failure;
pub mod notify;
pub mod queue;
pub mod template;
pub mod window;
pub mod worker;

#[cfg(test)]
pub(crate) mod testing;

pub use campaigns::CampaignScheduler;
pub use checker::ScheduledCampaignChecker;
pub use counter::DailyCounter;
pub use failure::FailureKind;
pub use notify::EventBus;
pub use queue::{Claim, ContactClaimQueue};
