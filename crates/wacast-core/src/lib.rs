//! # Wacast Core
//!
//! Shared foundation for the wacast campaign engine: the error type,
//! configuration, the campaign/contact data model, and the capability
//! traits (`Store`, `MessageTransport`) the scheduler is written against.

pub mod config;
pub mod error;
pub mod traits;
pub mod types;

pub use config::WacastConfig;
pub use error::{Result, WacastError};
pub use traits::{MessageTransport, Store};
pub use types::{
    Account, Campaign, CampaignContact, CampaignEvent, CampaignStatus, ContactStatus,
    MediaAttachment,
};
