//! # Wacast Transport
//!
//! WhatsApp Business Cloud API backend for the scheduler's
//! `MessageTransport` trait. One session per sending account, each with its
//! own access token, phone number id, and connectivity flag.

pub mod cloud;

pub use cloud::CloudApiTransport;
