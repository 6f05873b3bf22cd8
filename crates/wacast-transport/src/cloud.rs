//! WhatsApp Business Cloud API transport.
//!
//! Uses the official WhatsApp Business Platform (Cloud API) for messaging.
//! Requires: Access Token + Phone Number ID per account from Meta Business
//! Suite. Media is uploaded to the account's media endpoint first, then sent
//! by media id.

use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;

use wacast_core::config::TransportConfig;
use wacast_core::error::{Result, WacastError};
use wacast_core::traits::MessageTransport;

struct AccountSession {
    label: String,
    access_token: String,
    phone_number_id: String,
    connected: AtomicBool,
}

/// Multi-account Cloud API client.
pub struct CloudApiTransport {
    api_base: String,
    client: reqwest::Client,
    sessions: HashMap<i64, AccountSession>,
}

impl CloudApiTransport {
    pub fn new(config: &TransportConfig) -> Self {
        let sessions = config
            .accounts
            .iter()
            .map(|account| {
                (
                    account.id,
                    AccountSession {
                        label: account.label.clone(),
                        access_token: account.access_token.clone(),
                        phone_number_id: account.phone_number_id.clone(),
                        connected: AtomicBool::new(false),
                    },
                )
            })
            .collect();
        Self {
            api_base: config.api_base.trim_end_matches('/').to_string(),
            client: reqwest::Client::new(),
            sessions,
        }
    }

    /// Verify every account's token against the Graph API and flag the ones
    /// that answer as connected. A failing account is logged and left
    /// disconnected; it does not block the others.
    pub async fn connect_all(&self) -> Result<usize> {
        let mut connected = 0;
        for (id, session) in &self.sessions {
            match self.verify(session).await {
                Ok(()) => {
                    session.connected.store(true, Ordering::SeqCst);
                    connected += 1;
                    tracing::info!(
                        "WhatsApp account {} ({}): connected (phone_id={})",
                        id,
                        session.label,
                        session.phone_number_id
                    );
                }
                Err(e) => {
                    tracing::error!("WhatsApp account {} ({}): {e}", id, session.label);
                }
            }
        }
        Ok(connected)
    }

    async fn verify(&self, session: &AccountSession) -> Result<()> {
        if session.access_token.is_empty() {
            return Err(WacastError::Config("access_token not configured".into()));
        }
        if session.phone_number_id.is_empty() {
            return Err(WacastError::Config("phone_number_id not configured".into()));
        }

        let url = format!("{}/{}", self.api_base, session.phone_number_id);
        let response = self
            .client
            .get(&url)
            .header("Authorization", format!("Bearer {}", session.access_token))
            .send()
            .await
            .map_err(|e| WacastError::Transport(format!("WhatsApp verification failed: {e}")))?;

        if !response.status().is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(WacastError::Transport(format!(
                "WhatsApp token verification failed: {text}"
            )));
        }
        Ok(())
    }

    fn session(&self, account_id: i64) -> Result<&AccountSession> {
        self.sessions
            .get(&account_id)
            .ok_or_else(|| WacastError::Transport(format!("unknown account {account_id}")))
    }

    async fn post_message(
        &self,
        session: &AccountSession,
        body: serde_json::Value,
    ) -> Result<String> {
        let url = format!("{}/{}/messages", self.api_base, session.phone_number_id);
        let response = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", session.access_token))
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(|e| WacastError::Transport(format!("WhatsApp API request failed: {e}")))?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();
            return Err(WacastError::Transport(format!(
                "WhatsApp API error {status}: {error_text}"
            )));
        }

        let result: serde_json::Value = response
            .json()
            .await
            .map_err(|e| WacastError::Transport(format!("Invalid WhatsApp response: {e}")))?;

        Ok(result["messages"][0]["id"]
            .as_str()
            .unwrap_or("unknown")
            .to_string())
    }

    /// Upload a local file to the account's media endpoint, returning the
    /// media id to send by.
    async fn upload_media(&self, session: &AccountSession, path: &str) -> Result<String> {
        let bytes = tokio::fs::read(path).await?;
        let file_name = Path::new(path)
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("attachment")
            .to_string();
        let mime = mime_for(path);

        let part = reqwest::multipart::Part::bytes(bytes)
            .file_name(file_name)
            .mime_str(mime)
            .map_err(|e| WacastError::Transport(format!("Invalid media type: {e}")))?;
        let form = reqwest::multipart::Form::new()
            .text("messaging_product", "whatsapp")
            .part("file", part);

        let url = format!("{}/{}/media", self.api_base, session.phone_number_id);
        let response = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", session.access_token))
            .multipart(form)
            .send()
            .await
            .map_err(|e| WacastError::Transport(format!("WhatsApp media upload failed: {e}")))?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();
            return Err(WacastError::Transport(format!(
                "WhatsApp media upload error {status}: {error_text}"
            )));
        }

        let result: serde_json::Value = response
            .json()
            .await
            .map_err(|e| WacastError::Transport(format!("Invalid media upload response: {e}")))?;
        result["id"]
            .as_str()
            .map(String::from)
            .ok_or_else(|| WacastError::Transport("Media upload returned no id".into()))
    }
}

#[async_trait]
impl MessageTransport for CloudApiTransport {
    fn is_connected(&self, account_id: i64) -> bool {
        self.sessions
            .get(&account_id)
            .is_some_and(|s| s.connected.load(Ordering::SeqCst))
    }

    fn set_connected(&self, account_id: i64, connected: bool) {
        if let Some(session) = self.sessions.get(&account_id) {
            session.connected.store(connected, Ordering::SeqCst);
        }
    }

    async fn send_text(&self, account_id: i64, to: &str, text: &str) -> Result<()> {
        let session = self.session(account_id)?;
        let body = serde_json::json!({
            "messaging_product": "whatsapp",
            "recipient_type": "individual",
            "to": to,
            "type": "text",
            "text": {
                "preview_url": false,
                "body": text
            }
        });
        let msg_id = self.post_message(session, body).await?;
        tracing::debug!("WhatsApp message sent: {} → {}", msg_id, to);
        Ok(())
    }

    async fn send_media(&self, account_id: i64, to: &str, path: &str, caption: &str) -> Result<()> {
        let session = self.session(account_id)?;
        let media_id = self.upload_media(session, path).await?;
        let media_type = media_type_for(path);
        let mut body = serde_json::json!({
            "messaging_product": "whatsapp",
            "recipient_type": "individual",
            "to": to,
            "type": media_type,
        });
        body[media_type] = serde_json::json!({
            "id": media_id,
            "caption": caption
        });
        let msg_id = self.post_message(session, body).await?;
        tracing::debug!("WhatsApp media sent: {} → {} ({})", msg_id, to, media_type);
        Ok(())
    }
}

/// Cloud API message type for a file, by extension.
fn media_type_for(path: &str) -> &'static str {
    match extension(path).as_str() {
        "jpg" | "jpeg" | "png" | "webp" => "image",
        "mp4" | "3gp" => "video",
        "aac" | "mp3" | "ogg" | "amr" => "audio",
        _ => "document",
    }
}

fn mime_for(path: &str) -> &'static str {
    match extension(path).as_str() {
        "jpg" | "jpeg" => "image/jpeg",
        "png" => "image/png",
        "webp" => "image/webp",
        "mp4" => "video/mp4",
        "3gp" => "video/3gpp",
        "aac" => "audio/aac",
        "mp3" => "audio/mpeg",
        "ogg" => "audio/ogg",
        "amr" => "audio/amr",
        "pdf" => "application/pdf",
        _ => "application/octet-stream",
    }
}

fn extension(path: &str) -> String {
    Path::new(path)
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or("")
        .to_ascii_lowercase()
}
