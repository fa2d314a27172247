//! Gmail REST mailbox.
//!
//! Messages are listed with a `after:<unix> before:<unix>` search query
//! scoped to one label, fetched with `format=full`, and their payload tree is
//! deserialized straight into [`MimePart`]. Access tokens come from a
//! [`TokenStore`]; an expired token is refreshed through the refresh-token
//! grant and written back before the next request.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use tokio::sync::Mutex;
use tracing::{debug, info};

use po_intake_core::mime::decode_body_data;
use po_intake_core::models::{MimePart, RawMessage, TimeWindow};

use super::token::{TokenRecord, TokenStore};
use super::MailboxProvider;
use crate::config::GmailConfig;

pub struct GmailMailbox {
    http: reqwest::Client,
    api_base: String,
    token_url: String,
    client_id: String,
    client_secret: String,
    max_results: u32,
    store: Arc<dyn TokenStore>,
    token: Mutex<Option<TokenRecord>>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ListResponse {
    #[serde(default)]
    messages: Vec<MessageRef>,
    #[serde(default)]
    next_page_token: Option<String>,
}

#[derive(Deserialize)]
struct MessageRef {
    id: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct FullMessage {
    id: String,
    #[serde(default)]
    thread_id: String,
    #[serde(default)]
    label_ids: Vec<String>,
    /// Milliseconds since the epoch, as a string.
    #[serde(default)]
    internal_date: Option<String>,
    #[serde(default)]
    payload: MimePart,
}

#[derive(Deserialize)]
struct AttachmentResponse {
    #[serde(default)]
    data: String,
}

#[derive(Deserialize)]
struct RefreshResponse {
    access_token: String,
    #[serde(default)]
    expires_in: Option<i64>,
    #[serde(default)]
    refresh_token: Option<String>,
    #[serde(default)]
    scope: Option<String>,
}

/// Gmail search query selecting `window`.
pub fn window_query(window: &TimeWindow) -> String {
    format!(
        "after:{} before:{}",
        window.start.timestamp(),
        window.end.timestamp()
    )
}

impl GmailMailbox {
    /// Client credentials are read from the environment variables named in
    /// `config`.
    pub fn new(config: &GmailConfig, max_results: u32, store: Arc<dyn TokenStore>) -> Result<Self> {
        let client_id = std::env::var(&config.client_id_env)
            .map_err(|_| anyhow!("{} not set", config.client_id_env))?;
        let client_secret = std::env::var(&config.client_secret_env)
            .map_err(|_| anyhow!("{} not set", config.client_secret_env))?;

        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(60))
            .build()?;

        Ok(Self {
            http,
            api_base: config.api_base.trim_end_matches('/').to_string(),
            token_url: config.token_url.clone(),
            client_id,
            client_secret,
            max_results,
            store,
            token: Mutex::new(None),
        })
    }

    /// Current access token, refreshed first if it is about to expire.
    async fn access_token(&self) -> Result<String> {
        let mut guard = self.token.lock().await;
        let token = match guard.take() {
            Some(token) => token,
            None => self
                .store
                .load()
                .await?
                .context("mailbox is not open: no stored Gmail token")?,
        };

        let token = if token.is_expired(Utc::now()) {
            self.refresh(&token).await?
        } else {
            token
        };
        let access = token.access_token.clone();
        *guard = Some(token);
        Ok(access)
    }

    async fn refresh(&self, token: &TokenRecord) -> Result<TokenRecord> {
        let refresh_token = token
            .refresh_token
            .as_deref()
            .context("Gmail token expired and has no refresh_token; re-authorize")?;

        let resp = self
            .http
            .post(&self.token_url)
            .form(&[
                ("grant_type", "refresh_token"),
                ("refresh_token", refresh_token),
                ("client_id", self.client_id.as_str()),
                ("client_secret", self.client_secret.as_str()),
            ])
            .send()
            .await
            .context("Gmail token refresh request failed")?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            bail!("Gmail token refresh failed (HTTP {}): {}", status, body);
        }

        let refreshed: RefreshResponse = resp.json().await?;
        let record = TokenRecord {
            access_token: refreshed.access_token,
            refresh_token: refreshed
                .refresh_token
                .or_else(|| token.refresh_token.clone()),
            expires_at: refreshed
                .expires_in
                .map(|secs| Utc::now() + chrono::Duration::seconds(secs)),
            scope: refreshed.scope.or_else(|| token.scope.clone()),
        };
        self.store.save(&record).await?;
        info!("refreshed Gmail access token");
        Ok(record)
    }

    async fn get_json<T: serde::de::DeserializeOwned>(
        &self,
        url: &str,
        query: &[(&str, String)],
    ) -> Result<T> {
        let token = self.access_token().await?;
        let resp = self
            .http
            .get(url)
            .bearer_auth(token)
            .query(query)
            .send()
            .await
            .with_context(|| format!("Gmail request failed: {}", url))?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            bail!(
                "Gmail API error (HTTP {}): {}",
                status,
                body.chars().take(500).collect::<String>()
            );
        }
        Ok(resp.json().await?)
    }
}

#[async_trait]
impl MailboxProvider for GmailMailbox {
    fn name(&self) -> &str {
        "gmail"
    }

    async fn open(&self) -> Result<()> {
        self.access_token().await?;
        Ok(())
    }

    async fn list_messages(&self, window: &TimeWindow, label: &str) -> Result<Vec<String>> {
        let url = format!("{}/users/me/messages", self.api_base);
        let mut ids = Vec::new();
        let mut page_token: Option<String> = None;

        loop {
            let mut query = vec![
                ("q", window_query(window)),
                ("labelIds", label.to_string()),
                ("maxResults", self.max_results.to_string()),
            ];
            if let Some(token) = &page_token {
                query.push(("pageToken", token.clone()));
            }

            let page: ListResponse = self.get_json(&url, &query).await?;
            ids.extend(page.messages.into_iter().map(|m| m.id));

            match page.next_page_token {
                Some(next) if ids.len() < self.max_results as usize => page_token = Some(next),
                _ => break,
            }
        }

        ids.truncate(self.max_results as usize);
        debug!(count = ids.len(), %window, "listed Gmail messages");
        Ok(ids)
    }

    async fn get_message(&self, id: &str) -> Result<RawMessage> {
        let url = format!("{}/users/me/messages/{}", self.api_base, id);
        let full: FullMessage = self
            .get_json(&url, &[("format", "full".to_string())])
            .await?;

        let received_at = full
            .internal_date
            .as_deref()
            .and_then(|ms| ms.parse::<i64>().ok())
            .and_then(DateTime::<Utc>::from_timestamp_millis)
            .unwrap_or_else(Utc::now);

        Ok(RawMessage {
            id: full.id,
            thread_id: full.thread_id,
            labels: full.label_ids,
            received_at,
            payload: full.payload,
        })
    }

    async fn get_attachment(&self, message_id: &str, attachment_id: &str) -> Result<Vec<u8>> {
        let url = format!(
            "{}/users/me/messages/{}/attachments/{}",
            self.api_base, message_id, attachment_id
        );
        let attachment: AttachmentResponse = self.get_json(&url, &[]).await?;
        decode_body_data(&attachment.data)
            .with_context(|| format!("attachment {} is not valid base64url", attachment_id))
    }

    async fn close(&self) -> Result<()> {
        self.token.lock().await.take();
        Ok(())
    }
}
