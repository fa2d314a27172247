//! Mailbox providers.
//!
//! A [`MailboxProvider`] is handed to the ingestion orchestrator at
//! construction; there is no process-wide client. Providers have an explicit
//! lifecycle: [`open`](MailboxProvider::open) acquires credentials (failure
//! here is fatal at startup), [`close`](MailboxProvider::close) releases them.
//!
//! | Provider | Backing |
//! |----------|---------|
//! | [`GmailMailbox`] | Gmail REST API, OAuth token from a [`TokenStore`] |
//! | [`MaildirMailbox`] | Directory of RFC 822 `.eml` files |

pub mod gmail;
pub mod maildir;
pub mod token;

use std::sync::Arc;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;

use po_intake_core::models::{RawMessage, TimeWindow};

use crate::config::Config;

pub use gmail::GmailMailbox;
pub use maildir::MaildirMailbox;
pub use token::{FileTokenStore, TokenRecord, TokenStore};

/// Source of raw email messages.
#[async_trait]
pub trait MailboxProvider: Send + Sync {
    /// Short identifier used in logs.
    fn name(&self) -> &str;

    /// Acquires credentials or verifies the backing store is reachable.
    async fn open(&self) -> Result<()>;

    /// Ids of messages in `label` that arrived within `window`
    /// (start inclusive, end exclusive).
    async fn list_messages(&self, window: &TimeWindow, label: &str) -> Result<Vec<String>>;

    async fn get_message(&self, id: &str) -> Result<RawMessage>;

    /// Decoded bytes of an attachment referenced from a message's MIME tree.
    async fn get_attachment(&self, message_id: &str, attachment_id: &str) -> Result<Vec<u8>>;

    async fn close(&self) -> Result<()>;
}

/// Builds the provider selected by `[mailbox] provider`.
pub fn build_mailbox(config: &Config) -> Result<Arc<dyn MailboxProvider>> {
    match config.mailbox.provider.as_str() {
        "gmail" => {
            let gmail = config
                .mailbox
                .gmail
                .as_ref()
                .context("mailbox.provider = 'gmail' requires [mailbox.gmail]")?;
            let store = Arc::new(FileTokenStore::new(gmail.token_path.clone()));
            Ok(Arc::new(GmailMailbox::new(
                gmail,
                config.mailbox.max_results,
                store,
            )?))
        }
        "maildir" => {
            let maildir = config
                .mailbox
                .maildir
                .as_ref()
                .context("mailbox.provider = 'maildir' requires [mailbox.maildir]")?;
            Ok(Arc::new(MaildirMailbox::new(maildir.root.clone())))
        }
        other => bail!("Unknown mailbox provider: '{}'", other),
    }
}
