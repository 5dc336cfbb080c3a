//! Messaging gateway: how replies get back to the user.
//!
//! The chat transport is not part of this crate. Anything that can send a
//! text and a file to a user implements [`Gateway`]; the pipeline and the bot
//! dispatcher only talk to that trait.
//!
//! [`OutboxGateway`] is the one concrete gateway shipped here. It writes files
//! to `<outbox>/<user dir>/` and appends texts to `<outbox>/<user dir>/messages.log`,
//! which is all a local front end (the CLI, tests) needs.

use crate::error::DeliveryError;
use crate::output::OutputBundle;
use crate::workspace::{sanitize_filename, UserId};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;
use tracing::{debug, info};

/// Outbound side of the messaging transport.
#[async_trait]
pub trait Gateway: Send + Sync {
    async fn send_text(&self, user: &UserId, text: &str) -> Result<(), DeliveryError>;

    async fn send_file(&self, user: &UserId, file: &OutputBundle) -> Result<(), DeliveryError>;
}

/// Name of the per-user text log inside the outbox.
pub const MESSAGES_LOG: &str = "messages.log";

/// [`Gateway`] that delivers into a local directory.
#[derive(Debug, Clone)]
pub struct OutboxGateway {
    root: PathBuf,
}

impl OutboxGateway {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Directory a user's deliveries land in.
    pub fn user_dir(&self, user: &UserId) -> PathBuf {
        self.root.join(user.dir_name())
    }

    /// Where a delivered file named `filename` ends up.
    pub fn file_path(&self, user: &UserId, filename: &str) -> PathBuf {
        self.user_dir(user).join(sanitize_filename(filename))
    }

    async fn prepare(&self, user: &UserId) -> Result<PathBuf, DeliveryError> {
        let dir = self.user_dir(user);
        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(|e| DeliveryError(format!("cannot create outbox {}: {e}", dir.display())))?;
        Ok(dir)
    }
}

#[async_trait]
impl Gateway for OutboxGateway {
    async fn send_text(&self, user: &UserId, text: &str) -> Result<(), DeliveryError> {
        let log = self.prepare(user).await?.join(MESSAGES_LOG);
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&log)
            .await
            .map_err(|e| DeliveryError(format!("cannot open {}: {e}", log.display())))?;
        file.write_all(format!("{text}\n").as_bytes())
            .await
            .map_err(|e| DeliveryError(format!("cannot write {}: {e}", log.display())))?;
        // tokio hands the write to a blocking thread; wait for it to land.
        file.flush()
            .await
            .map_err(|e| DeliveryError(format!("cannot flush {}: {e}", log.display())))?;
        debug!("Text for user {}: {}", user, text);
        Ok(())
    }

    async fn send_file(&self, user: &UserId, file: &OutputBundle) -> Result<(), DeliveryError> {
        self.prepare(user).await?;
        let path = self.file_path(user, &file.filename);
        tokio::fs::write(&path, &file.bytes)
            .await
            .map_err(|e| DeliveryError(format!("cannot write {}: {e}", path.display())))?;
        info!(
            "Delivered {} ({}, {} bytes) to user {}",
            file.filename,
            file.mime,
            file.len(),
            user
        );
        Ok(())
    }
}
