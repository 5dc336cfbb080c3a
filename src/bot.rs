//! Bot dispatcher: inbound events in, replies out.
//!
//! A chat front end forwards two kinds of events to [`Bot`]:
//!
//! * [`Bot::on_file_upload`] — a document arrived
//! * [`Bot::on_command`] — the user typed `/start`, `/convert` or `/merge`
//!
//! Every outcome reaches the user through the [`Gateway`]: files for results,
//! text for acknowledgements and failures. Nothing is dropped silently. The
//! handlers only return `Err` when the gateway itself cannot deliver.
//!
//! `Bot` is cheap to clone, so a front end can spawn one tokio task per event.
//! Events for the same user serialise on that user's workspace lock; events
//! for different users run in parallel.

use crate::convert::Pipeline;
use crate::error::BotError;
use crate::gateway::Gateway;
use crate::workspace::{DocumentKind, UserId};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use tracing::{info, warn};

/// Greeting sent for `/start` and `/help`.
pub const GREETING: &str = "📄 Send me HTML files and then /convert to get them back as PDFs in a zip.\n\
📎 Or send PDF files and then /merge to join them into one PDF (merged in filename order).";

/// A command a user can issue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Start,
    Help,
    Convert,
    Merge,
}

impl FromStr for Command {
    type Err = String;

    /// Accepts `start`, `/start`, `/start@SomeBot` and friends, case-insensitively.
    /// Only the first word counts: `/merge please` is `/merge`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let word = s.split_whitespace().next().unwrap_or("");
        let word = word.trim_start_matches('/');
        let word = word.split('@').next().unwrap_or(word);
        match word.to_ascii_lowercase().as_str() {
            "start" => Ok(Command::Start),
            "help" => Ok(Command::Help),
            "convert" => Ok(Command::Convert),
            "merge" => Ok(Command::Merge),
            _ => Err(format!("Unknown command '{}'", s.trim())),
        }
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Command::Start => "start",
            Command::Help => "help",
            Command::Convert => "convert",
            Command::Merge => "merge",
        };
        write!(f, "/{name}")
    }
}

/// Routes inbound gateway events to the workspace store and the pipeline.
#[derive(Clone)]
pub struct Bot {
    pipeline: Arc<Pipeline>,
    gateway: Arc<dyn Gateway>,
}

impl fmt::Debug for Bot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Bot")
            .field("pipeline", &self.pipeline)
            .field("gateway", &"<dyn Gateway>")
            .finish()
    }
}

impl Bot {
    pub fn new(pipeline: Arc<Pipeline>, gateway: Arc<dyn Gateway>) -> Self {
        Self { pipeline, gateway }
    }

    pub fn pipeline(&self) -> &Arc<Pipeline> {
        &self.pipeline
    }

    /// Stage an uploaded document and acknowledge it.
    pub async fn on_file_upload(
        &self,
        user: &UserId,
        filename: &str,
        bytes: &[u8],
    ) -> Result<(), BotError> {
        let store = self.pipeline.store();
        let staged = match store.ensure_workspace(user).await {
            Ok(workspace) => store.stage(&workspace, filename, bytes).await,
            Err(e) => Err(e),
        };

        let reply = match staged {
            Ok(doc) => {
                let next = match doc.kind {
                    DocumentKind::Html => Command::Convert,
                    DocumentKind::Pdf => Command::Merge,
                };
                format!("✅ Received {}. Send more files or {next} when ready.", doc.filename)
            }
            Err(e) => {
                warn!("Upload '{}' from user {} rejected: {}", filename, user, e);
                format!("⚠️ {e}")
            }
        };
        self.gateway.send_text(user, &reply).await?;
        Ok(())
    }

    /// Run a command and report its outcome.
    pub async fn on_command(&self, user: &UserId, command: Command) -> Result<(), BotError> {
        info!("User {} issued {}", user, command);
        let result = match command {
            Command::Start | Command::Help => {
                self.gateway.send_text(user, GREETING).await?;
                return Ok(());
            }
            Command::Convert => self
                .pipeline
                .convert(user, self.gateway.as_ref())
                .await
                .map(|_| ()),
            Command::Merge => self
                .pipeline
                .merge(user, self.gateway.as_ref())
                .await
                .map(|_| ()),
        };

        match result {
            Ok(()) => Ok(()),
            // The gateway is already failing; another text would fail too.
            Err(e @ BotError::Delivery(_)) => Err(e),
            Err(e) => {
                warn!("{} failed for user {}: {}", command, user, e);
                self.gateway.send_text(user, &format!("⚠️ {e}")).await?;
                Ok(())
            }
        }
    }

    /// Parse free text as a command; unknown text gets the greeting.
    pub async fn on_text(&self, user: &UserId, text: &str) -> Result<(), BotError> {
        match text.parse::<Command>() {
            Ok(command) => self.on_command(user, command).await,
            Err(_) => {
                self.gateway.send_text(user, GREETING).await?;
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_commands() {
        assert_eq!("start".parse::<Command>().unwrap(), Command::Start);
        assert_eq!("/convert".parse::<Command>().unwrap(), Command::Convert);
        assert_eq!("/MERGE".parse::<Command>().unwrap(), Command::Merge);
        assert_eq!(" /merge@PdfBot ".parse::<Command>().unwrap(), Command::Merge);
        assert_eq!("/help".parse::<Command>().unwrap(), Command::Help);
        assert!("/split".parse::<Command>().is_err());
        assert!("hello /merge".parse::<Command>().is_err());
        assert!("".parse::<Command>().is_err());
    }

    #[test]
    fn trailing_words_are_ignored() {
        assert_eq!("/merge please".parse::<Command>().unwrap(), Command::Merge);
        assert_eq!("/convert now".parse::<Command>().unwrap(), Command::Convert);
        assert_eq!("/start@PdfBot hi".parse::<Command>().unwrap(), Command::Start);
    }

    #[test]
    fn command_display_is_slash_form() {
        assert_eq!(Command::Convert.to_string(), "/convert");
        assert_eq!(Command::Merge.to_string(), "/merge");
    }
}
