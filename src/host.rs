// External collaborator seams: the presence/messaging host and the roster
// source. The core only talks to these traits; production adapters and test
// fakes both live behind them.

use anyhow::Result;
use async_trait::async_trait;
use tracing::info;

/// A member of the hosting community as the platform reports it.
#[derive(Debug, Clone, PartialEq)]
pub struct Member {
    /// Stable platform identifier for the user.
    pub user_id: String,
    /// Nickname or username as shown in the community. A nickname of the
    /// form `"GameName | anything"` carries the in-game name before the bar.
    pub display_name: String,
    /// Bots never get board entries.
    pub is_bot: bool,
    /// Externally-assigned role/tag names, used to resolve the member's
    /// affiliation.
    pub role_tags: Vec<String>,
}

impl Member {
    /// Derive the in-game name used for roster stat lookups.
    ///
    /// `"PilotX | callsign"` yields `"PilotX"`; otherwise the trimmed
    /// display name is used as-is.
    pub fn game_name(&self) -> String {
        match self.display_name.split_once('|') {
            Some((head, _)) => head.trim().to_string(),
            None => self.display_name.trim().to_string(),
        }
    }
}

/// Result of a message delete. The host distinguishes "deleted" from
/// "already gone"; callers treat both as success.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeleteOutcome {
    Deleted,
    NotFound,
}

/// The presence/messaging side of the hosting platform.
#[async_trait]
pub trait PresenceHost: Send + Sync {
    /// Post a rendered payload into a space, returning the new message id.
    async fn send_message(&self, space_id: &str, payload: &str) -> Result<String>;

    /// Delete a previously posted message. Must report
    /// [`DeleteOutcome::NotFound`] (not an error) when the message is
    /// already gone.
    async fn delete_message(&self, space_id: &str, message_id: &str) -> Result<DeleteOutcome>;

    /// List the members currently inside a space.
    async fn fetch_members(&self, space_id: &str) -> Result<Vec<Member>>;
}

/// One scraped roster row, before normalization.
#[derive(Debug, Clone, PartialEq)]
pub struct RawMemberRow {
    pub name: String,
    pub score: i64,
    pub activity: String,
}

/// Fetches the membership roster for one affiliation source. Failure is
/// distinguishable from an empty roster.
#[async_trait]
pub trait RosterSource: Send + Sync {
    async fn fetch_roster(&self, source_url: &str) -> Result<Vec<RawMemberRow>>;
}

/// Stand-in [`PresenceHost`] used when the binary runs without a gateway
/// attached: sends are logged and assigned synthetic ids, deletes always
/// succeed, and every space is empty. Real deployments wire a platform
/// adapter in its place.
pub struct LoggingHost {
    counter: std::sync::atomic::AtomicU64,
}

impl LoggingHost {
    pub fn new() -> Self {
        LoggingHost {
            counter: std::sync::atomic::AtomicU64::new(0),
        }
    }
}

impl Default for LoggingHost {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl PresenceHost for LoggingHost {
    async fn send_message(&self, space_id: &str, payload: &str) -> Result<String> {
        let id = self
            .counter
            .fetch_add(1, std::sync::atomic::Ordering::Relaxed);
        info!("send to {space_id} (msg-{id}):\n{payload}");
        Ok(format!("msg-{id}"))
    }

    async fn delete_message(&self, space_id: &str, message_id: &str) -> Result<DeleteOutcome> {
        info!("delete {message_id} in {space_id}");
        Ok(DeleteOutcome::Deleted)
    }

    async fn fetch_members(&self, _space_id: &str) -> Result<Vec<Member>> {
        Ok(Vec::new())
    }
}
