// Presence reconciliation: keeps at most one board entry per user who is
// currently in a monitored space.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

use anyhow::Result;
use tracing::{debug, info, warn};

use crate::classify::Category;
use crate::config::AffiliationConfig;
use crate::db::Database;
use crate::host::{DeleteOutcome, Member, PresenceHost};
use crate::render::{board_message, BoardData};
use crate::roster::RosterCache;

/// A posted board entry for one tracked user.
#[derive(Debug, Clone)]
struct Entry {
    message_id: String,
    member: Member,
}

/// Watches presence transitions in the monitored spaces and mirrors them
/// onto the board space: an arrival posts an entry, a departure removes it.
pub struct PresenceReconciler {
    db: Arc<Database>,
    host: Arc<dyn PresenceHost>,
    roster: Arc<RosterCache>,
    monitored: HashSet<String>,
    board_space: String,
    entries: Mutex<HashMap<String, Entry>>,
}

impl PresenceReconciler {
    pub fn new(
        db: Arc<Database>,
        host: Arc<dyn PresenceHost>,
        roster: Arc<RosterCache>,
        monitored: impl IntoIterator<Item = String>,
        board_space: String,
    ) -> Self {
        PresenceReconciler {
            db,
            host,
            roster,
            monitored: monitored.into_iter().collect(),
            board_space,
            entries: Mutex::new(HashMap::new()),
        }
    }

    pub fn is_tracked(&self, user_id: &str) -> bool {
        self.entries().contains_key(user_id)
    }

    fn entries(&self) -> std::sync::MutexGuard<'_, HashMap<String, Entry>> {
        self.entries.lock().expect("presence entry map poisoned")
    }

    fn is_monitored(&self, space: Option<&str>) -> bool {
        space.is_some_and(|s| self.monitored.contains(s))
    }

    /// React to one presence transition. Moves between two monitored spaces
    /// and moves entirely outside them are no-ops.
    pub async fn handle_move(
        &self,
        member: &Member,
        prev_space: Option<&str>,
        new_space: Option<&str>,
    ) -> Result<()> {
        if member.is_bot {
            return Ok(());
        }
        let was_present = self.is_monitored(prev_space);
        let now_present = self.is_monitored(new_space);
        match (was_present, now_present) {
            (false, true) => self.post_entry(member).await,
            (true, false) => self.remove_entry(&member.user_id).await,
            _ => Ok(()),
        }
    }

    /// Post a board entry for `member` unless one already exists. With no
    /// active period there is nothing to show, so the arrival is dropped
    /// without posting.
    async fn post_entry(&self, member: &Member) -> Result<()> {
        if self.is_tracked(&member.user_id) {
            debug!("already tracking {}, ignoring repeat arrival", member.user_id);
            return Ok(());
        }
        let Some(payload) = self.compose(member).await? else {
            debug!("no active period, skipping entry for {}", member.user_id);
            return Ok(());
        };

        let message_id = self.host.send_message(&self.board_space, &payload).await?;
        info!("posted board entry for {}", member.user_id);

        let displaced = self.entries().insert(
            member.user_id.clone(),
            Entry {
                message_id,
                member: member.clone(),
            },
        );
        // Two near-simultaneous arrivals can both pass the tracked check;
        // the loser's message is cleaned up here.
        if let Some(old) = displaced {
            self.delete_tolerant(&old.message_id).await;
        }
        Ok(())
    }

    /// Drop the board entry for `user_id`, if any. A message already gone
    /// from the board counts as success.
    async fn remove_entry(&self, user_id: &str) -> Result<()> {
        let Some(entry) = self.entries().remove(user_id) else {
            debug!("departure for untracked user {user_id}, nothing to remove");
            return Ok(());
        };
        match self
            .host
            .delete_message(&self.board_space, &entry.message_id)
            .await?
        {
            DeleteOutcome::Deleted => info!("removed board entry for {user_id}"),
            DeleteOutcome::NotFound => {
                debug!("board entry for {user_id} was already gone");
            }
        }
        Ok(())
    }

    /// Re-render a tracked user's entry after their selections changed:
    /// drop the old message, then post a freshly composed one. Replace
    /// rather than edit keeps rendering single-path.
    pub async fn refresh_entry(&self, user_id: &str) -> Result<()> {
        let Some(entry) = self.entries().remove(user_id) else {
            return Ok(());
        };
        self.delete_tolerant(&entry.message_id).await;

        let Some(payload) = self.compose(&entry.member).await? else {
            // Period ended mid-session; the stale entry stays down.
            info!("period ended, board entry for {user_id} not reposted");
            return Ok(());
        };
        let message_id = self.host.send_message(&self.board_space, &payload).await?;
        self.entries().insert(
            user_id.to_string(),
            Entry {
                message_id,
                member: entry.member,
            },
        );
        Ok(())
    }

    /// Reconcile the board with who is present right now. Run once at
    /// startup; safe to run again (already-tracked users are skipped).
    pub async fn startup_sweep(&self) -> Result<()> {
        for space in &self.monitored {
            let members = match self.host.fetch_members(space).await {
                Ok(members) => members,
                Err(e) => {
                    warn!("startup sweep failed to list {space}: {e:#}");
                    continue;
                }
            };
            for member in &members {
                if member.is_bot {
                    continue;
                }
                if let Err(e) = self.post_entry(member).await {
                    warn!("startup sweep failed for {}: {e:#}", member.user_id);
                }
            }
        }
        Ok(())
    }

    async fn delete_tolerant(&self, message_id: &str) {
        match self.host.delete_message(&self.board_space, message_id).await {
            Ok(_) => {}
            Err(e) => warn!("failed to delete superseded message {message_id}: {e:#}"),
        }
    }

    /// Build the rendered board message for a member, or `None` when no
    /// period is active.
    async fn compose(&self, member: &Member) -> Result<Option<String>> {
        let Some(period) = self.db.active_period()? else {
            return Ok(None);
        };

        let selections = self.db.selections_for(&member.user_id, &period.br_band)?;
        let loadout = Category::ALL
            .iter()
            .map(|&category| {
                let items = selections
                    .iter()
                    .filter(|item| item.category() == category)
                    .cloned()
                    .collect();
                (category, items)
            })
            .collect();

        let game_name = member.game_name();
        let stats = match self.affiliation_for(member) {
            Some(aff) => self.roster.lookup(&game_name, &aff.name).await?,
            None => None,
        };

        let data = BoardData {
            display_name: game_name,
            br_band: period.br_band,
            loadout,
            stats,
        };
        Ok(Some(board_message(&data)))
    }

    /// First configured affiliation whose role tag the member carries.
    fn affiliation_for(&self, member: &Member) -> Option<&AffiliationConfig> {
        self.roster
            .affiliations()
            .iter()
            .find(|aff| member.role_tags.iter().any(|tag| tag == &aff.role_tag))
    }
}
