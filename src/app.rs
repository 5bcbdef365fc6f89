// Application event loop: a single task that owns the wizard sessions and
// reacts to host events, the roster refresh timer, and shutdown.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use tokio::sync::mpsc;
use tokio::time::Interval;
use tracing::{debug, info, warn};

use crate::db::Database;
use crate::host::Member;
use crate::presence::PresenceReconciler;
use crate::render::roster_page;
use crate::roster::RosterCache;
use crate::wizard::{StepOutcome, Wizard};

/// Events flowing in from the hosting platform.
#[derive(Debug, Clone)]
pub enum HostEvent {
    /// The gateway is connected and member lists are available.
    Ready,
    /// A member moved between spaces. `None` means "not in any space".
    MemberMoved {
        member: Member,
        prev_space: Option<String>,
        new_space: Option<String>,
    },
    /// A user asked to (re)build their loadout.
    WizardStart { user_id: String },
    /// A user answered the current wizard step.
    WizardChoice { user_id: String, chosen: Vec<i64> },
    /// A user skipped the current wizard step.
    WizardSkip { user_id: String },
    /// A user asked for a roster report page.
    RosterReport {
        affiliation: String,
        kind: ReportKind,
        page: usize,
    },
}

/// Members shown by the "top" roster report.
const TOP_REPORT_LIMIT: usize = 5;

/// Which roster report to produce.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReportKind {
    /// Highest scorers, one page worth.
    Top,
    /// Everyone above a score threshold.
    Over(i64),
    /// Everyone sitting at zero score.
    AtZero,
}

/// Replies the loop sends back toward the platform adapter.
#[derive(Debug, Clone, PartialEq)]
pub enum HostReply {
    /// Present a wizard step to the user.
    WizardPrompt {
        user_id: String,
        category: String,
        /// (item id, item name) pairs in display order.
        offered: Vec<(i64, String)>,
        preselected: Vec<i64>,
        truncated: bool,
    },
    /// The wizard finished all categories.
    WizardDone { user_id: String },
    /// A short informational or error message for one user.
    Notice { user_id: String, text: String },
    /// One rendered roster report page.
    ReportPage { text: String },
}

/// Owns all mutable session state. Everything here is touched only from the
/// event loop task, so no locking is needed beyond what the components do
/// internally.
pub struct App {
    db: Arc<Database>,
    roster: Arc<RosterCache>,
    presence: Arc<PresenceReconciler>,
    offer_limit: usize,
    refresh_interval: Duration,
    /// In-flight wizard sessions by user id. Starting a new session
    /// replaces any previous one for the same user.
    sessions: HashMap<String, Wizard>,
    reply_tx: mpsc::Sender<HostReply>,
}

impl App {
    pub fn new(
        db: Arc<Database>,
        roster: Arc<RosterCache>,
        presence: Arc<PresenceReconciler>,
        offer_limit: usize,
        refresh_interval: Duration,
        reply_tx: mpsc::Sender<HostReply>,
    ) -> Self {
        App {
            db,
            roster,
            presence,
            offer_limit,
            refresh_interval,
            sessions: HashMap::new(),
            reply_tx,
        }
    }

    /// Run until the event channel closes. The roster refresh timer is
    /// armed only after `Ready`, so nothing fires against a gateway that
    /// never came up.
    pub async fn run(mut self, mut events: mpsc::Receiver<HostEvent>) -> Result<()> {
        let mut refresh: Option<Interval> = None;

        loop {
            tokio::select! {
                maybe_event = events.recv() => {
                    let Some(event) = maybe_event else {
                        info!("event channel closed, shutting down");
                        break;
                    };
                    let was_ready = matches!(event, HostEvent::Ready);
                    self.handle_event(event).await;
                    if was_ready && refresh.is_none() {
                        let mut interval = tokio::time::interval(self.refresh_interval);
                        // The first tick completes immediately; consume it
                        // so the first refresh waits a full interval after
                        // Ready instead of firing on start.
                        interval.tick().await;
                        refresh = Some(interval);
                    }
                }
                _ = tick_if_armed(&mut refresh) => {
                    info!("roster refresh timer fired");
                    self.roster.refresh_all().await;
                }
            }
        }
        Ok(())
    }

    /// Dispatch one event. Failures are logged and the loop keeps going;
    /// one bad event must not take the service down.
    pub async fn handle_event(&mut self, event: HostEvent) {
        match event {
            HostEvent::Ready => {
                info!("gateway ready, sweeping monitored spaces");
                if let Err(e) = self.presence.startup_sweep().await {
                    warn!("startup sweep failed: {e:#}");
                }
                // The roster is not refreshed here: the refresh timer (armed
                // by `run` on this event) waits a full interval first, and
                // lookups backfill an empty affiliation on demand.
            }
            HostEvent::MemberMoved {
                member,
                prev_space,
                new_space,
            } => {
                if let Err(e) = self
                    .presence
                    .handle_move(&member, prev_space.as_deref(), new_space.as_deref())
                    .await
                {
                    warn!("presence update failed for {}: {e:#}", member.user_id);
                }
            }
            HostEvent::WizardStart { user_id } => self.start_wizard(&user_id).await,
            HostEvent::WizardChoice { user_id, chosen } => {
                self.advance_wizard(&user_id, Some(&chosen)).await;
            }
            HostEvent::WizardSkip { user_id } => self.advance_wizard(&user_id, None).await,
            HostEvent::RosterReport {
                affiliation,
                kind,
                page,
            } => self.roster_report(&affiliation, kind, page).await,
        }
    }

    async fn start_wizard(&mut self, user_id: &str) {
        match Wizard::start(&self.db, user_id, self.offer_limit) {
            Ok(Some(wizard)) => {
                if self.sessions.insert(user_id.to_string(), wizard).is_some() {
                    debug!("replacing in-flight wizard session for {user_id}");
                }
                self.send_prompt(user_id).await;
            }
            Ok(None) => {
                self.notice(user_id, "No period is active right now; try again later.")
                    .await;
            }
            Err(e) => {
                warn!("wizard start failed for {user_id}: {e:#}");
                self.notice(user_id, "Something went wrong starting the wizard.")
                    .await;
            }
        }
    }

    /// Advance a session: `Some(chosen)` submits the step, `None` skips it.
    async fn advance_wizard(&mut self, user_id: &str, chosen: Option<&[i64]>) {
        let Some(wizard) = self.sessions.get_mut(user_id) else {
            self.notice(user_id, "No wizard in progress; start one first.")
                .await;
            return;
        };

        let outcome = match chosen {
            Some(chosen) => match wizard.submit(&self.db, chosen) {
                Ok(outcome) => outcome,
                Err(e) => {
                    debug!("wizard submission rejected for {user_id}: {e:#}");
                    self.notice(user_id, &format!("That choice was not accepted: {e}"))
                        .await;
                    return;
                }
            },
            None => wizard.skip(),
        };

        match outcome {
            StepOutcome::InProgress => self.send_prompt(user_id).await,
            StepOutcome::Complete => {
                self.sessions.remove(user_id);
                self.reply(HostReply::WizardDone {
                    user_id: user_id.to_string(),
                })
                .await;
                if let Err(e) = self.presence.refresh_entry(user_id).await {
                    warn!("board refresh failed for {user_id}: {e:#}");
                }
            }
        }
    }

    async fn send_prompt(&mut self, user_id: &str) {
        let Some(step) = self
            .sessions
            .get(user_id)
            .and_then(|wizard| wizard.current_step())
        else {
            return;
        };
        let prompt = HostReply::WizardPrompt {
            user_id: user_id.to_string(),
            category: step.category.display_name().to_string(),
            offered: step
                .offered
                .iter()
                .map(|item| (item.id, item.name.clone()))
                .collect(),
            preselected: {
                let mut ids: Vec<i64> = step.preselected.iter().copied().collect();
                ids.sort_unstable();
                ids
            },
            truncated: step.truncated,
        };
        self.reply(prompt).await;
    }

    async fn roster_report(&mut self, affiliation: &str, kind: ReportKind, page: usize) {
        // Reports read the cache; an affiliation that has never been
        // fetched gets one backfill attempt first.
        if let Ok(0) = self.db.affiliation_count(affiliation) {
            if let Err(e) = self.roster.refresh_one(affiliation).await {
                warn!("report backfill failed for {affiliation}: {e:#}");
            }
        }

        let (title, members) = match kind {
            ReportKind::Top => (
                format!("Top {TOP_REPORT_LIMIT} members of {affiliation}"),
                self.db.top_members(affiliation, TOP_REPORT_LIMIT),
            ),
            ReportKind::Over(threshold) => (
                format!("Members of {affiliation} over {threshold}"),
                self.db.members_over(affiliation, threshold),
            ),
            ReportKind::AtZero => (
                format!("Members of {affiliation} at zero"),
                self.db.members_at_zero(affiliation),
            ),
        };
        match members {
            Ok(members) => {
                self.reply(HostReply::ReportPage {
                    text: roster_page(&title, &members, page),
                })
                .await;
            }
            Err(e) => warn!("roster report failed for {affiliation}: {e:#}"),
        }
    }

    async fn notice(&mut self, user_id: &str, text: &str) {
        self.reply(HostReply::Notice {
            user_id: user_id.to_string(),
            text: text.to_string(),
        })
        .await;
    }

    async fn reply(&mut self, reply: HostReply) {
        if self.reply_tx.send(reply).await.is_err() {
            warn!("reply channel closed, dropping outbound reply");
        }
    }
}

/// Tick the refresh interval if it has been armed; otherwise stay pending
/// so the select arm never fires.
async fn tick_if_armed(refresh: &mut Option<Interval>) {
    match refresh.as_mut() {
        Some(interval) => {
            interval.tick().await;
        }
        None => std::future::pending::<()>().await,
    }
}
