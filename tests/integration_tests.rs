// Integration tests for the hangar board.
//
// These tests exercise the full system end-to-end using the library crate's
// public API. They verify that the major subsystems (presence
// reconciliation, the selection wizard, the roster cache, and the persisted
// selection store) work together correctly against fake host adapters.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use chrono::{Duration as ChronoDuration, Utc};
use tokio::sync::mpsc;

use hangar_board::app::{App, HostEvent, HostReply, ReportKind};
use hangar_board::classify::Category;
use hangar_board::config::AffiliationConfig;
use hangar_board::db::Database;
use hangar_board::host::{DeleteOutcome, Member, PresenceHost, RawMemberRow, RosterSource};
use hangar_board::presence::PresenceReconciler;
use hangar_board::roster::RosterCache;
use hangar_board::wizard::{StepOutcome, Wizard};

// ===========================================================================
// Test doubles
// ===========================================================================

/// In-memory messaging host recording every send and delete.
#[derive(Default)]
struct RecordingHost {
    next_id: AtomicU64,
    sent: Mutex<Vec<(String, String)>>,
    deleted: Mutex<Vec<String>>,
    members: Mutex<HashMap<String, Vec<Member>>>,
}

impl RecordingHost {
    fn live_payloads(&self) -> Vec<String> {
        let deleted = self.deleted.lock().unwrap();
        self.sent
            .lock()
            .unwrap()
            .iter()
            .filter(|(id, _)| !deleted.contains(id))
            .map(|(_, payload)| payload.clone())
            .collect()
    }

    fn set_members(&self, space: &str, members: Vec<Member>) {
        self.members
            .lock()
            .unwrap()
            .insert(space.to_string(), members);
    }
}

#[async_trait]
impl PresenceHost for RecordingHost {
    async fn send_message(&self, _space_id: &str, payload: &str) -> Result<String> {
        let id = format!("msg-{}", self.next_id.fetch_add(1, Ordering::SeqCst));
        self.sent
            .lock()
            .unwrap()
            .push((id.clone(), payload.to_string()));
        Ok(id)
    }

    async fn delete_message(&self, _space_id: &str, message_id: &str) -> Result<DeleteOutcome> {
        let mut deleted = self.deleted.lock().unwrap();
        if deleted.iter().any(|d| d == message_id) {
            return Ok(DeleteOutcome::NotFound);
        }
        deleted.push(message_id.to_string());
        Ok(DeleteOutcome::Deleted)
    }

    async fn fetch_members(&self, space_id: &str) -> Result<Vec<Member>> {
        Ok(self
            .members
            .lock()
            .unwrap()
            .get(space_id)
            .cloned()
            .unwrap_or_default())
    }
}

/// Roster source with canned rosters per URL; URLs in `failing` error out.
#[derive(Default)]
struct CannedSource {
    rosters: HashMap<String, Vec<RawMemberRow>>,
    failing: Vec<String>,
}

impl CannedSource {
    fn with_roster(mut self, url: &str, rows: Vec<(&str, i64, &str)>) -> Self {
        self.rosters.insert(
            url.to_string(),
            rows.into_iter()
                .map(|(name, score, activity)| RawMemberRow {
                    name: name.into(),
                    score,
                    activity: activity.into(),
                })
                .collect(),
        );
        self
    }

    fn with_failure(mut self, url: &str) -> Self {
        self.failing.push(url.to_string());
        self
    }
}

#[async_trait]
impl RosterSource for CannedSource {
    async fn fetch_roster(&self, source_url: &str) -> Result<Vec<RawMemberRow>> {
        if self.failing.iter().any(|u| u == source_url) {
            return Err(anyhow!("simulated fetch failure"));
        }
        Ok(self.rosters.get(source_url).cloned().unwrap_or_default())
    }
}

// ===========================================================================
// Fixture assembly
// ===========================================================================

const BAND: &str = "6.7";

fn member(user_id: &str, display_name: &str) -> Member {
    Member {
        user_id: user_id.into(),
        display_name: display_name.into(),
        is_bot: false,
        role_tags: vec!["Blackfoot".into()],
    }
}

fn blackfoot() -> AffiliationConfig {
    AffiliationConfig {
        name: "Blackfoot".into(),
        source_url: "url-blackfoot".into(),
        role_tag: "Blackfoot".into(),
    }
}

struct Fixture {
    db: Arc<Database>,
    host: Arc<RecordingHost>,
    roster: Arc<RosterCache>,
    presence: Arc<PresenceReconciler>,
}

fn fixture(source: CannedSource, with_period: bool) -> Fixture {
    let db = Arc::new(Database::open(":memory:").unwrap());
    if with_period {
        let start = Utc::now() - ChronoDuration::hours(1);
        db.insert_period(BAND, start, start + ChronoDuration::hours(2))
            .unwrap();
    }
    let host = Arc::new(RecordingHost::default());
    let roster = Arc::new(RosterCache::new(
        Arc::clone(&db),
        Arc::new(source),
        vec![blackfoot()],
        vec!["@psn".into(), "@live".into(), "@xbox".into()],
    ));
    let presence = Arc::new(PresenceReconciler::new(
        Arc::clone(&db),
        Arc::clone(&host) as Arc<dyn PresenceHost>,
        Arc::clone(&roster),
        ["space-a".to_string(), "space-b".to_string()],
        "space-board".to_string(),
    ));
    Fixture {
        db,
        host,
        roster,
        presence,
    }
}

fn seed_band(db: &Database) -> (i64, i64) {
    let a = db.upsert_item("T-34-85", "ground", "USSR", BAND).unwrap();
    let b = db.upsert_item("IS-2", "ground", "USSR", BAND).unwrap();
    db.upsert_item("P-51D", "air", "USA", BAND).unwrap();
    db.upsert_item("Wirbelwind", "anti-air", "Germany", BAND)
        .unwrap();
    db.upsert_item("AH-1G", "rotary", "USA", BAND).unwrap();
    (a, b)
}

// ===========================================================================
// Selection store invariants
// ===========================================================================

#[test]
fn interleaved_scoped_writes_never_cross_categories() {
    let fx = fixture(CannedSource::default(), true);
    let (ground_a, ground_b) = seed_band(&fx.db);
    let air = fx.db.upsert_item("F8F", "air", "USA", BAND).unwrap();

    // Two "sessions" interleave writes in different categories.
    fx.db
        .replace_scoped("u1", BAND, Category::Air, &HashSet::from([air]))
        .unwrap();
    fx.db
        .replace_scoped("u1", BAND, Category::Ground, &HashSet::from([ground_a]))
        .unwrap();
    fx.db
        .replace_scoped("u1", BAND, Category::Ground, &HashSet::from([ground_b]))
        .unwrap();

    let selections = fx.db.selections_for("u1", BAND).unwrap();
    let ids: HashSet<i64> = selections.iter().map(|i| i.id).collect();
    assert_eq!(ids, HashSet::from([ground_b, air]));
}

#[test]
fn full_wizard_run_records_picks_and_sentinels() {
    let fx = fixture(CannedSource::default(), true);
    let (ground_a, ground_b) = seed_band(&fx.db);

    let mut wizard = Wizard::start(&fx.db, "u1", 25).unwrap().unwrap();
    assert_eq!(
        wizard.submit(&fx.db, &[ground_a, ground_b]).unwrap(),
        StepOutcome::InProgress
    );
    assert_eq!(wizard.submit(&fx.db, &[]).unwrap(), StepOutcome::InProgress);
    assert_eq!(wizard.submit(&fx.db, &[]).unwrap(), StepOutcome::InProgress);
    assert_eq!(wizard.submit(&fx.db, &[]).unwrap(), StepOutcome::Complete);

    let selections = fx.db.selections_for("u1", BAND).unwrap();
    let real: HashSet<i64> = selections
        .iter()
        .filter(|i| !i.is_sentinel())
        .map(|i| i.id)
        .collect();
    assert_eq!(real, HashSet::from([ground_a, ground_b]));
    assert_eq!(selections.iter().filter(|i| i.is_sentinel()).count(), 3);
}

#[test]
fn repeating_an_empty_wizard_run_leaves_no_duplicates() {
    let fx = fixture(CannedSource::default(), true);
    seed_band(&fx.db);

    for _ in 0..2 {
        let mut wizard = Wizard::start(&fx.db, "u1", 25).unwrap().unwrap();
        while !wizard.is_complete() {
            wizard.submit(&fx.db, &[]).unwrap();
        }
    }

    let selections = fx.db.selections_for("u1", BAND).unwrap();
    assert_eq!(selections.len(), 4);
    assert!(selections.iter().all(|i| i.is_sentinel()));
}

#[tokio::test]
async fn concurrent_wizards_last_write_wins() {
    let fx = fixture(CannedSource::default(), true);
    let (ground_a, ground_b) = seed_band(&fx.db);

    // Two sessions for the same user and category. Both are accepted; the
    // later submission's choices are what remains.
    let mut first = Wizard::start(&fx.db, "u1", 25).unwrap().unwrap();
    let mut second = Wizard::start(&fx.db, "u1", 25).unwrap().unwrap();

    first.submit(&fx.db, &[ground_a]).unwrap();
    second.submit(&fx.db, &[ground_b]).unwrap();

    let ground: Vec<i64> = fx
        .db
        .selections_for("u1", BAND)
        .unwrap()
        .into_iter()
        .filter(|i| i.category() == Category::Ground)
        .map(|i| i.id)
        .collect();
    assert_eq!(ground, vec![ground_b]);
}

// ===========================================================================
// Presence reconciliation
// ===========================================================================

#[tokio::test]
async fn duplicate_arrivals_keep_at_most_one_entry() {
    let fx = fixture(CannedSource::default(), true);
    let m = member("u1", "PilotX");

    fx.presence
        .handle_move(&m, None, Some("space-a"))
        .await
        .unwrap();
    fx.presence
        .handle_move(&m, None, Some("space-a"))
        .await
        .unwrap();
    fx.presence
        .handle_move(&m, Some("space-a"), Some("space-b"))
        .await
        .unwrap();

    assert_eq!(fx.host.live_payloads().len(), 1);

    fx.presence
        .handle_move(&m, Some("space-b"), None)
        .await
        .unwrap();
    assert!(fx.host.live_payloads().is_empty());
}

#[tokio::test]
async fn board_entry_without_selections_still_posts() {
    let source = CannedSource::default().with_roster("url-blackfoot", vec![("PilotX", 842, "34")]);
    let fx = fixture(source, true);

    fx.presence
        .handle_move(&member("u1", "PilotX@psn | squad"), None, Some("space-a"))
        .await
        .unwrap();

    let payloads = fx.host.live_payloads();
    assert_eq!(payloads.len(), 1);
    assert!(payloads[0].contains("No vehicles selected"));
    // Stats resolve through suffix stripping and the name-before-bar rule.
    assert!(payloads[0].contains("score 842"));
}

#[tokio::test]
async fn board_entry_posts_even_when_stats_are_missing() {
    let source = CannedSource::default().with_failure("url-blackfoot");
    let fx = fixture(source, true);

    fx.presence
        .handle_move(&member("u1", "Unknown"), None, Some("space-a"))
        .await
        .unwrap();

    let payloads = fx.host.live_payloads();
    assert_eq!(payloads.len(), 1);
    assert!(!payloads[0].contains("score"));
}

#[tokio::test]
async fn startup_sweep_twice_posts_each_member_once() {
    let fx = fixture(CannedSource::default(), true);
    fx.host.set_members(
        "space-a",
        vec![member("u1", "PilotX"), member("u2", "TankAce")],
    );
    fx.host.set_members("space-b", vec![member("u3", "AceHigh")]);

    fx.presence.startup_sweep().await.unwrap();
    fx.presence.startup_sweep().await.unwrap();

    assert_eq!(fx.host.live_payloads().len(), 3);
}

#[tokio::test]
async fn completed_wizard_refreshes_a_tracked_entry() {
    let fx = fixture(CannedSource::default(), true);
    let (ground_a, _) = seed_band(&fx.db);
    let m = member("u1", "PilotX");

    fx.presence
        .handle_move(&m, None, Some("space-a"))
        .await
        .unwrap();

    let mut wizard = Wizard::start(&fx.db, "u1", 25).unwrap().unwrap();
    wizard.submit(&fx.db, &[ground_a]).unwrap();
    while !wizard.is_complete() {
        wizard.skip();
    }
    fx.presence.refresh_entry("u1").await.unwrap();

    let payloads = fx.host.live_payloads();
    assert_eq!(payloads.len(), 1);
    assert!(payloads[0].contains("T-34-85"));
}

// ===========================================================================
// Roster cache semantics
// ===========================================================================

#[tokio::test]
async fn cache_failure_is_non_destructive() {
    let good = CannedSource::default().with_roster("url-blackfoot", vec![("PilotX", 842, "34")]);
    let fx = fixture(good, true);
    fx.roster.refresh_all().await;
    assert!(fx
        .roster
        .lookup("PilotX", "Blackfoot")
        .await
        .unwrap()
        .is_some());

    // Swap in a failing source against the same database.
    let failing = RosterCache::new(
        Arc::clone(&fx.db),
        Arc::new(CannedSource::default().with_failure("url-blackfoot")),
        vec![blackfoot()],
        vec!["@psn".into()],
    );
    failing.refresh_all().await;

    // The previously cached rows survive the failed cycle.
    assert_eq!(
        failing
            .lookup("PilotX", "Blackfoot")
            .await
            .unwrap()
            .unwrap()
            .score,
        842
    );
}

#[tokio::test]
async fn suffixed_and_plain_names_share_one_cache_row() {
    let source =
        CannedSource::default().with_roster("url-blackfoot", vec![("PilotX@psn", 842, "34")]);
    let fx = fixture(source, true);
    fx.roster.refresh_all().await;

    for query in ["PilotX", "PilotX@psn", "PilotX@PSN", "  PilotX@live "] {
        let stat = fx.roster.lookup(query, "Blackfoot").await.unwrap();
        assert_eq!(stat.unwrap().score, 842, "query: {query}");
    }
    assert_eq!(fx.db.affiliation_count("Blackfoot").unwrap(), 1);
}

// ===========================================================================
// Event loop end-to-end
// ===========================================================================

fn spawn_app(fx: &Fixture) -> (mpsc::Sender<HostEvent>, mpsc::Receiver<HostReply>) {
    let (event_tx, event_rx) = mpsc::channel(64);
    let (reply_tx, reply_rx) = mpsc::channel(64);
    let app = App::new(
        Arc::clone(&fx.db),
        Arc::clone(&fx.roster),
        Arc::clone(&fx.presence),
        25,
        Duration::from_secs(3600),
        reply_tx,
    );
    tokio::spawn(async move {
        let _ = app.run(event_rx).await;
    });
    (event_tx, reply_rx)
}

#[tokio::test]
async fn full_session_updates_the_board() {
    let source = CannedSource::default().with_roster("url-blackfoot", vec![("PilotX", 842, "34")]);
    let fx = fixture(source, true);
    let (ground_a, _) = seed_band(&fx.db);
    fx.host.set_members("space-a", vec![member("u1", "PilotX")]);

    let (events, mut replies) = spawn_app(&fx);

    events.send(HostEvent::Ready).await.unwrap();
    events
        .send(HostEvent::WizardStart {
            user_id: "u1".into(),
        })
        .await
        .unwrap();
    events
        .send(HostEvent::WizardChoice {
            user_id: "u1".into(),
            chosen: vec![ground_a],
        })
        .await
        .unwrap();
    for _ in 0..3 {
        events
            .send(HostEvent::WizardSkip {
                user_id: "u1".into(),
            })
            .await
            .unwrap();
    }

    // Wait for the completion reply.
    let done = loop {
        match replies.recv().await {
            Some(HostReply::WizardDone { user_id }) => break user_id,
            Some(_) => continue,
            None => panic!("reply channel closed before completion"),
        }
    };
    assert_eq!(done, "u1");

    let payloads = fx.host.live_payloads();
    assert_eq!(payloads.len(), 1);
    assert!(payloads[0].contains("T-34-85"));
    assert!(payloads[0].contains("score 842"));
}

#[tokio::test]
async fn roster_report_round_trip() {
    let source = CannedSource::default().with_roster(
        "url-blackfoot",
        vec![("alpha", 900, "45"), ("bravo", 0, "0"), ("charlie", 1200, "60")],
    );
    let fx = fixture(source, true);
    let (events, mut replies) = spawn_app(&fx);

    events
        .send(HostEvent::RosterReport {
            affiliation: "Blackfoot".into(),
            kind: ReportKind::Over(850),
            page: 0,
        })
        .await
        .unwrap();

    match replies.recv().await.unwrap() {
        HostReply::ReportPage { text } => {
            assert!(text.contains("1. charlie"));
            assert!(text.contains("2. alpha"));
            assert!(!text.contains("bravo"));
        }
        other => panic!("expected ReportPage, got {other:?}"),
    }
}
