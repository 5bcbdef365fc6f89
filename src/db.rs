// SQLite persistence layer: scheduling periods, vehicle items, user
// selections, and cached member stats.

use std::collections::HashSet;
use std::sync::{Mutex, MutexGuard};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};

use crate::classify::{classify, Category};

/// Name used by the reserved "chose nothing" rows, one per (category, band).
pub const SENTINEL_NAME: &str = "N/A";

/// Origin that sorts after every other origin in item listings.
pub const ORIGIN_OTHER: &str = "Other";

/// One scheduling window with its battle-rating band. Exactly one period is
/// active at any instant, or none.
#[derive(Debug, Clone, PartialEq)]
pub struct Period {
    pub id: i64,
    /// Normalized band (trailing `.0` stripped, so `"6.0"` reads as `"6"`).
    pub br_band: String,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

/// A selectable vehicle. Category is derived from `type_label` via
/// [`classify`], never stored.
#[derive(Debug, Clone, PartialEq)]
pub struct Item {
    pub id: i64,
    pub name: String,
    pub type_label: String,
    pub origin: String,
    pub br_band: String,
}

impl Item {
    pub fn category(&self) -> Category {
        classify(&self.type_label)
    }

    /// True for the reserved "chose nothing" rows.
    pub fn is_sentinel(&self) -> bool {
        self.name == SENTINEL_NAME
    }
}

/// One cached roster row, keyed by normalized member name.
#[derive(Debug, Clone, PartialEq)]
pub struct MemberStat {
    pub name: String,
    pub affiliation: String,
    pub score: i64,
    pub activity: String,
    pub updated_at: DateTime<Utc>,
}

/// Strip a trailing `.0` from a battle-rating band so `"6.0"` and `"6"`
/// compare equal everywhere downstream.
pub fn normalize_band(band: &str) -> String {
    match band.strip_suffix(".0") {
        Some(stripped) => stripped.to_string(),
        None => band.to_string(),
    }
}

/// SQLite-backed store for periods, items, selections, and member stats.
pub struct Database {
    conn: Mutex<Connection>,
}

impl Database {
    /// Open (or create) a SQLite database at `path` and ensure all tables
    /// exist. Pass `":memory:"` for an ephemeral in-memory database
    /// (useful for tests).
    pub fn open(path: &str) -> Result<Self> {
        let conn = Connection::open(path)
            .with_context(|| format!("failed to open database at {path}"))?;

        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA busy_timeout = 5000;
             PRAGMA foreign_keys = ON;",
        )
        .context("failed to set database pragmas")?;

        conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS period (
                id      INTEGER PRIMARY KEY AUTOINCREMENT,
                br_band TEXT NOT NULL,
                start   TEXT NOT NULL,
                end     TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS item (
                id         INTEGER PRIMARY KEY AUTOINCREMENT,
                name       TEXT NOT NULL,
                type_label TEXT NOT NULL,
                origin     TEXT NOT NULL,
                br_band    TEXT NOT NULL,
                UNIQUE(name, type_label, br_band)
            );

            CREATE TABLE IF NOT EXISTS selection (
                user_id TEXT NOT NULL,
                item_id INTEGER NOT NULL REFERENCES item(id),
                UNIQUE(user_id, item_id)
            );

            CREATE TABLE IF NOT EXISTS member_stat (
                name        TEXT PRIMARY KEY,
                affiliation TEXT NOT NULL,
                score       INTEGER NOT NULL,
                activity    TEXT NOT NULL,
                updated_at  TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_item_band ON item(br_band);
            CREATE INDEX IF NOT EXISTS idx_member_stat_affiliation
                ON member_stat(affiliation);
            ",
        )
        .context("failed to create database schema")?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Acquire the database connection.
    ///
    /// Panics if the mutex is poisoned (another thread panicked while
    /// holding the lock). This should never happen in normal operation.
    fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().expect("database mutex poisoned")
    }

    // ------------------------------------------------------------------
    // Periods
    // ------------------------------------------------------------------

    /// Insert a scheduling period. Returns its row id.
    pub fn insert_period(
        &self,
        br_band: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<i64> {
        let conn = self.conn();
        conn.execute(
            "INSERT INTO period (br_band, start, end) VALUES (?1, ?2, ?3)",
            params![br_band, start.to_rfc3339(), end.to_rfc3339()],
        )
        .context("failed to insert period")?;
        Ok(conn.last_insert_rowid())
    }

    /// The period whose `[start, end)` window contains `now`, if any.
    pub fn active_period_at(&self, now: DateTime<Utc>) -> Result<Option<Period>> {
        let conn = self.conn();
        let now_str = now.to_rfc3339();
        let row = conn
            .query_row(
                "SELECT id, br_band, start, end FROM period
                 WHERE ?1 >= start AND ?1 < end
                 LIMIT 1",
                params![now_str],
                |row| {
                    Ok((
                        row.get::<_, i64>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, String>(3)?,
                    ))
                },
            )
            .optional()
            .context("failed to query active period")?;

        match row {
            Some((id, band, start, end)) => Ok(Some(Period {
                id,
                br_band: normalize_band(&band),
                start: parse_timestamp(&start)?,
                end: parse_timestamp(&end)?,
            })),
            None => Ok(None),
        }
    }

    /// Convenience wrapper over [`Database::active_period_at`] using the
    /// current wall clock.
    pub fn active_period(&self) -> Result<Option<Period>> {
        self.active_period_at(Utc::now())
    }

    // ------------------------------------------------------------------
    // Items
    // ------------------------------------------------------------------

    /// Insert an item or update its origin if the (name, type, band) row
    /// already exists. Returns the row id.
    pub fn upsert_item(
        &self,
        name: &str,
        type_label: &str,
        origin: &str,
        br_band: &str,
    ) -> Result<i64> {
        let conn = self.conn();
        let id: i64 = conn
            .query_row(
                "INSERT INTO item (name, type_label, origin, br_band)
                 VALUES (?1, ?2, ?3, ?4)
                 ON CONFLICT(name, type_label, br_band) DO UPDATE SET
                    origin = excluded.origin
                 RETURNING id",
                params![name, type_label, origin, br_band],
                |row| row.get(0),
            )
            .context("failed to upsert item")?;
        Ok(id)
    }

    /// All non-sentinel items for a band, in display order: category, then
    /// origin (with `"Other"` last), then name.
    pub fn items_for_band(&self, br_band: &str) -> Result<Vec<Item>> {
        let conn = self.conn();
        let mut stmt = conn
            .prepare(
                "SELECT id, name, type_label, origin, br_band FROM item
                 WHERE br_band = ?1 AND name != ?2",
            )
            .context("failed to prepare items_for_band query")?;
        let mut items = stmt
            .query_map(params![br_band, SENTINEL_NAME], item_from_row)
            .context("failed to query items")?
            .collect::<std::result::Result<Vec<_>, _>>()
            .context("failed to map item rows")?;
        drop(stmt);
        sort_items(&mut items);
        Ok(items)
    }

    /// The reserved "chose nothing" item for a category within a band,
    /// created on first use. Sentinels carry the band they were recorded
    /// under, so an empty choice in one period never shows up in another.
    pub fn sentinel_item(&self, category: Category, br_band: &str) -> Result<Item> {
        let conn = self.conn();
        conn.execute(
            "INSERT OR IGNORE INTO item (name, type_label, origin, br_band)
             VALUES (?1, ?2, ?3, ?4)",
            params![SENTINEL_NAME, category.label(), ORIGIN_OTHER, br_band],
        )
        .with_context(|| format!("failed to ensure sentinel for {category}"))?;
        conn.query_row(
            "SELECT id, name, type_label, origin, br_band FROM item
             WHERE name = ?1 AND type_label = ?2 AND br_band = ?3",
            params![SENTINEL_NAME, category.label(), br_band],
            item_from_row,
        )
        .with_context(|| format!("sentinel item missing for {category}"))
    }

    // ------------------------------------------------------------------
    // Selections
    // ------------------------------------------------------------------

    /// A user's selected items for a band, sentinels included, in display
    /// order.
    pub fn selections_for(&self, user_id: &str, br_band: &str) -> Result<Vec<Item>> {
        let conn = self.conn();
        let mut stmt = conn
            .prepare(
                "SELECT i.id, i.name, i.type_label, i.origin, i.br_band
                 FROM selection s
                 JOIN item i ON i.id = s.item_id
                 WHERE s.user_id = ?1 AND i.br_band = ?2",
            )
            .context("failed to prepare selections_for query")?;
        let mut items = stmt
            .query_map(params![user_id, br_band], item_from_row)
            .context("failed to query selections")?
            .collect::<std::result::Result<Vec<_>, _>>()
            .context("failed to map selection rows")?;
        drop(stmt);
        sort_items(&mut items);
        Ok(items)
    }

    /// Replace a user's selections within one category of one band.
    ///
    /// `existing` is the user's current selections restricted to items whose
    /// category equals `category` (the category's sentinel included);
    /// `desired − existing` is inserted and `existing − desired` deleted.
    /// Selections in any other category are untouched regardless of what
    /// `desired` contains or how the band's item list has changed since the
    /// caller captured it.
    pub fn replace_scoped(
        &self,
        user_id: &str,
        br_band: &str,
        category: Category,
        desired: &HashSet<i64>,
    ) -> Result<()> {
        let existing: HashSet<i64> = self
            .selections_for(user_id, br_band)?
            .into_iter()
            .filter(|item| item.category() == category)
            .map(|item| item.id)
            .collect();

        let conn = self.conn();
        for item_id in desired.difference(&existing) {
            conn.execute(
                "INSERT OR IGNORE INTO selection (user_id, item_id) VALUES (?1, ?2)",
                params![user_id, item_id],
            )
            .context("failed to insert selection")?;
        }
        for item_id in existing.difference(desired) {
            conn.execute(
                "DELETE FROM selection WHERE user_id = ?1 AND item_id = ?2",
                params![user_id, item_id],
            )
            .context("failed to delete selection")?;
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Member stats
    // ------------------------------------------------------------------

    /// Atomically replace every cached row for one affiliation
    /// (delete-all-then-insert inside a transaction). Used by the periodic
    /// refresh; callers must not invoke this for an affiliation whose fetch
    /// failed, so stale rows survive fetch outages.
    pub fn replace_affiliation_stats(
        &self,
        affiliation: &str,
        rows: &[(String, i64, String)],
    ) -> Result<()> {
        let mut conn = self.conn();
        let tx = conn.transaction().context("failed to begin transaction")?;
        tx.execute(
            "DELETE FROM member_stat WHERE affiliation = ?1",
            params![affiliation],
        )
        .context("failed to clear affiliation stats")?;
        let now = Utc::now().to_rfc3339();
        for (name, score, activity) in rows {
            tx.execute(
                "INSERT INTO member_stat (name, affiliation, score, activity, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)
                 ON CONFLICT(name) DO UPDATE SET
                    affiliation = excluded.affiliation,
                    score       = excluded.score,
                    activity    = excluded.activity,
                    updated_at  = excluded.updated_at",
                params![name, affiliation, score, activity, now],
            )
            .context("failed to insert member stat")?;
        }
        tx.commit().context("failed to commit affiliation stats")
    }

    /// Upsert a single member row, keyed by name. Used by the on-demand
    /// backfill path.
    pub fn upsert_member_stat(
        &self,
        name: &str,
        affiliation: &str,
        score: i64,
        activity: &str,
    ) -> Result<()> {
        let conn = self.conn();
        conn.execute(
            "INSERT INTO member_stat (name, affiliation, score, activity, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT(name) DO UPDATE SET
                affiliation = excluded.affiliation,
                score       = excluded.score,
                activity    = excluded.activity,
                updated_at  = excluded.updated_at",
            params![name, affiliation, score, activity, Utc::now().to_rfc3339()],
        )
        .context("failed to upsert member stat")?;
        Ok(())
    }

    /// Point read by (already normalized) member name within an affiliation.
    pub fn member_stat(&self, name: &str, affiliation: &str) -> Result<Option<MemberStat>> {
        let conn = self.conn();
        let row = conn
            .query_row(
                "SELECT name, affiliation, score, activity, updated_at
                 FROM member_stat WHERE name = ?1 AND affiliation = ?2",
                params![name, affiliation],
                member_stat_columns,
            )
            .optional()
            .context("failed to query member stat")?;
        row.map(member_stat_from_columns).transpose()
    }

    /// Number of cached rows for an affiliation. Zero means the cache has
    /// never been filled (or was wiped) for that source.
    pub fn affiliation_count(&self, affiliation: &str) -> Result<usize> {
        let conn = self.conn();
        let count: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM member_stat WHERE affiliation = ?1",
                params![affiliation],
                |row| row.get(0),
            )
            .context("failed to count affiliation stats")?;
        Ok(count as usize)
    }

    /// The `limit` highest-scoring members of an affiliation.
    pub fn top_members(&self, affiliation: &str, limit: usize) -> Result<Vec<MemberStat>> {
        self.member_query(
            "SELECT name, affiliation, score, activity, updated_at
             FROM member_stat WHERE affiliation = ?1
             ORDER BY score DESC, name LIMIT ?2",
            params![affiliation, limit as i64],
        )
    }

    /// Members of an affiliation whose score exceeds `threshold`.
    pub fn members_over(&self, affiliation: &str, threshold: i64) -> Result<Vec<MemberStat>> {
        self.member_query(
            "SELECT name, affiliation, score, activity, updated_at
             FROM member_stat WHERE affiliation = ?1 AND score > ?2
             ORDER BY score DESC, name",
            params![affiliation, threshold],
        )
    }

    /// Members of an affiliation sitting at zero score.
    pub fn members_at_zero(&self, affiliation: &str) -> Result<Vec<MemberStat>> {
        self.member_query(
            "SELECT name, affiliation, score, activity, updated_at
             FROM member_stat WHERE affiliation = ?1 AND score = 0
             ORDER BY name",
            params![affiliation],
        )
    }

    fn member_query(
        &self,
        sql: &str,
        params: impl rusqlite::Params,
    ) -> Result<Vec<MemberStat>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(sql).context("failed to prepare member query")?;
        let rows = stmt
            .query_map(params, member_stat_columns)
            .context("failed to query member stats")?
            .collect::<std::result::Result<Vec<_>, _>>()
            .context("failed to map member stat rows")?;
        rows.into_iter().map(member_stat_from_columns).collect()
    }
}

/// Display ordering: category order, then origin with `"Other"` last and the
/// rest sorted by identifier, then item name.
pub fn sort_items(items: &mut [Item]) {
    items.sort_by(|a, b| {
        let ka = (a.category().order(), a.origin == ORIGIN_OTHER);
        let kb = (b.category().order(), b.origin == ORIGIN_OTHER);
        ka.cmp(&kb)
            .then_with(|| a.origin.cmp(&b.origin))
            .then_with(|| a.name.cmp(&b.name))
    });
}

fn item_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Item> {
    Ok(Item {
        id: row.get(0)?,
        name: row.get(1)?,
        type_label: row.get(2)?,
        origin: row.get(3)?,
        br_band: row.get(4)?,
    })
}

type MemberStatColumns = (String, String, i64, String, String);

fn member_stat_columns(row: &rusqlite::Row<'_>) -> rusqlite::Result<MemberStatColumns> {
    Ok((
        row.get(0)?,
        row.get(1)?,
        row.get(2)?,
        row.get(3)?,
        row.get(4)?,
    ))
}

fn member_stat_from_columns(
    (name, affiliation, score, activity, updated_at): MemberStatColumns,
) -> Result<MemberStat> {
    Ok(MemberStat {
        name,
        affiliation,
        score,
        activity,
        updated_at: parse_timestamp(&updated_at)?,
    })
}

fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .with_context(|| format!("invalid stored timestamp: {raw}"))
}
