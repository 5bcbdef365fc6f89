// Roster cache: periodically refreshed membership stats with on-demand
// backfill and suffix-independent name keys.

use std::sync::Arc;

use anyhow::{anyhow, Result};
use tracing::{info, warn};

use crate::config::AffiliationConfig;
use crate::db::{Database, MemberStat};
use crate::host::RosterSource;

/// Cached membership statistics for the configured affiliations.
///
/// The cache owns every `member_stat` row: a full refresh replaces an
/// affiliation's rows wholesale, the backfill path upserts by member name,
/// and nothing else writes to the table.
pub struct RosterCache {
    db: Arc<Database>,
    source: Arc<dyn RosterSource>,
    affiliations: Vec<AffiliationConfig>,
    /// Suffix tokens stripped from names, longest first so `@psn-eu` style
    /// compounds win over their prefixes.
    suffixes: Vec<String>,
}

impl RosterCache {
    pub fn new(
        db: Arc<Database>,
        source: Arc<dyn RosterSource>,
        affiliations: Vec<AffiliationConfig>,
        mut suffixes: Vec<String>,
    ) -> Self {
        suffixes.sort_by_key(|s| std::cmp::Reverse(s.len()));
        RosterCache {
            db,
            source,
            affiliations,
            suffixes,
        }
    }

    pub fn affiliations(&self) -> &[AffiliationConfig] {
        &self.affiliations
    }

    /// Strip known platform suffixes from a member name. Matching is
    /// case-insensitive and repeats until no suffix applies, so the result
    /// is a fixed point (`normalize(normalize(x)) == normalize(x)`).
    pub fn normalize_member_name(&self, name: &str) -> String {
        let mut current = name.trim();
        'outer: loop {
            for suffix in &self.suffixes {
                if let Some(stripped) = strip_suffix_ignore_case(current, suffix) {
                    current = stripped.trim_end();
                    continue 'outer;
                }
            }
            return current.to_string();
        }
    }

    /// Refresh every tracked affiliation. A fetch or store failure for one
    /// affiliation is logged and skipped; the remaining affiliations still
    /// refresh, and the failed affiliation keeps its previous rows (stale
    /// beats empty).
    pub async fn refresh_all(&self) {
        for aff in &self.affiliations {
            match self.fetch_rows(aff).await {
                Ok(rows) => {
                    let count = rows.len();
                    if let Err(e) = self.db.replace_affiliation_stats(&aff.name, &rows) {
                        warn!("failed to store roster for {}: {e:#}", aff.name);
                        continue;
                    }
                    info!("refreshed roster for {}: {count} members", aff.name);
                }
                Err(e) => {
                    warn!("roster refresh skipped for {}: {e:#}", aff.name);
                }
            }
        }
    }

    /// Refresh a single affiliation by name, upserting rows by member name.
    /// Shared entry point for the on-demand backfill and manual "run now"
    /// paths.
    pub async fn refresh_one(&self, affiliation: &str) -> Result<usize> {
        let aff = self
            .affiliations
            .iter()
            .find(|a| a.name == affiliation)
            .ok_or_else(|| anyhow!("unknown affiliation: {affiliation}"))?;
        let rows = self.fetch_rows(aff).await?;
        for (name, score, activity) in &rows {
            self.db
                .upsert_member_stat(name, &aff.name, *score, activity)?;
        }
        info!("backfilled roster for {}: {} members", aff.name, rows.len());
        Ok(rows.len())
    }

    /// Point read for one member's stats within an affiliation. If the
    /// affiliation has no cached rows at all, a synchronous backfill runs
    /// first and the read is retried once.
    pub async fn lookup(&self, member_name: &str, affiliation: &str) -> Result<Option<MemberStat>> {
        let key = self.normalize_member_name(member_name);
        if let Some(stat) = self.db.member_stat(&key, affiliation)? {
            return Ok(Some(stat));
        }
        if self.db.affiliation_count(affiliation)? == 0 {
            if let Err(e) = self.refresh_one(affiliation).await {
                warn!("on-demand backfill failed for {affiliation}: {e:#}");
                return Ok(None);
            }
            return self.db.member_stat(&key, affiliation);
        }
        Ok(None)
    }

    async fn fetch_rows(&self, aff: &AffiliationConfig) -> Result<Vec<(String, i64, String)>> {
        let raw = self.source.fetch_roster(&aff.source_url).await?;
        Ok(raw
            .into_iter()
            .map(|row| {
                (
                    self.normalize_member_name(&row.name),
                    row.score,
                    row.activity,
                )
            })
            .collect())
    }
}

/// Case-insensitive `strip_suffix`. The cut index is derived from `name`'s
/// own characters, so it always lands on a char boundary even when
/// lowercasing changes a character's byte length.
fn strip_suffix_ignore_case<'a>(name: &'a str, suffix: &str) -> Option<&'a str> {
    let mut end = name.len();
    let mut tail = name.chars().rev();
    for expected in suffix.chars().rev() {
        let found = tail.next()?;
        if found.to_lowercase().ne(expected.to_lowercase()) {
            return None;
        }
        end -= found.len_utf8();
    }
    Some(&name[..end])
}
