// HTML roster fetching: pulls a squadron's community page and extracts the
// members grid.

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use scraper::{Html, Selector};
use tracing::debug;

use crate::host::{RawMemberRow, RosterSource};

/// CSS class of the cells making up the members grid. The grid is a flat
/// run of cells in strides of six: index, name, score, activity, role,
/// join date.
const GRID_CELL_SELECTOR: &str = "div.squadrons-members__grid-item";

const GRID_STRIDE: usize = 6;

/// [`RosterSource`] backed by an HTTP fetch of the squadron's community
/// page.
pub struct HttpRosterSource {
    client: reqwest::Client,
}

impl HttpRosterSource {
    pub fn new() -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(30))
            .build()
            .context("failed to build http client")?;
        Ok(HttpRosterSource { client })
    }
}

#[async_trait]
impl RosterSource for HttpRosterSource {
    async fn fetch_roster(&self, source_url: &str) -> Result<Vec<RawMemberRow>> {
        let response = self
            .client
            .get(source_url)
            .send()
            .await
            .with_context(|| format!("roster fetch failed for {source_url}"))?;
        let status = response.status();
        if !status.is_success() {
            bail!("roster fetch for {source_url} returned {status}");
        }
        let html = response
            .text()
            .await
            .with_context(|| format!("failed to read roster body from {source_url}"))?;
        parse_members_grid(&html)
    }
}

/// Extract member rows from a squadron page.
///
/// Rows whose score cell is not a plain number (header rows, officers'
/// decorations) are skipped, as are trailing partial strides.
pub fn parse_members_grid(html: &str) -> Result<Vec<RawMemberRow>> {
    let doc = Html::parse_document(html);
    let selector = Selector::parse(GRID_CELL_SELECTOR)
        .map_err(|e| anyhow::anyhow!("invalid grid selector: {e}"))?;

    let cells: Vec<String> = doc
        .select(&selector)
        .map(|el| el.text().collect::<String>().trim().to_string())
        .collect();

    let mut rows = Vec::new();
    for stride in cells.chunks_exact(GRID_STRIDE) {
        let name = stride[1].clone();
        let score_text = &stride[2];
        let Ok(score) = score_text.parse::<i64>() else {
            debug!("skipping grid row '{name}': non-numeric score '{score_text}'");
            continue;
        };
        rows.push(RawMemberRow {
            name,
            score,
            activity: stride[3].clone(),
        });
    }
    Ok(rows)
}
