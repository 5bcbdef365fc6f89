// Multi-step selection wizard: one step per category, in fixed order,
// scoped to the period that was active when the wizard started.

use std::collections::HashSet;

use anyhow::{bail, Result};
use tracing::warn;

use crate::classify::Category;
use crate::db::{Database, Item};

/// One category's worth of choices.
#[derive(Debug, Clone)]
pub struct CategoryStep {
    pub category: Category,
    /// Items offerable at this step, in display order, capped at the
    /// configured offer limit.
    pub offered: Vec<Item>,
    /// Item ids already selected by the user when the wizard started.
    pub preselected: HashSet<i64>,
    /// True when the band had more items than the offer limit allows.
    pub truncated: bool,
}

/// Outcome of submitting or skipping a step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepOutcome {
    /// More categories remain; present the next step.
    InProgress,
    /// Every category has been visited.
    Complete,
}

/// An in-flight wizard session for one user.
///
/// The band and the offered items are captured once at start; a period
/// rollover mid-session does not change what the remaining steps offer or
/// where submissions are written.
#[derive(Debug)]
pub struct Wizard {
    user_id: String,
    br_band: String,
    steps: Vec<CategoryStep>,
    index: usize,
}

impl Wizard {
    /// Begin a session for `user_id` against the currently active period.
    /// Returns `None` when no period is active.
    pub fn start(db: &Database, user_id: &str, offer_limit: usize) -> Result<Option<Wizard>> {
        let Some(period) = db.active_period()? else {
            return Ok(None);
        };

        let items = db.items_for_band(&period.br_band)?;
        let existing: HashSet<i64> = db
            .selections_for(user_id, &period.br_band)?
            .into_iter()
            .map(|item| item.id)
            .collect();

        let steps = Category::ALL
            .iter()
            .map(|&category| {
                let mut offered: Vec<Item> = items
                    .iter()
                    .filter(|item| item.category() == category)
                    .cloned()
                    .collect();
                let truncated = offered.len() > offer_limit;
                if truncated {
                    warn!(
                        "band {} has {} {category} items, offering first {offer_limit}",
                        period.br_band,
                        offered.len(),
                    );
                    offered.truncate(offer_limit);
                }
                let preselected = offered
                    .iter()
                    .map(|item| item.id)
                    .filter(|id| existing.contains(id))
                    .collect();
                CategoryStep {
                    category,
                    offered,
                    preselected,
                    truncated,
                }
            })
            .collect();

        Ok(Some(Wizard {
            user_id: user_id.to_string(),
            br_band: period.br_band,
            steps,
            index: 0,
        }))
    }

    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    pub fn br_band(&self) -> &str {
        &self.br_band
    }

    /// The step awaiting input, or `None` once the session is complete.
    pub fn current_step(&self) -> Option<&CategoryStep> {
        self.steps.get(self.index)
    }

    pub fn is_complete(&self) -> bool {
        self.index >= self.steps.len()
    }

    /// Record the user's choices for the current step and advance.
    ///
    /// An empty `chosen` is an explicit "nothing in this category" and is
    /// stored as the category's sentinel. Ids outside the offered list are
    /// rejected and the session stays on the same step.
    pub fn submit(&mut self, db: &Database, chosen: &[i64]) -> Result<StepOutcome> {
        let Some(step) = self.steps.get(self.index) else {
            bail!("wizard session already complete");
        };

        let offered: HashSet<i64> = step.offered.iter().map(|item| item.id).collect();
        if let Some(bad) = chosen.iter().find(|id| !offered.contains(id)) {
            bail!(
                "item {bad} is not offered at the {} step",
                step.category.display_name()
            );
        }

        let desired: HashSet<i64> = if chosen.is_empty() {
            HashSet::from([db.sentinel_item(step.category, &self.br_band)?.id])
        } else {
            chosen.iter().copied().collect()
        };
        db.replace_scoped(&self.user_id, &self.br_band, step.category, &desired)?;

        self.index += 1;
        Ok(self.outcome())
    }

    /// Advance past the current step without touching stored selections.
    pub fn skip(&mut self) -> StepOutcome {
        if self.index < self.steps.len() {
            self.index += 1;
        }
        self.outcome()
    }

    fn outcome(&self) -> StepOutcome {
        if self.is_complete() {
            StepOutcome::Complete
        } else {
            StepOutcome::InProgress
        }
    }
}
