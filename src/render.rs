// Pure rendering of board messages and roster report pages. No I/O here:
// everything is a function of already-composed data.

use crate::classify::Category;
use crate::db::{Item, MemberStat};

/// Members shown per roster report page.
pub const REPORT_PAGE_SIZE: usize = 25;

/// Everything needed to render one user's board message.
#[derive(Debug, Clone)]
pub struct BoardData {
    pub display_name: String,
    pub br_band: String,
    /// Selections grouped by category, in [`Category::ALL`] order. Absent
    /// categories carry an empty vec; a sentinel selection means the user
    /// explicitly chose nothing for that category.
    pub loadout: Vec<(Category, Vec<Item>)>,
    pub stats: Option<MemberStat>,
}

/// Render a user's board message.
pub fn board_message(data: &BoardData) -> String {
    let mut out = String::new();
    out.push_str(&format!(
        "**{}** — BR {}\n",
        data.display_name, data.br_band
    ));

    let has_any = data
        .loadout
        .iter()
        .any(|(_, items)| items.iter().any(|i| !i.is_sentinel()));
    if !has_any {
        out.push_str("No vehicles selected for this period.\n");
    } else {
        for (category, items) in &data.loadout {
            if items.is_empty() {
                continue;
            }
            let line = if items.iter().all(|i| i.is_sentinel()) {
                "none chosen".to_string()
            } else {
                items
                    .iter()
                    .filter(|i| !i.is_sentinel())
                    .map(|i| i.name.as_str())
                    .collect::<Vec<_>>()
                    .join(", ")
            };
            out.push_str(&format!("{}: {line}\n", category.display_name()));
        }
    }

    if let Some(stat) = &data.stats {
        out.push_str(&format!(
            "{} — score {}, activity {}\n",
            stat.affiliation, stat.score, stat.activity
        ));
    }

    out
}

/// Render one page of a roster report (25 members per page, 1-indexed rank
/// continuing across pages).
pub fn roster_page(title: &str, members: &[MemberStat], page: usize) -> String {
    let start = page * REPORT_PAGE_SIZE;
    let slice = members
        .get(start..members.len().min(start + REPORT_PAGE_SIZE))
        .unwrap_or(&[]);

    let mut out = format!("**{title}** (page {})\n", page + 1);
    if slice.is_empty() {
        out.push_str("No members to show.\n");
        return out;
    }
    for (offset, m) in slice.iter().enumerate() {
        out.push_str(&format!(
            "{}. {} — score {}, activity {}\n",
            start + offset + 1,
            m.name,
            m.score,
            m.activity
        ));
    }
    out
}

/// Number of pages a member list spans.
pub fn page_count(len: usize) -> usize {
    if len == 0 {
        1
    } else {
        len.div_ceil(REPORT_PAGE_SIZE)
    }
}
