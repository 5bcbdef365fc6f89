// Vehicle category classification: the single source of truth mapping raw
// type labels to the fixed category set used by the store, the wizard, and
// the board renderer.

use std::collections::HashSet;
use std::sync::{Mutex, OnceLock};

use tracing::warn;

/// The fixed set of equipment categories. The wizard walks them in
/// [`Category::ALL`] order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Category {
    Ground,
    AntiAir,
    Air,
    Rotary,
}

impl Category {
    /// Wizard presentation order. Also the display order on the board.
    pub const ALL: [Category; 4] = [
        Category::Ground,
        Category::AntiAir,
        Category::Air,
        Category::Rotary,
    ];

    /// Canonical lowercase label, used for sentinel rows and display headers.
    pub fn label(&self) -> &'static str {
        match self {
            Category::Ground => "ground",
            Category::AntiAir => "anti-air",
            Category::Air => "air",
            Category::Rotary => "rotary",
        }
    }

    /// Human-facing header for board rendering and wizard prompts.
    pub fn display_name(&self) -> &'static str {
        match self {
            Category::Ground => "Ground",
            Category::AntiAir => "Anti-Air",
            Category::Air => "Air",
            Category::Rotary => "Rotary",
        }
    }

    /// Position within [`Category::ALL`], used as the primary sort key for
    /// item ordering.
    pub fn order(&self) -> usize {
        match self {
            Category::Ground => 0,
            Category::AntiAir => 1,
            Category::Air => 2,
            Category::Rotary => 3,
        }
    }
}

impl std::fmt::Display for Category {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.display_name())
    }
}

/// Classify a raw type label into a [`Category`].
///
/// Matching is case-insensitive over the known label set. Unrecognized
/// labels fall back to [`Category::Ground`] and are logged once per label
/// per process so a bad import doesn't flood the log.
pub fn classify(type_label: &str) -> Category {
    let label = type_label.trim().to_ascii_lowercase();
    match label.as_str() {
        "ground" | "tank" | "tank destroyer" | "medium tank" | "heavy tank" | "light tank" => {
            Category::Ground
        }
        "anti-air" | "anti_air" | "antiair" | "spaa" | "aa" => Category::AntiAir,
        "air" | "plane" | "aircraft" | "fighter" | "bomber" | "attacker" | "jet" => Category::Air,
        "rotary" | "helicopter" | "heli" | "attack helicopter" => Category::Rotary,
        _ => {
            warn_unknown_label(&label);
            Category::Ground
        }
    }
}

fn warn_unknown_label(label: &str) {
    static SEEN: OnceLock<Mutex<HashSet<String>>> = OnceLock::new();
    let seen = SEEN.get_or_init(|| Mutex::new(HashSet::new()));
    let mut seen = match seen.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    };
    if seen.insert(label.to_string()) {
        warn!("unknown vehicle type label '{label}', defaulting to ground");
    }
}
