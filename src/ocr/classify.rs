//! Turns raw OCR text into a reward classification.
//!
//! Cleanup runs in three passes: spacing fixes for words Tesseract glues
//! together, a line filter that drops banners and noise, and item-name
//! correction. Tier lookup on the cleaned text is a pure mapping; text that
//! matches no tier is still returned so it can be logged.

use chrono::{DateTime, Local};
use regex::Regex;
use serde::Serialize;
use std::fmt;
use std::sync::LazyLock;

/// Known reward categories, highest priority first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum RewardTier {
    /// Legendary catch or pity counter message
    Legendary,
    DevilFruit,
    CandyCorn,
}

impl fmt::Display for RewardTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RewardTier::Legendary => "Legendary",
            RewardTier::DevilFruit => "Devil Fruit",
            RewardTier::CandyCorn => "Candy Corn",
        };
        f.write_str(name)
    }
}

/// A recognised reward notification.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RewardEvent {
    pub recognized_text: String,
    pub classified_tier: Option<RewardTier>,
    pub timestamp: DateTime<Local>,
}

impl RewardEvent {
    pub fn new(recognized_text: String, classified_tier: Option<RewardTier>) -> Self {
        Self {
            recognized_text,
            classified_tier,
            timestamp: Local::now(),
        }
    }
}

/// Banner text that is never a reward.
const IGNORED: [&str; 2] = ["safe zone", "loading"];

/// Item names as Tesseract tends to emit them, and their corrected form.
const ITEM_CORRECTIONS: [(&str, &str); 4] = [
    ("candycorn", "Candy Corn"),
    ("candy corn", "Candy Corn"),
    ("devilfruit", "Devil Fruit"),
    ("devil fruit", "Devil Fruit"),
];

static SPACING_FIXES: LazyLock<Vec<(Regex, &'static str)>> = LazyLock::new(|| {
    [
        (r"([a-z])for([A-Z])", "$1 for $2"),
        (r"capacity([a-z])", "capacity $1"),
        (r"([a-z])reached", "$1 reached"),
        (r"(?i)(candy)(corn)", "$1 $2"),
        (r"(?i)(devil)(fruit)", "$1 $2"),
        (r"(?i)(max)(capacity)", "$1 $2"),
        (r"(?i)(inventory)(full)", "$1 $2"),
        (r"([a-z])([A-Z][a-z])", "$1 $2"),
        (r"[ \t]+", " "),
    ]
    .into_iter()
    .filter_map(|(pattern, replacement)| match Regex::new(pattern) {
        Ok(re) => Some((re, replacement)),
        Err(e) => {
            log::error!("Bad spacing pattern {:?}: {}", pattern, e);
            None
        }
    })
    .collect()
});

/// Splits words Tesseract ran together and collapses runs of spaces.
pub fn fix_spacing(text: &str) -> String {
    text.lines()
        .map(|line| {
            SPACING_FIXES
                .iter()
                .fold(line.to_string(), |acc, (re, replacement)| {
                    re.replace_all(&acc, *replacement).into_owned()
                })
                .trim()
                .to_string()
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// True for lines worth keeping: not a banner, at least three characters,
/// and at least half alphanumeric.
fn is_meaningful(line: &str) -> bool {
    let lower = line.to_lowercase();
    if IGNORED.iter().any(|banner| lower.contains(banner)) {
        return false;
    }
    let total = line.chars().count();
    if total < 3 {
        return false;
    }
    let alnum = line.chars().filter(|c| c.is_alphanumeric()).count();
    alnum * 2 >= total
}

/// Replaces known item names with their canonical spelling.
fn correct_items(line: &str) -> String {
    let mut out = line.to_string();
    for (seen, canonical) in ITEM_CORRECTIONS {
        let lower = out.to_lowercase();
        // Byte offsets only line up when lowercasing kept the length
        if lower.len() != out.len() {
            continue;
        }
        if let Some(idx) = lower.find(seen) {
            out.replace_range(idx..idx + seen.len(), canonical);
        }
    }
    out
}

/// Cleans raw OCR output. Returns an empty string when nothing survives.
pub fn clean_text(raw: &str) -> String {
    fix_spacing(raw)
        .lines()
        .map(str::trim)
        .filter(|line| is_meaningful(line))
        .map(correct_items)
        .collect::<Vec<_>>()
        .join("\n")
}

/// Maps cleaned text to a reward tier.
pub fn classify_tier(text: &str) -> Option<RewardTier> {
    let lower = text.to_lowercase();
    if lower.contains("legendary") || lower.contains("pity") {
        Some(RewardTier::Legendary)
    } else if lower.contains("devil fruit") {
        Some(RewardTier::DevilFruit)
    } else if lower.contains("candy corn") {
        Some(RewardTier::CandyCorn)
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fix_spacing_splits_glued_words() {
        assert_eq!(fix_spacing("You gotaDevilfruit"), "You gota Devil fruit");
        assert_eq!(fix_spacing("Inventoryfull"), "Inventory full");
        assert_eq!(fix_spacing("max   capacity"), "max capacity");
    }

    #[test]
    fn test_banners_and_noise_are_dropped() {
        let raw = "SAFE ZONE\nLoading...\n~#\n|;:.,\nCaught a Candycorn";
        assert_eq!(clean_text(raw), "Caught a Candy Corn");
    }

    #[test]
    fn test_item_names_are_corrected() {
        assert_eq!(correct_items("got a devil fruit!"), "got a Devil Fruit!");
        assert_eq!(correct_items("candycorn x3"), "Candy Corn x3");
    }

    #[test]
    fn test_tiers() {
        assert_eq!(classify_tier("LEGENDARY catch!"), Some(RewardTier::Legendary));
        assert_eq!(classify_tier("Pity 40/50"), Some(RewardTier::Legendary));
        assert_eq!(classify_tier("You found a Devil Fruit"), Some(RewardTier::DevilFruit));
        assert_eq!(classify_tier("Candy Corn x2"), Some(RewardTier::CandyCorn));
    }

    #[test]
    fn test_unmatched_text_has_no_tier() {
        let text = clean_text("Old Boot");
        assert_eq!(text, "Old Boot");
        assert_eq!(classify_tier(&text), None);
    }

    #[test]
    fn test_legendary_outranks_item() {
        assert_eq!(
            classify_tier("Legendary Devil Fruit"),
            Some(RewardTier::Legendary)
        );
    }
}
