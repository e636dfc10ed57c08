//! Locates the machine-readable lines inside noisy back-of-card OCR text.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;

/// Document-type prefix opening the first MRZ line of a Chilean card.
pub const DOCUMENT_PREFIX: &str = "INCHL";
/// MRZ filler character.
pub const FILLER: char = '<';
/// Minimum length of a usable MRZ line.
pub const MIN_LINE_LEN: usize = 15;

/// Which locator strategy produced the lines.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MrzStrategy {
    Anchor,
    StrictPattern,
    Density,
}

/// Two or three normalized MRZ lines plus the strategy that found them.
#[derive(Debug, Clone, PartialEq)]
pub struct MrzLocation {
    pub lines: Vec<String>,
    pub strategy: MrzStrategy,
}

impl MrzLocation {
    /// The recovered MRZ text, one line per row.
    pub fn raw(&self) -> String {
        self.lines.join("\n")
    }
}

struct LocatorStrategy {
    strategy: MrzStrategy,
    candidates: fn(&[&str]) -> Vec<String>,
}

const STRATEGIES: [LocatorStrategy; 3] = [
    LocatorStrategy {
        strategy: MrzStrategy::Anchor,
        candidates: anchor_candidates,
    },
    LocatorStrategy {
        strategy: MrzStrategy::StrictPattern,
        candidates: strict_candidates,
    },
    LocatorStrategy {
        strategy: MrzStrategy::Density,
        candidates: density_candidates,
    },
];

static STRICT_LINE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Z0-9<]+$").expect("strict MRZ pattern"));

fn strip_whitespace(line: &str) -> String {
    line.chars().filter(|c| !c.is_whitespace()).collect()
}

/// Uppercases, removes whitespace and unfolds OCR look-alikes of the filler.
pub fn normalize_line(line: &str) -> String {
    strip_whitespace(line)
        .to_uppercase()
        .replace('«', "<<")
        .replace('‹', "<")
}

fn is_mrz_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == FILLER
}

fn last_three(mut lines: Vec<String>) -> Vec<String> {
    let skip = lines.len().saturating_sub(3);
    lines.drain(..skip);
    lines
}

fn anchor_candidates(lines: &[&str]) -> Vec<String> {
    let Some(start) = lines
        .iter()
        .position(|line| normalize_line(line).contains(DOCUMENT_PREFIX))
    else {
        return Vec::new();
    };

    lines[start..lines.len().min(start + 4)]
        .iter()
        .map(|line| normalize_line(line))
        .filter(|line| {
            let total = line.chars().count();
            let clean = line.chars().filter(|c| is_mrz_char(*c)).count();
            total >= MIN_LINE_LEN && clean * 10 >= total * 8
        })
        .take(3)
        .collect()
}

fn strict_candidates(lines: &[&str]) -> Vec<String> {
    last_three(
        lines
            .iter()
            .map(|line| line.trim().to_uppercase())
            .filter(|line| line.chars().count() >= 20 && STRICT_LINE.is_match(line))
            .collect(),
    )
}

fn density_candidates(lines: &[&str]) -> Vec<String> {
    last_three(
        lines
            .iter()
            .map(|line| line.trim().to_uppercase())
            .filter(|line| {
                let total = line.chars().count();
                let alnum = line.chars().filter(|c| c.is_ascii_alphanumeric()).count();
                total >= 25 && alnum * 10 >= total * 7 && line.contains(FILLER)
            })
            .collect(),
    )
}

/// Runs the locator cascade until a strategy yields at least two usable lines.
///
/// # Returns
///
/// `None` when no strategy finds an MRZ.
pub fn locate(text: &str) -> Option<MrzLocation> {
    let lines: Vec<&str> = text
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .collect();

    STRATEGIES.iter().find_map(|locator| {
        let found: Vec<String> = (locator.candidates)(&lines)
            .iter()
            .map(|line| normalize_line(line))
            .filter(|line| line.chars().count() >= MIN_LINE_LEN)
            .collect();

        if found.len() < 2 {
            return None;
        }

        tracing::debug!(
            strategy = ?locator.strategy,
            lines = found.len(),
            "MRZ located"
        );
        Some(MrzLocation {
            lines: found,
            strategy: locator.strategy,
        })
    })
}
