// =============================================================================
// text_scanner.rs — DIGGING RUPEES OUT OF LEGALESE
// =============================================================================
//
// Companies announce orders in free text. Sometimes in the form field,
// sometimes only inside a scanned PDF, sometimes as "Rs. 1,234.56 Crores
// (Rupees One Thousand Two Hundred ...)". This module turns that soup into
// one number and one duration.
//
// The policy is dumb and predictable:
//
// 1. Patterns are tried in a fixed priority order.
// 2. The first pattern that matches wins. Multiple orders in one filing are
//    NOT summed; the first figure found is the figure reported.
// 3. No match is a perfectly normal answer: the value is absent, the
//    duration is "Not Specified".
//
// Keyword filtering (which announcements look like orders at all) runs on an
// Aho-Corasick automaton so a dozen keywords cost one pass over the text.
// =============================================================================

use aho_corasick::AhoCorasick;
use regex::Regex;
use std::sync::LazyLock;
use tracing::{debug, warn};

use crate::models::{Announcement, ExtractedSignal, NOT_SPECIFIED};

/// Unit a currency pattern reports in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Unit {
    Crore,
    Lakh,
}

impl Unit {
    fn to_crore(self, value: f64) -> f64 {
        match self {
            Unit::Crore => value,
            Unit::Lakh => value / 100.0,
        }
    }
}

/// Currency patterns in priority order. The captured group is the number.
static ORDER_PATTERNS: LazyLock<Vec<(Regex, Unit)>> = LazyLock::new(|| {
    [
        (r"(?i)(?:₹|\brs\.?)\s?([0-9][0-9,.]*)\s?crore", Unit::Crore),
        (r"(?i)([0-9][0-9,.]*)\s?crore", Unit::Crore),
        (r"(?i)(?:₹|\brs\.?)\s?([0-9][0-9,.]*)\s?lakh", Unit::Lakh),
    ]
    .into_iter()
    .map(|(pattern, unit)| {
        (
            Regex::new(pattern).expect("order value pattern must compile"),
            unit,
        )
    })
    .collect()
});

/// Duration patterns in priority order. Group 1 is the count, group 2 the unit.
static DURATION_PATTERNS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    [
        r"(?i)within\s+(\d+)\s+(years?|months?)",
        r"(?i)over\s+(\d+)\s+(years?|months?)",
        r"(?i)period\s+of\s+(\d+)\s+(years?|months?)",
    ]
    .into_iter()
    .map(|pattern| Regex::new(pattern).expect("duration pattern must compile"))
    .collect()
});

/// Extract the order value, in crore, from a text blob.
///
/// Returns `None` when no pattern matches. Locale thousands separators are
/// stripped, lakh figures are divided by 100, and the result is rounded to
/// two decimals. A match whose number does not parse ("Rs. . crore") counts
/// as no match for that pattern and the next one gets its turn.
pub fn extract_order_value(text: &str) -> Option<f64> {
    // Neither unit word present means no pattern can possibly match.
    let lower = text.to_ascii_lowercase();
    let bytes = lower.as_bytes();
    if memchr::memmem::find(bytes, b"crore").is_none() && memchr::memmem::find(bytes, b"lakh").is_none() {
        return None;
    }

    for (pattern, unit) in ORDER_PATTERNS.iter() {
        let Some(caps) = pattern.captures(text) else {
            continue;
        };
        let raw = caps.get(1).map(|m| m.as_str()).unwrap_or_default();
        match parse_amount(raw) {
            Some(value) => {
                let crore = round2(unit.to_crore(value));
                debug!(raw = raw, unit = ?unit, crore = crore, "order value matched");
                return Some(crore);
            }
            None => {
                debug!(raw = raw, "order value pattern matched an unparseable number");
            }
        }
    }
    None
}

/// Extract the completion duration ("2 years", "18 months") from a text blob.
/// Returns [`NOT_SPECIFIED`] when no pattern matches.
pub fn extract_duration(text: &str) -> String {
    DURATION_PATTERNS
        .iter()
        .find_map(|pattern| {
            pattern
                .captures(text)
                .map(|caps| format!("{} {}", &caps[1], caps[2].to_ascii_lowercase()))
        })
        .unwrap_or_else(|| NOT_SPECIFIED.to_string())
}

/// Run both extractors over several candidate texts, most trusted first.
/// Each signal is taken from the first text that yields it.
pub fn extract_signal(texts: &[&str]) -> ExtractedSignal {
    let order_value_cr = texts.iter().find_map(|t| extract_order_value(t));
    let duration = texts
        .iter()
        .map(|t| extract_duration(t))
        .find(|d| d != NOT_SPECIFIED)
        .unwrap_or_else(|| NOT_SPECIFIED.to_string());

    ExtractedSignal {
        order_value_cr,
        duration,
    }
}

fn parse_amount(raw: &str) -> Option<f64> {
    let cleaned: String = raw.chars().filter(|c| *c != ',').collect();
    let cleaned = cleaned.trim_matches('.');
    cleaned.parse::<f64>().ok().filter(|v| v.is_finite())
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

/// Case-insensitive multi-keyword matcher over announcement text.
/// An empty keyword list accepts everything.
pub struct KeywordFilter {
    automaton: Option<AhoCorasick>,
}

impl KeywordFilter {
    pub fn new(keywords: &[String]) -> Self {
        let keywords: Vec<&str> = keywords
            .iter()
            .map(|k| k.trim())
            .filter(|k| !k.is_empty())
            .collect();

        if keywords.is_empty() {
            return Self { automaton: None };
        }

        let automaton = match AhoCorasick::builder()
            .ascii_case_insensitive(true)
            .build(&keywords)
        {
            Ok(ac) => Some(ac),
            Err(e) => {
                warn!(error = %e, "keyword automaton failed to build, filter disabled");
                None
            }
        };
        Self { automaton }
    }

    /// True when any keyword appears in the description or attachment text.
    pub fn matches(&self, announcement: &Announcement) -> bool {
        match &self.automaton {
            None => true,
            Some(ac) => {
                ac.is_match(&announcement.description) || ac.is_match(&announcement.attachment_text)
            }
        }
    }
}
