// =============================================================================
// models.rs — THE DATA STRUCTURES OF ORDER FLOW
// =============================================================================
//
// Raw exchange records come in, get cleaned into `Announcement`s, get paired
// with a `FinancialSnapshot`, get an `ExtractedSignal` dug out of their text,
// and leave as a `ScoredOrder`. Everything is rebuilt from scratch on every
// fetch; nothing here is persisted.
//
// Absent numbers are `None`, never zero. A company whose market cap we could
// not read is a company of unknown size, not a company worth nothing.
// =============================================================================

use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Sentinel returned by duration extraction when nothing matches.
pub const NOT_SPECIFIED: &str = "Not Specified";

/// One corporate announcement as published by the exchange.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Announcement {
    pub symbol: String,
    pub company_name: String,
    /// The headline-ish `desc` field ("Bagging/Receiving of orders/contracts").
    pub description: String,
    /// The longer free text the company typed into the filing form.
    pub attachment_text: String,
    /// Link to the attached PDF (or XML, or ZIP, depending on the filer's mood).
    pub attachment_url: Option<String>,
    pub announced_at: Option<NaiveDateTime>,
}

impl Announcement {
    /// Texts worth scanning, in the order they are trusted.
    pub fn texts<'a>(&'a self, pdf_text: &'a str) -> [&'a str; 3] {
        [pdf_text, self.attachment_text.as_str(), self.description.as_str()]
    }
}

/// Raw row from `/api/corporate-announcements`. Every field is optional
/// because the exchange treats its own schema as a suggestion.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct NseAnnouncementRecord {
    pub symbol: Option<String>,
    pub sm_name: Option<String>,
    pub desc: Option<String>,
    #[serde(rename = "attchmntText")]
    pub attchmnt_text: Option<String>,
    #[serde(rename = "attchmntFile")]
    pub attchmnt_file: Option<String>,
    pub sort_date: Option<String>,
    pub an_dt: Option<String>,
}

impl NseAnnouncementRecord {
    /// Clean a raw record. Rows without a symbol are useless downstream and dropped.
    pub fn into_announcement(self) -> Option<Announcement> {
        let symbol = self.symbol.map(|s| s.trim().to_string()).filter(|s| !s.is_empty())?;
        let announced_at = self
            .sort_date
            .as_deref()
            .and_then(parse_announcement_date)
            .or_else(|| self.an_dt.as_deref().and_then(parse_announcement_date));

        Some(Announcement {
            company_name: self.sm_name.unwrap_or_else(|| symbol.clone()),
            symbol,
            description: self.desc.unwrap_or_default(),
            attachment_text: self.attchmnt_text.unwrap_or_default(),
            attachment_url: self
                .attchmnt_file
                .map(|u| u.trim().to_string())
                .filter(|u| !u.is_empty() && u != "-"),
            announced_at,
        })
    }
}

/// The exchange uses `2024-05-10 18:30:12` in `sort_date` and
/// `10-May-2024 18:30:12` in `an_dt`. Accept both.
pub fn parse_announcement_date(raw: &str) -> Option<NaiveDateTime> {
    const FORMATS: &[&str] = &["%Y-%m-%d %H:%M:%S", "%d-%b-%Y %H:%M:%S", "%d-%m-%Y %H:%M:%S"];
    let raw = raw.trim();
    FORMATS
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(raw, fmt).ok())
        .or_else(|| {
            NaiveDate::parse_from_str(raw, "%d-%b-%Y")
                .ok()
                .and_then(|d| d.and_hms_opt(0, 0, 0))
        })
}

/// Per-symbol fundamentals. One per symbol, every field independently optional.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct FinancialSnapshot {
    pub symbol: String,
    /// Market capitalization in crore.
    pub market_cap: Option<f64>,
    pub sector: Option<String>,
    pub previous_close: Option<f64>,
    pub last_price: Option<f64>,
    pub pe: Option<f64>,
    /// Return on capital employed, percent.
    pub roce: Option<f64>,
    pub roe: Option<f64>,
    pub book_value: Option<f64>,
    pub dividend_yield: Option<f64>,
    pub promoter_holding: Option<f64>,
}

impl FinancialSnapshot {
    /// A snapshot where nothing is known yet.
    pub fn unknown(symbol: impl Into<String>) -> Self {
        Self {
            symbol: symbol.into(),
            ..Default::default()
        }
    }

    /// Fill every unknown field of `self` from `fallback`. Known fields win.
    pub fn merge(self, fallback: FinancialSnapshot) -> FinancialSnapshot {
        FinancialSnapshot {
            symbol: self.symbol,
            market_cap: self.market_cap.or(fallback.market_cap),
            sector: self.sector.or(fallback.sector),
            previous_close: self.previous_close.or(fallback.previous_close),
            last_price: self.last_price.or(fallback.last_price),
            pe: self.pe.or(fallback.pe),
            roce: self.roce.or(fallback.roce),
            roe: self.roe.or(fallback.roe),
            book_value: self.book_value.or(fallback.book_value),
            dividend_yield: self.dividend_yield.or(fallback.dividend_yield),
            promoter_holding: self.promoter_holding.or(fallback.promoter_holding),
        }
    }
}

/// One daily bar from the exchange's historical endpoint.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct PriceBar {
    pub date: NaiveDate,
    pub close: f64,
    pub high: f64,
    pub volume: f64,
}

/// Technical signals derived from price history. `None` means "not enough data".
#[derive(Debug, Clone, Copy, Default, Serialize, PartialEq)]
pub struct PriceSignals {
    pub breakout: Option<bool>,
    pub volume_spike: Option<bool>,
    pub next_day_move_pct: Option<f64>,
}

/// What the text scanner managed to pull out of an announcement.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ExtractedSignal {
    /// Order value in crore, absent when no pattern matched.
    pub order_value_cr: Option<f64>,
    /// "N years" / "N months", or [`NOT_SPECIFIED`].
    pub duration: String,
}

impl Default for ExtractedSignal {
    fn default() -> Self {
        Self {
            order_value_cr: None,
            duration: NOT_SPECIFIED.to_string(),
        }
    }
}

/// An announcement after scoring. This is what gets ranked and rendered.
#[derive(Debug, Clone, Serialize)]
pub struct ScoredOrder {
    pub announcement: Announcement,
    pub snapshot: FinancialSnapshot,
    pub signal: ExtractedSignal,
    /// Order value as percent of market cap. `None` renders as "NA".
    pub order_pct_of_mcap: Option<f64>,
    /// Always within [0, 100].
    pub impact_score: f64,
    pub next_day_move_pct: Option<f64>,
}

impl fmt::Display for ScoredOrder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} ({}): order {} cr, {}% of mcap, impact {:.1}",
            self.announcement.symbol,
            self.announcement.company_name,
            self.signal
                .order_value_cr
                .map(|v| format!("{v:.2}"))
                .unwrap_or_else(|| "?".to_string()),
            self.order_pct_of_mcap
                .map(|v| format!("{v:.2}"))
                .unwrap_or_else(|| "NA".to_string()),
            self.impact_score
        )
    }
}

/// Result of reading the announcement feed. `Blocked` and `Empty` are
/// separate: one means "try again later", the other means
/// "nothing happened today".
#[derive(Debug, Clone, PartialEq)]
pub enum FeedOutcome {
    Records(Vec<Announcement>),
    Empty,
    Blocked { status: Option<u16>, reason: String },
}

impl FeedOutcome {
    /// Wrap a list, collapsing an empty one into `Empty`.
    pub fn from_records(records: Vec<Announcement>) -> Self {
        if records.is_empty() {
            FeedOutcome::Empty
        } else {
            FeedOutcome::Records(records)
        }
    }
}
