// =============================================================================
// report.rs — WHAT THE USER ACTUALLY SEES
// =============================================================================
//
// Two renderings of the same ranked rows:
//
// - a console table (plus a screener link per row), followed by the
//   repeat-order and sector-flow summaries
// - a CSV file with a fixed column set, for spreadsheets
//
// Missing values are spelled out: "Not Found" when a number could not be
// read, "NA" when a derived number has no operands.
// =============================================================================

use std::fmt::Write as _;
use std::fs::File;
use std::io::Write;
use std::path::Path;
use tracing::info;

use crate::error::ReportError;
use crate::models::ScoredOrder;
use crate::pipeline::RunReport;
use crate::ranking::UNKNOWN_SECTOR;

pub const NA: &str = "NA";
pub const NOT_FOUND: &str = "Not Found";

pub const CSV_HEADERS: [&str; 10] = [
    "Stock",
    "Company",
    "Order Value",
    "Market Cap",
    "Order % of Market Cap",
    "Completion Time",
    "Sector",
    "Impact Score",
    "Order Date",
    "Attachment",
];

const ORDER_DATE_FORMAT: &str = "%d-%m-%Y %H:%M";

fn money(value: Option<f64>) -> String {
    value.map(|v| format!("{v:.2}")).unwrap_or_else(|| NOT_FOUND.to_string())
}

fn percent(value: Option<f64>) -> String {
    value.map(|v| format!("{v:.2}")).unwrap_or_else(|| NA.to_string())
}

fn sector(order: &ScoredOrder) -> &str {
    order
        .snapshot
        .sector
        .as_deref()
        .filter(|s| !s.trim().is_empty())
        .unwrap_or(UNKNOWN_SECTOR)
}

fn order_date(order: &ScoredOrder) -> String {
    order
        .announcement
        .announced_at
        .map(|dt| dt.format(ORDER_DATE_FORMAT).to_string())
        .unwrap_or_else(|| NA.to_string())
}

/// One CSV record, in [`CSV_HEADERS`] order.
pub fn csv_record(order: &ScoredOrder) -> [String; 10] {
    [
        order.announcement.symbol.clone(),
        order.announcement.company_name.clone(),
        money(order.signal.order_value_cr),
        money(order.snapshot.market_cap),
        percent(order.order_pct_of_mcap),
        order.signal.duration.clone(),
        sector(order).to_string(),
        format!("{:.1}", order.impact_score),
        order_date(order),
        order.announcement.attachment_url.clone().unwrap_or_else(|| NA.to_string()),
    ]
}

/// Write ranked orders as CSV to any writer.
pub fn write_csv<W: Write>(orders: &[ScoredOrder], writer: W) -> Result<(), ReportError> {
    let mut csv = csv::Writer::from_writer(writer);
    csv.write_record(CSV_HEADERS)?;
    for order in orders {
        csv.write_record(csv_record(order))?;
    }
    csv.flush()?;
    Ok(())
}

/// Write ranked orders to a CSV file, replacing it.
pub fn export_csv(orders: &[ScoredOrder], path: &Path) -> Result<(), ReportError> {
    let file = File::create(path)?;
    write_csv(orders, file)?;
    info!(path = %path.display(), rows = orders.len(), "CSV exported");
    Ok(())
}

fn clip(text: &str, width: usize) -> String {
    if text.chars().count() <= width {
        return text.to_string();
    }
    let mut clipped: String = text.chars().take(width.saturating_sub(1)).collect();
    clipped.push('…');
    clipped
}

/// Render the ranked table. `screener_url` builds the per-row profile link.
pub fn render_table(report: &RunReport, screener_url: impl Fn(&str) -> String) -> String {
    let mut out = String::new();
    let _ = writeln!(
        out,
        "Order announcements {} to {}: {} ranked of {} matched ({} fetched)",
        report.from.format("%d-%m-%Y"),
        report.to.format("%d-%m-%Y"),
        report.stats.ranked,
        report.stats.matched,
        report.stats.fetched
    );

    if report.orders.is_empty() {
        let _ = writeln!(out, "No scored orders in this window.");
        return out;
    }

    let _ = writeln!(
        out,
        "{:>3}  {:<12} {:<28} {:>12} {:>12} {:>8} {:<14} {:<22} {:>6}  {:<16}  {}",
        "#", "Stock", "Company", "Order ₹Cr", "MCap ₹Cr", "% MCap", "Completion", "Sector", "Score", "Order Date", "Financials"
    );
    for (i, order) in report.orders.iter().enumerate() {
        let _ = writeln!(
            out,
            "{:>3}  {:<12} {:<28} {:>12} {:>12} {:>8} {:<14} {:<22} {:>6.1}  {:<16}  {}",
            i + 1,
            clip(&order.announcement.symbol, 12),
            clip(&order.announcement.company_name, 28),
            money(order.signal.order_value_cr),
            money(order.snapshot.market_cap),
            percent(order.order_pct_of_mcap),
            clip(&order.signal.duration, 14),
            clip(sector(order), 22),
            order.impact_score,
            order_date(order),
            screener_url(&order.announcement.symbol)
        );
        if let Some(moved) = order.next_day_move_pct {
            let _ = writeln!(out, "     next session: {moved:+.2}%");
        }
        if let Some(url) = &order.announcement.attachment_url {
            let _ = writeln!(out, "     attachment: {url}");
        }
    }
    out
}

/// Repeat-order and sector-flow summaries, plus run counters.
pub fn render_summaries(report: &RunReport) -> String {
    let mut out = String::new();

    let repeats: Vec<_> = report.repeat_orders.iter().filter(|r| r.announcements > 1).collect();
    if !repeats.is_empty() {
        let _ = writeln!(out, "\nRepeat orders");
        for group in repeats {
            let _ = writeln!(
                out,
                "  {:<12} {:<28} {:>3} orders  {:>12.2} ₹Cr",
                group.symbol,
                clip(&group.company_name, 28),
                group.announcements,
                group.total_order_value_cr
            );
        }
    }

    if !report.sector_flow.is_empty() {
        let _ = writeln!(out, "\nSector flow");
        for flow in &report.sector_flow {
            let _ = writeln!(
                out,
                "  {:<28} {:>3} orders  {:>12.2} ₹Cr",
                clip(&flow.sector, 28),
                flow.orders,
                flow.total_order_value_cr
            );
        }
    }

    for breaker in report.breakers.iter().filter(|b| b.trips > 0) {
        let _ = writeln!(
            out,
            "\nUpstream {} tripped {} time(s), now {}",
            breaker.name, breaker.trips, breaker.state
        );
    }

    let s = &report.stats;
    let _ = writeln!(
        out,
        "\n{} symbols, {} with order value, {} PDFs read ({} failed), lookups failed: quote {}, screener {}, history {}",
        s.symbols, s.with_order_value, s.pdfs_read, s.pdf_failures, s.quote_failures, s.screener_failures, s.history_failures
    );
    let cache_line: Vec<String> = report
        .caches
        .iter()
        .map(|c| format!("{} {}/{}", c.name, c.hits, c.hits + c.misses))
        .collect();
    if !cache_line.is_empty() {
        let _ = writeln!(out, "cache hits: {}", cache_line.join(", "));
    }
    out
}

/// Message shown when the exchange refuses the feed.
pub fn render_blocked(status: Option<u16>, reason: &str) -> String {
    match status {
        Some(code) => format!("Announcement feed unavailable (HTTP {code}): {reason}. Retry in a few minutes."),
        None => format!("Announcement feed unavailable: {reason}. Retry in a few minutes."),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    use crate::cache::CacheSnapshot;
    use crate::circuit_breaker::{BreakerStatus, CircuitState};
    use crate::models::{parse_announcement_date, Announcement, ExtractedSignal, FinancialSnapshot};
    use crate::pipeline::RunStats;
    use crate::ranking::{RepeatOrder, SectorFlow};

    fn order(symbol: &str, value: Option<f64>, mcap: Option<f64>) -> ScoredOrder {
        ScoredOrder {
            announcement: Announcement {
                symbol: symbol.to_string(),
                company_name: format!("{symbol} Limited"),
                description: "Bagging of order".to_string(),
                attachment_text: String::new(),
                attachment_url: Some(format!("https://nsearchives.nseindia.com/corporate/{symbol}.pdf")),
                announced_at: parse_announcement_date("2024-05-10 18:30:12"),
            },
            snapshot: FinancialSnapshot {
                symbol: symbol.to_string(),
                market_cap: mcap,
                sector: Some("Construction".to_string()),
                ..Default::default()
            },
            signal: ExtractedSignal {
                order_value_cr: value,
                duration: "2 years".to_string(),
            },
            order_pct_of_mcap: crate::scorer::order_pct_of_market_cap(value, mcap),
            impact_score: 42.0,
            next_day_move_pct: None,
        }
    }

    fn report(orders: Vec<ScoredOrder>) -> RunReport {
        RunReport {
            from: NaiveDate::from_ymd_opt(2024, 5, 10).unwrap(),
            to: NaiveDate::from_ymd_opt(2024, 5, 10).unwrap(),
            stats: RunStats {
                ranked: orders.len(),
                ..Default::default()
            },
            orders,
            repeat_orders: vec![RepeatOrder {
                symbol: "LT".into(),
                company_name: "LT Limited".into(),
                announcements: 2,
                total_order_value_cr: 350.0,
            }],
            sector_flow: vec![SectorFlow {
                sector: "Construction".into(),
                orders: 2,
                total_order_value_cr: 350.0,
            }],
            caches: vec![CacheSnapshot {
                name: "quotes",
                entries: 1,
                hits: 3,
                misses: 1,
                expired: 0,
            }],
            breakers: vec![BreakerStatus {
                name: "screener".into(),
                state: CircuitState::Open,
                trips: 1,
            }],
        }
    }

    #[test]
    fn test_csv_header_and_row() {
        let mut buf = Vec::new();
        write_csv(&[order("LT", Some(120.0), Some(1000.0))], &mut buf).unwrap();
        let text = String::from_utf8(buf).unwrap();
        let mut lines = text.lines();
        assert_eq!(
            lines.next().unwrap(),
            "Stock,Company,Order Value,Market Cap,Order % of Market Cap,Completion Time,Sector,Impact Score,Order Date,Attachment"
        );
        assert_eq!(
            lines.next().unwrap(),
            "LT,LT Limited,120.00,1000.00,12.00,2 years,Construction,42.0,10-05-2024 18:30,https://nsearchives.nseindia.com/corporate/LT.pdf"
        );
        assert!(lines.next().is_none());
    }

    #[test]
    fn test_missing_values_render_tokens() {
        let mut missing = order("XYZ", None, None);
        missing.snapshot.sector = None;
        missing.announcement.announced_at = None;
        missing.announcement.attachment_url = None;
        let record = csv_record(&missing);
        assert_eq!(record[2], NOT_FOUND);
        assert_eq!(record[3], NOT_FOUND);
        assert_eq!(record[4], NA);
        assert_eq!(record[6], UNKNOWN_SECTOR);
        assert_eq!(record[8], NA);
        assert_eq!(record[9], NA);
    }

    #[test]
    fn test_csv_quotes_commas_in_company_names() {
        let mut o = order("LT", Some(1.0), Some(10.0));
        o.announcement.company_name = "Larsen, Toubro & Co".into();
        let mut buf = Vec::new();
        write_csv(&[o], &mut buf).unwrap();
        assert!(String::from_utf8(buf).unwrap().contains("\"Larsen, Toubro & Co\""));
    }

    #[test]
    fn test_table_includes_link_and_summaries() {
        let r = report(vec![order("LT", Some(120.0), Some(1000.0))]);
        let table = render_table(&r, |s| format!("https://www.screener.in/company/{s}/consolidated/"));
        assert!(table.contains("https://www.screener.in/company/LT/consolidated/"));
        assert!(table.contains("12.00"));
        let summary = render_summaries(&r);
        assert!(summary.contains("Repeat orders"));
        assert!(summary.contains("Sector flow"));
        assert!(summary.contains("350.00"));
        assert!(summary.contains("screener tripped 1 time(s), now OPEN"));
        assert!(summary.contains("quotes 3/4"));
    }

    #[test]
    fn test_empty_table_says_so() {
        let table = render_table(&report(vec![]), |s| s.to_string());
        assert!(table.contains("No scored orders"));
    }

    #[test]
    fn test_blocked_message_mentions_status() {
        assert!(render_blocked(Some(403), "blocked").contains("HTTP 403"));
        assert!(!render_blocked(None, "offline").contains("HTTP"));
    }
}
