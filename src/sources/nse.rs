// =============================================================================
// sources/nse.rs — THE EXCHANGE, POLITELY
// =============================================================================
//
// The NSE JSON API is public, but it only answers clients that look like a
// browser which visited the home page first (cookies and all). So every
// announcement fetch begins with a warm-up GET against the home page, and
// only then calls:
//
//   /api/corporate-announcements?index=equities&from_date=DD-MM-YYYY&to_date=DD-MM-YYYY
//   /api/quote-equity?symbol=LT
//   /api/historical/cm/equity?symbol=LT&series=["EQ"]&from=DD-MM-YYYY&to=DD-MM-YYYY
//
// The announcement feed has three outcomes: records, an honest empty list,
// or "blocked" (403/429, a network failure, or an HTML bot wall instead of
// JSON). Blocked means "retry later"; empty means "nothing was announced".
//
// Quote and history failures are per symbol. They are returned as errors so
// the pipeline can log them and carry on with "unknown".
// =============================================================================

use chrono::NaiveDate;
use serde::Deserialize;
use serde_json::Value;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::cache::{cache_key, CacheMode, FetchCache};
use crate::circuit_breaker::CircuitBreaker;
use crate::config::Config;
use crate::error::FetchError;
use crate::models::{Announcement, FeedOutcome, FinancialSnapshot, NseAnnouncementRecord, PriceBar};
use crate::sources::lenient_f64;

/// Date format the exchange API expects in query strings.
pub const NSE_DATE_FORMAT: &str = "%d-%m-%Y";

pub struct NseClient {
    client: reqwest::Client,
    home_url: String,
    api_url: String,
    warmup_timeout: Duration,
    api_timeout: Duration,
    quote_breaker: CircuitBreaker,
    history_breaker: CircuitBreaker,
}

impl NseClient {
    pub fn new(client: reqwest::Client, config: &Config) -> Self {
        Self {
            client,
            home_url: config.nse_home_url.clone(),
            api_url: config.nse_api_url.trim_end_matches('/').to_string(),
            warmup_timeout: config.warmup_timeout,
            api_timeout: config.api_timeout,
            quote_breaker: CircuitBreaker::new(
                "nse-quote",
                config.circuit_breaker_failure_threshold,
                config.circuit_breaker_reset_timeout,
            ),
            history_breaker: CircuitBreaker::new(
                "nse-history",
                config.circuit_breaker_failure_threshold,
                config.circuit_breaker_reset_timeout,
            ),
        }
    }

    pub fn breakers(&self) -> Vec<&CircuitBreaker> {
        vec![&self.quote_breaker, &self.history_breaker]
    }

    /// Visit the home page so the cookie jar holds whatever the API wants to see.
    pub async fn warm_up(&self) -> Result<(), FetchError> {
        debug!(url = %self.home_url, "priming exchange session");
        let response = self
            .client
            .get(&self.home_url)
            .header(reqwest::header::ACCEPT, "text/html,application/xhtml+xml")
            .timeout(self.warmup_timeout)
            .send()
            .await
            .map_err(|source| FetchError::Http {
                url: self.home_url.clone(),
                source,
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Status {
                url: self.home_url.clone(),
                status: status.as_u16(),
            });
        }
        Ok(())
    }

    /// Fetch announcements between two dates (inclusive).
    pub async fn fetch_announcements(
        &self,
        cache: &FetchCache,
        mode: CacheMode,
        from: NaiveDate,
        to: NaiveDate,
    ) -> FeedOutcome {
        let from_s = from.format(NSE_DATE_FORMAT).to_string();
        let to_s = to.format(NSE_DATE_FORMAT).to_string();
        let key = announcements_key(from, to);

        if let Some(cached) = cache.announcements.lookup(&key, mode) {
            debug!(from = %from_s, to = %to_s, count = cached.len(), "announcements served from cache");
            return FeedOutcome::from_records(cached);
        }

        match self.warm_up().await {
            Ok(()) => {}
            Err(e @ FetchError::Http { .. }) => {
                warn!(error = %e, "exchange warm-up failed");
                return FeedOutcome::Blocked {
                    status: None,
                    reason: format!("could not reach the exchange: {e}"),
                };
            }
            // A grumpy home page does not always mean a grumpy API. Try anyway.
            Err(e) => warn!(error = %e, "exchange warm-up returned an error status, trying the API anyway"),
        }

        let url = format!("{}/corporate-announcements", self.api_url);
        let response = match self
            .client
            .get(&url)
            .query(&[("index", "equities"), ("from_date", from_s.as_str()), ("to_date", to_s.as_str())])
            .timeout(self.api_timeout)
            .send()
            .await
        {
            Ok(r) => r,
            Err(e) => {
                warn!(error = %e, url = %url, "announcement request failed");
                return FeedOutcome::Blocked {
                    status: None,
                    reason: format!("announcement request failed: {e}"),
                };
            }
        };

        let status = response.status().as_u16();
        if !response.status().is_success() {
            let reason = match status {
                401 | 403 => "the exchange rejected the session (anti-bot block)".to_string(),
                429 => "the exchange is rate limiting us".to_string(),
                other => format!("the exchange answered HTTP {other}"),
            };
            warn!(status = status, "announcement feed blocked: {}", reason);
            return FeedOutcome::Blocked {
                status: Some(status),
                reason,
            };
        }

        let body = match response.text().await {
            Ok(b) => b,
            Err(e) => {
                return FeedOutcome::Blocked {
                    status: Some(status),
                    reason: format!("could not read announcement body: {e}"),
                };
            }
        };

        match parse_announcements(&body) {
            Ok(records) => {
                info!(from = %from_s, to = %to_s, count = records.len(), "announcements fetched");
                cache.announcements.insert(key, records.clone());
                FeedOutcome::from_records(records)
            }
            Err(e) => {
                warn!(error = %e, "announcement body is not JSON, probably a bot wall");
                FeedOutcome::Blocked {
                    status: Some(status),
                    reason: "the exchange returned a non-JSON page instead of data".to_string(),
                }
            }
        }
    }

    /// Fetch the quote block for one symbol and turn it into a snapshot.
    pub async fn fetch_quote(
        &self,
        cache: &FetchCache,
        mode: CacheMode,
        symbol: &str,
    ) -> Result<FinancialSnapshot, FetchError> {
        let key = cache_key("quote", &[symbol]);
        if let Some(cached) = cache.quotes.lookup(&key, mode) {
            return Ok(cached);
        }

        self.quote_breaker.check()?;
        let url = format!("{}/quote-equity", self.api_url);
        let result = self.get_json(&url, &[("symbol", symbol)]).await;
        let body = self.quote_breaker.observe(result)?;

        let quote: QuoteResponse = serde_json::from_str(&body).map_err(|source| FetchError::Decode {
            url: url.clone(),
            source,
        })?;
        let snapshot = snapshot_from_quote(symbol, quote);
        cache.quotes.insert(key, snapshot.clone());
        Ok(snapshot)
    }

    /// Fetch daily bars for one symbol, oldest first.
    pub async fn fetch_history(
        &self,
        cache: &FetchCache,
        mode: CacheMode,
        symbol: &str,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<Vec<PriceBar>, FetchError> {
        let from_s = from.format(NSE_DATE_FORMAT).to_string();
        let to_s = to.format(NSE_DATE_FORMAT).to_string();
        let key = cache_key("history", &[symbol, &from_s, &to_s]);
        if let Some(cached) = cache.history.lookup(&key, mode) {
            return Ok(cached);
        }

        self.history_breaker.check()?;
        let url = format!("{}/historical/cm/equity", self.api_url);
        let result = self
            .get_json(
                &url,
                &[
                    ("symbol", symbol),
                    ("series", "[\"EQ\"]"),
                    ("from", from_s.as_str()),
                    ("to", to_s.as_str()),
                ],
            )
            .await;
        let body = self.history_breaker.observe(result)?;

        let bars = parse_history(&body).map_err(|source| FetchError::Decode {
            url: url.clone(),
            source,
        })?;
        cache.history.insert(key, bars.clone());
        Ok(bars)
    }

    async fn get_json(&self, url: &str, query: &[(&str, &str)]) -> Result<String, FetchError> {
        let response = self
            .client
            .get(url)
            .query(query)
            .timeout(self.api_timeout)
            .send()
            .await
            .map_err(|source| FetchError::Http {
                url: url.to_string(),
                source,
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Status {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }

        response.text().await.map_err(|source| FetchError::Http {
            url: url.to_string(),
            source,
        })
    }
}

/// Cache key of the announcement feed for a date window.
pub fn announcements_key(from: NaiveDate, to: NaiveDate) -> String {
    let from_s = from.format(NSE_DATE_FORMAT).to_string();
    let to_s = to.format(NSE_DATE_FORMAT).to_string();
    cache_key("announcements", &[&from_s, &to_s])
}

/// Decode the announcement feed. The API returns a bare array; older
/// deployments wrapped it in `{"data": [...]}`. Rows that do not decode are
/// skipped rather than failing the whole feed.
pub fn parse_announcements(body: &str) -> Result<Vec<Announcement>, serde_json::Error> {
    let value: Value = serde_json::from_str(body)?;
    let rows = match value {
        Value::Array(rows) => rows,
        Value::Object(mut map) => match map.remove("data") {
            Some(Value::Array(rows)) => rows,
            _ => Vec::new(),
        },
        _ => Vec::new(),
    };

    Ok(rows
        .into_iter()
        .filter_map(|row| serde_json::from_value::<NseAnnouncementRecord>(row).ok())
        .filter_map(NseAnnouncementRecord::into_announcement)
        .collect())
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct QuoteResponse {
    info: Option<QuoteInfo>,
    metadata: Option<QuoteMetadata>,
    price_info: Option<QuotePriceInfo>,
    security_info: Option<QuoteSecurityInfo>,
    industry_info: Option<QuoteIndustryInfo>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct QuoteInfo {
    industry: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct QuoteMetadata {
    industry: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct QuotePriceInfo {
    #[serde(deserialize_with = "lenient_f64")]
    last_price: Option<f64>,
    #[serde(deserialize_with = "lenient_f64")]
    previous_close: Option<f64>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct QuoteSecurityInfo {
    #[serde(deserialize_with = "lenient_f64")]
    issued_size: Option<f64>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct QuoteIndustryInfo {
    sector: Option<String>,
    industry: Option<String>,
}

/// Market cap in crore = issued shares x last price / 1e7.
fn snapshot_from_quote(symbol: &str, quote: QuoteResponse) -> FinancialSnapshot {
    let last_price = quote.price_info.as_ref().and_then(|p| p.last_price);
    let previous_close = quote.price_info.as_ref().and_then(|p| p.previous_close);
    let issued = quote.security_info.as_ref().and_then(|s| s.issued_size);

    let market_cap = match (issued, last_price) {
        (Some(shares), Some(price)) if shares > 0.0 && price > 0.0 => {
            Some((shares * price / 1e7 * 100.0).round() / 100.0)
        }
        _ => None,
    };

    // `metadata.pdSectorInd` names an index ("NIFTY 50"), not a sector, so it is never read.
    let non_blank = |s: &Option<String>| {
        s.as_ref()
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty() && v != "-" && !v.eq_ignore_ascii_case("NA"))
    };
    let sector = quote
        .industry_info
        .as_ref()
        .and_then(|i| non_blank(&i.sector).or_else(|| non_blank(&i.industry)))
        .or_else(|| quote.metadata.as_ref().and_then(|m| non_blank(&m.industry)))
        .or_else(|| quote.info.as_ref().and_then(|i| non_blank(&i.industry)));

    FinancialSnapshot {
        symbol: symbol.to_string(),
        market_cap,
        sector,
        previous_close,
        last_price,
        ..Default::default()
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct HistoryResponse {
    data: Vec<HistoryRow>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct HistoryRow {
    #[serde(rename = "CH_TIMESTAMP")]
    timestamp: Option<String>,
    #[serde(rename = "CH_CLOSING_PRICE", deserialize_with = "lenient_f64")]
    close: Option<f64>,
    #[serde(rename = "CH_TRADE_HIGH_PRICE", deserialize_with = "lenient_f64")]
    high: Option<f64>,
    #[serde(rename = "CH_TOT_TRADED_QTY", deserialize_with = "lenient_f64")]
    volume: Option<f64>,
}

/// Decode historical bars, dropping incomplete rows, sorted oldest first.
pub fn parse_history(body: &str) -> Result<Vec<PriceBar>, serde_json::Error> {
    let response: HistoryResponse = serde_json::from_str(body)?;
    let mut bars: Vec<PriceBar> = response
        .data
        .into_iter()
        .filter_map(|row| {
            let date = row.timestamp.as_deref().and_then(|t| {
                NaiveDate::parse_from_str(t.get(..10).unwrap_or(t), "%Y-%m-%d")
                    .ok()
                    .or_else(|| NaiveDate::parse_from_str(t, "%d-%b-%Y").ok())
            })?;
            Some(PriceBar {
                date,
                close: row.close?,
                high: row.high.or(row.close)?,
                volume: row.volume.unwrap_or(0.0),
            })
        })
        .collect();
    bars.sort_by_key(|b| b.date);
    bars.dedup_by_key(|b| b.date);
    Ok(bars)
}
