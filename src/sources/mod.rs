// =============================================================================
// sources/mod.rs — WHERE THE DATA COMES FROM
// =============================================================================
//
// Three upstreams, one HTTP client:
//
// - nse:         the exchange JSON API (announcements, quotes, price history)
// - screener:    screener.in company pages, scraped for ratios
// - attachments: the PDFs companies attach to their filings
//
// The client carries a cookie jar and browser-like headers because the
// exchange refuses to talk to anything that does not look like a browser
// that has visited its home page first.
// =============================================================================

pub mod attachments;
pub mod nse;
pub mod screener;

use regex::Regex;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, ACCEPT_LANGUAGE, REFERER};
use serde::{Deserialize, Deserializer};
use serde_json::Value;
use std::sync::LazyLock;

use crate::config::Config;
use crate::error::FetchError;

/// Build the shared HTTP client.
pub fn build_client(config: &Config) -> Result<reqwest::Client, FetchError> {
    let mut headers = HeaderMap::new();
    headers.insert(ACCEPT, HeaderValue::from_static("application/json, text/plain, */*"));
    headers.insert(ACCEPT_LANGUAGE, HeaderValue::from_static("en-US,en;q=0.9"));
    if let Ok(referer) = HeaderValue::from_str(&format!("{}/", config.nse_home_url.trim_end_matches('/'))) {
        headers.insert(REFERER, referer);
    }

    reqwest::Client::builder()
        .cookie_store(true)
        .user_agent(config.user_agent.as_str())
        .default_headers(headers)
        .build()
        .map_err(|source| FetchError::Http {
            url: "<client builder>".to_string(),
            source,
        })
}

static NUMBER_TOKEN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"-?[0-9][0-9,]*(?:\.[0-9]+)?").expect("number token pattern must compile"));

/// Parse a number the way upstreams print them: `1,234.5`, `"12.3 %"`, `₹ 45 Cr.`.
/// The first numeric token wins; thousands separators are dropped.
pub fn parse_loose_number(raw: &str) -> Option<f64> {
    let token = NUMBER_TOKEN.find(raw)?;
    let cleaned: String = token.as_str().chars().filter(|c| *c != ',').collect();
    cleaned.parse::<f64>().ok().filter(|v| v.is_finite())
}

/// Deserialize an optional number that may arrive as a JSON number, a numeric
/// string, `"-"`, or garbage. Anything unusable becomes `None`.
pub fn lenient_f64<'de, D>(deserializer: D) -> Result<Option<f64>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(match value {
        Some(Value::Number(n)) => n.as_f64(),
        Some(Value::String(s)) => parse_loose_number(&s),
        _ => None,
    })
}
