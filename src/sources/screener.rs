// =============================================================================
// sources/screener.rs — RATIOS FROM A COMPANY PAGE
// =============================================================================
//
// screener.in renders a company's headline ratios as a list of
// `<li><span class="name">ROCE</span><span class="value">23.4 %</span></li>`
// items under `#top-ratios`, and the shareholding pattern as a table whose
// last column is the latest quarter.
//
// Every field is read on its own. A page where "Dividend Yield" is missing or
// says "-" still yields ROCE and market cap.
// =============================================================================

use scraper::{ElementRef, Html, Selector};
use std::sync::LazyLock;
use std::time::Duration;
use tracing::debug;

use crate::cache::{cache_key, CacheMode, FetchCache};
use crate::circuit_breaker::CircuitBreaker;
use crate::config::Config;
use crate::error::FetchError;
use crate::models::FinancialSnapshot;
use crate::sources::parse_loose_number;

static RATIO_ITEM: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("#top-ratios li").expect("ratio selector must parse"));
static RATIO_NAME: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse(".name").expect("name selector must parse"));
static RATIO_VALUE: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse(".value").expect("value selector must parse"));
static SHAREHOLDING_ROW: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("#shareholding table tbody tr").expect("shareholding selector must parse"));
static CELL: LazyLock<Selector> = LazyLock::new(|| Selector::parse("td").expect("cell selector must parse"));

pub struct ScreenerClient {
    client: reqwest::Client,
    timeout: Duration,
    breaker: CircuitBreaker,
}

impl ScreenerClient {
    pub fn new(client: reqwest::Client, config: &Config) -> Self {
        Self {
            client,
            timeout: config.screener_timeout,
            breaker: CircuitBreaker::new(
                "screener",
                config.circuit_breaker_failure_threshold,
                config.circuit_breaker_reset_timeout,
            ),
        }
    }

    pub fn breakers(&self) -> Vec<&CircuitBreaker> {
        vec![&self.breaker]
    }

    /// Fetch and parse the company page at `url` (see [`Config::screener_url`]).
    pub async fn fetch_snapshot(
        &self,
        cache: &FetchCache,
        mode: CacheMode,
        url: &str,
        symbol: &str,
    ) -> Result<FinancialSnapshot, FetchError> {
        let key = cache_key("screener", &[symbol]);
        if let Some(cached) = cache.screener.lookup(&key, mode) {
            return Ok(cached);
        }

        self.breaker.check()?;
        let result = self.get_page(url).await;
        let html = self.breaker.observe(result)?;

        let snapshot = parse_screener_html(symbol, &html);
        debug!(
            symbol = symbol,
            url = url,
            market_cap = ?snapshot.market_cap,
            roce = ?snapshot.roce,
            "screener page parsed"
        );
        cache.screener.insert(key, snapshot.clone());
        Ok(snapshot)
    }

    async fn get_page(&self, url: &str) -> Result<String, FetchError> {
        let response = self
            .client
            .get(url)
            .header(reqwest::header::ACCEPT, "text/html,application/xhtml+xml")
            .timeout(self.timeout)
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

/// Read the ratio list and shareholding table of a screener company page.
pub fn parse_screener_html(symbol: &str, html: &str) -> FinancialSnapshot {
    let doc = Html::parse_document(html);
    let mut snapshot = FinancialSnapshot::unknown(symbol);

    for item in doc.select(&RATIO_ITEM) {
        let Some(name) = item.select(&RATIO_NAME).next().map(text_of) else {
            continue;
        };
        let value = item
            .select(&RATIO_VALUE)
            .next()
            .map(text_of)
            .and_then(|v| parse_loose_number(&v));

        match name.to_ascii_lowercase().as_str() {
            "market cap" => snapshot.market_cap = value,
            "current price" => snapshot.last_price = value,
            "stock p/e" => snapshot.pe = value,
            "book value" => snapshot.book_value = value,
            "dividend yield" => snapshot.dividend_yield = value,
            "roce" => snapshot.roce = value,
            "roe" => snapshot.roe = value,
            _ => {}
        }
    }

    snapshot.promoter_holding = doc.select(&SHAREHOLDING_ROW).find_map(|row| {
        let mut cells = row.select(&CELL);
        let label = cells.next().map(text_of)?;
        if !label.to_ascii_lowercase().starts_with("promoter") {
            return None;
        }
        cells.last().map(text_of).and_then(|v| parse_loose_number(&v))
    });

    snapshot
}

/// Collapsed, trimmed text content of an element.
fn text_of(el: ElementRef<'_>) -> String {
    el.text()
        .flat_map(|t| t.split_whitespace())
        .collect::<Vec<_>>()
        .join(" ")
        .trim_end_matches('+')
        .trim()
        .to_string()
}
