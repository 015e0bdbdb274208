// =============================================================================
// pipeline.rs — ONE BUTTON, START TO FINISH
// =============================================================================
//
// A run is one user-triggered action:
//
//   1. read the announcement feed for the window
//   2. keep announcements matching the keywords
//   3. read each attachment PDF and extract order value and duration
//   4. per unique symbol: quote + screener ratios + price history
//   5. score, rank, group
//
// Everything is awaited in sequence on one thread. A failure for one symbol
// or one attachment is logged and that row carries "unknown"; only a blocked
// announcement feed stops the run.
//
// `watch` repeats the run on an interval until Ctrl-C, keeping the cache
// between cycles. The feed itself is refetched every cycle; quotes, ratios
// and PDF text are served from cache until their TTL runs out.
// =============================================================================

use chrono::{Duration as ChronoDuration, Local, NaiveDate};
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::time::Duration;
use tracing::{debug, error, info, warn};

use crate::cache::{CacheMode, CacheSnapshot, FetchCache};
use crate::circuit_breaker::BreakerStatus;
use crate::config::Config;
use crate::error::FetchError;
use crate::models::{Announcement, FeedOutcome, FinancialSnapshot, PriceBar, ScoredOrder};
use crate::ranking::{self, EnrichedAnnouncement, RankOptions, RepeatOrder, SectorFlow};
use crate::scorer;
use crate::sources::attachments::AttachmentClient;
use crate::sources::nse::{self, NseClient};
use crate::sources::screener::ScreenerClient;
use crate::sources::build_client;
use crate::text_scanner::{self, KeywordFilter};

/// What the user asked for.
#[derive(Debug, Clone)]
pub struct RunRequest {
    pub from: NaiveDate,
    pub to: NaiveDate,
    /// Empty means every announcement in the window.
    pub keywords: Vec<String>,
    pub mode: CacheMode,
    pub read_pdfs: bool,
    pub rank: RankOptions,
}

/// Counters for one run, logged at the end and printed under the table.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RunStats {
    pub fetched: usize,
    pub matched: usize,
    pub with_order_value: usize,
    pub symbols: usize,
    pub pdfs_read: usize,
    pub pdf_failures: usize,
    pub quote_failures: usize,
    pub screener_failures: usize,
    pub history_failures: usize,
    pub ranked: usize,
}

/// Everything a presentation layer needs.
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub from: NaiveDate,
    pub to: NaiveDate,
    pub orders: Vec<ScoredOrder>,
    pub repeat_orders: Vec<RepeatOrder>,
    pub sector_flow: Vec<SectorFlow>,
    pub stats: RunStats,
    pub caches: Vec<CacheSnapshot>,
    pub breakers: Vec<BreakerStatus>,
}

#[derive(Debug, Clone)]
pub enum RunOutcome {
    Report(RunReport),
    /// The exchange refused to hand over the feed. Try again later.
    Blocked { status: Option<u16>, reason: String },
}

pub struct Pipeline {
    config: Config,
    nse: NseClient,
    screener: ScreenerClient,
    attachments: AttachmentClient,
    cache: FetchCache,
}

impl Pipeline {
    pub fn new(config: Config) -> Result<Self, FetchError> {
        let client = build_client(&config)?;
        Ok(Self {
            nse: NseClient::new(client.clone(), &config),
            screener: ScreenerClient::new(client.clone(), &config),
            attachments: AttachmentClient::new(client, &config),
            cache: FetchCache::from_config(&config),
            config,
        })
    }

    pub fn cache(&self) -> &FetchCache {
        &self.cache
    }

    /// Run the whole pipeline once.
    pub async fn run(&self, request: &RunRequest) -> RunOutcome {
        let mut stats = RunStats::default();
        info!(
            from = %request.from,
            to = %request.to,
            keywords = request.keywords.len(),
            refresh = request.mode == CacheMode::Refresh,
            "run started"
        );

        let announcements = match self
            .nse
            .fetch_announcements(&self.cache, request.mode, request.from, request.to)
            .await
        {
            FeedOutcome::Records(records) => records,
            FeedOutcome::Empty => {
                info!("no announcements in window");
                Vec::new()
            }
            FeedOutcome::Blocked { status, reason } => {
                error!(status = ?status, reason = %reason, "announcement feed blocked, retry later");
                return RunOutcome::Blocked { status, reason };
            }
        };
        stats.fetched = announcements.len();

        let filter = KeywordFilter::new(&request.keywords);
        let matched: Vec<Announcement> = announcements.into_iter().filter(|a| filter.matches(a)).collect();
        stats.matched = matched.len();
        debug!(fetched = stats.fetched, matched = stats.matched, "keyword filter applied");

        let mut rows = Vec::with_capacity(matched.len());
        for announcement in matched {
            let pdf_text = self.pdf_text(&announcement, request, &mut stats).await;
            let signal = text_scanner::extract_signal(&announcement.texts(&pdf_text));
            if signal.order_value_cr.is_some() {
                stats.with_order_value += 1;
            }
            rows.push(EnrichedAnnouncement {
                announcement,
                signal,
                price_signals: Default::default(),
            });
        }

        let symbols = unique_symbols(&rows);
        stats.symbols = symbols.len();

        let mut snapshots: HashMap<String, FinancialSnapshot> = HashMap::with_capacity(symbols.len());
        let mut histories: HashMap<String, Vec<PriceBar>> = HashMap::with_capacity(symbols.len());
        let (history_from, history_to) = self.history_window(request);

        for symbol in &symbols {
            let snapshot = self.snapshot(symbol, request.mode, &mut stats).await;
            snapshots.insert(symbol.clone(), snapshot);

            match self
                .nse
                .fetch_history(&self.cache, request.mode, symbol, history_from, history_to)
                .await
            {
                Ok(bars) => {
                    histories.insert(symbol.clone(), bars);
                }
                Err(e) => {
                    stats.history_failures += 1;
                    warn!(symbol = %symbol, error = %e, "price history unavailable");
                }
            }
        }

        for row in &mut rows {
            if let Some(bars) = histories.get(&row.announcement.symbol) {
                let order_date = row.announcement.announced_at.map(|dt| dt.date());
                row.price_signals = scorer::price_signals(bars, order_date);
            }
        }

        let scored = ranking::score_all(rows, &snapshots, &self.config.weights);
        let repeat_orders = ranking::repeat_orders(&scored);
        let sector_flow = ranking::sector_flow(&scored);
        let orders = ranking::rank(scored, &request.rank);
        stats.ranked = orders.len();
        if let Some(best) = orders.first() {
            debug!(best = %best, "top ranked order");
        }

        info!(
            fetched = stats.fetched,
            matched = stats.matched,
            with_order_value = stats.with_order_value,
            symbols = stats.symbols,
            ranked = stats.ranked,
            "run finished"
        );

        RunOutcome::Report(RunReport {
            from: request.from,
            to: request.to,
            orders,
            repeat_orders,
            sector_flow,
            stats,
            caches: self.cache.snapshots(),
            breakers: self.breaker_statuses(),
        })
    }

    fn breaker_statuses(&self) -> Vec<BreakerStatus> {
        self.nse
            .breakers()
            .into_iter()
            .chain(self.screener.breakers())
            .chain(self.attachments.breakers())
            .map(|b| b.status())
            .collect()
    }

    /// Attachment text, or empty when there is none, PDFs are off, or it fails.
    async fn pdf_text(&self, announcement: &Announcement, request: &RunRequest, stats: &mut RunStats) -> String {
        if !request.read_pdfs {
            return String::new();
        }
        let Some(url) = announcement.attachment_url.as_deref() else {
            return String::new();
        };

        match self.attachments.fetch_pdf_text(&self.cache, request.mode, url).await {
            Ok(text) => {
                if !text.is_empty() {
                    stats.pdfs_read += 1;
                }
                text
            }
            Err(e) => {
                stats.pdf_failures += 1;
                warn!(symbol = %announcement.symbol, url = url, error = %e, "attachment unreadable");
                String::new()
            }
        }
    }

    /// Quote fields first, screener ratios to fill the gaps.
    async fn snapshot(&self, symbol: &str, mode: CacheMode, stats: &mut RunStats) -> FinancialSnapshot {
        let quote = match self.nse.fetch_quote(&self.cache, mode, symbol).await {
            Ok(snapshot) => snapshot,
            Err(e) => {
                stats.quote_failures += 1;
                if e.is_rejection() {
                    warn!(symbol = symbol, error = %e, "exchange rejected quote request");
                } else {
                    warn!(symbol = symbol, error = %e, "quote unavailable");
                }
                FinancialSnapshot::unknown(symbol)
            }
        };

        let url = self.config.screener_url(symbol);
        match self.screener.fetch_snapshot(&self.cache, mode, &url, symbol).await {
            Ok(ratios) => quote.merge(ratios),
            Err(e) => {
                stats.screener_failures += 1;
                warn!(symbol = symbol, error = %e, "screener ratios unavailable");
                quote
            }
        }
    }

    /// Enough history before the window for the lookback, plus a few sessions
    /// after it for the next-day reaction, never past today.
    fn history_window(&self, request: &RunRequest) -> (NaiveDate, NaiveDate) {
        let today = Local::now().date_naive();
        let from = request.from - ChronoDuration::days(self.config.history_lookback_days.max(1));
        let to = (request.to + ChronoDuration::days(7)).min(today).max(request.from);
        (from, to)
    }
}

/// Symbols in order of first appearance.
fn unique_symbols(rows: &[EnrichedAnnouncement]) -> Vec<String> {
    let mut seen = HashSet::new();
    rows.iter()
        .map(|r| r.announcement.symbol.as_str())
        .filter(|s| seen.insert(*s))
        .map(str::to_string)
        .collect()
}

/// Rerun `request` every `interval` until Ctrl-C, handing each outcome to
/// `on_outcome`. The first cycle honours the request's cache mode; later
/// cycles refetch the feed and reuse everything else.
pub async fn watch<F>(pipeline: &Pipeline, request: RunRequest, interval: Duration, mut on_outcome: F)
where
    F: FnMut(&RunOutcome),
{
    let mut request = request;
    let mut cycle: u64 = 0;
    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);
    info!(interval_secs = interval.as_secs(), "watch started, Ctrl-C to stop");

    loop {
        cycle += 1;
        debug!(cycle = cycle, "watch cycle");

        let outcome = tokio::select! {
            outcome = pipeline.run(&request) => outcome,
            signal = &mut shutdown => {
                stopped(signal, cycle);
                return;
            }
        };
        on_outcome(&outcome);

        request.mode = CacheMode::Use;
        pipeline
            .cache()
            .announcements
            .invalidate(&nse::announcements_key(request.from, request.to));

        tokio::select! {
            _ = tokio::time::sleep(interval) => {}
            signal = &mut shutdown => {
                stopped(signal, cycle);
                return;
            }
        }
    }
}

fn stopped(signal: std::io::Result<()>, cycles: u64) {
    if let Err(e) = signal {
        error!(error = %e, "signal listener failed");
    }
    warn!(cycles = cycles, "watch stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ExtractedSignal;

    fn row(symbol: &str) -> EnrichedAnnouncement {
        EnrichedAnnouncement {
            announcement: Announcement {
                symbol: symbol.to_string(),
                company_name: symbol.to_string(),
                description: String::new(),
                attachment_text: String::new(),
                attachment_url: None,
                announced_at: None,
            },
            signal: ExtractedSignal::default(),
            price_signals: Default::default(),
        }
    }

    #[test]
    fn test_unique_symbols_keep_first_appearance() {
        let rows = vec![row("LT"), row("HAL"), row("LT"), row("BEL"), row("HAL")];
        assert_eq!(unique_symbols(&rows), vec!["LT", "HAL", "BEL"]);
    }

    #[test]
    fn test_history_window_brackets_request() {
        let mut config = Config::from_env();
        config.history_lookback_days = 45;
        let pipeline = Pipeline::new(config).unwrap();
        let request = RunRequest {
            from: NaiveDate::from_ymd_opt(2024, 5, 10).unwrap(),
            to: NaiveDate::from_ymd_opt(2024, 5, 10).unwrap(),
            keywords: vec![],
            mode: CacheMode::Use,
            read_pdfs: false,
            rank: RankOptions::default(),
        };
        let (from, to) = pipeline.history_window(&request);
        assert_eq!(from, NaiveDate::from_ymd_opt(2024, 3, 26).unwrap());
        assert_eq!(to, NaiveDate::from_ymd_opt(2024, 5, 17).unwrap());
    }

    #[tokio::test]
    async fn test_pdfs_off_reads_nothing() {
        let pipeline = Pipeline::new(Config::from_env()).unwrap();
        let mut announcement = row("LT").announcement;
        announcement.attachment_url = Some("https://nsearchives.nseindia.com/corporate/LT_1.pdf".into());
        let request = RunRequest {
            from: NaiveDate::from_ymd_opt(2024, 5, 10).unwrap(),
            to: NaiveDate::from_ymd_opt(2024, 5, 10).unwrap(),
            keywords: vec![],
            mode: CacheMode::Use,
            read_pdfs: false,
            rank: RankOptions::default(),
        };
        let mut stats = RunStats::default();
        let text = pipeline.pdf_text(&announcement, &request, &mut stats).await;
        assert!(text.is_empty());
        assert_eq!(stats, RunStats::default());
    }

    mod http {
        use super::*;
        use wiremock::matchers::{method, path, query_param};
        use wiremock::{Mock, MockServer, ResponseTemplate};

        const FEED: &str = r#"[
            {"symbol": "SME1", "sm_name": "Small Works Limited", "desc": "Bagging/Receiving of orders/contracts",
             "attchmntText": "Received a work order worth Rs 45 crore to be executed within 12 months",
             "sort_date": "2024-05-10 11:00:00"},
            {"symbol": "LT", "sm_name": "Larsen & Toubro Limited", "desc": "Bagging/Receiving of orders/contracts",
             "attchmntText": "L&T wins order worth Rs 2,500 crore", "sort_date": "2024-05-10 18:30:12"}
        ]"#;

        const LT_QUOTE: &str = r#"{"priceInfo": {"lastPrice": 3500.5, "previousClose": 3480.0},
            "securityInfo": {"issuedSize": 1374856286}, "industryInfo": {"sector": "Construction"}}"#;

        const LT_PAGE: &str = r#"<html><body><ul id="top-ratios">
            <li><span class="name">ROCE</span><span class="value"><span class="number">14.6</span> %</span></li>
        </ul></body></html>"#;

        fn request(include_unscored: bool) -> RunRequest {
            let day = NaiveDate::from_ymd_opt(2024, 5, 10).unwrap();
            RunRequest {
                from: day,
                to: day,
                keywords: vec![],
                mode: CacheMode::Use,
                read_pdfs: false,
                rank: RankOptions {
                    include_unscored,
                    ..RankOptions::default()
                },
            }
        }

        fn pipeline_for(server: &MockServer) -> Pipeline {
            let mut config = Config::from_env();
            config.nse_home_url = server.uri();
            config.nse_api_url = format!("{}/api", server.uri());
            config.screener_base_url = format!("{}/company", server.uri());
            config.circuit_breaker_failure_threshold = 5;
            Pipeline::new(config).unwrap()
        }

        async fn mount(server: &MockServer, route: &str, symbol: Option<&str>, response: ResponseTemplate) {
            let mock = Mock::given(method("GET")).and(path(route));
            match symbol {
                Some(symbol) => mock.and(query_param("symbol", symbol)).respond_with(response).mount(server).await,
                None => mock.respond_with(response).mount(server).await,
            }
        }

        #[tokio::test]
        async fn test_one_symbol_failing_leaves_the_others_scored() {
            let server = MockServer::start().await;
            mount(&server, "/", None, ResponseTemplate::new(200)).await;
            mount(&server, "/api/corporate-announcements", None, ResponseTemplate::new(200).set_body_string(FEED)).await;
            mount(&server, "/api/quote-equity", Some("SME1"), ResponseTemplate::new(404)).await;
            mount(&server, "/api/quote-equity", Some("LT"), ResponseTemplate::new(200).set_body_string(LT_QUOTE)).await;
            mount(&server, "/company/SME1/consolidated/", None, ResponseTemplate::new(503)).await;
            mount(&server, "/company/LT/consolidated/", None, ResponseTemplate::new(200).set_body_string(LT_PAGE)).await;
            mount(
                &server,
                "/api/historical/cm/equity",
                None,
                ResponseTemplate::new(200).set_body_string(r#"{"data": []}"#),
            )
            .await;

            let pipeline = pipeline_for(&server);
            let RunOutcome::Report(report) = pipeline.run(&request(true)).await else {
                panic!("feed should not be blocked");
            };

            assert_eq!(report.stats.fetched, 2);
            assert_eq!(report.stats.symbols, 2);
            assert_eq!(report.stats.quote_failures, 1);
            assert_eq!(report.stats.screener_failures, 1);
            assert_eq!(report.orders.len(), 2);

            let lt = &report.orders[0];
            assert_eq!(lt.announcement.symbol, "LT");
            assert!(lt.snapshot.market_cap.is_some());
            assert_eq!(lt.snapshot.roce, Some(14.6));
            assert_eq!(lt.snapshot.sector.as_deref(), Some("Construction"));
            assert!(lt.impact_score > 0.0);

            let sme = &report.orders[1];
            assert_eq!(sme.announcement.symbol, "SME1");
            assert_eq!(sme.signal.order_value_cr, Some(45.0));
            assert_eq!(sme.snapshot.market_cap, None);
            assert_eq!(sme.order_pct_of_mcap, None);
            assert!(report.breakers.iter().all(|b| b.trips == 0));
        }

        #[tokio::test]
        async fn test_unscored_rows_are_dropped_by_default() {
            let server = MockServer::start().await;
            mount(&server, "/", None, ResponseTemplate::new(200)).await;
            mount(&server, "/api/corporate-announcements", None, ResponseTemplate::new(200).set_body_string(FEED)).await;
            mount(&server, "/api/quote-equity", Some("LT"), ResponseTemplate::new(200).set_body_string(LT_QUOTE)).await;

            let pipeline = pipeline_for(&server);
            let RunOutcome::Report(report) = pipeline.run(&request(false)).await else {
                panic!("feed should not be blocked");
            };
            assert_eq!(report.orders.len(), 1);
            assert_eq!(report.orders[0].announcement.symbol, "LT");
        }

        #[tokio::test]
        async fn test_blocked_feed_stops_the_run() {
            let server = MockServer::start().await;
            mount(&server, "/", None, ResponseTemplate::new(200)).await;
            mount(&server, "/api/corporate-announcements", None, ResponseTemplate::new(403)).await;

            let pipeline = pipeline_for(&server);
            let outcome = pipeline.run(&request(true)).await;
            assert!(matches!(outcome, RunOutcome::Blocked { status: Some(403), .. }));
            assert_eq!(pipeline.cache().announcements.len(), 0);
        }
    }
}
