// =============================================================================
// config.rs — THE CONTROL PANEL
// =============================================================================
//
// Every knob the engine has lives here. URLs, timeouts, cache lifetimes,
// circuit breaker thresholds, the keywords that make an announcement look
// like an order, and the weights of the impact score.
//
// All values can be overridden via ORDER_INTEL_* environment variables (or a
// .env file). Defaults work out of the box against the public NSE and
// screener.in endpoints.
// =============================================================================

use std::env;
use std::time::Duration;

use crate::auth::UserDirectory;
use crate::scorer::ImpactWeights;

/// Output format for the tracing subscriber.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Pretty,
    Json,
}

#[derive(Debug, Clone)]
pub struct Config {
    // =========================================================================
    // UPSTREAM ENDPOINTS
    // =========================================================================

    /// Exchange home page. Visited first so the API sees a primed cookie jar.
    pub nse_home_url: String,

    /// Exchange JSON API root (`/api/corporate-announcements`, `/api/quote-equity`, ...).
    pub nse_api_url: String,

    /// Root of the screener.in company pages.
    pub screener_base_url: String,

    /// Browser-like user agent. The exchange bounces anything that looks like a script.
    pub user_agent: String,

    // =========================================================================
    // TIMEOUTS
    // One blocking call, one timeout. Nothing is retried inside a run.
    // =========================================================================
    pub warmup_timeout: Duration,
    pub api_timeout: Duration,
    pub screener_timeout: Duration,
    pub pdf_timeout: Duration,

    // =========================================================================
    // CACHE
    // =========================================================================

    /// TTL for announcements, quotes, price history and screener ratios.
    pub data_ttl: Duration,

    /// TTL for extracted PDF text. PDFs never change once filed.
    pub pdf_ttl: Duration,

    /// Upper bound on entries per cache before LRU eviction kicks in.
    pub cache_capacity: usize,

    // =========================================================================
    // CIRCUIT BREAKER
    // =========================================================================
    pub circuit_breaker_failure_threshold: u32,
    pub circuit_breaker_reset_timeout: Duration,

    // =========================================================================
    // PIPELINE BEHAVIOUR
    // =========================================================================

    /// Keywords applied when the user does not pick any on the command line.
    pub default_keywords: Vec<String>,

    /// Whether attachment PDFs are downloaded and parsed at all.
    pub read_pdfs: bool,

    /// Calendar days of history requested per symbol before the window, for breakout/volume signals.
    pub history_lookback_days: i64,

    /// Impact score weights.
    pub weights: ImpactWeights,

    /// Configured login users. Empty means the gate is open.
    pub users: UserDirectory,

    pub log_format: LogFormat,
}

impl Config {
    /// Load configuration from the environment, reading `.env` first if present.
    pub fn from_env() -> Self {
        let _ = dotenvy::dotenv();

        let defaults = ImpactWeights::default();

        Config {
            nse_home_url: env_or_default("ORDER_INTEL_NSE_HOME_URL", "https://www.nseindia.com"),
            nse_api_url: env_or_default("ORDER_INTEL_NSE_API_URL", "https://www.nseindia.com/api"),
            screener_base_url: env_or_default(
                "ORDER_INTEL_SCREENER_BASE_URL",
                "https://www.screener.in/company",
            ),
            user_agent: env_or_default(
                "ORDER_INTEL_USER_AGENT",
                "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0 Safari/537.36",
            ),

            warmup_timeout: secs("ORDER_INTEL_WARMUP_TIMEOUT_SECS", 5),
            api_timeout: secs("ORDER_INTEL_API_TIMEOUT_SECS", 10),
            screener_timeout: secs("ORDER_INTEL_SCREENER_TIMEOUT_SECS", 10),
            pdf_timeout: secs("ORDER_INTEL_PDF_TIMEOUT_SECS", 20),

            data_ttl: secs("ORDER_INTEL_DATA_TTL_SECS", 15 * 60),
            pdf_ttl: secs("ORDER_INTEL_PDF_TTL_SECS", 60 * 60),
            cache_capacity: env_or_default("ORDER_INTEL_CACHE_CAPACITY", "2048")
                .parse()
                .unwrap_or(2048),

            circuit_breaker_failure_threshold: env_or_default("ORDER_INTEL_CB_FAILURE_THRESHOLD", "5")
                .parse()
                .unwrap_or(5),
            circuit_breaker_reset_timeout: secs("ORDER_INTEL_CB_RESET_TIMEOUT_SECS", 60),

            default_keywords: parse_list(&env_or_default(
                "ORDER_INTEL_DEFAULT_KEYWORDS",
                "order,contract,award,bagging,letter of intent",
            )),
            read_pdfs: parse_bool(&env_or_default("ORDER_INTEL_READ_PDFS", "true")),
            history_lookback_days: env_or_default("ORDER_INTEL_HISTORY_LOOKBACK_DAYS", "45")
                .parse()
                .unwrap_or(45),

            weights: ImpactWeights {
                size_multiplier: env_f64("ORDER_INTEL_WEIGHT_SIZE_MULTIPLIER", defaults.size_multiplier),
                size_cap: env_f64("ORDER_INTEL_WEIGHT_SIZE_CAP", defaults.size_cap),
                roce_full_marks: env_f64("ORDER_INTEL_WEIGHT_ROCE_FULL_MARKS", defaults.roce_full_marks),
                roce_cap: env_f64("ORDER_INTEL_WEIGHT_ROCE_CAP", defaults.roce_cap),
                breakout_bonus: env_f64("ORDER_INTEL_WEIGHT_BREAKOUT_BONUS", defaults.breakout_bonus),
                volume_spike_bonus: env_f64(
                    "ORDER_INTEL_WEIGHT_VOLUME_SPIKE_BONUS",
                    defaults.volume_spike_bonus,
                ),
            },

            users: UserDirectory::parse(&env_or_default("ORDER_INTEL_USERS", "")),

            log_format: match env_or_default("ORDER_INTEL_LOG_FORMAT", "pretty")
                .to_ascii_lowercase()
                .as_str()
            {
                "json" => LogFormat::Json,
                _ => LogFormat::Pretty,
            },
        }
    }

    /// URL of the screener.in consolidated profile for a symbol.
    pub fn screener_url(&self, symbol: &str) -> String {
        format!(
            "{}/{}/consolidated/",
            self.screener_base_url.trim_end_matches('/'),
            urlencoding::encode(symbol)
        )
    }
}

fn env_or_default(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

fn secs(key: &str, default: u64) -> Duration {
    Duration::from_secs(
        env_or_default(key, &default.to_string())
            .parse()
            .unwrap_or(default),
    )
}

fn env_f64(key: &str, default: f64) -> f64 {
    env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

/// Comma-separated list, blanks dropped.
fn parse_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|s| s.trim())
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

fn parse_bool(raw: &str) -> bool {
    matches!(raw.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "on")
}
