//  ██████╗ ██████╗ ██████╗ ███████╗██████╗
// ██╔═══██╗██╔══██╗██╔══██╗██╔════╝██╔══██╗
// ██║   ██║██████╔╝██║  ██║█████╗  ██████╔╝
// ██║   ██║██╔══██╗██║  ██║██╔══╝  ██╔══██╗
// ╚██████╔╝██║  ██║██████╔╝███████╗██║  ██║
//  ╚═════╝ ╚═╝  ╚═╝╚═════╝ ╚══════╝╚═╝  ╚═╝
//
// I N T E L
//
// Reads the exchange's corporate announcements, digs the order value and
// execution period out of the filing text, sizes each order against the
// company's market cap and ranks the lot by impact.

mod auth;
mod cache;
mod circuit_breaker;
mod config;
mod error;
mod models;
mod pipeline;
mod ranking;
mod report;
mod scorer;
mod sources;
mod text_scanner;

use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use anyhow::{bail, Context};
use chrono::{Duration as ChronoDuration, Local, NaiveDate};
use clap::{Args, Parser, Subcommand};
use tracing::{debug, warn};
use tracing_subscriber::{fmt, EnvFilter};

use crate::cache::CacheMode;
use crate::config::{Config, LogFormat};
use crate::pipeline::{Pipeline, RunOutcome, RunRequest};
use crate::ranking::RankOptions;

/// NSE order announcement scanner
#[derive(Parser)]
#[command(name = "order-intel", version, about = "Rank NSE order announcements by impact")]
struct Cli {
    /// Login user (required when ORDER_INTEL_USERS is set).
    #[arg(long, global = true, env = "ORDER_INTEL_USER")]
    user: Option<String>,

    /// Login password.
    #[arg(long, global = true, env = "ORDER_INTEL_PASSWORD", hide_env_values = true)]
    password: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Fetch, score and rank once.
    Run(RunArgs),

    /// Rerun on an interval until Ctrl-C, reusing the cache.
    Watch {
        #[command(flatten)]
        run: RunArgs,

        /// Seconds between runs.
        #[arg(long, default_value_t = 300)]
        interval_secs: u64,
    },

    /// Print the SHA-256 hash of a password for ORDER_INTEL_USERS.
    HashPassword {
        #[arg(value_name = "PASSWORD")]
        plaintext: String,
    },
}

#[derive(Args, Clone)]
struct RunArgs {
    /// First day of the window (DD-MM-YYYY or YYYY-MM-DD). Defaults to yesterday.
    #[arg(long, value_parser = parse_date)]
    from: Option<NaiveDate>,

    /// Last day of the window. Defaults to today.
    #[arg(long, value_parser = parse_date)]
    to: Option<NaiveDate>,

    /// Keyword an announcement must mention. Repeatable; replaces the defaults.
    #[arg(long = "keyword")]
    keywords: Vec<String>,

    /// Keep every announcement, no keyword filter.
    #[arg(long, conflicts_with = "keywords")]
    all: bool,

    /// Ignore cached data for this run.
    #[arg(long)]
    refresh: bool,

    /// Also write the ranked table as CSV.
    #[arg(long)]
    csv: Option<PathBuf>,

    /// Drop rows scoring below this.
    #[arg(long, default_value_t = 0.0)]
    min_score: f64,

    /// Keep rows without order value or market cap.
    #[arg(long)]
    include_unscored: bool,

    /// Do not download attachment PDFs.
    #[arg(long)]
    no_pdf: bool,

    /// Show only the N best rows.
    #[arg(long)]
    top: Option<usize>,
}

impl RunArgs {
    fn into_request(self, config: &Config) -> anyhow::Result<RunRequest> {
        self.into_request_on(config, Local::now().date_naive())
    }

    /// Without `--from` the window opens the day before, so filings made
    /// after the previous close are included.
    fn into_request_on(self, config: &Config, today: NaiveDate) -> anyhow::Result<RunRequest> {
        let to = self.to.unwrap_or(today);
        let from = self.from.unwrap_or_else(|| (today - ChronoDuration::days(1)).min(to));
        if from > to {
            bail!("--from {from} is after --to {to}");
        }

        let keywords = if self.all {
            Vec::new()
        } else if self.keywords.is_empty() {
            config.default_keywords.clone()
        } else {
            self.keywords
        };

        Ok(RunRequest {
            from,
            to,
            keywords,
            mode: if self.refresh { CacheMode::Refresh } else { CacheMode::Use },
            read_pdfs: config.read_pdfs && !self.no_pdf,
            rank: RankOptions {
                include_unscored: self.include_unscored,
                min_score: self.min_score,
                limit: self.top,
            },
        })
    }
}

fn parse_date(raw: &str) -> Result<NaiveDate, String> {
    NaiveDate::parse_from_str(raw, "%d-%m-%Y")
        .or_else(|_| NaiveDate::parse_from_str(raw, "%Y-%m-%d"))
        .map_err(|_| format!("expected DD-MM-YYYY or YYYY-MM-DD, got {raw:?}"))
}

fn print_banner() {
    let banner = r#"
    ╔══════════════════════════════════════════════════════════════╗
    ║                                                              ║
    ║                O R D E R   I N T E L                         ║
    ║                                                              ║
    ║   Feed:     NSE corporate announcements                      ║
    ║   Reads:    filing text + attached PDFs                      ║
    ║   Sizes:    order value vs market cap, ROCE, price action    ║
    ║                                                              ║
    ╚══════════════════════════════════════════════════════════════╝
    "#;
    eprintln!("{}", banner);
}

fn init_tracing(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    match format {
        LogFormat::Json => fmt()
            .json()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .with_target(true)
            .init(),
        LogFormat::Pretty => fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .with_target(true)
            .with_ansi(true)
            .init(),
    }
}

/// Print a run outcome. `false` when the feed was blocked.
fn present(outcome: &RunOutcome, config: &Config, csv: Option<&PathBuf>) -> anyhow::Result<bool> {
    match outcome {
        RunOutcome::Blocked { status, reason } => {
            eprintln!("{}", report::render_blocked(*status, reason));
            Ok(false)
        }
        RunOutcome::Report(run) => {
            print!("{}", report::render_table(run, |symbol| config.screener_url(symbol)));
            print!("{}", report::render_summaries(run));
            if let Some(path) = csv {
                report::export_csv(&run.orders, path)
                    .with_context(|| format!("writing {}", path.display()))?;
                println!("CSV written to {}", path.display());
            }
            Ok(true)
        }
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<ExitCode> {
    let cli = Cli::parse();
    let config = Config::from_env();
    init_tracing(config.log_format);

    if !matches!(cli.command, Command::HashPassword { .. }) {
        print_banner();
        config
            .users
            .authorize(cli.user.as_deref(), cli.password.as_deref())
            .context("login failed")?;
        debug!(users = config.users.len(), open = config.users.is_open(), "login gate passed");
    }

    run_command(cli.command, config).await
}

async fn run_command(command: Command, config: Config) -> anyhow::Result<ExitCode> {
    match command {
        Command::Run(args) => {
            let csv = args.csv.clone();
            let request = args.into_request(&config)?;
            let pipeline = Pipeline::new(config.clone()).context("building HTTP client")?;
            let outcome = pipeline.run(&request).await;
            if present(&outcome, &config, csv.as_ref())? {
                Ok(ExitCode::SUCCESS)
            } else {
                Ok(ExitCode::from(2))
            }
        }
        Command::Watch { run, interval_secs } => {
            let csv = run.csv.clone();
            let request = run.into_request(&config)?;
            let pipeline = Pipeline::new(config.clone()).context("building HTTP client")?;
            let interval = Duration::from_secs(interval_secs.max(1));

            pipeline::watch(&pipeline, request, interval, |outcome| {
                if let Err(e) = present(outcome, &config, csv.as_ref()) {
                    warn!(error = %e, "could not present run");
                }
            })
            .await;
            Ok(ExitCode::SUCCESS)
        }
        Command::HashPassword { plaintext } => {
            println!("{}", auth::hash_password(&plaintext));
            Ok(ExitCode::SUCCESS)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run_args(argv: &[&str]) -> RunArgs {
        let mut full = vec!["order-intel", "run"];
        full.extend_from_slice(argv);
        match Cli::parse_from(full).command {
            Command::Run(args) => args,
            _ => panic!("expected the run command"),
        }
    }

    #[test]
    fn test_default_window_starts_yesterday() {
        let today = NaiveDate::from_ymd_opt(2024, 5, 10).unwrap();
        let request = run_args(&[]).into_request_on(&Config::from_env(), today).unwrap();
        assert_eq!(request.from, NaiveDate::from_ymd_opt(2024, 5, 9).unwrap());
        assert_eq!(request.to, today);
    }

    #[test]
    fn test_explicit_window_and_reversed_dates() {
        let today = NaiveDate::from_ymd_opt(2024, 5, 10).unwrap();
        let request = run_args(&["--from", "01-05-2024", "--to", "2024-05-03"])
            .into_request_on(&Config::from_env(), today)
            .unwrap();
        assert_eq!(request.from, NaiveDate::from_ymd_opt(2024, 5, 1).unwrap());
        assert_eq!(request.to, NaiveDate::from_ymd_opt(2024, 5, 3).unwrap());

        let reversed = run_args(&["--from", "05-05-2024", "--to", "01-05-2024"])
            .into_request_on(&Config::from_env(), today);
        assert!(reversed.is_err());
    }
}
