//! formprobe CLI.
//!
//! Loads a selectors file (and optionally a profile), probes the contest page
//! with a local Chromium, prints the result as JSON and exits with a code the
//! calling scheduler can act on.
//!
//! Usage:
//!   $ FORMPROBE_CHROME_BIN=/path/to/chrome \
//!     cargo run --bin formprobe -- probe --selectors config/selectors.yml \
//!       --profile config/profile.yml --report-dir data/reports --csv-dir data/exports

use std::env;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::Local;
use clap::{Args, Parser, Subcommand};
use log::{error, info, warn};
use tokio_util::sync::CancellationToken;

use formprobe::browser::LaunchOptions;
use formprobe::config::{Verbosity, parse_retry_delays};
use formprobe::logging::{ProbeLogger, fan_out, file_log_sink, log_crate_handler};
use formprobe::probe::ensure_navigated;
use formprobe::report::{CsvRow, ReportHeader, append_csv_row, write_report};
use formprobe::{ChromiumoxideRuntime, PageState, Probe, ProbeConfig, ProbeRequest};

const EXIT_CONFIG: u8 = 2;
const EXIT_NAVIGATION: u8 = 3;
const EXIT_MISSING: u8 = 5;

#[derive(Parser)]
#[command(
    name = "formprobe",
    author,
    version,
    about = "Classify a contest page, capture it and pre-fill its form without submitting"
)]
struct Cli {
    /// Increase log verbosity (pass multiple times for DEBUG).
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Probe one contest page.
    Probe(ProbeArgs),
}

#[derive(Args)]
struct ProbeArgs {
    /// Selectors file (`meta`, `form.url`, `selectors`).
    #[arg(long)]
    selectors: PathBuf,

    /// Profile file with the identity used for prefill.
    #[arg(long)]
    profile: Option<PathBuf>,

    /// Override the URL from the selectors file.
    #[arg(long)]
    url: Option<String>,

    /// Show the launched browser window.
    #[arg(long)]
    show_browser: bool,

    /// Directory receiving screenshots.
    #[arg(long)]
    artifact_dir: Option<PathBuf>,

    /// Comma-separated delays in milliseconds, first one must be 0 (e.g. `0,2000,5000`).
    #[arg(long)]
    retry_delays: Option<String>,

    /// Write an HTML diagnostics report into this directory.
    #[arg(long)]
    report_dir: Option<PathBuf>,

    /// Append a summary row to `concours_<date>.csv` in this directory.
    #[arg(long)]
    csv_dir: Option<PathBuf>,

    /// Also append probe log lines to this file.
    #[arg(long)]
    log_file: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_env_logger(cli.verbose);

    let outcome = match cli.command {
        Command::Probe(args) => run_probe(args, cli.verbose).await,
    };

    match outcome {
        Ok(code) => code,
        Err(err) => {
            error!("{err:#}");
            ExitCode::from(EXIT_NAVIGATION)
        }
    }
}

async fn run_probe(args: ProbeArgs, verbose: u8) -> Result<ExitCode> {
    let config = match build_config(&args, verbose) {
        Ok(config) => config,
        Err(err) => {
            error!("invalid configuration: {err:#}");
            return Ok(ExitCode::from(EXIT_CONFIG));
        }
    };
    let request = match ProbeRequest::from_config(&config) {
        Ok(request) => request,
        Err(err) => {
            error!("invalid configuration: {err}");
            return Ok(ExitCode::from(EXIT_CONFIG));
        }
    };

    let mut sinks = vec![log_crate_handler()];
    if let Some(path) = &args.log_file {
        let sink = file_log_sink(path)
            .with_context(|| format!("failed to open log file {}", path.display()))?;
        sinks.push(sink);
    }
    let mut logger = ProbeLogger::new(config.verbose);
    logger.set_external_logger(Some(fan_out(sinks)));
    let probe = Probe::from_config(&config, Arc::new(logger));
    let cancel = probe.context().cancellation().clone();
    watch_ctrl_c(cancel);

    info!("probing {} for {}", request.url, config.contest);

    let runtime = ChromiumoxideRuntime::launch(&LaunchOptions::from_config(&config))
        .await
        .context("failed to launch Chromium")?;
    let result = probe.run(runtime, &request).await?;

    if let Some(dir) = &args.report_dir {
        let header = ReportHeader {
            contest: &config.contest,
            url: &request.url,
            selectors: &request.selectors,
            date: Local::now().date_naive(),
        };
        match write_report(dir, &header, &result) {
            Ok(path) => info!("report written to {}", path.display()),
            Err(err) => warn!("failed to write report into {}: {err}", dir.display()),
        }
    }

    if let Some(dir) = &args.csv_dir {
        let now = Local::now().naive_local();
        let row = CsvRow::new(now, &config.contest, &result, &config.profile.email);
        match append_csv_row(dir, now.date(), &row) {
            Ok(path) => info!("CSV row appended to {}", path.display()),
            Err(err) => warn!("failed to append CSV row into {}: {err}", dir.display()),
        }
    }

    let json = serde_json::to_string_pretty(&result).context("failed to serialize result")?;
    println!("{json}");

    if let Err(err) = ensure_navigated(&result) {
        error!("{err}");
        return Ok(ExitCode::from(EXIT_NAVIGATION));
    }
    if result.state == Some(PageState::Missing) {
        return Ok(ExitCode::from(EXIT_MISSING));
    }
    Ok(ExitCode::SUCCESS)
}

fn build_config(args: &ProbeArgs, verbose: u8) -> Result<ProbeConfig> {
    let _ = dotenvy::dotenv();

    let mut config = ProbeConfig::from_yaml_files(&args.selectors, args.profile.as_deref())?;
    config
        .apply_env()
        .context("failed to read FORMPROBE_* environment")?;

    if let Some(url) = &args.url {
        config.url = Some(url.clone());
    }
    if args.show_browser {
        config.headless = false;
    }
    if let Some(dir) = &args.artifact_dir {
        config.artifact_dir = dir.clone();
    }
    if let Some(delays) = &args.retry_delays {
        config.retry_policy = parse_retry_delays("--retry-delays", delays)?;
    }
    if verbose > 0 {
        config.verbose = verbosity_from_count(verbose);
    }

    Ok(config)
}

fn watch_ctrl_c(cancel: CancellationToken) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupt received, cancelling probe");
            cancel.cancel();
        }
    });
}

fn verbosity_from_count(count: u8) -> Verbosity {
    match count {
        0 => Verbosity::Medium,
        _ => Verbosity::Detailed,
    }
}

/// Default `RUST_LOG` filter; `-v` raises this crate's records to debug.
fn default_log_filter(verbose: u8) -> &'static str {
    if verbose > 0 {
        "info,formprobe=debug"
    } else {
        "info"
    }
}

fn init_env_logger(verbose: u8) {
    if env::var("RUST_LOG").is_err() {
        unsafe {
            env::set_var("RUST_LOG", default_log_filter(verbose));
        }
    }

    let _ = env_logger::Builder::from_env(env_logger::Env::default())
        .format_timestamp_secs()
        .try_init();
}
