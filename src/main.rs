use anyhow::{Context, Result};
use clap::Parser;
use proxyip::proxy::{checker, CheckerConfig, ProxyChecker, ProxyParser};
use std::path::PathBuf;
use std::time::{Duration, Instant};
use tracing::info;

/// Check which proxies actually forward traffic to a TLS reference service
#[derive(Parser)]
#[command(name = "proxyip")]
#[command(about = "Check which proxies actually forward traffic to a TLS reference service")]
struct Cli {
    /// Input file containing candidate proxies
    #[arg(default_value = "./rawProxyList.txt")]
    input: PathBuf,

    /// Output file for live proxies
    #[arg(short, long, default_value = "./proxyList.txt")]
    live_output: PathBuf,

    /// Output file for deduplicated candidates (defaults to rewriting INPUT)
    #[arg(short, long)]
    unique_output: Option<PathBuf>,

    /// Optional JSON report with details for every live proxy
    #[arg(short, long)]
    report: Option<PathBuf>,

    /// Maximum number of proxies checked at once
    #[arg(
        short = 'n',
        long,
        default_value_t = checker::DEFAULT_CONCURRENCY,
        value_parser = clap::builder::RangedU64ValueParser::<usize>::new().range(1..)
    )]
    concurrency: usize,

    /// Timeout for each probe in milliseconds
    #[arg(long, default_value_t = checker::DEFAULT_TIMEOUT_MS)]
    timeout_ms: u64,

    /// Reference service host (also used as TLS server name)
    #[arg(long, default_value = checker::DEFAULT_RESOLVER_HOST)]
    resolver_host: String,

    /// Reference service path
    #[arg(long, default_value = checker::DEFAULT_RESOLVER_PATH)]
    resolver_path: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let started = Instant::now();

    let candidates = ProxyParser::parse_file(&cli.input)
        .with_context(|| format!("failed to read candidates from {:?}", cli.input))?;
    info!(count = candidates.len(), input = ?cli.input, "loaded candidates");

    let config = CheckerConfig::new()
        .with_concurrency(cli.concurrency)
        .with_timeout(Duration::from_millis(cli.timeout_ms))
        .with_resolver_host(cli.resolver_host)
        .with_resolver_path(cli.resolver_path);
    info!(
        concurrency = config.concurrency,
        timeout_ms = cli.timeout_ms,
        resolver = %config.resolver_host,
        "checking proxies"
    );

    let checker = ProxyChecker::with_config(config).context("failed to build TLS client")?;
    let report = checker.run(candidates).await;

    let unique_path = cli.unique_output.unwrap_or(cli.input);
    ProxyParser::save_lines(&report.unique, &unique_path)
        .with_context(|| format!("failed to write {:?}", unique_path))?;
    ProxyParser::save_lines(&report.live, &cli.live_output)
        .with_context(|| format!("failed to write {:?}", cli.live_output))?;

    if let Some(report_path) = cli.report {
        let json = serde_json::to_string_pretty(&report.live_details)?;
        std::fs::write(&report_path, json)
            .with_context(|| format!("failed to write {:?}", report_path))?;
        println!("Saved live proxy details to {:?}", report_path);
    }

    println!(
        "Results: {} unique, {} live, {} dead, {} failed",
        report.stats.unique, report.stats.saved, report.stats.dead, report.stats.failed
    );
    println!("Saved {} unique proxies to {:?}", report.unique.len(), unique_path);
    println!("Saved {} live proxies to {:?}", report.live.len(), cli.live_output);
    println!(
        "Processing time: {:.2} seconds",
        started.elapsed().as_secs_f64()
    );

    Ok(())
}
