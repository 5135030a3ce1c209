//! ETF Auto-Buyer - Main Entry Point

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use etf_autobuy::broker::{BrokerProvider, DegiroClient};
use etf_autobuy::buyer::{AutoBuyer, RunMode, RunReport};
use etf_autobuy::config::{
    config_directory, Config, LOG_FILE, PASSWORD_ENV, SESSION_FILE, USERNAME_ENV,
};
use etf_autobuy::scheduler;
use etf_autobuy::utils::round_to_precision;
use rust_decimal_macros::dec;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{error, info, Level};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::EnvFilter;

/// ETF Auto-Buyer CLI
#[derive(Parser)]
#[command(name = "etf-autobuy")]
#[command(version, about = "Scheduled ETF buying toward target ratios on DEGIRO")]
struct Cli {
    /// Directory with the config file, session file and logs
    #[arg(long, global = true)]
    config_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Wait for the schedule and buy on every trigger (default)
    Run {
        /// Also buy immediately at startup
        #[arg(long)]
        buy_on_launch: bool,
    },

    /// Buy once and exit
    Once {
        /// Let the broker check the orders without executing them
        #[arg(long)]
        dry_run: bool,
    },

    /// Show what would be bought without placing any order
    Plan,

    /// Show cash and owned positions
    Positions,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    dotenvy::dotenv().ok();

    let config_dir = config_directory(cli.config_dir);
    std::fs::create_dir_all(&config_dir)
        .with_context(|| format!("Failed to create {}", config_dir.display()))?;

    let _log_guard = init_logging(&config_dir)?;

    info!("ETF auto-buyer starting");
    let config = Config::load(&config_dir)?;
    config.validate()?;
    log_config(&config, &config_dir);

    anyhow::ensure!(
        config.has_credentials(),
        "No broker credentials, set {USERNAME_ENV} and {PASSWORD_ENV}"
    );
    let client = Arc::new(DegiroClient::new(
        &config.credentials,
        Some(config_dir.join(SESSION_FILE)),
    )?);

    match cli.command.unwrap_or(Commands::Run {
        buy_on_launch: false,
    }) {
        Commands::Run { buy_on_launch } => run_scheduler(client, config, buy_on_launch).await,
        Commands::Once { dry_run } => {
            let mode = RunMode::from_dry_run(dry_run || config.execution.dry_run);
            run_once(client, config, mode).await
        }
        Commands::Plan => run_once(client, config, RunMode::PlanOnly).await,
        Commands::Positions => show_positions(client.as_ref(), &config).await,
    }
}

/// Buy on every scheduled trigger until Ctrl-C.
async fn run_scheduler(client: Arc<DegiroClient>, config: Config, buy_on_launch: bool) -> Result<()> {
    let schedule = scheduler::parse_schedule(&config.schedule.cron)?;
    let buy_on_launch = buy_on_launch || config.schedule.buy_on_launch;
    let mode = RunMode::from_dry_run(config.execution.dry_run);

    // Shutdown signal
    let shutdown = Arc::new(AtomicBool::new(false));
    let shutdown_clone = shutdown.clone();
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        info!("Shutdown signal received");
        shutdown_clone.store(true, Ordering::SeqCst);
    });

    info!(
        schedule = %config.schedule.cron,
        buy_on_launch,
        ?mode,
        "Scheduler started"
    );

    let buyer = Arc::new(AutoBuyer::new(client, config));
    scheduler::run_scheduled(schedule, buy_on_launch, shutdown, move || {
        let buyer = buyer.clone();
        async move { buyer.run(mode).await.map(|_| ()) }
    })
    .await?;

    info!("ETF auto-buyer shutdown complete");
    Ok(())
}

/// Run a single buy cycle.
async fn run_once(client: Arc<DegiroClient>, config: Config, mode: RunMode) -> Result<()> {
    let buyer = AutoBuyer::new(client, config);

    match buyer.run(mode).await {
        Ok(report) => {
            print_report(&report);
            Ok(())
        }
        Err(e) if e.is_benign() => {
            info!(outcome = %e, "Nothing to buy");
            Ok(())
        }
        Err(e) => {
            error!(error = %e, "Buy run failed");
            Err(e.into())
        }
    }
}

/// Print cash and held positions.
async fn show_positions(client: &DegiroClient, config: &Config) -> Result<()> {
    let currency = &config.investment.cash_currency;
    client.login().await?;
    let cash = client.cash_funds(currency).await?;
    let positions = client.owned_positions().await?;

    println!("\nAccount");
    println!("   └─ Cash:  {:.2} {}", cash, currency);

    if positions.is_empty() {
        println!("\nNo positions held.");
    } else {
        println!("\nPositions");
        for p in &positions {
            println!("   ┌─ {} ({})", p.symbol, p.isin);
            println!("   ├─ Units: {}", p.size);
            println!("   └─ Value: {:.2}", p.value);
        }
    }

    println!();
    Ok(())
}

fn print_report(report: &RunReport) {
    println!("\nRun {:?} at {}", report.mode, report.started_at.format("%Y-%m-%d %H:%M:%S UTC"));
    println!("   ├─ Cash:        {:.2}", report.cash);
    println!("   ├─ Investable:  {:.2}", report.investable_cash);
    println!("   ├─ Cost:        {:.2} (fees {:.2})", report.plan.cost, report.plan.fees);
    println!("   └─ Leftover:    {:.2}", report.plan.leftover);

    println!("\nPurchases");
    for c in &report.plan.orders {
        println!(
            "   ├─ {:<8} {:>5} x {:.2}  ratio {}%",
            c.symbol,
            c.quantity,
            c.price,
            round_to_precision(c.achieved_ratio * dec!(100), 2)
        );
    }
    for placed in &report.placed {
        println!("   ├─ {} -> {}", placed.order, placed.confirmation);
    }
    for failed in &report.failed {
        println!("   ├─ FAILED {}", failed);
    }
    println!();
}

/// Initialize logging to stdout and a daily log file in the config directory.
fn init_logging(config_dir: &Path) -> Result<WorkerGuard> {
    use tracing_subscriber::fmt::writer::MakeWriterExt;

    let file_appender = tracing_appender::rolling::daily(config_dir, LOG_FILE);
    let (file_writer, guard) = tracing_appender::non_blocking(file_appender);

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env()
                .add_directive("etf_autobuy=debug".parse()?)
                .add_directive(Level::INFO.into()),
        )
        .with_writer(std::io::stdout.and(file_writer))
        .with_target(true)
        .with_thread_ids(false)
        .with_file(true)
        .with_line_number(true)
        .with_span_events(FmtSpan::CLOSE)
        .with_ansi(false)
        .init();

    Ok(guard)
}

/// Log configuration on startup.
fn log_config(config: &Config, config_dir: &Path) {
    let investment = &config.investment;
    let execution = &config.execution;

    info!("Configuration:");
    info!("   Config directory: {}", config_dir.display());
    info!("   Username: {}", config.credentials.username);
    info!(
        "   Two-factor login: {}",
        if config.credentials.totp_seed.is_some() { "yes" } else { "no" }
    );
    info!(
        "   Cash to invest: {} - {} {}",
        investment.min_cash_invest, investment.max_cash_invest, investment.cash_currency
    );
    match investment.max_fee_percentage {
        Some(max_fee) => info!("   Max fee: {}% of order value", max_fee),
        None => info!("   Max fee: unlimited"),
    }
    info!(
        "   Orders: {}, price buffer {}, open orders {}",
        if execution.use_limit_order { "limit" } else { "market" },
        execution.price_buffer,
        if execution.allow_open_orders { "allowed" } else { "blocking" }
    );
    info!("   Dry run: {}", execution.dry_run);
    info!("   Schedule: {}", config.schedule.cron);
    for t in &config.portfolio {
        info!(
            "   Target {} ({}) on exchange {}: ratio {}{}",
            t.symbol,
            t.isin,
            t.exchange,
            t.ratio,
            if t.core_only { ", core selection only" } else { "" }
        );
    }
}
