use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use core_logic::{
    install_crash_handler, listen_for_shutdown, read_lines_optional, record_crash, setup_logger,
    ProxyManager, ProxyPool,
};
use diamante::{
    CommandTransport, DailyConfig, DataFiles, HttpTransport, IdentityStore, Orchestrator,
    RecipientPool, Transport,
};
use dialoguer::{theme::ColorfulTheme, Input};
use dotenv::dotenv;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::time::{interval, Duration, MissedTickBehavior};
use tracing::{error, info};

#[derive(Parser, Debug)]
#[command(author, version, about = "Diamante testnet campaign bot", long_about = None)]
struct Cli {
    /// Directory holding user.txt, wallet.txt, proxy.txt and config.json
    #[arg(short, long, default_value = ".")]
    dir: PathBuf,
    /// Route requests through the TLS-impersonating helper script
    #[arg(long)]
    helper: Option<PathBuf>,
    #[arg(long, default_value = "python3")]
    python: String,
    /// Seconds between status lines
    #[arg(long, default_value = "60")]
    status_interval: u64,
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run every account (default)
    Run {
        /// Also start the referral job
        #[arg(long)]
        referral: bool,
    },
    /// Only run the referral job
    Referral {
        #[arg(long)]
        code: Option<String>,
        #[arg(long)]
        count: Option<u32>,
    },
    /// Edit config.json interactively
    Configure,
    /// Show loaded accounts and stored device ids
    Status,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv().ok();
    let cli = Cli::parse();
    let files = DataFiles::new(&cli.dir);

    // Keep guard alive for file logging
    let _log_guard = setup_logger(files.logs());
    install_crash_handler(files.crash_log());

    if let Err(e) = dispatch(cli, &files).await {
        error!("Fatal: {:#}", e);
        record_crash(files.crash_log(), &format!("{:#}", e));
        std::process::exit(1);
    }
    Ok(())
}

fn build_transport(cli: &Cli) -> Arc<dyn Transport> {
    match &cli.helper {
        Some(script) => {
            info!("Using helper transport: {} {}", cli.python, script.display());
            Arc::new(CommandTransport::new(cli.python.clone(), script.clone()))
        }
        None => Arc::new(HttpTransport::new()),
    }
}

async fn dispatch(cli: Cli, files: &DataFiles) -> Result<()> {
    let transport = build_transport(&cli);
    let status_every = Duration::from_secs(cli.status_interval.max(1));

    match cli.command.unwrap_or(Command::Run { referral: false }) {
        Command::Run { referral } => {
            let orchestrator = Orchestrator::load(files.clone(), transport).await?;
            orchestrator.start_all().await;
            if referral {
                orchestrator.start_referral(None, None).await?;
            }
            supervise(&orchestrator, status_every, false).await;
        }
        Command::Referral { code, count } => {
            let config = DailyConfig::load_or_create(files.config())?;
            let proxies = ProxyPool::new(ProxyManager::load_proxies(files.proxies())?);
            let store = Arc::new(IdentityStore::load(files.account_data()).await);
            let orchestrator = Orchestrator::new(
                Vec::new(),
                config,
                files.clone(),
                RecipientPool::default(),
                proxies,
                store,
                transport,
            );
            orchestrator.start_referral(code, count).await?;
            supervise(&orchestrator, status_every, true).await;
        }
        Command::Configure => configure(files)?,
        Command::Status => print_status(files).await?,
    }
    Ok(())
}

/// Logs a status line periodically until Ctrl+C, or until the referral job
/// ends when `until_referral_done` is set.
async fn supervise(orchestrator: &Orchestrator, every: Duration, until_referral_done: bool) {
    let token = orchestrator.shutdown_token();
    let _signal = listen_for_shutdown(token.clone());

    let mut ticker = interval(every);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        tokio::select! {
            _ = token.cancelled() => break,
            _ = ticker.tick() => {
                let s = orchestrator.status();
                info!(
                    "Accounts: {} | Active: {} | Wait: {} | Errors: {} | Proxies: {} | Tx OK: {} | Reffs: {} | Gen: {}",
                    s.total,
                    s.active,
                    s.sleeping,
                    s.errors,
                    s.proxies,
                    s.success_transfers,
                    s.referrals_created,
                    if s.referral_running { "RUNNING" } else { "IDLE" }
                );
                if until_referral_done && !s.referral_running {
                    break;
                }
            }
        }
    }

    orchestrator.shutdown().await;
    info!("Final metrics: {}", orchestrator.metrics().export_json());
}

fn configure(files: &DataFiles) -> Result<()> {
    let path = files.config();
    let mut config = DailyConfig::load_or_create(&path)?;
    let theme = ColorfulTheme::default();

    config.send_diam_repetitions = Input::with_theme(&theme)
        .with_prompt("Transfers per cycle")
        .default(config.send_diam_repetitions)
        .interact_text()
        .context("Prompt failed")?;
    config.min_send_amount = Input::with_theme(&theme)
        .with_prompt("Min send amount")
        .default(config.min_send_amount)
        .interact_text()
        .context("Prompt failed")?;
    config.max_send_amount = Input::with_theme(&theme)
        .with_prompt("Max send amount")
        .default(config.max_send_amount)
        .interact_text()
        .context("Prompt failed")?;
    config.referral_code = Input::with_theme(&theme)
        .with_prompt("Referral code")
        .default(config.referral_code.clone())
        .allow_empty(true)
        .interact_text()
        .context("Prompt failed")?;
    config.referral_count = Input::with_theme(&theme)
        .with_prompt("Referrals to create")
        .default(config.referral_count)
        .interact_text()
        .context("Prompt failed")?;

    config.save(&path)?;
    info!("Config saved to {}", path.display());
    Ok(())
}

async fn print_status(files: &DataFiles) -> Result<()> {
    let seeds = read_lines_optional(files.users())?;
    let store = IdentityStore::load(files.account_data()).await;
    let records = store.snapshot().await;

    println!("{:<4} {:<44} {:<12} {}", "#", "Address", "Device", "Last Claim");
    for (i, seed) in seeds.iter().enumerate() {
        let record = records.get(&seed.to_lowercase());
        let device = record.map(|r| r.device_id.as_str()).unwrap_or("-");
        let claimed = record
            .filter(|r| r.last_claim_time > 0)
            .and_then(|r| chrono::DateTime::from_timestamp_millis(r.last_claim_time))
            .map(|t| t.to_rfc3339())
            .unwrap_or_else(|| "never".to_string());
        println!("{:<4} {:<44} {:<12} {}", i + 1, seed, device, claimed);
    }
    Ok(())
}
