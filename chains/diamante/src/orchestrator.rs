//! Owns the engine set, the shared handles and the referral job.

use anyhow::{Context, Result};
use core_logic::{
    read_lines, ActivityMetrics, ProxyManager, ProxyPool, Worker, WorkerRunner,
};
use serde::Serialize;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{info, info_span, warn};

use crate::config::DailyConfig;
use crate::engine::{AccountEngine, AccountSnapshot, AccountStatus, EngineContext};
use crate::recipients::{checksum_address, RecipientPool};
use crate::referral::ReferralJob;
use crate::store::IdentityStore;
use crate::transport::Transport;

const DRAIN_POLL: Duration = Duration::from_millis(100);

/// File layout of a working directory.
#[derive(Debug, Clone)]
pub struct DataFiles {
    root: PathBuf,
}

impl DataFiles {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn users(&self) -> PathBuf {
        self.root.join("user.txt")
    }

    pub fn wallets(&self) -> PathBuf {
        self.root.join("wallet.txt")
    }

    pub fn proxies(&self) -> PathBuf {
        self.root.join("proxy.txt")
    }

    pub fn config(&self) -> PathBuf {
        self.root.join("config.json")
    }

    pub fn account_data(&self) -> PathBuf {
        self.root.join("account_data.json")
    }

    pub fn referrals(&self) -> PathBuf {
        self.root.join("referrals.txt")
    }

    pub fn crash_log(&self) -> PathBuf {
        self.root.join("crash_log.txt")
    }

    pub fn logs(&self) -> PathBuf {
        self.root.join("logs")
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OrchestratorStatus {
    pub total: usize,
    pub active: usize,
    pub sleeping: usize,
    pub errors: usize,
    pub proxies: usize,
    pub success_transfers: u64,
    pub referrals_created: u64,
    pub referral_running: bool,
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|p| p.into_inner())
}

/// Checksummed form of `raw`, or `None` when it is not an address.
pub struct Orchestrator {
    engines: Vec<Arc<AccountEngine>>,
    config: RwLock<Arc<DailyConfig>>,
    files: DataFiles,
    store: Arc<IdentityStore>,
    proxies: ProxyPool,
    transport: Arc<dyn Transport>,
    metrics: Arc<ActivityMetrics>,
    runner: tokio::sync::Mutex<WorkerRunner>,
    shutdown: CancellationToken,
    engines_token: Mutex<Option<CancellationToken>>,
    referral_token: Mutex<Option<CancellationToken>>,
    referral_running: Arc<AtomicBool>,
}

impl Orchestrator {
    /// Reads every input under `files` and builds one engine per seed address.
    pub async fn load(files: DataFiles, transport: Arc<dyn Transport>) -> Result<Self> {
        let config = DailyConfig::load_or_create(files.config())?;
        let seeds = read_lines(files.users()).context("user.txt with seed addresses is required")?;
        let recipients = RecipientPool::load(files.wallets())?;
        let proxies = ProxyPool::new(ProxyManager::load_proxies(files.proxies())?);
        let store = Arc::new(IdentityStore::load(files.account_data()).await);

        Ok(Self::new(seeds, config, files, recipients, proxies, store, transport))
    }

    pub fn new(
        seeds: Vec<String>,
        config: DailyConfig,
        files: DataFiles,
        recipients: RecipientPool,
        proxies: ProxyPool,
        store: Arc<IdentityStore>,
        transport: Arc<dyn Transport>,
    ) -> Self {
        let config = Arc::new(config);
        let metrics = Arc::new(ActivityMetrics::default());
        let ctx = EngineContext {
            store: Arc::clone(&store),
            recipients,
            transport: Arc::clone(&transport),
            metrics: Arc::clone(&metrics),
        };

        let mut seen = HashSet::new();
        let mut engines = Vec::new();
        for seed in seeds {
            let Some(address) = checksum_address(&seed) else {
                warn!("Skipping invalid address: {}", seed);
                continue;
            };
            if !seen.insert(address.to_lowercase()) {
                warn!("Skipping duplicate address: {}", address);
                continue;
            }
            let index = engines.len();
            let proxy = proxies.assign(index);
            engines.push(Arc::new(AccountEngine::new(
                index + 1,
                address,
                proxy,
                Arc::clone(&config),
                &ctx,
            )));
        }
        info!(
            "Loaded {} accounts | {} proxies | {} recipients",
            engines.len(),
            proxies.len(),
            ctx.recipients.len()
        );

        Self {
            engines,
            config: RwLock::new(config),
            files,
            store,
            proxies,
            transport,
            metrics,
            runner: tokio::sync::Mutex::new(WorkerRunner::new()),
            shutdown: CancellationToken::new(),
            engines_token: Mutex::new(None),
            referral_token: Mutex::new(None),
            referral_running: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn engines(&self) -> &[Arc<AccountEngine>] {
        &self.engines
    }

    pub fn engine(&self, address: &str) -> Option<&Arc<AccountEngine>> {
        self.engines
            .iter()
            .find(|e| e.address().eq_ignore_ascii_case(address))
    }

    pub fn store(&self) -> &Arc<IdentityStore> {
        &self.store
    }

    pub fn metrics(&self) -> &Arc<ActivityMetrics> {
        &self.metrics
    }

    /// Root token; cancelling it stops everything.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    pub fn config(&self) -> Arc<DailyConfig> {
        let guard = self.config.read().unwrap_or_else(|p| p.into_inner());
        Arc::clone(&guard)
    }

    /// Saves `config` and makes it current. Running engines pick it up on
    /// their next start.
    pub fn update_config(&self, config: DailyConfig) -> Result<()> {
        config.save(self.files.config())?;
        let config = Arc::new(config);
        *self.config.write().unwrap_or_else(|p| p.into_inner()) = Arc::clone(&config);
        info!("Config saved to {}", self.files.config().display());
        Ok(())
    }

    /// Starts every engine that is not already running.
    ///
    /// Engines still draining after [`Self::stop_all`] are awaited and then
    /// started again.
    pub async fn start_all(&self) {
        for engine in &self.engines {
            while engine.is_running() && !engine.is_active() {
                tokio::time::sleep(DRAIN_POLL).await;
            }
        }

        let mut runner = self.runner.lock().await;
        runner.reap_finished();

        let token = {
            let mut current = lock(&self.engines_token);
            match current.as_ref() {
                Some(t) if !t.is_cancelled() => t.clone(),
                _ => {
                    let fresh = self.shutdown.child_token();
                    *current = Some(fresh.clone());
                    fresh
                }
            }
        };

        let config = self.config();
        let mut started = 0;
        for engine in &self.engines {
            if engine.is_running() {
                continue;
            }
            engine.set_config(Arc::clone(&config));
            let span = info_span!("account", id = engine.id());
            runner.spawn(Arc::clone(engine) as Arc<dyn Worker>, token.child_token(), span);
            started += 1;
        }
        info!("Started {} engines", started);
    }

    pub fn stop_all(&self) {
        if let Some(token) = lock(&self.engines_token).take() {
            token.cancel();
            info!("Stopping all engines...");
        }
    }

    pub fn is_running(&self) -> bool {
        lock(&self.engines_token)
            .as_ref()
            .is_some_and(|t| !t.is_cancelled())
    }

    pub fn referral_running(&self) -> bool {
        self.referral_running.load(Ordering::SeqCst)
    }

    /// Saves the referral code/count and starts the background job.
    ///
    /// Returns `false` when a job is already running.
    pub async fn start_referral(&self, code: Option<String>, count: Option<u32>) -> Result<bool> {
        if self.referral_running() {
            warn!("Referral job already running");
            return Ok(false);
        }

        let mut config = (*self.config()).clone();
        if let Some(code) = code {
            config.referral_code = code;
        }
        if let Some(count) = count {
            config.referral_count = count;
        }
        self.update_config(config.clone())?;

        if config.referral_code.is_empty() {
            warn!("Referral code is empty, registrations will carry no code");
        }

        let job = Arc::new(ReferralJob::new(
            config.referral_code.clone(),
            config.referral_count,
            &config,
            self.proxies.clone(),
            Arc::clone(&self.transport),
            self.files.referrals(),
            Arc::clone(&self.metrics),
            Arc::clone(&self.referral_running),
        ));

        let token = self.shutdown.child_token();
        *lock(&self.referral_token) = Some(token.clone());
        self.referral_running.store(true, Ordering::SeqCst);

        let mut runner = self.runner.lock().await;
        runner.reap_finished();
        runner.spawn(job, token, info_span!("referral"));
        Ok(true)
    }

    pub fn stop_referral(&self) {
        if let Some(token) = lock(&self.referral_token).take() {
            token.cancel();
            info!("Stopping referral job...");
        }
    }

    pub fn snapshots(&self) -> Vec<AccountSnapshot> {
        self.engines.iter().map(|e| e.snapshot()).collect()
    }

    pub fn status(&self) -> OrchestratorStatus {
        let mut status = OrchestratorStatus {
            total: self.engines.len(),
            proxies: self.proxies.len(),
            success_transfers: self.metrics.successful_transfers(),
            referrals_created: self.metrics.referrals_created(),
            referral_running: self.referral_running(),
            ..Default::default()
        };
        for snapshot in self.snapshots() {
            match snapshot.status {
                AccountStatus::LoggingIn | AccountStatus::Processing | AccountStatus::Waiting => {
                    status.active += 1
                }
                AccountStatus::WaitingCycle => status.sleeping += 1,
                AccountStatus::Error | AccountStatus::Blocked | AccountStatus::NotRegistered => {
                    status.errors += 1
                }
                AccountStatus::Idle | AccountStatus::Stopped => {}
            }
        }
        status
    }

    /// Cancels everything and waits for all workers to exit.
    pub async fn shutdown(&self) {
        self.shutdown.cancel();
        lock(&self.engines_token).take();
        lock(&self.referral_token).take();
        self.runner.lock().await.join_all().await;
    }
}
