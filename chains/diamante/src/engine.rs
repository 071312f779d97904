//! Per-account state machine.
//!
//! One [`AccountEngine`] per seed address. After a startup delay it logs in
//! until that succeeds, then alternates between a daily cycle (re-login,
//! balance, faucet, transfers) and a countdown to the next one. Every pause
//! is a cancellation checkpoint; cancelling the engine's token is the only
//! way to reach [`AccountStatus::Stopped`].

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use chrono::Utc;
use core_logic::{
    random_duration, sleep_or_cancel, with_retry, ActivityMetrics, ProxyConfig, RetryConfig,
    Worker,
};
use serde::Serialize;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::api::{DiamanteApi, LoginOutcome, Session};
use crate::classifier::{display_message, ErrorKind};
use crate::config::DailyConfig;
use crate::recipients::RecipientPool;
use crate::scheduler::{format_remaining, Countdown, CountdownKind, CycleScheduler};
use crate::store::IdentityStore;
use crate::transport::Transport;

pub const MAX_TX_ATTEMPTS: u32 = 5;

const STARTUP_DELAY_MAX: Duration = Duration::from_secs(10);
const RETRY_LOGIN_DELAY: Duration = Duration::from_secs(10 * 60);
const NO_PROGRESS_RETRY_DELAY: Duration = Duration::from_secs(60 * 60);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum AccountStatus {
    Idle,
    LoggingIn,
    Processing,
    Waiting,
    WaitingCycle,
    Blocked,
    NotRegistered,
    Stopped,
    Error,
}

impl fmt::Display for AccountStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            AccountStatus::Idle => "Idle",
            AccountStatus::LoggingIn => "Logging In",
            AccountStatus::Processing => "Processing",
            AccountStatus::Waiting => "Waiting",
            AccountStatus::WaitingCycle => "Waiting Cycle",
            AccountStatus::Blocked => "403 Blocked",
            AccountStatus::NotRegistered => "Not Registered",
            AccountStatus::Stopped => "Stopped",
            AccountStatus::Error => "Error",
        };
        write!(f, "{}", s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoginResult {
    Success,
    Blocked,
    NotRegistered,
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferResult {
    Sent,
    /// Balance ran out; the cycle must stop
    Insufficient,
    Exhausted,
    Cancelled,
}

/// Point-in-time view of one engine for status reporting.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AccountSnapshot {
    pub id: usize,
    pub address: String,
    pub proxy: Option<String>,
    pub status: AccountStatus,
    pub balance: f64,
    pub tx_count: u32,
    pub faucet_claimed: bool,
    pub last_claim_time: i64,
    pub device_id: Option<String>,
    pub cycle_jitter_secs: Option<u64>,
    pub next_action: String,
    pub logged_in: bool,
    pub running: bool,
}

/// Handles shared by every engine.
#[derive(Clone)]
pub struct EngineContext {
    pub store: Arc<IdentityStore>,
    pub recipients: RecipientPool,
    pub transport: Arc<dyn Transport>,
    pub metrics: Arc<ActivityMetrics>,
}

#[derive(Debug)]
struct EngineState {
    status: AccountStatus,
    balance: f64,
    tx_count: u32,
    faucet_claimed: bool,
    last_claim_time: i64,
    cycle_started_ms: i64,
    device_id: Option<String>,
    session: Option<Session>,
    next_action: String,
    scheduler: CycleScheduler,
}

pub struct AccountEngine {
    id: usize,
    address: String,
    proxy: Option<ProxyConfig>,
    api: DiamanteApi,
    store: Arc<IdentityStore>,
    recipients: RecipientPool,
    metrics: Arc<ActivityMetrics>,
    config: Mutex<Arc<DailyConfig>>,
    state: Mutex<EngineState>,
    token: Mutex<CancellationToken>,
    running: AtomicBool,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn short_address(address: &str) -> String {
    let chars: Vec<char> = address.chars().collect();
    if chars.len() <= 10 {
        return address.to_string();
    }
    let head: String = chars[..6].iter().collect();
    let tail: String = chars[chars.len() - 4..].iter().collect();
    format!("{}...{}", head, tail)
}

impl AccountEngine {
    pub fn new(
        id: usize,
        address: impl Into<String>,
        proxy: Option<ProxyConfig>,
        config: Arc<DailyConfig>,
        ctx: &EngineContext,
    ) -> Self {
        let scheduler = CycleScheduler::from_config(&config);
        Self {
            id,
            address: address.into(),
            api: DiamanteApi::new(Arc::clone(&ctx.transport), proxy.as_ref()),
            proxy,
            store: Arc::clone(&ctx.store),
            recipients: ctx.recipients.clone(),
            metrics: Arc::clone(&ctx.metrics),
            config: Mutex::new(config),
            state: Mutex::new(EngineState {
                status: AccountStatus::Idle,
                balance: 0.0,
                tx_count: 0,
                faucet_claimed: false,
                last_claim_time: 0,
                cycle_started_ms: 0,
                device_id: None,
                session: None,
                next_action: "Waiting to start".to_string(),
                scheduler,
            }),
            token: Mutex::new(CancellationToken::new()),
            running: AtomicBool::new(false),
        }
    }

    pub fn id(&self) -> usize {
        self.id
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    pub fn proxy(&self) -> Option<&ProxyConfig> {
        self.proxy.as_ref()
    }

    /// Binds the engine to `token`. Every checkpoint observes it from now on.
    pub fn activate(&self, token: CancellationToken) {
        *lock(&self.token) = token;
    }

    fn token(&self) -> CancellationToken {
        lock(&self.token).clone()
    }

    pub fn is_active(&self) -> bool {
        !lock(&self.token).is_cancelled()
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Replaces the config used from the next cycle on.
    pub fn set_config(&self, config: Arc<DailyConfig>) {
        lock(&self.state).scheduler.reconfigure(&config);
        *lock(&self.config) = config;
    }

    fn config(&self) -> Arc<DailyConfig> {
        Arc::clone(&lock(&self.config))
    }

    fn set_status(&self, status: AccountStatus) {
        lock(&self.state).status = status;
    }

    fn set_next_action(&self, text: String) {
        lock(&self.state).next_action = text;
    }

    fn session(&self) -> Option<Session> {
        lock(&self.state).session.clone()
    }

    pub fn balance(&self) -> f64 {
        lock(&self.state).balance
    }

    pub fn tx_count(&self) -> u32 {
        lock(&self.state).tx_count
    }

    pub fn faucet_claimed(&self) -> bool {
        lock(&self.state).faucet_claimed
    }

    pub fn last_claim_time(&self) -> i64 {
        lock(&self.state).last_claim_time
    }

    pub fn device_id(&self) -> Option<String> {
        lock(&self.state).device_id.clone()
    }

    pub fn cycle_jitter(&self) -> Option<Duration> {
        lock(&self.state).scheduler.jitter()
    }

    pub fn snapshot(&self) -> AccountSnapshot {
        let state = lock(&self.state);
        AccountSnapshot {
            id: self.id,
            address: self.address.clone(),
            proxy: self.proxy.as_ref().map(ToString::to_string),
            status: state.status,
            balance: state.balance,
            tx_count: state.tx_count,
            faucet_claimed: state.faucet_claimed,
            last_claim_time: state.last_claim_time,
            device_id: state.device_id.clone(),
            cycle_jitter_secs: state.scheduler.jitter().map(|j| j.as_secs()),
            next_action: state.next_action.clone(),
            logged_in: state.session.is_some(),
            running: self.is_running(),
        }
    }

    /// Random wait in `[min, max]` seconds. `false` if cancelled.
    pub async fn pause(&self, min_secs: u64, max_secs: u64, reason: &str) -> bool {
        let token = self.token();
        if token.is_cancelled() {
            return false;
        }
        let delay = random_duration(Duration::from_secs(min_secs), Duration::from_secs(max_secs));
        debug!("Wait {}s ({})...", delay.as_secs(), reason);
        self.set_next_action(format!("Wait: {}s ({})", delay.as_secs(), reason));
        let completed = sleep_or_cancel(&token, delay).await;
        self.set_next_action("Working".to_string());
        completed
    }

    /// Authenticates with the stored device id, creating it on first use.
    pub async fn login(&self) -> LoginResult {
        if !self.is_active() {
            return LoginResult::Failed;
        }
        self.set_status(AccountStatus::LoggingIn);
        info!("Logging in...");

        let record = self.store.get_or_create(&self.address).await;
        {
            let mut state = lock(&self.state);
            state.device_id = Some(record.device_id.clone());
            if state.last_claim_time == 0 {
                state.last_claim_time = record.last_claim_time;
            }
        }

        let outcome = self.api.connect_wallet(&self.address, &record.device_id).await;
        match outcome {
            LoginOutcome::Authenticated {
                session,
                registered: true,
            } => {
                lock(&self.state).session = Some(session);
                self.metrics.record_login(true);
                self.set_status(AccountStatus::Processing);
                info!("Login Successful");
                LoginResult::Success
            }
            LoginOutcome::Authenticated {
                registered: false, ..
            } => {
                self.metrics.record_login(false);
                self.set_status(AccountStatus::NotRegistered);
                error!("Account not registered!");
                LoginResult::NotRegistered
            }
            LoginOutcome::Blocked => {
                self.metrics.record_login(false);
                self.set_status(AccountStatus::Blocked);
                error!("Login Blocked (403). Cooldown 60s.");
                self.pause(60, 65, "403 Cooldown").await;
                LoginResult::Blocked
            }
            LoginOutcome::NoData(text) => {
                self.metrics.record_login(false);
                self.set_status(AccountStatus::Error);
                error!("Login Failed: {}", text);
                LoginResult::Failed
            }
            LoginOutcome::NoToken => {
                self.metrics.record_login(false);
                self.set_status(AccountStatus::Error);
                error!("No access token found.");
                LoginResult::Failed
            }
        }
    }

    /// Refreshes the cached balance: 3 attempts, 2s apart.
    pub async fn refresh_balance(&self) {
        let Some(session) = self.session() else {
            warn!("Balance check skipped: not logged in");
            return;
        };
        let token = self.token();
        let api = &self.api;
        let session = &session;

        let fetch = with_retry(RetryConfig::fixed(2, 2000), "balance", || async move {
            let outcome = api.balance(session).await;
            match outcome.balance() {
                Some(balance) => Ok(balance),
                None => Err(anyhow!(outcome.message())),
            }
        });

        let result = tokio::select! {
            _ = token.cancelled() => return,
            r = fetch => r,
        };
        match result {
            Ok(balance) => {
                let balance = (balance * 100.0).round() / 100.0;
                lock(&self.state).balance = balance;
                info!("Balance: {:.2} DIAM", balance);
            }
            Err(e) => warn!("Balance check failed: {:#}", e),
        }
    }

    fn mark_claimed(&self, only_if_unset: bool) -> Option<i64> {
        let mut state = lock(&self.state);
        state.faucet_claimed = true;
        let already_set = if only_if_unset {
            state.last_claim_time != 0
        } else {
            state.last_claim_time >= state.cycle_started_ms && state.last_claim_time != 0
        };
        if already_set {
            return None;
        }
        let now = Utc::now().timestamp_millis();
        state.last_claim_time = now;
        Some(now)
    }

    /// One faucet call. `false` if cancelled during a cooldown.
    pub async fn claim_faucet(&self) -> bool {
        let Some(session) = self.session() else {
            warn!("Faucet skipped: not logged in");
            return true;
        };
        debug!("Checking Faucet...");
        let config = self.config();
        let outcome = self.api.fund_wallet(&session).await;

        match config.classifier_rules.classify_outcome(&outcome) {
            ErrorKind::Success => {
                match outcome.funded_amount() {
                    Some(amount) => info!("Faucet: +{} DIAM", amount),
                    None => info!("Faucet: claimed"),
                }
                self.metrics.record_faucet_claim();
                if let Some(ts) = self.mark_claimed(false) {
                    self.store.record_claim(&self.address, ts).await;
                }
                self.refresh_balance().await;
            }
            ErrorKind::AlreadyClaimed => {
                warn!("Faucet already claimed today.");
                if let Some(ts) = self.mark_claimed(true) {
                    self.store.record_claim(&self.address, ts).await;
                }
            }
            ErrorKind::RateLimited => {
                error!("Faucet 403. Cooling down...");
                lock(&self.state).faucet_claimed = false;
                return self.pause(60, 70, "403 Cooldown").await;
            }
            _ => {
                warn!("Faucet: {}", display_message(&outcome.message()));
                lock(&self.state).faucet_claimed = false;
            }
        }
        true
    }

    /// Sends one transfer with up to [`MAX_TX_ATTEMPTS`] attempts.
    ///
    /// A 401 followed by a successful re-login does not use up an attempt.
    pub async fn send_with_retry(&self, recipient: &str, amount: f64) -> TransferResult {
        let config = self.config();
        let mut attempt = 1;

        while attempt <= MAX_TX_ATTEMPTS {
            if !self.is_active() {
                return TransferResult::Cancelled;
            }
            let Some(session) = self.session() else {
                warn!("No session for transfer, giving up on this one");
                self.metrics.record_transfer(false);
                return TransferResult::Exhausted;
            };

            info!("Sending {} DIAM (Attempt {}/{})...", amount, attempt, MAX_TX_ATTEMPTS);
            let outcome = self.api.transfer(&session, recipient, amount).await;

            match config.classifier_rules.classify_outcome(&outcome) {
                ErrorKind::Success => {
                    info!("Sent {} DIAM to {}", amount, short_address(recipient));
                    self.metrics.record_transfer(true);
                    lock(&self.state).tx_count += 1;
                    if !self.pause(8, 8, "Syncing Balance").await {
                        return TransferResult::Sent;
                    }
                    self.refresh_balance().await;
                    return TransferResult::Sent;
                }
                ErrorKind::InsufficientBalance => {
                    error!("Tx Fail: Insufficient Balance. STOPPING.");
                    return TransferResult::Insufficient;
                }
                ErrorKind::AuthExpired => {
                    error!("Token Expired (401). Re-logging...");
                    let relogged = self.login().await == LoginResult::Success;
                    if !self.pause(5, 10, "After Relogin").await {
                        return TransferResult::Cancelled;
                    }
                    if relogged {
                        continue;
                    }
                }
                ErrorKind::RateLimited => {
                    error!("Tx 403. Cooling down.");
                    if !self.pause(60, 70, "403 Cooldown").await {
                        return TransferResult::Cancelled;
                    }
                }
                ErrorKind::TransientSync => {
                    warn!("Tx Fail: {}", display_message(&outcome.message()));
                    if !self.pause(30, 40, "Sync Wait").await {
                        return TransferResult::Cancelled;
                    }
                }
                _ => warn!("Tx Fail: {}", display_message(&outcome.message())),
            }

            if attempt < MAX_TX_ATTEMPTS && !self.pause(15, 25, "Retry Delay").await {
                return TransferResult::Cancelled;
            }
            attempt += 1;
        }

        warn!("Transfer abandoned after {} attempts", MAX_TX_ATTEMPTS);
        self.metrics.record_transfer(false);
        TransferResult::Exhausted
    }

    fn schedule_next_cycle(&self) -> Countdown {
        lock(&self.state).scheduler.next_cycle()
    }

    /// Runs one cycle and returns the countdown to the next, or `None` when
    /// the engine was cancelled along the way.
    pub async fn run_daily_cycle(&self) -> Option<Countdown> {
        if !self.is_active() {
            return None;
        }
        {
            let mut state = lock(&self.state);
            state.session = None;
            state.cycle_started_ms = Utc::now().timestamp_millis();
        }
        warn!("Cycle Start: Refreshing Session (Re-Login)...");

        if self.login().await != LoginResult::Success {
            if !self.is_active() {
                return None;
            }
            error!("Re-Login Failed! Retrying in 10m...");
            return Some(CycleScheduler::fixed(RETRY_LOGIN_DELAY, CountdownKind::RetryLogin));
        }

        self.set_status(AccountStatus::Processing);
        let config = self.config();
        let repetitions = config.send_diam_repetitions;
        {
            let mut state = lock(&self.state);
            if state.tx_count >= repetitions {
                state.tx_count = 0;
                state.faucet_claimed = false;
            }
        }

        if !self.pause(15, 30, "Pre-Balance").await {
            return None;
        }
        self.refresh_balance().await;

        if !self.pause(30, 60, "Pre-Faucet").await || !self.claim_faucet().await {
            return None;
        }

        if self.balance() < config.min_send_amount {
            error!("Insufficient Balance. Waiting for next Cycle.");
            self.set_status(AccountStatus::WaitingCycle);
            return Some(self.schedule_next_cycle());
        }

        let mut sent_this_cycle = 0;
        if self.recipients.is_empty() {
            warn!("No recipients loaded. Skipping Tx.");
        } else {
            if !self.pause(45, 90, "Pre-Tx").await {
                return None;
            }

            let start = self.tx_count();
            for i in start..repetitions {
                if !self.is_active() {
                    return None;
                }
                if i > start && !self.pause(60, 120, "Inter-Tx Delay").await {
                    return None;
                }

                if self.session().is_none() {
                    error!("Token lost mid-process. Re-logging...");
                    self.login().await;
                }

                let Some(recipient) = self.recipients.pick_excluding(&self.address) else {
                    warn!("No recipient other than self. Skipping Tx.");
                    break;
                };
                let amount = config.random_send_amount();

                match self.send_with_retry(recipient, amount).await {
                    TransferResult::Sent => sent_this_cycle += 1,
                    TransferResult::Insufficient => {
                        self.set_status(AccountStatus::WaitingCycle);
                        return Some(self.schedule_next_cycle());
                    }
                    TransferResult::Exhausted => {}
                    TransferResult::Cancelled => return None,
                }
            }
        }

        if !self.is_active() {
            return None;
        }
        self.set_status(AccountStatus::WaitingCycle);
        if self.faucet_claimed() || sent_this_cycle > 0 {
            info!("Daily tasks done. Waiting 24h + Jitter.");
            Some(self.schedule_next_cycle())
        } else {
            warn!("Tasks incomplete. Retrying in 1h.");
            Some(CycleScheduler::fixed(NO_PROGRESS_RETRY_DELAY, CountdownKind::Retry))
        }
    }

    async fn run_loop(&self, token: &CancellationToken) {
        let delay = random_duration(Duration::ZERO, STARTUP_DELAY_MAX);
        self.set_next_action(format!("Start in {:.1}s", delay.as_secs_f64()));
        if !sleep_or_cancel(token, delay).await {
            return;
        }

        loop {
            if self.login().await == LoginResult::Success {
                break;
            }
            if !self.is_active() {
                return;
            }
            warn!("Login failed. Retrying in 2m...");
            if !self.pause(120, 130, "Login Retry").await {
                return;
            }
        }

        while let Some(countdown) = self.run_daily_cycle().await {
            let kind = countdown.kind;
            if kind != CountdownKind::Cycle {
                self.set_status(AccountStatus::Waiting);
            }
            self.set_next_action(format_remaining(kind, countdown.remaining()));
            let expired = countdown
                .wait(token, |remaining| {
                    self.set_next_action(format_remaining(kind, remaining))
                })
                .await;
            if !expired {
                return;
            }
            lock(&self.state).scheduler.begin_cycle(kind);
        }
    }

    /// Cancels the engine. Running checkpoints return promptly.
    pub fn stop(&self) {
        self.token().cancel();
    }
}

#[async_trait]
impl Worker for AccountEngine {
    fn label(&self) -> String {
        format!("account-{} {}", self.id, short_address(&self.address))
    }

    async fn run(self: Arc<Self>, token: CancellationToken) -> Result<()> {
        if self.running.swap(true, Ordering::SeqCst) {
            debug!("Engine {} already running", self.id);
            return Ok(());
        }
        self.activate(token.clone());
        self.run_loop(&token).await;

        if token.is_cancelled() {
            let mut state = lock(&self.state);
            state.status = AccountStatus::Stopped;
            state.next_action = "Stopped by User".to_string();
            drop(state);
            warn!("Process Stopped.");
        }
        self.running.store(false, Ordering::SeqCst);
        Ok(())
    }
}
