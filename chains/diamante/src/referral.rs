//! Background referral generation.
//!
//! Mints fresh identities, logs each one in through a random proxy and
//! registers it under the configured referral code. Successful identities
//! are appended to `referrals.txt` as `address|privateKey|handle`.

use alloy::signers::local::PrivateKeySigner;
use alloy_primitives::B256;
use anyhow::{Context, Result};
use async_trait::async_trait;
use core_logic::{random_duration, sleep_or_cancel, ActivityMetrics, ProxyPool, Worker};
use rand::Rng;
use rand::seq::SliceRandom;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use zeroize::Zeroizing;

use crate::api::{DiamanteApi, LoginOutcome};
use crate::classifier::display_message;
use crate::config::DailyConfig;
use crate::store::generate_device_id;
use crate::transport::Transport;

const BLOCK_COOLDOWN: Duration = Duration::from_secs(60);
const THINK_TIME_MIN: Duration = Duration::from_secs(2);
const THINK_TIME_MAX: Duration = Duration::from_secs(5);

const ADJECTIVES: &[&str] = &[
    "Crypto", "Super", "Mega", "Hyper", "Fast", "Gold", "Silver", "Moon", "Sun", "Cyber", "Based",
    "Degen",
];
const NOUNS: &[&str] = &[
    "King", "Queen", "Lion", "Tiger", "Whale", "Shark", "Falcon", "Eagle", "Wolf", "Bear", "Ape",
    "Chad",
];

const HANDLE_SUFFIX_MAX: u32 = 9_999;

/// `CryptoWhale4821` style display handle, suffix in `0..9999`.
pub fn random_handle() -> String {
    let mut rng = rand::thread_rng();
    let adjective = ADJECTIVES.choose(&mut rng).copied().unwrap_or("Crypto");
    let noun = NOUNS.choose(&mut rng).copied().unwrap_or("Whale");
    format!("{}{}{}", adjective, noun, rng.gen_range(0..HANDLE_SUFFIX_MAX))
}

pub struct ReferralRecord {
    pub address: String,
    pub private_key: Zeroizing<String>,
    pub handle: String,
}

impl ReferralRecord {
    /// New random key pair with a checksummed address.
    pub fn generate() -> Self {
        let signer = loop {
            let mut bytes = Zeroizing::new([0u8; 32]);
            rand::thread_rng().fill(&mut bytes[..]);
            if let Ok(signer) = PrivateKeySigner::from_bytes(&B256::from(*bytes)) {
                break signer;
            }
        };
        Self {
            address: signer.address().to_checksum(None),
            private_key: Zeroizing::new(format!("0x{}", hex::encode(signer.to_bytes()))),
            handle: random_handle(),
        }
    }

    pub fn to_line(&self) -> String {
        format!("{}|{}|{}", self.address, self.private_key.as_str(), self.handle)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReferralReport {
    /// Iterations consumed toward the requested count
    pub attempted: u32,
    pub registered: u32,
    pub failed: u32,
}

/// Clears the shared running flag when the job exits, however it exits.
struct RunningGuard(Arc<AtomicBool>);

impl Drop for RunningGuard {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

pub struct ReferralJob {
    code: String,
    count: u32,
    delay_min: Duration,
    delay_max: Duration,
    proxies: ProxyPool,
    transport: Arc<dyn Transport>,
    output: PathBuf,
    metrics: Arc<ActivityMetrics>,
    running: Arc<AtomicBool>,
    report: Mutex<ReferralReport>,
}

impl ReferralJob {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        code: impl Into<String>,
        count: u32,
        config: &DailyConfig,
        proxies: ProxyPool,
        transport: Arc<dyn Transport>,
        output: impl Into<PathBuf>,
        metrics: Arc<ActivityMetrics>,
        running: Arc<AtomicBool>,
    ) -> Self {
        let (delay_min, delay_max) = config.referral_delay_bounds();
        Self {
            code: code.into(),
            count,
            delay_min,
            delay_max,
            proxies,
            transport,
            output: output.into(),
            metrics,
            running,
            report: Mutex::new(ReferralReport::default()),
        }
    }

    pub fn report(&self) -> ReferralReport {
        *self.report.lock().unwrap_or_else(|p| p.into_inner())
    }

    fn update_report(&self, f: impl FnOnce(&mut ReferralReport)) {
        f(&mut self.report.lock().unwrap_or_else(|p| p.into_inner()));
    }

    async fn append_record(&self, record: &ReferralRecord) -> Result<()> {
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.output)
            .await
            .with_context(|| format!("Failed to open {}", self.output.display()))?;
        let line = Zeroizing::new(format!("{}\n", record.to_line()));
        file.write_all(line.as_bytes())
            .await
            .with_context(|| format!("Failed to write {}", self.output.display()))?;
        Ok(())
    }

    /// Runs up to `count` iterations or until `token` is cancelled.
    pub async fn execute(&self, token: &CancellationToken) -> ReferralReport {
        self.running.store(true, Ordering::SeqCst);
        let _guard = RunningGuard(Arc::clone(&self.running));
        let count = self.count;
        info!("Starting background generation of {}...", count);

        let mut i = 0;
        while i < count {
            if token.is_cancelled() {
                warn!("Process stopped by user.");
                break;
            }

            let record = ReferralRecord::generate();
            let proxy = self.proxies.random();
            let api = DiamanteApi::new(Arc::clone(&self.transport), proxy.as_ref());
            info!("[{}/{}] Creating {}...", i + 1, count, record.handle);

            match api.connect_wallet(&record.address, &generate_device_id()).await {
                LoginOutcome::Blocked => {
                    warn!("[{}/{}] Failed: IP Blocked (403). Retrying in 60s...", i + 1, count);
                    if !sleep_or_cancel(token, BLOCK_COOLDOWN).await {
                        break;
                    }
                    continue;
                }
                LoginOutcome::Authenticated { session, .. } => {
                    if !sleep_or_cancel(token, random_duration(THINK_TIME_MIN, THINK_TIME_MAX)).await {
                        break;
                    }
                    let outcome = api
                        .register(&session, &record.address, &record.handle, &self.code)
                        .await;
                    if outcome.is_success() {
                        match self.append_record(&record).await {
                            Ok(()) => info!("[{}/{}] Success! Saved.", i + 1, count),
                            Err(e) => error!("[{}/{}] Registered but not saved: {:#}", i + 1, count, e),
                        }
                        self.metrics.record_referral(true);
                        self.update_report(|r| r.registered += 1);
                    } else {
                        warn!(
                            "[{}/{}] Register Failed: {}",
                            i + 1,
                            count,
                            display_message(&outcome.message())
                        );
                        self.metrics.record_referral(false);
                        self.update_report(|r| r.failed += 1);
                    }
                }
                LoginOutcome::NoToken => {
                    warn!("[{}/{}] No Token received.", i + 1, count);
                    self.metrics.record_referral(false);
                    self.update_report(|r| r.failed += 1);
                }
                LoginOutcome::NoData(_) => {
                    warn!("[{}/{}] Login Failed.", i + 1, count);
                    self.metrics.record_referral(false);
                    self.update_report(|r| r.failed += 1);
                }
            }

            self.update_report(|r| r.attempted += 1);
            i += 1;

            if i < count {
                let delay = random_duration(self.delay_min, self.delay_max);
                info!("[Wait] Cooling down {}s...", delay.as_secs());
                if !sleep_or_cancel(token, delay).await {
                    warn!("Process stopped by user.");
                    break;
                }
            }
        }

        let report = self.report();
        info!(
            "Referral finished | Attempted: {} | Registered: {} | Failed: {}",
            report.attempted, report.registered, report.failed
        );
        report
    }
}

#[async_trait]
impl Worker for ReferralJob {
    fn label(&self) -> String {
        "referral".to_string()
    }

    async fn run(self: Arc<Self>, token: CancellationToken) -> Result<()> {
        self.execute(&token).await;
        Ok(())
    }
}
