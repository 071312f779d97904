use chrono::Utc;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct ActivitySnapshot {
    pub timestamp: String,
    pub uptime_secs: u64,
    pub logins: u64,
    pub login_failures: u64,
    pub faucet_claims: u64,
    pub successful_transfers: u64,
    pub failed_transfers: u64,
    pub referrals_created: u64,
    pub referral_failures: u64,
}

/// Process-wide activity counters.
///
/// Shared as `Arc<ActivityMetrics>` between every engine and the referral
/// job; all updates are lock-free atomic increments.
#[derive(Debug)]
pub struct ActivityMetrics {
    logins: AtomicU64,
    login_failures: AtomicU64,
    faucet_claims: AtomicU64,
    successful_transfers: AtomicU64,
    failed_transfers: AtomicU64,
    referrals_created: AtomicU64,
    referral_failures: AtomicU64,
    start_time: Instant,
}

impl Default for ActivityMetrics {
    fn default() -> Self {
        Self {
            logins: AtomicU64::new(0),
            login_failures: AtomicU64::new(0),
            faucet_claims: AtomicU64::new(0),
            successful_transfers: AtomicU64::new(0),
            failed_transfers: AtomicU64::new(0),
            referrals_created: AtomicU64::new(0),
            referral_failures: AtomicU64::new(0),
            start_time: Instant::now(),
        }
    }
}

impl ActivityMetrics {
    pub fn record_login(&self, success: bool) {
        if success {
            self.logins.fetch_add(1, Ordering::SeqCst);
        } else {
            self.login_failures.fetch_add(1, Ordering::SeqCst);
        }
    }

    pub fn record_faucet_claim(&self) {
        self.faucet_claims.fetch_add(1, Ordering::SeqCst);
    }

    pub fn record_transfer(&self, success: bool) {
        if success {
            self.successful_transfers.fetch_add(1, Ordering::SeqCst);
        } else {
            self.failed_transfers.fetch_add(1, Ordering::SeqCst);
        }
    }

    pub fn record_referral(&self, success: bool) {
        if success {
            self.referrals_created.fetch_add(1, Ordering::SeqCst);
        } else {
            self.referral_failures.fetch_add(1, Ordering::SeqCst);
        }
    }

    pub fn successful_transfers(&self) -> u64 {
        self.successful_transfers.load(Ordering::SeqCst)
    }

    pub fn referrals_created(&self) -> u64 {
        self.referrals_created.load(Ordering::SeqCst)
    }

    pub fn snapshot(&self) -> ActivitySnapshot {
        ActivitySnapshot {
            timestamp: Utc::now().to_rfc3339(),
            uptime_secs: self.start_time.elapsed().as_secs(),
            logins: self.logins.load(Ordering::SeqCst),
            login_failures: self.login_failures.load(Ordering::SeqCst),
            faucet_claims: self.faucet_claims.load(Ordering::SeqCst),
            successful_transfers: self.successful_transfers.load(Ordering::SeqCst),
            failed_transfers: self.failed_transfers.load(Ordering::SeqCst),
            referrals_created: self.referrals_created.load(Ordering::SeqCst),
            referral_failures: self.referral_failures.load(Ordering::SeqCst),
        }
    }

    pub fn export_json(&self) -> String {
        serde_json::to_string_pretty(&self.snapshot()).unwrap_or_default()
    }
}
