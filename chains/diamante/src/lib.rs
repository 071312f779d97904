//! # Diamante - Campaign Automation for the Diamante Testnet
//!
//! Drives many seed accounts through a recurring daily cycle (login, faucet
//! claim, a few DIAM transfers) on a jittered ~24h schedule, and runs a
//! background job that mints new identities under a referral code.
//!
//! ## Modules
//!
//! - [`transport`] - Request transport (helper process or reqwest)
//! - [`api`] - Endpoint bindings and tolerant response decoding
//! - [`classifier`] - Table-driven outcome classification
//! - [`store`] - Persisted device ids and claim times
//! - [`scheduler`] - Cycle countdowns with held jitter
//! - [`engine`] - Per-account state machine
//! - [`referral`] - Referral generation job
//! - [`orchestrator`] - Engine set, config and aggregate status

pub mod api;
pub mod classifier;
pub mod config;
pub mod engine;
pub mod orchestrator;
pub mod recipients;
pub mod referral;
pub mod scheduler;
pub mod store;
pub mod transport;

pub use api::{ApiOutcome, DiamanteApi, LoginOutcome, Session};
pub use classifier::{ClassifierRules, ErrorKind, MessageRule};
pub use config::DailyConfig;
pub use engine::{AccountEngine, AccountSnapshot, AccountStatus, EngineContext, LoginResult};
pub use orchestrator::{DataFiles, Orchestrator, OrchestratorStatus};
pub use recipients::RecipientPool;
pub use referral::{ReferralJob, ReferralReport};
pub use scheduler::{Countdown, CountdownKind, CycleScheduler};
pub use store::{IdentityRecord, IdentityStore};
pub use transport::{CommandTransport, HttpTransport, Transport, TransportRequest, TransportResponse};
