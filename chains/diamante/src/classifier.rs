//! Outcome classification shared by the account engine and the referral job.
//!
//! `(status, success, message) -> ErrorKind` is a pure function over a rule
//! table. The table ships with defaults and can be overridden from
//! `config.json` since the remote wording changes without notice.

use serde::{Deserialize, Serialize};

use crate::api::ApiOutcome;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ErrorKind {
    Success,
    /// No response at all (status 0)
    TransportFailure,
    /// 401, session must be renewed
    AuthExpired,
    /// 403, usually a Cloudflare challenge
    RateLimited,
    InsufficientBalance,
    /// Faucet already claimed in the current period
    AlreadyClaimed,
    /// Remote side is syncing; worth a longer pause before retrying
    TransientSync,
    Other,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageRule {
    /// Case-insensitive substring
    pub pattern: String,
    pub kind: ErrorKind,
}

impl MessageRule {
    pub fn new(pattern: &str, kind: ErrorKind) -> Self {
        Self {
            pattern: pattern.to_lowercase(),
            kind,
        }
    }
}

/// Ordered rule table. The first matching rule wins.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ClassifierRules {
    rules: Vec<MessageRule>,
}

impl Default for ClassifierRules {
    fn default() -> Self {
        Self {
            rules: vec![
                MessageRule::new("insufficient", ErrorKind::InsufficientBalance),
                MessageRule::new("once per day", ErrorKind::AlreadyClaimed),
                MessageRule::new("already claimed", ErrorKind::AlreadyClaimed),
                MessageRule::new("syncing", ErrorKind::TransientSync),
            ],
        }
    }
}

impl ClassifierRules {
    pub fn new(rules: Vec<MessageRule>) -> Self {
        Self { rules }
    }

    fn match_message(&self, message: &str, only: impl Fn(ErrorKind) -> bool) -> Option<ErrorKind> {
        let message = message.to_lowercase();
        self.rules
            .iter()
            .filter(|rule| only(rule.kind))
            .find(|rule| !rule.pattern.is_empty() && message.contains(&rule.pattern.to_lowercase()))
            .map(|rule| rule.kind)
    }

    /// Precedence: transport failure, success, insufficient-balance rules,
    /// 401/403 status, remaining message rules.
    pub fn classify(&self, status: u16, success: bool, message: &str) -> ErrorKind {
        if status == 0 {
            return ErrorKind::TransportFailure;
        }
        if success {
            return ErrorKind::Success;
        }
        if let Some(kind) = self.match_message(message, |k| k == ErrorKind::InsufficientBalance) {
            return kind;
        }
        match status {
            401 => ErrorKind::AuthExpired,
            403 => ErrorKind::RateLimited,
            _ => self
                .match_message(message, |k| k != ErrorKind::InsufficientBalance)
                .unwrap_or(ErrorKind::Other),
        }
    }

    pub fn classify_outcome(&self, outcome: &ApiOutcome) -> ErrorKind {
        match outcome {
            ApiOutcome::Success(_) => ErrorKind::Success,
            ApiOutcome::BusinessError { status, message } => self.classify(*status, false, message),
            ApiOutcome::HttpError(status) => self.classify(*status, false, ""),
        }
    }
}

/// Message as shown to the operator. Only affects logs, never classification.
pub fn display_message(message: &str) -> String {
    if message.to_lowercase().contains("network guardians are syncing") {
        "Network Syncing (Temp Fail)".to_string()
    } else {
        message.to_string()
    }
}
