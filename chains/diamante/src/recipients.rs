//! Recipient addresses for transfers.
//!
//! Loaded once from `wallet.txt` and shared read-only by every engine.

use alloy_primitives::Address;
use anyhow::Result;
use rand::seq::SliceRandom;
use std::path::Path;
use std::sync::Arc;
use tracing::{info, warn};

/// EIP-55 form of `raw`, or `None` when it is not a 20-byte hex address.
pub fn checksum_address(raw: &str) -> Option<String> {
    raw.trim()
        .parse::<Address>()
        .ok()
        .map(|a| a.to_checksum(None))
}

#[derive(Debug, Clone, Default)]
pub struct RecipientPool {
    addresses: Arc<[String]>,
}

impl RecipientPool {
    pub fn new(addresses: Vec<String>) -> Self {
        Self {
            addresses: addresses.into(),
        }
    }

    /// Loads the pool; a missing file yields an empty pool.
    ///
    /// Lines that are not valid addresses are skipped, the rest are stored
    /// in checksummed form.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let addresses: Vec<String> = core_logic::read_lines_optional(path)?
            .into_iter()
            .filter_map(|line| {
                let address = checksum_address(&line);
                if address.is_none() {
                    warn!("Skipping invalid recipient: {}", line);
                }
                address
            })
            .collect();
        if addresses.is_empty() {
            warn!("No recipients in {}. Transfers will be skipped.", path.display());
        } else {
            info!("Loaded {} recipients from {}", addresses.len(), path.display());
        }
        Ok(Self::new(addresses))
    }

    pub fn len(&self) -> usize {
        self.addresses.len()
    }

    pub fn is_empty(&self) -> bool {
        self.addresses.is_empty()
    }

    /// Uniform pick among entries not equal to `own` (case-insensitive).
    ///
    /// `None` when every entry is the sender itself.
    pub fn pick_excluding(&self, own: &str) -> Option<&str> {
        if !self.addresses.iter().any(|a| !a.eq_ignore_ascii_case(own)) {
            return None;
        }
        let mut rng = rand::thread_rng();
        loop {
            let candidate = self.addresses.choose(&mut rng)?;
            if !candidate.eq_ignore_ascii_case(own) {
                return Some(candidate.as_str());
            }
        }
    }
}
