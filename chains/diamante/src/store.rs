//! Persisted per-identity state (`account_data.json`).
//!
//! Maps lowercase address to `{deviceId, lastClaimTime}`. All writes go
//! through one async mutex and re-read the file before writing, so engines
//! persisting distinct keys at the same time never drop each other's entries.

use core_logic::StoreError;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;
use tracing::{debug, warn};

const DEVICE_ID_CHARS: &[u8] = b"0123456789ABCDEFGHIJKLMNOPQRSTUVWXYZ";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdentityRecord {
    #[serde(rename = "deviceId")]
    pub device_id: String,
    /// Unix millis of the last faucet claim, `0` when never claimed
    #[serde(rename = "lastClaimTime", default)]
    pub last_claim_time: i64,
}

/// Older files stored the bare device id string.
#[derive(Deserialize)]
#[serde(untagged)]
enum StoredEntry {
    Record(IdentityRecord),
    Legacy(String),
}

impl From<StoredEntry> for IdentityRecord {
    fn from(entry: StoredEntry) -> Self {
        match entry {
            StoredEntry::Record(r) => r,
            StoredEntry::Legacy(device_id) => IdentityRecord {
                device_id,
                last_claim_time: 0,
            },
        }
    }
}

/// `DEV` followed by 8 characters from `[0-9A-Z]`.
pub fn generate_device_id() -> String {
    let mut rng = rand::thread_rng();
    let suffix: String = (0..8)
        .map(|_| DEVICE_ID_CHARS[rng.gen_range(0..DEVICE_ID_CHARS.len())] as char)
        .collect();
    format!("DEV{}", suffix)
}

#[derive(Debug)]
pub struct IdentityStore {
    path: PathBuf,
    records: Mutex<HashMap<String, IdentityRecord>>,
}

impl IdentityStore {
    /// Opens the store. A missing or unreadable file starts empty.
    pub async fn load(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let records = match read_file(&path).await {
            Ok(records) => records,
            Err(e) => {
                warn!("{}. Starting with an empty identity store.", e);
                HashMap::new()
            }
        };
        debug!("Identity store loaded with {} entries", records.len());
        Self {
            path,
            records: Mutex::new(records),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub async fn get(&self, address: &str) -> Option<IdentityRecord> {
        self.records.lock().await.get(&address.to_lowercase()).cloned()
    }

    pub async fn snapshot(&self) -> BTreeMap<String, IdentityRecord> {
        self.records
            .lock()
            .await
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }

    /// Returns the stored record, generating and persisting a device id on
    /// first sight of `address`.
    pub async fn get_or_create(&self, address: &str) -> IdentityRecord {
        let key = address.to_lowercase();
        let mut records = self.records.lock().await;
        if let Some(record) = records.get(&key) {
            return record.clone();
        }

        let record = IdentityRecord {
            device_id: generate_device_id(),
            last_claim_time: 0,
        };
        records.insert(key.clone(), record.clone());
        if let Err(e) = self.persist(&mut records).await {
            warn!("Failed to persist device id for {}: {}", key, e);
        }
        record
    }

    /// Stores the claim timestamp for a known address.
    pub async fn record_claim(&self, address: &str, timestamp_ms: i64) {
        let key = address.to_lowercase();
        let mut records = self.records.lock().await;
        let Some(record) = records.get_mut(&key) else {
            debug!("record_claim for unknown address {}", key);
            return;
        };
        record.last_claim_time = timestamp_ms;
        if let Err(e) = self.persist(&mut records).await {
            warn!("Failed to persist claim time for {}: {}", key, e);
        }
    }

    // Caller holds the lock.
    async fn persist(&self, records: &mut HashMap<String, IdentityRecord>) -> Result<(), StoreError> {
        let mut merged: BTreeMap<String, IdentityRecord> = match read_file(&self.path).await {
            Ok(on_disk) => on_disk.into_iter().collect(),
            Err(_) => BTreeMap::new(),
        };
        for (k, v) in records.iter() {
            merged.insert(k.clone(), v.clone());
        }
        for (k, v) in &merged {
            records.entry(k.clone()).or_insert_with(|| v.clone());
        }

        let json = serde_json::to_string_pretty(&merged).map_err(|e| StoreError::Write {
            path: self.path.display().to_string(),
            msg: e.to_string(),
        })?;

        let tmp = self.path.with_extension("json.tmp");
        let write_err = |e: std::io::Error| StoreError::Write {
            path: self.path.display().to_string(),
            msg: e.to_string(),
        };
        tokio::fs::write(&tmp, json).await.map_err(write_err)?;
        tokio::fs::rename(&tmp, &self.path).await.map_err(write_err)?;
        Ok(())
    }
}

async fn read_file(path: &Path) -> Result<HashMap<String, IdentityRecord>, StoreError> {
    let content = match tokio::fs::read_to_string(path).await {
        Ok(c) => c,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(HashMap::new()),
        Err(e) => {
            return Err(StoreError::Read {
                path: path.display().to_string(),
                msg: e.to_string(),
            })
        }
    };
    if content.trim().is_empty() {
        return Ok(HashMap::new());
    }
    let raw: HashMap<String, StoredEntry> =
        serde_json::from_str(&content).map_err(|e| StoreError::Corrupt {
            path: path.display().to_string(),
            msg: e.to_string(),
        })?;
    Ok(raw
        .into_iter()
        .map(|(k, v)| (k.to_lowercase(), v.into()))
        .collect())
}
