//! Learned per-user tool statistics
//!
//! Success rates are exponentially smoothed. Writers are serialized per user
//! key so concurrent runs for one user never lose an update.

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::constants::orchestrator;
use crate::error::{EngineError, Result};
use crate::state::now_rfc3339;

/// Smoothed success statistics of one tool
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolStatistics {
    pub success_rate: f64,
    pub samples: u64,
    pub last_updated: String,
}

impl ToolStatistics {
    /// Fold one observation into the statistics
    ///
    /// The first observation sets the rate directly; later ones are smoothed
    /// as `(1 - alpha) * old + alpha * new`.
    pub fn observe(previous: Option<&ToolStatistics>, success: bool, alpha: f64) -> Self {
        let observed = if success { 1.0 } else { 0.0 };
        match previous {
            Some(prev) => Self {
                success_rate: (1.0 - alpha) * prev.success_rate + alpha * observed,
                samples: prev.samples + 1,
                last_updated: now_rfc3339(),
            },
            None => Self {
                success_rate: observed,
                samples: 1,
                last_updated: now_rfc3339(),
            },
        }
    }
}

/// Tool name to statistics for one user
pub type UserToolStats = BTreeMap<String, ToolStatistics>;

/// Persistence of learned tool statistics
#[async_trait]
pub trait StatisticsStore: Send + Sync {
    /// Statistics for a user; unknown users have none
    async fn load(&self, user: &str) -> Result<UserToolStats>;

    /// Record one tool outcome and return the updated statistics
    async fn record(&self, user: &str, tool: &str, success: bool) -> Result<ToolStatistics>;
}

/// In-memory statistics, lost on restart
pub struct InMemoryStatisticsStore {
    users: parking_lot::Mutex<HashMap<String, UserToolStats>>,
    alpha: f64,
}

impl InMemoryStatisticsStore {
    pub fn new() -> Self {
        Self::with_alpha(orchestrator::SMOOTHING_ALPHA)
    }

    pub fn with_alpha(alpha: f64) -> Self {
        Self {
            users: parking_lot::Mutex::new(HashMap::new()),
            alpha,
        }
    }
}

impl Default for InMemoryStatisticsStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl StatisticsStore for InMemoryStatisticsStore {
    async fn load(&self, user: &str) -> Result<UserToolStats> {
        Ok(self.users.lock().get(user).cloned().unwrap_or_default())
    }

    async fn record(&self, user: &str, tool: &str, success: bool) -> Result<ToolStatistics> {
        let mut users = self.users.lock();
        let stats = users.entry(user.to_string()).or_default();
        let updated = ToolStatistics::observe(stats.get(tool), success, self.alpha);
        stats.insert(tool.to_string(), updated.clone());
        Ok(updated)
    }
}

/// Statistics persisted as one JSON file per user
///
/// The directory is created on first write.
pub struct FileStatisticsStore {
    dir: PathBuf,
    alpha: f64,
    user_locks: parking_lot::Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl FileStatisticsStore {
    pub fn new(dir: impl AsRef<Path>) -> Self {
        Self::with_alpha(dir, orchestrator::SMOOTHING_ALPHA)
    }

    pub fn with_alpha(dir: impl AsRef<Path>, alpha: f64) -> Self {
        Self {
            dir: dir.as_ref().to_path_buf(),
            alpha,
            user_locks: parking_lot::Mutex::new(HashMap::new()),
        }
    }

    fn path_for(&self, user: &str) -> PathBuf {
        self.dir.join(format!("{}.json", file_key(user)))
    }

    fn lock_for(&self, user: &str) -> Arc<tokio::sync::Mutex<()>> {
        self.user_locks
            .lock()
            .entry(user.to_string())
            .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
            .clone()
    }

    /// Drop the user's lock entry once no other caller holds it
    fn release(&self, user: &str, lock: Arc<tokio::sync::Mutex<()>>) {
        drop(lock);
        let mut locks = self.user_locks.lock();
        if locks.get(user).is_some_and(|l| Arc::strong_count(l) == 1) {
            locks.remove(user);
        }
    }

    async fn read(&self, user: &str) -> Result<UserToolStats> {
        let path = self.path_for(user);
        if !path.exists() {
            return Ok(UserToolStats::new());
        }
        let content = tokio::fs::read_to_string(&path).await?;
        serde_json::from_str(&content)
            .map_err(|e| EngineError::Statistics(format!("{}: {}", path.display(), e)))
    }

    /// Read, fold and rewrite; callers hold the user's lock
    async fn write(&self, user: &str, tool: &str, success: bool) -> Result<ToolStatistics> {
        let mut stats = self.read(user).await?;
        let updated = ToolStatistics::observe(stats.get(tool), success, self.alpha);
        stats.insert(tool.to_string(), updated.clone());

        tokio::fs::create_dir_all(&self.dir).await?;
        let path = self.path_for(user);
        tokio::fs::write(&path, serde_json::to_string_pretty(&stats)?).await?;
        log::debug!(
            "Statistics: {} / {} -> {:.3} ({} samples)",
            user,
            tool,
            updated.success_rate,
            updated.samples
        );
        Ok(updated)
    }
}

#[async_trait]
impl StatisticsStore for FileStatisticsStore {
    async fn load(&self, user: &str) -> Result<UserToolStats> {
        let lock = self.lock_for(user);
        let stats = {
            let _guard = lock.lock().await;
            self.read(user).await
        };
        self.release(user, lock);
        stats
    }

    async fn record(&self, user: &str, tool: &str, success: bool) -> Result<ToolStatistics> {
        let lock = self.lock_for(user);
        let updated = {
            let _guard = lock.lock().await;
            self.write(user, tool, success).await
        };
        self.release(user, lock);
        updated
    }
}

/// File-name-safe form of a key
///
/// Lowercase ASCII letters, digits and `-` pass through; every other byte
/// becomes `_xx`, so distinct keys never share a file, even on
/// case-insensitive filesystems.
pub(crate) fn file_key(key: &str) -> String {
    let mut encoded = String::with_capacity(key.len());
    for byte in key.bytes() {
        match byte {
            b'a'..=b'z' | b'0'..=b'9' | b'-' => encoded.push(byte as char),
            _ => encoded.push_str(&format!("_{:02x}", byte)),
        }
    }
    encoded
}
