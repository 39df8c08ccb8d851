//! Metrics partition actor
//!
//! A single partition (the literal `"global"`) accumulates cleanup snapshots
//! reported by every registry partition and hourly operation counters
//! reported by the gateway. Counter increments batch in memory and flush to
//! storage at most once per flush window to cap write amplification, so
//! `stats` may under-report by at most that window.

use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};

use coral::CoralError;
use coral::types::{CleanupSnapshot, StatsResponse};

use crate::partition::now_ms;
use crate::store::MetricsStore;

const COMMAND_BUFFER: usize = 256;
const FLUSH_DELAY: Duration = Duration::from_secs(10);
const SWEEP_INTERVAL: Duration = Duration::from_secs(3_600);
const COUNTER_RETENTION_HOURS: i64 = 24;
const SNAPSHOT_RETENTION_MS: i64 = 10 * 60 * 1_000;

fn hour_bucket(at: chrono::DateTime<chrono::Utc>) -> String {
    at.format("%Y-%m-%dT%H").to_string()
}

enum MetricsCommand {
    Report {
        origin_id: String,
        expired_colonies: i64,
        expired_agents: i64,
    },
    Track {
        operation: String,
    },
    Flush,
    Stats {
        reply: oneshot::Sender<Result<StatsResponse, CoralError>>,
    },
}

/// Address of the live metrics partition.
#[derive(Clone)]
pub struct MetricsHandle {
    tx: mpsc::Sender<MetricsCommand>,
}

impl MetricsHandle {
    /// Stores a cleanup snapshot. Best effort: a full or closed channel is
    /// logged and swallowed so cleanup in the reporting partition never fails.
    pub async fn report(&self, origin_id: &str, expired_colonies: i64, expired_agents: i64) {
        let command = MetricsCommand::Report {
            origin_id: origin_id.to_string(),
            expired_colonies,
            expired_agents,
        };
        if self.tx.send(command).await.is_err() {
            tracing::warn!(origin = origin_id, "metrics partition unavailable, dropping report");
        }
    }

    /// Increments the hourly counter for an operation. Fire-and-forget.
    pub fn track(&self, operation: &str) {
        let _ = self.tx.try_send(MetricsCommand::Track {
            operation: operation.to_string(),
        });
    }

    pub async fn stats(&self) -> Result<StatsResponse, CoralError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(MetricsCommand::Stats { reply })
            .await
            .map_err(|_| CoralError::Internal("metrics partition unavailable".to_string()))?;
        rx.await
            .map_err(|_| CoralError::Internal("metrics partition unavailable".to_string()))?
    }
}

/// Spawns the metrics partition with production timings.
pub fn spawn(store: MetricsStore) -> MetricsHandle {
    spawn_with_timings(store, FLUSH_DELAY, SWEEP_INTERVAL)
}

pub fn spawn_with_timings(
    store: MetricsStore,
    flush_delay: Duration,
    sweep_interval: Duration,
) -> MetricsHandle {
    let (tx, rx) = mpsc::channel(COMMAND_BUFFER);
    let partition = MetricsPartition {
        store,
        pending: HashMap::new(),
        flush_scheduled: false,
        flush_delay,
        self_tx: tx.clone(),
    };
    tokio::spawn(partition.run(rx, sweep_interval));
    MetricsHandle { tx }
}

struct MetricsPartition {
    store: MetricsStore,
    /// (operation, hour bucket) → pending increment
    pending: HashMap<(String, String), i64>,
    flush_scheduled: bool,
    flush_delay: Duration,
    self_tx: mpsc::Sender<MetricsCommand>,
}

impl MetricsPartition {
    async fn run(mut self, mut rx: mpsc::Receiver<MetricsCommand>, sweep_interval: Duration) {
        let mut sweep = tokio::time::interval(sweep_interval);
        sweep.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                command = rx.recv() => {
                    match command {
                        Some(command) => self.handle(command),
                        None => return,
                    }
                }
                _ = sweep.tick() => self.run_sweep(),
            }
        }
    }

    fn handle(&mut self, command: MetricsCommand) {
        match command {
            MetricsCommand::Report {
                origin_id,
                expired_colonies,
                expired_agents,
            } => self.report(&origin_id, expired_colonies, expired_agents),
            MetricsCommand::Track { operation } => self.track(operation),
            MetricsCommand::Flush => {
                self.flush_scheduled = false;
                self.flush_pending();
            }
            MetricsCommand::Stats { reply } => {
                self.flush_pending();
                let _ = reply.send(self.stats());
            }
        }
    }

    fn report(&mut self, origin_id: &str, expired_colonies: i64, expired_agents: i64) {
        let snapshot = CleanupSnapshot {
            expired_colonies,
            expired_agents,
            updated_at: now_ms(),
        };
        let value = match serde_json::to_string(&snapshot) {
            Ok(value) => value,
            Err(e) => {
                tracing::warn!("failed to serialize cleanup snapshot: {}", e);
                return;
            }
        };
        if let Err(e) = self.store.put(&format!("cleanup:{}", origin_id), &value) {
            tracing::warn!(origin = origin_id, "failed to store cleanup snapshot: {}", e);
        }
    }

    fn track(&mut self, operation: String) {
        let bucket = hour_bucket(chrono::Utc::now());
        *self.pending.entry((operation, bucket)).or_insert(0) += 1;

        if !self.flush_scheduled {
            self.flush_scheduled = true;
            let tx = self.self_tx.clone();
            let delay = self.flush_delay;
            tokio::spawn(async move {
                tokio::time::sleep(delay).await;
                let _ = tx.send(MetricsCommand::Flush).await;
            });
        }
    }

    /// Merges pending counters into storage: read existing, add, write back
    /// as one batch. On failure the drained counts go back to pending so the
    /// next flush retries them.
    fn flush_pending(&mut self) {
        if self.pending.is_empty() {
            return;
        }

        let drained: Vec<((String, String), i64)> = self.pending.drain().collect();
        let mut entries = Vec::with_capacity(drained.len());
        for ((operation, bucket), increment) in &drained {
            let key = format!("count:{}:{}", operation, bucket);
            let existing = match self.store.get(&key) {
                Ok(value) => value.and_then(|v| v.parse::<i64>().ok()).unwrap_or(0),
                Err(e) => {
                    tracing::warn!("failed to read counter {}: {}", key, e);
                    0
                }
            };
            entries.push((key, (existing + increment).to_string()));
        }

        if let Err(e) = self.store.put_many(&entries) {
            tracing::warn!("failed to flush {} counters: {}", entries.len(), e);
            for (key, increment) in drained {
                *self.pending.entry(key).or_insert(0) += increment;
            }
        }
    }

    fn stats(&self) -> Result<StatsResponse, CoralError> {
        let now = chrono::Utc::now();
        let cutoff = hour_bucket(now - chrono::Duration::hours(1));

        let mut operations: HashMap<String, i64> = HashMap::new();
        let counters = self
            .store
            .scan_prefix("count:")
            .map_err(|e| CoralError::Internal(format!("storage error: {}", e)))?;
        for (key, value) in counters {
            // count:<op>:<iso-hour>; the hour bucket never contains ':'
            let Some(rest) = key.strip_prefix("count:") else {
                continue;
            };
            let Some((operation, bucket)) = rest.rsplit_once(':') else {
                continue;
            };
            if bucket >= cutoff.as_str() {
                *operations.entry(operation.to_string()).or_insert(0) +=
                    value.parse::<i64>().unwrap_or(0);
            }
        }

        let mut cleanups = HashMap::new();
        let snapshots = self
            .store
            .scan_prefix("cleanup:")
            .map_err(|e| CoralError::Internal(format!("storage error: {}", e)))?;
        for (key, value) in snapshots {
            let Some(origin) = key.strip_prefix("cleanup:") else {
                continue;
            };
            match serde_json::from_str::<CleanupSnapshot>(&value) {
                Ok(snapshot) => {
                    cleanups.insert(origin.to_string(), snapshot);
                }
                Err(e) => tracing::warn!("invalid cleanup snapshot under {}: {}", key, e),
            }
        }

        Ok(StatsResponse {
            operations,
            cleanups,
        })
    }

    /// Hourly retention sweep: flush, drop counter buckets older than 24 h,
    /// drop cleanup snapshots older than 10 min.
    fn run_sweep(&mut self) {
        self.flush_pending();

        let now = chrono::Utc::now();
        let counter_cutoff =
            hour_bucket(now - chrono::Duration::hours(COUNTER_RETENTION_HOURS));
        let snapshot_cutoff = now_ms() - SNAPSHOT_RETENTION_MS;

        let mut stale = Vec::new();
        match self.store.scan_prefix("count:") {
            Ok(counters) => {
                for (key, _) in counters {
                    if let Some((_, bucket)) =
                        key.strip_prefix("count:").and_then(|r| r.rsplit_once(':'))
                    {
                        if bucket < counter_cutoff.as_str() {
                            stale.push(key);
                        }
                    }
                }
            }
            Err(e) => tracing::warn!("sweep failed scanning counters: {}", e),
        }
        match self.store.scan_prefix("cleanup:") {
            Ok(snapshots) => {
                for (key, value) in snapshots {
                    let updated_at = serde_json::from_str::<CleanupSnapshot>(&value)
                        .map(|s| s.updated_at)
                        .unwrap_or(0);
                    if updated_at < snapshot_cutoff {
                        stale.push(key);
                    }
                }
            }
            Err(e) => tracing::warn!("sweep failed scanning snapshots: {}", e),
        }

        if stale.is_empty() {
            return;
        }
        match self.store.delete_keys(&stale) {
            Ok(deleted) => tracing::debug!(deleted, "metrics sweep removed stale entries"),
            Err(e) => tracing::warn!("sweep failed deleting stale entries: {}", e),
        }
    }
}
