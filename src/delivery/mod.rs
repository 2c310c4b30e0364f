//! # Delivery Tracker
//!
//! Deduplicates broker redeliveries using an idempotency key and a bounded
//! time window. Check-and-mark is atomic per key (dashmap entry API holds
//! the shard lock for the whole decision); independent keys proceed fully
//! in parallel, which keeps unrelated messages from serializing on a
//! global lock.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, info};

/// Lifecycle status of one tracked idempotency key
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DeliveryStatus {
    /// First sighting recorded; handler may be running
    Pending,
    /// Handler finished successfully; duplicates are suppressed
    Completed,
    /// Handler failed; a redelivery is allowed to try again
    Failed,
}

/// Record for one idempotency key, owned exclusively by the tracker
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeliveryRecord {
    pub first_seen_at: DateTime<Utc>,
    pub last_seen_at: DateTime<Utc>,
    pub status: DeliveryStatus,
    /// Optional digest of the handler result, recorded for at-most-once
    /// side-effect suppression diagnostics
    pub result_hash: Option<String>,
}

impl DeliveryRecord {
    fn new(now: DateTime<Utc>) -> Self {
        Self {
            first_seen_at: now,
            last_seen_at: now,
            status: DeliveryStatus::Pending,
            result_hash: None,
        }
    }
}

/// Outcome of an atomic check-and-mark
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeliveryDecision {
    /// No live record existed; a Pending record was created and the
    /// handler must run
    Fresh,
    /// A Completed record exists inside the TTL window; skip the handler
    /// and ack the transport message immediately
    Duplicate(DeliveryRecord),
    /// A Pending record older than the stuck threshold was reclaimed
    /// (crash recovery); the handler must run
    Reclaimed,
    /// A recent Pending record exists; another worker is processing this
    /// key right now. Treat as transient and let redelivery retry later.
    InFlight,
}

/// Tracker configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DeliveryTrackerConfig {
    /// How long Completed records suppress duplicates. Must exceed the
    /// maximum possible broker redelivery delay.
    pub ttl_ms: u64,
    /// Age past which a Pending record is considered abandoned
    pub stuck_threshold_ms: u64,
    /// Background eviction sweep interval
    pub eviction_interval_ms: u64,
}

impl Default for DeliveryTrackerConfig {
    fn default() -> Self {
        Self {
            ttl_ms: 10 * 60 * 1000,
            stuck_threshold_ms: 60 * 1000,
            eviction_interval_ms: 30 * 1000,
        }
    }
}

/// Idempotency tracker shared by every subscription worker
#[derive(Debug)]
pub struct DeliveryTracker {
    records: DashMap<String, DeliveryRecord>,
    ttl: ChronoDuration,
    stuck_threshold: ChronoDuration,
    eviction_interval: Duration,
}

impl DeliveryTracker {
    pub fn new(config: &DeliveryTrackerConfig) -> Self {
        Self {
            records: DashMap::new(),
            ttl: ChronoDuration::milliseconds(config.ttl_ms as i64),
            stuck_threshold: ChronoDuration::milliseconds(config.stuck_threshold_ms as i64),
            eviction_interval: Duration::from_millis(config.eviction_interval_ms),
        }
    }

    /// Atomically create or inspect the record for a key.
    ///
    /// The entry lock is held for the whole decision, so concurrent
    /// deliveries of the same key serialize here and exactly one of them
    /// observes `Fresh`.
    pub fn check_and_mark(&self, key: &str) -> DeliveryDecision {
        use dashmap::mapref::entry::Entry;

        let now = Utc::now();
        let mut occupied = match self.records.entry(key.to_string()) {
            Entry::Vacant(vacant) => {
                vacant.insert(DeliveryRecord::new(now));
                return DeliveryDecision::Fresh;
            }
            Entry::Occupied(occupied) => occupied,
        };
        let record = occupied.get_mut();

        record.last_seen_at = now;
        match record.status {
            DeliveryStatus::Completed => {
                if now - record.first_seen_at <= self.ttl {
                    DeliveryDecision::Duplicate(record.clone())
                } else {
                    // TTL elapsed: the record no longer vouches for the
                    // original side effect
                    *record = DeliveryRecord::new(now);
                    DeliveryDecision::Fresh
                }
            }
            DeliveryStatus::Failed => {
                *record = DeliveryRecord::new(now);
                DeliveryDecision::Fresh
            }
            DeliveryStatus::Pending => {
                if now - record.first_seen_at > self.stuck_threshold {
                    *record = DeliveryRecord::new(now);
                    DeliveryDecision::Reclaimed
                } else {
                    DeliveryDecision::InFlight
                }
            }
        }
    }

    /// Transition `Pending -> Completed`; called only after the handler
    /// returned success
    pub fn mark_completed(&self, key: &str) {
        self.mark_completed_with_hash(key, None);
    }

    pub fn mark_completed_with_hash(&self, key: &str, result_hash: Option<String>) {
        if let Some(mut record) = self.records.get_mut(key) {
            record.status = DeliveryStatus::Completed;
            record.last_seen_at = Utc::now();
            record.result_hash = result_hash;
        }
    }

    /// Mark a key as failed so a future redelivery is allowed to reprocess
    pub fn mark_failed(&self, key: &str) {
        if let Some(mut record) = self.records.get_mut(key) {
            record.status = DeliveryStatus::Failed;
            record.last_seen_at = Utc::now();
        }
    }

    /// Read-only record access for the rest of the system
    pub fn record(&self, key: &str) -> Option<DeliveryRecord> {
        self.records.get(key).map(|r| r.clone())
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Drop records whose TTL window has fully elapsed; returns how many
    /// were evicted
    pub fn evict_expired(&self) -> usize {
        let now = Utc::now();
        let ttl = self.ttl;
        let before = self.records.len();
        self.records.retain(|_, record| now - record.last_seen_at <= ttl);
        let evicted = before - self.records.len();
        if evicted > 0 {
            debug!(evicted, remaining = self.records.len(), "Evicted expired delivery records");
        }
        evicted
    }

    /// Spawn the periodic eviction sweep; stops on shutdown signal
    pub fn spawn_eviction_task(
        self: &Arc<Self>,
        mut shutdown: broadcast::Receiver<()>,
    ) -> JoinHandle<()> {
        let tracker = Arc::clone(self);
        let interval = tracker.eviction_interval;
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        tracker.evict_expired();
                    }
                    _ = shutdown.recv() => {
                        info!("Delivery tracker eviction task shutting down");
                        break;
                    }
                }
            }
        })
    }
}
