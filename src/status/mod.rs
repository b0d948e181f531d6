//! Live-status polling
//!
//! Polls the broadcaster's "what is on air" endpoint, caches the snapshot
//! for a short TTL, detects per-channel transitions against the previous
//! snapshot and fans change batches out to bounded subscriber queues.
//! A subscriber that cannot keep up is evicted rather than blocking the
//! poller.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use chrono::Local;
use serde::Deserialize;
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, warn};

use crate::config::StatusConfig;
use crate::models::{BroadcastState, ChannelStatusEntry, ScheduleInfo, StatusChange};
use crate::{catalog, errors::StatusError};

/// Capacity of each subscriber queue. Overflow evicts the subscriber.
const SUBSCRIBER_QUEUE_CAPACITY: usize = 50;

/// How soon after a failed fetch the next caller retries.
const FAILURE_RETRY_SECS: u64 = 1;

pub type ChangeBatch = Vec<StatusChange>;
pub type ChangeReceiver = mpsc::Receiver<ChangeBatch>;

#[derive(Debug, Deserialize)]
struct OnairRecord {
    #[serde(rename = "adCode", default)]
    ad_code: String,
    #[serde(rename = "kmsLivestatus", default)]
    live_status: i64,
    #[serde(rename = "adTh", default)]
    session_no: i64,
    #[serde(rename = "adCha", default)]
    session_order: i64,
}

struct Subscriber {
    id: u64,
    tx: mpsc::Sender<ChangeBatch>,
}

#[derive(Default)]
struct StatusInner {
    status: HashMap<String, BroadcastState>,
    schedule: HashMap<String, ScheduleInfo>,
    prev_status: HashMap<String, BroadcastState>,
    last_fetched: Option<Instant>,
    subscribers: Vec<Subscriber>,
    next_subscriber_id: u64,
}

#[derive(Clone)]
pub struct StatusService {
    config: StatusConfig,
    client: reqwest::Client,
    inner: Arc<Mutex<StatusInner>>,
}

impl StatusService {
    pub fn new(config: StatusConfig) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()?;
        Ok(Self {
            config,
            client,
            inner: Arc::new(Mutex::new(StatusInner::default())),
        })
    }

    /// Returns the current status snapshot, refreshing it when the cache
    /// TTL has expired. Concurrent callers coalesce on the inner lock:
    /// one request flies, everyone gets the same refreshed snapshot.
    pub async fn fetch_snapshot(&self) -> HashMap<String, BroadcastState> {
        let ttl = Duration::from_secs(self.config.cache_ttl_secs);
        let mut inner = self.inner.lock().await;

        let fresh = inner
            .last_fetched
            .map(|at| at.elapsed() < ttl && !inner.status.is_empty())
            .unwrap_or(false);
        if fresh {
            return inner.status.clone();
        }

        inner.prev_status = inner.status.clone();
        match self.fetch_onair().await {
            Ok(records) => {
                let mut status = HashMap::new();
                let mut schedule = HashMap::new();
                for record in records {
                    if record.ad_code.is_empty() {
                        continue;
                    }
                    status.insert(
                        record.ad_code.clone(),
                        BroadcastState::from_code(record.live_status),
                    );
                    schedule.insert(
                        record.ad_code,
                        ScheduleInfo {
                            session_no: record.session_no,
                            session_order: record.session_order,
                        },
                    );
                }
                inner.status = status;
                inner.schedule = schedule;
                inner.last_fetched = Some(Instant::now());

                let changes = detect_changes(&inner.prev_status, &inner.status);
                if !changes.is_empty() {
                    debug!("Broadcast status changed: {} transition(s)", changes.len());
                    Self::publish(&mut inner.subscribers, changes);
                }
            }
            Err(e) => {
                warn!("On-air status fetch failed: {}", e);
                // Keep the prior snapshot; rewind the timestamp so the
                // next caller retries shortly instead of after a full TTL.
                let retry_in = ttl.saturating_sub(Duration::from_secs(FAILURE_RETRY_SECS));
                inner.last_fetched = Instant::now().checked_sub(retry_in);
            }
        }

        inner.status.clone()
    }

    async fn fetch_onair(&self) -> Result<Vec<OnairRecord>, StatusError> {
        let ymd = Local::now().format("%Y-%m-%d").to_string();
        let response = self
            .client
            .post(&self.config.onair_url)
            .form(&[("ymd", ymd.as_str())])
            .header("Referer", &self.config.referer)
            .header("X-Requested-With", "XMLHttpRequest")
            .header("User-Agent", "Mozilla/5.0 (Windows NT 10.0; Win64; x64)")
            .header("Accept", "application/json, text/javascript, */*; q=0.01")
            .send()
            .await?
            .error_for_status()?;

        // An HTML error page surfaces here as a JSON parse failure.
        response
            .json::<Vec<OnairRecord>>()
            .await
            .map_err(|e| StatusError::UnexpectedResponse {
                message: e.to_string(),
            })
    }

    fn publish(subscribers: &mut Vec<Subscriber>, changes: ChangeBatch) {
        subscribers.retain(|sub| match sub.tx.try_send(changes.clone()) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(_)) => {
                warn!("Status subscriber {} overflowed, dropping it", sub.id);
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => false,
        });
    }

    /// Registers a bounded change-batch queue. Returns the subscriber id
    /// (for `unsubscribe`) and the receiving end.
    pub async fn subscribe(&self) -> (u64, ChangeReceiver) {
        let mut inner = self.inner.lock().await;
        let id = inner.next_subscriber_id;
        inner.next_subscriber_id += 1;
        let (tx, rx) = mpsc::channel(SUBSCRIBER_QUEUE_CAPACITY);
        inner.subscribers.push(Subscriber { id, tx });
        (id, rx)
    }

    pub async fn unsubscribe(&self, id: u64) {
        let mut inner = self.inner.lock().await;
        inner.subscribers.retain(|sub| sub.id != id);
    }

    /// The full catalog merged with the latest broadcast state. The
    /// `stt_running` flag is filled in by the caller.
    pub async fn channels_with_status(&self) -> Vec<ChannelStatusEntry> {
        let status = self.fetch_snapshot().await;
        let schedule = {
            let inner = self.inner.lock().await;
            inner.schedule.clone()
        };

        catalog::all()
            .iter()
            .map(|ch| {
                let state = status
                    .get(ch.code)
                    .copied()
                    .unwrap_or(BroadcastState::NoBroadcast);
                let sched = schedule.get(ch.code);
                ChannelStatusEntry {
                    id: ch.id.to_string(),
                    name: ch.name.to_string(),
                    code: ch.code.to_string(),
                    stream_url: ch.stream_url.to_string(),
                    livestatus: state,
                    status_text: state.text().to_string(),
                    has_schedule: sched.is_some(),
                    session_no: sched.map(|s| s.session_no),
                    session_order: sched.map(|s| s.session_order),
                    stt_running: false,
                }
            })
            .collect()
    }

    #[cfg(test)]
    async fn seed_snapshot(&self, status: HashMap<String, BroadcastState>) {
        let mut inner = self.inner.lock().await;
        inner.prev_status = inner.status.clone();
        inner.status = status;
        inner.last_fetched = Some(Instant::now());
    }

    #[cfg(test)]
    async fn publish_detected(&self) -> ChangeBatch {
        let mut inner = self.inner.lock().await;
        let changes = detect_changes(&inner.prev_status, &inner.status);
        if !changes.is_empty() {
            Self::publish(&mut inner.subscribers, changes.clone());
        }
        changes
    }

    #[cfg(test)]
    async fn subscriber_count(&self) -> usize {
        self.inner.lock().await.subscribers.len()
    }
}

/// Transitions between two snapshots, over the union of their keys.
pub fn detect_changes(
    prev: &HashMap<String, BroadcastState>,
    next: &HashMap<String, BroadcastState>,
) -> Vec<StatusChange> {
    let mut changes = Vec::new();
    let mut codes: Vec<&String> = prev.keys().chain(next.keys()).collect();
    codes.sort();
    codes.dedup();

    for code in codes {
        let old = prev.get(code).copied();
        let new = next.get(code).copied();
        if old != new {
            changes.push(StatusChange {
                code: code.clone(),
                old_status: old,
                new_status: new,
                old_text: old.map(|s| s.text().to_string()),
                new_text: new.map(|s| s.text().to_string()),
            });
        }
    }
    changes
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snapshot(pairs: &[(&str, BroadcastState)]) -> HashMap<String, BroadcastState> {
        pairs
            .iter()
            .map(|(code, state)| (code.to_string(), *state))
            .collect()
    }

    #[test]
    fn identical_snapshots_produce_no_changes() {
        let a = snapshot(&[("A011", BroadcastState::Live), ("C001", BroadcastState::Pre)]);
        assert!(detect_changes(&a, &a).is_empty());
    }

    #[test]
    fn diff_applied_to_old_yields_new() {
        let old = snapshot(&[("A011", BroadcastState::Live), ("C001", BroadcastState::Pre)]);
        let new = snapshot(&[
            ("A011", BroadcastState::Recess),
            ("C001", BroadcastState::Pre),
            ("C105", BroadcastState::Live),
        ]);

        let changes = detect_changes(&old, &new);
        assert_eq!(changes.len(), 2);

        let mut rebuilt = old.clone();
        for change in &changes {
            match change.new_status {
                Some(state) => {
                    rebuilt.insert(change.code.clone(), state);
                }
                None => {
                    rebuilt.remove(&change.code);
                }
            }
        }
        assert_eq!(rebuilt, new);
    }

    #[test]
    fn disappearing_channel_is_a_change() {
        let old = snapshot(&[("A011", BroadcastState::Live)]);
        let new = snapshot(&[]);
        let changes = detect_changes(&old, &new);
        assert_eq!(changes.len(), 1);
        assert_eq!(changes[0].old_status, Some(BroadcastState::Live));
        assert_eq!(changes[0].new_status, None);
    }

    fn test_config() -> StatusConfig {
        StatusConfig {
            onair_url: "https://live.example/onair".to_string(),
            referer: "https://live.example/".to_string(),
            cache_ttl_secs: 5,
            request_timeout_secs: 10,
        }
    }

    #[tokio::test]
    async fn subscribers_receive_change_batches() {
        let service = StatusService::new(test_config()).unwrap();
        let (_id, mut rx) = service.subscribe().await;

        service
            .seed_snapshot(snapshot(&[("A011", BroadcastState::Live)]))
            .await;
        let changes = service.publish_detected().await;
        assert_eq!(changes.len(), 1);

        let received = rx.recv().await.unwrap();
        assert_eq!(received[0].code, "A011");
        assert_eq!(received[0].new_status, Some(BroadcastState::Live));
    }

    #[tokio::test]
    async fn overflowing_subscriber_is_evicted() {
        let service = StatusService::new(test_config()).unwrap();
        let (_id, _rx) = service.subscribe().await;
        assert_eq!(service.subscriber_count().await, 1);

        // Alternate two snapshots without draining the queue until the
        // bounded channel overflows and the subscriber is dropped.
        for i in 0..=SUBSCRIBER_QUEUE_CAPACITY {
            let state = if i % 2 == 0 {
                BroadcastState::Live
            } else {
                BroadcastState::Recess
            };
            service.seed_snapshot(snapshot(&[("A011", state)])).await;
            service.publish_detected().await;
        }
        assert_eq!(service.subscriber_count().await, 0);
    }

    #[tokio::test]
    async fn unsubscribe_removes_queue() {
        let service = StatusService::new(test_config()).unwrap();
        let (id, _rx) = service.subscribe().await;
        service.unsubscribe(id).await;
        assert_eq!(service.subscriber_count().await, 0);
    }

    #[tokio::test]
    async fn channels_with_status_covers_whole_catalog() {
        let service = StatusService::new(test_config()).unwrap();
        service
            .seed_snapshot(snapshot(&[("A011", BroadcastState::Live)]))
            .await;
        let entries = service.channels_with_status().await;
        assert_eq!(entries.len(), crate::catalog::all().len());

        let main_hall = entries.iter().find(|e| e.code == "A011").unwrap();
        assert_eq!(main_hall.livestatus, BroadcastState::Live);
        assert_eq!(main_hall.id, "ch14");

        let other = entries.iter().find(|e| e.code == "C001").unwrap();
        assert_eq!(other.livestatus, BroadcastState::NoBroadcast);
    }
}
