//! Auto-STT supervision
//!
//! Reconciles the set of running live caption workers with the set of
//! currently broadcasting channels. Three mechanisms:
//!
//! 1. startup sweep: start a worker for every channel already live
//! 2. monitor loop: react to status transitions from the poller
//! 3. opportunistic reconciliation: the status endpoint calls
//!    `ensure_workers_for_live_channels` as a side effect
//!
//! Start/stop failures are logged and never propagated.

use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::{error, info, warn};

use crate::catalog::{self, Channel};
use crate::models::{BroadcastState, StatusChange};
use crate::status::StatusService;
use crate::stt::LiveCaptionService;

struct MonitorHandle {
    subscriber_id: u64,
    task: tokio::task::JoinHandle<()>,
}

pub struct AutoSttSupervisor {
    status: StatusService,
    stt: LiveCaptionService,
    enabled: bool,
    monitor: Mutex<Option<MonitorHandle>>,
}

/// Channels to start and stop for a batch of status transitions.
/// Channels with unknown upstream codes are ignored.
pub fn plan_transitions(changes: &[StatusChange]) -> (Vec<&'static Channel>, Vec<&'static Channel>) {
    let mut to_start = Vec::new();
    let mut to_stop = Vec::new();
    for change in changes {
        let Some(channel) = catalog::by_code(&change.code) else {
            continue;
        };
        let was_live = change.old_status.map(|s| s.is_live()).unwrap_or(false);
        let is_live = change.new_status.map(|s| s.is_live()).unwrap_or(false);
        if is_live && !was_live {
            to_start.push(channel);
        } else if was_live && !is_live {
            to_stop.push(channel);
        }
    }
    (to_start, to_stop)
}

impl AutoSttSupervisor {
    pub fn new(
        status: StatusService,
        stt: LiveCaptionService,
        asr_configured: bool,
        auto_start: bool,
    ) -> Arc<Self> {
        let enabled = asr_configured && auto_start;
        Arc::new(Self {
            status,
            stt,
            enabled,
            monitor: Mutex::new(None),
        })
    }

    pub fn enabled(&self) -> bool {
        self.enabled
    }

    /// Startup sweep plus the monitor loop.
    pub async fn start(self: &Arc<Self>) {
        if !self.enabled {
            info!("Auto-STT supervisor disabled (credential or auto_start missing)");
            return;
        }
        info!("Auto-STT supervisor starting: reconciling broadcasting channels");

        self.start_workers_for_live_channels().await;

        let (subscriber_id, mut rx) = self.status.subscribe().await;
        let supervisor = Arc::clone(self);
        let task = tokio::spawn(async move {
            while let Some(changes) = rx.recv().await {
                supervisor.handle_status_changes(&changes).await;
            }
        });

        let mut monitor = self.monitor.lock().await;
        *monitor = Some(MonitorHandle {
            subscriber_id,
            task,
        });
    }

    /// Cancels the monitor loop, then stops every running worker.
    pub async fn shutdown(&self) {
        let handle = {
            let mut monitor = self.monitor.lock().await;
            monitor.take()
        };
        if let Some(handle) = handle {
            handle.task.abort();
            self.status.unsubscribe(handle.subscriber_id).await;
        }
        self.stt.stop_all().await;
        info!("Auto-STT supervisor stopped (all channel workers cleaned up)");
    }

    /// Starts workers that should be running but aren't. Never stops
    /// anything. Returns the channel ids newly started.
    pub async fn ensure_workers_for_live_channels(&self) -> Vec<String> {
        if !self.enabled {
            return Vec::new();
        }

        let mut started = Vec::new();
        let snapshot = self.status.fetch_snapshot().await;
        for channel in catalog::all() {
            let live = snapshot
                .get(channel.code)
                .map(|s| s.is_live())
                .unwrap_or(false);
            if live && !self.stt.is_running(channel.id).await {
                info!(
                    "Auto-STT: starting worker for live channel {} ({}) - detected via polling",
                    channel.id, channel.name
                );
                match self.stt.start(channel.id, channel.stream_url).await {
                    Ok(()) => started.push(channel.id.to_string()),
                    Err(e) => error!("Auto-STT: failed to start {}: {}", channel.id, e),
                }
            }
        }
        started
    }

    async fn start_workers_for_live_channels(&self) {
        let snapshot = self.status.fetch_snapshot().await;
        let mut started = 0usize;
        for channel in catalog::all() {
            let state = snapshot
                .get(channel.code)
                .copied()
                .unwrap_or(BroadcastState::NoBroadcast);
            if !state.is_live() {
                continue;
            }
            if self.stt.is_running(channel.id).await {
                continue;
            }
            info!(
                "Auto-STT: starting worker for live channel {} ({})",
                channel.id, channel.name
            );
            match self.stt.start(channel.id, channel.stream_url).await {
                Ok(()) => started += 1,
                Err(e) => error!("Auto-STT: failed to start {}: {}", channel.id, e),
            }
        }
        if started > 0 {
            info!("Auto-STT: started workers for {} broadcasting channel(s)", started);
        } else {
            info!("Auto-STT: no broadcasting channels found at startup");
        }
    }

    async fn handle_status_changes(&self, changes: &[StatusChange]) {
        let (to_start, to_stop) = plan_transitions(changes);

        for channel in to_start {
            if self.stt.is_running(channel.id).await {
                continue;
            }
            info!(
                "Auto-STT: channel {} ({}) started broadcasting -> starting worker",
                channel.id, channel.name
            );
            if let Err(e) = self.stt.start(channel.id, channel.stream_url).await {
                error!("Auto-STT: failed to start {}: {}", channel.id, e);
            }
        }

        for channel in to_stop {
            if !self.stt.is_running(channel.id).await {
                continue;
            }
            info!(
                "Auto-STT: channel {} ({}) stopped broadcasting -> stopping worker",
                channel.id, channel.name
            );
            self.stt.stop(channel.id).await;
        }

        if changes.iter().any(|c| catalog::by_code(&c.code).is_none()) {
            warn!("Auto-STT: ignored status change(s) for unknown upstream code");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn change(
        code: &str,
        old: Option<BroadcastState>,
        new: Option<BroadcastState>,
    ) -> StatusChange {
        StatusChange {
            code: code.to_string(),
            old_status: old,
            new_status: new,
            old_text: old.map(|s| s.text().to_string()),
            new_text: new.map(|s| s.text().to_string()),
        }
    }

    #[test]
    fn going_live_plans_a_start() {
        let changes = vec![change(
            "A011",
            Some(BroadcastState::Pre),
            Some(BroadcastState::Live),
        )];
        let (to_start, to_stop) = plan_transitions(&changes);
        assert_eq!(to_start.len(), 1);
        assert_eq!(to_start[0].id, "ch14");
        assert!(to_stop.is_empty());
    }

    #[test]
    fn appearing_as_live_plans_a_start() {
        let changes = vec![change("A011", None, Some(BroadcastState::Live))];
        let (to_start, _) = plan_transitions(&changes);
        assert_eq!(to_start.len(), 1);
    }

    #[test]
    fn leaving_live_plans_a_stop() {
        let changes = vec![change(
            "A011",
            Some(BroadcastState::Live),
            Some(BroadcastState::Recess),
        )];
        let (to_start, to_stop) = plan_transitions(&changes);
        assert!(to_start.is_empty());
        assert_eq!(to_stop.len(), 1);
        assert_eq!(to_stop[0].id, "ch14");
    }

    #[test]
    fn non_live_transitions_are_ignored() {
        let changes = vec![change(
            "A011",
            Some(BroadcastState::Pre),
            Some(BroadcastState::Recess),
        )];
        let (to_start, to_stop) = plan_transitions(&changes);
        assert!(to_start.is_empty());
        assert!(to_stop.is_empty());
    }

    #[test]
    fn unknown_codes_are_ignored() {
        let changes = vec![change(
            "Z999",
            Some(BroadcastState::Pre),
            Some(BroadcastState::Live),
        )];
        let (to_start, to_stop) = plan_transitions(&changes);
        assert!(to_start.is_empty());
        assert!(to_stop.is_empty());
    }

    #[test]
    fn disappearing_live_channel_plans_a_stop() {
        let changes = vec![change("A011", Some(BroadcastState::Live), None)];
        let (_, to_stop) = plan_transitions(&changes);
        assert_eq!(to_stop.len(), 1);
    }
}
