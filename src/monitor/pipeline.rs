//! Single entry point for monitoring events.
//!
//! `emit` routes an event through dedup (and optionally a debounce timer) to
//! the [`ConnectionSupervisor`]. The typed `participant_*` helpers build the
//! events and pick the delivery policy for each kind.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, warn};

use super::debounce::{DebounceKey, DebounceRegistry};
use super::dedup::{DEFAULT_DEDUP_CAPACITY, EventIdentity, RecentIdentities};
use super::events::{
    CompletedData, DisqualificationKind, DisqualifiedData, ErrorData, LoginData,
    MonitoringEvent, QuotaExceededData, ResponseSavedData, SessionScope, StepProgressData,
};
use super::supervisor::{ConnectionState, ConnectionSupervisor, Delivery, SupervisorConfig};
use super::transport::Transport;
use crate::errors::MonitorError;

const SETTLE_POLL: Duration = Duration::from_millis(25);

/// How `emit` should deliver an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryPolicy {
    Immediate,
    /// Collapse bursts for the same key; only the last event survives.
    Debounced(Duration),
}

/// Result of a single `emit`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EmitOutcome {
    Sent,
    Queued,
    Dropped,
    /// Identical to an event already delivered, or filtered as insignificant.
    Suppressed,
    /// Waiting on a debounce timer.
    Scheduled,
}

impl From<Delivery> for EmitOutcome {
    fn from(delivery: Delivery) -> Self {
        match delivery {
            Delivery::Sent => EmitOutcome::Sent,
            Delivery::Queued => EmitOutcome::Queued,
            Delivery::Dropped => EmitOutcome::Dropped,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct DeliverySettings {
    pub step_progress_debounce: Duration,
    pub response_saved_debounce: Duration,
    pub dedup_capacity: usize,
    /// Progress changes smaller than this on the same step are not reported.
    /// 0 disables the filter.
    pub min_progress_delta: u8,
    pub supervisor: SupervisorConfig,
}

impl Default for DeliverySettings {
    fn default() -> Self {
        Self {
            step_progress_debounce: Duration::from_millis(2_000),
            response_saved_debounce: Duration::from_millis(500),
            dedup_capacity: DEFAULT_DEDUP_CAPACITY,
            min_progress_delta: 0,
            supervisor: SupervisorConfig::default(),
        }
    }
}

/// Per-session delivery context.
pub struct EventDeliveryPipeline {
    scope: SessionScope,
    transport: Arc<dyn Transport>,
    settings: DeliverySettings,
    supervisor: ConnectionSupervisor,
    recent: Arc<Mutex<RecentIdentities>>,
    debounce: DebounceRegistry,
    login_sent: bool,
    last_step: Option<(String, u8)>,
}

impl EventDeliveryPipeline {
    /// Spawn a supervisor for `scope` and start connecting.
    pub fn start(
        scope: SessionScope,
        transport: Arc<dyn Transport>,
        settings: DeliverySettings,
    ) -> Result<Self, MonitorError> {
        let supervisor =
            ConnectionSupervisor::spawn(scope.clone(), Arc::clone(&transport), settings.supervisor);
        supervisor.connect()?;
        Ok(Self {
            scope,
            transport,
            settings,
            supervisor,
            recent: Arc::new(Mutex::new(RecentIdentities::new(settings.dedup_capacity))),
            debounce: DebounceRegistry::new(),
            login_sent: false,
            last_step: None,
        })
    }

    pub fn scope(&self) -> &SessionScope {
        &self.scope
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.supervisor.state()
    }

    pub fn subscribe_state(&self) -> watch::Receiver<ConnectionState> {
        self.supervisor.subscribe()
    }

    pub fn queue_len(&self) -> usize {
        self.supervisor.queue_len()
    }

    /// Debounced events the supervisor has not accepted yet.
    pub fn pending_debounced(&self) -> usize {
        self.debounce.pending()
    }

    pub fn settings(&self) -> &DeliverySettings {
        &self.settings
    }

    pub async fn emit(
        &self,
        event: MonitoringEvent,
        policy: DeliveryPolicy,
    ) -> Result<EmitOutcome, MonitorError> {
        if !event.is_in_scope(&self.scope) {
            return Err(MonitorError::ScopeMismatch {
                expected: self.scope.to_string(),
                found: format!("{}/{}", event.research_id(), event.participant_id()),
            });
        }

        match policy {
            DeliveryPolicy::Immediate => deliver(&self.recent, &self.supervisor, event).await,
            DeliveryPolicy::Debounced(delay) => {
                let key = DebounceKey::of(&event);
                debug!(
                    event_type = %event.kind(),
                    key = %key.secondary,
                    delay_ms = delay.as_millis() as u64,
                    "event debounced"
                );
                let recent = Arc::clone(&self.recent);
                let supervisor = self.supervisor.clone();
                self.debounce.debounce(key, delay, async move {
                    let kind = event.kind();
                    if let Err(e) = deliver(&recent, &supervisor, event).await {
                        warn!(event_type = %kind, error = %e, "debounced event not delivered");
                    }
                });
                Ok(EmitOutcome::Scheduled)
            }
        }
    }

    // ── Typed helpers ────────────────────────────────────────────────

    /// Sent at most once per session.
    pub async fn participant_login(
        &mut self,
        email: Option<String>,
        user_agent: Option<String>,
    ) -> Result<EmitOutcome, MonitorError> {
        if self.login_sent {
            debug!("login already reported");
            return Ok(EmitOutcome::Suppressed);
        }
        let event = MonitoringEvent::Login(LoginData {
            meta: self.scope.meta_now(),
            email,
            user_agent,
        });
        let outcome = self.emit(event, DeliveryPolicy::Immediate).await?;
        if outcome != EmitOutcome::Dropped {
            self.login_sent = true;
        }
        Ok(outcome)
    }

    pub async fn participant_step(
        &mut self,
        step_name: &str,
        step_number: u32,
        total_steps: u32,
        progress: u8,
        duration: Option<u64>,
    ) -> Result<EmitOutcome, MonitorError> {
        let min_delta = self.settings.min_progress_delta;
        if let Some((last_step, last_progress)) = &self.last_step {
            if min_delta > 0 && last_step == step_name && last_progress.abs_diff(progress) < min_delta
            {
                debug!(step_name, progress, "progress change below threshold");
                return Ok(EmitOutcome::Suppressed);
            }
        }

        let event = MonitoringEvent::StepProgress(StepProgressData {
            meta: self.scope.meta_now(),
            step_name: step_name.to_string(),
            step_number,
            total_steps,
            progress: progress.min(100),
            duration,
        });
        let delay = self.settings.step_progress_debounce;
        let outcome = self.emit(event, DeliveryPolicy::Debounced(delay)).await?;
        self.last_step = Some((step_name.to_string(), progress));
        Ok(outcome)
    }

    pub async fn response_saved(
        &self,
        question_key: &str,
        response: serde_json::Value,
        step_number: u32,
        total_steps: u32,
        progress: u8,
    ) -> Result<EmitOutcome, MonitorError> {
        let event = MonitoringEvent::ResponseSaved(ResponseSavedData {
            meta: self.scope.meta_now(),
            question_key: question_key.to_string(),
            response,
            step_number,
            total_steps,
            progress: progress.min(100),
        });
        let delay = self.settings.response_saved_debounce;
        self.emit(event, DeliveryPolicy::Debounced(delay)).await
    }

    pub async fn participant_completed(
        &self,
        total_duration: u64,
        responses_count: u32,
    ) -> Result<EmitOutcome, MonitorError> {
        let event = MonitoringEvent::Completed(CompletedData {
            meta: self.scope.meta_now(),
            total_duration,
            responses_count,
        });
        self.emit(event, DeliveryPolicy::Immediate).await
    }

    pub async fn participant_disqualified(
        &self,
        reason: &str,
        demographic_data: BTreeMap<String, String>,
        kind: DisqualificationKind,
    ) -> Result<EmitOutcome, MonitorError> {
        let event = MonitoringEvent::Disqualified(DisqualifiedData {
            meta: self.scope.meta_now(),
            reason: reason.to_string(),
            demographic_data,
            disqualification_type: kind,
        });
        self.emit(event, DeliveryPolicy::Immediate).await
    }

    pub async fn quota_exceeded(
        &self,
        quota_type: &str,
        quota_value: &str,
        current_count: u32,
        max_quota: u32,
        demographic_data: BTreeMap<String, String>,
    ) -> Result<EmitOutcome, MonitorError> {
        let event = MonitoringEvent::QuotaExceeded(QuotaExceededData {
            meta: self.scope.meta_now(),
            quota_type: quota_type.to_string(),
            quota_value: quota_value.to_string(),
            current_count,
            max_quota,
            demographic_data,
        });
        self.emit(event, DeliveryPolicy::Immediate).await
    }

    pub async fn participant_error(
        &self,
        error: &str,
        step_name: Option<&str>,
    ) -> Result<EmitOutcome, MonitorError> {
        let event = MonitoringEvent::Error(ErrorData {
            meta: self.scope.meta_now(),
            error: error.to_string(),
            step_name: step_name.map(str::to_string),
        });
        self.emit(event, DeliveryPolicy::Immediate).await
    }

    // ── Lifecycle ────────────────────────────────────────────────────

    /// Tear down the current session and start delivering for `scope`.
    ///
    /// Pending debounced events, queued events, dedup history and login
    /// state of the old session are discarded. Returns the number of queued
    /// events that were dropped.
    pub async fn switch_session(&mut self, scope: SessionScope) -> Result<usize, MonitorError> {
        if scope == self.scope {
            return Ok(0);
        }
        let discarded = self.teardown("session switched").await?;

        debug!(from = %self.scope, to = %scope, discarded, "switching monitoring session");
        self.supervisor = ConnectionSupervisor::spawn(
            scope.clone(),
            Arc::clone(&self.transport),
            self.settings.supervisor,
        );
        self.scope = scope;
        self.recent = Arc::new(Mutex::new(RecentIdentities::new(
            self.settings.dedup_capacity,
        )));
        self.debounce = DebounceRegistry::new();
        self.login_sent = false;
        self.last_step = None;
        self.supervisor.connect()?;
        Ok(discarded)
    }

    /// Wait until every debounced event has fired and the offline queue is
    /// empty on a live connection. Returns `false` if `timeout` ran out first.
    pub async fn settle(&self, timeout: Duration) -> bool {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            if self.pending_debounced() == 0
                && self.queue_len() == 0
                && self.connection_state() == ConnectionState::Connected
            {
                return true;
            }
            if tokio::time::Instant::now() >= deadline {
                return false;
            }
            tokio::time::sleep(SETTLE_POLL).await;
        }
    }

    /// Cancel pending timers and close the connection normally.
    pub async fn shutdown(self, reason: &str) -> Result<usize, MonitorError> {
        self.teardown(reason).await
    }

    async fn teardown(&self, reason: &str) -> Result<usize, MonitorError> {
        self.debounce.cancel_all();
        match self.supervisor.disconnect(reason).await {
            Ok(discarded) => Ok(discarded),
            Err(MonitorError::SupervisorStopped) => Ok(0),
            Err(e) => Err(e),
        }
    }
}

impl std::fmt::Debug for EventDeliveryPipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventDeliveryPipeline")
            .field("scope", &self.scope)
            .field("supervisor", &self.supervisor)
            .field("debounce", &self.debounce)
            .field("login_sent", &self.login_sent)
            .finish()
    }
}

fn lock(recent: &Mutex<RecentIdentities>) -> MutexGuard<'_, RecentIdentities> {
    match recent.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

/// Dedup, then hand to the supervisor. Only events the supervisor sent or
/// queued stay in the dedup window.
async fn deliver(
    recent: &Mutex<RecentIdentities>,
    supervisor: &ConnectionSupervisor,
    event: MonitoringEvent,
) -> Result<EmitOutcome, MonitorError> {
    let fresh = lock(recent).should_send(&event);
    if !fresh {
        debug!(event_type = %event.kind(), "duplicate event suppressed");
        return Ok(EmitOutcome::Suppressed);
    }
    let identity = EventIdentity::of(&event);
    match supervisor.send(event).await {
        Ok(Delivery::Dropped) => {
            lock(recent).forget(&identity);
            Ok(EmitOutcome::Dropped)
        }
        Ok(delivery) => Ok(delivery.into()),
        Err(e) => {
            lock(recent).forget(&identity);
            Err(e)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::monitor::events::EventKind;
    use crate::monitor::memory::MemoryTransport;

    fn scope(participant: &str) -> SessionScope {
        SessionScope::new("research-1", participant).unwrap()
    }

    async fn connected_pipeline(
        transport: &MemoryTransport,
        settings: DeliverySettings,
    ) -> EventDeliveryPipeline {
        let pipeline =
            EventDeliveryPipeline::start(scope("p1"), Arc::new(transport.clone()), settings)
                .unwrap();
        let mut state = pipeline.subscribe_state();
        state
            .wait_for(|s| *s == ConnectionState::Connected)
            .await
            .unwrap();
        pipeline
    }

    fn step_events(transport: &MemoryTransport) -> Vec<StepProgressData> {
        transport
            .events()
            .into_iter()
            .filter_map(|event| match event {
                MonitoringEvent::StepProgress(d) => Some(d),
                _ => None,
            })
            .collect()
    }

    #[tokio::test(start_paused = true)]
    async fn test_same_event_twice_is_transmitted_once() {
        let transport = MemoryTransport::new();
        let pipeline = connected_pipeline(&transport, DeliverySettings::default()).await;

        let event = MonitoringEvent::Error(ErrorData {
            meta: pipeline.scope().meta_now(),
            error: "timeout".to_string(),
            step_name: None,
        });
        let first = pipeline
            .emit(event.clone(), DeliveryPolicy::Immediate)
            .await
            .unwrap();
        let second = pipeline.emit(event, DeliveryPolicy::Immediate).await.unwrap();

        assert_eq!(first, EmitOutcome::Sent);
        assert_eq!(second, EmitOutcome::Suppressed);
        let errors = transport
            .events()
            .iter()
            .filter(|e| e.kind() == EventKind::Error)
            .count();
        assert_eq!(errors, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_step_burst_delivers_last_progress_only() {
        let transport = MemoryTransport::new();
        let mut pipeline = connected_pipeline(&transport, DeliverySettings::default()).await;

        let first = pipeline
            .participant_step("csat", 2, 5, 10, None)
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(500)).await;
        pipeline
            .participant_step("csat", 2, 5, 12, None)
            .await
            .unwrap();
        assert_eq!(first, EmitOutcome::Scheduled);
        assert_eq!(pipeline.pending_debounced(), 1);

        tokio::time::sleep(Duration::from_millis(2_500)).await;
        let steps = step_events(&transport);
        assert_eq!(steps.len(), 1);
        assert_eq!(steps[0].progress, 12);
        assert_eq!(pipeline.pending_debounced(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_progress_for_different_steps_does_not_collapse() {
        let transport = MemoryTransport::new();
        let mut pipeline = connected_pipeline(&transport, DeliverySettings::default()).await;

        pipeline.participant_step("csat", 1, 2, 50, None).await.unwrap();
        pipeline.participant_step("nps", 2, 2, 100, None).await.unwrap();
        tokio::time::sleep(Duration::from_millis(2_500)).await;

        let mut names: Vec<_> = step_events(&transport)
            .into_iter()
            .map(|d| d.step_name)
            .collect();
        names.sort();
        assert_eq!(names, vec!["csat", "nps"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_min_progress_delta_filters_small_changes() {
        let transport = MemoryTransport::new();
        let settings = DeliverySettings {
            min_progress_delta: 5,
            ..Default::default()
        };
        let mut pipeline = connected_pipeline(&transport, settings).await;

        pipeline.participant_step("csat", 1, 3, 10, None).await.unwrap();
        let small = pipeline.participant_step("csat", 1, 3, 12, None).await.unwrap();
        assert_eq!(small, EmitOutcome::Suppressed);

        tokio::time::sleep(Duration::from_millis(2_500)).await;
        let steps = step_events(&transport);
        assert_eq!(steps.len(), 1);
        assert_eq!(steps[0].progress, 10);
    }

    #[tokio::test(start_paused = true)]
    async fn test_login_is_reported_once() {
        let transport = MemoryTransport::new();
        let mut pipeline = connected_pipeline(&transport, DeliverySettings::default()).await;

        let first = pipeline.participant_login(None, None).await.unwrap();
        let second = pipeline
            .participant_login(Some("a@b.c".to_string()), None)
            .await
            .unwrap();
        assert_eq!(first, EmitOutcome::Sent);
        assert_eq!(second, EmitOutcome::Suppressed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_offline_emits_are_queued() {
        let transport = MemoryTransport::offline();
        let pipeline = EventDeliveryPipeline::start(
            scope("p1"),
            Arc::new(transport.clone()),
            DeliverySettings::default(),
        )
        .unwrap();

        let outcome = pipeline.participant_completed(120, 4).await.unwrap();
        assert_eq!(outcome, EmitOutcome::Queued);
        assert_eq!(pipeline.queue_len(), 1);
        assert_ne!(pipeline.connection_state(), ConnectionState::Connected);
    }

    #[tokio::test(start_paused = true)]
    async fn test_event_rejected_by_full_queue_can_be_retried() {
        use crate::monitor::supervisor::{OverflowPolicy, QueueLimit};
        use chrono::{TimeZone, Utc};

        let transport = MemoryTransport::offline();
        let mut settings = DeliverySettings::default();
        settings.supervisor.queue = QueueLimit {
            max_len: 1,
            overflow: OverflowPolicy::RejectNew,
        };
        let pipeline =
            EventDeliveryPipeline::start(scope("p1"), Arc::new(transport.clone()), settings)
                .unwrap();

        let error_at = |second: u32, label: &str| {
            let at = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, second).unwrap();
            MonitoringEvent::Error(ErrorData {
                meta: pipeline.scope().meta_at(at),
                error: label.to_string(),
                step_name: None,
            })
        };
        let filler = error_at(0, "filler");
        let rejected = error_at(1, "rejected");

        let queued = pipeline.emit(filler, DeliveryPolicy::Immediate).await.unwrap();
        assert_eq!(queued, EmitOutcome::Queued);
        for _ in 0..2 {
            let outcome = pipeline
                .emit(rejected.clone(), DeliveryPolicy::Immediate)
                .await
                .unwrap();
            assert_eq!(outcome, EmitOutcome::Dropped);
        }

        transport.set_online(true);
        let mut state = pipeline.subscribe_state();
        state
            .wait_for(|s| *s == ConnectionState::Connected)
            .await
            .unwrap();
        let retried = pipeline.emit(rejected, DeliveryPolicy::Immediate).await.unwrap();
        assert_eq!(retried, EmitOutcome::Sent);

        let labels: Vec<_> = transport
            .events()
            .into_iter()
            .filter_map(|event| match event {
                MonitoringEvent::Error(d) => Some(d.error),
                _ => None,
            })
            .collect();
        assert_eq!(labels, vec!["filler", "rejected"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_out_of_scope_event_is_rejected() {
        let transport = MemoryTransport::new();
        let pipeline = connected_pipeline(&transport, DeliverySettings::default()).await;

        let foreign = MonitoringEvent::connect(&scope("someone-else"));
        let err = pipeline
            .emit(foreign, DeliveryPolicy::Immediate)
            .await
            .unwrap_err();
        assert!(matches!(err, MonitorError::ScopeMismatch { .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn test_switch_session_drops_pending_and_resets_state() {
        let transport = MemoryTransport::new();
        let mut pipeline = connected_pipeline(&transport, DeliverySettings::default()).await;
        pipeline.participant_login(None, None).await.unwrap();
        pipeline.participant_step("csat", 1, 2, 50, None).await.unwrap();

        pipeline.switch_session(scope("p2")).await.unwrap();
        assert_eq!(pipeline.pending_debounced(), 0);
        assert_eq!(transport.client_closes()[0].code, 1000);

        let mut state = pipeline.subscribe_state();
        state
            .wait_for(|s| *s == ConnectionState::Connected)
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(2_500)).await;

        // The debounced step for p1 never reached the observer.
        assert!(step_events(&transport).is_empty());
        assert_eq!(
            pipeline.participant_login(None, None).await.unwrap(),
            EmitOutcome::Sent
        );
        let logins: Vec<_> = transport
            .events()
            .into_iter()
            .filter(|e| e.kind() == EventKind::Login)
            .map(|e| e.participant_id().to_string())
            .collect();
        assert_eq!(logins, vec!["p1", "p2"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_closes_normally() {
        let transport = MemoryTransport::new();
        let pipeline = connected_pipeline(&transport, DeliverySettings::default()).await;
        assert_eq!(pipeline.shutdown("participant finished").await.unwrap(), 0);
        assert_eq!(transport.client_closes()[0].code, 1000);
        assert!(!transport.is_connected());
    }

    #[tokio::test(start_paused = true)]
    async fn test_settle_waits_for_debounced_events() {
        let transport = MemoryTransport::new();
        let mut pipeline = connected_pipeline(&transport, DeliverySettings::default()).await;
        pipeline
            .participant_step("intro", 1, 3, 33, None)
            .await
            .unwrap();
        assert_eq!(pipeline.pending_debounced(), 1);

        assert!(pipeline.settle(Duration::from_secs(5)).await);
        assert_eq!(pipeline.pending_debounced(), 0);
        pipeline.shutdown("done").await.unwrap();
        assert_eq!(step_events(&transport).len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_settle_times_out_while_offline() {
        let transport = MemoryTransport::offline();
        let mut pipeline = EventDeliveryPipeline::start(
            scope("p1"),
            Arc::new(transport.clone()),
            DeliverySettings::default(),
        )
        .unwrap();
        pipeline.participant_login(None, None).await.unwrap();
        assert!(!pipeline.settle(Duration::from_secs(1)).await);
        assert_eq!(pipeline.queue_len(), 1);
    }
}
