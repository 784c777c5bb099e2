//! Connection lifecycle and offline queue.
//!
//! A [`ConnectionSupervisor`] is a cheap handle to a background task that
//! exclusively owns the transport connection, the [`ConnectionState`] and the
//! FIFO offline queue. Callers talk to it through commands and observe state
//! through a `watch` channel; nothing else mutates supervisor state.
//!
//! ```text
//!   disconnected ──connect()──▶ connecting ──ok──▶ connected
//!         ▲                        │  ▲               │
//!         │ normal close           │  │ retry after   │ abnormal close /
//!         │                  error ▼  │ backoff       │ send failure
//!         └──────────────────── reconnecting ◀────────┘
//! ```

use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::Instant;
use tracing::{Instrument, debug, error, info, info_span, warn};

use super::backoff::{Backoff, BackoffPolicy};
use super::events::{MonitoringEvent, SessionScope};
use super::transport::{CloseReason, Connection, Transport};
use crate::errors::{MonitorError, TransportError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Reconnecting,
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
            ConnectionState::Reconnecting => "reconnecting",
        };
        f.write_str(s)
    }
}

/// What happened to an event handed to [`ConnectionSupervisor::send`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    /// Written to the live connection.
    Sent,
    /// Held in the offline queue until the next connection.
    Queued,
    /// Refused by a full queue, or unserialisable.
    Dropped,
}

/// What a full offline queue does with one more event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OverflowPolicy {
    #[default]
    DropOldest,
    RejectNew,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct QueueLimit {
    /// 0 means unbounded.
    pub max_len: usize,
    pub overflow: OverflowPolicy,
}

impl QueueLimit {
    pub fn unbounded() -> Self {
        Self::default()
    }

    pub fn is_bounded(&self) -> bool {
        self.max_len > 0
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SupervisorConfig {
    pub backoff: BackoffPolicy,
    pub queue: QueueLimit,
}

enum Command {
    Connect,
    Reconnect,
    Send {
        event: MonitoringEvent,
        reply: oneshot::Sender<Delivery>,
    },
    Disconnect {
        reason: String,
        done: oneshot::Sender<usize>,
    },
}

/// Handle to a running supervisor task.
///
/// Clones share the same task. The task stops on [`disconnect`](Self::disconnect)
/// or when the last handle is dropped.
#[derive(Clone)]
pub struct ConnectionSupervisor {
    scope: SessionScope,
    commands: mpsc::UnboundedSender<Command>,
    state: watch::Receiver<ConnectionState>,
    queue_len: Arc<AtomicUsize>,
}

impl ConnectionSupervisor {
    /// Start the supervisor task in the `disconnected` state.
    pub fn spawn(
        scope: SessionScope,
        transport: Arc<dyn Transport>,
        config: SupervisorConfig,
    ) -> Self {
        let (commands, command_rx) = mpsc::unbounded_channel();
        let (state_tx, state) = watch::channel(ConnectionState::Disconnected);
        let queue_len = Arc::new(AtomicUsize::new(0));

        let span = info_span!(
            "supervisor",
            research_id = %scope.research_id,
            participant_id = %scope.participant_id,
        );
        let actor = Actor {
            scope: scope.clone(),
            transport,
            config,
            commands: command_rx,
            state_tx,
            queue: VecDeque::new(),
            queue_len: Arc::clone(&queue_len),
            backoff: Backoff::new(config.backoff),
            connection: None,
            attempt: None,
            retry_at: None,
        };
        tokio::spawn(actor.run().instrument(span));

        Self {
            scope,
            commands,
            state,
            queue_len,
        }
    }

    pub fn scope(&self) -> &SessionScope {
        &self.scope
    }

    /// No-op unless `disconnected`.
    pub fn connect(&self) -> Result<(), MonitorError> {
        self.command(Command::Connect)
    }

    /// Drop the current connection or attempt and retry after a backoff delay.
    pub fn reconnect(&self) -> Result<(), MonitorError> {
        self.command(Command::Reconnect)
    }

    /// Transmit now when connected, otherwise queue.
    pub async fn send(&self, event: MonitoringEvent) -> Result<Delivery, MonitorError> {
        let (reply, delivery) = oneshot::channel();
        self.command(Command::Send { event, reply })?;
        delivery.await.map_err(|_| MonitorError::SupervisorStopped)
    }

    /// Close with a normal-closure code and stop the task for good.
    ///
    /// Returns the number of queued events that were discarded.
    pub async fn disconnect(&self, reason: impl Into<String>) -> Result<usize, MonitorError> {
        let (done, discarded) = oneshot::channel();
        self.command(Command::Disconnect {
            reason: reason.into(),
            done,
        })?;
        discarded.await.map_err(|_| MonitorError::SupervisorStopped)
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    /// Receiver that sees every state transition.
    pub fn subscribe(&self) -> watch::Receiver<ConnectionState> {
        self.state.clone()
    }

    pub fn queue_len(&self) -> usize {
        self.queue_len.load(Ordering::Relaxed)
    }

    pub fn is_stopped(&self) -> bool {
        self.commands.is_closed()
    }

    fn command(&self, command: Command) -> Result<(), MonitorError> {
        self.commands
            .send(command)
            .map_err(|_| MonitorError::SupervisorStopped)
    }
}

impl std::fmt::Debug for ConnectionSupervisor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionSupervisor")
            .field("scope", &self.scope)
            .field("state", &self.state())
            .field("queue_len", &self.queue_len())
            .finish()
    }
}

// ── Actor ────────────────────────────────────────────────────────────

type ConnectAttempt = BoxFuture<'static, Result<Connection, TransportError>>;

struct Actor {
    scope: SessionScope,
    transport: Arc<dyn Transport>,
    config: SupervisorConfig,
    commands: mpsc::UnboundedReceiver<Command>,
    state_tx: watch::Sender<ConnectionState>,
    queue: VecDeque<MonitoringEvent>,
    queue_len: Arc<AtomicUsize>,
    backoff: Backoff,
    connection: Option<Connection>,
    /// At most one attempt in flight.
    attempt: Option<ConnectAttempt>,
    retry_at: Option<Instant>,
}

impl Actor {
    async fn run(mut self) {
        loop {
            tokio::select! {
                command = self.commands.recv() => match command {
                    Some(command) => {
                        if !self.handle(command).await {
                            break;
                        }
                    }
                    None => {
                        self.shutdown("supervisor dropped").await;
                        break;
                    }
                },

                result = attempt_finished(&mut self.attempt), if self.attempt.is_some() => {
                    self.attempt = None;
                    self.on_connect_result(result).await;
                }

                reason = connection_closed(&mut self.connection), if self.connection.is_some() => {
                    self.connection = None;
                    self.on_closed(reason);
                }

                _ = retry_due(self.retry_at), if self.retry_at.is_some() => {
                    self.retry_at = None;
                    self.start_attempt();
                }
            }
        }
        debug!("supervisor stopped");
    }

    fn state(&self) -> ConnectionState {
        *self.state_tx.borrow()
    }

    fn set_state(&self, state: ConnectionState) {
        self.state_tx.send_if_modified(|current| {
            if *current == state {
                false
            } else {
                debug!(from = %current, to = %state, "connection state changed");
                *current = state;
                true
            }
        });
    }

    fn sync_queue_len(&self) {
        self.queue_len.store(self.queue.len(), Ordering::Relaxed);
    }

    /// Returns `false` once the supervisor should stop.
    async fn handle(&mut self, command: Command) -> bool {
        match command {
            Command::Connect => match self.state() {
                ConnectionState::Disconnected => self.start_attempt(),
                state => debug!(%state, "connect ignored"),
            },
            Command::Reconnect => match self.state() {
                ConnectionState::Reconnecting => debug!("reconnect already scheduled"),
                _ => {
                    self.attempt = None;
                    if let Some(mut connection) = self.connection.take() {
                        let _ = connection
                            .sink
                            .close(CloseReason::normal("reconnecting"))
                            .await;
                    }
                    self.schedule_retry("reconnect requested");
                }
            },
            Command::Send { event, reply } => {
                let delivery = self.deliver(event).await;
                let _ = reply.send(delivery);
            }
            Command::Disconnect { reason, done } => {
                let discarded = self.shutdown(&reason).await;
                let _ = done.send(discarded);
                return false;
            }
        }
        true
    }

    fn start_attempt(&mut self) {
        if self.attempt.is_some() || self.connection.is_some() {
            return;
        }
        self.retry_at = None;
        self.set_state(ConnectionState::Connecting);

        let transport = Arc::clone(&self.transport);
        let research_id = self.scope.research_id.clone();
        self.attempt = Some(Box::pin(async move { transport.connect(&research_id).await }));
    }

    fn schedule_retry(&mut self, cause: &str) {
        let delay = self.backoff.next_delay(self.queue.len());
        self.retry_at = Some(Instant::now() + delay);
        self.set_state(ConnectionState::Reconnecting);
        warn!(
            cause,
            delay_ms = delay.as_millis() as u64,
            queue_len = self.queue.len(),
            attempt = self.backoff.failures(),
            "scheduling reconnect"
        );
    }

    async fn on_connect_result(&mut self, result: Result<Connection, TransportError>) {
        match result {
            Ok(connection) => {
                self.backoff.reset();
                self.connection = Some(connection);
                self.set_state(ConnectionState::Connected);
                info!(queue_len = self.queue.len(), "connected to observer");

                if !self.flush_queue().await {
                    return;
                }
                let hello = MonitoringEvent::connect(&self.scope);
                if let Err(e) = self.transmit(&hello).await {
                    self.on_send_failure(e);
                }
            }
            Err(e) => {
                warn!(error = %e, "connect failed");
                self.schedule_retry("connect failed");
            }
        }
    }

    fn on_closed(&mut self, reason: CloseReason) {
        if reason.is_normal() {
            info!(reason = %reason.reason, "observer closed connection normally");
            self.set_state(ConnectionState::Disconnected);
        } else {
            warn!(code = reason.code, reason = %reason.reason, "connection closed abnormally");
            self.schedule_retry("abnormal close");
        }
    }

    fn on_send_failure(&mut self, error: TransportError) {
        warn!(error = %error, "send failed; dropping connection");
        self.connection = None;
        self.schedule_retry("send failed");
    }

    async fn deliver(&mut self, event: MonitoringEvent) -> Delivery {
        if self.state() != ConnectionState::Connected {
            return self.enqueue(event);
        }
        match self.transmit(&event).await {
            Ok(delivery) => delivery,
            Err(e) => {
                let delivery = self.enqueue(event);
                self.on_send_failure(e);
                delivery
            }
        }
    }

    /// Write one event to the live connection.
    async fn transmit(&mut self, event: &MonitoringEvent) -> Result<Delivery, TransportError> {
        let Some(connection) = self.connection.as_mut() else {
            return Err(TransportError::Closed);
        };
        let text = match event.to_json() {
            Ok(text) => text,
            Err(e) => {
                error!(event_type = %event.kind(), error = %e, "failed to serialize event");
                return Ok(Delivery::Dropped);
            }
        };
        connection.sink.send_text(text).await?;
        debug!(event_type = %event.kind(), "event sent");
        Ok(Delivery::Sent)
    }

    fn enqueue(&mut self, event: MonitoringEvent) -> Delivery {
        let limit = self.config.queue;
        if limit.is_bounded() && self.queue.len() >= limit.max_len {
            match limit.overflow {
                OverflowPolicy::DropOldest => {
                    if let Some(dropped) = self.queue.pop_front() {
                        warn!(
                            event_type = %dropped.kind(),
                            max_len = limit.max_len,
                            "offline queue full; dropped oldest event"
                        );
                    }
                }
                OverflowPolicy::RejectNew => {
                    warn!(
                        event_type = %event.kind(),
                        max_len = limit.max_len,
                        "offline queue full; rejected event"
                    );
                    return Delivery::Dropped;
                }
            }
        }
        debug!(event_type = %event.kind(), queue_len = self.queue.len() + 1, "event queued");
        self.queue.push_back(event);
        self.sync_queue_len();
        Delivery::Queued
    }

    /// Send queued events oldest first. On failure the unsent remainder
    /// stays queued in order and a reconnect is scheduled.
    async fn flush_queue(&mut self) -> bool {
        let pending = self.queue.len();
        while let Some(event) = self.queue.pop_front() {
            if let Err(e) = self.transmit(&event).await {
                self.queue.push_front(event);
                self.sync_queue_len();
                self.on_send_failure(e);
                return false;
            }
            self.sync_queue_len();
        }
        if pending > 0 {
            info!(flushed = pending, "flushed offline queue");
        }
        true
    }

    async fn shutdown(&mut self, reason: &str) -> usize {
        self.attempt = None;
        self.retry_at = None;
        if let Some(mut connection) = self.connection.take() {
            if let Err(e) = connection.sink.close(CloseReason::normal(reason)).await {
                debug!(error = %e, "close failed");
            }
        }

        let discarded = self.queue.len();
        self.queue.clear();
        self.sync_queue_len();
        if discarded > 0 {
            warn!(discarded, reason, "discarding queued events on teardown");
        }
        self.set_state(ConnectionState::Disconnected);
        info!(reason, "supervisor shut down");
        discarded
    }
}

async fn attempt_finished(
    attempt: &mut Option<ConnectAttempt>,
) -> Result<Connection, TransportError> {
    match attempt.as_mut() {
        Some(future) => future.await,
        None => std::future::pending().await,
    }
}

async fn connection_closed(connection: &mut Option<Connection>) -> CloseReason {
    match connection.as_mut() {
        Some(connection) => (&mut connection.closed)
            .await
            .unwrap_or_else(|_| CloseReason::abnormal("connection dropped")),
        None => std::future::pending().await,
    }
}

async fn retry_due(at: Option<Instant>) {
    match at {
        Some(at) => tokio::time::sleep_until(at).await,
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::monitor::events::{ErrorData, EventKind};
    use crate::monitor::memory::MemoryTransport;
    use std::time::Duration;

    fn scope() -> SessionScope {
        SessionScope::new("research-1", "participant-1").unwrap()
    }

    fn config() -> SupervisorConfig {
        SupervisorConfig {
            backoff: BackoffPolicy {
                base: Duration::from_millis(100),
                max: Duration::from_secs(2),
                queue_pressure_step: 10,
            },
            queue: QueueLimit::unbounded(),
        }
    }

    fn spawn(transport: &MemoryTransport, config: SupervisorConfig) -> ConnectionSupervisor {
        ConnectionSupervisor::spawn(scope(), Arc::new(transport.clone()), config)
    }

    fn numbered(n: usize) -> MonitoringEvent {
        MonitoringEvent::Error(ErrorData {
            meta: scope().meta_now(),
            error: format!("event-{n}"),
            step_name: None,
        })
    }

    fn labels(transport: &MemoryTransport) -> Vec<String> {
        transport
            .events()
            .into_iter()
            .filter_map(|event| match event {
                MonitoringEvent::Error(d) => Some(d.error),
                _ => None,
            })
            .collect()
    }

    async fn wait_for(supervisor: &ConnectionSupervisor, state: ConnectionState) {
        let mut rx = supervisor.subscribe();
        tokio::time::timeout(Duration::from_secs(60), rx.wait_for(|s| *s == state))
            .await
            .expect("state not reached in time")
            .expect("supervisor stopped");
    }

    #[tokio::test(start_paused = true)]
    async fn test_connect_flushes_nothing_then_sends_connect_event() {
        let transport = MemoryTransport::new();
        let supervisor = spawn(&transport, config());
        supervisor.connect().unwrap();
        wait_for(&supervisor, ConnectionState::Connected).await;

        assert!(transport.wait_for_frames(1, Duration::from_secs(1)).await);
        assert_eq!(transport.events()[0].kind(), EventKind::Connect);
        assert_eq!(supervisor.send(numbered(1)).await.unwrap(), Delivery::Sent);
        assert_eq!(labels(&transport), vec!["event-1"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_connect_is_idempotent() {
        let transport = MemoryTransport::new();
        let supervisor = spawn(&transport, config());
        supervisor.connect().unwrap();
        supervisor.connect().unwrap();
        supervisor.connect().unwrap();
        wait_for(&supervisor, ConnectionState::Connected).await;
        supervisor.connect().unwrap();

        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(transport.connect_attempts(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_events_while_disconnected_are_queued_then_flushed_in_order() {
        let transport = MemoryTransport::offline();
        let supervisor = spawn(&transport, config());
        supervisor.connect().unwrap();
        wait_for(&supervisor, ConnectionState::Reconnecting).await;

        for n in 1..=3 {
            assert_eq!(supervisor.send(numbered(n)).await.unwrap(), Delivery::Queued);
        }
        assert_eq!(supervisor.queue_len(), 3);

        transport.set_online(true);
        wait_for(&supervisor, ConnectionState::Connected).await;
        assert_eq!(supervisor.send(numbered(4)).await.unwrap(), Delivery::Sent);

        assert_eq!(labels(&transport), vec!["event-1", "event-2", "event-3", "event-4"]);
        // Queue first, then the session-connect event.
        let kinds: Vec<_> = transport.events().iter().map(|e| e.kind()).collect();
        assert_eq!(kinds[3], EventKind::Connect);
        assert_eq!(supervisor.queue_len(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_mid_session_drop_queues_and_replays() {
        let transport = MemoryTransport::new();
        let supervisor = spawn(&transport, config());
        supervisor.connect().unwrap();
        wait_for(&supervisor, ConnectionState::Connected).await;
        assert_eq!(supervisor.send(numbered(0)).await.unwrap(), Delivery::Sent);

        transport.set_online(false);
        assert!(transport.drop_connection(CloseReason::abnormal("network lost")));
        for n in 1..=3 {
            assert_eq!(supervisor.send(numbered(n)).await.unwrap(), Delivery::Queued);
        }

        transport.set_online(true);
        wait_for(&supervisor, ConnectionState::Connected).await;
        supervisor.send(numbered(4)).await.unwrap();

        assert_eq!(
            labels(&transport),
            vec!["event-0", "event-1", "event-2", "event-3", "event-4"]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_send_failure_while_connected_queues_and_replays_first() {
        let transport = MemoryTransport::new();
        let supervisor = spawn(&transport, config());
        supervisor.connect().unwrap();
        wait_for(&supervisor, ConnectionState::Connected).await;
        assert_eq!(supervisor.send(numbered(0)).await.unwrap(), Delivery::Sent);

        transport.fail_next_send(1);
        assert_eq!(supervisor.send(numbered(1)).await.unwrap(), Delivery::Queued);
        assert_eq!(supervisor.state(), ConnectionState::Reconnecting);
        assert_eq!(supervisor.queue_len(), 1);
        assert_eq!(labels(&transport), vec!["event-0"]);

        // Connect, event-0, then after the retry: event-1, Connect.
        assert!(transport.wait_for_frames(4, Duration::from_secs(5)).await);
        assert_eq!(transport.connect_attempts(), 2);
        assert_eq!(supervisor.state(), ConnectionState::Connected);
        assert_eq!(supervisor.queue_len(), 0);
        let kinds: Vec<_> = transport.events().iter().map(|e| e.kind()).collect();
        assert_eq!(
            kinds,
            vec![
                EventKind::Connect,
                EventKind::Error,
                EventKind::Error,
                EventKind::Connect
            ]
        );
        assert_eq!(labels(&transport), vec!["event-0", "event-1"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_backoff_resets_after_successful_connection() {
        let transport = MemoryTransport::new();
        transport.refuse_next(3);
        let supervisor = spawn(&transport, config());
        supervisor.connect().unwrap();
        wait_for(&supervisor, ConnectionState::Connected).await;
        assert_eq!(transport.connect_attempts(), 4);

        let dropped_at = Instant::now();
        transport.drop_connection(CloseReason::abnormal("blip"));
        wait_for(&supervisor, ConnectionState::Reconnecting).await;
        wait_for(&supervisor, ConnectionState::Connected).await;

        // First failure after a success waits the base delay again.
        let waited = dropped_at.elapsed();
        assert!(waited >= Duration::from_millis(100), "{waited:?}");
        assert!(waited < Duration::from_millis(200), "{waited:?}");
    }

    #[tokio::test(start_paused = true)]
    async fn test_normal_close_does_not_reconnect() {
        let transport = MemoryTransport::new();
        let supervisor = spawn(&transport, config());
        supervisor.connect().unwrap();
        wait_for(&supervisor, ConnectionState::Connected).await;

        transport.drop_connection(CloseReason::normal("server shutting down"));
        wait_for(&supervisor, ConnectionState::Disconnected).await;
        tokio::time::sleep(Duration::from_secs(60)).await;

        assert_eq!(transport.connect_attempts(), 1);
        assert_eq!(supervisor.state(), ConnectionState::Disconnected);
        assert_eq!(supervisor.send(numbered(1)).await.unwrap(), Delivery::Queued);
    }

    #[tokio::test(start_paused = true)]
    async fn test_explicit_reconnect_uses_backoff() {
        let transport = MemoryTransport::new();
        let supervisor = spawn(&transport, config());
        supervisor.connect().unwrap();
        wait_for(&supervisor, ConnectionState::Connected).await;

        supervisor.reconnect().unwrap();
        wait_for(&supervisor, ConnectionState::Reconnecting).await;
        wait_for(&supervisor, ConnectionState::Connected).await;
        assert_eq!(transport.connect_attempts(), 2);
        assert_eq!(transport.client_closes()[0].code, 1000);
    }

    #[tokio::test(start_paused = true)]
    async fn test_disconnect_closes_normally_and_stops() {
        let transport = MemoryTransport::new();
        let supervisor = spawn(&transport, config());
        supervisor.connect().unwrap();
        wait_for(&supervisor, ConnectionState::Connected).await;

        assert_eq!(supervisor.disconnect("session ended").await.unwrap(), 0);
        assert_eq!(transport.client_closes()[0].code, 1000);
        assert_eq!(supervisor.state(), ConnectionState::Disconnected);

        assert!(matches!(
            supervisor.send(numbered(1)).await,
            Err(MonitorError::SupervisorStopped)
        ));
        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(transport.connect_attempts(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_disconnect_discards_queue() {
        let transport = MemoryTransport::offline();
        let supervisor = spawn(&transport, config());
        supervisor.send(numbered(1)).await.unwrap();
        supervisor.send(numbered(2)).await.unwrap();

        assert_eq!(supervisor.disconnect("switch").await.unwrap(), 2);
        assert_eq!(supervisor.queue_len(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_bounded_queue_reject_new() {
        let transport = MemoryTransport::offline();
        let mut cfg = config();
        cfg.queue = QueueLimit {
            max_len: 2,
            overflow: OverflowPolicy::RejectNew,
        };
        let supervisor = spawn(&transport, cfg);

        assert_eq!(supervisor.send(numbered(1)).await.unwrap(), Delivery::Queued);
        assert_eq!(supervisor.send(numbered(2)).await.unwrap(), Delivery::Queued);
        assert_eq!(supervisor.send(numbered(3)).await.unwrap(), Delivery::Dropped);
        assert_eq!(supervisor.queue_len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_bounded_queue_drop_oldest() {
        let transport = MemoryTransport::offline();
        let mut cfg = config();
        cfg.queue = QueueLimit {
            max_len: 2,
            overflow: OverflowPolicy::DropOldest,
        };
        let supervisor = spawn(&transport, cfg);
        for n in 1..=3 {
            assert_eq!(supervisor.send(numbered(n)).await.unwrap(), Delivery::Queued);
        }

        transport.set_online(true);
        supervisor.connect().unwrap();
        wait_for(&supervisor, ConnectionState::Connected).await;
        assert!(transport.wait_for_frames(3, Duration::from_secs(1)).await);
        assert_eq!(labels(&transport), vec!["event-2", "event-3"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_dropping_last_handle_stops_task() {
        let transport = MemoryTransport::new();
        let supervisor = spawn(&transport, config());
        supervisor.connect().unwrap();
        wait_for(&supervisor, ConnectionState::Connected).await;

        drop(supervisor);
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(!transport.is_connected());
    }
}
