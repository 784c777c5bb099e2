//! In-process transport.
//!
//! Captures every frame, and lets callers refuse connects, fail sends or drop
//! the live connection with any close code. Used by the test-suite and by
//! `stepwatch simulate --dry-run`.

use async_trait::async_trait;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::{Notify, oneshot};

use super::events::MonitoringEvent;
use super::transport::{CloseReason, Connection, FrameSink, Transport};
use crate::errors::TransportError;

#[derive(Default)]
struct MemoryState {
    online: bool,
    refuse_next: usize,
    fail_sends: usize,
    connect_attempts: usize,
    next_connection_id: u64,
    live: Option<LiveConnection>,
    frames: Vec<String>,
    client_closes: Vec<CloseReason>,
}

struct LiveConnection {
    id: u64,
    closed_tx: oneshot::Sender<CloseReason>,
}

/// Shared, cloneable in-memory transport.
#[derive(Clone)]
pub struct MemoryTransport {
    state: Arc<Mutex<MemoryState>>,
    frame_added: Arc<Notify>,
}

impl Default for MemoryTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryTransport {
    /// A transport that accepts connections.
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(MemoryState {
                online: true,
                ..Default::default()
            })),
            frame_added: Arc::new(Notify::new()),
        }
    }

    /// A transport that refuses connections until [`set_online`](Self::set_online).
    pub fn offline() -> Self {
        let transport = Self::new();
        transport.set_online(false);
        transport
    }

    fn lock(&self) -> MutexGuard<'_, MemoryState> {
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    pub fn set_online(&self, online: bool) {
        self.lock().online = online;
    }

    /// Refuse the next `n` connection attempts.
    pub fn refuse_next(&self, n: usize) {
        self.lock().refuse_next = n;
    }

    /// Fail the next `n` frame sends while leaving the connection open.
    pub fn fail_next_send(&self, n: usize) {
        self.lock().fail_sends = n;
    }

    /// Close the live connection from the observer side.
    ///
    /// Returns `false` when nothing was connected.
    pub fn drop_connection(&self, reason: CloseReason) -> bool {
        match self.lock().live.take() {
            Some(live) => {
                let _ = live.closed_tx.send(reason);
                true
            }
            None => false,
        }
    }

    pub fn is_connected(&self) -> bool {
        self.lock().live.is_some()
    }

    pub fn connect_attempts(&self) -> usize {
        self.lock().connect_attempts
    }

    /// Raw frames received, in order.
    pub fn frames(&self) -> Vec<String> {
        self.lock().frames.clone()
    }

    /// Frames decoded as monitoring events; undecodable frames are skipped.
    pub fn events(&self) -> Vec<MonitoringEvent> {
        self.frames()
            .iter()
            .filter_map(|frame| serde_json::from_str(frame).ok())
            .collect()
    }

    /// Close frames the client sent.
    pub fn client_closes(&self) -> Vec<CloseReason> {
        self.lock().client_closes.clone()
    }

    /// Wait until at least `count` frames have arrived, or `timeout` passes.
    pub async fn wait_for_frames(&self, count: usize, timeout: Duration) -> bool {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let notified = self.frame_added.notified();
            if self.lock().frames.len() >= count {
                return true;
            }
            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                return self.lock().frames.len() >= count;
            }
        }
    }
}

impl std::fmt::Debug for MemoryTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.lock();
        f.debug_struct("MemoryTransport")
            .field("online", &state.online)
            .field("connected", &state.live.is_some())
            .field("frames", &state.frames.len())
            .finish()
    }
}

struct MemorySink {
    transport: MemoryTransport,
    connection_id: u64,
}

impl MemorySink {
    fn is_live(state: &MemoryState, id: u64) -> bool {
        state.live.as_ref().is_some_and(|live| live.id == id)
    }
}

#[async_trait]
impl FrameSink for MemorySink {
    async fn send_text(&mut self, text: String) -> Result<(), TransportError> {
        {
            let mut state = self.transport.lock();
            if !Self::is_live(&state, self.connection_id) {
                return Err(TransportError::Closed);
            }
            if state.fail_sends > 0 {
                state.fail_sends -= 1;
                return Err(TransportError::Send("injected send failure".to_string()));
            }
            state.frames.push(text);
        }
        self.transport.frame_added.notify_waiters();
        Ok(())
    }

    async fn close(&mut self, reason: CloseReason) -> Result<(), TransportError> {
        let mut state = self.transport.lock();
        if Self::is_live(&state, self.connection_id) {
            state.live = None;
        }
        state.client_closes.push(reason);
        Ok(())
    }
}

#[async_trait]
impl Transport for MemoryTransport {
    async fn connect(&self, _research_id: &str) -> Result<Connection, TransportError> {
        let mut state = self.lock();
        state.connect_attempts += 1;
        if !state.online {
            return Err(TransportError::Connect("observer offline".to_string()));
        }
        if state.refuse_next > 0 {
            state.refuse_next -= 1;
            return Err(TransportError::Connect("connection refused".to_string()));
        }

        state.next_connection_id += 1;
        let id = state.next_connection_id;
        let (closed_tx, closed) = oneshot::channel();
        if let Some(previous) = state.live.replace(LiveConnection { id, closed_tx }) {
            let _ = previous
                .closed_tx
                .send(CloseReason::abnormal("replaced by a new connection"));
        }
        drop(state);

        Ok(Connection {
            sink: Box::new(MemorySink {
                transport: self.clone(),
                connection_id: id,
            }),
            closed,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_frames_are_captured_in_order() {
        let transport = MemoryTransport::new();
        let mut conn = transport.connect("r").await.unwrap();
        conn.sink.send_text("one".to_string()).await.unwrap();
        conn.sink.send_text("two".to_string()).await.unwrap();
        assert_eq!(transport.frames(), vec!["one", "two"]);
    }

    #[tokio::test]
    async fn test_offline_refuses_connects() {
        let transport = MemoryTransport::offline();
        assert!(transport.connect("r").await.is_err());
        transport.set_online(true);
        assert!(transport.connect("r").await.is_ok());
        assert_eq!(transport.connect_attempts(), 2);
    }

    #[tokio::test]
    async fn test_refuse_next_counts_down() {
        let transport = MemoryTransport::new();
        transport.refuse_next(2);
        assert!(transport.connect("r").await.is_err());
        assert!(transport.connect("r").await.is_err());
        assert!(transport.connect("r").await.is_ok());
    }

    #[tokio::test]
    async fn test_drop_connection_notifies_and_kills_sink() {
        let transport = MemoryTransport::new();
        let mut conn = transport.connect("r").await.unwrap();
        assert!(transport.drop_connection(CloseReason::abnormal("network")));

        let reason = conn.closed.await.unwrap();
        assert_eq!(reason.code, 1006);
        assert!(matches!(
            conn.sink.send_text("late".to_string()).await,
            Err(TransportError::Closed)
        ));
        assert!(!transport.drop_connection(CloseReason::abnormal("again")));
    }

    #[tokio::test]
    async fn test_client_close_is_recorded() {
        let transport = MemoryTransport::new();
        let mut conn = transport.connect("r").await.unwrap();
        conn.sink.close(CloseReason::normal("teardown")).await.unwrap();
        assert!(!transport.is_connected());
        assert_eq!(transport.client_closes()[0].code, 1000);
    }

    #[tokio::test]
    async fn test_fail_next_send_fails_then_recovers() {
        let transport = MemoryTransport::new();
        let mut conn = transport.connect("r").await.unwrap();
        transport.fail_next_send(1);
        assert!(matches!(
            conn.sink.send_text("lost".to_string()).await,
            Err(TransportError::Send(_))
        ));
        assert!(transport.is_connected());
        conn.sink.send_text("kept".to_string()).await.unwrap();
        assert_eq!(transport.frames(), vec!["kept"]);
    }

    #[tokio::test]
    async fn test_wait_for_frames_times_out() {
        let transport = MemoryTransport::new();
        assert!(
            !transport
                .wait_for_frames(1, Duration::from_millis(20))
                .await
        );
    }
}
