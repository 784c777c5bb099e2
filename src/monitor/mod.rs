//! Best-effort delivery of participant progress events to the observer.
//!
//! ```text
//!   caller ──emit──> EventDeliveryPipeline ──dedup/debounce──> ConnectionSupervisor ──> Transport
//!                                                               (state, FIFO queue,     (WebSocket /
//!                                                                backoff reconnect)      in-memory)
//! ```
//!
//! | Module       | Responsibility                                          |
//! |--------------|---------------------------------------------------------|
//! | `events`     | `MonitoringEvent` tagged union and wire format          |
//! | `dedup`      | `RecentIdentities` bounded recent-identity window       |
//! | `debounce`   | `DebounceRegistry` per-key cancellable timers           |
//! | `backoff`    | `Backoff` reconnect delay with queue pressure           |
//! | `transport`  | `Transport` / `FrameSink` traits, `WsTransport`         |
//! | `memory`     | `MemoryTransport` for tests and dry runs                |
//! | `supervisor` | `ConnectionSupervisor` actor and offline queue          |
//! | `pipeline`   | `EventDeliveryPipeline` and typed participant helpers   |
//!
//! Failures here never reach step progression: transport errors are retried,
//! duplicates are dropped quietly.

pub mod backoff;
pub mod debounce;
pub mod dedup;
pub mod events;
pub mod memory;
pub mod pipeline;
pub mod supervisor;
pub mod transport;

pub use backoff::{Backoff, BackoffPolicy};
pub use debounce::{DebounceKey, DebounceRegistry};
pub use dedup::{EventIdentity, RecentIdentities};
pub use events::{EventKind, EventMeta, MonitoringEvent, SessionScope};
pub use memory::MemoryTransport;
pub use pipeline::{DeliveryPolicy, DeliverySettings, EmitOutcome, EventDeliveryPipeline};
pub use supervisor::{
    ConnectionState, ConnectionSupervisor, Delivery, OverflowPolicy, QueueLimit, SupervisorConfig,
};
pub use transport::{CloseReason, Connection, FrameSink, Transport, WsTransport};
