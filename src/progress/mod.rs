//! Step-progress state machine.
//!
//! ```text
//!   ResponseSource ──refresh──> StepSession ──tracker()──> StepProgressTracker
//!   (HTTP / static)             (steps, facts, current)    (pure per-step state)
//! ```
//!
//! | Module    | Responsibility                                              |
//! |-----------|-------------------------------------------------------------|
//! | `step`    | `Step`, `StepList` (ordered, unique keys)                   |
//! | `facts`   | `ResponseFact`, `FactCache` (server beats local-optimistic) |
//! | `tracker` | `StepProgressTracker`, `StepState`, `StepStateInfo`         |
//! | `source`  | `ResponseSource` trait, HTTP and static implementations     |
//! | `session` | `StepSession`, owns the inputs and reconciles on refresh   |
//!
//! Nothing in here talks to the monitoring pipeline; callers drive both.

pub mod facts;
pub mod session;
pub mod source;
pub mod step;
pub mod tracker;

pub use facts::{FactCache, FactSource, ResponseFact};
pub use session::{RefreshOutcome, StepSession};
pub use source::{HttpResponseSource, ResponseRecord, ResponseSource, StaticResponseSource};
pub use step::{Step, StepList};
pub use tracker::{StepProgressTracker, StepState, StepStateInfo};
