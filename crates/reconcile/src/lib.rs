//! Reconciliation of catalog usage into the system-of-record.

mod coordinator;
mod dispatch;
mod engine;
mod error;
mod events;

pub use coordinator::{CyclePhase, TransactionCoordinator};
pub use dispatch::{DispatchOutcome, Dispatcher};
pub use engine::{BATCH_JITTER, EngineSettings, ReconciliationEngine, jitter_batch_size};
pub use error::{ReconcileError, Result, Store};
pub use events::{ChannelPublisher, EventPublisher, LogPublisher, OutboundEvent};
