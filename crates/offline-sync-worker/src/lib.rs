//! Offline-aware sync worker.
//!
//! Drains the durable action queue to the remote whenever the network allows,
//! adapting batch size, interval and payload fidelity to link quality.
//!
//! # Flow
//!
//! 1. Collaborators call [`OfflineSyncEngine::enqueue_action`]; the action is
//!    committed to SQLite before the call returns
//! 2. The network monitor samples the link and publishes quality tiers
//! 3. The sync loop wakes on its adaptive interval, on reconnect, or on
//!    demand, and runs [`SyncProcessor::process_queue`]
//! 4. Each claimed action is dispatched; success confirms it, transient
//!    failure records an attempt, permanent failure or exhaustion removes it
//!    and raises a [`TerminalFailure`]
//! 5. Any retryable failure puts the processor into backoff:
//!    `min(base * 2^(failures - 1), max)`
//!
//! # Guarantees
//!
//! - At most one drain runs at a time; extra triggers are coalesced
//! - Actions are never lost: stopping the engine leaves them queued
//! - Each action either succeeds or is reported terminal within `max_attempts`

mod backoff;
mod dispatcher;
mod engine;
mod error;
mod processor;
mod status;

#[cfg(test)]
mod tests;

pub use backoff::compute_backoff;
pub use dispatcher::{classify_status, DispatchContext, HttpDispatcher, RemoteDispatcher};
pub use engine::{EngineBuilder, NewAction, OfflineSyncEngine};
pub use error::{DispatchError, DispatchResult, EngineError, EngineResult};
pub use processor::{ProcessorConfig, SyncProcessor};
pub use status::{DrainOutcome, DrainReport, SkipReason, SyncStatus, TerminalFailure, TerminalReason};
