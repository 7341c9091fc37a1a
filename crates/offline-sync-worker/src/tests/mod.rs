//! Behavioral tests for the sync worker.
//!
//! Test files:
//! - `harness.rs`: in-memory queue, scripted dispatcher, switchable probe
//! - `ordering.rs`: offline gating, priority bands, adaptive batch size
//! - `backoff.rs`: retry timing, dispatch timeouts
//! - `terminal.rs`: exhausted and permanently rejected actions
//! - `single_flight.rs`: concurrent triggers coalesce into one drain
//! - `cancellation.rs`: stop mid-batch and mid-backoff, durability on reopen
//! - `engine.rs`: end-to-end through the engine facade


mod cancellation;
mod engine;
mod ordering;
