//! Deterministic, pure logic shared by the orchestrator and supervisor.
//!
//! Core modules must be free of I/O side effects. They operate on in-memory
//! data and return deterministic outputs suitable for tests.

pub mod briefing;
pub mod goap;
pub mod health;
pub mod notifications;
pub mod reconcile;
pub mod types;
