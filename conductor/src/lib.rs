//! Goal supervision core.
//!
//! For every goal that should be worked on, a dedicated supervisor process
//! drives an agent session toward the goal's target world state. The crate is
//! split the usual way:
//!
//! - **[`core`]**: Pure, deterministic logic (GOAP evaluation, orphan
//!   resolution, supervisor health, message rendering). No I/O.
//! - **[`io`]**: Side-effecting collaborators (stores, work queue, inbox,
//!   session driver, process table, signals). Behind traits where tests need
//!   to substitute them.
//!
//! Orchestration modules combine the two: [`orchestrator`] manages supervisor
//! processes, [`supervisor`] is the loop running inside each of them, and
//! [`watch`] reconciles the two periodically.

pub mod core;
pub mod exit_codes;
pub mod io;
pub mod logging;
pub mod orchestrator;
pub mod status;
pub mod supervisor;
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;
pub mod watch;
