//! Meshcast integration harness.
//!
//! Scenarios run whole engines against each other over an in-process
//! mesh router with programmable per-link filtering. Everything runs on
//! tokio's paused clock: wall time does not pass, virtual time
//! auto-advances through every timer, and loss patterns are
//! deterministic — no sleeps, no flakes.

mod dissemination;
mod infra;
mod liveness;
mod recovery;
