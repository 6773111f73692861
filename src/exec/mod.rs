// src/exec/mod.rs

//! Agent process execution layer.
//!
//! This module spawns and supervises coding-agent subprocesses using
//! `tokio::process::Command` and reports back to the coordinator via
//! `RuntimeEvent`s.
//!
//! - [`classify`] maps failure messages to internal/external kinds.
//! - [`stream`] holds the per-engine output-stream parsers.
//! - [`invoker`] builds the per-engine invocation and runs one process.
//! - [`supervisor`] drives one task attempt end to end.
//! - [`backend`] provides the `SupervisorBackend` trait the coordinator
//!   dispatches through in production, and which tests replace with a
//!   fake implementation.

pub mod backend;
pub mod classify;
pub mod invoker;
pub mod stream;
pub mod supervisor;

pub use backend::{RealSupervisorBackend, SupervisorBackend};
pub use classify::FailureKind;
pub use invoker::{AgentInvocation, InvocationOutcome, invoke_agent};
pub use stream::{EngineParser, Stage, StreamObservation};
