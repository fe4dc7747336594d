//! Managed server lifecycle.
//!
//! `ManagedServer` builds an HTTP server from a base URI and a registry of
//! handler units, starts it (stopping a prior instance first), and stops it
//! within a bounded grace period.

pub mod browser;
pub mod registry;
pub mod server;

pub use registry::HandlerRegistry;
pub use browser::BrowserOpener;
pub use server::{InterruptSignal, ManagedServer};

pub use runner_protocol::{RunOutcome, RunnerError, ServerConfig, ServerState, ShutdownConfig};
pub use runner_transport::{HandlerPackage, HandlerUnit, RouterUnit};
