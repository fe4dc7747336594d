//! Runner transport layer
//!
//! The collaborators a managed server drives but does not implement:
//! - `HttpEngine`: binds a handler set and serves it (axum + hyper)
//! - `ShutdownSignal`: stops a prior instance / listens to be stopped
//! - `HandlerUnit` / `HandlerPackage`: explicit request-handling units

pub mod engine;
pub mod handler;
pub mod shutdown;

pub use engine::{AxumEngine, HttpEngine, ServerHandle};
pub use handler::{HandlerPackage, HandlerSet, HandlerUnit, RouterUnit};
pub use shutdown::{
    NoopShutdownSignal, ShutdownCallback, ShutdownListener, ShutdownSignal, TcpShutdownSignal,
};
