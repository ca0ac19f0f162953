//! Detection engines: registry, transports, and the invoker.
//!
//! An engine is an opaque capability - "given file bytes, return a
//! classification" - reachable either in-process ([`SignatureEngine`]) or
//! through a spawned external program ([`SubprocessEngine`]). The
//! orchestrator only ever sees the [`EngineTransport`] trait and the
//! [`Invoker`], never a concrete execution transport.

pub mod builtin;
pub mod cancel;
pub mod invoker;
pub mod registry;
pub mod subprocess;
pub mod transport;

pub use builtin::SignatureEngine;
pub use cancel::CancellationToken;
pub use invoker::Invoker;
pub use registry::{EngineDefinition, EngineRegistry};
pub use subprocess::SubprocessEngine;
pub use transport::EngineTransport;
