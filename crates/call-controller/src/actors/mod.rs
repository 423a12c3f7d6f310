//! Actor model implementation for the session registry.
//!
//! A single `SessionRegistryActor` owns all live signaling state and
//! serializes every mutation through its mailbox, preserving the
//! single-writer invariant. The gateway and the reaper interact with it
//! exclusively through [`SessionRegistryHandle`].

mod messages;
mod registry;

pub use messages::{RegistryMessage, SignalKind, StatsSnapshot};
pub use registry::{SessionRegistryActor, SessionRegistryHandle};
