//! FieldComm Call Controller Library
//!
//! This library provides the core functionality for the FieldComm Call
//! Controller - a stateful WebSocket signaling server responsible for:
//!
//! - Real-time call coordination between field-worker and dispatch clients
//! - Relay of WebRTC negotiation payloads (offer/answer/ICE candidates)
//! - Connection authentication at the transport boundary
//! - Time-based cleanup of abandoned sessions
//!
//! # Architecture
//!
//! All live state is owned by a single registry actor:
//!
//! ```text
//! SessionRegistryActor (singleton per instance)
//! ├── owns sessions, connection links and participant index
//! ├── fed by N socket tasks (one per admitted WebSocket)
//! └── swept by the inactivity reaper task
//! ```
//!
//! # Key Design Decisions
//!
//! - **Single writer**: every registry mutation flows through one mailbox,
//!   so signaling events are processed atomically and in arrival order
//! - **Memory only**: no durable storage in the hot path; a process
//!   restart drops all sessions
//! - **Permissive state machine**: out-of-order negotiation events are
//!   recorded, not rejected, tolerating network-induced reordering
//! - **Best effort relay**: an unreachable peer loses frames rather than
//!   stalling the registry
//!
//! # Modules
//!
//! - [`actors`] - Registry actor and its mailbox types
//! - [`auth`] - Credential validation at the transport boundary
//! - [`config`] - Service configuration from environment
//! - [`errors`] - Error types with wire error codes
//! - [`gateway`] - WebSocket server, wire protocol, socket tasks
//! - [`observability`] - Health probes, stats snapshot and metrics
//! - [`session`] - Session data model and state machine
//! - [`tasks`] - Background tasks (inactivity reaper)

pub mod actors;
pub mod auth;
pub mod config;
pub mod errors;
pub mod gateway;
pub mod observability;
pub mod session;
pub mod tasks;
