//! # Agrimesh
//!
//! Coordination core for a long-range radio sensor mesh in field
//! agriculture: one gateway and many battery-powered sensor nodes
//! exchanging fixed-format binary messages to collect atmospheric, soil,
//! and GPS telemetry.
//!
//! ## Features
//!
//! - **Binary message protocol**: seven fixed-layout message types with
//!   exact-size validation and no framing beyond fixed sizes
//! - **Node addressing**: stable 1-byte addresses derived from the
//!   hardware MAC via CRC-8 with blacklist avoidance and collision
//!   recovery over an `ERROR_ADDRESS` handshake
//! - **Gateway coordinator**: node registry, periodic announce, scheduled
//!   polling with bounded retry, telemetry forwarding
//! - **Node agent**: gateway discovery, HELLO keepalive, request
//!   servicing
//! - **Injected time**: all interval bookkeeping and retry pacing runs on
//!   an injected clock, so every state machine tests without wall time
//!
//! ## Quick Start
//!
//! ```rust
//! use agrimesh::clock::{Clock, ManualClock};
//! use agrimesh::config::GatewayConfig;
//! use agrimesh::gateway::GatewayCoordinator;
//! use agrimesh::scheduler::IntervalTrigger;
//! use agrimesh::sink::MemorySink;
//! use agrimesh::transport::MeshHub;
//!
//! let hub = MeshHub::new();
//! let clock = ManualClock::new();
//! let config = GatewayConfig::default();
//! let trigger = IntervalTrigger::new(config.ground_interval_ms, clock.now_ms());
//!
//! let mut gateway = GatewayCoordinator::new(
//!     0x01,
//!     config,
//!     hub.endpoint(0x01),
//!     clock.clone(),
//!     MemorySink::new(),
//!     Box::new(trigger),
//! );
//!
//! // One pass of the gateway loop: drain a HELLO, check the timers.
//! gateway.tick();
//! ```
//!
//! ## Architecture
//!
//! - [`protocol`] - message tags, fixed binary layouts, codec helpers
//! - [`identity`] - CRC-8 address derivation and persisted identity
//! - [`gateway`] - registry, poll cycles, telemetry forwarding
//! - [`node`] - discovery, keepalive, request servicing, recovery
//! - [`scheduler`] - interval timers and ground-poll trigger strategies
//! - [`transport`] / [`clock`] / [`storage`] / [`sink`] - the external
//!   collaborator seams (radio driver, RTC, flash, MQTT)
//!
//! Everything degrades instead of failing: timeouts are retried within a
//! bound, bad payloads are retried, storage failures fall back to
//! regenerated values, and collisions resolve through the protocol.

#![warn(clippy::all)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::cast_sign_loss)]

pub mod clock;
pub mod config;
pub mod gateway;
pub mod identity;
pub mod node;
pub mod protocol;
pub mod scheduler;
pub mod sink;
pub mod storage;
pub mod transport;

// Re-export the main public types for convenience
pub use gateway::GatewayCoordinator;
pub use identity::NodeIdentity;
pub use node::NodeAgent;
pub use protocol::{AtmosphericSample, GroundGpsPacket, MessageType};
