//! # nsm66-patch
//!
//! The connection-snapshot engine: tracks a set of known graph endpoints
//! and a list of intended edges, reconciles them with the live graph as
//! ports register and unregister, and persists a canonical text form.
//!
//! The engine is generic over [`graph::PortGraph`] so the reconciliation
//! logic builds and tests without an audio server; the `jack` cargo
//! feature provides the real backend used by the `jackpatch66` binary.

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod engine;
pub mod graph;

#[cfg(feature = "jack")]
pub mod jack_driver;

pub use engine::{Patch, PatchBay, PortRef};
pub use graph::{GraphError, MemoryGraph, PortEvent, PortGraph};
