//! # nsm66-daemon
//!
//! The session manager daemon: supervises a cohort of audio/MIDI client
//! processes, persists their grouping as a named session, and coordinates
//! the collective save/open/close/duplicate/abort lifecycle over OSC.
//!
//! The daemon is a single-threaded cooperative loop: it blocks only in a
//! bounded transport wait, drains SIGCHLD between message dispatches via
//! a signal descriptor, and sweeps the roster for silently vanished
//! children on every iteration.

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod client;
pub mod daemon;
pub mod gui;
pub mod supervisor;

pub use client::{Client, ClientStatus, PendingCommand, Roster};
pub use daemon::{Daemon, DaemonConfig};
