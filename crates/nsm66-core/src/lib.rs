//! # nsm66-core
//!
//! Core library for nsm66, a session manager for audio/MIDI applications.
//!
//! This crate provides the building blocks shared by the daemon, the
//! command-line controller and the connection-snapshot engine:
//!
//! - **Wire protocol**: the OSC message registry and a UDP endpoint
//! - **Session store**: the `session.nsm` manifest and session enumeration
//! - **Lock/discovery**: per-host lockfiles and daemon advertisement files
//! - **Identifiers**: the short `nXXXX` client identifiers
//!
//! ## Example
//!
//! ```rust,no_run
//! use nsm66_core::osc::{Endpoint, Tag};
//!
//! let endpoint = Endpoint::bind(0)?;
//! println!("listening on {}", endpoint.url());
//! assert_eq!(Tag::SrvSave.path(), "/nsm/server/save");
//! # Ok::<(), nsm66_core::Error>(())
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod error;
pub mod lockfile;
pub mod osc;
pub mod session;

pub use error::{Error, ErrorCode};
pub use session::ClientId;

/// API version advertised by the daemon (major).
pub const API_VERSION_MAJOR: i32 = 1;

/// API version advertised by the daemon (minor).
pub const API_VERSION_MINOR: i32 = 1;

/// Capability advertised by clients that can switch projects in place.
pub const CAP_SWITCH: &str = ":switch:";

/// Capability advertised by clients with a hideable user interface.
pub const CAP_OPTIONAL_GUI: &str = ":optional-gui:";

/// Capability advertised by peers allowed to drive session operations.
pub const CAP_SERVER_CONTROL: &str = ":server-control:";

/// Capability advertised by peers that participate in broadcasts.
pub const CAP_BROADCAST: &str = ":broadcast:";

/// Environment variable carrying the daemon URL to spawned clients.
pub const NSM_URL_ENV: &str = "NSM_URL";
