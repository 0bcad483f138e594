//! Error types and wire error codes.
//!
//! Two kinds of failure live here: [`ErrorCode`], the integer codes carried
//! on `/error` replies over the wire, and [`Error`], the crate-level error
//! type for local operations (filesystem, transport, parsing).

use std::path::PathBuf;

/// Integer error codes carried on `/error` messages.
///
/// The numeric values are part of the wire protocol and must not change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum ErrorCode {
    /// No error.
    Ok = 0,
    /// Unspecified failure.
    General = -1,
    /// Peer speaks a newer incompatible API major version.
    IncompatibleApi = -2,
    /// Client is blacklisted.
    Blacklisted = -3,
    /// Executable could not be launched.
    LaunchFailed = -4,
    /// Named session or file does not exist.
    NoSuchFile = -5,
    /// Operation requires an open session.
    NoSessionOpen = -6,
    /// Unsaved changes block the operation.
    UnsavedChanges = -7,
    /// Operation cannot be performed right now.
    NotNow = -8,
    /// Project data is corrupt or unusable.
    BadProject = -9,
    /// Session or file could not be created.
    CreateFailed = -10,
    /// Session is locked by another daemon.
    SessionLocked = -11,
    /// Another global operation is in flight.
    OperationPending = -12,
    /// A client failed to save.
    SaveFailed = -13,
}

impl ErrorCode {
    /// The integer value sent over the wire.
    #[must_use]
    pub const fn code(self) -> i32 {
        self as i32
    }

    /// Decode a wire integer into an error code, if known.
    #[must_use]
    pub const fn from_code(code: i32) -> Option<Self> {
        match code {
            0 => Some(Self::Ok),
            -1 => Some(Self::General),
            -2 => Some(Self::IncompatibleApi),
            -3 => Some(Self::Blacklisted),
            -4 => Some(Self::LaunchFailed),
            -5 => Some(Self::NoSuchFile),
            -6 => Some(Self::NoSessionOpen),
            -7 => Some(Self::UnsavedChanges),
            -8 => Some(Self::NotNow),
            -9 => Some(Self::BadProject),
            -10 => Some(Self::CreateFailed),
            -11 => Some(Self::SessionLocked),
            -12 => Some(Self::OperationPending),
            -13 => Some(Self::SaveFailed),
            _ => None,
        }
    }
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Ok => "ok",
            Self::General => "general",
            Self::IncompatibleApi => "incompatible_api",
            Self::Blacklisted => "blacklisted",
            Self::LaunchFailed => "launch_failed",
            Self::NoSuchFile => "no_such_file",
            Self::NoSessionOpen => "no_session_open",
            Self::UnsavedChanges => "unsaved_changes",
            Self::NotNow => "not_now",
            Self::BadProject => "bad_project",
            Self::CreateFailed => "create_failed",
            Self::SessionLocked => "session_locked",
            Self::OperationPending => "operation_pending",
            Self::SaveFailed => "save_failed",
        };
        write!(f, "{name}")
    }
}

/// Crate-level error for local operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// I/O failure with the path involved.
    #[error("I/O error on {path:?}: {source}")]
    Io {
        /// Path the operation touched.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },

    /// Transport-level I/O failure.
    #[error("transport error: {0}")]
    Transport(#[from] std::io::Error),

    /// An OSC packet could not be encoded.
    #[error("OSC encode error: {0}")]
    OscEncode(String),

    /// A peer URL could not be parsed or resolved.
    #[error("invalid OSC URL '{0}'")]
    InvalidUrl(String),

    /// A session name failed validation.
    #[error("invalid session name '{0}'")]
    InvalidSessionName(String),

    /// A manifest line did not have the `name:executable:id` shape.
    #[error("malformed session manifest line {line}: '{text}'")]
    MalformedManifest {
        /// 1-based line number.
        line: usize,
        /// Offending text.
        text: String,
    },

    /// A client identifier collided or had the wrong shape.
    #[error("invalid client identifier '{0}'")]
    InvalidClientId(String),
}

impl Error {
    /// Wrap an I/O error with the path it concerned.
    #[must_use]
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}
