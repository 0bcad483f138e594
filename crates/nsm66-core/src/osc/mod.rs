//! OSC wire protocol: message registry and UDP endpoint.
//!
//! Messages are OSC 1.0 over UDP. A message is a path (an ASCII string
//! beginning with `/`), a type signature, and typed arguments limited to
//! `string | int32 | float32`. The [`Tag`] registry maps every protocol
//! message to its fixed path and signature; [`Endpoint`] moves packets.

pub mod endpoint;
pub mod messages;

pub use endpoint::{Endpoint, OscAddr};
pub use messages::{Direction, Tag};

pub use rosc::{OscMessage, OscType};

/// Build an [`OscMessage`] for a registry tag from its arguments.
///
/// The caller is responsible for passing arguments matching the tag's
/// signature; variadic tags (`/reply`, broadcast relays) accept any args.
#[must_use]
pub fn message(tag: Tag, args: Vec<OscType>) -> OscMessage {
    OscMessage {
        addr: tag.path().to_string(),
        args,
    }
}

/// Shorthand for a string argument.
#[must_use]
pub fn s(value: impl Into<String>) -> OscType {
    OscType::String(value.into())
}

/// Shorthand for an int32 argument.
#[must_use]
pub const fn i(value: i32) -> OscType {
    OscType::Int(value)
}

/// Shorthand for a float32 argument.
#[must_use]
pub const fn f(value: f32) -> OscType {
    OscType::Float(value)
}

/// Extract a string argument at `index`, if present and of that type.
#[must_use]
pub fn str_arg(msg: &OscMessage, index: usize) -> Option<&str> {
    match msg.args.get(index) {
        Some(OscType::String(v)) => Some(v.as_str()),
        _ => None,
    }
}

/// Extract an int32 argument at `index`, if present and of that type.
#[must_use]
pub fn int_arg(msg: &OscMessage, index: usize) -> Option<i32> {
    match msg.args.get(index) {
        Some(OscType::Int(v)) => Some(*v),
        _ => None,
    }
}

/// Extract a float32 argument at `index`, if present and of that type.
#[must_use]
pub fn float_arg(msg: &OscMessage, index: usize) -> Option<f32> {
    match msg.args.get(index) {
        Some(OscType::Float(v)) => Some(*v),
        _ => None,
    }
}
