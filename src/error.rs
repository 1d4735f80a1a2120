//! The error type shared by the `ext` and `ntfs` drivers.
//!
//! The source this crate is modelled on keeps a single per-thread error slot
//! with a code and two formatted messages, reset before each call. Rust's
//! `Result` already carries that information structurally, so every fallible
//! operation here returns `Result<T, Error>` instead.

use std::fmt;
use std::io;

use thiserror::Error;

/// The five kinds of failure the core can report.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// The caller violated a precondition.
    Argument,
    /// A read against the image failed or came back short.
    Io,
    /// Identifying bytes did not match the expected filesystem.
    Magic,
    /// An on-disk structure failed a sanity invariant.
    Corrupt,
    /// A feature the core does not model.
    Unsupported,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Argument => "argument",
            Self::Io => "I/O",
            Self::Magic => "magic",
            Self::Corrupt => "corrupt",
            Self::Unsupported => "unsupported",
        };
        f.write_str(s)
    }
}

/// A failure raised by the ext or NTFS driver.
///
/// Every variant carries a `context` string identifying what was being
/// decoded (which group, which inode, which attribute) so call sites do not
/// need to format that into the message themselves.
#[derive(Debug, Error)]
pub enum Error {
    #[error("{context}: invalid argument: {message}")]
    Argument { message: String, context: String },

    #[error("{context}: I/O error: {source}")]
    Io {
        #[source]
        source: io::Error,
        context: String,
    },

    #[error("{context}: bad magic: {message}")]
    Magic { message: String, context: String },

    #[error("{context}: corrupt structure: {message}")]
    Corrupt { message: String, context: String },

    #[error("{context}: unsupported: {message}")]
    Unsupported { message: String, context: String },
}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Argument { .. } => ErrorKind::Argument,
            Self::Io { .. } => ErrorKind::Io,
            Self::Magic { .. } => ErrorKind::Magic,
            Self::Corrupt { .. } => ErrorKind::Corrupt,
            Self::Unsupported { .. } => ErrorKind::Unsupported,
        }
    }

    pub fn argument(context: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Argument {
            message: message.into(),
            context: context.into(),
        }
    }

    pub fn magic(context: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Magic {
            message: message.into(),
            context: context.into(),
        }
    }

    pub fn corrupt(context: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Corrupt {
            message: message.into(),
            context: context.into(),
        }
    }

    pub fn unsupported(context: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Unsupported {
            message: message.into(),
            context: context.into(),
        }
    }

    pub fn io(context: impl Into<String>, source: io::Error) -> Self {
        Self::Io {
            source,
            context: context.into(),
        }
    }
}

/// Shorthand used throughout the core.
pub type Result<T> = std::result::Result<T, Error>;

/// Raised when a walk range is given backwards (`start > end`).
///
/// Distinct from a general [`Error::Argument`] so tests and callers can match
/// on it precisely, per the boundary behaviour in the specification.
pub fn walk_range_error(context: impl Into<String>, start: u64, end: u64) -> Error {
    Error::argument(
        context,
        format!("walk range is backwards: start {start} > end {end}"),
    )
}
