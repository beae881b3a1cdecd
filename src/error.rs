//! Error types for the engine lifecycle and metadata access.

use std::path::{Path, PathBuf};
use thiserror::Error;

/// Result type used throughout the library.
pub type Result<T> = std::result::Result<T, Error>;

/// Failure to bring the engine up.
///
/// Returned by [`EngineLifecycle::try_initialize`](crate::EngineLifecycle::try_initialize).
/// All variants except [`LifecycleError::Terminated`] are recoverable by retrying.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LifecycleError {
    /// The metadata subsystem could not be acquired.
    #[error("could not initialize metadata subsystem: {0}")]
    MetaSubsystem(String),

    /// The file subsystem could not be acquired (the metadata subsystem was released again).
    #[error("could not initialize file subsystem: {0}")]
    FileSubsystem(String),

    /// The engine was terminated and cannot be brought up again.
    #[error("engine was terminated and cannot be re-initialized")]
    Terminated,
}

/// Errors from metadata access and the engine subsystems.
#[derive(Error, Debug)]
pub enum Error {
    /// A parse/write was attempted before `initialize()` succeeded.
    #[error("metadata engine is not initialized")]
    NotInitialized,

    /// A parse/write was attempted after `terminate()` began.
    #[error("metadata engine has been terminated")]
    Terminated,

    /// The file subsystem was started on a metadata subsystem that is not ready.
    #[error("{0} requires the metadata subsystem to be initialized first")]
    MetaNotReady(&'static str),

    /// The target path does not resolve to an existing file.
    #[error("file not found: {}", .0.display())]
    NotFound(PathBuf),

    /// I/O errors during file operations
    #[error("I/O error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The container has no known way to carry an XMP packet.
    #[error("unsupported format: {0}")]
    UnsupportedFormat(String),

    /// The container structure could not be parsed.
    #[error("malformed {format} file: {reason}")]
    Malformed { format: &'static str, reason: String },

    /// The packet text was rejected by the metadata subsystem.
    #[error("invalid metadata packet: {0}")]
    InvalidPacket(String),

    /// The packet does not fit into the container's metadata slot.
    #[error("metadata packet of {size} bytes exceeds the {limit} byte limit for {format}")]
    PacketTooLarge {
        format: &'static str,
        size: usize,
        limit: usize,
    },

    /// An update was attempted on a read-only file, or on a file opened for reading.
    #[error("file is read-only: {}", .0.display())]
    ReadOnly(PathBuf),

    /// The file has other hard links that an atomic replace would detach.
    #[error("file has {links} hard links and cannot be replaced atomically: {}", path.display())]
    HardLinked { path: PathBuf, links: u64 },
}

impl Error {
    /// Wrap an I/O error, mapping `NotFound` to [`Error::NotFound`].
    pub fn io(path: &Path, source: std::io::Error) -> Self {
        if source.kind() == std::io::ErrorKind::NotFound {
            Self::NotFound(path.to_path_buf())
        } else {
            Self::Io {
                path: path.to_path_buf(),
                source,
            }
        }
    }

    /// Create a new malformed-container error
    pub fn malformed<S: Into<String>>(format: &'static str, reason: S) -> Self {
        Self::Malformed {
            format,
            reason: reason.into(),
        }
    }

    /// Create a new invalid packet error
    pub fn invalid_packet<S: Into<String>>(msg: S) -> Self {
        Self::InvalidPacket(msg.into())
    }

    /// Create a new unsupported format error
    pub fn unsupported<S: Into<String>>(msg: S) -> Self {
        Self::UnsupportedFormat(msg.into())
    }

    /// `true` for outcomes a reader treats as "no metadata" rather than a failure.
    pub fn is_soft(&self) -> bool {
        !matches!(self, Self::NotInitialized | Self::Terminated)
    }
}
