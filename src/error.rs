//! Error taxonomy for socket operations.

use std::fmt;
use std::io;

/// Everything a [`Socket`](crate::socket::Socket) operation can fail with.
///
/// Every suspending operation stores its failure here (readable via
/// [`Socket::last_error`](crate::socket::Socket::last_error)) in addition to
/// returning it, so a caller that only inspects the socket after a resume
/// still sees the same information a direct `Result` would have given it.
#[derive(Debug, thiserror::Error)]
pub enum SocketError {
    /// An argument given to a socket operation was invalid (bad host/port,
    /// unsupported domain/kind combination, zero-length buffer, etc).
    #[error("invalid argument: {0}")]
    ArgumentInvalid(String),

    /// The operation violated a binding invariant (e.g. a second coroutine
    /// tried to operate on a socket that is already bound to another, or an
    /// operation was attempted on an already-bound listening socket).
    #[error("binding violation: {0}")]
    BindingViolation(String),

    /// Name resolution failed or produced no usable address.
    #[error("resolve failed for {host:?}: {reason}")]
    ResolveFailed { host: String, reason: String },

    /// The operation's timeout elapsed before it completed.
    #[error("operation timed out")]
    TimedOut,

    /// The underlying OS call failed.
    #[error("system error: {0}")]
    System(#[from] io::Error),

    /// A TLS handshake or record-layer operation failed.
    #[error("tls error: {0}")]
    Tls(String),

    /// The socket was already closed when the operation was attempted.
    #[error("socket is closed")]
    Closed,
}

impl SocketError {
    pub fn argument_invalid(msg: impl Into<String>) -> Self {
        SocketError::ArgumentInvalid(msg.into())
    }

    pub fn binding_violation(msg: impl Into<String>) -> Self {
        SocketError::BindingViolation(msg.into())
    }

    pub fn resolve_failed(host: impl Into<String>, reason: impl fmt::Display) -> Self {
        SocketError::ResolveFailed {
            host: host.into(),
            reason: reason.to_string(),
        }
    }

    pub fn is_timed_out(&self) -> bool {
        matches!(self, SocketError::TimedOut)
    }

    pub fn is_closed(&self) -> bool {
        matches!(self, SocketError::Closed)
    }

    /// Builds an independent copy for storing in `Socket::last_error` while
    /// the original is returned to the caller. `io::Error` isn't `Clone`, so
    /// this reconstructs it from its kind and message rather than deriving
    /// `Clone` on the whole enum.
    pub fn duplicate(&self) -> SocketError {
        match self {
            SocketError::ArgumentInvalid(msg) => SocketError::ArgumentInvalid(msg.clone()),
            SocketError::BindingViolation(msg) => SocketError::BindingViolation(msg.clone()),
            SocketError::ResolveFailed { host, reason } => SocketError::ResolveFailed {
                host: host.clone(),
                reason: reason.clone(),
            },
            SocketError::TimedOut => SocketError::TimedOut,
            SocketError::System(err) => SocketError::System(io::Error::new(err.kind(), err.to_string())),
            SocketError::Tls(msg) => SocketError::Tls(msg.clone()),
            SocketError::Closed => SocketError::Closed,
        }
    }

    /// A rough kind label, for callers that want to match without exposing
    /// payload fields (mirrors the seven-way kind taxonomy this enum encodes).
    pub fn kind(&self) -> ErrorKind {
        match self {
            SocketError::ArgumentInvalid(_) => ErrorKind::ArgumentInvalid,
            SocketError::BindingViolation(_) => ErrorKind::BindingViolation,
            SocketError::ResolveFailed { .. } => ErrorKind::ResolveFailed,
            SocketError::TimedOut => ErrorKind::TimedOut,
            SocketError::System(_) => ErrorKind::System,
            SocketError::Tls(_) => ErrorKind::Tls,
            SocketError::Closed => ErrorKind::Closed,
        }
    }
}

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum ErrorKind {
    ArgumentInvalid,
    BindingViolation,
    ResolveFailed,
    TimedOut,
    System,
    Tls,
    Closed,
}

pub type SocketResult<T> = Result<T, SocketError>;
