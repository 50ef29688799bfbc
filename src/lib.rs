//! A coroutine-oriented socket facade: [`Socket`] presents blocking-style
//! connect/recv/send/bind/listen/accept/close/ssl_handshake methods, backed
//! internally by an event-driven [`reactor`], a one-shot [`timer`] wheel, an
//! [`aio`] (DNS) dispatcher, and a pluggable [`coroutine`] runtime.

pub mod aio;
pub mod buf;
pub mod config;
pub mod coroutine;
pub mod error;
pub mod ptr;
pub mod reactor;
pub mod resolver;
pub mod socket;
pub mod state;
pub mod timer;
pub mod tls;

pub use error::{ErrorKind, SocketError, SocketResult};
pub use socket::{Domain, Kind, Runtime, Socket, SocketOptions};
pub use tls::{ensure_crypto_provider, TlsOptions};
