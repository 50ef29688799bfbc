//! The `Socket` facade: a blocking-style connect/recv/send/bind/listen/
//! accept/close/ssl_handshake API backed by the reactor/timer/aio/coroutine
//! collaborators in [`crate::reactor`], [`crate::timer`], [`crate::aio`],
//! and [`crate::coroutine`].

pub mod accept;
pub mod bind_listen;
pub mod close;
pub mod connect;
pub mod io_ops;
pub mod options;
pub mod ssl;

use std::os::fd::OwnedFd;
use std::sync::Arc;
use std::time::Duration;

use crate::aio::ThreadAioPool;
use crate::coroutine::{CoroutineId, CoroutineRuntime};
use crate::error::SocketError;
use crate::reactor::epoll::EpollReactor;
use crate::timer::{HeapTimerWheel, TimerHandle};
use crate::tls::TlsState;

pub use options::SocketOptions;

/// The address family a socket was created for.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum Domain {
    Ipv4,
    Ipv6,
    Unix,
}

/// Stream vs datagram semantics.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum Kind {
    Stream,
    Datagram,
}

/// The shared runtime collaborators every [`Socket`] operates against. A
/// deployment constructs one of these once and clones it (cheap — every
/// field is an `Arc`) for each socket it creates.
#[derive(Clone)]
pub struct Runtime {
    pub reactor: Arc<EpollReactor>,
    pub timer: Arc<HeapTimerWheel>,
    pub aio: Arc<ThreadAioPool>,
    pub coroutines: Arc<dyn CoroutineRuntime>,
}

impl Runtime {
    /// Builds the reference backends wired to a shared
    /// [`ThreadCoroutineRuntime`](crate::coroutine::thread_runtime::ThreadCoroutineRuntime).
    pub fn new_reference(coroutines: Arc<dyn CoroutineRuntime>) -> std::io::Result<Self> {
        Ok(Self {
            reactor: EpollReactor::new(coroutines.clone())?,
            timer: HeapTimerWheel::new(coroutines.clone()),
            aio: ThreadAioPool::new(coroutines.clone()),
            coroutines,
        })
    }
}

/// A single socket's state, exactly the data model this crate's spec
/// describes: an fd, the reactor/timer binding it currently holds (at most
/// one coroutine may be suspended on a socket at a time), resolved
/// host/port, bind parameters, a timeout, the last error, and optional TLS
/// sub-state.
pub struct Socket {
    pub(crate) domain: Domain,
    pub(crate) kind: Kind,
    pub(crate) fd: Option<OwnedFd>,
    pub(crate) runtime: Runtime,

    /// The coroutine currently suspended on this socket, if any. Checked and
    /// set at every suspending entry point to enforce "one coroutine at a
    /// time per socket".
    pub(crate) cid: Option<CoroutineId>,

    pub(crate) host: Option<String>,
    pub(crate) port: u16,

    pub(crate) bind_host: Option<String>,
    pub(crate) bind_port: u16,
    pub(crate) backlog: i32,

    pub(crate) timeout: Option<Duration>,
    pub(crate) timer: Option<TimerHandle>,

    pub(crate) last_error: Option<SocketError>,

    pub(crate) active: bool,
    pub(crate) closed: bool,
    pub(crate) removed_from_reactor: bool,

    pub(crate) tls: Option<TlsState>,
}

impl Socket {
    pub(crate) fn new_unbound(domain: Domain, kind: Kind, runtime: Runtime) -> Self {
        Self {
            domain,
            kind,
            fd: None,
            runtime,
            cid: None,
            host: None,
            port: 0,
            bind_host: None,
            bind_port: 0,
            backlog: 128,
            timeout: Some(crate::config::default_timeout()),
            timer: None,
            last_error: None,
            active: false,
            closed: false,
            removed_from_reactor: false,
            tls: None,
        }
    }

    pub fn domain(&self) -> Domain {
        self.domain
    }

    pub fn kind(&self) -> Kind {
        self.kind
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    pub fn set_timeout(&mut self, timeout: Option<Duration>) {
        self.timeout = timeout;
    }

    /// The last error recorded by a suspending operation, without consuming it.
    pub fn last_error(&self) -> Option<&SocketError> {
        self.last_error.as_ref()
    }

    /// Takes and clears the last recorded error.
    pub fn take_error(&mut self) -> Option<SocketError> {
        self.last_error.take()
    }

    pub(crate) fn bind_coroutine(&mut self) -> Result<CoroutineId, SocketError> {
        if self.cid.is_some() {
            return Err(SocketError::binding_violation(
                "a coroutine is already bound to this socket",
            ));
        }
        let cid = self.runtime.coroutines.current();
        self.cid = Some(cid);
        Ok(cid)
    }

    pub(crate) fn unbind_coroutine(&mut self) {
        self.cid = None;
    }

    /// Records `err` in `last_error` and returns it, so a caller that only
    /// inspects the socket after a resume sees the same information a
    /// direct `Result` would have given it.
    pub(crate) fn fail<T>(&mut self, err: SocketError) -> Result<T, SocketError> {
        self.last_error = Some(err.duplicate());
        Err(err)
    }

    pub(crate) fn raw_fd(&self) -> Option<std::os::unix::io::RawFd> {
        use std::os::fd::AsRawFd;
        self.fd.as_ref().map(|fd| fd.as_raw_fd())
    }
}
