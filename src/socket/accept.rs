//! `accept()`, grounded in the original `Socket::accept()` (socket.cc):
//! register read interest and suspend unconditionally, then call `accept4`
//! exactly once on resume — any failure there, including a further
//! `EAGAIN`, is terminal rather than another suspend.

use std::io;
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd};
use std::time::Instant;

use nix::sys::socket::{accept4, SockFlag};

use crate::coroutine::Waiter;
use crate::error::SocketError;
use crate::ptr::Ptr;
use crate::reactor::Direction;
use crate::state::{SuspendSlot, WakeReason};

use super::Socket;

impl Socket {
    /// Accepts one pending connection, suspending until one arrives (or the
    /// timeout elapses). Returns a new, already-active [`Socket`] for the
    /// accepted connection; `self` remains the listening socket.
    #[tracing::instrument(skip(self))]
    pub fn accept(&mut self) -> Result<Socket, SocketError> {
        if self.closed {
            return self.fail(SocketError::Closed);
        }
        if !self.active {
            return self.fail(SocketError::binding_violation(
                "accept() requires a listening socket",
            ));
        }

        if let Err(err) = self.bind_coroutine() {
            return self.fail(err);
        }
        let result = self.run_accept();
        self.unbind_coroutine();
        match &result {
            Ok(child) => tracing::debug!(child_fd = ?child.raw_fd(), "accepted a connection"),
            Err(err) => tracing::debug!(%err, "accept failed"),
        }
        result
    }

    fn run_accept(&mut self) -> Result<Socket, SocketError> {
        let deadline = self.timeout.map(|t| Instant::now() + t);
        let listen_fd = self.raw_fd().expect("listening socket has an fd");
        self.suspend_until_readable(listen_fd, deadline)?;
        match accept4(listen_fd, SockFlag::SOCK_CLOEXEC | SockFlag::SOCK_NONBLOCK) {
            Ok(incoming_fd) => {
                let mut child = Socket::new_unbound(self.domain, self.kind, self.runtime.clone());
                child.fd = Some(unsafe { OwnedFd::from_raw_fd(incoming_fd) });
                child.active = true;
                Ok(child)
            }
            Err(errno) => self.fail(SocketError::System(errno.into())),
        }
    }

    fn suspend_until_readable(
        &mut self,
        fd: std::os::unix::io::RawFd,
        deadline: Option<Instant>,
    ) -> Result<(), SocketError> {
        let cid = self.cid.expect("accept binds a coroutine before suspending");
        let slot = Ptr::new(SuspendSlot::new(cid, fd));
        let waiter = Waiter { cid, slot };

        self.runtime
            .reactor
            .add(fd, Direction::Readable, waiter)
            .map_err(SocketError::System)?;

        self.timer = deadline.map(|deadline| {
            let remaining = deadline.saturating_duration_since(Instant::now());
            self.runtime.timer.arm(remaining, waiter)
        });

        tracing::trace!(fd, "suspended waiting for an incoming connection");
        self.runtime.coroutines.yield_now();

        self.runtime.reactor.del(fd);
        if let Some(handle) = self.timer.take() {
            self.runtime.timer.disarm(handle);
        }

        let reason = unsafe { slot.as_ref() }.wake_reason();
        unsafe { slot.drop_in_place() };
        tracing::trace!(fd, ?reason, "resumed from accept suspend");

        match reason {
            Some(WakeReason::Readable) => Ok(()),
            Some(WakeReason::TimedOut) => self.fail(SocketError::TimedOut),
            other => self.fail(SocketError::System(io::Error::new(
                io::ErrorKind::Other,
                format!("unexpected wake reason while accepting: {other:?}"),
            ))),
        }
    }
}
