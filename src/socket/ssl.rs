//! `ssl_handshake()`, wiring [`TlsState::step`](crate::tls::TlsState::step)
//! into the same suspend/resume protocol `connect`/`accept` use, with the
//! registration direction taken from the handshake's own want-read/
//! want-write hints rather than a fixed direction.

use std::io;
use std::time::Instant;

use crate::coroutine::Waiter;
use crate::error::SocketError;
use crate::ptr::Ptr;
use crate::reactor::Direction;
use crate::state::{SuspendSlot, WakeReason};
use crate::tls::{TlsOptions, TlsState};

use super::io_ops::FdIo;
use super::Socket;

impl Socket {
    /// Performs the TLS handshake over an already-connected socket. On
    /// success, subsequent [`Socket::recv`](super::io_ops)/
    /// [`Socket::send`](super::io_ops) calls encrypt/decrypt transparently.
    #[tracing::instrument(skip(self, opts), fields(server_name = %opts.server_name))]
    pub fn ssl_handshake(&mut self, opts: TlsOptions) -> Result<(), SocketError> {
        if self.closed {
            return self.fail(SocketError::Closed);
        }
        if !self.active {
            return self.fail(SocketError::binding_violation(
                "ssl_handshake() requires an already-connected socket",
            ));
        }
        if let Err(err) = self.bind_coroutine() {
            return self.fail(err);
        }

        let state = match TlsState::new(&opts) {
            Ok(state) => state,
            Err(err) => {
                self.unbind_coroutine();
                return self.fail(err);
            }
        };
        self.tls = Some(state);

        let result = self.run_handshake();
        self.unbind_coroutine();
        if let Err(err) = &result {
            tracing::debug!(%err, "tls handshake failed");
            self.tls = None;
        } else {
            tracing::debug!("tls handshake completed");
        }
        result
    }

    /// True once a prior [`Socket::ssl_handshake`] call completed
    /// successfully and the socket is ready to exchange application data
    /// over TLS.
    pub fn tls_ready(&self) -> bool {
        self.tls.as_ref().is_some_and(|tls| !tls.is_handshaking())
    }

    fn run_handshake(&mut self) -> Result<(), SocketError> {
        let deadline = self.timeout.map(|t| Instant::now() + t);
        let fd = self.raw_fd().ok_or(SocketError::Closed)?;

        loop {
            let still_handshaking = {
                let tls = self.tls.as_ref().expect("set by ssl_handshake");
                tls.is_handshaking()
            };
            if !still_handshaking {
                return Ok(());
            }

            let mut io = FdIo(fd);
            let step_result = {
                let tls = self.tls.as_mut().expect("set by ssl_handshake");
                tls.step(&mut io)
            };
            if let Err(err) = step_result {
                return self.fail(err);
            }

            // `step` just updated `want_read`/`want_write` to whatever it
            // still needs *after* doing all the I/O it could do without
            // blocking; that is what the next suspend must wait on, not the
            // (now-satisfied) hint that was true before this step ran.
            let (still_handshaking, want_read, want_write) = {
                let tls = self.tls.as_ref().expect("set by ssl_handshake");
                (tls.is_handshaking(), tls.want_read, tls.want_write)
            };
            if !still_handshaking {
                return Ok(());
            }

            let dir = if want_write {
                Direction::Writable
            } else if want_read {
                Direction::Readable
            } else {
                Direction::Readable
            };
            self.suspend_handshake(fd, dir, deadline)?;
        }
    }

    fn suspend_handshake(
        &mut self,
        fd: std::os::unix::io::RawFd,
        dir: Direction,
        deadline: Option<Instant>,
    ) -> Result<(), SocketError> {
        let cid = self.cid.expect("ssl_handshake binds a coroutine before suspending");
        let slot = Ptr::new(SuspendSlot::new(cid, fd));
        let waiter = Waiter { cid, slot };

        self.runtime.reactor.add(fd, dir, waiter).map_err(SocketError::System)?;

        self.timer = deadline.map(|deadline| {
            let remaining = deadline.saturating_duration_since(Instant::now());
            self.runtime.timer.arm(remaining, waiter)
        });

        tracing::trace!(fd, ?dir, "suspended mid-handshake");
        self.runtime.coroutines.yield_now();

        self.runtime.reactor.del(fd);
        if let Some(handle) = self.timer.take() {
            self.runtime.timer.disarm(handle);
        }

        let reason = unsafe { slot.as_ref() }.wake_reason();
        unsafe { slot.drop_in_place() };
        tracing::trace!(fd, ?reason, "resumed from handshake suspend");

        match reason {
            Some(WakeReason::Readable) | Some(WakeReason::Writable) => Ok(()),
            Some(WakeReason::TimedOut) => self.fail(SocketError::TimedOut),
            other => self.fail(SocketError::System(io::Error::new(
                io::ErrorKind::Other,
                format!("unexpected wake reason during handshake: {other:?}"),
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coroutine::thread_runtime::ThreadCoroutineRuntime;
    use crate::coroutine::CoroutineRuntime;
    use crate::socket::{Domain, Kind, Runtime};
    use std::sync::Arc;

    fn test_runtime() -> (Runtime, Arc<ThreadCoroutineRuntime>) {
        let coroutines = ThreadCoroutineRuntime::new();
        let runtime = Runtime::new_reference(coroutines.clone() as Arc<dyn CoroutineRuntime>).unwrap();
        (runtime, coroutines)
    }

    #[test]
    fn ssl_handshake_rejects_unconnected_socket() {
        let (runtime, coroutines) = test_runtime();
        coroutines.spawn(move || {
            let mut socket = Socket::new_unbound(Domain::Ipv4, Kind::Stream, runtime);
            let opts = TlsOptions::new("example.com");
            assert!(socket.ssl_handshake(opts).is_err());
        });
    }
}
