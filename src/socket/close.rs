//! `close()`, grounded in `net/tcp/stream.rs`'s `close`/`Drop` pair:
//! dropping a `Socket` that was never explicitly closed still releases the
//! fd and any outstanding reactor/timer registration.

use crate::error::SocketError;

use super::{Domain, Kind, Socket};

impl Socket {
    /// Closes the socket. Idempotent: a second call performs no syscalls and
    /// returns `Ok(false)` rather than `Ok(true)`, so a caller can tell
    /// "this call actually closed it" apart from "it was already closed".
    pub fn close(&mut self) -> Result<bool, SocketError> {
        if self.closed {
            tracing::trace!("close() on an already-closed socket is a no-op");
            return Ok(false);
        }
        self.teardown();
        Ok(true)
    }

    fn teardown(&mut self) {
        let fd = self.raw_fd();
        tracing::debug!(?fd, "closing socket");
        if let Some(handle) = self.timer.take() {
            self.runtime.timer.disarm(handle);
        }
        if !self.removed_from_reactor {
            if let Some(fd) = fd {
                self.runtime.reactor.del(fd);
            }
            self.removed_from_reactor = true;
        }
        self.fd = None;
        self.active = false;
        self.closed = true;

        if self.domain == Domain::Unix && self.kind == Kind::Datagram {
            if let Some(path) = &self.bind_host {
                if let Err(err) = std::fs::remove_file(path) {
                    tracing::debug!(%path, %err, "failed to unlink unix-dgram socket path");
                }
            }
        }
    }
}

impl Drop for Socket {
    fn drop(&mut self) {
        if !self.closed {
            self.teardown();
        }
    }
}
