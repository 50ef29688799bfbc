//! `recv()`/`send()`, grounded in `net/tcp/stream.rs`'s suspend/resume shape
//! and `io/read.rs`/`io/write.rs`'s `AsyncRead`/`AsyncWrite` trait split,
//! with the TLS direction-flip note applied: when `self.tls` is set, the
//! reactor registration direction follows `TlsState::want_read`/`want_write`
//! instead of the plain socket direction the syscall would otherwise imply.

use std::io::{self, Read, Write};
use std::os::unix::io::RawFd;
use std::time::Instant;

use crate::buf::Buffer;
use crate::coroutine::Waiter;
use crate::error::SocketError;
use crate::ptr::Ptr;
use crate::reactor::Direction;
use crate::state::{SuspendSlot, WakeReason};

use super::Socket;

/// A thin `Read + Write` view over a raw fd, used both for plaintext
/// syscalls and as the transport [`crate::tls::TlsState::step`] drives.
pub(super) struct FdIo(pub(super) RawFd);

impl Read for FdIo {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let borrowed = unsafe { std::os::fd::BorrowedFd::borrow_raw(self.0) };
        nix::unistd::read(&borrowed, buf).map_err(|errno| errno.into())
    }
}

impl Write for FdIo {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let borrowed = unsafe { std::os::fd::BorrowedFd::borrow_raw(self.0) };
        nix::unistd::write(borrowed, buf).map_err(|errno| errno.into())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl Socket {
    /// Reads into a freshly allocated [`Buffer`], suspending on readability
    /// as needed. Returns the number of bytes read; `0` means the peer
    /// closed the connection.
    #[tracing::instrument(skip(self))]
    pub fn recv(&mut self) -> Result<Buffer, SocketError> {
        if self.closed {
            return self.fail(SocketError::Closed);
        }
        if let Err(err) = self.bind_coroutine() {
            return self.fail(err);
        }
        let result = self.run_recv();
        self.unbind_coroutine();
        if let Err(err) = &result {
            tracing::debug!(%err, "recv failed");
        }
        result
    }

    fn run_recv(&mut self) -> Result<Buffer, SocketError> {
        let deadline = self.timeout.map(|t| Instant::now() + t);
        let fd = self.raw_fd().ok_or(SocketError::Closed)?;

        if self.tls.is_some() {
            return self.run_tls_recv(fd, deadline);
        }

        let mut buf = Buffer::with_default_len();
        let mut io = FdIo(fd);
        match io.read(buf.spare_mut()) {
            Ok(n) => {
                buf.set_written(n);
                return Ok(buf);
            }
            Err(err) if err.kind() == io::ErrorKind::WouldBlock => {
                self.suspend(fd, Direction::Readable, deadline)?;
            }
            Err(err) => return self.fail(SocketError::System(err)),
        }

        // Single retry after resume; a second EAGAIN (or any other error)
        // is terminal, per spec.md's "retry the primitive once".
        let mut io = FdIo(fd);
        match io.read(buf.spare_mut()) {
            Ok(n) => {
                buf.set_written(n);
                Ok(buf)
            }
            Err(err) => self.fail(SocketError::System(err)),
        }
    }

    fn run_tls_recv(&mut self, fd: RawFd, deadline: Option<Instant>) -> Result<Buffer, SocketError> {
        let mut out = Buffer::with_default_len();
        loop {
            let mut io = FdIo(fd);
            let n = {
                let tls = self.tls.as_mut().expect("checked by caller");
                if let Err(err) = tls.step(&mut io) {
                    return self.fail(err);
                }
                tls.decrypt(&mut out)?
            };
            if n > 0 {
                return Ok(out);
            }

            // Read the hints `step` just refreshed, not what they were
            // before this step ran: that's the I/O it still needs next.
            let (want_read, want_write) = {
                let tls = self.tls.as_ref().expect("checked by caller");
                (tls.want_read, tls.want_write)
            };

            let dir = if want_write {
                Direction::Writable
            } else if want_read {
                Direction::Readable
            } else {
                Direction::Readable
            };
            self.suspend(fd, dir, deadline)?;
        }
    }

    /// Sends `data`, suspending on writability as needed. Returns once the
    /// whole slice has been written.
    #[tracing::instrument(skip(self, data), fields(len = data.len()))]
    pub fn send(&mut self, data: &[u8]) -> Result<(), SocketError> {
        if self.closed {
            return self.fail(SocketError::Closed);
        }
        if let Err(err) = self.bind_coroutine() {
            return self.fail(err);
        }
        let result = self.run_send(data);
        self.unbind_coroutine();
        if let Err(err) = &result {
            tracing::debug!(%err, "send failed");
        }
        result
    }

    fn run_send(&mut self, data: &[u8]) -> Result<(), SocketError> {
        let deadline = self.timeout.map(|t| Instant::now() + t);
        let fd = self.raw_fd().ok_or(SocketError::Closed)?;

        if self.tls.is_some() {
            return self.run_tls_send(fd, data, deadline);
        }

        // Partial writes make progress without suspending; EAGAIN gets
        // exactly one suspend-and-retry, per spec.md's "retry the
        // primitive once" — a second EAGAIN after that is terminal.
        let mut offset = 0;
        let mut suspended = false;
        while offset < data.len() {
            let mut io = FdIo(fd);
            match io.write(&data[offset..]) {
                Ok(n) => offset += n,
                Err(err) if err.kind() == io::ErrorKind::WouldBlock && !suspended => {
                    self.suspend(fd, Direction::Writable, deadline)?;
                    suspended = true;
                }
                Err(err) => return self.fail(SocketError::System(err)),
            }
        }
        Ok(())
    }

    fn run_tls_send(
        &mut self,
        fd: RawFd,
        data: &[u8],
        deadline: Option<Instant>,
    ) -> Result<(), SocketError> {
        {
            let tls = self.tls.as_mut().expect("checked by caller");
            tls.encrypt(data)?;
        }
        loop {
            let mut io = FdIo(fd);
            {
                let tls = self.tls.as_mut().expect("checked by caller");
                if let Err(err) = tls.step(&mut io) {
                    return self.fail(err);
                }
            }

            // Post-step hints: what `step` still needs to do next, now that
            // it has drained whatever I/O was already ready.
            let (want_read, want_write, handshaking) = {
                let tls = self.tls.as_ref().expect("checked by caller");
                (tls.want_read, tls.want_write, tls.is_handshaking())
            };

            if !handshaking && !want_write {
                return Ok(());
            }

            let dir = if want_write {
                Direction::Writable
            } else if want_read {
                Direction::Readable
            } else {
                Direction::Writable
            };
            self.suspend(fd, dir, deadline)?;
        }
    }

    fn suspend(
        &mut self,
        fd: RawFd,
        dir: Direction,
        deadline: Option<Instant>,
    ) -> Result<(), SocketError> {
        let cid = self.cid.expect("recv/send bind a coroutine before suspending");
        let slot = Ptr::new(SuspendSlot::new(cid, fd));
        let waiter = Waiter { cid, slot };

        self.runtime.reactor.add(fd, dir, waiter).map_err(SocketError::System)?;

        self.timer = deadline.map(|deadline| {
            let remaining = deadline.saturating_duration_since(Instant::now());
            self.runtime.timer.arm(remaining, waiter)
        });

        tracing::trace!(fd, ?dir, "suspended on readiness");
        self.runtime.coroutines.yield_now();

        self.runtime.reactor.del(fd);
        if let Some(handle) = self.timer.take() {
            self.runtime.timer.disarm(handle);
        }

        let reason = unsafe { slot.as_ref() }.wake_reason();
        unsafe { slot.drop_in_place() };
        tracing::trace!(fd, ?reason, "resumed from recv/send suspend");

        match reason {
            Some(WakeReason::Readable) | Some(WakeReason::Writable) => Ok(()),
            Some(WakeReason::TimedOut) => self.fail(SocketError::TimedOut),
            other => self.fail(SocketError::System(io::Error::new(
                io::ErrorKind::Other,
                format!("unexpected wake reason during recv/send: {other:?}"),
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
    use std::io::{Read as _, Write as _};
    use std::net::TcpListener;
    use std::sync::Arc;

    fn test_runtime() -> (Runtime, Arc<ThreadCoroutineRuntime>) {
        let coroutines = ThreadCoroutineRuntime::new();
        let runtime = Runtime::new_reference(coroutines.clone() as Arc<dyn CoroutineRuntime>).unwrap();
        (runtime, coroutines)
    }

    #[test]
    fn recv_after_eagain_returns_sent_data() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();

        let server = std::thread::spawn(move || {
            let (mut stream, _) = listener.accept().unwrap();
            std::thread::sleep(std::time::Duration::from_millis(100));
            stream.write_all(b"hello").unwrap();
        });

        let (runtime, coroutines) = test_runtime();
        coroutines.spawn(move || {
            let mut socket = Socket::new_unbound(Domain::Ipv4, Kind::Stream, runtime);
            socket.set_timeout(Some(std::time::Duration::from_secs(2)));
            socket.connect("127.0.0.1", port).unwrap();
            let buf = socket.recv().expect("recv should succeed");
            assert_eq!(std::str::from_utf8(buf.as_ref()).unwrap(), "hello");
        });
        server.join().unwrap();
    }

    #[test]
    fn recv_times_out_with_no_data() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        let server = std::thread::spawn(move || {
            let (stream, _) = listener.accept().unwrap();
            std::thread::sleep(std::time::Duration::from_millis(300));
            drop(stream);
        });

        let (runtime, coroutines) = test_runtime();
        coroutines.spawn(move || {
            let mut socket = Socket::new_unbound(Domain::Ipv4, Kind::Stream, runtime);
            socket.set_timeout(Some(std::time::Duration::from_millis(50)));
            socket.connect("127.0.0.1", port).unwrap();
            let result = socket.recv();
            assert!(result.is_err());
            assert!(socket.last_error().unwrap().is_timed_out());
        });
        server.join().unwrap();
    }
}
