//! `bind()`/`listen()`, generalizing the teacher's `get_tcp_listener_fd`
//! (`io/sys/unix/net.rs`), which only ever built an ipv4 listener fd, across
//! ipv4/ipv6/unix domains.

use std::os::fd::OwnedFd;
use std::os::unix::net::{UnixDatagram, UnixListener as StdUnixListener};

use nix::sys::socket::sockopt::{ReuseAddr, ReusePort};
use nix::sys::socket::{bind as nix_bind, listen, setsockopt, Backlog, SockaddrIn, SockaddrIn6};
use socket2::{Domain as RawDomain, Protocol, Socket as RawSocket, Type};
use std::net::SocketAddr;
use std::os::fd::{AsFd, FromRawFd, IntoRawFd};

use crate::error::SocketError;

use super::{Domain, Kind, Socket};

impl Socket {
    /// Binds the socket to `host:port` (or, for a unix-domain socket, to the
    /// filesystem path named by `host`; `port` is ignored). Must be called
    /// before [`Socket::listen`] or [`Socket::connect`].
    pub fn bind(&mut self, host: &str, port: u16) -> Result<(), SocketError> {
        if self.closed {
            return self.fail(SocketError::Closed);
        }
        if self.fd.is_some() {
            return self.fail(SocketError::binding_violation(
                "socket already has an open descriptor",
            ));
        }

        match self.domain {
            Domain::Unix => self.bind_unix(host),
            Domain::Ipv4 | Domain::Ipv6 => self.bind_inet(host, port),
        }
    }

    fn bind_inet(&mut self, host: &str, port: u16) -> Result<(), SocketError> {
        let ip = host
            .parse()
            .map_err(|_| SocketError::argument_invalid(format!("not a literal IP address: {host}")))?;
        let addr = SocketAddr::new(ip, port);

        let (raw_domain, sockaddr_is_v6) = match (self.domain, addr) {
            (Domain::Ipv4, SocketAddr::V4(_)) => (RawDomain::IPV4, false),
            (Domain::Ipv6, SocketAddr::V6(_)) => (RawDomain::IPV6, true),
            _ => {
                return self.fail(SocketError::argument_invalid(
                    "bind address family does not match socket domain",
                ))
            }
        };

        let (sock_type, protocol) = match self.kind {
            Kind::Stream => (Type::STREAM, Some(Protocol::TCP)),
            Kind::Datagram => (Type::DGRAM, Some(Protocol::UDP)),
        };
        let raw = RawSocket::new(raw_domain, sock_type, protocol).map_err(SocketError::System)?;
        raw.set_nonblocking(true).map_err(SocketError::System)?;
        let fd = raw.into_raw_fd();

        setsockopt(&unsafe { std::os::fd::BorrowedFd::borrow_raw(fd) }, ReuseAddr, &true)
            .map_err(|errno| SocketError::System(errno.into()))?;
        setsockopt(&unsafe { std::os::fd::BorrowedFd::borrow_raw(fd) }, ReusePort, &true)
            .map_err(|errno| SocketError::System(errno.into()))?;

        let bind_result = if sockaddr_is_v6 {
            let v6 = match addr {
                SocketAddr::V6(v6) => v6,
                _ => unreachable!(),
            };
            nix_bind(fd, &SockaddrIn6::from(v6))
        } else {
            let v4 = match addr {
                SocketAddr::V4(v4) => v4,
                _ => unreachable!(),
            };
            let octets = v4.ip().octets();
            nix_bind(
                fd,
                &SockaddrIn::new(octets[0], octets[1], octets[2], octets[3], v4.port()),
            )
        };
        bind_result.map_err(|errno| SocketError::System(errno.into()))?;

        self.fd = Some(unsafe { OwnedFd::from_raw_fd(fd) });
        self.bind_host = Some(host.to_string());
        self.bind_port = port;
        Ok(())
    }

    fn bind_unix(&mut self, path: &str) -> Result<(), SocketError> {
        let fd = match self.kind {
            Kind::Stream => {
                let listener = StdUnixListener::bind(path).map_err(SocketError::System)?;
                listener.set_nonblocking(true).map_err(SocketError::System)?;
                // We only wanted the path bound and the listening socket's fd;
                // the `listen` step re-applies the backlog nix-side for
                // symmetry with the inet path, so take ownership of the fd
                // here and let `listen` drive the syscall.
                listener.into_raw_fd()
            }
            Kind::Datagram => {
                let socket = UnixDatagram::bind(path).map_err(SocketError::System)?;
                socket.set_nonblocking(true).map_err(SocketError::System)?;
                socket.into_raw_fd()
            }
        };
        self.fd = Some(unsafe { OwnedFd::from_raw_fd(fd) });
        self.bind_host = Some(path.to_string());
        self.bind_port = 0;
        Ok(())
    }

    /// Starts listening with the given backlog. Must follow [`Socket::bind`];
    /// only meaningful for [`Kind::Stream`] sockets.
    pub fn listen(&mut self, backlog: i32) -> Result<(), SocketError> {
        if self.closed {
            return self.fail(SocketError::Closed);
        }
        if self.kind == Kind::Datagram {
            return self.fail(SocketError::argument_invalid(
                "listen() does not apply to a datagram socket",
            ));
        }
        let fd = match self.fd.as_ref() {
            Some(fd) => fd.as_fd(),
            None => return self.fail(SocketError::binding_violation("bind() must precede listen()")),
        };
        let nix_backlog =
            Backlog::new(backlog).map_err(|_| SocketError::argument_invalid("invalid backlog"))?;
        listen(&fd, nix_backlog).map_err(|errno| SocketError::System(errno.into()))?;
        self.backlog = backlog;
        self.active = true;
        Ok(())
    }
}
