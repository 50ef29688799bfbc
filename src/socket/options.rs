//! Fluent builder for constructing a [`Socket`], modeled on the teacher's
//! `OpenOptions` (`fs/open_options.rs`).

use std::time::Duration;

use super::{Domain, Kind, Runtime, Socket};

pub struct SocketOptions {
    domain: Domain,
    kind: Kind,
    timeout: Option<Duration>,
}

impl SocketOptions {
    pub fn new(domain: Domain, kind: Kind) -> Self {
        Self {
            domain,
            kind,
            timeout: Some(crate::config::default_timeout()),
        }
    }

    pub fn timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn build(self, runtime: Runtime) -> Socket {
        let mut socket = Socket::new_unbound(self.domain, self.kind, runtime);
        socket.timeout = self.timeout;
        socket
    }
}
