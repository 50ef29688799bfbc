//! Reference [`Reactor`] backed by `epoll`, grounded in the teacher's
//! `EpolledSelector` (`io/sys/unix/epoll/selector.rs`): one-shot
//! registration per fd, a fixed-size event buffer drained each pass.

use std::collections::HashMap;
use std::io;
use std::os::fd::{AsRawFd, BorrowedFd};
use std::os::unix::io::RawFd;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use nix::sys::epoll::{Epoll, EpollCreateFlags, EpollEvent, EpollFlags, EpollTimeout};

use super::{Direction, Reactor};
use crate::coroutine::{CoroutineRuntime, Waiter};
use crate::state::WakeReason;

const MAX_EVENTS: usize = 256;

struct Registration {
    waiter: Waiter,
    dir: Direction,
}

struct Inner {
    epoll: Epoll,
    registrations: HashMap<RawFd, Registration>,
}

/// An epoll-backed [`Reactor`]. Spawns a background polling thread on
/// construction that drives [`Reactor::dispatch`] in a loop, so sockets
/// registered with it get resumed without the caller driving an explicit
/// event loop — matching this crate's "blocking-style" facade over the
/// reactor's actual event-driven implementation.
pub struct EpollReactor {
    inner: Mutex<Inner>,
    runtime: Arc<dyn CoroutineRuntime>,
    shutdown: AtomicBool,
}

impl EpollReactor {
    pub fn new(runtime: Arc<dyn CoroutineRuntime>) -> io::Result<Arc<Self>> {
        let epoll = Epoll::new(EpollCreateFlags::empty()).map_err(io::Error::from)?;
        let reactor = Arc::new(Self {
            inner: Mutex::new(Inner {
                epoll,
                registrations: HashMap::new(),
            }),
            runtime,
            shutdown: AtomicBool::new(false),
        });
        reactor.clone().spawn_poller();
        Ok(reactor)
    }

    fn spawn_poller(self: Arc<Self>) {
        thread::spawn(move || {
            while !self.shutdown.load(Ordering::Relaxed) {
                if let Err(err) = self.dispatch(Duration::from_millis(100)) {
                    tracing::debug!(?err, "epoll dispatch pass failed");
                }
            }
        });
    }

    pub fn shut_down(&self) {
        self.shutdown.store(true, Ordering::Relaxed);
    }
}

impl Reactor for EpollReactor {
    fn add(&self, fd: RawFd, dir: Direction, waiter: Waiter) -> io::Result<()> {
        let mut inner = self.inner.lock().unwrap();
        let flags = match dir {
            Direction::Readable => EpollFlags::EPOLLIN | EpollFlags::EPOLLONESHOT,
            Direction::Writable => EpollFlags::EPOLLOUT | EpollFlags::EPOLLONESHOT,
        };
        let event = EpollEvent::new(flags, fd as u64);
        let borrowed = unsafe { BorrowedFd::borrow_raw(fd) };

        let result = if inner.registrations.contains_key(&fd) {
            inner.epoll.modify(borrowed, &mut { event })
        } else {
            inner.epoll.add(borrowed, event)
        };
        result.map_err(io::Error::from)?;

        inner.registrations.insert(fd, Registration { waiter, dir });
        Ok(())
    }

    fn del(&self, fd: RawFd) {
        let mut inner = self.inner.lock().unwrap();
        if inner.registrations.remove(&fd).is_some() {
            let borrowed = unsafe { BorrowedFd::borrow_raw(fd) };
            let _ = inner.epoll.delete(borrowed);
        }
    }

    fn dispatch(&self, budget: Duration) -> io::Result<usize> {
        let mut events = [EpollEvent::empty(); MAX_EVENTS];
        let timeout = EpollTimeout::try_from(budget.as_millis() as isize)
            .unwrap_or(EpollTimeout::NONE);

        let n = {
            let inner = self.inner.lock().unwrap();
            inner.epoll.wait(&mut events, timeout).map_err(io::Error::from)?
        };

        let mut resumed = 0;
        for event in events.iter().take(n) {
            let fd = event.data() as RawFd;
            let registration = {
                let mut inner = self.inner.lock().unwrap();
                inner.registrations.remove(&fd)
            };
            let Some(registration) = registration else {
                continue;
            };

            let reason = match registration.dir {
                Direction::Readable => WakeReason::Readable,
                Direction::Writable => WakeReason::Writable,
            };
            let slot = unsafe { registration.waiter.slot.as_ref() };
            if slot.mark_woken(reason) {
                tracing::trace!(fd, ?reason, cid = registration.waiter.cid.0, "readiness resume");
                self.runtime.resume(registration.waiter.cid);
                resumed += 1;
            }
        }
        Ok(resumed)
    }
}
