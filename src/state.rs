//! Pooled per-operation suspend state.
//!
//! The teacher pools one `State` enum variant per IO operation kind (accept,
//! connect, read, write, close), each boxed and carrying the coroutine it
//! will resume plus a raw `*mut Result<..>` it writes its outcome into
//! before resuming. Every socket operation here follows the same
//! suspend-then-retry-the-syscall shape (see [`crate::socket::connect`]), so
//! a single slot shape suffices: it only needs to carry enough for a waker
//! (reactor, timer, or AIO completion) to know which coroutine to resume and
//! why, not the operation's actual result — the resumed coroutine re-issues
//! its own syscall and reads the real outcome itself.

use std::os::unix::io::RawFd;
use std::sync::atomic::{AtomicU8, Ordering};

use crate::coroutine::CoroutineId;

/// Why a suspended coroutine was resumed. Lets the resumed call distinguish
/// "the fd became ready" from "my timeout fired" from "the resolver
/// finished" without consulting three different subsystems.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum WakeReason {
    Readable,
    Writable,
    TimedOut,
    ResolveComplete,
}

const NONE: u8 = 0;
const READABLE: u8 = 1;
const WRITABLE: u8 = 2;
const TIMED_OUT: u8 = 3;
const RESOLVE_COMPLETE: u8 = 4;

impl WakeReason {
    fn to_u8(self) -> u8 {
        match self {
            WakeReason::Readable => READABLE,
            WakeReason::Writable => WRITABLE,
            WakeReason::TimedOut => TIMED_OUT,
            WakeReason::ResolveComplete => RESOLVE_COMPLETE,
        }
    }

    fn from_u8(value: u8) -> Option<Self> {
        match value {
            READABLE => Some(WakeReason::Readable),
            WRITABLE => Some(WakeReason::Writable),
            TIMED_OUT => Some(WakeReason::TimedOut),
            RESOLVE_COMPLETE => Some(WakeReason::ResolveComplete),
            _ => None,
        }
    }
}

/// The pinned, pooled state a suspending operation allocates before
/// yielding. Lives at a stable address (boxed behind [`crate::ptr::Ptr`])
/// for the duration of the suspension so the reactor/timer/AIO dispatcher
/// can hold a non-owning [`crate::coroutine::Waiter`] pointing at it.
///
/// The reference reactor/timer/AIO backends each run their own OS thread
/// (see DESIGN.md) and can call [`SuspendSlot::mark_woken`] on the same slot
/// at nearly the same instant — e.g. a deadline firing just as the fd
/// becomes writable. `woken_by` is therefore an atomic with a
/// compare-exchange, not a `Cell`: a `Cell` only protects against races
/// within a single thread, and `Ptr<T>`'s blanket `Sync` impl means nothing
/// else here catches a genuine cross-thread check-then-set race.
pub struct SuspendSlot {
    pub cid: CoroutineId,
    pub fd: RawFd,
    woken_by: AtomicU8,
}

impl SuspendSlot {
    pub fn new(cid: CoroutineId, fd: RawFd) -> Self {
        Self {
            cid,
            fd,
            woken_by: AtomicU8::new(NONE),
        }
    }

    /// Records why this slot's coroutine is being resumed. Only the first
    /// call wins: if both the reactor and the timer wheel race to resume
    /// the same coroutine, the `compare_exchange` ensures exactly one of
    /// them observes success, so exactly one calls `resume` and the other
    /// safely treats itself as a no-op instead of touching a slot that may
    /// already be torn down by the resumed coroutine.
    pub fn mark_woken(&self, reason: WakeReason) -> bool {
        self.woken_by
            .compare_exchange(NONE, reason.to_u8(), Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    pub fn wake_reason(&self) -> Option<WakeReason> {
        WakeReason::from_u8(self.woken_by.load(Ordering::Acquire))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_wake_wins() {
        let slot = SuspendSlot::new(CoroutineId(1), 3);
        assert!(slot.mark_woken(WakeReason::Readable));
        assert!(!slot.mark_woken(WakeReason::TimedOut));
        assert_eq!(slot.wake_reason(), Some(WakeReason::Readable));
    }
}
