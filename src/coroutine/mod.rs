//! The suspend/resume protocol a [`Socket`](crate::socket::Socket) drives
//! against an external coroutine runtime.
//!
//! The teacher embeds the coroutine itself (a nightly-generator
//! `CoroutineImpl`) inside every suspend state and resumes it by calling
//! `Coroutine::resume` directly on the stored generator. That couples this
//! crate to a nightly feature set and makes the coroutine a owned value of
//! the IO layer rather than a handle into something external. Here a
//! suspend state stores only a [`CoroutineId`] — a stable, non-owning
//! handle — and resumption goes through the [`CoroutineRuntime`] trait,
//! which is the actual external collaborator spec'd at this seam.

pub mod thread_runtime;

use crate::ptr::Ptr;
use crate::state::SuspendSlot;

/// Opaque handle to a coroutine, minted by a [`CoroutineRuntime`].
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub struct CoroutineId(pub u64);

/// What a waiting operation hands to the reactor/timer/AIO dispatcher so
/// they can resume the right coroutine without owning it.
///
/// This is the "non-owning handle (weak reference or stable index into an
/// arena)" the redesign calls for in place of a raw coroutine pointer: the
/// slot is owned by the per-operation state pool ([`crate::state`]), not by
/// the waiter.
#[derive(Debug, Copy, Clone)]
pub struct Waiter {
    pub cid: CoroutineId,
    pub slot: Ptr<SuspendSlot>,
}

/// The external coroutine runtime a deployment supplies. A real one is a
/// stackful or stackless scheduler; this crate only needs these four
/// operations at the seam described in the spec's external-interfaces
/// section.
pub trait CoroutineRuntime: Send + Sync {
    /// The id of the coroutine currently executing on this thread.
    ///
    /// # Panics
    /// Implementations may panic if called off a coroutine-managed thread.
    fn current(&self) -> CoroutineId;

    /// Suspends the calling coroutine until some other party calls
    /// [`CoroutineRuntime::resume`] with its id.
    fn yield_now(&self);

    /// Resumes the coroutine identified by `id`. Idempotent-by-convention:
    /// resuming an id that is not currently suspended is a caller bug, not
    /// a runtime panic, since the event/timer race in the reactor can cause
    /// at most one side to win and the loser should have already checked
    /// that its registration was withdrawn before calling this.
    fn resume(&self, id: CoroutineId);
}
