//! The timeout collaborator a [`Socket`](crate::socket::Socket) arms
//! alongside readiness interest whenever it suspends with a configured
//! timeout. Grounded in the teacher's `SleepingCoroutine`/`BTreeSet`
//! deadline ordering (`sleep/mod.rs`, `scheduler/scheduler.rs`), generalized
//! into an explicit trait with a cancellable handle.

use std::cmp::Reverse;
use std::collections::BinaryHeap;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use slab::Slab;

use crate::coroutine::{CoroutineRuntime, Waiter};
use crate::state::WakeReason;

/// A handle to an armed timer, used to cancel it before it fires.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct TimerHandle(usize);

pub trait TimerWheel: Send + Sync {
    /// Arms a one-shot timer that resumes `waiter.cid` after `dur` elapses.
    fn arm(&self, dur: Duration, waiter: Waiter) -> TimerHandle;

    /// Cancels a timer before it fires. Returns `true` if the timer was
    /// still pending (and is now removed); `false` if it had already fired
    /// or been cancelled, in which case this is a no-op — the event-vs-timer
    /// race is resolved by whichever side gets here first.
    fn disarm(&self, handle: TimerHandle) -> bool;
}

struct Entry {
    waiter: Waiter,
}

struct Inner {
    heap: BinaryHeap<Reverse<(Instant, usize)>>,
    slab: Slab<Entry>,
}

/// Reference [`TimerWheel`] backed by a min-heap of deadlines plus a slab of
/// payloads, with a background thread that sleeps until the next deadline
/// and resumes the matching coroutine.
pub struct HeapTimerWheel {
    inner: Mutex<Inner>,
    runtime: Arc<dyn CoroutineRuntime>,
}

impl HeapTimerWheel {
    pub fn new(runtime: Arc<dyn CoroutineRuntime>) -> Arc<Self> {
        let wheel = Arc::new(Self {
            inner: Mutex::new(Inner {
                heap: BinaryHeap::new(),
                slab: Slab::new(),
            }),
            runtime,
        });
        wheel.clone().spawn_pump();
        wheel
    }

    fn spawn_pump(self: Arc<Self>) {
        thread::spawn(move || loop {
            let next_fire = {
                let inner = self.inner.lock().unwrap();
                inner.heap.peek().map(|Reverse((deadline, _))| *deadline)
            };

            match next_fire {
                None => thread::sleep(Duration::from_millis(20)),
                Some(deadline) => {
                    let now = Instant::now();
                    if deadline > now {
                        thread::sleep((deadline - now).min(Duration::from_millis(20)));
                        continue;
                    }
                    self.fire_due();
                }
            }
        });
    }

    fn fire_due(&self) {
        let now = Instant::now();
        loop {
            let due = {
                let mut inner = self.inner.lock().unwrap();
                match inner.heap.peek() {
                    Some(Reverse((deadline, _))) if *deadline <= now => {
                        let Reverse((_, key)) = inner.heap.pop().unwrap();
                        inner.slab.try_remove(key)
                    }
                    _ => None,
                }
            };
            let Some(entry) = due else { break };
            let slot = unsafe { entry.waiter.slot.as_ref() };
            if slot.mark_woken(WakeReason::TimedOut) {
                tracing::trace!(cid = entry.waiter.cid.0, "timer resume");
                self.runtime.resume(entry.waiter.cid);
            }
        }
    }
}

impl TimerWheel for HeapTimerWheel {
    fn arm(&self, dur: Duration, waiter: Waiter) -> TimerHandle {
        let deadline = Instant::now() + dur;
        let mut inner = self.inner.lock().unwrap();
        let key = inner.slab.insert(Entry { waiter });
        inner.heap.push(Reverse((deadline, key)));
        TimerHandle(key)
    }

    fn disarm(&self, handle: TimerHandle) -> bool {
        let mut inner = self.inner.lock().unwrap();
        inner.slab.try_remove(handle.0).is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coroutine::thread_runtime::ThreadCoroutineRuntime;
    use crate::coroutine::CoroutineId;
    use crate::ptr::Ptr;
    use crate::state::SuspendSlot;

    #[test]
    fn fires_after_duration() {
        let runtime = ThreadCoroutineRuntime::new();
        let wheel = HeapTimerWheel::new(runtime.clone());

        let slot = Ptr::new(SuspendSlot::new(CoroutineId(7), -1));
        let waiter = Waiter { cid: CoroutineId(7), slot };
        wheel.arm(Duration::from_millis(30), waiter);

        let deadline = Instant::now() + Duration::from_secs(2);
        loop {
            if unsafe { slot.as_ref() }.wake_reason().is_some() {
                break;
            }
            assert!(Instant::now() < deadline, "timer never fired");
            thread::sleep(Duration::from_millis(5));
        }
        assert_eq!(unsafe { slot.as_ref() }.wake_reason(), Some(WakeReason::TimedOut));
        unsafe { slot.drop_in_place() };
    }

    #[test]
    fn disarm_before_fire_prevents_resume() {
        let runtime = ThreadCoroutineRuntime::new();
        let wheel = HeapTimerWheel::new(runtime.clone());

        let slot = Ptr::new(SuspendSlot::new(CoroutineId(8), -1));
        let waiter = Waiter { cid: CoroutineId(8), slot };
        let handle = wheel.arm(Duration::from_millis(200), waiter);

        assert!(wheel.disarm(handle));
        assert!(!wheel.disarm(handle));

        thread::sleep(Duration::from_millis(300));
        assert!(unsafe { slot.as_ref() }.wake_reason().is_none());
        unsafe { slot.drop_in_place() };
    }
}
