//! A thread-per-coroutine reference [`CoroutineRuntime`], standing in for a
//! real stackful/stackless scheduler so the suspend/resume protocol in
//! [`crate::socket`] is exercisable in tests without one.

use std::cell::Cell;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex};

use super::{CoroutineId, CoroutineRuntime};

thread_local! {
    static CURRENT: Cell<Option<CoroutineId>> = const { Cell::new(None) };
}

struct Parker {
    mutex: Mutex<bool>,
    condvar: Condvar,
}

impl Parker {
    fn new() -> Self {
        Self {
            mutex: Mutex::new(false),
            condvar: Condvar::new(),
        }
    }

    fn park(&self) {
        let mut woken = self.mutex.lock().unwrap();
        while !*woken {
            woken = self.condvar.wait(woken).unwrap();
        }
        *woken = false;
    }

    fn unpark(&self) {
        let mut woken = self.mutex.lock().unwrap();
        *woken = true;
        self.condvar.notify_one();
    }
}

/// Reference [`CoroutineRuntime`] backed by one OS thread per coroutine.
///
/// `spawn` registers the calling thread under a freshly minted id before
/// running `body`; `yield_now`/`resume` park/unpark that thread's
/// [`Parker`]. This has none of the scheduling properties a real coroutine
/// runtime needs (fairness, stack reuse, M:N multiplexing) — it exists to
/// give the core a real collaborator to suspend against in tests.
pub struct ThreadCoroutineRuntime {
    next_id: AtomicU64,
    parkers: Mutex<HashMap<u64, Arc<Parker>>>,
}

impl ThreadCoroutineRuntime {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            next_id: AtomicU64::new(1),
            parkers: Mutex::new(HashMap::new()),
        })
    }

    /// Registers the calling thread as a coroutine and runs `body` on it,
    /// returning `body`'s result once it completes.
    pub fn spawn<F, R>(self: &Arc<Self>, body: F) -> R
    where
        F: FnOnce() -> R,
    {
        let id = CoroutineId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let parker = Arc::new(Parker::new());
        self.parkers.lock().unwrap().insert(id.0, parker);
        CURRENT.with(|c| c.set(Some(id)));
        let result = body();
        self.parkers.lock().unwrap().remove(&id.0);
        CURRENT.with(|c| c.set(None));
        result
    }
}

impl CoroutineRuntime for ThreadCoroutineRuntime {
    fn current(&self) -> CoroutineId {
        CURRENT
            .with(|c| c.get())
            .expect("current() called off a coroutine thread")
    }

    fn yield_now(&self) {
        let id = self.current();
        let parker = self
            .parkers
            .lock()
            .unwrap()
            .get(&id.0)
            .cloned()
            .expect("yield_now() called for an unregistered coroutine");
        parker.park();
    }

    fn resume(&self, id: CoroutineId) {
        if let Some(parker) = self.parkers.lock().unwrap().get(&id.0).cloned() {
            parker.unpark();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};

    #[test]
    fn resume_wakes_a_parked_coroutine() {
        let runtime = ThreadCoroutineRuntime::new();
        let woke = Arc::new(AtomicBool::new(false));
        let woke_clone = woke.clone();
        let runtime_clone = runtime.clone();

        let id_holder: Arc<Mutex<Option<CoroutineId>>> = Arc::new(Mutex::new(None));
        let id_holder_clone = id_holder.clone();

        let handle = std::thread::spawn(move || {
            runtime_clone.spawn(|| {
                *id_holder_clone.lock().unwrap() = Some(runtime_clone.current());
                runtime_clone.yield_now();
                woke_clone.store(true, Ordering::SeqCst);
            });
        });

        // Wait until the spawned coroutine has registered its id.
        let id = loop {
            if let Some(id) = *id_holder.lock().unwrap() {
                break id;
            }
            std::thread::yield_now();
        };

        // Give the coroutine a moment to actually call yield_now before resuming.
        std::thread::sleep(std::time::Duration::from_millis(20));
        runtime.resume(id);
        handle.join().unwrap();
        assert!(woke.load(Ordering::SeqCst));
    }
}
