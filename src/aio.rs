//! The off-loop resolver collaborator a [`Socket`](crate::socket::Socket)
//! submits DNS jobs to instead of blocking the caller's thread. Grounded in
//! the teacher's `BlockingPool`/`Worker`
//! (`scheduler/blocking_pool/{blocking_pool.rs,worker.rs}`): a lock-free
//! `SegQueue` carries jobs to a worker thread, a second carries completions
//! back.

use std::collections::HashMap;
use std::hint::spin_loop;
use std::io;
use std::net::{SocketAddr, ToSocketAddrs};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use crossbeam::queue::SegQueue;

use crate::coroutine::{CoroutineId, CoroutineRuntime, Waiter};
use crate::state::WakeReason;

/// A name resolution job submitted to the [`AioDispatcher`].
pub struct DnsJob {
    pub host: String,
    pub port: u16,
    pub waiter: Waiter,
}

/// The outcome of a completed [`DnsJob`], keyed by the coroutine that
/// submitted it.
pub struct DnsCompletion {
    pub waiter: Waiter,
    pub result: io::Result<Vec<SocketAddr>>,
}

/// External blocking-IO offload collaborator. A real deployment usually
/// backs this with the same thread pool filesystem/DNS calls already use;
/// this crate only needs it for host resolution (see
/// [`crate::resolver::resolve`]).
pub trait AioDispatcher: Send + Sync {
    fn submit(&self, job: DnsJob);

    /// Drains every completion produced since the last call.
    fn drain_completions(&self) -> Vec<DnsCompletion>;
}

/// Reference [`AioDispatcher`]: one worker thread draining jobs with the
/// blocking stdlib resolver, a pump thread turning completions back into
/// coroutine resumptions, and a results table so the resumed coroutine can
/// retrieve its own outcome.
pub struct ThreadAioPool {
    input: SegQueue<DnsJob>,
    output: SegQueue<DnsCompletion>,
    results: Mutex<HashMap<u64, io::Result<Vec<SocketAddr>>>>,
}

impl ThreadAioPool {
    pub fn new(runtime: Arc<dyn CoroutineRuntime>) -> Arc<Self> {
        let pool = Arc::new(Self {
            input: SegQueue::new(),
            output: SegQueue::new(),
            results: Mutex::new(HashMap::new()),
        });
        pool.clone().spawn_worker();
        pool.clone().spawn_pump(runtime);
        pool
    }

    fn spawn_worker(self: Arc<Self>) {
        thread::spawn(move || loop {
            let mut did_work = false;
            while let Some(job) = self.input.pop() {
                did_work = true;
                let result = (job.host.as_str(), job.port)
                    .to_socket_addrs()
                    .map(|iter| iter.collect::<Vec<_>>());
                self.output.push(DnsCompletion {
                    waiter: job.waiter,
                    result,
                });
            }
            if !did_work {
                for _ in 0..10 {
                    spin_loop();
                }
                thread::sleep(Duration::from_millis(5));
            }
        });
    }

    fn spawn_pump(self: Arc<Self>, runtime: Arc<dyn CoroutineRuntime>) {
        thread::spawn(move || loop {
            let completions = self.drain_completions();
            if completions.is_empty() {
                thread::sleep(Duration::from_millis(5));
                continue;
            }
            for completion in completions {
                let cid = completion.waiter.cid;
                self.results.lock().unwrap().insert(cid.0, completion.result);
                let slot = unsafe { completion.waiter.slot.as_ref() };
                if slot.mark_woken(WakeReason::ResolveComplete) {
                    tracing::trace!(cid = cid.0, "resolver resume");
                    runtime.resume(cid);
                }
            }
        });
    }

    /// Called by the resumed coroutine to retrieve (and consume) its own
    /// resolution result after a [`WakeReason::ResolveComplete`] wake.
    pub fn take_result(&self, cid: CoroutineId) -> Option<io::Result<Vec<SocketAddr>>> {
        self.results.lock().unwrap().remove(&cid.0)
    }
}

impl AioDispatcher for ThreadAioPool {
    fn submit(&self, job: DnsJob) {
        self.input.push(job);
    }

    fn drain_completions(&self) -> Vec<DnsCompletion> {
        let mut out = Vec::new();
        while let Some(completion) = self.output.pop() {
            out.push(completion);
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coroutine::thread_runtime::ThreadCoroutineRuntime;
    use crate::ptr::Ptr;
    use crate::state::SuspendSlot;

    #[test]
    fn resolves_localhost() {
        let runtime = ThreadCoroutineRuntime::new();
        let pool = ThreadAioPool::new(runtime.clone());

        let slot = Ptr::new(SuspendSlot::new(CoroutineId(42), -1));
        let waiter = Waiter { cid: CoroutineId(42), slot };
        pool.submit(DnsJob {
            host: "localhost".to_string(),
            port: 0,
            waiter,
        });

        let deadline = std::time::Instant::now() + Duration::from_secs(5);
        loop {
            if let Some(result) = pool.take_result(CoroutineId(42)) {
                let addrs = result.expect("resolution should succeed");
                assert!(!addrs.is_empty());
                break;
            }
            assert!(std::time::Instant::now() < deadline, "resolution never completed");
            thread::sleep(Duration::from_millis(10));
        }
        unsafe { slot.drop_in_place() };
    }
}
