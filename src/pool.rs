//! Per-function worker pools and shared runtime state
//!
//! A [`FunctionPool`] bridges invocation producers (the dispatcher) and
//! long-polling worker processes:
//! - `pending` — undelivered payloads, oldest first
//! - `waiting` — parked long-poll resolvers, keyed by poller id
//! - `processes` — live worker handles, keyed by poller id
//! - `requests` — per-invocation result resolvers, keyed by request id
//!
//! All resolvers are one-shot channels, so no request id or poller id can
//! ever be resolved twice. Every pool mutation happens under a single
//! mutex on the pool map; nothing is awaited while it is held.

use crate::invocation::{InvocationResponse, Payload};
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Mutex, MutexGuard, PoisonError};
use tokio::sync::oneshot;
use tracing::debug;

/// Handle to a live worker process, owned exclusively by its pool.
///
/// Dropping the handle (or sending on `kill`) tells the supervisor task
/// to terminate the OS process; the supervisor performs the single
/// "exited" transition that removes the handle again.
#[derive(Debug)]
pub struct WorkerHandle {
    kill: oneshot::Sender<()>,
}

impl WorkerHandle {
    pub fn new(kill: oneshot::Sender<()>) -> Self {
        Self { kill }
    }

    fn kill(self) {
        // The supervisor may already have reaped the process; a closed
        // channel just means there is nothing left to kill.
        let _ = self.kill.send(());
    }
}

/// Per-function bookkeeping between dispatch and worker long-polling.
#[derive(Debug, Default)]
pub struct FunctionPool {
    pending: VecDeque<Payload>,
    waiting: HashMap<String, oneshot::Sender<Payload>>,
    processes: HashMap<String, WorkerHandle>,
    requests: HashMap<String, oneshot::Sender<InvocationResponse>>,
}

/// How a payload left the dispatcher.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// Handed directly to a poller that was already waiting.
    Delivered,
    /// Queued; the caller should spawn a worker to consume it.
    Queued,
}

/// State shared by the runtime API server, the dispatcher, and the
/// watch loop: all pools keyed by function id, plus the warm map.
///
/// One instance exists per server port and is passed around explicitly;
/// there is no process-wide singleton.
#[derive(Debug)]
pub struct RuntimeState {
    port: u16,
    pools: Mutex<HashMap<String, FunctionPool>>,
    warm: Mutex<HashSet<String>>,
}

impl RuntimeState {
    pub fn new(port: u16) -> Self {
        Self {
            port,
            pools: Mutex::new(HashMap::new()),
            warm: Mutex::new(HashSet::new()),
        }
    }

    /// Port the runtime API listens on; baked into every worker's
    /// `AWS_LAMBDA_RUNTIME_API` address.
    pub fn port(&self) -> u16 {
        self.port
    }

    fn pools(&self) -> MutexGuard<'_, HashMap<String, FunctionPool>> {
        self.pools.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn warm_set(&self) -> MutexGuard<'_, HashSet<String>> {
        self.warm.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// True iff a build has succeeded for this function since the last
    /// drain.
    pub fn is_warm(&self, function: &str) -> bool {
        self.warm_set().contains(function)
    }

    pub fn mark_warm(&self, function: &str) {
        self.warm_set().insert(function.to_string());
    }

    pub fn mark_cold(&self, function: &str) {
        self.warm_set().remove(function);
    }

    /// Registers the one-shot resolver for a request id and returns the
    /// receiving half the caller awaits. Must happen before the payload
    /// becomes visible to any poller, so a fast worker cannot respond to
    /// an unregistered id.
    pub fn register_request(
        &self,
        function: &str,
        request_id: &str,
    ) -> oneshot::Receiver<InvocationResponse> {
        let (tx, rx) = oneshot::channel();
        self.pools()
            .entry(function.to_string())
            .or_default()
            .requests
            .insert(request_id.to_string(), tx);
        rx
    }

    /// Hands the payload to a waiting poller if one exists, otherwise
    /// queues it. Matching and queuing happen under one lock, so a
    /// payload is never both delivered and queued.
    pub fn dispatch_payload(&self, function: &str, payload: Payload) -> DispatchOutcome {
        let mut pools = self.pools();
        let pool = pools.entry(function.to_string()).or_default();
        let mut payload = payload;
        // Delivery order among multiple waiting pollers is unspecified;
        // a poller whose receiver is gone is simply skipped.
        while let Some(poller_id) = pool.waiting.keys().next().cloned() {
            if let Some(tx) = pool.waiting.remove(&poller_id) {
                match tx.send(payload) {
                    Ok(()) => return DispatchOutcome::Delivered,
                    Err(returned) => payload = returned,
                }
            }
        }
        pool.pending.push_back(payload);
        DispatchOutcome::Queued
    }

    /// Long-poll body: returns the oldest pending payload immediately,
    /// or parks the poller until the dispatcher hands one over. There is
    /// no timeout; `None` means the parked resolver was dropped because
    /// the owning process exited.
    pub async fn next_invocation(&self, poller_id: &str, function: &str) -> Option<Payload> {
        let rx = {
            let mut pools = self.pools();
            let pool = pools.entry(function.to_string()).or_default();
            if let Some(payload) = pool.pending.pop_front() {
                return Some(payload);
            }
            let (tx, rx) = oneshot::channel();
            pool.waiting.insert(poller_id.to_string(), tx);
            rx
        };
        rx.await.ok()
    }

    /// Resolves the request id with the worker's result. An unknown or
    /// already-consumed id is a non-fatal no-op by design: the worker may
    /// retry deliveries the emulator has already settled.
    pub fn respond(&self, function: &str, request_id: &str, response: InvocationResponse) {
        let tx = self
            .pools()
            .entry(function.to_string())
            .or_default()
            .requests
            .remove(request_id);
        match tx {
            Some(tx) => {
                // A dropped receiver means the triggering caller went
                // away; nothing left to notify.
                let _ = tx.send(response);
            }
            None => {
                debug!(function, request_id, "dropping response for unknown request id");
            }
        }
    }

    /// Unregisters a request resolver that will never be serviced, e.g.
    /// when the worker meant to consume its payload failed to spawn.
    pub fn forget_request(&self, function: &str, request_id: &str) {
        if let Some(pool) = self.pools().get_mut(function) {
            pool.requests.remove(request_id);
        }
    }

    /// Tracks a freshly spawned worker in its pool.
    pub fn insert_process(&self, function: &str, poller_id: &str, handle: WorkerHandle) {
        self.pools()
            .entry(function.to_string())
            .or_default()
            .processes
            .insert(poller_id.to_string(), handle);
    }

    /// The single "exited" transition: forget the process handle and any
    /// long-poll resolver it still owned.
    pub fn worker_exited(&self, function: &str, poller_id: &str) {
        let mut pools = self.pools();
        if let Some(pool) = pools.get_mut(function) {
            pool.processes.remove(poller_id);
            pool.waiting.remove(poller_id);
        }
    }

    /// Terminates every tracked process for the function and clears its
    /// waiting set. `pending` and `requests` stay untouched: queued
    /// payloads are served by the next spawned worker, and outstanding
    /// requests settle when (if) that happens.
    pub fn drain(&self, function: &str) {
        let (handles, waiting) = {
            let mut pools = self.pools();
            let Some(pool) = pools.get_mut(function) else {
                return;
            };
            (
                std::mem::take(&mut pool.processes),
                std::mem::take(&mut pool.waiting),
            )
        };
        debug!(function, processes = handles.len(), "draining function pool");
        for (_, handle) in handles {
            handle.kill();
        }
        drop(waiting);
    }

    /// Number of live worker processes tracked for the function.
    pub fn process_count(&self, function: &str) -> usize {
        self.pools()
            .get(function)
            .map_or(0, |pool| pool.processes.len())
    }

    /// Number of queued, undelivered payloads for the function.
    pub fn pending_count(&self, function: &str) -> usize {
        self.pools()
            .get(function)
            .map_or(0, |pool| pool.pending.len())
    }

    /// Number of parked long-poll resolvers for the function.
    pub fn waiting_count(&self, function: &str) -> usize {
        self.pools()
            .get(function)
            .map_or(0, |pool| pool.waiting.len())
    }
}
