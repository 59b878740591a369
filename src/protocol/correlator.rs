//! Request/response correlation and completion handling.
//!
//! Every outbound request registers a pending entry keyed by its exchange
//! identity (remote address for UDP queries, request id for RCON). Inbound
//! decoded responses, routing errors, timeouts, and disconnects all resolve
//! that entry through one primitive: atomically remove the entry, then signal
//! its completion handle. The oneshot sender inside the entry is consumed by
//! the send, so a handle is signaled exactly once no matter how many paths
//! race to resolve it; first arrival wins, later signals find no entry and
//! become logged no-ops.
//!
//! Read timeouts are armed after a successful write, one per exchange;
//! re-arming replaces the previous timer, and arming is skipped entirely when
//! the exchange has already resolved.

use std::collections::HashMap;
use std::fmt::Debug;
use std::hash::Hash;
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};

use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, trace, warn};

use crate::error::{constants, ProtocolError, Result};

/// The caller's side of one pending exchange.
///
/// Resolves exactly once, with the typed response or the failure that ended
/// the exchange.
#[derive(Debug)]
pub struct CompletionHandle<T> {
    rx: oneshot::Receiver<Result<T>>,
}

impl<T> CompletionHandle<T> {
    /// Wait for the exchange to resolve.
    pub async fn wait(self) -> Result<T> {
        self.rx
            .await
            .map_err(|_| ProtocolError::ConnectionClosed)?
    }
}

#[derive(Debug)]
struct PendingEntry<T> {
    tx: oneshot::Sender<Result<T>>,
    timeout: Option<JoinHandle<()>>,
    created_at: Instant,
}

/// Matches inbound responses to their originating requests and delivers each
/// outcome exactly once.
#[derive(Debug)]
pub struct Correlator<K, T> {
    pending: Arc<RwLock<HashMap<K, PendingEntry<T>>>>,
}

impl<K, T> Clone for Correlator<K, T> {
    fn clone(&self) -> Self {
        Self {
            pending: Arc::clone(&self.pending),
        }
    }
}

impl<K, T> Default for Correlator<K, T>
where
    K: Eq + Hash + Clone + Debug + Send + Sync + 'static,
    T: Send + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<K, T> Correlator<K, T>
where
    K: Eq + Hash + Clone + Debug + Send + Sync + 'static,
    T: Send + 'static,
{
    pub fn new() -> Self {
        Self {
            pending: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Register an exchange before its request is written.
    ///
    /// A stale entry under the same key (a resubmitted exchange) is resolved
    /// with a supersession failure so its caller never hangs.
    pub fn register(&self, key: K) -> Result<CompletionHandle<T>> {
        let (tx, rx) = oneshot::channel();
        let mut pending = self
            .pending
            .write()
            .map_err(|_| ProtocolError::Custom(constants::ERR_CORRELATOR_WRITE_LOCK.to_string()))?;

        if let Some(stale) = pending.insert(
            key.clone(),
            PendingEntry {
                tx,
                timeout: None,
                created_at: Instant::now(),
            },
        ) {
            warn!(?key, "pending request superseded by a newer registration");
            if let Some(handle) = stale.timeout {
                handle.abort();
            }
            let _ = stale
                .tx
                .send(Err(ProtocolError::Custom(format!(
                    "request superseded by a newer request for {key:?}"
                ))));
        }

        Ok(CompletionHandle { rx })
    }

    fn take(&self, key: &K) -> Option<PendingEntry<T>> {
        let mut pending = self.pending.write().ok()?;
        pending.remove(key)
    }

    fn resolve(&self, key: &K, outcome: Result<T>) -> bool {
        match self.take(key) {
            Some(entry) => {
                if let Some(handle) = entry.timeout {
                    handle.abort();
                }
                trace!(
                    ?key,
                    elapsed_ms = entry.created_at.elapsed().as_millis() as u64,
                    "resolving pending exchange"
                );
                // A dropped receiver means the caller gave up; nothing to do.
                let _ = entry.tx.send(outcome);
                true
            }
            None => {
                // First arrival already won; this signal is a no-op.
                debug!(?key, "signal for an already-resolved exchange dropped");
                false
            }
        }
    }

    /// Deliver a successful response. Returns whether this call resolved the
    /// exchange (false when it had already been resolved).
    pub fn complete(&self, key: &K, value: T) -> bool {
        self.resolve(key, Ok(value))
    }

    /// Deliver a failure. Same at-most-once contract as [`complete`].
    ///
    /// [`complete`]: Correlator::complete
    pub fn fail(&self, key: &K, error: ProtocolError) -> bool {
        self.resolve(key, Err(error))
    }

    /// Arm the read timeout for an exchange, after its write succeeded.
    ///
    /// Replaces any previously armed timer. Skipped when the exchange already
    /// resolved, so a duplicate write or a completed request never gains a
    /// spurious late failure. Must run inside a tokio runtime.
    pub fn arm_timeout(&self, key: K, duration: Duration) {
        let Ok(mut pending) = self.pending.write() else {
            return;
        };
        let Some(entry) = pending.get_mut(&key) else {
            trace!(?key, "timeout not armed, exchange already resolved");
            return;
        };

        if let Some(previous) = entry.timeout.take() {
            previous.abort();
        }

        let correlator = self.clone();
        entry.timeout = Some(tokio::spawn(async move {
            tokio::time::sleep(duration).await;
            if correlator.fail(&key, ProtocolError::Timeout) {
                debug!(?key, timeout_ms = duration.as_millis() as u64, "exchange timed out");
            }
        }));
    }

    /// Fail every outstanding exchange, used on disconnect.
    pub fn fail_all<F>(&self, make_error: F)
    where
        F: Fn() -> ProtocolError,
    {
        let Ok(mut pending) = self.pending.write() else {
            return;
        };
        for (key, entry) in pending.drain() {
            if let Some(handle) = entry.timeout {
                handle.abort();
            }
            debug!(?key, "failing pending exchange on shutdown");
            let _ = entry.tx.send(Err(make_error()));
        }
    }

    /// Number of unresolved exchanges.
    pub fn pending_len(&self) -> usize {
        self.pending.read().map(|p| p.len()).unwrap_or(0)
    }
}
