//! Coalesces concurrent loads of the same key into a single execution.
//!
//! Loading a value is the expensive part of operating a cache - it either invokes the user
//! supplied loader (which might query a slow backend) or performs a network round trip to a
//! peer. If many clients ask for the same key at the same time (a "thundering herd" on a
//! popular entry which just got evicted), we want exactly one of them to actually perform the
//! load while everyone else simply waits for its outcome.
//!
//! A [CallGroup](CallGroup) therefore keeps a table of pending calls, keyed by the cache key.
//! The first caller for a key registers a pending call and executes the load. All callers
//! arriving while the call is pending block on its completion signal and receive the very same
//! outcome. Once the load has completed, the pending call is removed from the table, so a
//! subsequent request for the same key starts a fresh load instead of re-using a stale result.
//!
//! Note that the table lock is never held while a load is executing - it only guards the
//! bookkeeping around the pending call table.
use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex};

use tokio::sync::watch;

use crate::view::ByteView;

/// Represents the shared outcome of a coalesced load.
///
/// As a single failure has to be reported to every coalesced caller, errors are shared via an
/// **Arc** instead of being consumed by the first caller.
pub type Outcome = Result<ByteView, Arc<anyhow::Error>>;

/// The completion signal of a pending call.
///
/// The slot stays **None** while the load is running and is flipped to the final outcome
/// exactly once.
type CompletionSignal = watch::Receiver<Option<Outcome>>;

/// Distinguishes the one caller executing the load from the callers joining a pending call.
enum Registration {
    Execute(watch::Sender<Option<Outcome>>),
    Join(CompletionSignal),
}

/// Removes a pending call from the table once its execution is over.
///
/// Being a drop guard, the removal also happens when the executing task is cancelled while
/// the load is still running.
struct PendingCallGuard<'a> {
    calls: &'a Mutex<HashMap<String, CompletionSignal>>,
    key: &'a str,
}

impl Drop for PendingCallGuard<'_> {
    fn drop(&mut self) {
        let _ = self.calls.lock().unwrap().remove(self.key);
    }
}

/// Ensures that per key at most one load is in flight at any point in time.
///
/// # Examples
/// ```
/// # use callisto::coalesce::CallGroup;
/// # use callisto::view::ByteView;
/// # #[tokio::main]
/// # async fn main() {
/// let group = CallGroup::new();
///
/// let value = group
///     .run("Tom", || async { Ok(ByteView::from("630")) })
///     .await
///     .unwrap();
///
/// assert_eq!(value.to_string(), "630");
/// # }
/// ```
pub struct CallGroup {
    calls: Mutex<HashMap<String, CompletionSignal>>,
}

impl Default for CallGroup {
    fn default() -> Self {
        CallGroup::new()
    }
}

impl CallGroup {
    /// Creates a new group with an empty pending call table.
    pub fn new() -> Self {
        CallGroup {
            calls: Mutex::new(HashMap::new()),
        }
    }

    /// Executes the given load for the given key, unless one is already in flight.
    ///
    /// For any set of concurrent calls with the same key, **load** is executed at most once
    /// and every caller observes the same outcome. Callers arriving after the pending call
    /// has completed trigger a fresh load.
    ///
    /// Note that the load is executed within the task of the registering caller. If that task
    /// is cancelled before the load completes, all waiting callers receive an error instead of
    /// blocking forever.
    pub async fn run<F, Fut>(&self, key: &str, load: F) -> Outcome
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = anyhow::Result<ByteView>>,
    {
        let registration = {
            let mut calls = self.calls.lock().unwrap();
            match calls.get(key) {
                Some(signal) => Registration::Join(signal.clone()),
                None => {
                    let (tx, rx) = watch::channel(None);
                    let _ = calls.insert(key.to_owned(), rx);
                    Registration::Execute(tx)
                }
            }
        };

        match registration {
            Registration::Join(signal) => self.await_completion(signal).await,
            Registration::Execute(tx) => {
                // The guard removes the pending call even if our task is cancelled mid-load.
                // Otherwise the key would be stuck joining a dead call forever...
                let pending = PendingCallGuard {
                    calls: &self.calls,
                    key,
                };

                let outcome = match load().await {
                    Ok(value) => Ok(value),
                    Err(error) => Err(Arc::new(error)),
                };

                // Publish the outcome to all waiters which joined this call, then drop the
                // pending call so that the next request for this key loads afresh...
                let _ = tx.send(Some(outcome.clone()));
                drop(pending);

                outcome
            }
        }
    }

    /// Blocks until the joined pending call publishes its outcome.
    async fn await_completion(&self, mut signal: CompletionSignal) -> Outcome {
        loop {
            let current = signal.borrow().clone();
            if let Some(outcome) = current {
                return outcome;
            }

            if signal.changed().await.is_err() {
                // The executing caller went away without publishing an outcome (its task was
                // most probably cancelled mid-load)...
                return Err(Arc::new(anyhow::anyhow!(
                    "The pending load for this key was aborted before a result was produced"
                )));
            }
        }
    }
}
