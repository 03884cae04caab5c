//! Single-assignment value cells used as the gateway's concurrency primitive.
//!
//! A [`Promise`] is a cell that settles at most once, either fulfilled with a
//! value or rejected with a [`GateError`]. Children attached with [`then`],
//! [`then_promise`] and [`catch`] are notified in attachment order; waiters
//! block on [`wait`] until the cell settles. Combinators ([`all`], [`race`],
//! [`timeout`]) compose cells, and [`spawn`] bridges tokio futures into
//! promise chains.
//!
//! The cell is an explicit state machine behind a mutex. Callbacks never run
//! while the lock is held, so a callback may freely settle other promises
//! (including re-entering the one that invoked it). A rejected cell with no
//! children holds its reason silently until something waits on it.
//!
//! [`then`]: Promise::then
//! [`then_promise`]: Promise::then_promise
//! [`catch`]: Promise::catch
//! [`wait`]: Promise::wait
//! [`all`]: Promise::all
//! [`race`]: Promise::race
//! [`timeout`]: Promise::timeout
//! [`spawn`]: Promise::spawn

use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::Notify;

use crate::error::{GateError, Result};

type Outcome<T> = Result<T>;
type Callback<T> = Box<dyn FnOnce(Outcome<T>) + Send>;

enum State<T> {
    Pending(Vec<Callback<T>>),
    Fulfilled(T),
    Rejected(GateError),
}

struct Inner<T> {
    state: Mutex<State<T>>,
    settled: Notify,
}

pub struct Promise<T> {
    inner: Arc<Inner<T>>,
}

impl<T> Clone for Promise<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T> Default for Promise<T>
where
    T: Clone + Send + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Promise<T>
where
    T: Clone + Send + 'static,
{
    /// A fresh pending cell.
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Inner {
                state: Mutex::new(State::Pending(Vec::new())),
                settled: Notify::new(),
            }),
        }
    }

    /// An already-fulfilled cell.
    pub fn resolved(value: T) -> Self {
        let promise = Self::new();
        promise.resolve(value);
        promise
    }

    /// An already-rejected cell.
    pub fn rejected(reason: GateError) -> Self {
        let promise = Self::new();
        promise.reject(reason);
        promise
    }

    /// Run `future` on the tokio runtime and settle this cell with its
    /// outcome. The bridge from async I/O into promise chains.
    pub fn spawn<F>(future: F) -> Self
    where
        F: Future<Output = Outcome<T>> + Send + 'static,
    {
        let promise = Self::new();
        let cell = promise.clone();
        tokio::spawn(async move {
            match future.await {
                Ok(value) => cell.resolve(value),
                Err(reason) => cell.reject(reason),
            }
        });
        promise
    }

    /// Fulfill the cell. A no-op if it already settled.
    pub fn resolve(&self, value: T) {
        self.settle(Ok(value));
    }

    /// Reject the cell. A no-op if it already settled.
    pub fn reject(&self, reason: GateError) {
        self.settle(Err(reason));
    }

    /// Resolve this cell with another promise: assume `other`'s eventual
    /// outcome. Chains of promises collapse one link at a time.
    pub fn adopt(&self, other: Promise<T>) {
        let target = self.clone();
        other.subscribe(Box::new(move |outcome| match outcome {
            Ok(value) => target.resolve(value),
            Err(reason) => target.reject(reason),
        }));
    }

    fn settle(&self, outcome: Outcome<T>) {
        let callbacks = {
            let mut state = self.inner.state.lock().expect("promise state poisoned");
            if !matches!(*state, State::Pending(_)) {
                return;
            }
            let next = match &outcome {
                Ok(value) => State::Fulfilled(value.clone()),
                Err(reason) => State::Rejected(reason.clone()),
            };
            match std::mem::replace(&mut *state, next) {
                State::Pending(callbacks) => callbacks,
                _ => Vec::new(),
            }
        };
        self.inner.settled.notify_waiters();
        for callback in callbacks {
            callback(outcome.clone());
        }
    }

    /// Attach a callback: queued in FIFO order while pending, run
    /// immediately (with a cloned outcome) once settled.
    fn subscribe(&self, callback: Callback<T>) {
        let outcome = {
            let mut state = self.inner.state.lock().expect("promise state poisoned");
            match &mut *state {
                State::Pending(callbacks) => {
                    callbacks.push(callback);
                    return;
                }
                State::Fulfilled(value) => Ok(value.clone()),
                State::Rejected(reason) => Err(reason.clone()),
            }
        };
        callback(outcome);
    }

    /// Chain a value transform. The `Err` branch of `transform` rejects the
    /// child, which is how a failure inside a resolve handler reroutes to
    /// the nearest `catch` downstream.
    pub fn then<U, F>(&self, transform: F) -> Promise<U>
    where
        U: Clone + Send + 'static,
        F: FnOnce(T) -> Result<U> + Send + 'static,
    {
        let child = Promise::new();
        let link = child.clone();
        self.subscribe(Box::new(move |outcome| match outcome {
            Ok(value) => match transform(value) {
                Ok(next) => link.resolve(next),
                Err(reason) => link.reject(reason),
            },
            Err(reason) => link.reject(reason),
        }));
        child
    }

    /// Chain a transform that itself returns a promise; the child adopts it.
    pub fn then_promise<U, F>(&self, transform: F) -> Promise<U>
    where
        U: Clone + Send + 'static,
        F: FnOnce(T) -> Promise<U> + Send + 'static,
    {
        let child = Promise::new();
        let link = child.clone();
        self.subscribe(Box::new(move |outcome| match outcome {
            Ok(value) => link.adopt(transform(value)),
            Err(reason) => link.reject(reason),
        }));
        child
    }

    /// Chain a rejection handler. `Ok` from the handler fulfills the child
    /// (recovery); `Err` re-rejects. Fulfilled parents pass through.
    pub fn catch<F>(&self, handler: F) -> Promise<T>
    where
        F: FnOnce(GateError) -> Result<T> + Send + 'static,
    {
        let child = Promise::new();
        let link = child.clone();
        self.subscribe(Box::new(move |outcome| match outcome {
            Ok(value) => link.resolve(value),
            Err(reason) => match handler(reason) {
                Ok(recovered) => link.resolve(recovered),
                Err(reason) => link.reject(reason),
            },
        }));
        child
    }

    /// Suspend until the cell settles, then return its outcome.
    pub async fn wait(&self) -> Result<T> {
        loop {
            let notified = self.inner.settled.notified();
            {
                let state = self.inner.state.lock().expect("promise state poisoned");
                match &*state {
                    State::Fulfilled(value) => return Ok(value.clone()),
                    State::Rejected(reason) => return Err(reason.clone()),
                    State::Pending(_) => {}
                }
            }
            notified.await;
        }
    }

    /// The outcome if the cell has settled, without suspending.
    pub fn try_wait(&self) -> Option<Result<T>> {
        let state = self.inner.state.lock().expect("promise state poisoned");
        match &*state {
            State::Fulfilled(value) => Some(Ok(value.clone())),
            State::Rejected(reason) => Some(Err(reason.clone())),
            State::Pending(_) => None,
        }
    }

    pub fn is_settled(&self) -> bool {
        self.try_wait().is_some()
    }

    /// Combine promises into one that fulfills with every value in input
    /// order (completion order is ignored), or rejects with the first
    /// rejection. An empty input fulfills synchronously with an empty vec.
    pub fn all(promises: Vec<Promise<T>>) -> Promise<Vec<T>> {
        let combined = Promise::new();
        if promises.is_empty() {
            combined.resolve(Vec::new());
            return combined;
        }

        let slots: Arc<Mutex<Vec<Option<T>>>> =
            Arc::new(Mutex::new((0..promises.len()).map(|_| None).collect()));
        let remaining = Arc::new(AtomicUsize::new(promises.len()));

        for (index, promise) in promises.iter().enumerate() {
            let combined = combined.clone();
            let slots = Arc::clone(&slots);
            let remaining = Arc::clone(&remaining);
            promise.subscribe(Box::new(move |outcome| match outcome {
                Ok(value) => {
                    let mut slots = slots.lock().expect("promise state poisoned");
                    slots[index] = Some(value);
                    if remaining.fetch_sub(1, Ordering::SeqCst) == 1 {
                        let values = slots.iter_mut().filter_map(Option::take).collect();
                        drop(slots);
                        combined.resolve(values);
                    }
                }
                Err(reason) => combined.reject(reason),
            }));
        }
        combined
    }

    /// A promise that adopts the first settlement (fulfillment or
    /// rejection) among its dependents.
    pub fn race(promises: Vec<Promise<T>>) -> Promise<T> {
        let winner = Promise::new();
        for promise in &promises {
            let winner = winner.clone();
            promise.subscribe(Box::new(move |outcome| match outcome {
                Ok(value) => winner.resolve(value),
                Err(reason) => winner.reject(reason),
            }));
        }
        winner
    }

    /// A timer cell. `resolve_after` fulfills with its payload once the
    /// duration elapses; `reject_after` rejects likewise. With both set the
    /// shorter timer wins; with neither the cell never self-settles.
    pub fn timeout(
        resolve_after: Option<(Duration, T)>,
        reject_after: Option<(Duration, GateError)>,
    ) -> Promise<T> {
        let cell = Promise::new();
        if let Some((delay, value)) = resolve_after {
            let timer = cell.clone();
            tokio::spawn(async move {
                tokio::time::sleep(delay).await;
                timer.resolve(value);
            });
        }
        if let Some((delay, reason)) = reject_after {
            let timer = cell.clone();
            tokio::spawn(async move {
                tokio::time::sleep(delay).await;
                timer.reject(reason);
            });
        }
        cell
    }
}

/// Race `promise` against a rejecting timer, so a hung operation fails
/// deterministically with [`GateError::Timeout`].
pub fn deadline<T>(promise: Promise<T>, limit: Duration) -> Promise<T>
where
    T: Clone + Send + 'static,
{
    let millis = limit.as_millis() as u64;
    Promise::race(vec![
        promise,
        Promise::timeout(None, Some((limit, GateError::Timeout(millis)))),
    ])
}

/// A replaceable readiness cell shared by backends and frontends.
///
/// `replace` installs a fresh pending cell for an init cycle; `close` swaps
/// in a rejected cell (and rejects the old one, for anyone still waiting on
/// it) so every later observer sees [`GateError::Closed`].
pub(crate) struct ReadyCell {
    current: Mutex<Promise<bool>>,
}

impl ReadyCell {
    pub(crate) fn new() -> Self {
        Self {
            current: Mutex::new(Promise::new()),
        }
    }

    pub(crate) fn current(&self) -> Promise<bool> {
        self.current
            .lock()
            .expect("readiness cell poisoned")
            .clone()
    }

    pub(crate) fn replace(&self) -> Promise<bool> {
        let fresh = Promise::new();
        *self.current.lock().expect("readiness cell poisoned") = fresh.clone();
        fresh
    }

    pub(crate) fn close(&self) {
        // Swap first: a fulfilled cell cannot transition, so observers after
        // close must see a fresh rejected cell. Pending waiters on the old
        // cell still get the rejection.
        let previous = {
            let mut current = self.current.lock().expect("readiness cell poisoned");
            std::mem::replace(&mut *current, Promise::rejected(GateError::Closed))
        };
        previous.reject(GateError::Closed);
    }
}
