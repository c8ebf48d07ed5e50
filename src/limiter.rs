use std::{
    future::Future,
    pin::Pin,
    sync::Mutex,
    task::{self, Poll, Waker},
    time::Duration,
};

use pin_list::PinList;
use pin_project_lite::pin_project;
use thiserror::Error;
use tokio::time::timeout;
use tracing::{debug, trace};

use crate::{aimd::Aimd, Config, ConfigError};

/// Limits the number of concurrent jobs, adapting the limit to feedback.
///
/// Concurrency is limited through [Permit]s. Acquire a permit to run a job,
/// and resolve the permit once the job is finished: an unsignaled success
/// nudges the limit up by the configured step, a backpressure signal cuts it
/// down by the configured factor.
///
/// Acquisition is async only; callers on a non-async host should wrap calls
/// in their runtime's block-on.
#[derive(Debug)]
pub struct Limiter {
    config: Config,
    aimd: Aimd,
    shared: Mutex<Shared>,
}

type WaiterTypes = dyn pin_list::Types<
    Id = pin_list::id::Checked,
    Protected = Waker,
    Removed = (),
    Unprotected = (),
>;

/// All coordinated state lives behind the one mutex: the limit and the
/// in-flight count must be read and written together, and waiter handoff has
/// to be atomic with both.
#[derive(Debug)]
struct Shared {
    limit: f64,
    in_flight: usize,
    waiting: usize,
    waiters: PinList<WaiterTypes>,
}

impl Shared {
    /// Whole slots under the current (possibly fractional) limit.
    fn slots(&self) -> usize {
        self.limit.floor() as usize
    }

    /// Hand free slots to queued waiters, first in first out.
    ///
    /// The slot transfer happens here, while locked, so a woken waiter never
    /// races newcomers for the slot it was granted. The returned wakers must
    /// be invoked after the lock is released.
    fn grant_waiters(&mut self) -> Vec<Waker> {
        let grantable = self
            .slots()
            .saturating_sub(self.in_flight)
            .min(self.waiting);
        let mut wakers = Vec::with_capacity(grantable);
        let mut cursor = self.waiters.cursor_front_mut();
        while wakers.len() < grantable {
            match cursor.remove_current(()) {
                Ok(waker) => wakers.push(waker),
                Err(_) => break,
            }
        }
        self.in_flight += wakers.len();
        self.waiting -= wakers.len();
        wakers
    }
}

/// A concurrency permit, required to run a job.
///
/// Resolve the permit with [success](Permit::success) or
/// [backpressure](Permit::backpressure) once the job completes. Dropping the
/// permit without resolving it releases the slot and leaves the limit
/// untouched: an error unrelated to overload is not a congestion signal.
#[derive(Debug)]
pub struct Permit<'t> {
    limiter: &'t Limiter,
}

/// A snapshot of the state of the [Limiter].
#[derive(Debug, Clone, Copy)]
pub struct LimiterState {
    limit: f64,
    available: usize,
    in_flight: usize,
    waiting: usize,
}

/// How a completed job should feed back into the concurrency limit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// The job completed without an overload signal.
    Success,
    /// The downstream resource pushed back, e.g. rejected or throttled the
    /// job.
    Backpressure,
}

/// The designated control-signal error: returned from within a guarded scope
/// (see [Limiter::run]) to request a limit decrease for the just-completed
/// job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("backpressure signaled by the downstream resource")]
pub struct Backpressure;

/// Marks which of a caller's errors carry the backpressure signal.
///
/// [Limiter::run] consults this to decide whether a failed job counts as an
/// overload signal or as an unrelated error.
pub trait BackpressureSignal {
    fn is_backpressure(&self) -> bool;
}

impl BackpressureSignal for Backpressure {
    fn is_backpressure(&self) -> bool {
        true
    }
}

impl Limiter {
    /// Create a limiter from the given configuration.
    ///
    /// Fails fast if any parameter violates its allowed range; see
    /// [ConfigError].
    pub fn new(config: Config) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self {
            aimd: Aimd::new(&config),
            shared: Mutex::new(Shared {
                limit: config.starting_limit(),
                in_flight: 0,
                waiting: 0,
                waiters: PinList::new(pin_list::id::Checked::new()),
            }),
            config,
        })
    }

    /// The configuration this limiter was built with.
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Try to immediately acquire a concurrency [Permit].
    ///
    /// Returns `None` if no slot is free, or if earlier callers are already
    /// queued for the next one.
    pub fn try_acquire(&self) -> Option<Permit<'_>> {
        let mut shared = self.shared.lock().unwrap();
        if shared.waiting == 0 && shared.in_flight < shared.slots() {
            shared.in_flight += 1;
            Some(Permit { limiter: self })
        } else {
            None
        }
    }

    /// Acquire a concurrency [Permit], waiting until a slot is free.
    ///
    /// Waiters are served in arrival order. Dropping the returned future
    /// before it resolves leaves the limiter state untouched: a queued entry
    /// is unlinked, and a slot that was already handed over is passed on to
    /// the next waiter.
    pub fn acquire(&self) -> Acquire<'_> {
        Acquire {
            limiter: self,
            node: pin_list::Node::new(),
        }
    }

    /// Acquire a concurrency [Permit], waiting for at most `duration`.
    ///
    /// Returns `None` if no slot became available in time.
    pub async fn acquire_timeout(&self, duration: Duration) -> Option<Permit<'_>> {
        match timeout(duration, self.acquire()).await {
            Ok(permit) => Some(permit),
            Err(_) => None,
        }
    }

    /// Run a job under a permit, resolving the permit from the job's result.
    ///
    /// The job runs once a slot is free. On `Ok` the permit reports a
    /// success; on an error for which
    /// [is_backpressure](BackpressureSignal::is_backpressure) returns true it
    /// reports backpressure; any other error releases the slot without
    /// adjusting the limit. The result is returned unchanged either way, so a
    /// backpressure error still short-circuits the caller after the limiter
    /// has consumed it.
    ///
    /// ```
    /// use sawtooth::{Backpressure, Config, Limiter};
    ///
    /// # #[tokio::main(flavor = "current_thread")]
    /// # async fn main() {
    /// let limiter = Limiter::new(Config::default()).unwrap();
    /// let result: Result<&str, Backpressure> = limiter.run(|| async { Ok("done") }).await;
    /// assert_eq!(result, Ok("done"));
    /// # }
    /// ```
    pub async fn run<F, Fut, T, E>(&self, job: F) -> Result<T, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: BackpressureSignal,
    {
        let permit = self.acquire().await;
        let result = job().await;
        match &result {
            Ok(_) => permit.success(),
            Err(err) if err.is_backpressure() => permit.backpressure(),
            Err(_) => drop(permit),
        }
        result
    }

    /// The current state of the limiter.
    pub fn state(&self) -> LimiterState {
        let shared = self.shared.lock().unwrap();
        LimiterState {
            limit: shared.limit,
            available: shared.slots().saturating_sub(shared.in_flight),
            in_flight: shared.in_flight,
            waiting: shared.waiting,
        }
    }

    /// Free one slot, apply the outcome to the limit, and wake any waiters
    /// that now fit under it.
    fn release(&self, outcome: Option<Outcome>) {
        let wakers;
        {
            let mut shared = self.shared.lock().unwrap();
            if let Some(outcome) = outcome {
                let old = shared.limit;
                shared.limit = self.aimd.update(old, outcome);
                match outcome {
                    Outcome::Success => {
                        trace!(limit = shared.limit, "concurrency limit increased");
                    }
                    Outcome::Backpressure => {
                        debug!(
                            old_limit = old,
                            limit = shared.limit,
                            "backpressure: concurrency limit reduced",
                        );
                    }
                }
            }
            shared.in_flight -= 1;
            wakers = shared.grant_waiters();
        }
        for waker in wakers {
            waker.wake();
        }
    }
}

impl Permit<'_> {
    /// Resolve the permit with the given outcome, adjusting the limit and
    /// releasing the slot.
    pub fn release(self, outcome: Outcome) {
        self.limiter.release(Some(outcome));
        // the slot is accounted for; don't release it a second time
        std::mem::forget(self);
    }

    /// Report an unsignaled success: the limit grows by the configured step.
    pub fn success(self) {
        self.release(Outcome::Success);
    }

    /// Report backpressure: the limit shrinks by the configured factor.
    pub fn backpressure(self) {
        self.release(Outcome::Backpressure);
    }
}

impl Drop for Permit<'_> {
    /// Releases the slot without adjusting the limit.
    fn drop(&mut self) {
        self.limiter.release(None);
    }
}

impl LimiterState {
    /// The current concurrency limit. Fractional values are expected; only
    /// the floor is usable concurrency.
    pub fn limit(&self) -> f64 {
        self.limit
    }
    /// Whole slots not currently held by a permit.
    pub fn available(&self) -> usize {
        self.available
    }
    /// The number of permits currently held.
    pub fn in_flight(&self) -> usize {
        self.in_flight
    }
    /// The number of callers queued in [acquire](Limiter::acquire).
    pub fn waiting(&self) -> usize {
        self.waiting
    }
}

pin_project! {
    /// The future returned by [Limiter::acquire].
    pub struct Acquire<'s> {
        limiter: &'s Limiter,
        #[pin]
        node: pin_list::Node<WaiterTypes>,
    }

    impl PinnedDrop for Acquire<'_> {
        fn drop(this: Pin<&mut Self>) {
            let this = this.project();
            let node = match this.node.initialized_mut() {
                // The future was cancelled while queued (or granted).
                Some(initialized) => initialized,
                // Never queued; nothing to undo.
                None => return,
            };

            let limiter = *this.limiter;
            let mut shared = limiter.shared.lock().unwrap();

            match node.reset(&mut shared.waiters) {
                // Still queued: unlink and leave.
                (pin_list::NodeData::Linked(_waker), ()) => {
                    shared.waiting -= 1;
                }

                // A slot was handed to us, but we were cancelled before
                // claiming it. Return it and re-grant, so the next waiter
                // isn't stranded.
                (pin_list::NodeData::Removed(()), ()) => {
                    shared.in_flight -= 1;
                    let wakers = shared.grant_waiters();
                    drop(shared);
                    for waker in wakers {
                        waker.wake();
                    }
                }
            }
        }
    }
}

impl<'s> Future for Acquire<'s> {
    type Output = Permit<'s>;

    fn poll(self: Pin<&mut Self>, cx: &mut task::Context<'_>) -> Poll<Self::Output> {
        let mut this = self.project();
        let limiter = *this.limiter;
        let mut shared = limiter.shared.lock().unwrap();

        if let Some(node) = this.node.as_mut().initialized_mut() {
            // Queued. A release hands slots over by removing nodes; if ours
            // was removed the slot is already ours.
            return match node.take_removed(&shared.waiters) {
                Ok(_) => Poll::Ready(Permit { limiter }),
                Err(node) => {
                    *node.protected_mut(&mut shared.waiters).unwrap() = cx.waker().clone();
                    Poll::Pending
                }
            };
        }

        // First poll. Take a slot directly only if nobody arrived earlier;
        // otherwise join the back of the queue.
        if shared.waiting == 0 && shared.in_flight < shared.slots() {
            shared.in_flight += 1;
            return Poll::Ready(Permit { limiter });
        }

        shared.waiters.push_back(this.node, cx.waker().clone(), ());
        shared.waiting += 1;
        Poll::Pending
    }
}
