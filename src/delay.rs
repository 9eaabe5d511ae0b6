//! Delayed completions.
//!
//! [`after`] returns a [`Completion`] that fires once, no earlier than the
//! given duration. Continuations attached with [`Completion::then`] run
//! once, after it fires, unless the completion was cancelled first.
//!
//! ```
//! use std::sync::atomic::{AtomicUsize, Ordering};
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! let count = Arc::new(AtomicUsize::new(0));
//! let counter = count.clone();
//!
//! let done = service_client::delay::after(Duration::from_millis(10));
//! done.then(move || {
//!     counter.fetch_add(1, Ordering::SeqCst);
//! });
//! done.wait();
//! # std::thread::sleep(Duration::from_millis(50));
//! assert_eq!(count.load(Ordering::SeqCst), 1);
//! ```

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc, Arc, Condvar, Mutex, MutexGuard, OnceLock};
use std::task::{Context, Poll, Waker};
use std::thread;
use std::time::Duration;

use log::{trace, warn};
use tokio::runtime::Handle;

/// Returns a completion that fires once `duration` has passed.
///
/// Timers share one background thread; the calling thread never blocks.
pub fn after(duration: Duration) -> Completion {
    let shared = Arc::new(Shared::default());
    let fired = shared.clone();

    match scheduler() {
        Some(handle) => {
            handle.spawn(async move {
                tokio::time::sleep(duration).await;
                fired.fire();
            });
        }
        None => {
            thread::spawn(move || {
                thread::sleep(duration);
                fired.fire();
            });
        }
    }

    Completion { shared }
}

/// A signal that fires exactly once.
///
/// A `Completion` is also a `Future` resolving when it fires, and can be
/// waited on with [`wait`](Completion::wait). Clones observe the same
/// signal.
#[derive(Clone)]
pub struct Completion {
    shared: Arc<Shared>,
}

impl Completion {
    /// Attaches a continuation to run once the completion fires.
    ///
    /// If it already fired, the continuation runs right away on the
    /// calling thread. Otherwise it runs on the timer thread. A cancelled
    /// completion never runs its continuations.
    pub fn then<F>(&self, f: F)
    where
        F: FnOnce() + Send + 'static,
    {
        let mut state = self.shared.lock();
        if state.fired {
            drop(state);
            if !self.is_cancelled() {
                f();
            }
        } else {
            state.continuations.push(Box::new(f));
        }
    }

    /// Prevents continuations that have not run yet from running.
    ///
    /// The completion still fires.
    pub fn cancel(&self) {
        self.shared.cancelled.store(true, Ordering::SeqCst);
    }

    /// Returns true if [`cancel`](Completion::cancel) was called.
    pub fn is_cancelled(&self) -> bool {
        self.shared.cancelled.load(Ordering::SeqCst)
    }

    /// Returns true once the completion has fired.
    pub fn is_fired(&self) -> bool {
        self.shared.lock().fired
    }

    /// Blocks the current thread until the completion fires.
    pub fn wait(&self) {
        let mut state = self.shared.lock();
        while !state.fired {
            state = match self.shared.signal.wait(state) {
                Ok(state) => state,
                Err(poisoned) => poisoned.into_inner(),
            };
        }
    }
}

impl Future for Completion {
    type Output = ();

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<()> {
        let mut state = self.shared.lock();
        if state.fired {
            return Poll::Ready(());
        }
        if !state.wakers.iter().any(|w| w.will_wake(cx.waker())) {
            state.wakers.push(cx.waker().clone());
        }
        Poll::Pending
    }
}

impl fmt::Debug for Completion {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("Completion")
            .field("fired", &self.is_fired())
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}

type Continuation = Box<dyn FnOnce() + Send>;

#[derive(Default)]
struct Shared {
    state: Mutex<State>,
    signal: Condvar,
    cancelled: AtomicBool,
}

#[derive(Default)]
struct State {
    fired: bool,
    continuations: Vec<Continuation>,
    wakers: Vec<Waker>,
}

impl Shared {
    // continuations always run outside of the lock
    fn lock(&self) -> MutexGuard<'_, State> {
        match self.state.lock() {
            Ok(state) => state,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn fire(&self) {
        let (continuations, wakers) = {
            let mut state = self.lock();
            if state.fired {
                return;
            }
            state.fired = true;
            (
                std::mem::take(&mut state.continuations),
                std::mem::take(&mut state.wakers),
            )
        };
        self.signal.notify_all();
        trace!("completion fired");

        if self.cancelled.load(Ordering::SeqCst) {
            trace!("completion cancelled, skipping {} continuations", continuations.len());
        } else {
            for f in continuations {
                f();
            }
        }
        for waker in wakers {
            waker.wake();
        }
    }
}

fn scheduler() -> Option<&'static Handle> {
    static SCHEDULER: OnceLock<Option<Handle>> = OnceLock::new();
    SCHEDULER.get_or_init(start_scheduler).as_ref()
}

fn start_scheduler() -> Option<Handle> {
    let (tx, rx) = mpsc::channel();
    let spawned = thread::Builder::new()
        .name("service-client-delay".into())
        .spawn(move || {
            let rt = match tokio::runtime::Builder::new_current_thread()
                .enable_time()
                .build()
            {
                Ok(rt) => rt,
                Err(e) => {
                    let _ = tx.send(Err(e));
                    return;
                }
            };
            if tx.send(Ok(rt.handle().clone())).is_err() {
                return;
            }
            rt.block_on(std::future::pending::<()>());
        });

    if let Err(e) = spawned {
        warn!("delay scheduler thread failed to start: {e}");
        return None;
    }
    match rx.recv() {
        Ok(Ok(handle)) => Some(handle),
        Ok(Err(e)) => {
            warn!("delay scheduler runtime failed to start: {e}");
            None
        }
        Err(_) => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn fires_once_after_duration() {
        let count = Arc::new(AtomicUsize::new(0));
        let counter = count.clone();
        let start = std::time::Instant::now();

        let done = after(Duration::from_millis(30));
        done.then(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        done.wait();
        assert!(start.elapsed() >= Duration::from_millis(30));

        thread::sleep(Duration::from_millis(50));
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn manual_fire_is_idempotent() {
        let shared = Arc::new(Shared::default());
        let done = Completion {
            shared: shared.clone(),
        };
        let count = Arc::new(AtomicUsize::new(0));
        let counter = count.clone();
        done.then(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        shared.fire();
        shared.fire();
        assert!(done.is_fired());
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn cancelled_skips_pending_continuations() {
        let shared = Arc::new(Shared::default());
        let done = Completion {
            shared: shared.clone(),
        };
        let ran = Arc::new(AtomicBool::new(false));
        let flag = ran.clone();
        done.then(move || flag.store(true, Ordering::SeqCst));

        done.cancel();
        shared.fire();
        assert!(done.is_fired());
        assert!(!ran.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn awaitable() {
        let done = after(Duration::from_millis(10));
        done.clone().await;
        assert!(done.is_fired());
    }
}
