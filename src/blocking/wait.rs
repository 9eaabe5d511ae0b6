use std::future::Future;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::thread::{self, Thread};
use std::time::{Duration, Instant};

use crate::error::{BlockingClientInAsyncContext, TimedOut};

/// Fails if the current thread is driving an async runtime, where parking
/// it would stall every task on that runtime.
pub(crate) fn enter() -> Result<(), BlockingClientInAsyncContext> {
    if tokio::runtime::Handle::try_current().is_ok() {
        return Err(BlockingClientInAsyncContext);
    }
    Ok(())
}

pub(crate) fn timeout<F, I, E>(fut: F, timeout: Option<Duration>) -> Result<I, Waited<E>>
where
    F: Future<Output = Result<I, E>>,
{
    enter().map_err(Waited::Executor)?;
    let deadline = timeout.map(|d| {
        log::trace!("wait at most {:?}", d);
        Instant::now() + d
    });

    let thread = thread::current();
    let waker = futures_util::task::waker(Arc::new(UnparkWaker(thread)));
    let mut cx = Context::from_waker(&waker);

    futures_util::pin_mut!(fut);

    loop {
        match fut.as_mut().poll(&mut cx) {
            Poll::Ready(Ok(val)) => return Ok(val),
            Poll::Ready(Err(err)) => return Err(Waited::Inner(err)),
            Poll::Pending => (), // fallthrough
        }

        if let Some(deadline) = deadline {
            let now = Instant::now();
            if now >= deadline {
                log::trace!("wait timeout exceeded");
                return Err(Waited::TimedOut(TimedOut));
            }

            log::trace!("park timeout {:?}", deadline - now);
            thread::park_timeout(deadline - now);
        } else {
            thread::park();
        }
    }
}

#[derive(Debug)]
pub(crate) enum Waited<E> {
    TimedOut(TimedOut),
    Executor(BlockingClientInAsyncContext),
    Inner(E),
}

struct UnparkWaker(Thread);

impl futures_util::task::ArcWake for UnparkWaker {
    fn wake_by_ref(arc_self: &Arc<Self>) {
        arc_self.0.unpark();
    }
}
