//! Cooperative executor for one request's invocation tree
//!
//! Every invocation a request starts runs on the task that drives
//! [`ActionEngine::handle_action`](crate::ActionEngine::handle_action), never
//! on a worker thread of its own. Handlers therefore interleave only at
//! `.await` points, and a read-modify-write of the store with no await in
//! between cannot lose updates to a sibling invocation.
//!
//! Starting an invocation polls it once on the spot, so a handler runs up to
//! its first await before the call that started it returns. Whatever is
//! still pending is parked in a [`FuturesUnordered`] owned by the [`Drive`]
//! future wrapping the request body.

use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};

use futures::stream::{FuturesUnordered, StreamExt};
use futures::task::{noop_waker_ref, AtomicWaker};
use parking_lot::Mutex;

/// A started invocation, erased to its side effects.
pub(crate) type InvocationTask = Pin<Box<dyn Future<Output = ()> + Send + 'static>>;

/// Inbox of started invocations shared between a request scope and its driver.
#[derive(Default)]
pub(crate) struct RequestExecutor {
    started: Mutex<Vec<InvocationTask>>,
    waker: AtomicWaker,
    closed: AtomicBool,
}

impl RequestExecutor {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Poll `task` once, then hand it to the driver if it is still pending.
    ///
    /// After the driver is gone the task runs detached on the runtime.
    pub(crate) fn start(&self, mut task: InvocationTask) {
        let mut cx = Context::from_waker(noop_waker_ref());
        if task.as_mut().poll(&mut cx).is_ready() {
            return;
        }

        if self.closed.load(Ordering::Acquire) {
            tracing::debug!("Request finished, running invocation detached");
            detach(task);
            return;
        }

        self.started.lock().push(task);
        self.waker.wake();
    }

    /// Run `body` with this executor polling every invocation alongside it.
    pub(crate) fn drive<F: Future>(self: &Arc<Self>, body: F) -> Drive<F> {
        Drive {
            executor: self.clone(),
            running: FuturesUnordered::new(),
            body: Box::pin(body),
        }
    }

    fn take_started(&self) -> Vec<InvocationTask> {
        std::mem::take(&mut *self.started.lock())
    }

    fn has_started(&self) -> bool {
        !self.started.lock().is_empty()
    }

    fn close(&self) {
        self.closed.store(true, Ordering::Release);
        for task in self.take_started() {
            detach(task);
        }
    }
}

fn detach(task: InvocationTask) {
    match tokio::runtime::Handle::try_current() {
        Ok(runtime) => {
            runtime.spawn(task);
        }
        Err(_) => tracing::warn!("No runtime left to finish an invocation, dropping it"),
    }
}

/// Future that polls a request body and every invocation it started.
pub(crate) struct Drive<F: Future> {
    executor: Arc<RequestExecutor>,
    running: FuturesUnordered<InvocationTask>,
    body: Pin<Box<F>>,
}

impl<F: Future> Future for Drive<F> {
    type Output = F::Output;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<F::Output> {
        let this = &mut *self;
        this.executor.waker.register(cx.waker());

        loop {
            this.running.extend(this.executor.take_started());
            while let Poll::Ready(Some(())) = this.running.poll_next_unpin(cx) {}

            if let Poll::Ready(output) = this.body.as_mut().poll(cx) {
                return Poll::Ready(output);
            }
            if !this.executor.has_started() {
                return Poll::Pending;
            }
        }
    }
}

impl<F: Future> Drop for Drive<F> {
    fn drop(&mut self) {
        self.executor.close();
        let running = std::mem::take(&mut self.running);
        if !running.is_empty() {
            tracing::debug!(
                pending = running.len(),
                "Request finished, running pending invocations detached"
            );
        }
        for task in running {
            detach(task);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;
    use tokio::sync::oneshot;

    fn task<F: Future<Output = ()> + Send + 'static>(future: F) -> InvocationTask {
        Box::pin(future)
    }

    #[tokio::test]
    async fn test_start_runs_until_first_await() {
        let executor = RequestExecutor::new();
        let hits = Arc::new(AtomicUsize::new(0));

        let counter = hits.clone();
        executor.start(task(async move {
            counter.fetch_add(1, Ordering::SeqCst);
            tokio::task::yield_now().await;
            counter.fetch_add(1, Ordering::SeqCst);
        }));
        assert_eq!(hits.load(Ordering::SeqCst), 1);

        executor
            .drive(tokio::time::sleep(Duration::from_millis(10)))
            .await;
        assert_eq!(hits.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_tasks_started_by_body_are_driven() {
        let executor = RequestExecutor::new();
        let hits = Arc::new(AtomicUsize::new(0));

        let body = {
            let executor = executor.clone();
            let hits = hits.clone();
            async move {
                for _ in 0..3 {
                    let counter = hits.clone();
                    executor.start(task(async move {
                        tokio::task::yield_now().await;
                        counter.fetch_add(1, Ordering::SeqCst);
                    }));
                }
                while hits.load(Ordering::SeqCst) < 3 {
                    tokio::task::yield_now().await;
                }
                "done"
            }
        };

        assert_eq!(executor.drive(body).await, "done");
    }

    #[tokio::test]
    async fn test_closed_executor_runs_tasks_detached() {
        let executor = RequestExecutor::new();
        executor.drive(async {}).await;

        let (tx, rx) = oneshot::channel();
        executor.start(task(async move {
            tokio::task::yield_now().await;
            let _ = tx.send(());
        }));
        assert!(rx.await.is_ok());
    }
}
