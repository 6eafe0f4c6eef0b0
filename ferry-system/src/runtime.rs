use std::future::Future;
use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;

use tokio::task::JoinHandle;

use crate::Service;
use crate::statsd::SystemCounters;

/// Spawns a new asynchronous task, returning a [`JoinHandle`] for it.
///
/// This is an instrumented variant of [`tokio::spawn`] which counts created and terminated tasks
/// per [`TaskId`].
pub fn spawn<F>(task_id: TaskId, future: F) -> JoinHandle<F::Output>
where
    F: Future + Send + 'static,
    F::Output: Send + 'static,
{
    tokio::spawn(Task::new(task_id, future))
}

/// An identifier for tasks spawned by [`spawn()`], used to log metrics.
#[derive(Clone, Copy, Debug)]
pub struct TaskId(&'static str);

impl TaskId {
    /// Creates a task ID based on the service's name.
    pub fn for_service<S: Service>() -> Self {
        Self(S::name())
    }

    /// Creates a task ID with a custom name.
    pub fn named(name: &'static str) -> Self {
        Self(name)
    }

    /// Returns the name of the task.
    pub fn name(&self) -> &'static str {
        self.0
    }

    fn emit_metric(&self, metric: SystemCounters) {
        ferry_statsd::metric!(counter(metric) += 1, id = self.0);
    }
}

pin_project_lite::pin_project! {
    /// Wraps a future and emits related task metrics.
    struct Task<T> {
        id: TaskId,
        #[pin]
        inner: T,
    }

    impl<T> PinnedDrop for Task<T> {
        fn drop(this: Pin<&mut Self>) {
            this.id.emit_metric(SystemCounters::RuntimeTaskTerminated);
        }
    }
}

impl<T> Task<T> {
    fn new(id: TaskId, inner: T) -> Self {
        id.emit_metric(SystemCounters::RuntimeTaskCreated);
        Self { id, inner }
    }
}

impl<T: Future> Future for Task<T> {
    type Output = T::Output;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        self.project().inner.poll(cx)
    }
}

/// Creates the multi-threaded runtime the agent runs on.
///
/// `worker_threads` defaults to the number of CPU cores.
pub fn create_runtime(
    name: &'static str,
    worker_threads: Option<usize>,
) -> io::Result<tokio::runtime::Runtime> {
    let mut builder = tokio::runtime::Builder::new_multi_thread();
    builder
        .thread_name(name)
        .thread_keep_alive(Duration::from_secs(1))
        .enable_all();

    if let Some(threads) = worker_threads {
        builder.worker_threads(threads.max(1));
    }

    builder.build()
}
