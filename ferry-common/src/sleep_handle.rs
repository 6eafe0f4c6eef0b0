use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;

/// A future that sleeps for a configurable duration, or never resolves while idle.
///
/// Useful as a branch in a `select!` loop to schedule an optional wakeup, such as a retry.
#[derive(Debug)]
pub struct SleepHandle(Option<Pin<Box<tokio::time::Sleep>>>);

impl SleepHandle {
    /// Creates an idle handle that never resolves.
    pub fn idle() -> Self {
        Self(None)
    }

    /// Cancels a pending sleep and makes the handle idle.
    pub fn reset(&mut self) {
        self.0 = None;
    }

    /// Schedules a wakeup after `duration`, replacing any pending sleep.
    pub fn set(&mut self, duration: Duration) {
        self.0 = Some(Box::pin(tokio::time::sleep(duration)));
    }

    /// Returns `true` if no sleep is scheduled.
    pub fn is_idle(&self) -> bool {
        self.0.is_none()
    }
}

impl Future for SleepHandle {
    type Output = ();

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match &mut self.get_mut().0 {
            Some(sleep) => sleep.as_mut().poll(cx),
            None => Poll::Pending,
        }
    }
}
