use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio::sync::mpsc;

use crate::Metric;

/// Identifies a group of tracked metrics.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TrackingId(u64);

impl TrackingId {
    /// Returns the numeric value of the identifier.
    pub fn value(self) -> u64 {
        self.0
    }
}

impl fmt::Display for TrackingId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// The outcome of a tracking group, sent once every copy of its metrics is gone.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DeliveryInfo {
    id: TrackingId,
    delivered: bool,
}

impl DeliveryInfo {
    /// Returns the group this notification is about.
    pub fn id(&self) -> TrackingId {
        self.id
    }

    /// Returns `true` if no copy of any metric in the group was rejected.
    ///
    /// Metrics that were filtered out or dropped by a processor count as delivered. Metrics
    /// evicted from a full buffer or lost at shutdown count as failed.
    pub fn delivered(&self) -> bool {
        self.delivered
    }
}

struct TrackingGroup {
    id: TrackingId,
    rejected: AtomicBool,
    tx: mpsc::UnboundedSender<DeliveryInfo>,
}

impl Drop for TrackingGroup {
    fn drop(&mut self) {
        let info = DeliveryInfo {
            id: self.id,
            delivered: !self.rejected.load(Ordering::Acquire),
        };

        // The input may have stopped listening already.
        self.tx.send(info).ok();
    }
}

/// A shared reference to a tracking group, held by every copy of a tracked metric.
#[derive(Clone)]
pub(crate) struct TrackingRef(Arc<TrackingGroup>);

impl TrackingRef {
    pub(crate) fn id(&self) -> TrackingId {
        self.0.id
    }

    pub(crate) fn reject(self) {
        self.0.rejected.store(true, Ordering::Release);
    }
}

impl fmt::Debug for TrackingRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("TrackingRef").field(&self.0.id).finish()
    }
}

/// Attaches delivery tracking to metrics of one input.
///
/// Created with [`Tracker::new`] together with the [`DeliveryReceiver`] that receives the
/// outcome of every group.
pub struct Tracker {
    next_id: u64,
    tx: mpsc::UnboundedSender<DeliveryInfo>,
}

impl Tracker {
    /// Creates a tracker and the receiving end for delivery notifications.
    pub fn new() -> (Self, DeliveryReceiver) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { next_id: 1, tx }, DeliveryReceiver(rx))
    }

    /// Puts all given metrics into a new tracking group.
    ///
    /// The group is reported once every metric and all of their copies have been accepted,
    /// rejected or dropped. Metrics that were tracked before move to the new group.
    pub fn track(&mut self, metrics: &mut [Metric]) -> TrackingId {
        let id = TrackingId(self.next_id);
        self.next_id += 1;

        let group = TrackingRef(Arc::new(TrackingGroup {
            id,
            rejected: AtomicBool::new(false),
            tx: self.tx.clone(),
        }));

        for metric in metrics {
            metric.set_tracking(group.clone());
        }

        id
    }
}

impl fmt::Debug for Tracker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Tracker")
            .field("next_id", &self.next_id)
            .finish()
    }
}

/// Receives [`DeliveryInfo`] for groups created by a [`Tracker`].
#[derive(Debug)]
pub struct DeliveryReceiver(mpsc::UnboundedReceiver<DeliveryInfo>);

impl DeliveryReceiver {
    /// Waits for the next delivery notification.
    ///
    /// Returns `None` once the tracker and all tracked metrics are gone.
    pub async fn recv(&mut self) -> Option<DeliveryInfo> {
        self.0.recv().await
    }

    /// Returns a delivery notification if one is ready.
    pub fn try_recv(&mut self) -> Option<DeliveryInfo> {
        self.0.try_recv().ok()
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use super::*;

    fn metrics(n: usize) -> Vec<Metric> {
        (0..n)
            .map(|i| Metric::new("cpu", Utc::now()).with_field("usage", i as i64))
            .collect()
    }

    #[test]
    fn test_delivered_after_all_copies() {
        let (mut tracker, mut rx) = Tracker::new();
        let mut batch = metrics(2);
        let id = tracker.track(&mut batch);

        // Fan out to two outputs.
        let copies = batch.clone();
        assert!(copies.iter().all(Metric::is_tracked));
        assert_eq!(copies[0].tracking_id(), Some(id));

        for metric in batch {
            metric.accept();
        }
        assert_eq!(rx.try_recv(), None);

        for metric in copies {
            metric.accept();
        }
        let info = rx.try_recv().unwrap();
        assert_eq!(info.id(), id);
        assert!(info.delivered());
        assert_eq!(rx.try_recv(), None);
    }

    #[test]
    fn test_single_reject_fails_group() {
        let (mut tracker, mut rx) = Tracker::new();
        let mut batch = metrics(3);
        tracker.track(&mut batch);

        let mut batch = batch.into_iter();
        batch.next().unwrap().accept();
        batch.next().unwrap().reject();
        drop(batch);

        assert!(!rx.try_recv().unwrap().delivered());
    }

    #[test]
    fn test_dropped_counts_as_delivered() {
        let (mut tracker, mut rx) = Tracker::new();
        let mut batch = metrics(1);
        tracker.track(&mut batch);
        drop(batch);

        assert!(rx.try_recv().unwrap().delivered());
    }

    #[test]
    fn test_groups_are_numbered() {
        let (mut tracker, mut rx) = Tracker::new();
        let first = tracker.track(&mut metrics(1));
        let second = tracker.track(&mut metrics(1));

        assert_ne!(first, second);
        assert_eq!(rx.try_recv().map(|info| info.id()), Some(first));
        assert_eq!(rx.try_recv().map(|info| info.id()), Some(second));
    }

    #[test]
    fn test_equality_ignores_tracking() {
        let (mut tracker, _rx) = Tracker::new();
        let plain = metrics(1);
        let mut tracked = plain.clone();
        tracker.track(&mut tracked);

        assert_eq!(plain, tracked);
    }
}
