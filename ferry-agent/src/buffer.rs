use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;

use ferry_metrics::Metric;
use parking_lot::Mutex;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;

use crate::stats::PluginStats;

/// An error when returning a batch to a [`MetricBuffer`].
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum BufferError {
    /// Another batch was handed out and has not been accepted or rejected yet.
    #[error("a batch is already in flight")]
    BatchInFlight,
    /// The batch was not handed out by this buffer, or was already returned.
    #[error("unknown batch {0}")]
    UnknownBatch(u64),
}

/// Metrics handed out by [`MetricBuffer::batch`].
///
/// A batch must be returned with [`MetricBuffer::accept`] or [`MetricBuffer::reject`]. A batch
/// that is dropped instead rejects its metrics, so tracked inputs learn that they were lost.
pub struct Batch {
    id: u64,
    metrics: Vec<Metric>,
}

impl Batch {
    /// The metrics of this batch, oldest first.
    pub fn metrics(&self) -> &[Metric] {
        &self.metrics
    }

    /// The number of metrics in this batch.
    pub fn len(&self) -> usize {
        self.metrics.len()
    }

    /// Returns `true` if the batch has no metrics.
    pub fn is_empty(&self) -> bool {
        self.metrics.is_empty()
    }

    fn take(mut self) -> Vec<Metric> {
        std::mem::take(&mut self.metrics)
    }
}

impl fmt::Debug for Batch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Batch")
            .field("id", &self.id)
            .field("len", &self.metrics.len())
            .finish()
    }
}

impl Drop for Batch {
    fn drop(&mut self) {
        for metric in self.metrics.drain(..) {
            metric.reject();
        }
    }
}

/// Bookkeeping of the batch that is currently being written.
#[derive(Debug)]
struct InFlight {
    id: u64,
    len: usize,
    /// Oldest metrics of the batch that were evicted while it was in flight.
    evicted: usize,
}

impl InFlight {
    fn live(&self) -> usize {
        self.len - self.evicted
    }
}

#[derive(Debug, Default)]
struct BufferState {
    queue: VecDeque<Metric>,
    in_flight: Option<InFlight>,
    next_batch_id: u64,
}

impl BufferState {
    fn len(&self) -> usize {
        self.queue.len() + self.in_flight.as_ref().map_or(0, InFlight::live)
    }
}

/// The bounded queue of metrics in front of an output.
///
/// The pipeline [adds](Self::add) metrics without ever blocking. When the buffer is full, the
/// oldest metrics are evicted and counted as dropped. The output's runner takes the oldest
/// metrics as a [`Batch`], and either [accepts](Self::accept) it after a successful write or
/// [rejects](Self::reject) it, which puts the metrics back at the front in their original order.
///
/// Only one batch can be in flight at a time. [`len`](Self::len) includes the metrics of the
/// batch in flight. If metrics are evicted while a batch is in flight, the eviction is charged to
/// the oldest metrics of that batch. They count as dropped only once the batch is rejected or
/// left over at shutdown. If the batch is accepted, they were written and nothing was lost.
pub struct MetricBuffer {
    capacity: usize,
    batch_size: usize,
    state: Mutex<BufferState>,
    batch_ready: Notify,
    closed: CancellationToken,
    stats: Arc<PluginStats>,
}

impl MetricBuffer {
    /// Creates an empty buffer.
    ///
    /// [`batch_ready`](Self::batch_ready) fires whenever at least `batch_size` metrics are queued.
    pub fn new(capacity: usize, batch_size: usize, stats: Arc<PluginStats>) -> Self {
        Self {
            capacity: capacity.max(1),
            batch_size: batch_size.max(1),
            state: Mutex::new(BufferState::default()),
            batch_ready: Notify::new(),
            closed: CancellationToken::new(),
            stats,
        }
    }

    /// The maximum number of metrics in the buffer.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// The number of buffered metrics, including the batch in flight.
    pub fn len(&self) -> usize {
        self.state.lock().len()
    }

    /// Returns `true` if the buffer holds no metrics and no batch is in flight.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Appends metrics, evicting the oldest ones if the buffer is full.
    pub fn add(&self, metrics: impl IntoIterator<Item = Metric>) {
        let mut evicted = Vec::new();
        let mut charged = 0;

        let len = {
            let mut guard = self.state.lock();
            let state = &mut *guard;
            for metric in metrics {
                if state.len() >= self.capacity {
                    match state.in_flight.as_mut().filter(|batch| batch.live() > 0) {
                        Some(batch) => {
                            batch.evicted += 1;
                            charged += 1;
                        }
                        None => evicted.extend(state.queue.pop_front()),
                    }
                }
                state.queue.push_back(metric);
            }
            state.len()
        };

        if charged > 0 {
            ferry_log::debug!(
                output = self.stats.name(),
                charged,
                "buffer full, evicting from the batch in flight",
            );
        }
        if !evicted.is_empty() {
            ferry_log::debug!(
                output = self.stats.name(),
                dropped = evicted.len(),
                "buffer full, dropped oldest metrics",
            );
            self.stats.add_dropped(evicted.len() as u64);
        }
        for metric in evicted {
            metric.reject();
        }

        self.stats.set_buffer_size(len);
        if len >= self.batch_size {
            self.batch_ready.notify_one();
        }
    }

    /// Hands out the up to `max` oldest metrics as the batch in flight.
    pub fn batch(&self, max: usize) -> Result<Batch, BufferError> {
        let mut state = self.state.lock();
        if state.in_flight.is_some() {
            return Err(BufferError::BatchInFlight);
        }

        let count = max.min(state.queue.len());
        let metrics: Vec<_> = state.queue.drain(..count).collect();

        let id = state.next_batch_id;
        state.next_batch_id += 1;
        state.in_flight = Some(InFlight {
            id,
            len: metrics.len(),
            evicted: 0,
        });

        Ok(Batch { id, metrics })
    }

    fn finish(&self, state: &mut BufferState, batch: &Batch) -> Result<InFlight, BufferError> {
        match state.in_flight.take() {
            Some(in_flight) if in_flight.id == batch.id => Ok(in_flight),
            other => {
                state.in_flight = other;
                Err(BufferError::UnknownBatch(batch.id))
            }
        }
    }

    /// Removes a written batch from the buffer for good.
    pub fn accept(&self, batch: Batch) -> Result<(), BufferError> {
        let len = {
            let mut state = self.state.lock();
            self.finish(&mut state, &batch)?;
            state.len()
        };

        for metric in batch.take() {
            metric.accept();
        }

        self.stats.set_buffer_size(len);
        Ok(())
    }

    /// Returns a failed batch to the front of the buffer in its original order.
    ///
    /// Metrics of the batch that were evicted while it was in flight are dropped.
    pub fn reject(&self, batch: Batch) -> Result<(), BufferError> {
        let mut state = self.state.lock();
        let in_flight = self.finish(&mut state, &batch)?;

        let mut metrics = batch.take();
        let rest = metrics.split_off(in_flight.evicted.min(metrics.len()));
        for metric in rest.into_iter().rev() {
            state.queue.push_front(metric);
        }

        let len = state.len();
        drop(state);

        if !metrics.is_empty() {
            self.stats.add_dropped(metrics.len() as u64);
        }
        for metric in metrics {
            metric.reject();
        }
        self.stats.set_buffer_size(len);
        Ok(())
    }

    /// Returns copies of the up to `count` oldest queued metrics without changing the buffer.
    ///
    /// Metrics of the batch in flight are not included.
    pub fn peek(&self, count: usize) -> Vec<Metric> {
        let state = self.state.lock();
        state.queue.iter().take(count).cloned().collect()
    }

    /// Waits until at least a full batch is buffered.
    pub async fn batch_ready(&self) {
        self.batch_ready.notified().await
    }

    /// Signals that no more metrics will be added.
    pub fn close(&self) {
        self.closed.cancel();
    }

    /// Returns `true` if the buffer was closed.
    pub fn is_closed(&self) -> bool {
        self.closed.is_cancelled()
    }

    /// Waits until the buffer is closed.
    pub async fn closed(&self) {
        self.closed.cancelled().await
    }

    /// Removes all remaining metrics at shutdown and returns how many were lost.
    ///
    /// Metrics of a batch still in flight count as lost, they are rejected when that batch is
    /// dropped. Its metrics that were evicted earlier count as dropped by overflow, not by the
    /// shutdown.
    pub fn drain_dropped(&self) -> usize {
        let (queued, in_flight) = {
            let mut state = self.state.lock();
            (std::mem::take(&mut state.queue), state.in_flight.take())
        };

        let mut dropped = queued.len();
        if let Some(batch) = in_flight {
            dropped += batch.live();
            if batch.evicted > 0 {
                self.stats.add_dropped(batch.evicted as u64);
            }
        }

        for metric in queued {
            metric.reject();
        }

        if dropped > 0 {
            self.stats.add_dropped_at_shutdown(dropped as u64);
        }
        self.stats.set_buffer_size(0);
        dropped
    }
}

impl fmt::Debug for MetricBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MetricBuffer")
            .field("output", &self.stats.name())
            .field("capacity", &self.capacity)
            .field("len", &self.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use chrono::{TimeZone, Utc};
    use ferry_metrics::Tracker;
    use similar_asserts::assert_eq;

    use super::*;
    use crate::plugin::PluginKind;

    fn metric(value: i64) -> Metric {
        let timestamp = Utc.timestamp_opt(1_700_000_000 + value, 0).single().unwrap();
        Metric::new("cpu", timestamp).with_field("value", value)
    }

    fn metrics(values: impl IntoIterator<Item = i64>) -> Vec<Metric> {
        values.into_iter().map(metric).collect()
    }

    fn buffer(capacity: usize) -> MetricBuffer {
        let stats = Arc::new(PluginStats::new(PluginKind::Output, "test"));
        MetricBuffer::new(capacity, 2, stats)
    }

    #[test]
    fn test_drain_in_order() {
        let buffer = buffer(10);
        buffer.add(metrics(0..5));
        assert_eq!(buffer.len(), 5);

        let batch = buffer.batch(10).unwrap();
        assert_eq!(batch.metrics(), metrics(0..5).as_slice());
        buffer.accept(batch).unwrap();
        assert!(buffer.is_empty());
    }

    #[test]
    fn test_overflow_drops_oldest() {
        let buffer = buffer(3);
        buffer.add(metrics(0..5));

        assert_eq!(buffer.len(), 3);
        assert_eq!(buffer.peek(10), metrics(2..5));
        assert_eq!(buffer.stats.dropped(), 2);
        assert_eq!(buffer.stats.buffer_size(), 3);
    }

    #[test]
    fn test_reject_restores_order() {
        let buffer = buffer(10);
        buffer.add(metrics(0..6));

        let batch = buffer.batch(4).unwrap();
        assert_eq!(buffer.len(), 6);
        buffer.add(metrics(6..7));
        buffer.reject(batch).unwrap();

        let batch = buffer.batch(4).unwrap();
        assert_eq!(batch.metrics(), metrics(0..4).as_slice());
        buffer.reject(batch).unwrap();
        assert_eq!(buffer.peek(10), metrics(0..7));
    }

    #[test]
    fn test_single_batch_in_flight() {
        let buffer = buffer(10);
        buffer.add(metrics(0..4));

        let batch = buffer.batch(2).unwrap();
        assert_eq!(buffer.batch(2).unwrap_err(), BufferError::BatchInFlight);

        let other = buffer.batch_from_other_buffer();
        assert_eq!(buffer.accept(other).unwrap_err(), BufferError::UnknownBatch(99));

        buffer.accept(batch).unwrap();
        assert_eq!(buffer.len(), 2);
    }

    #[test]
    fn test_eviction_charged_to_batch_in_flight() {
        let buffer = buffer(4);
        buffer.add(metrics(0..4));

        let batch = buffer.batch(3).unwrap();
        buffer.add(metrics(4..6));
        assert_eq!(buffer.len(), 4);
        assert_eq!(buffer.stats.dropped(), 0);

        buffer.reject(batch).unwrap();
        assert_eq!(buffer.peek(10), metrics([2, 3, 4, 5]));
        assert_eq!(buffer.stats.dropped(), 2);
    }

    #[tokio::test]
    async fn test_eviction_forgiven_when_batch_accepted() {
        let (mut tracker, mut delivered) = Tracker::new();
        let mut tracked = metrics(0..2);
        let id = tracker.track(&mut tracked);

        let buffer = buffer(2);
        buffer.add(tracked);
        let batch = buffer.batch(2).unwrap();
        buffer.add(metrics(2..4));
        assert_eq!(buffer.len(), 2);

        buffer.accept(batch).unwrap();
        assert_eq!(buffer.stats.dropped(), 0);
        assert_eq!(buffer.peek(10), metrics(2..4));

        let info = delivered.recv().await.unwrap();
        assert_eq!(info.id(), id);
        assert!(info.delivered());
    }

    #[test]
    fn test_eviction_in_flight_at_shutdown() {
        let buffer = buffer(3);
        buffer.add(metrics(0..3));

        let batch = buffer.batch(2).unwrap();
        buffer.add(metrics(3..4));
        assert_eq!(buffer.stats.dropped(), 0);

        // The charged eviction counts as overflow, the live metric and two queued ones as lost.
        assert_eq!(buffer.drain_dropped(), 3);
        assert_eq!(buffer.stats.dropped_at_shutdown(), 3);
        assert_eq!(buffer.stats.dropped(), 4);
        drop(batch);
    }

    #[test]
    fn test_eviction_beyond_batch_in_flight() {
        let buffer = buffer(3);
        buffer.add(metrics(0..3));

        let batch = buffer.batch(1).unwrap();
        buffer.add(metrics(3..6));
        assert_eq!(buffer.len(), 3);
        assert_eq!(buffer.stats.dropped(), 2);

        buffer.reject(batch).unwrap();
        assert_eq!(buffer.peek(10), metrics(3..6));
        assert_eq!(buffer.stats.dropped(), 3);
    }

    #[tokio::test]
    async fn test_evicted_tracked_metrics_are_rejected() {
        let (mut tracker, mut delivered) = Tracker::new();
        let mut tracked = metrics(0..1);
        let id = tracker.track(&mut tracked);

        let buffer = buffer(1);
        buffer.add(tracked);
        buffer.add(metrics(1..2));

        let info = delivered.recv().await.unwrap();
        assert_eq!(info.id(), id);
        assert!(!info.delivered());
    }

    #[test]
    fn test_drain_dropped() {
        let buffer = buffer(10);
        buffer.add(metrics(0..5));
        let batch = buffer.batch(2).unwrap();

        assert_eq!(buffer.drain_dropped(), 5);
        assert_eq!(buffer.stats.dropped_at_shutdown(), 5);
        assert!(buffer.is_empty());
        drop(batch);
    }

    #[tokio::test(start_paused = true)]
    async fn test_batch_ready_notifies() {
        let buffer = buffer(10);
        buffer.add(metrics(0..1));

        let ready = tokio::time::timeout(std::time::Duration::from_secs(1), buffer.batch_ready());
        assert!(ready.await.is_err());

        buffer.add(metrics(1..2));
        buffer.batch_ready().await;
    }

    #[tokio::test]
    async fn test_close() {
        let buffer = buffer(10);
        assert!(!buffer.is_closed());
        buffer.close();
        buffer.closed().await;
        assert!(buffer.is_closed());
    }

    impl MetricBuffer {
        fn batch_from_other_buffer(&self) -> Batch {
            Batch {
                id: 99,
                metrics: Vec::new(),
            }
        }
    }
}
