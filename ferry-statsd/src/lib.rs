//! A StatsD client for the agent's own measurements, built on cadence.
//!
//! The agent reports its pipeline health (metrics gathered, written, dropped, write errors and
//! buffer sizes) to a StatsD server when configured. This is separate from the metrics the agent
//! forwards: these describe the agent itself.
//!
//! ## Defining Metrics
//!
//! Metrics are defined by implementing one of the metric traits on an enum. The traits only
//! provide a type safe metric name, so that a counter cannot be recorded as a gauge by accident.
//! Available kinds are [`CounterMetric`], [`GaugeMetric`], [`TimerMetric`] and
//! [`DistributionMetric`].
//!
//! ## Initializing the Client
//!
//! Without a client, the [`metric!`] macro is a noop. Use [`init`] to report to a StatsD server
//! over UDP, or [`set_client`] to install a custom client:
//!
//! ```no_run
//! # use std::collections::BTreeMap;
//! # use ferry_statsd::MetricsClientConfig;
//! ferry_statsd::init(MetricsClientConfig {
//!     prefix: "ferry",
//!     host: "localhost:8125",
//!     default_tags: BTreeMap::new(),
//!     default_sample_rate: 1.0.into(),
//! })
//! .ok();
//! ```
//!
//! ## Macro Usage
//!
//! ```
//! use ferry_statsd::{metric, CounterMetric};
//!
//! struct MetricsWritten;
//!
//! impl CounterMetric for MetricsWritten {
//!     fn name(&self) -> &'static str {
//!         "metrics.written"
//!     }
//! }
//!
//! metric!(counter(MetricsWritten) += 1, output = "file");
//! ```
use std::collections::BTreeMap;
use std::io;
use std::net::{ToSocketAddrs, UdpSocket};
use std::ops::Deref;
use std::sync::Arc;

use cadence::{BufferedUdpMetricSink, Metric, MetricBuilder, QueuingMetricSink, StatsdClient};
use parking_lot::RwLock;
use rand::Rng;
use rand::distr::StandardUniform;

/// Maximum number of metric events that can be queued before we start dropping them.
const METRICS_MAX_QUEUE_SIZE: usize = 100_000;

/// A sample rate between `0.0` (nothing is sent) and `1.0` (everything is sent).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SampleRate(f64);

impl From<f64> for SampleRate {
    fn from(value: f64) -> Self {
        Self(value.clamp(0.0, 1.0))
    }
}

impl From<SampleRate> for f64 {
    fn from(rate: SampleRate) -> Self {
        rate.0
    }
}

/// The installed statsd client with its defaults.
#[derive(Debug)]
pub struct MetricsClient {
    /// The raw statsd client.
    pub statsd_client: StatsdClient,
    /// Default tags to apply to every metric.
    pub default_tags: BTreeMap<String, String>,
    /// Global sample rate.
    pub default_sample_rate: SampleRate,
}

/// Configuration for [`init`].
#[derive(Debug)]
pub struct MetricsClientConfig<'a, A> {
    /// Prefix which is prepended to all metric names.
    pub prefix: &'a str,
    /// Address of the statsd server.
    pub host: A,
    /// Tags that are added to all metrics.
    pub default_tags: BTreeMap<String, String>,
    /// Default sample rate for metrics.
    pub default_sample_rate: SampleRate,
}

impl Deref for MetricsClient {
    type Target = StatsdClient;

    fn deref(&self) -> &StatsdClient {
        &self.statsd_client
    }
}

impl MetricsClient {
    /// Sends a metric with the default tags and the global sample rate.
    #[inline(always)]
    pub fn send_metric<'a, T>(&'a self, metric: MetricBuilder<'a, '_, T>)
    where
        T: Metric + From<String>,
    {
        self.send_metric_with_sample_rate(metric, None)
    }

    /// Sends a metric with an explicit sample rate, capped by the global sample rate.
    #[doc(hidden)]
    #[inline(always)]
    pub fn send_metric_with_sample_rate<'a, T>(
        &'a self,
        mut metric: MetricBuilder<'a, '_, T>,
        sample_rate: Option<SampleRate>,
    ) where
        T: Metric + From<String>,
    {
        let sample_rate = match sample_rate {
            Some(rate) => rate.0.min(self.default_sample_rate.0),
            None => self.default_sample_rate.0,
        };

        if !should_send(sample_rate) {
            return;
        }

        for (k, v) in &self.default_tags {
            metric = metric.with_tag(k, v);
        }

        if sample_rate < 1.0 {
            metric = metric.with_sampling_rate(sample_rate);
        }

        if let Err(error) = metric.try_send() {
            ferry_log::error!(
                error = &error as &dyn std::error::Error,
                maximum_capacity = METRICS_MAX_QUEUE_SIZE,
                "error sending a metric",
            );
        }
    }
}

fn should_send(sample_rate: f64) -> bool {
    if sample_rate <= 0.0 {
        false
    } else if sample_rate >= 1.0 {
        true
    } else {
        let sample: f64 = rand::rng().sample(StandardUniform);
        sample <= sample_rate
    }
}

static METRICS_CLIENT: RwLock<Option<Arc<MetricsClient>>> = RwLock::new(None);

thread_local! {
    static CURRENT_CLIENT: std::cell::RefCell<Option<Arc<MetricsClient>>> = METRICS_CLIENT.read().clone().into();
}

/// Internal prelude for the macro.
#[doc(hidden)]
pub mod _pred {
    pub use cadence::prelude::*;
}

/// The metrics prelude that is necessary to use the client.
pub mod prelude {
    pub use cadence::prelude::*;
}

/// Installs a new statsd client for all threads.
///
/// Threads that already recorded a metric keep their previous client until they call this
/// function themselves, which in practice means the client must be set before the runtime starts.
pub fn set_client(client: MetricsClient) {
    *METRICS_CLIENT.write() = Some(Arc::new(client));
    CURRENT_CLIENT.with(|cell| cell.replace(METRICS_CLIENT.read().clone()));
}

/// Removes the global client.
pub fn disable() {
    *METRICS_CLIENT.write() = None;
}

/// Sets a capturing client for the duration of `f` on the current thread and returns all metrics
/// recorded in the meantime.
pub fn with_capturing_test_client(f: impl FnOnce()) -> Vec<String> {
    let (rx, sink) = cadence::SpyMetricSink::new();
    let test_client = MetricsClient {
        statsd_client: StatsdClient::from_sink("", sink),
        default_tags: Default::default(),
        default_sample_rate: 1.0.into(),
    };

    CURRENT_CLIENT.with(|cell| {
        let old_client = cell.replace(Some(Arc::new(test_client)));
        f();
        cell.replace(old_client);
    });

    rx.iter()
        .map(|bytes| String::from_utf8_lossy(&bytes).into_owned())
        .collect()
}

/// Reports metrics to the statsd server at the configured host over UDP.
///
/// Metrics are queued and sent from a background thread, so recording a metric never blocks.
pub fn init<A: ToSocketAddrs>(config: MetricsClientConfig<A>) -> io::Result<()> {
    let addr = config.host.to_socket_addrs()?.next().ok_or_else(|| {
        io::Error::new(io::ErrorKind::InvalidInput, "statsd host did not resolve")
    })?;

    let socket = UdpSocket::bind("0.0.0.0:0")?;
    socket.set_nonblocking(true)?;
    let udp_sink = BufferedUdpMetricSink::from(addr, socket).map_err(io::Error::other)?;
    let sink = QueuingMetricSink::with_capacity(udp_sink, METRICS_MAX_QUEUE_SIZE);

    ferry_log::info!("reporting metrics to statsd at {addr}");
    let sample_rate: f64 = config.default_sample_rate.into();
    if sample_rate == 0.0 {
        ferry_log::debug!("metrics sample rate is 0, no metrics will be reported");
    }

    set_client(MetricsClient {
        statsd_client: StatsdClient::from_sink(config.prefix, sink),
        default_tags: config.default_tags,
        default_sample_rate: config.default_sample_rate,
    });

    Ok(())
}

/// Invokes a callback with the current statsd client.
///
/// If statsd is not configured the callback is not invoked. For the most part the [`metric!`]
/// macro should be used instead.
#[inline(always)]
pub fn with_client<F, R>(f: F) -> R
where
    F: FnOnce(&MetricsClient) -> R,
    R: Default,
{
    CURRENT_CLIENT.with(|client| {
        if let Some(client) = client.borrow().as_deref() {
            f(client)
        } else {
            R::default()
        }
    })
}

/// A metric for capturing timings.
///
/// Timings are reported in milliseconds.
///
/// ## Example
///
/// ```
/// use ferry_statsd::{metric, TimerMetric};
///
/// enum PluginTimers {
///     GatherDuration,
/// }
///
/// impl TimerMetric for PluginTimers {
///     fn name(&self) -> &'static str {
///         match self {
///             Self::GatherDuration => "input.gather_duration",
///         }
///     }
/// }
///
/// # use std::time::Instant;
/// let start = Instant::now();
/// metric!(timer(PluginTimers::GatherDuration) = start.elapsed(), input = "mem");
///
/// // measure a block
/// metric!(timer(PluginTimers::GatherDuration), input = "mem", {
///     // gather
/// });
/// ```
pub trait TimerMetric {
    /// Returns the timer metric name that will be sent to statsd.
    fn name(&self) -> &'static str;
}

/// A metric for capturing counters.
///
/// ## Example
///
/// ```
/// use ferry_statsd::{metric, CounterMetric};
///
/// enum PluginCounters {
///     MetricsDropped,
/// }
///
/// impl CounterMetric for PluginCounters {
///     fn name(&self) -> &'static str {
///         match self {
///             Self::MetricsDropped => "metrics.dropped",
///         }
///     }
/// }
///
/// metric!(counter(PluginCounters::MetricsDropped) += 3, output = "file");
/// metric!(counter(PluginCounters::MetricsDropped) -= 1);
/// ```
pub trait CounterMetric {
    /// Returns the counter metric name that will be sent to statsd.
    fn name(&self) -> &'static str;
}

/// A metric for capturing distributions of values.
pub trait DistributionMetric {
    /// Returns the distribution metric name that will be sent to statsd.
    fn name(&self) -> &'static str;
}

/// A metric for capturing gauges.
///
/// ## Example
///
/// ```
/// use ferry_statsd::{metric, GaugeMetric};
///
/// struct BufferSize;
///
/// impl GaugeMetric for BufferSize {
///     fn name(&self) -> &'static str {
///         "output.buffer_size"
///     }
/// }
///
/// metric!(gauge(BufferSize) = 42, output = "file");
/// ```
pub trait GaugeMetric {
    /// Returns the gauge metric name that will be sent to statsd.
    fn name(&self) -> &'static str;
}

/// Emits a metric.
///
/// See [crate-level documentation](self) for examples.
#[macro_export]
macro_rules! metric {
    // counter increment
    (counter($id:expr) += $value:expr $(, $($k:ident).* = $v:expr)* $(,)?) => {
        match $value {
            value if value != 0 => {
                $crate::with_client(|client| {
                    use $crate::_pred::*;
                    client.send_metric(
                        client.count_with_tags(&$crate::CounterMetric::name(&$id), value)
                        $(.with_tag(stringify!($($k).*), $v))*
                    )
                })
            },
            _ => {},
        };
    };

    // counter decrement
    (counter($id:expr) -= $value:expr $(, $($k:ident).* = $v:expr)* $(,)?) => {
        match $value {
            value if value != 0 => {
                $crate::with_client(|client| {
                    use $crate::_pred::*;
                    client.send_metric(
                        client.count_with_tags(&$crate::CounterMetric::name(&$id), -value)
                            $(.with_tag(stringify!($($k).*), $v))*
                    )
                })
            },
            _ => {},
        };
    };

    // gauge set
    (gauge($id:expr) = $value:expr $(, $($k:ident).* = $v:expr)* $(,)?) => {
        $crate::with_client(|client| {
            use $crate::_pred::*;
            client.send_metric(
                client.gauge_with_tags(&$crate::GaugeMetric::name(&$id), $value)
                    $(.with_tag(stringify!($($k).*), $v))*
            )
        })
    };

    // distribution
    (distribution($id:expr) = $value:expr $(, $($k:ident).* = $v:expr)* $(,)?) => {
        $crate::with_client(|client| {
            use $crate::_pred::*;
            client.send_metric(
                client.distribution_with_tags(&$crate::DistributionMetric::name(&$id), $value)
                    $(.with_tag(stringify!($($k).*), $v))*
            )
        })
    };

    // timer value in milliseconds
    (timer($id:expr) = $value:expr $(, $($k:ident).* = $v:expr)* $(,)?) => {
        $crate::with_client(|client| {
            use $crate::_pred::*;
            client.send_metric(
                client.distribution_with_tags(&$crate::TimerMetric::name(&$id), $value.as_nanos() as f64 / 1e6)
                    $(.with_tag(stringify!($($k).*), $v))*
            )
        })
    };

    // timed block
    (timer($id:expr), $($($k:ident).* = $v:expr,)* $block:block) => {{
        let now = std::time::Instant::now();
        let rv = {$block};
        $crate::metric!(timer($id) = now.elapsed() $(, $($k).* = $v)*);
        rv
    }};
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use cadence::{Counted, StatsdClient};

    use super::*;

    enum TestGauges {
        BufferSize,
        BufferLimit,
    }

    impl GaugeMetric for TestGauges {
        fn name(&self) -> &'static str {
            match self {
                Self::BufferSize => "buffer_size",
                Self::BufferLimit => "buffer_limit",
            }
        }
    }

    struct TestCounter;

    impl CounterMetric for TestCounter {
        fn name(&self) -> &'static str {
            "counter"
        }
    }

    struct TestTimer;

    impl TimerMetric for TestTimer {
        fn name(&self) -> &'static str {
            "timer"
        }
    }

    #[test]
    fn test_capturing_client() {
        let captures = with_capturing_test_client(|| {
            metric!(gauge(TestGauges::BufferSize) = 12, output = "file");
            metric!(gauge(TestGauges::BufferLimit) = 100, output = "discard");
        });

        assert_eq!(
            captures,
            [
                "buffer_size:12|g|#output:file",
                "buffer_limit:100|g|#output:discard"
            ]
        )
    }

    #[test]
    fn test_zero_counter_is_skipped() {
        let captures = with_capturing_test_client(|| {
            metric!(counter(TestCounter) += 0);
            metric!(counter(TestCounter) += 2, input = "mem");
            metric!(counter(TestCounter) -= 1);
        });

        assert_eq!(captures, ["counter:2|c|#input:mem", "counter:-1|c"]);
    }

    #[test]
    fn test_timer_in_milliseconds() {
        let captures = with_capturing_test_client(|| {
            metric!(timer(TestTimer) = Duration::from_micros(2500));
        });

        assert_eq!(captures, ["timer:2.5|d"]);
    }

    #[test]
    fn test_sample_rate_zero_sends_nothing() {
        let (rx, sink) = cadence::SpyMetricSink::new();
        let client = MetricsClient {
            statsd_client: StatsdClient::from_sink("", sink),
            default_tags: Default::default(),
            default_sample_rate: 0.0.into(),
        };

        client.send_metric(client.count_with_tags("counter", 1));
        drop(client);

        assert_eq!(rx.iter().count(), 0);
    }

    #[test]
    fn test_default_tags_are_appended() {
        let (rx, sink) = cadence::SpyMetricSink::new();
        let client = MetricsClient {
            statsd_client: StatsdClient::from_sink("ferry", sink),
            default_tags: BTreeMap::from([("host".to_owned(), "a".to_owned())]),
            default_sample_rate: 1.0.into(),
        };

        client.send_metric(client.count_with_tags("counter", 1));
        drop(client);

        let captures: Vec<_> = rx
            .iter()
            .map(|bytes| String::from_utf8(bytes).unwrap())
            .collect();
        assert_eq!(captures, ["ferry.counter:1|c|#host:a"]);
    }

    #[test]
    fn test_with_client_without_client() {
        let called = std::thread::spawn(|| with_client(|_| true)).join().unwrap();
        assert!(!called);
    }

    #[test]
    fn test_sample_rate_is_clamped() {
        assert_eq!(f64::from(SampleRate::from(3.0)), 1.0);
        assert_eq!(f64::from(SampleRate::from(-1.0)), 0.0);
    }
}
