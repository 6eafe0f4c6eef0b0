//! InfluxDB line protocol.
//!
//! Every metric is written as one line:
//!
//! ```text
//! measurement,tag=value field=1.5,count=3i,total=7u,up=true,state="ok" 1700000000000000000
//! ```
//!
//! Tags and fields are sorted by key. Non-finite floats cannot be represented and are skipped. A
//! metric without any representable field produces no line.

use std::fmt::Write;

use ferry_metrics::{FieldValue, Metric};

/// Appends the line of a metric to `buf`.
pub fn write_metric(buf: &mut String, metric: &Metric) {
    let start = buf.len();

    escape(buf, metric.name(), &[',', ' ']);

    for (key, value) in metric.tags() {
        buf.push(',');
        escape(buf, key, &[',', '=', ' ']);
        buf.push('=');
        escape(buf, value, &[',', '=', ' ']);
    }

    let mut separator = ' ';
    for (key, value) in metric.fields() {
        if matches!(value, FieldValue::Float(value) if !value.is_finite()) {
            continue;
        }

        buf.push(separator);
        separator = ',';

        escape(buf, key, &[',', '=', ' ']);
        buf.push('=');
        write_field_value(buf, value);
    }

    if separator == ' ' {
        buf.truncate(start);
        return;
    }

    if let Some(nanos) = metric.timestamp().timestamp_nanos_opt() {
        let _ = write!(buf, " {nanos}");
    }

    buf.push('\n');
}

/// Serializes a batch of metrics, one line per metric.
pub fn serialize(metrics: &[Metric]) -> String {
    let mut buf = String::new();
    for metric in metrics {
        write_metric(&mut buf, metric);
    }
    buf
}

fn write_field_value(buf: &mut String, value: &FieldValue) {
    match value {
        FieldValue::Integer(value) => {
            let _ = write!(buf, "{value}i");
        }
        FieldValue::Unsigned(value) => {
            let _ = write!(buf, "{value}u");
        }
        FieldValue::Float(value) => {
            let _ = write!(buf, "{value}");
        }
        FieldValue::Boolean(value) => {
            let _ = write!(buf, "{value}");
        }
        FieldValue::String(value) => {
            buf.push('"');
            escape(buf, value, &['"']);
            buf.push('"');
        }
    }
}

/// Escapes backslashes and the given special characters with a backslash.
fn escape(buf: &mut String, s: &str, special: &[char]) {
    for c in s.chars() {
        if c == '\\' || special.contains(&c) {
            buf.push('\\');
        }
        buf.push(c);
    }
}

#[cfg(test)]
mod tests {
    use chrono::{DateTime, TimeZone, Utc};

    use super::*;

    fn timestamp() -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000, 0).single().unwrap()
    }

    #[test]
    fn test_field_types() {
        let metric = Metric::new("system", timestamp())
            .with_tag("host", "server01")
            .with_field("load", 0.5)
            .with_field("procs", 120i64)
            .with_field("uptime", 3600u64)
            .with_field("healthy", true)
            .with_field("state", "ok");

        insta::assert_snapshot!(serialize(&[metric]), @r#"system,host=server01 healthy=true,load=0.5,procs=120i,state="ok",uptime=3600u 1700000000000000000"#);
    }

    #[test]
    fn test_escaping() {
        let metric = Metric::new("my app,x", timestamp())
            .with_tag("host name", "a=b,c")
            .with_field("path\\len", 1i64)
            .with_field("msg", r#"say "hi""#);

        insta::assert_snapshot!(serialize(&[metric]), @r#"my\ app\,x,host\ name=a\=b\,c msg="say \"hi\"",path\\len=1i 1700000000000000000"#);
    }

    #[test]
    fn test_non_finite_floats_skipped() {
        let metric = Metric::new("cpu", timestamp())
            .with_field("idle", f64::NAN)
            .with_field("user", 1.5);
        assert_eq!(serialize(&[metric]), "cpu user=1.5 1700000000000000000\n");

        let metric = Metric::new("cpu", timestamp()).with_field("idle", f64::INFINITY);
        assert_eq!(serialize(&[metric]), "");
    }

    #[test]
    fn test_multiple_lines() {
        let metrics = [
            Metric::new("a", timestamp()).with_field("value", 1i64),
            Metric::new("b", timestamp()).with_field("value", 2.5),
        ];

        insta::assert_snapshot!(serialize(&metrics), @r"
        a value=1i 1700000000000000000
        b value=2.5 1700000000000000000
        ");
    }
}
