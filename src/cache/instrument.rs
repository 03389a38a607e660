//! Cache instrumentation hooks.
//!
//! Backends call these around their own operations; the abstraction layer never
//! calls them on a backend's behalf. They only touch the `metrics` facade, never
//! fail, and are safe to call from any number of threads.

use metrics::{counter, gauge};

use super::error::CacheError;
use super::status::LookupStatus;

pub const METRIC_OBJECT_OPERATIONS: &str = "chronostash_cache_object_operations_total";
pub const METRIC_BYTE_OPERATIONS: &str = "chronostash_cache_byte_operations_total";
pub const METRIC_EVENTS: &str = "chronostash_cache_events_total";
pub const METRIC_USAGE_OBJECTS: &str = "chronostash_cache_usage_objects";
pub const METRIC_USAGE_BYTES: &str = "chronostash_cache_usage_bytes";

/// Records a miss and returns the standard not-found error for `key`.
pub fn observe_cache_miss(key: &str, cache_name: &str, cache_type: &str) -> CacheError {
    observe_cache_operation(cache_name, cache_type, "get", LookupStatus::Miss.as_str(), 0);
    CacheError::KeyNotFound {
        key: key.to_string(),
        status: LookupStatus::Miss,
    }
}

/// Records a read refused because the entry outlived its TTL.
pub fn observe_cache_expired(key: &str, cache_name: &str, cache_type: &str) -> CacheError {
    observe_cache_operation(
        cache_name,
        cache_type,
        "get",
        LookupStatus::Expired.as_str(),
        0,
    );
    CacheError::KeyNotFound {
        key: key.to_string(),
        status: LookupStatus::Expired,
    }
}

/// Records `count` deletions.
pub fn observe_cache_del(cache_name: &str, cache_type: &str, count: u64) {
    counter!(
        METRIC_OBJECT_OPERATIONS,
        "cache_name" => cache_name.to_string(),
        "cache_type" => cache_type.to_string(),
        "operation" => "del",
        "status" => "none"
    )
    .increment(count);
}

/// Records an error event and returns the write error carrying `key`.
pub fn cache_error(key: &str, cache_name: &str, cache_type: &str, reason: &str) -> CacheError {
    observe_cache_event(cache_name, cache_type, "error", reason);
    CacheError::Write {
        key: key.to_string(),
        reason: reason.to_string(),
    }
}

/// Records an operation attempted after `close()`.
pub fn observe_cache_closed(cache_name: &str, cache_type: &str) -> CacheError {
    observe_cache_event(cache_name, cache_type, "error", "closed");
    CacheError::Closed {
        cache: cache_name.to_string(),
    }
}

/// Counts one operation; byte totals accumulate only when `bytes > 0`.
pub fn observe_cache_operation(
    cache_name: &str,
    cache_type: &str,
    operation: &str,
    status: &str,
    bytes: u64,
) {
    counter!(
        METRIC_OBJECT_OPERATIONS,
        "cache_name" => cache_name.to_string(),
        "cache_type" => cache_type.to_string(),
        "operation" => operation.to_string(),
        "status" => status.to_string()
    )
    .increment(1);

    if bytes > 0 {
        counter!(
            METRIC_BYTE_OPERATIONS,
            "cache_name" => cache_name.to_string(),
            "cache_type" => cache_type.to_string(),
            "operation" => operation.to_string(),
            "status" => status.to_string()
        )
        .increment(bytes);
    }
}

/// Counts a non-operation signal such as an eviction or an error.
pub fn observe_cache_event(cache_name: &str, cache_type: &str, event: &str, reason: &str) {
    counter!(
        METRIC_EVENTS,
        "cache_name" => cache_name.to_string(),
        "cache_type" => cache_type.to_string(),
        "event" => event.to_string(),
        "reason" => reason.to_string()
    )
    .increment(1);
}

/// Sets the occupancy gauges to the backend's current totals.
pub fn observe_cache_size_change(
    cache_name: &str,
    cache_type: &str,
    byte_count: u64,
    object_count: u64,
) {
    gauge!(
        METRIC_USAGE_OBJECTS,
        "cache_name" => cache_name.to_string(),
        "cache_type" => cache_type.to_string()
    )
    .set(object_count as f64);
    gauge!(
        METRIC_USAGE_BYTES,
        "cache_name" => cache_name.to_string(),
        "cache_type" => cache_type.to_string()
    )
    .set(byte_count as f64);
}

#[cfg(test)]
mod tests {
    use metrics_util::debugging::{DebugValue, DebuggingRecorder};

    use super::*;

    fn labeled<'a>(
        entries: &'a [(String, Vec<(String, String)>, DebugValue)],
        name: &str,
        label: (&str, &str),
    ) -> Option<&'a DebugValue> {
        entries
            .iter()
            .find(|(n, labels, _)| {
                n == name
                    && labels
                        .iter()
                        .any(|(k, v)| k == label.0 && v == label.1)
            })
            .map(|(_, _, value)| value)
    }

    fn capture(f: impl FnOnce()) -> Vec<(String, Vec<(String, String)>, DebugValue)> {
        let recorder = DebuggingRecorder::new();
        let snapshotter = recorder.snapshotter();
        metrics::with_local_recorder(&recorder, f);
        snapshotter
            .snapshot()
            .into_vec()
            .into_iter()
            .map(|(key, _, _, value)| {
                let labels = key
                    .key()
                    .labels()
                    .map(|l| (l.key().to_string(), l.value().to_string()))
                    .collect();
                (key.key().name().to_string(), labels, value)
            })
            .collect()
    }

    #[test]
    fn miss_counts_get_operation_and_returns_not_found() {
        let mut error = None;
        let entries = capture(|| {
            error = Some(observe_cache_miss("k1", "default", "memory"));
        });

        let error = error.expect("miss should produce an error");
        assert_eq!(error.status(), LookupStatus::Miss);
        assert!(matches!(
            labeled(&entries, METRIC_OBJECT_OPERATIONS, ("status", "kmiss")),
            Some(DebugValue::Counter(1))
        ));
        assert!(labeled(&entries, METRIC_BYTE_OPERATIONS, ("status", "kmiss")).is_none());
    }

    #[test]
    fn byte_counter_only_moves_for_positive_sizes() {
        let entries = capture(|| {
            observe_cache_operation("default", "memory", "set", "success", 128);
            observe_cache_operation("default", "memory", "set", "success", 0);
        });

        assert!(matches!(
            labeled(&entries, METRIC_OBJECT_OPERATIONS, ("operation", "set")),
            Some(DebugValue::Counter(2))
        ));
        assert!(matches!(
            labeled(&entries, METRIC_BYTE_OPERATIONS, ("operation", "set")),
            Some(DebugValue::Counter(128))
        ));
    }

    #[test]
    fn deletions_are_counted_in_bulk() {
        let entries = capture(|| observe_cache_del("default", "memory", 3));
        assert!(matches!(
            labeled(&entries, METRIC_OBJECT_OPERATIONS, ("operation", "del")),
            Some(DebugValue::Counter(3))
        ));
    }

    #[test]
    fn cache_error_records_event_and_names_key() {
        let mut error = None;
        let entries = capture(|| {
            error = Some(cache_error("k2", "disk", "filesystem", "write_failed"));
        });

        let error = error.expect("error should be produced");
        assert!(error.to_string().contains("[k2]"));
        assert!(matches!(
            labeled(&entries, METRIC_EVENTS, ("reason", "write_failed")),
            Some(DebugValue::Counter(1))
        ));
    }

    #[test]
    fn size_change_sets_gauges() {
        let entries = capture(|| {
            observe_cache_size_change("default", "memory", 4096, 10);
            observe_cache_size_change("default", "memory", 1024, 2);
        });

        match labeled(&entries, METRIC_USAGE_BYTES, ("cache_name", "default")) {
            Some(DebugValue::Gauge(value)) => assert_eq!(value.into_inner(), 1024.0),
            other => panic!("unexpected bytes gauge: {other:?}"),
        }
        match labeled(&entries, METRIC_USAGE_OBJECTS, ("cache_name", "default")) {
            Some(DebugValue::Gauge(value)) => assert_eq!(value.into_inner(), 2.0),
            other => panic!("unexpected objects gauge: {other:?}"),
        }
    }
}
