use std::collections::HashSet;
use std::time::Duration;

use bytes::Bytes;
use chronostash::cache::instrument::{
    METRIC_BYTE_OPERATIONS, METRIC_EVENTS, METRIC_OBJECT_OPERATIONS, METRIC_USAGE_BYTES,
    METRIC_USAGE_OBJECTS,
};
use chronostash::cache::{Cache, CacheConfig, FilesystemCache, InMemoryCache, IndexOptions};
use metrics_util::debugging::DebuggingRecorder;
use tempfile::TempDir;

fn exercise(cache: &dyn Cache) {
    cache.connect().expect("cache connects");
    assert!(cache.retrieve("absent", false).is_err());
    cache
        .store("fresh", Bytes::from_static(b"payload"), Duration::from_secs(60))
        .expect("store");
    cache.retrieve("fresh", false).expect("hit");
    cache
        .store("stale", Bytes::from_static(b"old"), Duration::ZERO)
        .expect("store");
    assert!(cache.retrieve("stale", false).is_err());
    cache.set_ttl("fresh", Duration::from_secs(120));
    cache.remove("fresh");
    cache.reap();
    cache.close().expect("close");
    assert!(cache.retrieve("fresh", false).is_err());
}

#[test]
fn cache_paths_emit_expected_metrics() {
    let recorder = DebuggingRecorder::new();
    let snapshotter = recorder.snapshotter();
    recorder
        .install()
        .expect("debug metrics recorder should install in this test process");

    let options = IndexOptions {
        max_size_objects: 1,
        max_size_backoff_objects: 0,
        ..Default::default()
    };
    let mut memory = CacheConfig::memory("mem");
    memory.index = options.clone();
    exercise(&InMemoryCache::new(memory));

    let dir = TempDir::new().expect("temp dir");
    let mut disk = CacheConfig::filesystem("disk", dir.path());
    disk.index = options;
    exercise(&FilesystemCache::new(disk));

    let snapshot = snapshotter.snapshot().into_vec();
    let names: HashSet<String> = snapshot
        .iter()
        .map(|(composite_key, _, _, _)| composite_key.key().name().to_string())
        .collect();

    for metric in [
        METRIC_OBJECT_OPERATIONS,
        METRIC_BYTE_OPERATIONS,
        METRIC_EVENTS,
        METRIC_USAGE_OBJECTS,
        METRIC_USAGE_BYTES,
    ] {
        assert!(names.contains(metric), "missing metric: {metric}");
    }

    let labelled: HashSet<(String, String, String)> = snapshot
        .iter()
        .filter(|(composite_key, _, _, _)| composite_key.key().name() == METRIC_OBJECT_OPERATIONS)
        .map(|(composite_key, _, _, _)| {
            let label = |name: &str| {
                composite_key
                    .key()
                    .labels()
                    .find(|label| label.key() == name)
                    .map(|label| label.value().to_string())
                    .unwrap_or_default()
            };
            (label("cache_type"), label("operation"), label("status"))
        })
        .collect();

    for cache_type in ["memory", "filesystem"] {
        for (operation, status) in [
            ("get", "kmiss"),
            ("get", "hit"),
            ("get", "expired"),
            ("set", "success"),
            ("update-ttl", "success"),
            ("del", "none"),
        ] {
            assert!(
                labelled.contains(&(
                    cache_type.to_string(),
                    operation.to_string(),
                    status.to_string()
                )),
                "missing {cache_type} {operation}/{status}"
            );
        }
    }

    let events: HashSet<(String, String)> = snapshot
        .iter()
        .filter(|(composite_key, _, _, _)| composite_key.key().name() == METRIC_EVENTS)
        .map(|(composite_key, _, _, _)| {
            let mut event = String::new();
            let mut reason = String::new();
            for label in composite_key.key().labels() {
                match label.key() {
                    "event" => event = label.value().to_string(),
                    "reason" => reason = label.value().to_string(),
                    _ => {}
                }
            }
            (event, reason)
        })
        .collect();
    assert!(events.contains(&("eviction".to_string(), "ttl".to_string())));
    assert!(events.contains(&("error".to_string(), "closed".to_string())));
}
