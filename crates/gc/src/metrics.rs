//! Prometheus metrics for garbage collection.

use prometheus::{Encoder, Histogram, HistogramOpts, IntCounter, Registry, TextEncoder};
use std::sync::{LazyLock, Once};

/// Registry holding the GC metrics.
pub static REGISTRY: LazyLock<Registry> = LazyLock::new(Registry::new);

pub static REPOSITORIES_COLLECTED: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "wharf_gc_repositories_collected_total",
        "Repositories in which a collection removed something",
    )
    .expect("metric creation failed")
});

pub static REPOSITORIES_PURGED: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "wharf_gc_repositories_purged_total",
        "Repositories removed by purge",
    )
    .expect("metric creation failed")
});

pub static MANIFESTS_REMOVED: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new("wharf_gc_manifests_removed_total", "Manifests removed")
        .expect("metric creation failed")
});

pub static IMAGES_REMOVED: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new("wharf_gc_images_removed_total", "Legacy images removed")
        .expect("metric creation failed")
});

pub static LABELS_REMOVED: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new("wharf_gc_labels_removed_total", "Labels removed")
        .expect("metric creation failed")
});

pub static STORAGE_RECLAIMED: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "wharf_gc_storage_objects_reclaimed_total",
        "Storage objects whose catalog row was removed",
    )
    .expect("metric creation failed")
});

pub static BYTES_RECLAIMED: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "wharf_gc_bytes_reclaimed_total",
        "Bytes deleted from the byte store",
    )
    .expect("metric creation failed")
});

pub static BYTE_DELETE_FAILURES: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "wharf_gc_byte_delete_failures_total",
        "Byte-store deletes that failed and left an orphaned object",
    )
    .expect("metric creation failed")
});

pub static PASS_DURATION: LazyLock<Histogram> = LazyLock::new(|| {
    Histogram::with_opts(
        HistogramOpts::new(
            "wharf_gc_pass_duration_seconds",
            "Duration of a collect or purge pass over one repository",
        )
        .buckets(vec![0.01, 0.05, 0.1, 0.5, 1.0, 5.0, 10.0, 30.0, 60.0]),
    )
    .expect("metric creation failed")
});

static REGISTER_ONCE: Once = Once::new();

/// Register all GC metrics with [`REGISTRY`]. Safe to call more than once.
pub fn register_metrics() {
    REGISTER_ONCE.call_once(|| {
        REGISTRY
            .register(Box::new(REPOSITORIES_COLLECTED.clone()))
            .expect("metric registration failed");
        REGISTRY
            .register(Box::new(REPOSITORIES_PURGED.clone()))
            .expect("metric registration failed");
        REGISTRY
            .register(Box::new(MANIFESTS_REMOVED.clone()))
            .expect("metric registration failed");
        REGISTRY
            .register(Box::new(IMAGES_REMOVED.clone()))
            .expect("metric registration failed");
        REGISTRY
            .register(Box::new(LABELS_REMOVED.clone()))
            .expect("metric registration failed");
        REGISTRY
            .register(Box::new(STORAGE_RECLAIMED.clone()))
            .expect("metric registration failed");
        REGISTRY
            .register(Box::new(BYTES_RECLAIMED.clone()))
            .expect("metric registration failed");
        REGISTRY
            .register(Box::new(BYTE_DELETE_FAILURES.clone()))
            .expect("metric registration failed");
        REGISTRY
            .register(Box::new(PASS_DURATION.clone()))
            .expect("metric registration failed");
    });
}

/// Render the registry in the Prometheus text format.
pub fn render() -> Result<String, prometheus::Error> {
    let mut buffer = Vec::new();
    TextEncoder::new().encode(&REGISTRY.gather(), &mut buffer)?;
    String::from_utf8(buffer).map_err(|e| prometheus::Error::Msg(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_registration() {
        register_metrics();
        register_metrics();

        MANIFESTS_REMOVED.inc();
        let text = render().unwrap();
        assert!(text.contains("wharf_gc_manifests_removed_total"));
        assert!(text.contains("wharf_gc_pass_duration_seconds"));
    }
}
