// Metrics module - Prometheus counters for the variant service

use prometheus::{register_int_counter, IntCounter};
use std::sync::OnceLock;

/// Global metrics for cache, pipeline, upload and fetch activity
pub struct ServiceMetrics {
    /// Variant requests answered from the store without running the pipeline
    pub cache_hits: IntCounter,

    /// Variant requests that required a pipeline run
    pub cache_misses: IntCounter,

    /// Total transform pipeline runs started
    pub pipeline_runs: IntCounter,

    /// Pipeline runs that failed at any stage
    pub pipeline_failures: IntCounter,

    /// Successful uploads (including dedup hits)
    pub uploads: IntCounter,

    /// Originals imported from a URL
    pub url_imports: IntCounter,

    /// URL fetches that failed (network error or non-2xx)
    pub fetch_failures: IntCounter,

    /// Requests rejected by the authorization guard
    pub auth_rejections: IntCounter,
}

/// Global singleton instance of metrics
static METRICS: OnceLock<ServiceMetrics> = OnceLock::new();

impl ServiceMetrics {
    /// Initialize and return the global metrics instance
    ///
    /// Subsequent calls return the same instance.
    pub fn global() -> &'static Self {
        METRICS.get_or_init(|| ServiceMetrics {
            cache_hits: register_int_counter!(
                "lazy_image_cache_hits_total",
                "Variant requests served from the store"
            )
            .expect("Failed to register cache_hits metric"),
            cache_misses: register_int_counter!(
                "lazy_image_cache_misses_total",
                "Variant requests requiring computation"
            )
            .expect("Failed to register cache_misses metric"),
            pipeline_runs: register_int_counter!(
                "lazy_image_pipeline_runs_total",
                "Transform pipeline runs started"
            )
            .expect("Failed to register pipeline_runs metric"),
            pipeline_failures: register_int_counter!(
                "lazy_image_pipeline_failures_total",
                "Transform pipeline runs that failed"
            )
            .expect("Failed to register pipeline_failures metric"),
            uploads: register_int_counter!("lazy_image_uploads_total", "Images uploaded")
                .expect("Failed to register uploads metric"),
            url_imports: register_int_counter!(
                "lazy_image_url_imports_total",
                "Originals imported from URLs"
            )
            .expect("Failed to register url_imports metric"),
            fetch_failures: register_int_counter!(
                "lazy_image_fetch_failures_total",
                "URL fetches that failed"
            )
            .expect("Failed to register fetch_failures metric"),
            auth_rejections: register_int_counter!(
                "lazy_image_auth_rejections_total",
                "Requests rejected by the authorization guard"
            )
            .expect("Failed to register auth_rejections metric"),
        })
    }
}
