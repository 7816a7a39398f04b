//! Prometheus metrics

use anyhow::Result;
use metrics_exporter_prometheus::PrometheusBuilder;

/// Install the Prometheus recorder
/// Returns a handle that can be used to render the current snapshot
pub fn setup_metrics() -> Result<metrics_exporter_prometheus::PrometheusHandle> {
    let handle = PrometheusBuilder::new()
        .install_recorder()
        .map_err(|e| anyhow::anyhow!("Failed to install Prometheus exporter: {}", e))?;

    tracing::info!("Prometheus metrics recorder installed");

    Ok(handle)
}

/// Record an artifact download attempt
pub fn record_download(source: &'static str, success: bool) {
    metrics::counter!("model_zoo_downloads_total",
        "source" => source,
        "outcome" => if success { "success" } else { "failure" }
    )
    .increment(1);
}

/// Record a forced re-download after a corrupt artifact
pub fn record_forced_retry(model_name: &str) {
    metrics::counter!("model_zoo_forced_retries_total",
        "model" => model_name.to_string()
    )
    .increment(1);
}

/// Record a model cache lookup
pub fn record_cache_lookup(family: &'static str, hit: bool) {
    let name = if hit {
        "model_zoo_cache_hits_total"
    } else {
        "model_zoo_cache_misses_total"
    };
    metrics::counter!(name, "family" => family).increment(1);
}

/// Update the loaded model count gauge
pub fn update_loaded_count(count: usize) {
    metrics::gauge!("model_zoo_models_loaded").set(count as f64);
}
