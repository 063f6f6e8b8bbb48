use metrics_exporter_statsd::StatsdBuilder;

use crate::metrics_defs::MetricDef;

#[derive(thiserror::Error, Debug)]
pub enum MetricsError {
    #[error("could not build statsd exporter: {0}")]
    Exporter(String),
    #[error("a metrics recorder is already installed")]
    RecorderInstalled,
}

/// Installs a statsd exporter as the global metrics recorder and describes
/// every metric in `defs`.
///
/// Without this call every metric is discarded.
pub fn init_statsd(
    host: &str,
    port: u16,
    prefix: &str,
    defs: &[MetricDef],
) -> Result<(), MetricsError> {
    let recorder = StatsdBuilder::from(host, port)
        .build(Some(prefix))
        .map_err(|e| MetricsError::Exporter(e.to_string()))?;
    metrics::set_global_recorder(recorder).map_err(|_| MetricsError::RecorderInstalled)?;

    for def in defs {
        def.describe();
    }

    tracing::info!(host, port, prefix, "Sending metrics to statsd");
    Ok(())
}
