//! Subscriber setup for the two ways the binary runs.
//!
//! `serve` logs JSON lines and, with `observability.otlp_endpoint` set,
//! also ships spans over OTLP/gRPC. Every other command writes compact
//! warnings to stderr so stdout stays clean for JSON output.

use opentelemetry::trace::TracerProvider as _;
use opentelemetry_otlp::WithExportConfig as _;
use opentelemetry_sdk::trace::{Sampler, SdkTracerProvider};
use opentelemetry_sdk::Resource;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

use pm_domain::config::ObservabilityConfig;

/// Held by `serve` until shutdown so buffered spans get flushed.
pub struct Telemetry {
    provider: Option<SdkTracerProvider>,
}

impl Telemetry {
    pub fn exporting(&self) -> bool {
        self.provider.is_some()
    }

    pub fn shutdown(self) {
        if let Some(provider) = self.provider {
            if let Err(e) = provider.shutdown() {
                tracing::warn!(error = ?e, "span exporter did not shut down cleanly");
            }
        }
    }
}

fn filter(default: &str) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default))
}

/// `None` when no endpoint is configured or the exporter cannot be built.
/// Runs before any subscriber exists, so failures go to stderr directly.
fn otlp_provider(obs: &ObservabilityConfig) -> Option<SdkTracerProvider> {
    let endpoint = obs.otlp_endpoint.as_deref()?;
    let exporter = opentelemetry_otlp::SpanExporter::builder()
        .with_tonic()
        .with_endpoint(endpoint)
        .build()
        .map_err(|e| eprintln!("pinmark: OTLP exporter for {endpoint} unavailable ({e}), spans stay local"))
        .ok()?;

    Some(
        SdkTracerProvider::builder()
            .with_batch_exporter(exporter)
            .with_sampler(Sampler::TraceIdRatioBased(obs.sample_rate))
            .with_resource(
                Resource::builder()
                    .with_service_name(obs.service_name.clone())
                    .build(),
            )
            .build(),
    )
}

pub fn init_server(obs: &ObservabilityConfig) -> Telemetry {
    let provider = otlp_provider(obs);
    let spans = provider
        .as_ref()
        .map(|p| tracing_opentelemetry::layer().with_tracer(p.tracer("pinmark")));

    tracing_subscriber::registry()
        .with(filter(&obs.log_filter))
        .with(tracing_subscriber::fmt::layer().json())
        .with(spans)
        .init();

    Telemetry { provider }
}

pub fn init_cli() {
    tracing_subscriber::fmt()
        .with_env_filter(filter("warn"))
        .with_writer(std::io::stderr)
        .compact()
        .init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_endpoint_means_no_exporter() {
        let obs = ObservabilityConfig::default();
        assert!(obs.otlp_endpoint.is_none());
        assert!(otlp_provider(&obs).is_none());
    }
}
