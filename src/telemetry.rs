// SPDX-License-Identifier: MIT
//! OTLP trace provider bootstrap.
//!
//! [`init_telemetry`] builds the batch-exporting tracer provider used by the
//! OTLP sampler: an always-on sampling policy, an X-Ray compatible ID
//! generator, a resource descriptor, and a plaintext gRPC span exporter. The
//! provider is installed globally along with the X-Ray propagator, and a
//! [`TelemetryHandle`] is returned for explicit flush and bounded shutdown.
//!
//! # Shutdown
//! Call [`TelemetryHandle::shutdown`] before process exit; it blocks at most
//! one second waiting for the exporter to drain, then returns an error rather
//! than hanging.

use std::time::Duration;

use anyhow::{bail, Context as _, Result};
use opentelemetry::{global, KeyValue};
use opentelemetry_otlp::{SpanExporter, WithExportConfig};
use opentelemetry_sdk::trace::{Sampler, SdkTracerProvider};
use opentelemetry_sdk::Resource;

use crate::config::Configuration;
use crate::xray::{XrayIdGenerator, XrayPropagator};

/// Endpoint override for the OTLP collector. Default: `http://localhost:4317`.
pub const OTLP_ENDPOINT_ENV: &str = "OTEL_EXPORTER_OTLP_ENDPOINT";

/// When set, replaces the default resource descriptor with attributes parsed
/// from this variable (`key=value`, comma separated). A malformed entry is a
/// startup error.
pub const RESOURCE_ATTRIBUTES_ENV: &str = "OTEL_RESOURCE_ATTRIBUTES";

const DEFAULT_OTLP_ENDPOINT: &str = "http://localhost:4317";
const SERVICE_NAME: &str = "otel-sample-app";
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(1);

/// Handle owning the tracer provider; allows explicit flush and shutdown.
pub struct TelemetryHandle {
    tracer_provider: SdkTracerProvider,
}

impl TelemetryHandle {
    /// A clone of the provider, for injecting into components that emit spans.
    pub fn provider(&self) -> SdkTracerProvider {
        self.tracer_provider.clone()
    }

    /// Synchronously flush all batched spans to the exporter.
    pub fn force_flush(&self) -> Result<()> {
        self.tracer_provider
            .force_flush()
            .context("flushing tracer provider")
    }

    /// Flush and shut down the provider, waiting at most one second for the
    /// exporter connection to drain. A timeout or exporter error is returned
    /// to the caller.
    pub fn shutdown(self) -> Result<()> {
        self.tracer_provider
            .shutdown_with_timeout(SHUTDOWN_TIMEOUT)
            .context("shutting down tracer provider")
    }
}

/// Build the tracer provider and install it (plus the X-Ray propagator)
/// process-wide.
///
/// # Errors
/// Fails when `OTEL_RESOURCE_ATTRIBUTES` is present but malformed, or when the
/// exporter cannot be constructed.
pub fn init_telemetry(cfg: &Configuration) -> Result<TelemetryHandle> {
    let resource = build_resource(cfg)?;

    let endpoint =
        std::env::var(OTLP_ENDPOINT_ENV).unwrap_or_else(|_| DEFAULT_OTLP_ENDPOINT.to_string());

    // Plaintext gRPC. Fine against a local collector, unsafe anywhere else.
    let exporter = SpanExporter::builder()
        .with_tonic()
        .with_endpoint(endpoint)
        .build()
        .context("building OTLP span exporter")?;

    let tracer_provider = SdkTracerProvider::builder()
        .with_sampler(Sampler::AlwaysOn)
        .with_id_generator(XrayIdGenerator)
        .with_resource(resource)
        .with_batch_exporter(exporter)
        .build();

    global::set_tracer_provider(tracer_provider.clone());
    global::set_text_map_propagator(XrayPropagator::new());

    Ok(TelemetryHandle { tracer_provider })
}

// Default descriptor carries the fixed service name (plus instance suffix)
// and the host/port pair; an environment override replaces it entirely.
fn build_resource(cfg: &Configuration) -> Result<Resource> {
    if let Ok(raw) = std::env::var(RESOURCE_ATTRIBUTES_ENV) {
        return resource_from_attributes(&raw)
            .with_context(|| format!("parsing {RESOURCE_ATTRIBUTES_ENV}"));
    }

    Ok(Resource::builder()
        .with_service_name(format!("{SERVICE_NAME}{}", cfg.instance_suffix))
        .with_attributes([
            KeyValue::new("host", cfg.host.clone()),
            KeyValue::new("port", cfg.port.clone()),
        ])
        .build())
}

fn resource_from_attributes(raw: &str) -> Result<Resource> {
    let mut attributes = Vec::new();
    for pair in raw.split(',').map(str::trim).filter(|p| !p.is_empty()) {
        let Some((key, value)) = pair.split_once('=') else {
            bail!("malformed attribute {pair:?}, expected key=value");
        };
        let (key, value) = (key.trim(), value.trim());
        if key.is_empty() {
            bail!("malformed attribute {pair:?}, empty key");
        }
        attributes.push(KeyValue::new(key.to_string(), value.to_string()));
    }
    Ok(Resource::builder_empty().with_attributes(attributes).build())
}
