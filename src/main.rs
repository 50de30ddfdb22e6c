// SPDX-License-Identifier: MIT
use std::fmt;

use anyhow::Result;
use clap::{Parser, ValueEnum};
use tracing::{info, warn};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

use rust_sample_app::config::Configuration;
use rust_sample_app::sampler::{OtlpSampler, Sampler, XraySampler};
use rust_sample_app::telemetry::{init_telemetry, TelemetryHandle};

#[derive(Copy, Clone, Debug, PartialEq, Eq, ValueEnum)]
enum TraceKind {
    /// Emit segments through the X-Ray daemon protocol.
    Xray,
    /// Export spans over OTLP gRPC.
    Otlp,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, ValueEnum)]
enum SampleKind {
    /// Trace a mocked AWS SDK list call.
    Aws,
    /// Trace an outgoing HTTP GET.
    Http,
}

impl fmt::Display for TraceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            TraceKind::Xray => "xray",
            TraceKind::Otlp => "otlp",
        })
    }
}

impl fmt::Display for SampleKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            SampleKind::Aws => "aws",
            SampleKind::Http => "http",
        })
    }
}

/// Sample application that produces one trace through the selected backend
/// and prints the resulting X-Ray trace ID.
#[derive(Debug, Parser)]
#[command(version, about)]
struct Args {
    /// The type of trace data sent.
    #[arg(long, value_enum, default_value_t = TraceKind::Xray)]
    trace: TraceKind,
    /// The type of sample to run.
    #[arg(long, value_enum, default_value_t = SampleKind::Aws)]
    sample: SampleKind,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Running sample app for {}/{}", args.trace, args.sample);

    let cfg = Configuration::from_env();
    let client = reqwest::Client::new();

    let (sampler, telemetry): (Sampler, Option<TelemetryHandle>) = match args.trace {
        TraceKind::Xray => (Sampler::Xray(XraySampler::from_env()?), None),
        TraceKind::Otlp => {
            let handle = init_telemetry(&cfg)?;
            let sampler = OtlpSampler::new(handle.provider(), &cfg);
            (Sampler::Otlp(sampler), Some(handle))
        }
    };

    let trace_id = match args.sample {
        SampleKind::Aws => sampler.aws_sdk_call().await,
        SampleKind::Http => sampler.outgoing_http_call(&client).await,
    };

    // Drain the batch exporter before reporting, so the collector has seen
    // the trace by the time its ID is printed.
    if let Some(handle) = &telemetry {
        if let Err(err) = handle.force_flush() {
            warn!("{err:#}");
        }
    }

    info!("X-Ray ID: {trace_id}");

    // The ID has been reported; release errors are logged, never fatal.
    if let Some(handle) = telemetry {
        if let Err(err) = handle.shutdown() {
            warn!("{err:#}");
        }
    }

    Ok(())
}
