// SPDX-License-Identifier: MIT
//! Sample application exercising two tracing backends against a local
//! collector: the AWS X-Ray daemon protocol and an OpenTelemetry OTLP
//! pipeline.
//!
//! One run performs a single mocked outbound call (an AWS SDK list operation
//! or an HTTP GET) inside a root trace scope and prints the resulting trace
//! ID in X-Ray textual form (`1-<8 hex>-<24 hex>`). The outbound call is
//! expected to fail — no credentials are configured — because the point is
//! exporting the attempt, not succeeding at it.
//!
//! Modules:
//! * [`config`] – environment configuration with silent defaults.
//! * [`telemetry`] – OTLP tracer provider bootstrap and shutdown handle.
//! * [`xray`] – X-Ray propagator, ID generator, and trace-ID formatting.
//! * [`daemon`] – X-Ray daemon segment documents over UDP.
//! * [`sampler`] – the two sampler variants behind one dispatch enum.
pub mod config;
pub mod daemon;
pub mod sampler;
pub mod telemetry;
pub mod xray;
