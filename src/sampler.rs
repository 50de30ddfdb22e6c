// SPDX-License-Identifier: MIT
//! The two interchangeable trace samplers.
//!
//! Each variant implements the same two operations: open a root trace scope,
//! open a nested scope labeled with the operation name and the common label
//! set, perform one outbound call whose failure is logged and never escalated,
//! close both scopes, and return the root trace ID in X-Ray textual form.
//! Exactly one variant is selected per process run.

use aws_config::{BehaviorVersion, Region};
use opentelemetry::trace::{Span, TraceContextExt, Tracer, TracerProvider as _};
use opentelemetry::{global, Context, KeyValue};
use opentelemetry_sdk::trace::SdkTracerProvider;
use serde_json::json;
use tracing::{info, warn};

use anyhow::Result;

use crate::config::Configuration;
use crate::daemon::{DaemonClient, Segment, Subsegment};
use crate::xray::{xray_trace_id, HeaderInjector, XRAY_TRACE_HEADER};

const TRACER_NAME: &str = "demo";
const OTLP_ROOT_NAME: &str = "otel-sample-app";
const XRAY_ROOT_NAME: &str = "xray-sample-app";

const DEMO_URL: &str = "https://aws.amazon.com/";
const DEMO_BUCKET: &str = "cloudwatch-agent-integration-bucket";
const DEMO_REGION: &str = "us-west-2";

/// Labels attached to the nested scope of every operation.
fn common_labels(cfg: &Configuration) -> Vec<KeyValue> {
    vec![
        KeyValue::new("signal", "trace"),
        KeyValue::new("language", "rust"),
        KeyValue::new("host", cfg.host.clone()),
        KeyValue::new("port", cfg.port.clone()),
    ]
}

async fn load_aws_config() -> aws_config::SdkConfig {
    aws_config::defaults(BehaviorVersion::latest())
        .region(Region::new(DEMO_REGION))
        .load()
        .await
}

/// The selected backend variant; constructed once per run, dispatched by match.
pub enum Sampler {
    Xray(XraySampler),
    Otlp(OtlpSampler),
}

impl Sampler {
    /// Trace a mocked AWS SDK call and return the root trace ID.
    pub async fn aws_sdk_call(&self) -> String {
        match self {
            Sampler::Xray(s) => s.aws_sdk_call().await,
            Sampler::Otlp(s) => s.aws_sdk_call().await,
        }
    }

    /// Trace an outgoing HTTP GET and return the root trace ID.
    pub async fn outgoing_http_call(&self, client: &reqwest::Client) -> String {
        match self {
            Sampler::Xray(s) => s.outgoing_http_call(client).await,
            Sampler::Otlp(s) => s.outgoing_http_call(client).await,
        }
    }
}

/// Native backend: emits segment documents straight to the X-Ray daemon.
pub struct XraySampler {
    daemon: DaemonClient,
}

impl XraySampler {
    pub fn new(daemon: DaemonClient) -> Self {
        XraySampler { daemon }
    }

    pub fn from_env() -> Result<Self> {
        Ok(XraySampler::new(DaemonClient::from_env()?))
    }

    /// Lists SQS queues and S3 objects with no credentials configured. The
    /// requests are expected to fail with authorization errors; the segment
    /// records the attempt either way.
    pub async fn aws_sdk_call(&self) -> String {
        let mut root = Segment::begin(XRAY_ROOT_NAME);
        root.add_metadata("description", json!("makes AWS SDK calls"));

        let mut sub = Subsegment::begin("aws-sdk-calls");
        sub.add_metadata("description", json!("makes an SQS and S3 call"));
        sub.add_metadata("expected-results", json!({ "SQS": 403, "S3": 200 }));

        let aws_cfg = load_aws_config().await;

        let sqs = aws_sdk_sqs::Client::new(&aws_cfg);
        if let Err(err) = sqs.list_queues().send().await {
            warn!("[SQS] {err}");
        }

        let s3 = aws_sdk_s3::Client::new(&aws_cfg);
        match s3.list_objects_v2().bucket(DEMO_BUCKET).send().await {
            Ok(output) => info!(
                "[S3] Successfully listed {} objects in bucket {DEMO_BUCKET:?}",
                output.key_count().unwrap_or_default()
            ),
            Err(err) => warn!("[S3] {err}"),
        }

        sub.end();
        root.add_subsegment(sub);
        self.finish(root)
    }

    /// GETs the demo URL with a manually rooted `x-amzn-trace-id` header.
    pub async fn outgoing_http_call(&self, client: &reqwest::Client) -> String {
        let mut root = Segment::begin(XRAY_ROOT_NAME);
        root.add_annotation("question", json!("did this work?"));
        root.add_metadata("answer", json!({ "it": "did!" }));

        let header = format!("Root={};Parent={};Sampled=1", root.trace_id, root.id);
        match client
            .get(DEMO_URL)
            .header(XRAY_TRACE_HEADER, header)
            .send()
            .await
        {
            Ok(res) => info!("[HTTP] Status {}", res.status()),
            Err(err) => warn!("[HTTP] {err}"),
        }

        self.finish(root)
    }

    // Closes the root scope and emits the document; a daemon send failure is
    // logged and the ID still returned.
    fn finish(&self, mut root: Segment) -> String {
        root.end();
        if let Err(err) = self.daemon.send(&root) {
            warn!("[X-Ray] {err:#}");
        }
        root.trace_id
    }
}

/// OTLP backend: spans through the bootstrapped provider, exported in batches.
/// Holds the provider handle explicitly so the dispatcher can flush it.
pub struct OtlpSampler {
    provider: SdkTracerProvider,
    labels: Vec<KeyValue>,
}

impl OtlpSampler {
    pub fn new(provider: SdkTracerProvider, cfg: &Configuration) -> Self {
        OtlpSampler {
            provider,
            labels: common_labels(cfg),
        }
    }

    /// Mocks an S3 `ListBuckets` request. No credentials are configured, so
    /// the call fails with an authorization error; exporting the attempt is
    /// the point, so the failure is logged and the trace ID still returned.
    pub async fn aws_sdk_call(&self) -> String {
        let tracer = self.provider.tracer(TRACER_NAME);
        let root = tracer.start(OTLP_ROOT_NAME);
        let root_cx = Context::current_with_span(root);
        let trace_id = root_cx.span().span_context().trace_id();

        let mut inner = tracer
            .span_builder("aws-sdk-call")
            .with_attributes(self.labels.clone())
            .start_with_context(&tracer, &root_cx);

        let aws_cfg = load_aws_config().await;
        let s3 = aws_sdk_s3::Client::new(&aws_cfg);
        if let Err(err) = s3.list_buckets().send().await {
            warn!("[S3] {err}");
        }

        inner.end();
        root_cx.span().end();
        xray_trace_id(trace_id)
    }

    /// GETs the demo URL with trace context injected by the global propagator.
    pub async fn outgoing_http_call(&self, client: &reqwest::Client) -> String {
        let tracer = self.provider.tracer(TRACER_NAME);
        let root = tracer.start(OTLP_ROOT_NAME);
        let root_cx = Context::current_with_span(root);
        let trace_id = root_cx.span().span_context().trace_id();

        let inner = tracer
            .span_builder("outgoing-http-call")
            .with_attributes(self.labels.clone())
            .start_with_context(&tracer, &root_cx);
        let inner_cx = root_cx.with_span(inner);

        match client.get(DEMO_URL).build() {
            Ok(mut request) => {
                global::get_text_map_propagator(|propagator| {
                    propagator.inject_context(&inner_cx, &mut HeaderInjector(request.headers_mut()));
                });
                match client.execute(request).await {
                    Ok(res) => info!("[HTTP] Status {}", res.status()),
                    Err(err) => warn!("[HTTP] {err}"),
                }
            }
            Err(err) => warn!("[HTTP] {err}"),
        }

        inner_cx.span().end();
        root_cx.span().end();
        xray_trace_id(trace_id)
    }
}
