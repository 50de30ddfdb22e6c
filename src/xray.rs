// SPDX-License-Identifier: MIT
//! AWS X-Ray trace-context conventions.
//!
//! Three pieces keep the OTLP path correlatable with X-Ray tooling:
//!
//! * [`XrayPropagator`] — carries trace context in the `x-amzn-trace-id`
//!   header (`Root=...;Parent=...;Sampled=...`).
//! * [`XrayIdGenerator`] — trace IDs whose upper 32 bits are the epoch-seconds
//!   timestamp X-Ray requires.
//! * [`xray_trace_id`] — formats a 128-bit trace ID into the textual
//!   `1-<8 hex>-<24 hex>` convention.

use std::sync::LazyLock;

use opentelemetry::propagation::{
    text_map_propagator::FieldIter, Extractor, Injector, TextMapPropagator,
};
use opentelemetry::trace::{
    SpanContext, SpanId, TraceContextExt, TraceFlags, TraceId, TraceState,
};
use opentelemetry::Context;
use opentelemetry_sdk::trace::IdGenerator;
use rand::Rng;
use std::time::{SystemTime, UNIX_EPOCH};

/// Header carrying X-Ray trace context across process boundaries.
pub const XRAY_TRACE_HEADER: &str = "x-amzn-trace-id";

const XRAY_VERSION_KEY: &str = "1";
const ROOT_KEY: &str = "Root";
const PARENT_KEY: &str = "Parent";
const SAMPLED_KEY: &str = "Sampled";

const SAMPLED: &str = "1";
const NOT_SAMPLED: &str = "0";
const REQUESTED_SAMPLE_DECISION: &str = "?";

/// Set when the header leaves the sampling decision to the downstream service.
pub const TRACE_FLAG_DEFERRED: TraceFlags = TraceFlags::new(0x02);

static XRAY_HEADER_FIELD: LazyLock<[String; 1]> =
    LazyLock::new(|| [XRAY_TRACE_HEADER.to_owned()]);

/// Format a 128-bit trace ID in X-Ray's textual convention:
/// version `1`, 8 hex digits of epoch seconds, 24 hex digits of entropy.
pub fn xray_trace_id(trace_id: TraceId) -> String {
    let hex = trace_id.to_string();
    let (timestamp, unique) = hex.split_at(8);
    format!("{XRAY_VERSION_KEY}-{timestamp}-{unique}")
}

/// Parse an X-Ray textual trace ID back into a 128-bit trace ID.
fn parse_xray_trace_id(value: &str) -> Option<TraceId> {
    let mut parts = value.split_terminator('-');
    let (version, timestamp, unique) = (parts.next()?, parts.next()?, parts.next()?);
    if version != XRAY_VERSION_KEY || parts.next().is_some() {
        return None;
    }
    let trace_id = TraceId::from_hex(&format!("{timestamp}{unique}")).ok()?;
    (trace_id != TraceId::INVALID).then_some(trace_id)
}

/// Check a string against the `1-<8 hex>-<24 hex>` pattern.
pub fn is_xray_trace_id(value: &str) -> bool {
    let mut parts = value.split('-');
    let ok = |s: &str, len: usize| {
        s.len() == len && s.bytes().all(|b| b.is_ascii_hexdigit() && !b.is_ascii_uppercase())
    };
    matches!(
        (parts.next(), parts.next(), parts.next(), parts.next()),
        (Some("1"), Some(ts), Some(unique), None) if ok(ts, 8) && ok(unique, 24)
    )
}

/// Generates trace IDs in X-Ray's layout: the upper 32 bits hold the current
/// epoch-seconds timestamp, the lower 96 bits are random. Span IDs are random
/// and nonzero.
#[derive(Clone, Debug, Default)]
pub struct XrayIdGenerator;

impl IdGenerator for XrayIdGenerator {
    fn new_trace_id(&self) -> TraceId {
        let seconds = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or_default() as u32;
        let unique: u128 = rand::thread_rng().gen::<u128>() >> 32;
        TraceId::from(((seconds as u128) << 96) | unique)
    }

    fn new_span_id(&self) -> SpanId {
        SpanId::from(rand::thread_rng().gen_range(1..=u64::MAX))
    }
}

/// Propagates `SpanContext`s through the `x-amzn-trace-id` header.
///
/// Injection writes `Root`, `Parent`, and `Sampled` entries plus any trace
/// state; extraction accepts the same, treating `Sampled=?` as a deferred
/// decision and folding unrecognized entries into the trace state.
#[derive(Clone, Debug, Default)]
pub struct XrayPropagator {
    _private: (),
}

impl XrayPropagator {
    pub fn new() -> Self {
        XrayPropagator::default()
    }

    fn extract_span_context(&self, extractor: &dyn Extractor) -> Option<SpanContext> {
        let header = extractor.get(XRAY_TRACE_HEADER).unwrap_or("").trim();

        let mut trace_id = TraceId::INVALID;
        let mut parent_id = SpanId::INVALID;
        let mut flags = TRACE_FLAG_DEFERRED;
        let mut extra: Vec<(String, String)> = Vec::new();

        for pair in header.split_terminator(';') {
            // Malformed pairs are skipped, not fatal to the extraction.
            let Some((key, value)) = pair.split_once('=') else {
                continue;
            };
            match key {
                ROOT_KEY => trace_id = parse_xray_trace_id(value)?,
                PARENT_KEY => parent_id = SpanId::from_hex(value).unwrap_or(SpanId::INVALID),
                SAMPLED_KEY => {
                    flags = match value {
                        NOT_SAMPLED => TraceFlags::default(),
                        SAMPLED => TraceFlags::SAMPLED,
                        _ => TRACE_FLAG_DEFERRED,
                    }
                }
                _ => extra.push((key.to_ascii_lowercase(), value.to_string())),
            }
        }

        if trace_id == TraceId::INVALID {
            return None;
        }
        let trace_state = TraceState::from_key_value(extra).ok()?;
        Some(SpanContext::new(trace_id, parent_id, flags, true, trace_state))
    }
}

impl TextMapPropagator for XrayPropagator {
    fn inject_context(&self, cx: &Context, injector: &mut dyn Injector) {
        let span = cx.span();
        let span_context = span.span_context();
        if !span_context.is_valid() {
            return;
        }

        let sampling_decision = if span_context.trace_flags() & TRACE_FLAG_DEFERRED
            == TRACE_FLAG_DEFERRED
        {
            REQUESTED_SAMPLE_DECISION
        } else if span_context.is_sampled() {
            SAMPLED
        } else {
            NOT_SAMPLED
        };

        let trace_state_header: String = span_context
            .trace_state()
            .header_delimited("=", ";")
            .split_terminator(';')
            .map(title_case)
            .collect::<Vec<String>>()
            .join(";");
        let trace_state_prefix = if trace_state_header.is_empty() { "" } else { ";" };

        injector.set(
            XRAY_TRACE_HEADER,
            format!(
                "{ROOT_KEY}={root};{PARENT_KEY}={parent:016x};{SAMPLED_KEY}={sampling_decision}{trace_state_prefix}{trace_state_header}",
                root = xray_trace_id(span_context.trace_id()),
                parent = u64::from_be_bytes(span_context.span_id().to_bytes()),
            ),
        );
    }

    fn extract_with_context(&self, cx: &Context, extractor: &dyn Extractor) -> Context {
        let extracted = self
            .extract_span_context(extractor)
            .unwrap_or_else(SpanContext::empty_context);
        cx.with_remote_span_context(extracted)
    }

    fn fields(&self) -> FieldIter<'_> {
        FieldIter::new(XRAY_HEADER_FIELD.as_ref())
    }
}

// Trace state keys are lowercased on the wire but title-cased in the X-Ray
// header convention.
fn title_case(s: &str) -> String {
    let mut chars = s.chars();
    match chars.next() {
        Some(first) => first.to_ascii_uppercase().to_string() + chars.as_str(),
        None => String::new(),
    }
}

/// Carrier injecting propagation headers into a reqwest header map.
pub struct HeaderInjector<'a>(pub &'a mut reqwest::header::HeaderMap);

impl Injector for HeaderInjector<'_> {
    fn set(&mut self, key: &str, value: String) {
        if let (Ok(name), Ok(value)) = (
            reqwest::header::HeaderName::from_bytes(key.as_bytes()),
            reqwest::header::HeaderValue::from_str(&value),
        ) {
            self.0.insert(name, value);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use opentelemetry::testing::trace::TestSpan;
    use std::collections::HashMap;
    use std::str::FromStr;

    fn header_map(value: &str) -> HashMap<String, String> {
        [(XRAY_TRACE_HEADER.to_string(), value.to_string())]
            .into_iter()
            .collect()
    }

    #[rustfmt::skip]
    fn extract_test_data() -> Vec<(&'static str, SpanContext)> {
        vec![
            ("", SpanContext::empty_context()),
            ("Sampled=1;Self=foo", SpanContext::empty_context()),
            ("Root=1-bogus-bad", SpanContext::empty_context()),
            ("Root=1-too-many-parts", SpanContext::empty_context()),
            ("Root=1-58406520-a006649127e371903a2de979;Parent=garbage", SpanContext::new(TraceId::from_hex("58406520a006649127e371903a2de979").unwrap(), SpanId::INVALID, TRACE_FLAG_DEFERRED, true, TraceState::default())),
            ("Root=1-58406520-a006649127e371903a2de979;Foo", SpanContext::new(TraceId::from_hex("58406520a006649127e371903a2de979").unwrap(), SpanId::INVALID, TRACE_FLAG_DEFERRED, true, TraceState::default())),
            ("Root=1-58406520-a006649127e371903a2de979;Sampled=1", SpanContext::new(TraceId::from_hex("58406520a006649127e371903a2de979").unwrap(), SpanId::INVALID, TraceFlags::SAMPLED, true, TraceState::default())),
            ("Root=1-58406520-a006649127e371903a2de979;Parent=4c721bf33e3caf8f;Sampled=0", SpanContext::new(TraceId::from_hex("58406520a006649127e371903a2de979").unwrap(), SpanId::from_hex("4c721bf33e3caf8f").unwrap(), TraceFlags::default(), true, TraceState::default())),
            ("Root=1-58406520-a006649127e371903a2de979;Parent=4c721bf33e3caf8f;Sampled=?", SpanContext::new(TraceId::from_hex("58406520a006649127e371903a2de979").unwrap(), SpanId::from_hex("4c721bf33e3caf8f").unwrap(), TRACE_FLAG_DEFERRED, true, TraceState::default())),
            ("Root=1-58406520-a006649127e371903a2de979;Self=1-58406520-bf42676c05e20ba4a90e448e;Parent=4c721bf33e3caf8f;Sampled=1", SpanContext::new(TraceId::from_hex("58406520a006649127e371903a2de979").unwrap(), SpanId::from_hex("4c721bf33e3caf8f").unwrap(), TraceFlags::SAMPLED, true, TraceState::from_str("self=1-58406520-bf42676c05e20ba4a90e448e").unwrap())),
        ]
    }

    #[rustfmt::skip]
    fn inject_test_data() -> Vec<(&'static str, SpanContext)> {
        vec![
            ("", SpanContext::empty_context()),
            ("", SpanContext::new(TraceId::INVALID, SpanId::INVALID, TRACE_FLAG_DEFERRED, true, TraceState::default())),
            ("Root=1-58406520-a006649127e371903a2de979;Parent=4c721bf33e3caf8f;Sampled=0", SpanContext::new(TraceId::from_hex("58406520a006649127e371903a2de979").unwrap(), SpanId::from_hex("4c721bf33e3caf8f").unwrap(), TraceFlags::default(), true, TraceState::default())),
            ("Root=1-58406520-a006649127e371903a2de979;Parent=4c721bf33e3caf8f;Sampled=1", SpanContext::new(TraceId::from_hex("58406520a006649127e371903a2de979").unwrap(), SpanId::from_hex("4c721bf33e3caf8f").unwrap(), TraceFlags::SAMPLED, true, TraceState::default())),
            ("Root=1-58406520-a006649127e371903a2de979;Parent=4c721bf33e3caf8f;Sampled=?;Self=1-58406520-bf42676c05e20ba4a90e448e", SpanContext::new(TraceId::from_hex("58406520a006649127e371903a2de979").unwrap(), SpanId::from_hex("4c721bf33e3caf8f").unwrap(), TRACE_FLAG_DEFERRED, true, TraceState::from_str("self=1-58406520-bf42676c05e20ba4a90e448e").unwrap())),
        ]
    }

    #[test]
    fn extract() {
        let propagator = XrayPropagator::default();
        for (header, expected) in extract_test_data() {
            let context = propagator.extract(&header_map(header));
            assert_eq!(context.span().span_context(), &expected, "header: {header}");
        }
    }

    #[test]
    fn malformed_pair_does_not_discard_root() {
        let context = XrayPropagator::default()
            .extract(&header_map("Root=1-58406520-a006649127e371903a2de979;Foo"));
        let span_context = context.span().span_context().clone();
        assert!(span_context.is_valid());
        assert_eq!(
            xray_trace_id(span_context.trace_id()),
            "1-58406520-a006649127e371903a2de979"
        );
    }

    #[test]
    fn extract_empty_carrier() {
        let map: HashMap<String, String> = HashMap::new();
        let context = XrayPropagator::default().extract(&map);
        assert_eq!(context.span().span_context(), &SpanContext::empty_context());
    }

    #[test]
    fn inject() {
        let propagator = XrayPropagator::default();
        for (expected, span_context) in inject_test_data() {
            let mut injector: HashMap<String, String> = HashMap::new();
            propagator.inject_context(
                &Context::current_with_span(TestSpan(span_context)),
                &mut injector,
            );

            match injector.get(XRAY_TRACE_HEADER) {
                Some(value) => assert_eq!(value, expected),
                None => assert!(expected.is_empty()),
            }
        }
    }

    #[test]
    fn generated_trace_ids_follow_xray_layout() {
        let generator = XrayIdGenerator;
        let before = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap()
            .as_secs() as u32;

        let trace_id = generator.new_trace_id();
        assert_ne!(trace_id, TraceId::INVALID);

        let seconds = (u128::from_be_bytes(trace_id.to_bytes()) >> 96) as u32;
        assert!(seconds >= before && seconds <= before + 2);

        assert!(is_xray_trace_id(&xray_trace_id(trace_id)));
        assert_ne!(generator.new_span_id(), SpanId::INVALID);
    }

    #[test]
    fn trace_id_formatting_round_trips() {
        let trace_id = TraceId::from_hex("58406520a006649127e371903a2de979").unwrap();
        let formatted = xray_trace_id(trace_id);
        assert_eq!(formatted, "1-58406520-a006649127e371903a2de979");
        assert_eq!(parse_xray_trace_id(&formatted), Some(trace_id));
    }

    #[test]
    fn trace_id_pattern_check() {
        assert!(is_xray_trace_id("1-58406520-a006649127e371903a2de979"));
        assert!(!is_xray_trace_id("2-58406520-a006649127e371903a2de979"));
        assert!(!is_xray_trace_id("1-5840652-a006649127e371903a2de979"));
        assert!(!is_xray_trace_id("1-58406520-A006649127E371903A2DE979"));
        assert!(!is_xray_trace_id("58406520a006649127e371903a2de979"));
    }
}
