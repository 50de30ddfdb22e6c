// SPDX-License-Identifier: MIT
//! X-Ray native daemon protocol: segment documents sent as UDP datagrams.
//!
//! Each datagram is the daemon header line followed by one JSON segment
//! document. Subsegments are embedded in their parent and the whole tree is
//! emitted once, when the root segment closes.

use std::net::UdpSocket;
use std::time::{SystemTime, UNIX_EPOCH};

use anyhow::{Context as _, Result};
use rand::Rng;
use serde::Serialize;
use serde_json::{Map, Value};

/// Environment variable overriding the daemon address (`host:port`).
pub const DAEMON_ADDRESS_ENV: &str = "AWS_XRAY_DAEMON_ADDRESS";

const DEFAULT_DAEMON_ADDRESS: &str = "127.0.0.1:2000";
const DAEMON_HEADER: &str = "{\"format\": \"json\", \"version\": 1}\n";

fn epoch_seconds() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or_default()
}

fn new_segment_id() -> String {
    format!("{:016x}", rand::thread_rng().gen::<u64>())
}

/// Fresh root trace ID in X-Ray textual form: epoch seconds in 8 hex digits
/// plus 96 random bits in 24 hex digits.
pub fn new_trace_id() -> String {
    let seconds = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or_default() as u32;
    let unique: u128 = rand::thread_rng().gen::<u128>() >> 32;
    format!("1-{seconds:08x}-{unique:024x}")
}

/// A root segment document. Closed segments carry `end_time`; open ones carry
/// `in_progress` instead.
#[derive(Debug, Serialize)]
pub struct Segment {
    pub name: String,
    pub id: String,
    pub trace_id: String,
    pub start_time: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end_time: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub in_progress: Option<bool>,
    #[serde(skip_serializing_if = "Map::is_empty")]
    pub annotations: Map<String, Value>,
    #[serde(skip_serializing_if = "Map::is_empty")]
    pub metadata: Map<String, Value>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub subsegments: Vec<Subsegment>,
}

impl Segment {
    /// Open a root segment with a fresh trace ID.
    pub fn begin(name: &str) -> Self {
        Segment {
            name: name.to_string(),
            id: new_segment_id(),
            trace_id: new_trace_id(),
            start_time: epoch_seconds(),
            end_time: None,
            in_progress: Some(true),
            annotations: Map::new(),
            metadata: Map::new(),
            subsegments: Vec::new(),
        }
    }

    pub fn add_annotation(&mut self, key: &str, value: Value) {
        self.annotations.insert(key.to_string(), value);
    }

    pub fn add_metadata(&mut self, key: &str, value: Value) {
        self.metadata.insert(key.to_string(), value);
    }

    /// Attach a closed subsegment. Nested scopes close before the root does.
    pub fn add_subsegment(&mut self, subsegment: Subsegment) {
        self.subsegments.push(subsegment);
    }

    /// Close the segment, stamping its end time.
    pub fn end(&mut self) {
        self.end_time = Some(epoch_seconds());
        self.in_progress = None;
    }
}

/// A nested scope embedded in its parent segment's document.
#[derive(Debug, Serialize)]
pub struct Subsegment {
    pub name: String,
    pub id: String,
    pub start_time: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end_time: Option<f64>,
    #[serde(skip_serializing_if = "Map::is_empty")]
    pub metadata: Map<String, Value>,
}

impl Subsegment {
    pub fn begin(name: &str) -> Self {
        Subsegment {
            name: name.to_string(),
            id: new_segment_id(),
            start_time: epoch_seconds(),
            end_time: None,
            metadata: Map::new(),
        }
    }

    pub fn add_metadata(&mut self, key: &str, value: Value) {
        self.metadata.insert(key.to_string(), value);
    }

    pub fn end(&mut self) {
        self.end_time = Some(epoch_seconds());
    }
}

/// UDP client for the local X-Ray daemon.
#[derive(Debug)]
pub struct DaemonClient {
    socket: UdpSocket,
    address: String,
}

impl DaemonClient {
    /// Bind an ephemeral local socket targeting the given daemon address.
    pub fn new(address: String) -> Result<Self> {
        let socket = UdpSocket::bind("0.0.0.0:0").context("binding X-Ray daemon socket")?;
        Ok(DaemonClient { socket, address })
    }

    /// Daemon address from `AWS_XRAY_DAEMON_ADDRESS`, default `127.0.0.1:2000`.
    pub fn from_env() -> Result<Self> {
        let address = std::env::var(DAEMON_ADDRESS_ENV)
            .unwrap_or_else(|_| DEFAULT_DAEMON_ADDRESS.to_string());
        DaemonClient::new(address)
    }

    /// Serialize and emit one segment document.
    pub fn send(&self, segment: &Segment) -> Result<()> {
        let body = serde_json::to_string(segment).context("serializing segment")?;
        let datagram = format!("{DAEMON_HEADER}{body}");
        self.socket
            .send_to(datagram.as_bytes(), &self.address)
            .with_context(|| format!("sending segment to X-Ray daemon at {}", self.address))?;
        Ok(())
    }
}
