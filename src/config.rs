// SPDX-License-Identifier: MIT
//! Process configuration resolved once from environment variables.
//!
//! Absent variables are not errors; documented defaults apply. This is a demo
//! application, so a silently defaulted value is always acceptable.

/// Environment variable holding the `host:port` pair this instance reports in
/// its resource attributes and span labels. Default: `0.0.0.0:8080`.
pub const LISTEN_ADDRESS_ENV: &str = "LISTEN_ADDRESS";

/// Optional environment variable disambiguating concurrent demo runs; its
/// value is appended (underscore-prefixed) to the reported service name.
pub const INSTANCE_ID_ENV: &str = "INSTANCE_ID";

const DEFAULT_HOST: &str = "0.0.0.0";
const DEFAULT_PORT: &str = "8080";

/// Read-only configuration populated once at process start.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Configuration {
    pub host: String,
    pub port: String,
    /// `"_<INSTANCE_ID>"` when the variable is set, empty otherwise.
    pub instance_suffix: String,
}

impl Configuration {
    /// Resolve configuration from the process environment.
    pub fn from_env() -> Self {
        let (host, port) = match std::env::var(LISTEN_ADDRESS_ENV) {
            Ok(addr) => match addr.split_once(':') {
                Some((host, port)) if !host.is_empty() && !port.is_empty() => {
                    (host.to_string(), port.to_string())
                }
                _ => (DEFAULT_HOST.to_string(), DEFAULT_PORT.to_string()),
            },
            Err(_) => (DEFAULT_HOST.to_string(), DEFAULT_PORT.to_string()),
        };

        let instance_suffix = std::env::var(INSTANCE_ID_ENV)
            .map(|id| format!("_{id}"))
            .unwrap_or_default();

        Configuration {
            host,
            port,
            instance_suffix,
        }
    }
}

impl Default for Configuration {
    fn default() -> Self {
        Configuration {
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT.to_string(),
            instance_suffix: String::new(),
        }
    }
}
