// Copyright 2024-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use ddcommon::config::parse_env;
use std::net::{IpAddr, Ipv4Addr};
use std::time::Duration;

/// Runtime configuration for the receiver, rate limiter and watchdog.
#[derive(Clone, Debug)]
pub struct Config {
    pub host: IpAddr,
    pub port: u16,
    pub otlp_port: Option<u16>,
    pub uds_socket_path: Option<String>,
    pub max_request_bytes: u64,
    pub target_rate: f64,
    pub max_memory_bytes: f64,
    pub watchdog_interval: Duration,
    pub connection_limit: usize,
    /// Status code returned to clients whose payload was dropped by the rate limiter.
    pub dropped_status_code: u16,
    pub dogstatsd_addr: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            host: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            port: 8126,
            otlp_port: Some(5003),
            uds_socket_path: None,
            max_request_bytes: 25 * 1024 * 1024,
            target_rate: 1.0,
            max_memory_bytes: 500.0 * 1024.0 * 1024.0,
            watchdog_interval: Duration::from_secs(10),
            connection_limit: 2000,
            dropped_status_code: 200,
            dogstatsd_addr: None,
        }
    }
}

impl Config {
    /// Overlays environment variables on top of the defaults.
    pub fn from_env() -> Self {
        let mut cfg = Config::default();
        if let Some(port) = parse_env::int::<u16>("DD_APM_RECEIVER_PORT") {
            cfg.port = port;
        }
        if let Some(port) = parse_env::int::<u16>("DD_OTLP_CONFIG_RECEIVER_PROTOCOLS_GRPC_PORT") {
            cfg.otlp_port = Some(port);
        }
        if let Some(path) = parse_env::str_not_empty("DD_APM_RECEIVER_SOCKET") {
            cfg.uds_socket_path = Some(path);
        }
        if let Some(bytes) = parse_env::int::<u64>("DD_APM_MAX_REQUEST_BYTES") {
            cfg.max_request_bytes = bytes;
        }
        if let Some(rate) = parse_env::int::<f64>("DD_APM_TARGET_TRACES_PER_SECOND") {
            cfg.target_rate = rate;
        }
        if let Some(mb) = parse_env::int::<f64>("DD_APM_MAX_MEMORY") {
            cfg.max_memory_bytes = mb * 1024.0 * 1024.0;
        }
        if let Some(secs) = parse_env::int::<u64>("DD_APM_WATCHDOG_INTERVAL_SECONDS") {
            cfg.watchdog_interval = Duration::from_secs(secs);
        }
        if let Some(limit) = parse_env::int::<usize>("DD_APM_CONNECTION_LIMIT") {
            cfg.connection_limit = limit;
        }
        if parse_env::bool("DD_APM_ERROR_TRACKING_STANDALONE_ENABLED").unwrap_or(false) {
            cfg.dropped_status_code = 429;
        }
        if let Some(addr) = parse_env::str_not_empty("DD_DOGSTATSD_URL") {
            cfg.dogstatsd_addr = Some(addr);
        }
        cfg
    }
}
