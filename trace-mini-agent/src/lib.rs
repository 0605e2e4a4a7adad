// Copyright 2024-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

pub mod config;
pub mod info;
pub mod listener;
pub mod otlp_server;
pub mod peer_cred;
pub mod rate_limiter;
pub mod receiver;
pub mod responses;
pub mod watchdog;
