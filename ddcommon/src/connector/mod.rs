// Copyright 2021-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

pub mod uds;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("invalid url")]
    InvalidUrl,
}
