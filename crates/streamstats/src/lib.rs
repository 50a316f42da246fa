// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

#![cfg_attr(not(test), deny(clippy::panic))]
#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![cfg_attr(not(test), deny(clippy::expect_used))]
#![cfg_attr(not(test), deny(clippy::todo))]
#![cfg_attr(not(test), deny(clippy::unimplemented))]

pub mod aggregation;
pub mod analyzer;
pub mod collector;
pub mod constants;
pub mod errors;
pub mod frame;
pub mod post;
pub mod pruner;
pub mod store;
pub mod stream_client;
pub mod worker;
