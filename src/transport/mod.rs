// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Network boundary.
//!
//! The router and the sync coordinator only see [`Transport`]. Production
//! uses [`HttpTransport`]; tests drive every branch with [`ScriptedTransport`].
//!
//! A transport returns `Ok` for any HTTP response, whatever its status.
//! `Err` is reserved for requests that never produced a response.

pub mod http;
pub mod scripted;

use async_trait::async_trait;

use crate::error::OfflineError;
use crate::http::{RequestDescriptor, Response};

pub use self::http::HttpTransport;
pub use self::scripted::{Reply, ScriptedTransport};

#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(&self, request: &RequestDescriptor) -> Result<Response, OfflineError>;
}
