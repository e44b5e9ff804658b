// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Deterministic transport for tests and demos.
//!
//! Replies are scripted per request identity (method + normalized URL).
//! One-shot replies are consumed in order; once they run out the sticky
//! reply (if any) repeats; otherwise the request fails as unreachable.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;

use super::Transport;
use crate::error::OfflineError;
use crate::http::{cache_key, HttpMethod, RequestDescriptor, Response};

#[derive(Debug, Clone)]
pub enum Reply {
    Respond(Response),
    /// Connection-level failure
    Fail(String),
    /// Never completes; the caller's timeout decides
    Hang,
}

impl Reply {
    pub fn status(status: u16) -> Self {
        Self::Respond(Response::new(status, Vec::new()))
    }

    pub fn json(status: u16, value: &Value) -> Self {
        Self::Respond(Response::json(status, value))
    }

    pub fn body(status: u16, content_type: &str, body: impl Into<Vec<u8>>) -> Self {
        Self::Respond(Response::new(status, body.into()).with_header("content-type", content_type))
    }
}

#[derive(Default)]
struct Script {
    once: VecDeque<Reply>,
    sticky: Option<Reply>,
}

#[derive(Default)]
pub struct ScriptedTransport {
    scripts: Mutex<HashMap<String, Script>>,
    offline: AtomicBool,
    sent: Mutex<Vec<RequestDescriptor>>,
}

impl ScriptedTransport {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a reply used once, after earlier one-shot replies for the same request.
    pub fn once(&self, method: HttpMethod, url: &str, reply: Reply) -> &Self {
        self.scripts
            .lock()
            .entry(cache_key(method, url))
            .or_default()
            .once
            .push_back(reply);
        self
    }

    /// Reply used whenever no one-shot reply is queued.
    pub fn always(&self, method: HttpMethod, url: &str, reply: Reply) -> &Self {
        self.scripts.lock().entry(cache_key(method, url)).or_default().sticky = Some(reply);
        self
    }

    /// While offline every request fails before reaching the scripts.
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::Release);
    }

    /// Every request seen, in order (including ones that failed).
    #[must_use]
    pub fn sent(&self) -> Vec<RequestDescriptor> {
        self.sent.lock().clone()
    }

    #[must_use]
    pub fn count(&self, method: HttpMethod, url: &str) -> usize {
        let key = cache_key(method, url);
        self.sent.lock().iter().filter(|r| r.cache_key() == key).count()
    }

    fn next_reply(&self, key: &str) -> Option<Reply> {
        let mut scripts = self.scripts.lock();
        let script = scripts.get_mut(key)?;
        script.once.pop_front().or_else(|| script.sticky.clone())
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn send(&self, request: &RequestDescriptor) -> Result<Response, OfflineError> {
        self.sent.lock().push(request.clone());

        if self.offline.load(Ordering::Acquire) {
            return Err(OfflineError::NetworkUnavailable("offline".into()));
        }

        let key = request.cache_key();
        match self.next_reply(&key) {
            Some(Reply::Respond(response)) => Ok(response),
            Some(Reply::Fail(reason)) => Err(OfflineError::NetworkUnavailable(reason)),
            Some(Reply::Hang) => {
                std::future::pending::<()>().await;
                Err(OfflineError::NetworkUnavailable("hung request resumed".into()))
            }
            None => Err(OfflineError::NetworkUnavailable(format!("no route for {}", key))),
        }
    }
}
