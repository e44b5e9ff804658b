// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Method};
use url::Url;

use super::Transport;
use crate::error::OfflineError;
use crate::http::{HttpMethod, RequestDescriptor, Response};

/// reqwest-backed transport.
///
/// Clone is cheap: `reqwest::Client` shares its connection pool.
#[derive(Clone)]
pub struct HttpTransport {
    client: Client,
    base_url: Option<Url>,
    timeout: Duration,
}

impl HttpTransport {
    /// `base_url` resolves relative request URLs (`/api/alarms`).
    pub fn new(base_url: Option<&str>, timeout: Duration) -> Result<Self, OfflineError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| OfflineError::Config(format!("http client: {}", e)))?;
        let base_url = base_url
            .map(Url::parse)
            .transpose()
            .map_err(|e| OfflineError::Config(format!("base url: {}", e)))?;
        Ok(Self {
            client,
            base_url,
            timeout,
        })
    }

    fn resolve(&self, raw: &str) -> Result<Url, OfflineError> {
        match Url::parse(raw) {
            Ok(url) => Ok(url),
            Err(url::ParseError::RelativeUrlWithoutBase) => self
                .base_url
                .as_ref()
                .ok_or_else(|| OfflineError::Config(format!("relative url {} without base url", raw)))?
                .join(raw)
                .map_err(|e| OfflineError::Config(format!("url {}: {}", raw, e))),
            Err(e) => Err(OfflineError::Config(format!("url {}: {}", raw, e))),
        }
    }
}

fn to_reqwest_method(method: HttpMethod) -> Method {
    match method {
        HttpMethod::Get => Method::GET,
        HttpMethod::Head => Method::HEAD,
        HttpMethod::Post => Method::POST,
        HttpMethod::Put => Method::PUT,
        HttpMethod::Patch => Method::PATCH,
        HttpMethod::Delete => Method::DELETE,
        HttpMethod::Options => Method::OPTIONS,
    }
}

fn map_send_error(err: reqwest::Error, timeout_hint: Duration) -> OfflineError {
    if err.is_timeout() {
        OfflineError::Timeout(timeout_hint)
    } else {
        OfflineError::NetworkUnavailable(err.to_string())
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn send(&self, request: &RequestDescriptor) -> Result<Response, OfflineError> {
        let url = self.resolve(&request.url)?;
        let mut builder = self.client.request(to_reqwest_method(request.method), url);
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        if let Some(ref body) = request.body {
            builder = builder.body(body.clone());
        }

        let response = builder
            .send()
            .await
            .map_err(|e| map_send_error(e, self.timeout))?;

        let status = response.status().as_u16();
        let headers = response
            .headers()
            .iter()
            .filter_map(|(name, value)| {
                value
                    .to_str()
                    .ok()
                    .map(|v| (name.as_str().to_string(), v.to_string()))
            })
            .collect();
        let body = response
            .bytes()
            .await
            .map_err(|e| map_send_error(e, self.timeout))?
            .to_vec();

        let mut out = Response::new(status, body);
        out.headers = headers;
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_relative_urls_need_base() {
        let bare = HttpTransport::new(None, Duration::from_secs(1)).unwrap();
        assert!(matches!(bare.resolve("/api/alarms"), Err(OfflineError::Config(_))));

        let based = HttpTransport::new(Some("https://api.example.test/"), Duration::from_secs(1)).unwrap();
        assert_eq!(
            based.resolve("/api/alarms").unwrap().as_str(),
            "https://api.example.test/api/alarms"
        );
        assert_eq!(
            based.resolve("https://cdn.example.test/a.js").unwrap().host_str(),
            Some("cdn.example.test")
        );
    }

    #[test]
    fn test_bad_base_url_is_config_error() {
        assert!(matches!(
            HttpTransport::new(Some("not a url"), Duration::from_secs(1)),
            Err(OfflineError::Config(_))
        ));
    }

    #[test]
    fn test_method_mapping() {
        assert_eq!(to_reqwest_method(HttpMethod::Patch), Method::PATCH);
        assert_eq!(to_reqwest_method(HttpMethod::Get), Method::GET);
    }
}
