//! reqwest-backed [`Transport`].

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use url::Url;

use super::{ApiRequest, RawResponse, Transport, TransportFailure};
use crate::error::{Error, Result, TransportErrorKind};

/// HTTP transport over a shared `reqwest::Client` connection pool.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
    base_url: Url,
    timeout: Duration,
}

impl HttpTransport {
    /// Creates a transport for `base_url` with a default per-request timeout.
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self> {
        let base_url = Url::parse(base_url)
            .map_err(|e| Error::Config(format!("invalid base URL `{base_url}`: {e}")))?;
        if !matches!(base_url.scheme(), "http" | "https") {
            return Err(Error::Config(format!(
                "base URL must use http or https, got `{}`",
                base_url.scheme()
            )));
        }
        let client = reqwest::Client::builder()
            .user_agent(concat!("kling-rs/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| Error::Config(format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            client,
            base_url,
            timeout,
        })
    }

    /// Base URL requests are resolved against.
    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    fn url_for(&self, request: &ApiRequest) -> std::result::Result<Url, TransportFailure> {
        let joined = format!(
            "{}/{}",
            self.base_url.as_str().trim_end_matches('/'),
            request.path.trim_start_matches('/')
        );
        let mut url = Url::parse(&joined).map_err(|e| {
            TransportFailure::new(
                TransportErrorKind::Builder,
                format!("invalid request URL `{joined}`: {e}"),
            )
        })?;
        if !request.query.is_empty() {
            url.query_pairs_mut()
                .extend_pairs(request.query.iter().map(|(k, v)| (k.as_str(), v.as_str())));
        }
        Ok(url)
    }
}

fn classify(err: &reqwest::Error) -> TransportErrorKind {
    if err.is_timeout() {
        TransportErrorKind::Timeout
    } else if err.is_connect() {
        TransportErrorKind::Connect
    } else if err.is_builder() {
        TransportErrorKind::Builder
    } else {
        TransportErrorKind::Request
    }
}

fn failure(err: reqwest::Error) -> TransportFailure {
    TransportFailure::new(classify(&err), err.to_string())
}

#[async_trait]
impl Transport for HttpTransport {
    async fn send(&self, request: &ApiRequest) -> std::result::Result<RawResponse, TransportFailure> {
        let url = self.url_for(request)?;
        let mut builder = self
            .client
            .request(request.method.clone(), url)
            .timeout(request.timeout.unwrap_or(self.timeout));
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        if let Some(body) = &request.body {
            builder = builder.json(body);
        }

        let response = builder.send().await.map_err(failure)?;
        let status = response.status().as_u16();
        let headers: HashMap<String, String> = response
            .headers()
            .iter()
            .filter_map(|(name, value)| {
                value
                    .to_str()
                    .ok()
                    .map(|v| (name.as_str().to_string(), v.to_string()))
            })
            .collect();
        let body = response.bytes().await.map_err(failure)?.to_vec();

        Ok(RawResponse {
            status,
            headers,
            body,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn joins_paths_and_query() {
        let transport =
            HttpTransport::new("https://api.example.com/proxy/", Duration::from_secs(5)).unwrap();
        let request = ApiRequest::get("/v1/images/generations")
            .with_query("pageNum", 2)
            .with_query("pageSize", 30);
        let url = transport.url_for(&request).unwrap();
        assert_eq!(
            url.as_str(),
            "https://api.example.com/proxy/v1/images/generations?pageNum=2&pageSize=30"
        );
    }

    #[test]
    fn rejects_non_http_base() {
        assert!(matches!(
            HttpTransport::new("ftp://api.example.com", Duration::from_secs(5)),
            Err(Error::Config(_))
        ));
        assert!(HttpTransport::new("not a url", Duration::from_secs(5)).is_err());
    }
}
