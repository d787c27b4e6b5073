use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::debug;

/// Network-layer failure of a single probe
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProbeError {
    #[error("request to {url} timed out")]
    Timeout { url: String },
    #[error("could not connect to {url}: {reason}")]
    Connect { url: String, reason: String },
    #[error("request to {url} failed: {reason}")]
    Request { url: String, reason: String },
}

/// HTTP method used for probes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProbeMethod {
    #[default]
    Get,
    Head,
}

impl std::fmt::Display for ProbeMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ProbeMethod::Get => write!(f, "GET"),
            ProbeMethod::Head => write!(f, "HEAD"),
        }
    }
}

/// Performs one reachability check
#[async_trait::async_trait]
pub trait Prober: Send + Sync {
    /// Issue a single request to `url` and return the HTTP status code.
    ///
    /// Every HTTP response counts as an observation, error statuses included.
    async fn probe(&self, url: &str) -> Result<u16, ProbeError>;
}

/// reqwest-backed prober
pub struct HttpProber {
    client: reqwest::Client,
    method: ProbeMethod,
}

impl HttpProber {
    /// Build a prober. Without `timeout` the client default applies.
    pub fn new(
        method: ProbeMethod,
        timeout: Option<Duration>,
        user_agent: &str,
    ) -> anyhow::Result<Self> {
        let mut builder = reqwest::Client::builder().user_agent(user_agent);
        if let Some(timeout) = timeout {
            builder = builder.timeout(timeout);
        }

        Ok(Self::with_client(builder.build()?, method))
    }

    pub fn with_client(client: reqwest::Client, method: ProbeMethod) -> Self {
        Self { client, method }
    }

    fn classify(url: &str, error: reqwest::Error) -> ProbeError {
        let url = url.to_string();
        if error.is_timeout() {
            ProbeError::Timeout { url }
        } else if error.is_connect() {
            ProbeError::Connect { url, reason: error.to_string() }
        } else {
            ProbeError::Request { url, reason: error.to_string() }
        }
    }
}

#[async_trait::async_trait]
impl Prober for HttpProber {
    async fn probe(&self, url: &str) -> Result<u16, ProbeError> {
        let start = Instant::now();

        let request = match self.method {
            ProbeMethod::Get => self.client.get(url),
            ProbeMethod::Head => self.client.head(url),
        };

        let response = request.send().await.map_err(|e| Self::classify(url, e))?;
        let status_code = response.status().as_u16();

        debug!(
            url = %url,
            method = %self.method,
            status = status_code,
            latency_ms = start.elapsed().as_millis() as u64,
            "probe completed"
        );

        Ok(status_code)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn local_prober() -> HttpProber {
        let client = reqwest::Client::builder()
            .no_proxy()
            .timeout(Duration::from_secs(5))
            .build()
            .unwrap();
        HttpProber::with_client(client, ProbeMethod::Get)
    }

    #[tokio::test]
    async fn refused_connection_is_a_probe_failure() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let result = local_prober().probe(&format!("http://{addr}/health")).await;

        assert!(result.is_err(), "expected a probe failure, got {result:?}");
    }

    #[tokio::test]
    async fn reads_status_from_local_server() {
        use tokio::io::{AsyncReadExt, AsyncWriteExt};

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = [0u8; 1024];
            let _ = socket.read(&mut buf).await;
            socket
                .write_all(b"HTTP/1.1 503 Service Unavailable\r\ncontent-length: 0\r\nconnection: close\r\n\r\n")
                .await
                .unwrap();
        });

        let status = local_prober().probe(&format!("http://{addr}/health")).await;

        assert_eq!(status, Ok(503));
    }

    #[test]
    fn method_deserializes_from_lowercase() {
        #[derive(Deserialize)]
        struct Wrapper {
            method: ProbeMethod,
        }

        let parsed: Wrapper = toml::from_str("method = \"head\"").unwrap();
        assert_eq!(parsed.method, ProbeMethod::Head);
    }
}
