use async_trait::async_trait;
use futures::StreamExt;
use reqwest::{Client, ClientBuilder};
use std::time::Duration;
use tracing::debug;
use url::Url;

use crate::config::MirrorConfig;
use crate::error::FetchError;

/// Bounds applied to a single GET.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FetchLimits {
    /// Applies to receiving the response head and to each body chunk separately.
    pub timeout: Duration,
    pub max_bytes: u64,
}

/// Performs one HTTP GET and returns the full body.
///
/// Implementations never touch the disk. Statuses outside 200-299 are errors.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ContentFetcher: Send + Sync {
    async fn fetch(&self, url: &Url, limits: FetchLimits) -> Result<Vec<u8>, FetchError>;
}

/// [`ContentFetcher`] backed by a shared `reqwest` client.
#[derive(Clone)]
pub struct HttpFetcher {
    client: Client,
}

impl HttpFetcher {
    pub fn new(user_agent: &str, connect_timeout: Duration) -> Result<Self, FetchError> {
        let client = ClientBuilder::new()
            .use_rustls_tls()
            .user_agent(user_agent)
            .connect_timeout(connect_timeout)
            .build()?;

        Ok(Self { client })
    }

    pub fn from_config(config: &MirrorConfig) -> Result<Self, FetchError> {
        Self::new(&config.user_agent, config.document_timeout())
    }
}

#[async_trait]
impl ContentFetcher for HttpFetcher {
    async fn fetch(&self, url: &Url, limits: FetchLimits) -> Result<Vec<u8>, FetchError> {
        let response = tokio::time::timeout(limits.timeout, self.client.get(url.clone()).send())
            .await
            .map_err(|_| FetchError::Timeout)??;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::HttpStatus(status.as_u16()));
        }

        let declared = response.content_length();
        if declared.is_some_and(|len| len > limits.max_bytes) {
            return Err(FetchError::TooLarge {
                limit: limits.max_bytes,
            });
        }

        let mut body = Vec::with_capacity(declared.unwrap_or(0) as usize);
        let mut stream = response.bytes_stream();

        loop {
            let next = tokio::time::timeout(limits.timeout, stream.next())
                .await
                .map_err(|_| FetchError::Timeout)?;
            let Some(chunk) = next else { break };
            let chunk = chunk?;

            if (body.len() + chunk.len()) as u64 > limits.max_bytes {
                return Err(FetchError::TooLarge {
                    limit: limits.max_bytes,
                });
            }
            body.extend_from_slice(&chunk);
        }

        debug!("Fetched {} bytes from {}", body.len(), url);
        Ok(body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::{TcpListener, TcpStream};
    use wiremock::{
        matchers::{header, method, path},
        Mock, MockServer, ResponseTemplate,
    };

    const UA: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36";

    fn limits() -> FetchLimits {
        FetchLimits {
            timeout: Duration::from_secs(5),
            max_bytes: 1024,
        }
    }

    fn url_for(server: &MockServer, p: &str) -> Url {
        Url::parse(&format!("{}{}", server.uri(), p)).unwrap()
    }

    #[tokio::test]
    async fn test_fetch_returns_body_and_sends_user_agent() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/page"))
            .and(header("user-agent", UA))
            .respond_with(ResponseTemplate::new(200).set_body_string("<html></html>"))
            .expect(1)
            .mount(&server)
            .await;

        let fetcher = HttpFetcher::new(UA, Duration::from_secs(5)).unwrap();
        let body = fetcher.fetch(&url_for(&server, "/page"), limits()).await.unwrap();
        assert_eq!(body, b"<html></html>");
    }

    #[tokio::test]
    async fn test_non_success_status_is_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let fetcher = HttpFetcher::new(UA, Duration::from_secs(5)).unwrap();
        let err = fetcher
            .fetch(&url_for(&server, "/missing"), limits())
            .await
            .unwrap_err();
        assert_eq!(err, FetchError::HttpStatus(404));
    }

    #[tokio::test]
    async fn test_oversized_body_is_rejected() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(vec![0u8; 4096]))
            .mount(&server)
            .await;

        let fetcher = HttpFetcher::new(UA, Duration::from_secs(5)).unwrap();
        let err = fetcher
            .fetch(&url_for(&server, "/big.png"), limits())
            .await
            .unwrap_err();
        assert_eq!(err, FetchError::TooLarge { limit: 1024 });
    }

    #[tokio::test]
    async fn test_slow_response_times_out() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_millis(500)))
            .mount(&server)
            .await;

        let fetcher = HttpFetcher::new(UA, Duration::from_secs(5)).unwrap();
        let err = fetcher
            .fetch(
                &url_for(&server, "/slow"),
                FetchLimits {
                    timeout: Duration::from_millis(50),
                    max_bytes: 1024,
                },
            )
            .await
            .unwrap_err();
        assert_eq!(err, FetchError::Timeout);
    }

    #[tokio::test]
    async fn test_connection_refused_is_network_error() {
        let fetcher = HttpFetcher::new(UA, Duration::from_secs(1)).unwrap();
        let url = Url::parse("http://127.0.0.1:9/unreachable").unwrap();
        let err = fetcher.fetch(&url, limits()).await.unwrap_err();
        assert!(
            matches!(err, FetchError::Network(_) | FetchError::Timeout),
            "got {err:?}"
        );
    }

    async fn read_request_head(socket: &mut TcpStream) {
        let mut head = Vec::new();
        let mut buf = [0u8; 1024];
        while !head.windows(4).any(|w| w == b"\r\n\r\n") {
            match socket.read(&mut buf).await {
                Ok(0) | Err(_) => return,
                Ok(n) => head.extend_from_slice(&buf[..n]),
            }
        }
    }

    /// Accepts one connection, writes `parts` in order, then holds the socket open for `hold`.
    async fn raw_server(parts: Vec<Vec<u8>>, hold: Duration) -> Url {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let Ok((mut socket, _)) = listener.accept().await else {
                return;
            };
            read_request_head(&mut socket).await;
            for part in parts {
                if socket.write_all(&part).await.is_err() {
                    return;
                }
                let _ = socket.flush().await;
            }
            tokio::time::sleep(hold).await;
        });
        Url::parse(&format!("http://{addr}/asset")).unwrap()
    }

    #[tokio::test]
    async fn test_body_stalling_after_headers_times_out() {
        let url = raw_server(
            vec![b"HTTP/1.1 200 OK\r\nContent-Length: 100\r\n\r\npartial".to_vec()],
            Duration::from_secs(5),
        )
        .await;

        let fetcher = HttpFetcher::new(UA, Duration::from_secs(5)).unwrap();
        let started = std::time::Instant::now();
        let err = fetcher
            .fetch(
                &url,
                FetchLimits {
                    timeout: Duration::from_millis(200),
                    max_bytes: 1024,
                },
            )
            .await
            .unwrap_err();

        assert_eq!(err, FetchError::Timeout);
        assert!(started.elapsed() < Duration::from_secs(3));
    }

    #[tokio::test]
    async fn test_chunked_body_over_limit_is_rejected() {
        let mut parts = vec![b"HTTP/1.1 200 OK\r\nTransfer-Encoding: chunked\r\n\r\n".to_vec()];
        for _ in 0..4 {
            let mut chunk = b"200\r\n".to_vec();
            chunk.extend_from_slice(&[b'a'; 512]);
            chunk.extend_from_slice(b"\r\n");
            parts.push(chunk);
        }
        parts.push(b"0\r\n\r\n".to_vec());
        let url = raw_server(parts, Duration::from_millis(100)).await;

        let fetcher = HttpFetcher::new(UA, Duration::from_secs(5)).unwrap();
        let err = fetcher.fetch(&url, limits()).await.unwrap_err();
        assert_eq!(err, FetchError::TooLarge { limit: 1024 });
    }
}
