use std::time::{Duration, Instant};

use klaxon_core::MessagePayload;
use klaxon_vendor::{Vendor, VendorError};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::config::SlackConfig;

/// Slack vendor serving the `im` mode via `chat.postMessage`.
///
/// The message destination is the Slack channel or user id the contact
/// resolver read from `target_contact`; subject and body are joined into
/// one chat line.
pub struct SlackVendor {
    config: SlackConfig,
    client: Client,
}

#[derive(Debug, Serialize)]
struct PostMessageRequest {
    channel: String,
    text: String,
}

#[derive(Debug, Deserialize)]
struct ApiResponse {
    ok: bool,
    error: Option<String>,
}

impl SlackVendor {
    /// Create a new Slack vendor with a default HTTP client.
    #[must_use]
    pub fn new(config: SlackConfig) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .expect("failed to build HTTP client");
        Self { config, client }
    }

    /// Create a new Slack vendor with a custom HTTP client.
    #[must_use]
    pub fn with_client(config: SlackConfig, client: Client) -> Self {
        Self { config, client }
    }
}

impl Vendor for SlackVendor {
    fn name(&self) -> &str {
        "slack"
    }

    fn modes(&self) -> &[&str] {
        &["im"]
    }

    async fn send(&self, message: &MessagePayload) -> Result<Duration, VendorError> {
        let channel = message
            .destination
            .as_deref()
            .ok_or_else(|| VendorError::InvalidPayload("message has no destination".to_owned()))?
            .to_owned();

        let text = match message.subject.as_deref() {
            Some(subject) if !subject.is_empty() => format!("*{subject}*\n{}", message.body),
            _ => message.body.clone(),
        };

        let url = format!("{}/chat.postMessage", self.config.api_base_url);
        debug!(channel = %channel, "posting message to Slack");

        let start = Instant::now();
        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.config.token)
            .json(&PostMessageRequest { channel, text })
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    VendorError::Timeout(Duration::from_secs(30))
                } else {
                    VendorError::Connection(e.to_string())
                }
            })?;

        let status = response.status();
        if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            warn!("Slack API rate limit hit");
            return Err(VendorError::RateLimited);
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(VendorError::SendFailed(format!("HTTP {status}: {body}")));
        }

        let api_response: ApiResponse = response
            .json()
            .await
            .map_err(|e| VendorError::SendFailed(format!("unparseable Slack response: {e}")))?;
        if !api_response.ok {
            return Err(VendorError::SendFailed(
                api_response.error.unwrap_or_else(|| "unknown_error".to_owned()),
            ));
        }
        let latency = start.elapsed();

        info!(message_id = ?message.message_id, ?latency, "Slack send complete");
        Ok(latency)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct MockSlackServer {
        listener: tokio::net::TcpListener,
        base_url: String,
    }

    impl MockSlackServer {
        async fn start() -> Self {
            let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
                .await
                .expect("failed to bind mock server");
            let port = listener.local_addr().unwrap().port();
            let base_url = format!("http://127.0.0.1:{port}");
            Self { listener, base_url }
        }

        async fn respond_once(self, status_code: u16, body: &str) -> String {
            let body = body.to_owned();
            let (mut stream, _) = self.listener.accept().await.unwrap();

            use tokio::io::{AsyncReadExt, AsyncWriteExt};

            let mut buf = vec![0u8; 8192];
            let n = stream.read(&mut buf).await.unwrap();
            let request = String::from_utf8_lossy(&buf[..n]).into_owned();

            let response = format!(
                "HTTP/1.1 {status_code} OK\r\n\
                 Content-Type: application/json\r\n\
                 Content-Length: {}\r\n\
                 Connection: close\r\n\
                 \r\n\
                 {body}",
                body.len()
            );
            stream.write_all(response.as_bytes()).await.unwrap();
            stream.shutdown().await.unwrap();
            request
        }
    }

    fn payload() -> MessagePayload {
        MessagePayload {
            message_id: Some(11),
            mode: Some("im".to_owned()),
            destination: Some("U024BE7LH".to_owned()),
            subject: Some("deploy failed".to_owned()),
            body: "pipeline red on main".to_owned(),
            ..MessagePayload::default()
        }
    }

    #[tokio::test]
    async fn post_message_success() {
        let server = MockSlackServer::start().await;
        let vendor = SlackVendor::new(
            SlackConfig::new("xoxb-token").with_api_base_url(&server.base_url),
        );

        let server_handle =
            tokio::spawn(async move { server.respond_once(200, r#"{"ok":true}"#).await });

        let latency = vendor.send(&payload()).await.unwrap();
        let request = server_handle.await.unwrap();

        assert!(latency > Duration::ZERO);
        assert!(request.contains("chat.postMessage"));
        assert!(request.contains("U024BE7LH"));
        assert!(request.contains("deploy failed"));
    }

    #[tokio::test]
    async fn api_error_envelope() {
        let server = MockSlackServer::start().await;
        let vendor = SlackVendor::new(
            SlackConfig::new("xoxb-token").with_api_base_url(&server.base_url),
        );

        let server_handle = tokio::spawn(async move {
            server
                .respond_once(200, r#"{"ok":false,"error":"channel_not_found"}"#)
                .await
        });

        let err = vendor.send(&payload()).await.unwrap_err();
        server_handle.await.unwrap();

        assert!(matches!(err, VendorError::SendFailed(ref e) if e == "channel_not_found"));
    }

    #[tokio::test]
    async fn rate_limited() {
        let server = MockSlackServer::start().await;
        let vendor = SlackVendor::new(
            SlackConfig::new("xoxb-token").with_api_base_url(&server.base_url),
        );

        let server_handle =
            tokio::spawn(async move { server.respond_once(429, r#"{"ok":false}"#).await });

        let err = vendor.send(&payload()).await.unwrap_err();
        server_handle.await.unwrap();

        assert!(matches!(err, VendorError::RateLimited));
    }
}
