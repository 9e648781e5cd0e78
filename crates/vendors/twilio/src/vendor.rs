use std::time::{Duration, Instant};

use klaxon_core::MessagePayload;
use klaxon_vendor::{Vendor, VendorError};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::config::TwilioConfig;

/// Twilio REST vendor serving the `sms` and `call` modes.
///
/// SMS goes through the Messages endpoint; calls go through the Calls
/// endpoint with an inline TwiML `<Say>` of the message body.
pub struct TwilioVendor {
    config: TwilioConfig,
    client: Client,
}

#[derive(Debug, Serialize)]
struct SendMessageRequest {
    #[serde(rename = "To")]
    to: String,
    #[serde(rename = "From")]
    from: String,
    #[serde(rename = "Body")]
    body: String,
}

#[derive(Debug, Serialize)]
struct CreateCallRequest {
    #[serde(rename = "To")]
    to: String,
    #[serde(rename = "From")]
    from: String,
    #[serde(rename = "Twiml")]
    twiml: String,
}

#[derive(Debug, Deserialize)]
struct ApiResponse {
    sid: Option<String>,
    error_code: Option<i64>,
    error_message: Option<String>,
}

impl TwilioVendor {
    /// Create a new Twilio vendor with a default HTTP client.
    #[must_use]
    pub fn new(config: TwilioConfig) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .expect("failed to build HTTP client");
        Self { config, client }
    }

    /// Create a new Twilio vendor with a custom HTTP client.
    #[must_use]
    pub fn with_client(config: TwilioConfig, client: Client) -> Self {
        Self { config, client }
    }

    fn from_number(&self) -> Result<&str, VendorError> {
        self.config.from_number.as_deref().ok_or_else(|| {
            VendorError::Configuration("no from_number configured for Twilio".to_owned())
        })
    }

    fn endpoint(&self, resource: &str) -> String {
        format!(
            "{}/2010-04-01/Accounts/{}/{resource}.json",
            self.config.api_base_url, self.config.account_sid
        )
    }

    async fn post_form<T: Serialize + Sync>(
        &self,
        url: &str,
        form: &T,
    ) -> Result<(), VendorError> {
        let response = self
            .client
            .post(url)
            .basic_auth(&self.config.account_sid, Some(&self.config.auth_token))
            .form(form)
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
            warn!("Twilio API rate limit hit");
            return Err(VendorError::RateLimited);
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(VendorError::SendFailed(format!("HTTP {status}: {body}")));
        }

        let api_response: ApiResponse = response
            .json()
            .await
            .map_err(|e| VendorError::SendFailed(format!("unparseable Twilio response: {e}")))?;

        if let Some(code) = api_response.error_code {
            let msg = api_response
                .error_message
                .unwrap_or_else(|| format!("error code {code}"));
            return Err(VendorError::SendFailed(msg));
        }

        debug!(sid = ?api_response.sid, "Twilio accepted request");
        Ok(())
    }
}

impl Vendor for TwilioVendor {
    fn name(&self) -> &str {
        "twilio"
    }

    fn modes(&self) -> &[&str] {
        &["sms", "call"]
    }

    async fn send(&self, message: &MessagePayload) -> Result<Duration, VendorError> {
        let to = message
            .destination
            .as_deref()
            .ok_or_else(|| VendorError::InvalidPayload("message has no destination".to_owned()))?
            .to_owned();
        let from = self.from_number()?.to_owned();
        let mode = message.mode.as_deref().unwrap_or("sms");

        // Calls carry the subject too; a ringing phone has no subject line.
        let text = match message.subject.as_deref() {
            Some(subject) if !subject.is_empty() => format!("{subject} {}", message.body),
            _ => message.body.clone(),
        };

        let start = Instant::now();
        match mode {
            "call" => {
                let twiml = format!("<Response><Say>{}</Say></Response>", xml_escape(&text));
                let request = CreateCallRequest { to, from, twiml };
                self.post_form(&self.endpoint("Calls"), &request).await?;
            }
            _ => {
                let request = SendMessageRequest {
                    to,
                    from,
                    body: text,
                };
                self.post_form(&self.endpoint("Messages"), &request).await?;
            }
        }
        let latency = start.elapsed();

        info!(message_id = ?message.message_id, mode, ?latency, "Twilio send complete");
        Ok(latency)
    }
}

fn xml_escape(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}

#[cfg(test)]
mod tests {
    use super::*;

    /// A minimal mock HTTP server built on tokio that returns canned
    /// responses.
    struct MockTwilioServer {
        listener: tokio::net::TcpListener,
        base_url: String,
    }

    impl MockTwilioServer {
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

    fn sms_payload() -> MessagePayload {
        MessagePayload {
            message_id: Some(9),
            mode: Some("sms".to_owned()),
            destination: Some("+15559876543".to_owned()),
            subject: Some("disk full".to_owned()),
            body: "/var 98% on web01".to_owned(),
            ..MessagePayload::default()
        }
    }

    fn vendor(base_url: &str) -> TwilioVendor {
        let config = TwilioConfig::new("AC123", "token")
            .with_api_base_url(base_url)
            .with_from_number("+15551234567");
        TwilioVendor::new(config)
    }

    #[tokio::test]
    async fn sms_send_success() {
        let server = MockTwilioServer::start().await;
        let vendor = vendor(&server.base_url);

        let ok = r#"{"sid":"SM123","error_code":null,"error_message":null}"#;
        let server_handle = tokio::spawn(async move { server.respond_once(200, ok).await });

        let latency = vendor.send(&sms_payload()).await.unwrap();
        let request = server_handle.await.unwrap();

        assert!(latency > Duration::ZERO);
        assert!(request.contains("/Accounts/AC123/Messages.json"));
        assert!(request.contains("disk+full"));
    }

    #[tokio::test]
    async fn call_uses_twiml_say() {
        let server = MockTwilioServer::start().await;
        let vendor = vendor(&server.base_url);

        let mut m = sms_payload();
        m.mode = Some("call".to_owned());

        let ok = r#"{"sid":"CA123","error_code":null,"error_message":null}"#;
        let server_handle = tokio::spawn(async move { server.respond_once(200, ok).await });

        vendor.send(&m).await.unwrap();
        let request = server_handle.await.unwrap();

        assert!(request.contains("/Accounts/AC123/Calls.json"));
        assert!(request.contains("Say"));
    }

    #[tokio::test]
    async fn rate_limited_is_retryable() {
        let server = MockTwilioServer::start().await;
        let vendor = vendor(&server.base_url);

        let body = r#"{"error_code":429,"error_message":"rate limited"}"#;
        let server_handle = tokio::spawn(async move { server.respond_once(429, body).await });

        let err = vendor.send(&sms_payload()).await.unwrap_err();
        server_handle.await.unwrap();

        assert!(matches!(err, VendorError::RateLimited));
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn api_error_is_send_failed() {
        let server = MockTwilioServer::start().await;
        let vendor = vendor(&server.base_url);

        let body =
            r#"{"sid":null,"error_code":21211,"error_message":"Invalid 'To' Phone Number"}"#;
        let server_handle = tokio::spawn(async move { server.respond_once(200, body).await });

        let err = vendor.send(&sms_payload()).await.unwrap_err();
        server_handle.await.unwrap();

        assert!(matches!(err, VendorError::SendFailed(_)));
        assert!(!err.is_retryable());
    }

    #[tokio::test]
    async fn missing_destination_rejected() {
        let vendor = vendor("http://localhost:1");
        let mut m = sms_payload();
        m.destination = None;
        let err = vendor.send(&m).await.unwrap_err();
        assert!(matches!(err, VendorError::InvalidPayload(_)));
    }

    #[test]
    fn xml_escaping() {
        assert_eq!(xml_escape("a < b & c"), "a &lt; b &amp; c");
    }
}
