use serde::{Deserialize, Serialize};

/// Twilio vendor configuration.
#[derive(Clone, Serialize, Deserialize)]
pub struct TwilioConfig {
    /// Twilio account SID.
    pub account_sid: String,

    /// Twilio auth token.
    pub auth_token: String,

    /// The `From` phone number for SMS and calls.
    #[serde(default)]
    pub from_number: Option<String>,

    /// REST API base URL. Overridable for tests.
    #[serde(default = "default_api_base_url")]
    pub api_base_url: String,
}

fn default_api_base_url() -> String {
    "https://api.twilio.com".to_owned()
}

impl TwilioConfig {
    #[must_use]
    pub fn new(account_sid: impl Into<String>, auth_token: impl Into<String>) -> Self {
        Self {
            account_sid: account_sid.into(),
            auth_token: auth_token.into(),
            from_number: None,
            api_base_url: default_api_base_url(),
        }
    }

    #[must_use]
    pub fn with_from_number(mut self, from_number: impl Into<String>) -> Self {
        self.from_number = Some(from_number.into());
        self
    }

    #[must_use]
    pub fn with_api_base_url(mut self, url: impl Into<String>) -> Self {
        self.api_base_url = url.into();
        self
    }
}

impl std::fmt::Debug for TwilioConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TwilioConfig")
            .field("account_sid", &self.account_sid)
            .field("auth_token", &"[REDACTED]")
            .field("from_number", &self.from_number)
            .field("api_base_url", &self.api_base_url)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn auth_token_redacted_in_debug() {
        let config = TwilioConfig::new("AC123", "secret-token");
        let debug = format!("{config:?}");
        assert!(!debug.contains("secret-token"));
    }
}
