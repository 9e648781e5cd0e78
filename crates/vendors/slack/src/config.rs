use serde::{Deserialize, Serialize};

/// Slack vendor configuration.
#[derive(Clone, Serialize, Deserialize)]
pub struct SlackConfig {
    /// Bot token used as a bearer credential.
    pub token: String,

    /// Web API base URL. Overridable for tests.
    #[serde(default = "default_api_base_url")]
    pub api_base_url: String,
}

fn default_api_base_url() -> String {
    "https://slack.com/api".to_owned()
}

impl SlackConfig {
    #[must_use]
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
            api_base_url: default_api_base_url(),
        }
    }

    #[must_use]
    pub fn with_api_base_url(mut self, url: impl Into<String>) -> Self {
        self.api_base_url = url.into();
        self
    }
}

impl std::fmt::Debug for SlackConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SlackConfig")
            .field("token", &"[REDACTED]")
            .field("api_base_url", &self.api_base_url)
            .finish()
    }
}
