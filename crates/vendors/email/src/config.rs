use serde::{Deserialize, Serialize};

/// SMTP vendor configuration.
#[derive(Clone, Serialize, Deserialize)]
pub struct EmailConfig {
    /// SMTP server hostname.
    pub host: String,

    /// SMTP server port. Defaults to 587 (STARTTLS submission port).
    #[serde(default = "default_port")]
    pub port: u16,

    /// Optional SMTP username for authentication.
    #[serde(default)]
    pub username: Option<String>,

    /// Optional SMTP password for authentication.
    #[serde(default)]
    pub password: Option<String>,

    /// Whether to use STARTTLS. Defaults to `true`.
    #[serde(default = "default_tls")]
    pub tls: bool,

    /// The `From` address on outgoing notifications.
    pub from_address: String,
}

fn default_port() -> u16 {
    587
}

fn default_tls() -> bool {
    true
}

impl EmailConfig {
    #[must_use]
    pub fn new(host: impl Into<String>, from_address: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            port: default_port(),
            username: None,
            password: None,
            tls: default_tls(),
            from_address: from_address.into(),
        }
    }

    #[must_use]
    pub fn with_credentials(mut self, username: impl Into<String>, password: impl Into<String>) -> Self {
        self.username = Some(username.into());
        self.password = Some(password.into());
        self
    }

    #[must_use]
    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    #[must_use]
    pub fn without_tls(mut self) -> Self {
        self.tls = false;
        self
    }
}

impl std::fmt::Debug for EmailConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EmailConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "[REDACTED]"))
            .field("tls", &self.tls)
            .field("from_address", &self.from_address)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_defaults() {
        let config = EmailConfig::new("smtp.example.com", "klaxon@example.com");
        assert_eq!(config.port, 587);
        assert!(config.tls);
        assert!(config.username.is_none());
    }

    #[test]
    fn password_redacted_in_debug() {
        let config = EmailConfig::new("smtp.example.com", "klaxon@example.com")
            .with_credentials("user", "hunter2");
        let debug = format!("{config:?}");
        assert!(!debug.contains("hunter2"));
        assert!(debug.contains("[REDACTED]"));
    }
}
