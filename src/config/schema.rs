//! Configuration schema definitions.
//!
//! This module defines the complete configuration document shared by every
//! node. All types derive Serde traits for deserialization from config files.

use serde::{Deserialize, Serialize};

/// Placeholder shown instead of secret values in sanitized output.
pub const FAKE_SETTING: &str = "********************************";

/// Root configuration document.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct ServerConfig {
    /// Core service settings (site URL, cookies, sessions).
    pub service: ServiceSettings,

    /// Support links and custom terms of service.
    pub support: SupportSettings,

    /// Outbound email settings.
    pub email: EmailSettings,

    /// Compliance message export.
    pub message_export: MessageExportSettings,

    /// Prometheus metrics endpoint.
    pub metrics: MetricsSettings,

    /// Cluster membership.
    pub cluster: ClusterSettings,

    #[serde(default)]
    pub admin: AdminSettings,

    #[serde(default)]
    pub log: LogSettings,
}

impl ServerConfig {
    /// Replace secret values with [`FAKE_SETTING`].
    pub fn sanitize(&mut self) {
        if !self.email.smtp_password.is_empty() {
            self.email.smtp_password = FAKE_SETTING.to_string();
        }
        if !self.admin.api_key.is_empty() {
            self.admin.api_key = FAKE_SETTING.to_string();
        }
    }

    /// Undo [`Self::sanitize`] by copying masked secrets back from `actual`.
    pub fn desanitize(&mut self, actual: &ServerConfig) {
        if self.email.smtp_password == FAKE_SETTING {
            self.email.smtp_password = actual.email.smtp_password.clone();
        }
        if self.admin.api_key == FAKE_SETTING {
            self.admin.api_key = actual.admin.api_key.clone();
        }
    }
}

/// Service settings.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct ServiceSettings {
    /// Public URL of the site (e.g., "https://chat.example.com").
    pub site_url: String,

    /// Scope cookies to the site URL's host so subdomains share them.
    pub allow_cookies_for_subdomains: bool,

    pub enable_developer: bool,

    pub enable_link_previews: bool,

    /// Web session length in hours.
    pub session_length_web_hours: u32,
}

impl Default for ServiceSettings {
    fn default() -> Self {
        Self {
            site_url: String::new(),
            allow_cookies_for_subdomains: false,
            enable_developer: false,
            enable_link_previews: true,
            session_length_web_hours: 720,
        }
    }
}

/// Support links and terms of service.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct SupportSettings {
    pub terms_of_service_link: String,
    pub privacy_policy_link: String,
    pub about_link: String,
    pub help_link: String,
    pub support_email: String,

    /// Require users to accept the custom terms of service.
    pub custom_terms_of_service_enabled: bool,

    /// Days before users must accept the terms again.
    pub custom_terms_of_service_re_acceptance_period: u32,
}

impl Default for SupportSettings {
    fn default() -> Self {
        Self {
            terms_of_service_link: "https://about.example.com/terms/".to_string(),
            privacy_policy_link: "https://about.example.com/privacy/".to_string(),
            about_link: "https://about.example.com/".to_string(),
            help_link: "https://help.example.com/".to_string(),
            support_email: "support@example.com".to_string(),
            custom_terms_of_service_enabled: false,
            custom_terms_of_service_re_acceptance_period: 365,
        }
    }
}

/// Outbound email settings.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct EmailSettings {
    pub enable_sign_up_with_email: bool,
    pub send_email_notifications: bool,
    pub feedback_name: String,
    pub feedback_email: String,
    pub reply_to_address: String,
    pub smtp_server: String,

    /// SMTP port, kept as a string so an empty value means "unset".
    pub smtp_port: String,
    pub smtp_username: String,
    pub smtp_password: String,
    pub enable_smtp_auth: bool,

    /// "", "TLS" or "STARTTLS".
    pub connection_security: String,
    pub skip_server_certificate_verification: bool,

    /// SMTP server timeout in seconds.
    pub smtp_server_timeout_secs: u64,
}

impl Default for EmailSettings {
    fn default() -> Self {
        Self {
            enable_sign_up_with_email: true,
            send_email_notifications: true,
            feedback_name: String::new(),
            feedback_email: "test@example.com".to_string(),
            reply_to_address: "test@example.com".to_string(),
            smtp_server: "localhost".to_string(),
            smtp_port: "10025".to_string(),
            smtp_username: String::new(),
            smtp_password: String::new(),
            enable_smtp_auth: false,
            connection_security: String::new(),
            skip_server_certificate_verification: false,
            smtp_server_timeout_secs: 10,
        }
    }
}

/// Compliance message export settings.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct MessageExportSettings {
    pub enable_export: bool,
    pub export_format: String,

    /// Daily run time, "HH:MM".
    pub daily_run_time: String,

    /// Export posts created after this time (epoch millis, 0 = unset).
    pub export_from_timestamp: i64,

    pub batch_size: u32,
}

impl Default for MessageExportSettings {
    fn default() -> Self {
        Self {
            enable_export: false,
            export_format: "actiance".to_string(),
            daily_run_time: "01:00".to_string(),
            export_from_timestamp: 0,
            batch_size: 10_000,
        }
    }
}

/// Metrics endpoint settings.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct MetricsSettings {
    /// Serve Prometheus metrics.
    pub enable: bool,

    /// Metrics endpoint bind address.
    pub listen_address: String,
}

impl Default for MetricsSettings {
    fn default() -> Self {
        Self {
            enable: false,
            listen_address: "127.0.0.1:8067".to_string(),
        }
    }
}

/// Cluster settings.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct ClusterSettings {
    pub enable: bool,
    pub cluster_name: String,

    /// Reject configuration writes on this node.
    pub read_only_config: bool,
}

impl Default for ClusterSettings {
    fn default() -> Self {
        Self {
            enable: false,
            cluster_name: String::new(),
            read_only_config: true,
        }
    }
}

/// Admin API settings.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct AdminSettings {
    /// Enable the admin API.
    pub enable: bool,

    /// API key for authentication (Bearer token).
    pub api_key: String,

    /// Admin API bind address.
    pub listen_address: String,
}

impl Default for AdminSettings {
    fn default() -> Self {
        Self {
            enable: false,
            // WARNING: This is a placeholder! Change this in production.
            api_key: "CHANGE_ME_IN_PRODUCTION".to_string(),
            listen_address: "127.0.0.1:8081".to_string(),
        }
    }
}

/// Logging settings.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct LogSettings {
    /// Log level (trace, debug, info, warn, error).
    pub console_level: String,

    /// Emit JSON lines instead of human-readable output.
    pub console_json: bool,
}

impl Default for LogSettings {
    fn default() -> Self {
        Self {
            console_level: "info".to_string(),
            console_json: false,
        }
    }
}
