//! SMTP settings derived from the active configuration.

use serde::Serialize;
use url::Url;

use crate::config::ServerConfig;

/// Everything a mail sender needs, flattened from [`ServerConfig`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SmtpConfig {
    /// Host of the site URL, used as the HELO name.
    pub hostname: String,
    pub connection_security: String,
    pub skip_server_certificate_verification: bool,
    pub server_name: String,
    pub server: String,
    pub port: String,
    pub server_timeout_secs: u64,
    pub username: String,
    pub password: String,
    pub enable_smtp_auth: bool,
    pub send_email_notifications: bool,
    pub feedback_name: String,
    pub feedback_email: String,
    pub reply_to_address: String,
}

/// Host portion of `site_url`, or empty if it has none.
pub fn hostname_from_site_url(site_url: &str) -> String {
    Url::parse(site_url)
        .ok()
        .and_then(|url| url.host_str().map(str::to_string))
        .unwrap_or_default()
}

pub fn mail_service_config(config: &ServerConfig) -> SmtpConfig {
    let email = &config.email;
    SmtpConfig {
        hostname: hostname_from_site_url(&config.service.site_url),
        connection_security: email.connection_security.clone(),
        skip_server_certificate_verification: email.skip_server_certificate_verification,
        server_name: email.smtp_server.clone(),
        server: email.smtp_server.clone(),
        port: email.smtp_port.clone(),
        server_timeout_secs: email.smtp_server_timeout_secs,
        username: email.smtp_username.clone(),
        password: email.smtp_password.clone(),
        enable_smtp_auth: email.enable_smtp_auth,
        send_email_notifications: email.send_email_notifications,
        feedback_name: email.feedback_name.clone(),
        feedback_email: email.feedback_email.clone(),
        reply_to_address: email.reply_to_address.clone(),
    }
}
