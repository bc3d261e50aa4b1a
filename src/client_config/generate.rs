//! Deterministic projections of the configuration handed to clients.
//!
//! Keys are part of the client wire format and keep their historical
//! CamelCase spelling.

use crate::client_config::ClientConfig;
use crate::config::ServerConfig;

fn flag(value: bool) -> String {
    value.to_string()
}

/// Keys shared by the full and the limited projection.
fn common(config: &ServerConfig, telemetry_id: &str) -> ClientConfig {
    let mut props = ClientConfig::new();

    props.insert("Version".into(), env!("CARGO_PKG_VERSION").into());
    props.insert("SiteURL".into(), config.service.site_url.clone());
    props.insert("TelemetryId".into(), telemetry_id.to_string());

    props.insert(
        "EnableSignUpWithEmail".into(),
        flag(config.email.enable_sign_up_with_email),
    );

    let support = &config.support;
    props.insert("TermsOfServiceLink".into(), support.terms_of_service_link.clone());
    props.insert("PrivacyPolicyLink".into(), support.privacy_policy_link.clone());
    props.insert("AboutLink".into(), support.about_link.clone());
    props.insert("HelpLink".into(), support.help_link.clone());
    props.insert("SupportEmail".into(), support.support_email.clone());
    props.insert(
        "EnableCustomTermsOfService".into(),
        flag(support.custom_terms_of_service_enabled),
    );
    props.insert(
        "CustomTermsOfServiceReAcceptancePeriod".into(),
        support.custom_terms_of_service_re_acceptance_period.to_string(),
    );

    props
}

/// Projection for authenticated clients.
pub fn generate_client_config(config: &ServerConfig, telemetry_id: &str) -> ClientConfig {
    let mut props = common(config, telemetry_id);

    props.insert(
        "SendEmailNotifications".into(),
        flag(config.email.send_email_notifications),
    );
    props.insert("FeedbackName".into(), config.email.feedback_name.clone());
    props.insert("FeedbackEmail".into(), config.email.feedback_email.clone());

    props.insert("EnableDeveloper".into(), flag(config.service.enable_developer));
    props.insert(
        "EnableLinkPreviews".into(),
        flag(config.service.enable_link_previews),
    );
    props.insert(
        "SessionLengthWebInHours".into(),
        config.service.session_length_web_hours.to_string(),
    );

    props.insert(
        "EnableMessageExport".into(),
        flag(config.message_export.enable_export),
    );
    props.insert("EnableCluster".into(), flag(config.cluster.enable));
    props.insert("EnableMetrics".into(), flag(config.metrics.enable));

    props
}

/// Projection for anonymous, pre-login clients.
pub fn generate_limited_client_config(config: &ServerConfig, telemetry_id: &str) -> ClientConfig {
    common(config, telemetry_id)
}
