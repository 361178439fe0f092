use crate::message::AlertMessage;
use crate::notifier::{NotifyError, Notifier};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;
use tracing::debug;

const SLACK_TEXT_LIMIT: usize = 3000;
const WEBHOOK_BODY_LIMIT: usize = 16 * 1024;
const EMAIL_BODY_LIMIT: usize = 64 * 1024;
const HTTP_TIMEOUT: Duration = Duration::from_secs(10);

fn http_client() -> reqwest::Client {
    reqwest::Client::builder()
        .timeout(HTTP_TIMEOUT)
        .build()
        .unwrap_or_else(|_| reqwest::Client::new())
}

// ============================================================================
// Slack 通知
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlackConfig {
    pub webhook_url: String,
}

pub struct SlackNotifier {
    config: SlackConfig,
    client: reqwest::Client,
}

impl SlackNotifier {
    pub fn new(config: SlackConfig) -> Self {
        Self {
            config,
            client: http_client(),
        }
    }

    fn build_message(&self, message: &AlertMessage) -> serde_json::Value {
        serde_json::json!({
            "attachments": [{
                "color": message.slack_color(),
                "title": message.title,
                "text": message.body_truncated(SLACK_TEXT_LIMIT),
                "fields": [
                    {
                        "title": "Severity",
                        "value": message.severity.as_str(),
                        "short": true
                    },
                    {
                        "title": "Findings",
                        "value": message.finding_count.to_string(),
                        "short": true
                    }
                ],
                "ts": message.timestamp.timestamp()
            }]
        })
    }
}

#[async_trait]
impl Notifier for SlackNotifier {
    async fn send(&self, message: &AlertMessage) -> Result<(), NotifyError> {
        let body = self.build_message(message);

        let response = self
            .client
            .post(&self.config.webhook_url)
            .json(&body)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(NotifyError::Status {
                status: response.status().as_u16(),
            });
        }

        debug!("Slack notification accepted");
        Ok(())
    }

    fn kind(&self) -> &str {
        "slack"
    }
}

// ============================================================================
// Webhook 通知
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WebhookConfig {
    pub url: String,
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
}

pub struct WebhookNotifier {
    config: WebhookConfig,
    client: reqwest::Client,
}

impl WebhookNotifier {
    pub fn new(config: WebhookConfig) -> Self {
        Self {
            config,
            client: http_client(),
        }
    }

    fn build_message(&self, message: &AlertMessage) -> serde_json::Value {
        serde_json::json!({
            "title": message.title,
            "severity": message.severity.as_str(),
            "color": message.hex_color(),
            "body": message.body_truncated(WEBHOOK_BODY_LIMIT),
            "findings": message.finding_count,
            "resources": message.resource_count,
            "generated_at": message.timestamp.to_rfc3339(),
        })
    }
}

#[async_trait]
impl Notifier for WebhookNotifier {
    async fn send(&self, message: &AlertMessage) -> Result<(), NotifyError> {
        let mut request = self.client.post(&self.config.url);

        for (key, value) in &self.config.headers {
            request = request.header(key, value);
        }

        let response = request.json(&self.build_message(message)).send().await?;

        if !response.status().is_success() {
            return Err(NotifyError::Status {
                status: response.status().as_u16(),
            });
        }

        debug!(url = %self.config.url, "Webhook notification accepted");
        Ok(())
    }

    fn kind(&self) -> &str {
        "webhook"
    }
}

// ============================================================================
// 邮件通知
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmailConfig {
    pub smtp_host: String,
    #[serde(default = "default_smtp_port")]
    pub smtp_port: u16,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    pub from: String,
    pub to: Vec<String>,
}

fn default_smtp_port() -> u16 {
    587
}

pub struct EmailNotifier {
    config: EmailConfig,
}

impl EmailNotifier {
    pub fn new(config: EmailConfig) -> Self {
        Self { config }
    }

    fn build_email(&self, message: &AlertMessage) -> Result<lettre::Message, NotifyError> {
        use lettre::message::header::ContentType;

        if self.config.to.is_empty() {
            return Err(NotifyError::Config("email channel has no recipients".to_string()));
        }

        let from = self
            .config
            .from
            .parse()
            .map_err(|e: lettre::address::AddressError| NotifyError::Address(e.to_string()))?;

        let mut builder = lettre::Message::builder()
            .from(from)
            .subject(&message.title)
            .header(ContentType::TEXT_PLAIN);

        for to in &self.config.to {
            let mailbox = to
                .parse()
                .map_err(|e: lettre::address::AddressError| NotifyError::Address(e.to_string()))?;
            builder = builder.to(mailbox);
        }

        builder
            .body(format!(
                "{}\nSeverity: {}\nGenerated: {}\n",
                message.body_truncated(EMAIL_BODY_LIMIT),
                message.severity,
                message.timestamp.to_rfc3339()
            ))
            .map_err(|e| NotifyError::Smtp(e.to_string()))
    }
}

#[async_trait]
impl Notifier for EmailNotifier {
    async fn send(&self, message: &AlertMessage) -> Result<(), NotifyError> {
        use lettre::transport::smtp::authentication::Credentials;
        use lettre::{AsyncSmtpTransport, AsyncTransport, Tokio1Executor};

        let email = self.build_email(message)?;

        let mut transport = AsyncSmtpTransport::<Tokio1Executor>::relay(&self.config.smtp_host)
            .map_err(|e| NotifyError::Smtp(e.to_string()))?
            .port(self.config.smtp_port);

        if let (Some(username), Some(password)) = (&self.config.username, &self.config.password) {
            transport = transport.credentials(Credentials::new(username.clone(), password.clone()));
        }

        transport
            .build()
            .send(email)
            .await
            .map_err(|e| NotifyError::Smtp(e.to_string()))?;

        debug!(recipients = self.config.to.len(), "Email notification sent");
        Ok(())
    }

    fn kind(&self) -> &str {
        "email"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use vigil_types::Severity;

    fn message() -> AlertMessage {
        AlertMessage {
            title: "[CRITICAL] Vigil audit: 1 finding(s) on 1 resource(s)".to_string(),
            body: "- CRITICAL db-1 high-cpu: avg(CPUUtilization) = 95.00 > 90\n".to_string(),
            severity: Severity::Critical,
            finding_count: 1,
            resource_count: 3,
            timestamp: Utc::now(),
        }
    }

    #[test]
    fn test_slack_payload() {
        let notifier = SlackNotifier::new(SlackConfig {
            webhook_url: "https://hooks.slack.example/T000".to_string(),
        });
        let payload = notifier.build_message(&message());
        let attachment = &payload["attachments"][0];
        assert_eq!(attachment["color"], "danger");
        assert_eq!(attachment["fields"][1]["value"], "1");
    }

    #[test]
    fn test_webhook_payload() {
        let notifier = WebhookNotifier::new(WebhookConfig {
            url: "https://example.com/hook".to_string(),
            headers: BTreeMap::new(),
        });
        let payload = notifier.build_message(&message());
        assert_eq!(payload["severity"], "CRITICAL");
        assert_eq!(payload["color"], "#d00000");
        assert_eq!(payload["resources"], 3);
    }

    #[test]
    fn test_email_requires_recipients() {
        let notifier = EmailNotifier::new(EmailConfig {
            smtp_host: "smtp.example.com".to_string(),
            smtp_port: 587,
            username: None,
            password: None,
            from: "vigil@example.com".to_string(),
            to: vec![],
        });
        assert!(matches!(
            notifier.build_email(&message()),
            Err(NotifyError::Config(_))
        ));
    }

    #[test]
    fn test_email_rejects_bad_address() {
        let notifier = EmailNotifier::new(EmailConfig {
            smtp_host: "smtp.example.com".to_string(),
            smtp_port: 587,
            username: None,
            password: None,
            from: "not an address".to_string(),
            to: vec!["ops@example.com".to_string()],
        });
        assert!(matches!(
            notifier.build_email(&message()),
            Err(NotifyError::Address(_))
        ));
    }
}
