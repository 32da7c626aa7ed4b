use crate::config::SmtpConfig;
use crate::error::NotifyError;
use crate::notifier::{FailureAlert, NotificationChannel};
use async_trait::async_trait;
use lettre::message::{Mailbox, MultiPart};
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
use reqwest::Client;
use serde_json::{json, Value as JsonValue};
use std::time::Duration;
use tracing::info;

const FOOTER: &str = "Jenkins Health Monitor";

pub fn format_duration(secs: Option<u64>) -> String {
    match secs {
        Some(s) if s > 0 => format!("{}m {}s", s / 60, s % 60),
        _ => "N/A".to_string(),
    }
}

fn or_na(v: &Option<String>) -> &str {
    v.as_deref().filter(|s| !s.is_empty()).unwrap_or("N/A")
}

fn summary_line(alert: &FailureAlert) -> String {
    format!(
        "Build #{} for {} has {}: {}",
        alert.build_number,
        alert.job_name,
        alert.status.as_str().to_ascii_lowercase(),
        alert.reason
    )
}

fn advice_block(alert: &FailureAlert) -> Option<String> {
    if alert.advice.is_empty() {
        return None;
    }
    let lines: Vec<String> = alert.advice.iter().map(|a| format!("• {}", a)).collect();
    Some(format!("Remediation Advice:\n{}", lines.join("\n")))
}

/// Slack-style attachment payload, colored by status tier.
pub fn webhook_payload(alert: &FailureAlert) -> JsonValue {
    let field = |title: &str, value: String| json!({"title": title, "value": value, "short": true});

    let fields = vec![
        field("Pipeline", alert.job_name.clone()),
        field("Build Number", alert.build_number.to_string()),
        field("Status", alert.status.to_string()),
        field("Duration", format_duration(alert.duration_secs)),
        field("Triggered By", or_na(&alert.triggered_by).to_string()),
        field("Branch", or_na(&alert.branch).to_string()),
    ];

    let mut text = summary_line(alert);
    if let Some(advice) = advice_block(alert) {
        text.push_str("\n\n");
        text.push_str(&advice);
    }

    let mut attachment = json!({
        "color": alert.status.webhook_color(),
        "title": format!("Build #{} - {}", alert.build_number, alert.status),
        "title_link": alert.build_url,
        "text": text,
        "fields": fields,
        "footer": FOOTER,
    });
    if let Some(ts) = alert.timestamp {
        attachment["ts"] = json!(ts.timestamp());
    }

    json!({ "attachments": [attachment] })
}

#[derive(Debug, Clone, PartialEq)]
pub struct EmailContent {
    pub subject: String,
    pub text: String,
    pub html: String,
}

fn escape_html(raw: &str) -> String {
    raw.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

pub fn email_content(alert: &FailureAlert) -> EmailContent {
    let duration = format_duration(alert.duration_secs);
    let when = alert
        .timestamp
        .map(|t| t.format("%Y-%m-%d %H:%M:%S UTC").to_string())
        .unwrap_or_else(|| "N/A".to_string());
    let rows = [
        ("Pipeline", alert.job_name.clone()),
        ("Build Number", format!("#{}", alert.build_number)),
        ("Status", alert.status.to_string()),
        ("Duration", duration),
        ("Triggered By", or_na(&alert.triggered_by).to_string()),
        ("Branch", or_na(&alert.branch).to_string()),
        ("Timestamp", when),
        ("Failure Reason", alert.reason.clone()),
    ];

    let subject = format!("Build #{} - {} - {}", alert.build_number, alert.status, alert.job_name);

    let mut text = format!("CI/CD Build Notification\n\n{}\n\n", summary_line(alert));
    for (label, value) in &rows {
        text.push_str(&format!("{}: {}\n", label, value));
    }
    if let Some(advice) = advice_block(alert) {
        text.push_str(&format!("\n{}\n", advice));
    }
    if !alert.build_url.is_empty() {
        text.push_str(&format!("\nView Build Details: {}\n", alert.build_url));
    }
    text.push_str(&format!("\n---\nThis notification was sent by the {}.\n", FOOTER));

    let mut detail_rows = String::new();
    for (label, value) in &rows {
        if *label == "Status" {
            detail_rows.push_str(&format!(
                "<tr><td><strong>{}:</strong></td><td><span style=\"background-color: {}; color: white; padding: 3px 8px; border-radius: 3px;\">{}</span></td></tr>\n",
                label,
                alert.status.email_color(),
                escape_html(value)
            ));
        } else {
            detail_rows.push_str(&format!(
                "<tr><td><strong>{}:</strong></td><td>{}</td></tr>\n",
                label,
                escape_html(value)
            ));
        }
    }
    let advice = if alert.advice.is_empty() {
        String::new()
    } else {
        let items: String = alert
            .advice
            .iter()
            .map(|a| format!("<li>{}</li>", escape_html(a)))
            .collect();
        format!("<h3>Remediation Advice</h3>\n<ul>{}</ul>\n", items)
    };
    let link = if alert.build_url.is_empty() {
        String::new()
    } else {
        format!(
            "<p><a href=\"{}\" style=\"background-color: #007bff; color: white; padding: 10px 20px; text-decoration: none; border-radius: 5px;\">View Build Details</a></p>",
            escape_html(&alert.build_url)
        )
    };
    let html = format!(
        "<!DOCTYPE html>\n<html>\n<head><meta charset=\"utf-8\"></head>\n<body style=\"font-family: Arial, sans-serif; color: #333;\">\n\
         <h2>CI/CD Build Notification</h2>\n<p>{}</p>\n<table>\n{}</table>\n{}{}\n\
         <p style=\"font-size: 12px; color: #666;\">This notification was sent by the {}.</p>\n</body>\n</html>\n",
        escape_html(&summary_line(alert)),
        detail_rows,
        advice,
        link,
        FOOTER
    );

    EmailContent { subject, text, html }
}

pub struct WebhookChannel {
    client: Client,
    url: String,
}

impl WebhookChannel {
    pub fn new(url: impl Into<String>) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .unwrap_or_default();
        Self { client, url: url.into() }
    }
}

#[async_trait]
impl NotificationChannel for WebhookChannel {
    fn name(&self) -> &str {
        "webhook"
    }

    async fn deliver(&self, alert: &FailureAlert) -> Result<(), NotifyError> {
        self.client
            .post(&self.url)
            .json(&webhook_payload(alert))
            .send()
            .await?
            .error_for_status()?;
        info!(key = %alert.dedup_key(), "Webhook notification sent");
        Ok(())
    }
}

pub struct EmailChannel {
    transport: AsyncSmtpTransport<Tokio1Executor>,
    from: Mailbox,
    to: Vec<Mailbox>,
}

impl EmailChannel {
    pub fn new(cfg: &SmtpConfig) -> Result<Self, NotifyError> {
        let parse = |raw: &str| {
            raw.trim()
                .parse::<Mailbox>()
                .map_err(|e| NotifyError::Config(format!("invalid address {:?}: {}", raw, e)))
        };

        let from = parse(&cfg.from)?;
        let to = cfg
            .to
            .split(',')
            .filter(|s| !s.trim().is_empty())
            .map(parse)
            .collect::<Result<Vec<_>, _>>()?;
        if to.is_empty() {
            return Err(NotifyError::Config("no email recipients configured".into()));
        }

        let builder = if cfg.use_tls {
            AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&cfg.server)?
        } else {
            AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(&cfg.server)
        };
        let transport = builder
            .port(cfg.port)
            .credentials(Credentials::new(cfg.username.clone(), cfg.password.clone()))
            .build();

        Ok(Self { transport, from, to })
    }

    fn message(&self, alert: &FailureAlert) -> Result<Message, NotifyError> {
        let content = email_content(alert);
        let mut builder = Message::builder().from(self.from.clone()).subject(content.subject);
        for rcpt in &self.to {
            builder = builder.to(rcpt.clone());
        }
        Ok(builder.multipart(MultiPart::alternative_plain_html(content.text, content.html))?)
    }
}

#[async_trait]
impl NotificationChannel for EmailChannel {
    fn name(&self) -> &str {
        "email"
    }

    async fn deliver(&self, alert: &FailureAlert) -> Result<(), NotifyError> {
        let message = self.message(alert)?;
        self.transport.send(message).await?;
        info!(key = %alert.dedup_key(), "Email notification sent");
        Ok(())
    }
}
