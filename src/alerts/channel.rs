//! Notification channels: a capability set `{Name, IsEnabled, Send,
//! SendResolved}` with one variant per delivery mechanism, no inheritance —
//! grounded on `alerts.rs`'s per-channel `match` dispatch and `discord.rs`'s
//! builder pattern for structured JSON payloads, generalized from the
//! teacher's two channels to Pondy's seven.

use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;
use tracing::{error, info, instrument, warn};

use crate::config::{
    DiscordChannelConfig, EmailChannelConfig, MattermostChannelConfig, NotionChannelConfig,
    PluginChannelConfig, SlackChannelConfig, WebhookChannelConfig,
};
use crate::model::Alert;

const HTTP_CHANNEL_TIMEOUT: Duration = Duration::from_secs(10);
const NOTION_TIMEOUT: Duration = Duration::from_secs(15);
const SMTP_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
const SMTP_TOTAL_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug)]
pub enum DispatchError {
    Http { channel: String, detail: String },
    Smtp { channel: String, detail: String },
}

impl std::fmt::Display for DispatchError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DispatchError::Http { channel, detail } => {
                write!(f, "channel '{channel}' failed: {detail}")
            }
            DispatchError::Smtp { channel, detail } => {
                write!(f, "channel '{channel}' (smtp) failed: {detail}")
            }
        }
    }
}

impl std::error::Error for DispatchError {}

/// A delivery endpoint for alert notifications.
#[async_trait]
pub trait Channel: Send + Sync {
    fn name(&self) -> &str;
    fn is_enabled(&self) -> bool;
    async fn send(&self, alert: &Alert) -> Result<(), DispatchError>;
    async fn send_resolved(&self, alert: &Alert) -> Result<(), DispatchError>;
}

fn severity_color(alert: &Alert) -> u32 {
    match alert.severity {
        crate::model::Severity::Critical => 0xFF0000,
        crate::model::Severity::Warning => 0xFFA500,
        crate::model::Severity::Info => 0x3498DB,
    }
}

pub struct SlackChannel {
    client: reqwest::Client,
    config: SlackChannelConfig,
}

impl SlackChannel {
    pub fn new(config: SlackChannelConfig) -> Self {
        Self {
            client: reqwest::Client::builder()
                .timeout(HTTP_CHANNEL_TIMEOUT)
                .build()
                .expect("failed to build HTTP client"),
            config,
        }
    }

    async fn post(&self, text: String) -> Result<(), DispatchError> {
        let body = json!({ "text": text, "channel": self.config.channel });
        self.client
            .post(&self.config.webhook_url)
            .json(&body)
            .send()
            .await
            .map_err(|e| DispatchError::Http {
                channel: self.name().to_string(),
                detail: e.to_string(),
            })?;
        Ok(())
    }
}

#[async_trait]
impl Channel for SlackChannel {
    fn name(&self) -> &str {
        "slack"
    }

    fn is_enabled(&self) -> bool {
        self.config.enabled
    }

    #[instrument(skip(self, alert))]
    async fn send(&self, alert: &Alert) -> Result<(), DispatchError> {
        self.post(format!(
            "[{:?}] {} ({}/{}): {}",
            alert.severity, alert.rule_name, alert.target_name, alert.instance_name, alert.message
        ))
        .await
    }

    async fn send_resolved(&self, alert: &Alert) -> Result<(), DispatchError> {
        self.post(format!(
            "RESOLVED: {} ({}/{})",
            alert.rule_name, alert.target_name, alert.instance_name
        ))
        .await
    }
}

pub struct DiscordChannel {
    client: reqwest::Client,
    config: DiscordChannelConfig,
}

impl DiscordChannel {
    pub fn new(config: DiscordChannelConfig) -> Self {
        Self {
            client: reqwest::Client::builder()
                .timeout(HTTP_CHANNEL_TIMEOUT)
                .build()
                .expect("failed to build HTTP client"),
            config,
        }
    }

    async fn post_embed(&self, title: &str, description: String, color: u32) -> Result<(), DispatchError> {
        let body = json!({
            "embeds": [{
                "title": title,
                "description": description,
                "color": color,
            }]
        });

        let response = self
            .client
            .post(&self.config.webhook_url)
            .json(&body)
            .send()
            .await
            .map_err(|e| DispatchError::Http {
                channel: self.name().to_string(),
                detail: e.to_string(),
            })?;

        if !response.status().is_success() {
            return Err(DispatchError::Http {
                channel: self.name().to_string(),
                detail: format!("status {}", response.status()),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl Channel for DiscordChannel {
    fn name(&self) -> &str {
        "discord"
    }

    fn is_enabled(&self) -> bool {
        self.config.enabled
    }

    #[instrument(skip(self, alert))]
    async fn send(&self, alert: &Alert) -> Result<(), DispatchError> {
        self.post_embed(
            &format!("\u{1F6A8} {}", alert.rule_name),
            alert.message.clone(),
            severity_color(alert),
        )
        .await
    }

    async fn send_resolved(&self, alert: &Alert) -> Result<(), DispatchError> {
        self.post_embed(
            &format!("\u{2705} {} resolved", alert.rule_name),
            format!("{}/{} is back to normal", alert.target_name, alert.instance_name),
            0x2ECC71,
        )
        .await
    }
}

pub struct MattermostChannel {
    client: reqwest::Client,
    config: MattermostChannelConfig,
}

impl MattermostChannel {
    pub fn new(config: MattermostChannelConfig) -> Self {
        Self {
            client: reqwest::Client::builder()
                .timeout(HTTP_CHANNEL_TIMEOUT)
                .build()
                .expect("failed to build HTTP client"),
            config,
        }
    }

    async fn post(&self, text: String) -> Result<(), DispatchError> {
        let body = json!({ "text": text, "channel": self.config.channel });
        self.client
            .post(&self.config.webhook_url)
            .json(&body)
            .send()
            .await
            .map_err(|e| DispatchError::Http {
                channel: self.name().to_string(),
                detail: e.to_string(),
            })?;
        Ok(())
    }
}

#[async_trait]
impl Channel for MattermostChannel {
    fn name(&self) -> &str {
        "mattermost"
    }

    fn is_enabled(&self) -> bool {
        self.config.enabled
    }

    async fn send(&self, alert: &Alert) -> Result<(), DispatchError> {
        self.post(format!(
            "**{}** fired on {}/{}: {}",
            alert.rule_name, alert.target_name, alert.instance_name, alert.message
        ))
        .await
    }

    async fn send_resolved(&self, alert: &Alert) -> Result<(), DispatchError> {
        self.post(format!(
            "**{}** resolved on {}/{}",
            alert.rule_name, alert.target_name, alert.instance_name
        ))
        .await
    }
}

pub struct WebhookChannel {
    client: reqwest::Client,
    config: WebhookChannelConfig,
}

impl WebhookChannel {
    pub fn new(config: WebhookChannelConfig) -> Self {
        Self {
            client: reqwest::Client::builder()
                .timeout(HTTP_CHANNEL_TIMEOUT)
                .build()
                .expect("failed to build HTTP client"),
            config,
        }
    }

    async fn post(&self, payload: serde_json::Value) -> Result<(), DispatchError> {
        let mut request = self.client.post(&self.config.url).json(&payload);
        if let Some(token) = &self.config.token {
            request = request.bearer_auth(token);
        }
        request.send().await.map_err(|e| DispatchError::Http {
            channel: self.name().to_string(),
            detail: e.to_string(),
        })?;
        Ok(())
    }
}

#[async_trait]
impl Channel for WebhookChannel {
    fn name(&self) -> &str {
        "webhook"
    }

    fn is_enabled(&self) -> bool {
        self.config.enabled
    }

    async fn send(&self, alert: &Alert) -> Result<(), DispatchError> {
        self.post(json!({ "event": "fired", "alert": alert })).await
    }

    async fn send_resolved(&self, alert: &Alert) -> Result<(), DispatchError> {
        self.post(json!({ "event": "resolved", "alert": alert })).await
    }
}

pub struct NotionChannel {
    client: reqwest::Client,
    config: NotionChannelConfig,
}

impl NotionChannel {
    pub fn new(config: NotionChannelConfig) -> Self {
        Self {
            client: reqwest::Client::builder()
                .timeout(NOTION_TIMEOUT)
                .build()
                .expect("failed to build HTTP client"),
            config,
        }
    }

    async fn create_page(&self, title: String) -> Result<(), DispatchError> {
        let body = json!({
            "parent": { "database_id": self.config.database_id },
            "properties": {
                "Name": { "title": [{ "text": { "content": title } }] }
            }
        });

        self.client
            .post("https://api.notion.com/v1/pages")
            .bearer_auth(&self.config.token)
            .header("Notion-Version", "2022-06-28")
            .json(&body)
            .send()
            .await
            .map_err(|e| DispatchError::Http {
                channel: self.name().to_string(),
                detail: e.to_string(),
            })?;
        Ok(())
    }
}

#[async_trait]
impl Channel for NotionChannel {
    fn name(&self) -> &str {
        "notion"
    }

    fn is_enabled(&self) -> bool {
        self.config.enabled
    }

    async fn send(&self, alert: &Alert) -> Result<(), DispatchError> {
        self.create_page(format!(
            "[FIRED] {} on {}/{}",
            alert.rule_name, alert.target_name, alert.instance_name
        ))
        .await
    }

    async fn send_resolved(&self, alert: &Alert) -> Result<(), DispatchError> {
        self.create_page(format!(
            "[RESOLVED] {} on {}/{}",
            alert.rule_name, alert.target_name, alert.instance_name
        ))
        .await
    }
}

/// Builds an RFC-822 message with an HTML body and sends it over SMTP via
/// `lettre`. Authentication is PLAIN when `username` is non-empty; the
/// entire conversation respects the configured connect/total deadlines.
pub struct EmailChannel {
    config: EmailChannelConfig,
}

impl EmailChannel {
    pub fn new(config: EmailChannelConfig) -> Self {
        Self { config }
    }

    fn build_transport(&self) -> Result<lettre::AsyncSmtpTransport<lettre::Tokio1Executor>, DispatchError> {
        use lettre::transport::smtp::{authentication::Credentials, client::Tls};

        let mut builder =
            lettre::AsyncSmtpTransport::<lettre::Tokio1Executor>::builder_dangerous(&self.config.smtp_host)
                .port(self.config.smtp_port)
                .timeout(Some(SMTP_TOTAL_TIMEOUT));

        if self.config.use_tls {
            builder = builder.tls(Tls::Required(
                lettre::transport::smtp::client::TlsParameters::new(self.config.smtp_host.clone())
                    .map_err(|e| DispatchError::Smtp {
                        channel: self.name().to_string(),
                        detail: e.to_string(),
                    })?,
            ));
        }

        if let Some(username) = &self.config.username {
            builder = builder.credentials(Credentials::new(
                username.clone(),
                self.config.password.clone().unwrap_or_default(),
            ));
        }

        Ok(builder.build())
    }

    async fn send_mail(&self, subject: String, html_body: String) -> Result<(), DispatchError> {
        use lettre::AsyncTransport;
        use lettre::message::{Message, header::ContentType};

        let mut message_builder = Message::builder()
            .from(self.config.from.parse().map_err(|e: lettre::address::AddressError| {
                DispatchError::Smtp {
                    channel: self.name().to_string(),
                    detail: e.to_string(),
                }
            })?)
            .subject(subject);

        for to in &self.config.to {
            message_builder = message_builder.to(to.parse().map_err(|e: lettre::address::AddressError| {
                DispatchError::Smtp {
                    channel: self.name().to_string(),
                    detail: e.to_string(),
                }
            })?);
        }

        let email = message_builder
            .header(ContentType::TEXT_HTML)
            .body(html_body)
            .map_err(|e| DispatchError::Smtp {
                channel: self.name().to_string(),
                detail: e.to_string(),
            })?;

        let transport = self.build_transport()?;
        tokio::time::timeout(SMTP_CONNECT_TIMEOUT + SMTP_TOTAL_TIMEOUT, transport.send(email))
            .await
            .map_err(|_| DispatchError::Smtp {
                channel: self.name().to_string(),
                detail: "deadline exceeded".to_string(),
            })?
            .map_err(|e| DispatchError::Smtp {
                channel: self.name().to_string(),
                detail: e.to_string(),
            })?;

        Ok(())
    }
}

#[async_trait]
impl Channel for EmailChannel {
    fn name(&self) -> &str {
        "email"
    }

    fn is_enabled(&self) -> bool {
        self.config.enabled
    }

    async fn send(&self, alert: &Alert) -> Result<(), DispatchError> {
        self.send_mail(
            format!("[{:?}] {}", alert.severity, alert.rule_name),
            format!(
                "<p><b>{}</b> fired on {}/{}</p><p>{}</p>",
                alert.rule_name, alert.target_name, alert.instance_name, alert.message
            ),
        )
        .await
    }

    async fn send_resolved(&self, alert: &Alert) -> Result<(), DispatchError> {
        self.send_mail(
            format!("[resolved] {}", alert.rule_name),
            format!(
                "<p><b>{}</b> resolved on {}/{}</p>",
                alert.rule_name, alert.target_name, alert.instance_name
            ),
        )
        .await
    }
}

/// A generic HTTP channel supporting configurable retry with linear
/// backoff — no exponential backoff, since `retry_count` is small and
/// bounded per event (`SPEC_FULL.md` §9).
pub struct PluginChannel {
    client: reqwest::Client,
    config: PluginChannelConfig,
}

impl PluginChannel {
    pub fn new(config: PluginChannelConfig) -> Self {
        Self {
            client: reqwest::Client::builder()
                .timeout(Duration::from_secs(config.timeout_secs))
                .build()
                .expect("failed to build HTTP client"),
            config,
        }
    }

    async fn post_with_retry(&self, payload: serde_json::Value) -> Result<(), DispatchError> {
        let method = match self.config.method {
            crate::config::HttpMethod::Post => reqwest::Method::POST,
            crate::config::HttpMethod::Get => reqwest::Method::GET,
            crate::config::HttpMethod::Put => reqwest::Method::PUT,
        };

        let mut attempt = 0;
        loop {
            let mut request = self.client.request(method.clone(), &self.config.url).json(&payload);
            for (key, value) in &self.config.headers {
                request = request.header(key.as_str(), value.as_str());
            }

            match request.send().await {
                Ok(response) if response.status().is_success() => return Ok(()),
                Ok(response) => {
                    warn!(channel = %self.config.name, status = %response.status(), "plugin channel non-success status");
                }
                Err(e) => {
                    warn!(channel = %self.config.name, error = %e, "plugin channel request failed");
                }
            }

            if attempt >= self.config.retry_count {
                return Err(DispatchError::Http {
                    channel: self.config.name.clone(),
                    detail: format!("failed after {} attempt(s)", attempt + 1),
                });
            }
            attempt += 1;
            tokio::time::sleep(Duration::from_secs(self.config.retry_delay_secs)).await;
        }
    }
}

#[async_trait]
impl Channel for PluginChannel {
    fn name(&self) -> &str {
        &self.config.name
    }

    fn is_enabled(&self) -> bool {
        self.config.enabled
    }

    async fn send(&self, alert: &Alert) -> Result<(), DispatchError> {
        self.post_with_retry(json!({ "event": "fired", "alert": alert })).await
    }

    async fn send_resolved(&self, alert: &Alert) -> Result<(), DispatchError> {
        self.post_with_retry(json!({ "event": "resolved", "alert": alert })).await
    }
}

pub fn build_channels(config: &crate::config::ChannelsConfig) -> Vec<Box<dyn Channel>> {
    let mut channels: Vec<Box<dyn Channel>> = Vec::new();

    if let Some(c) = &config.slack {
        channels.push(Box::new(SlackChannel::new(c.clone())));
    }
    if let Some(c) = &config.discord {
        channels.push(Box::new(DiscordChannel::new(c.clone())));
    }
    if let Some(c) = &config.mattermost {
        channels.push(Box::new(MattermostChannel::new(c.clone())));
    }
    if let Some(c) = &config.webhook {
        channels.push(Box::new(WebhookChannel::new(c.clone())));
    }
    if let Some(c) = &config.email {
        channels.push(Box::new(EmailChannel::new(c.clone())));
    }
    if let Some(c) = &config.notion {
        channels.push(Box::new(NotionChannel::new(c.clone())));
    }
    for plugin in &config.plugins {
        channels.push(Box::new(PluginChannel::new(plugin.clone())));
    }

    channels
}

/// Fan out sequentially over every channel. A disabled channel
/// short-circuits to success without an I/O attempt. A failing channel
/// logs and continues — other channels still receive the alert.
#[instrument(skip(channels, alert))]
pub async fn dispatch_fired(channels: &[Box<dyn Channel>], alert: &Alert) -> Vec<String> {
    let mut notified = Vec::new();
    for channel in channels {
        if !channel.is_enabled() {
            continue;
        }
        match channel.send(alert).await {
            Ok(()) => {
                info!(channel = channel.name(), "dispatched alert");
                notified.push(channel.name().to_string());
            }
            Err(e) => error!(channel = channel.name(), error = %e, "dispatch failed"),
        }
    }
    notified
}

pub async fn dispatch_resolved(channels: &[Box<dyn Channel>], alert: &Alert) {
    for channel in channels {
        if !channel.is_enabled() {
            continue;
        }
        if let Err(e) = channel.send_resolved(alert).await {
            error!(channel = channel.name(), error = %e, "resolve dispatch failed");
        }
    }
}

/// Selects the subset of channels by name for `TestAlert` dispatch
/// (`SPEC_FULL.md` §4.5.5). Empty `names` means all channels.
pub fn select_channels<'a>(channels: &'a [Box<dyn Channel>], names: &[String]) -> Vec<&'a dyn Channel> {
    if names.is_empty() {
        return channels.iter().map(|c| c.as_ref()).collect();
    }
    channels
        .iter()
        .filter(|c| names.iter().any(|n| n == c.name()))
        .map(|c| c.as_ref())
        .collect()
}
