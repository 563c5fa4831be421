//! Configuration layer: a raw, `serde_json`-deserialized [`Config`] resolved
//! into an unambiguous [`ResolvedConfig`] before anything touches the actors.

use std::path::PathBuf;

use tracing::trace;

use crate::alerts::condition::Condition;
use crate::model::{Severity, Target};

/// Storage backend configuration. Kept close to the teacher's tagged-enum
/// shape, since nothing about Pondy's storage needs differ from it.
#[derive(Debug, Clone, serde::Deserialize)]
#[serde(tag = "backend", rename_all = "lowercase")]
pub enum StorageConfig {
    #[serde(rename = "none")]
    None,
    Sqlite {
        #[serde(default = "default_sqlite_path")]
        path: PathBuf,
        #[serde(default = "default_retention_days")]
        retention_days: u32,
        #[serde(default = "default_cleanup_interval_hours")]
        cleanup_interval_hours: u32,
    },
}

impl StorageConfig {
    pub fn validate(&self) -> Result<(), String> {
        match self {
            StorageConfig::None => Ok(()),
            StorageConfig::Sqlite {
                retention_days,
                cleanup_interval_hours,
                ..
            } => {
                if *retention_days < 1 {
                    return Err("retention_days must be at least 1".to_string());
                }
                if *retention_days > 3650 {
                    return Err("retention_days cannot exceed 3650 (10 years)".to_string());
                }
                if *cleanup_interval_hours < 1 {
                    return Err("cleanup_interval_hours must be at least 1".to_string());
                }
                if *cleanup_interval_hours > 720 {
                    return Err("cleanup_interval_hours cannot exceed 720 (30 days)".to_string());
                }

                let retention_hours = *retention_days as u64 * 24;
                if (*cleanup_interval_hours as u64) > retention_hours {
                    tracing::warn!(
                        "cleanup_interval_hours ({}) is longer than retention period ({} hours). \
                         Old data may accumulate.",
                        cleanup_interval_hours,
                        retention_hours
                    );
                }

                Ok(())
            }
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        StorageConfig::Sqlite {
            path: default_sqlite_path(),
            retention_days: default_retention_days(),
            cleanup_interval_hours: default_cleanup_interval_hours(),
        }
    }
}

fn default_sqlite_path() -> PathBuf {
    PathBuf::from("./pondy.db")
}

fn default_retention_days() -> u32 {
    30
}

fn default_cleanup_interval_hours() -> u32 {
    24
}

/// Raw, unresolved configuration as read from the host's config file.
#[derive(Debug, Clone, serde::Deserialize)]
pub struct Config {
    pub targets: Vec<TargetConfig>,
    #[serde(default)]
    pub alerting: AlertingConfig,
    #[serde(default)]
    pub storage: Option<StorageConfig>,
    #[serde(default)]
    pub settings: SettingsConfig,
}

#[derive(Debug, Clone, serde::Deserialize)]
pub struct TargetConfig {
    pub name: String,
    #[serde(default)]
    pub group: String,
    #[serde(default = "default_interval_secs")]
    pub interval_secs: u64,
    pub endpoint: Option<String>,
    pub instances: Option<Vec<crate::model::TargetInstance>>,
}

fn default_interval_secs() -> u64 {
    15
}

impl TargetConfig {
    pub fn resolve(self) -> anyhow::Result<Target> {
        let endpoints = match (self.endpoint, self.instances) {
            (Some(endpoint), None) => crate::model::TargetEndpoints::Single(endpoint),
            (None, Some(instances)) if !instances.is_empty() => {
                crate::model::TargetEndpoints::Instances(instances)
            }
            _ => anyhow::bail!(
                "target '{}' must set exactly one of `endpoint` or `instances`",
                self.name
            ),
        };

        Ok(Target {
            name: self.name,
            group: self.group,
            target_type: crate::model::TargetType::Actuator,
            interval_secs: self.interval_secs,
            endpoints,
        })
    }
}

#[derive(Debug, Clone, Default, serde::Deserialize)]
pub struct SettingsConfig {
    /// IANA timezone name used for hour-bucketing in Analytics. Defaults to UTC.
    pub timezone: Option<String>,
}

#[derive(Debug, Clone, serde::Deserialize)]
pub struct AlertingConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Parsed and validated, but has no runtime effect: evaluation is
    /// sample-driven, not timer-driven. See `SPEC_FULL.md` §9.
    #[serde(default = "default_check_interval_secs")]
    pub check_interval_secs: u64,
    #[serde(default = "default_cooldown_secs")]
    pub cooldown_secs: u64,
    #[serde(default)]
    pub channels: ChannelsConfig,
    #[serde(default)]
    pub rules: Vec<RuleConfig>,
}

impl Default for AlertingConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            check_interval_secs: default_check_interval_secs(),
            cooldown_secs: default_cooldown_secs(),
            channels: ChannelsConfig::default(),
            rules: Vec::new(),
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_check_interval_secs() -> u64 {
    60
}

fn default_cooldown_secs() -> u64 {
    300
}

#[derive(Debug, Clone, serde::Deserialize)]
pub struct RuleConfig {
    pub name: String,
    pub condition: String,
    pub severity: Severity,
    pub message_template: String,
    #[serde(default = "default_true")]
    pub enabled: bool,
}

impl RuleConfig {
    pub fn resolve(self) -> anyhow::Result<crate::model::AlertRule> {
        Condition::parse(&self.condition)
            .map_err(|e| anyhow::anyhow!("rule '{}': invalid condition: {e}", self.name))?;

        Ok(crate::model::AlertRule {
            name: self.name,
            condition: self.condition,
            severity: self.severity,
            message_template: self.message_template,
            enabled: self.enabled,
        })
    }
}

#[derive(Debug, Clone, Default, serde::Deserialize)]
pub struct ChannelsConfig {
    pub slack: Option<SlackChannelConfig>,
    pub discord: Option<DiscordChannelConfig>,
    pub mattermost: Option<MattermostChannelConfig>,
    pub webhook: Option<WebhookChannelConfig>,
    pub email: Option<EmailChannelConfig>,
    pub notion: Option<NotionChannelConfig>,
    #[serde(default)]
    pub plugins: Vec<PluginChannelConfig>,
}

#[derive(Debug, Clone, serde::Deserialize)]
pub struct SlackChannelConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    pub webhook_url: String,
    pub channel: Option<String>,
}

#[derive(Debug, Clone, serde::Deserialize)]
pub struct DiscordChannelConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    pub webhook_url: String,
}

#[derive(Debug, Clone, serde::Deserialize)]
pub struct MattermostChannelConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    pub webhook_url: String,
    pub channel: Option<String>,
}

#[derive(Debug, Clone, serde::Deserialize)]
pub struct WebhookChannelConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    pub url: String,
    pub token: Option<String>,
}

#[derive(Debug, Clone, serde::Deserialize)]
pub struct EmailChannelConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    pub smtp_host: String,
    #[serde(default = "default_smtp_port")]
    pub smtp_port: u16,
    pub username: Option<String>,
    pub password: Option<String>,
    pub from: String,
    pub to: Vec<String>,
    #[serde(default = "default_true")]
    pub use_tls: bool,
}

fn default_smtp_port() -> u16 {
    587
}

#[derive(Debug, Clone, serde::Deserialize)]
pub struct NotionChannelConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    pub token: String,
    pub database_id: String,
}

#[derive(Debug, Clone, serde::Deserialize)]
pub struct PluginChannelConfig {
    pub name: String,
    #[serde(default = "default_true")]
    pub enabled: bool,
    pub url: String,
    #[serde(default)]
    pub method: HttpMethod,
    #[serde(default)]
    pub headers: std::collections::HashMap<String, String>,
    #[serde(default = "default_plugin_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default)]
    pub retry_count: u32,
    #[serde(default = "default_plugin_retry_delay_secs")]
    pub retry_delay_secs: u64,
}

fn default_plugin_timeout_secs() -> u64 {
    10
}

fn default_plugin_retry_delay_secs() -> u64 {
    2
}

#[derive(Debug, Default, Clone, serde::Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum HttpMethod {
    #[default]
    Post,
    Get,
    Put,
}

pub fn read_config_file(path: &str) -> anyhow::Result<Config> {
    let file_content = std::fs::read_to_string(path)?;
    serde_json::from_str(&file_content)
        .map_err(|e| anyhow::anyhow!("invalid configuration file: {e}"))
        .inspect(|config| trace!("loaded config: {config:?}"))
}

/// Configuration with every ambiguity resolved: rule conditions have been
/// parsed once, targets are fully-formed, defaults are inlined.
#[derive(Debug, Clone)]
pub struct ResolvedConfig {
    pub targets: Vec<Target>,
    pub alerting: ResolvedAlertingConfig,
    pub storage: StorageConfig,
    pub timezone: chrono_tz::Tz,
}

#[derive(Debug, Clone)]
pub struct ResolvedAlertingConfig {
    pub enabled: bool,
    pub check_interval_secs: u64,
    pub cooldown_secs: u64,
    pub channels: ChannelsConfig,
    pub rules: Vec<crate::model::AlertRule>,
}

impl Config {
    /// Resolve configuration: parse and validate every rule condition,
    /// validate storage settings, default-fill the timezone, and turn every
    /// `TargetConfig` into a fully-formed `Target`. Rejects the whole
    /// configuration on the first error — reload keeps the previous config
    /// (see `SPEC_FULL.md` §7).
    pub fn resolve(self) -> anyhow::Result<ResolvedConfig> {
        let storage = self.storage.unwrap_or_default();
        storage.validate().map_err(|e| anyhow::anyhow!(e))?;

        let timezone = match self.settings.timezone {
            Some(name) => name
                .parse::<chrono_tz::Tz>()
                .map_err(|_| anyhow::anyhow!("invalid timezone: '{name}'"))?,
            None => chrono_tz::UTC,
        };

        let targets = self
            .targets
            .into_iter()
            .map(TargetConfig::resolve)
            .collect::<anyhow::Result<Vec<_>>>()?;

        let mut names = std::collections::HashSet::new();
        for t in &targets {
            if !names.insert(t.name.clone()) {
                anyhow::bail!("duplicate target name: '{}'", t.name);
            }
        }

        let rules = self
            .alerting
            .rules
            .into_iter()
            .map(RuleConfig::resolve)
            .collect::<anyhow::Result<Vec<_>>>()?;

        Ok(ResolvedConfig {
            targets,
            alerting: ResolvedAlertingConfig {
                enabled: self.alerting.enabled,
                check_interval_secs: self.alerting.check_interval_secs,
                cooldown_secs: self.alerting.cooldown_secs,
                channels: self.alerting.channels,
                rules,
            },
            storage,
            timezone,
        })
    }
}
