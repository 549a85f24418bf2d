use crate::TERATAIL_BASE_URL;
use anyhow::{Context, Result};
use serde::Deserialize;
use std::{collections::HashSet, env, fs, io::ErrorKind, str::FromStr, time::Duration};
use tracing::{info, warn};
use utils::errors::{CONFIG_PARSE_FAILED, CONFIG_PATH_UNREADABLE};

const DEFAULT_CONFIG_PATH: &str = "teratail.yaml";
const DEFAULT_NOTIFY_TARGET: &str = "#general";
const DEFAULT_TAG: &str = "Python";
const DEFAULT_POLL_INTERVAL_SECS: u64 = 300;
const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;
const DEFAULT_STORE_URL: &str = "teratail_state.json";

/// How a question that matches several configured tags is announced.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DedupPolicy {
    /// Every tag is handled on its own, so a shared question is posted once per tag.
    #[default]
    PerTag,
    /// A question id is posted once per cycle, whichever tags matched it.
    AcrossTags,
}

impl FromStr for DedupPolicy {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "per_tag" => Ok(DedupPolicy::PerTag),
            "across_tags" => Ok(DedupPolicy::AcrossTags),
            other => Err(anyhow::anyhow!("unknown dedup policy: {other}")),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageStyle {
    /// `【{tag}】{title}\n{url}`
    #[default]
    Tag,
    /// `【New!】{title}\n{url}`
    New,
}

impl FromStr for MessageStyle {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "tag" => Ok(MessageStyle::Tag),
            "new" => Ok(MessageStyle::New),
            other => Err(anyhow::anyhow!("unknown message style: {other}")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct NotifierConfig {
    #[serde(alias = "notify_to")]
    pub notify_target: String,
    pub tags: Vec<String>,
    pub poll_interval_secs: u64,
    pub request_timeout_secs: u64,
    pub dedup_policy: DedupPolicy,
    pub message_style: MessageStyle,
    pub api_base_url: String,
    pub store_url: String,
    pub slack_webhook_url: Option<String>,
}

impl Default for NotifierConfig {
    fn default() -> Self {
        Self {
            notify_target: DEFAULT_NOTIFY_TARGET.to_string(),
            tags: vec![DEFAULT_TAG.to_string()],
            poll_interval_secs: DEFAULT_POLL_INTERVAL_SECS,
            request_timeout_secs: DEFAULT_REQUEST_TIMEOUT_SECS,
            dedup_policy: DedupPolicy::default(),
            message_style: MessageStyle::default(),
            api_base_url: TERATAIL_BASE_URL.to_string(),
            store_url: DEFAULT_STORE_URL.to_string(),
            slack_webhook_url: None,
        }
    }
}

impl NotifierConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    /// Parses YAML on top of the defaults; keys left out keep their default value.
    pub fn from_yaml_str(contents: &str) -> Result<Self> {
        let mut config: NotifierConfig =
            serde_yaml::from_str(contents).context(CONFIG_PARSE_FAILED)?;
        config.normalize();
        Ok(config)
    }

    /// Trims tags, drops empty and repeated ones, and lifts zero durations to one second.
    fn normalize(&mut self) {
        let mut seen = HashSet::new();
        self.tags = self
            .tags
            .iter()
            .map(|tag| tag.trim().to_string())
            .filter(|tag| !tag.is_empty() && seen.insert(tag.clone()))
            .collect();

        if self.tags.is_empty() {
            warn!("No tags configured, poll cycles will do nothing");
        }

        if self.poll_interval_secs == 0 {
            warn!("poll_interval_secs must be positive, using 1");
            self.poll_interval_secs = 1;
        }
        if self.request_timeout_secs == 0 {
            warn!("request_timeout_secs must be positive, using 1");
            self.request_timeout_secs = 1;
        }

        self.slack_webhook_url = self
            .slack_webhook_url
            .take()
            .map(|url| url.trim().to_string())
            .filter(|url| !url.is_empty());
    }
}

/// Loads `TERATAIL_CONFIG_PATH` (default `teratail.yaml`) over the defaults, then
/// applies environment overrides.
pub fn load() -> NotifierConfig {
    let path = env::var("TERATAIL_CONFIG_PATH").unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string());
    let mut config = match fs::read_to_string(&path) {
        Ok(contents) => match NotifierConfig::from_yaml_str(&contents) {
            Ok(config) => config,
            Err(err) => {
                warn!(error = %format!("{err:#}"), path = %path, "Failed to parse config, using defaults");
                NotifierConfig::default()
            }
        },
        Err(err) if err.kind() == ErrorKind::NotFound => {
            info!(path = %path, "Config file not found, using defaults");
            NotifierConfig::default()
        }
        Err(err) => {
            warn!(error = %err, path = %path, "{}, using defaults", CONFIG_PATH_UNREADABLE);
            NotifierConfig::default()
        }
    };

    apply_overrides(&mut config, |key| env::var(key).ok());
    config.normalize();

    info!(
        notify_target = %config.notify_target,
        tags = ?config.tags,
        poll_interval_secs = config.poll_interval_secs,
        dedup_policy = ?config.dedup_policy,
        message_style = ?config.message_style,
        slack = config.slack_webhook_url.is_some(),
        "Notifier config loaded"
    );

    config
}

/// `CHECK_TAGS` takes either a JSON list or a comma separated string.
fn parse_tag_list(value: &str) -> Result<Vec<String>> {
    let trimmed = value.trim();
    if trimmed.starts_with('[') {
        serde_json::from_str::<Vec<String>>(trimmed).context("CHECK_TAGS is not a JSON list of strings")
    } else {
        Ok(trimmed.split(',').map(str::to_string).collect())
    }
}

fn apply_overrides<F>(config: &mut NotifierConfig, lookup: F)
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(value) = lookup("NOTIFY_TO") {
        config.notify_target = value;
    }

    if let Some(value) = lookup("CHECK_TAGS") {
        match parse_tag_list(&value) {
            Ok(tags) => config.tags = tags,
            Err(err) => warn!(error = %err, "Failed to parse CHECK_TAGS override"),
        }
    } else if let Some(value) = lookup("CHECK_TAG") {
        config.tags = vec![value];
    }

    if let Some(value) = lookup("POLL_INTERVAL_SECS") {
        match value.trim().parse::<u64>() {
            Ok(secs) => config.poll_interval_secs = secs,
            Err(err) => warn!(error = %err, "Failed to parse POLL_INTERVAL_SECS override"),
        }
    }

    if let Some(value) = lookup("REQUEST_TIMEOUT_SECS") {
        match value.trim().parse::<u64>() {
            Ok(secs) => config.request_timeout_secs = secs,
            Err(err) => warn!(error = %err, "Failed to parse REQUEST_TIMEOUT_SECS override"),
        }
    }

    if let Some(value) = lookup("DEDUP_POLICY") {
        match value.parse::<DedupPolicy>() {
            Ok(policy) => config.dedup_policy = policy,
            Err(err) => warn!(error = %err, "Failed to parse DEDUP_POLICY override"),
        }
    }

    if let Some(value) = lookup("MESSAGE_STYLE") {
        match value.parse::<MessageStyle>() {
            Ok(style) => config.message_style = style,
            Err(err) => warn!(error = %err, "Failed to parse MESSAGE_STYLE override"),
        }
    }

    if let Some(value) = lookup("TERATAIL_API_BASE_URL") {
        config.api_base_url = value;
    }

    if let Some(value) = lookup("STORE_URL") {
        config.store_url = value;
    }

    if let Some(value) = lookup("SLACK_WEBHOOK_URL") {
        config.slack_webhook_url = Some(value);
    }
}
