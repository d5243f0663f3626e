use serde::Deserialize;
use std::{fs, path::Path};
use url::{Host, Url};

use crate::error::Error;

#[derive(Debug, Deserialize)]
pub struct Config {
    pub monitor: MonitorOptions,
    pub channel: ChannelConfig,
    #[serde(default)]
    pub hosts: Vec<HostEntry>,
}

#[derive(Debug, Deserialize)]
pub struct MonitorOptions {
    pub poll_interval_secs: u64,
    pub offline_threshold: u32,
    #[serde(default = "default_probe_timeout_secs")]
    pub probe_timeout_secs: u64,
    #[serde(default = "default_rounds_per_invocation")]
    pub rounds_per_invocation: u32,
}

fn default_probe_timeout_secs() -> u64 {
    2
}

fn default_rounds_per_invocation() -> u32 {
    10
}

/// One monitored endpoint: an IPv4 address or a domain name, plus a
/// free-text label used in notifications.
#[derive(Debug, Clone, Deserialize)]
pub struct HostEntry {
    pub address: String,
    #[serde(default)]
    pub label: String,
}

/// The active notification channel. Exactly one is configured per run.
#[derive(Debug, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum ChannelConfig {
    Telegram {
        bot_token: Option<String>,
        chat_ids: Vec<String>,
    },
    Dingtalk {
        webhook_urls: Vec<String>,
    },
}

impl Config {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Config, Error> {
        let content = fs::read_to_string(path)?;
        let mut config: Config = toml::from_str(&content)?;

        // if bot_token is not set use env with dotenvy
        if let ChannelConfig::Telegram { bot_token, .. } = &mut config.channel {
            if bot_token.is_none() {
                *bot_token = Some(dotenvy::var("TELEGRAM_BOT_TOKEN")?);
            }
        }

        config.validate()?;
        Ok(config)
    }

    /// Rejects invalid monitoring parameters, missing channel credentials
    /// and malformed host addresses before any probing starts.
    pub fn validate(&self) -> Result<(), Error> {
        if self.monitor.poll_interval_secs == 0 {
            return Err(Error::Config(
                "poll_interval_secs must be positive".to_string(),
            ));
        }
        if self.monitor.offline_threshold == 0 {
            return Err(Error::Config(
                "offline_threshold must be positive".to_string(),
            ));
        }
        if self.monitor.probe_timeout_secs == 0 {
            return Err(Error::Config(
                "probe_timeout_secs must be positive".to_string(),
            ));
        }
        if self.monitor.rounds_per_invocation == 0 {
            return Err(Error::Config(
                "rounds_per_invocation must be positive".to_string(),
            ));
        }

        match &self.channel {
            ChannelConfig::Telegram {
                bot_token,
                chat_ids,
            } => {
                if bot_token.as_deref().is_none_or(str::is_empty) {
                    return Err(Error::Config(
                        "telegram channel requires a bot_token".to_string(),
                    ));
                }
                if chat_ids.is_empty() {
                    return Err(Error::Config(
                        "telegram channel requires at least one chat_id".to_string(),
                    ));
                }
            }
            ChannelConfig::Dingtalk { webhook_urls } => {
                if webhook_urls.is_empty() {
                    return Err(Error::Config(
                        "dingtalk channel requires at least one webhook_url".to_string(),
                    ));
                }
                for webhook_url in webhook_urls {
                    Url::parse(webhook_url)?;
                }
            }
        }

        for host in &self.hosts {
            validate_address(&host.address)?;
        }

        Ok(())
    }
}

/// Accepts an IPv4 literal or a domain name; everything else (including
/// IPv6 literals) is a configuration error.
fn validate_address(address: &str) -> Result<(), Error> {
    match Host::parse(address) {
        Ok(Host::Ipv4(_) | Host::Domain(_)) => Ok(()),
        Ok(Host::Ipv6(_)) => Err(Error::Config(format!(
            "host address must be IPv4 or a domain name: {address}"
        ))),
        Err(_) => Err(Error::Config(format!(
            "malformed host address: {address}"
        ))),
    }
}
