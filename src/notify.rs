use async_trait::async_trait;
use chrono::{DateTime, Local};
use log::{info, warn};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::config::ChannelConfig;
use crate::debounce::Transition;
use crate::error::Error;

const DELIVERY_TIMEOUT: Duration = Duration::from_secs(10);

/// A status change ready for delivery: which host, what happened, when.
#[derive(Debug, Clone)]
pub struct TransitionEvent {
    pub address: String,
    pub label: String,
    pub transition: Transition,
    pub timestamp: DateTime<Local>,
}

/// One capability per channel: push a text message to one recipient.
/// Adding a channel means adding an implementation, nothing else changes.
#[async_trait]
pub trait ChannelSender: Send + Sync {
    async fn send(&self, recipient: &str, text: &str) -> Result<(), Error>;
}

/// Renders transition events and fans them out to every configured
/// recipient on the active channel. Delivery is best-effort: a failed
/// recipient is logged and never blocks the others or the monitoring round.
pub struct Notifier {
    sender: Box<dyn ChannelSender>,
    recipients: Vec<String>,
}

impl Notifier {
    pub fn new(sender: Box<dyn ChannelSender>, recipients: Vec<String>) -> Notifier {
        Notifier { sender, recipients }
    }

    pub fn from_config(channel: &ChannelConfig) -> Notifier {
        match channel {
            ChannelConfig::Telegram {
                bot_token,
                chat_ids,
            } => Notifier::new(
                Box::new(TelegramSender::new(bot_token.clone().unwrap_or_default())),
                chat_ids.clone(),
            ),
            ChannelConfig::Dingtalk { webhook_urls } => {
                Notifier::new(Box::new(DingTalkSender::new()), webhook_urls.clone())
            }
        }
    }

    /// Returns true if at least one recipient received the message.
    pub async fn notify(&self, event: &TransitionEvent) -> bool {
        let text = render_message(event);
        let mut delivered = false;

        for recipient in &self.recipients {
            match self.sender.send(recipient, &text).await {
                Ok(()) => {
                    info!("Notified {recipient} about {}", event.address);
                    delivered = true;
                }
                Err(e) => warn!("Failed to notify {recipient} about {}: {e}", event.address),
            }
        }

        if !delivered {
            warn!("No recipient received the notification for {}", event.address);
        }
        delivered
    }
}

fn render_message(event: &TransitionEvent) -> String {
    let label = if event.label.is_empty() {
        event.address.clone()
    } else {
        escape_markdown(&event.label)
    };
    let timestamp = event.timestamp.format("%Y-%m-%d %H:%M:%S");

    match event.transition {
        Transition::Online => format!(
            "\u{1f7e2} *{label}* ({}) is back ONLINE\nTime: {timestamp}",
            event.address
        ),
        Transition::Offline { failure_count } => format!(
            "\u{1f534} *{label}* ({}) went OFFLINE after {failure_count} consecutive failed checks\nTime: {timestamp}",
            event.address
        ),
    }
}

/// Escapes the characters Telegram's legacy Markdown mode treats as
/// formatting. Labels are operator free text; an unescaped `_` or `*` in
/// one makes the Bot API reject the whole message with a 400.
fn escape_markdown(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for c in text.chars() {
        if matches!(c, '_' | '*' | '`' | '[') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

/// Pushes messages through the Telegram Bot API; recipients are chat ids.
pub struct TelegramSender {
    client: Client,
    bot_token: String,
}

impl TelegramSender {
    pub fn new(bot_token: String) -> TelegramSender {
        TelegramSender {
            client: Client::new(),
            bot_token,
        }
    }
}

#[derive(Serialize)]
struct TelegramMessage<'a> {
    chat_id: &'a str,
    text: &'a str,
    parse_mode: &'a str,
}

#[async_trait]
impl ChannelSender for TelegramSender {
    async fn send(&self, recipient: &str, text: &str) -> Result<(), Error> {
        let api_url = format!("https://api.telegram.org/bot{}/sendMessage", self.bot_token);
        let payload = TelegramMessage {
            chat_id: recipient,
            text,
            parse_mode: "Markdown",
        };

        let response = self
            .client
            .post(&api_url)
            .timeout(DELIVERY_TIMEOUT)
            .json(&payload)
            .send()
            .await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Delivery(format!(
                "Telegram API returned {status}: {body}"
            )));
        }
        Ok(())
    }
}

/// Pushes text messages to DingTalk group robots; recipients are webhook
/// URLs. The webhook answers 200 even on failure, so success is judged by
/// the errcode in the JSON body.
pub struct DingTalkSender {
    client: Client,
}

impl DingTalkSender {
    pub fn new() -> DingTalkSender {
        DingTalkSender {
            client: Client::new(),
        }
    }
}

impl Default for DingTalkSender {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Serialize)]
struct DingTalkMessage<'a> {
    msgtype: &'a str,
    text: DingTalkText<'a>,
}

#[derive(Serialize)]
struct DingTalkText<'a> {
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct DingTalkResponse {
    errcode: i64,
    #[serde(default)]
    errmsg: String,
}

#[async_trait]
impl ChannelSender for DingTalkSender {
    async fn send(&self, recipient: &str, text: &str) -> Result<(), Error> {
        let payload = DingTalkMessage {
            msgtype: "text",
            text: DingTalkText { content: text },
        };

        let response: DingTalkResponse = self
            .client
            .post(recipient)
            .timeout(DELIVERY_TIMEOUT)
            .json(&payload)
            .send()
            .await?
            .json()
            .await?;

        if response.errcode != 0 {
            return Err(Error::Delivery(format!(
                "DingTalk webhook returned errcode {}: {}",
                response.errcode, response.errmsg
            )));
        }
        Ok(())
    }
}
