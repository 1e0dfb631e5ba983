use crate::delivery::format::{split_message, strip_html, TELEGRAM_MAX_CHARS};
use crate::delivery::{DeliveryChannel, DeliveryError, Receipt};
use crate::model::Destination;
use async_trait::async_trait;
use std::time::Duration;
use teloxide::prelude::*;
use teloxide::types::{ParseMode, Recipient};
use teloxide::{ApiError, RequestError};
use tracing::{info, instrument, warn};

/// Broadcasts to every configured chat; succeeds when at least one chat
/// accepted the whole message.
pub struct TelegramChannel {
    bot: Bot,
    chat_ids: Vec<String>,
    pause: Duration,
}

impl TelegramChannel {
    pub fn new(bot_token: &str, chat_ids: Vec<String>) -> Self {
        Self {
            bot: Bot::new(bot_token),
            chat_ids,
            pause: Duration::from_secs(1),
        }
    }

    pub fn with_pause(mut self, pause: Duration) -> Self {
        self.pause = pause;
        self
    }

    async fn send_part(&self, chat: &Recipient, text: &str) -> Result<i32, DeliveryError> {
        let sent = self
            .bot
            .send_message(chat.clone(), text)
            .parse_mode(ParseMode::Html)
            .disable_web_page_preview(true)
            .await;
        match sent {
            Ok(msg) => Ok(msg.id.0),
            Err(err) if cant_parse_entities(&err) => {
                warn!(%err, "telegram rejected HTML; resending as plain text");
                self.bot
                    .send_message(chat.clone(), strip_html(text))
                    .disable_web_page_preview(true)
                    .await
                    .map(|msg| msg.id.0)
                    .map_err(map_error)
            }
            Err(err) => Err(map_error(err)),
        }
    }

    async fn send_to_chat(&self, chat: &Recipient, parts: &[String]) -> Result<Vec<i32>, DeliveryError> {
        let mut ids = Vec::with_capacity(parts.len());
        for (i, part) in parts.iter().enumerate() {
            if i > 0 {
                tokio::time::sleep(self.pause).await;
            }
            ids.push(self.send_part(chat, part).await?);
        }
        Ok(ids)
    }
}

/// Numeric ids become chat ids; anything else is treated as a channel username.
pub fn parse_recipient(raw: &str) -> Option<Recipient> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }
    if let Ok(id) = raw.parse::<i64>() {
        return Some(Recipient::Id(ChatId(id)));
    }
    let name = if raw.starts_with('@') {
        raw.to_string()
    } else {
        format!("@{}", raw)
    };
    Some(Recipient::ChannelUsername(name))
}

/// Telegram reports markup errors as "Bad Request: can't parse entities: ...",
/// which teloxide only maps to the dedicated variant when the text matches
/// exactly.
fn cant_parse_entities(err: &RequestError) -> bool {
    match err {
        RequestError::Api(ApiError::CantParseEntities) => true,
        RequestError::Api(ApiError::Unknown(text)) => text.contains("can't parse entities"),
        _ => false,
    }
}

fn map_error(err: RequestError) -> DeliveryError {
    match err {
        // A rejected bot token comes back as "Unauthorized", which teloxide
        // maps to `NotFound`.
        RequestError::Api(ApiError::NotFound) => DeliveryError::Unauthorized("invalid bot token".into()),
        RequestError::Api(api) => DeliveryError::Rejected(api.to_string()),
        other => DeliveryError::Transport(other.to_string()),
    }
}

#[async_trait]
impl DeliveryChannel for TelegramChannel {
    fn destination(&self) -> Destination {
        Destination::Telegram
    }

    async fn prepare(&self) -> Result<(), DeliveryError> {
        let me = self.bot.get_me().await.map_err(map_error)?;
        info!(bot = %me.username(), "telegram bot ready");
        Ok(())
    }

    async fn targets(&self) -> Result<Vec<String>, DeliveryError> {
        let targets: Vec<String> = self
            .chat_ids
            .iter()
            .filter(|c| parse_recipient(c).is_some())
            .cloned()
            .collect();
        if targets.is_empty() {
            return Err(DeliveryError::NoTargets);
        }
        Ok(targets)
    }

    #[instrument(skip_all, fields(chats = targets.len()))]
    async fn send(&self, targets: &[String], content: &str) -> Result<Receipt, DeliveryError> {
        let parts = split_message(content, TELEGRAM_MAX_CHARS);
        let mut confirmations = Vec::new();
        let mut last_err = DeliveryError::NoTargets;
        for (i, raw) in targets.iter().enumerate() {
            let Some(chat) = parse_recipient(raw) else {
                continue;
            };
            if i > 0 {
                tokio::time::sleep(self.pause).await;
            }
            match self.send_to_chat(&chat, &parts).await {
                Ok(ids) => {
                    info!(chat = %raw, parts = ids.len(), "telegram message delivered");
                    let ids: Vec<String> = ids.iter().map(ToString::to_string).collect();
                    confirmations.push(format!("{}:{}", raw, ids.join(",")));
                }
                Err(err) => {
                    warn!(?err, chat = %raw, "telegram delivery failed");
                    if matches!(err, DeliveryError::Unauthorized(_)) {
                        return Err(err);
                    }
                    last_err = err;
                }
            }
        }
        if confirmations.is_empty() {
            return Err(last_err);
        }
        Ok(Receipt::new(confirmations.join(";")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recipients_parse() {
        assert_eq!(parse_recipient("-100123"), Some(Recipient::Id(ChatId(-100123))));
        assert_eq!(
            parse_recipient("my_channel"),
            Some(Recipient::ChannelUsername("@my_channel".into()))
        );
        assert_eq!(
            parse_recipient(" @chan "),
            Some(Recipient::ChannelUsername("@chan".into()))
        );
        assert_eq!(parse_recipient("  "), None);
    }

    #[test]
    fn rejected_token_disables_the_channel() {
        assert!(matches!(
            map_error(RequestError::Api(ApiError::NotFound)),
            DeliveryError::Unauthorized(_)
        ));
        assert!(matches!(
            map_error(RequestError::Api(ApiError::BotBlocked)),
            DeliveryError::Rejected(_)
        ));
        assert!(matches!(
            map_error(RequestError::Api(ApiError::Unknown("Bad Request: chat not found".into()))),
            DeliveryError::Rejected(_)
        ));
    }

    #[test]
    fn markup_errors_fall_back_to_plain_text() {
        assert!(cant_parse_entities(&RequestError::Api(ApiError::CantParseEntities)));
        assert!(cant_parse_entities(&RequestError::Api(ApiError::Unknown(
            "Bad Request: can't parse entities: Unsupported start tag \"br\" at byte offset 12".into()
        ))));
        assert!(!cant_parse_entities(&RequestError::Api(ApiError::BotBlocked)));
        assert!(!cant_parse_entities(&RequestError::Api(ApiError::Unknown(
            "Bad Request: message is too long".into()
        ))));
    }

    #[tokio::test]
    async fn blank_chat_list_has_no_targets() {
        let channel = TelegramChannel::new("123:abc", vec![" ".into()]);
        assert_eq!(channel.targets().await, Err(DeliveryError::NoTargets));
    }
}
