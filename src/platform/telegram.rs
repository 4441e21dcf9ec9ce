use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use teloxide::prelude::*;
use teloxide::types::{MessageEntityKind, MessageId, ReplyParameters};
use tracing::{debug, info, warn};

use crate::platform::{parse_command, ChatKind, InboundEvent, Messenger};
use crate::relay::{Outcome, Relay};

/// `Messenger` backed by the Telegram Bot API
pub struct TelegramMessenger {
    bot: Bot,
}

impl TelegramMessenger {
    pub fn new(bot: Bot) -> Self {
        Self { bot }
    }
}

#[async_trait]
impl Messenger for TelegramMessenger {
    async fn send_text(&self, chat_id: i64, text: &str) -> Result<()> {
        self.bot.send_message(ChatId(chat_id), text).await?;
        Ok(())
    }

    async fn forward_message(
        &self,
        dest_chat_id: i64,
        src_chat_id: i64,
        message_id: i32,
    ) -> Result<i32> {
        let forwarded = self
            .bot
            .forward_message(ChatId(dest_chat_id), ChatId(src_chat_id), MessageId(message_id))
            .await?;
        Ok(forwarded.id.0)
    }

    async fn copy_message(
        &self,
        dest_chat_id: i64,
        src_chat_id: i64,
        message_id: i32,
        reply_to_message_id: i32,
    ) -> Result<()> {
        self.bot
            .copy_message(ChatId(dest_chat_id), ChatId(src_chat_id), MessageId(message_id))
            .reply_parameters(ReplyParameters::new(MessageId(reply_to_message_id)))
            .await?;
        Ok(())
    }
}

/// Ask Telegram who we are. Needed to drop our own messages.
pub async fn bot_user_id(bot: &Bot) -> Result<u64> {
    let me = bot
        .get_me()
        .await
        .context("Failed to fetch bot identity (getMe)")?;
    info!("Running as @{} ({})", me.username(), me.user.id);
    Ok(me.user.id.0)
}

/// Reduce a Telegram message to the fields routing looks at
pub fn to_event(msg: &Message, forward_chat_id: i64) -> InboundEvent {
    InboundEvent {
        sender_id: msg.from.as_ref().map(|user| user.id.0),
        chat_id: msg.chat.id.0,
        chat_kind: ChatKind::classify(msg.chat.id.0, msg.chat.is_private(), forward_chat_id),
        message_id: msg.id.0,
        reply_to_message_id: msg.reply_to_message().map(|reply| reply.id.0),
        command: leading_command(msg),
    }
}

/// Only a `bot_command` entity at the very start counts as a command.
/// Plain text such as `/home/me` or `/:)` is an ordinary message.
fn leading_command(msg: &Message) -> Option<String> {
    msg.parse_entities()?
        .iter()
        .find(|entity| {
            entity.start() == 0 && matches!(entity.kind(), MessageEntityKind::BotCommand)
        })
        .and_then(|entity| parse_command(entity.text()))
}

/// Run the long-polling dispatcher until shutdown.
///
/// Handler errors end up in `LoggingErrorHandler`; the dispatcher moves on
/// to the next update.
pub async fn run(relay: Arc<Relay>, bot: Bot) -> Result<()> {
    info!("Starting Telegram platform...");

    let handler = Update::filter_message().endpoint(handle_message);

    Dispatcher::builder(bot, handler)
        .dependencies(dptree::deps![relay])
        .default_handler(|upd| async move {
            warn!("Unhandled update: {:?}", upd.id);
        })
        .error_handler(LoggingErrorHandler::with_custom_text("relay"))
        .enable_ctrlc_handler()
        .build()
        .dispatch()
        .await;

    Ok(())
}

async fn handle_message(msg: Message, relay: Arc<Relay>) -> Result<()> {
    let event = to_event(&msg, relay.forward_chat_id());
    debug!("Inbound {:?}", event);

    match relay.handle(&event).await? {
        Outcome::Unrouted {
            reply_to_message_id,
        } => {
            debug!(
                "Reply {} in forward chat targets unknown message {}",
                event.message_id, reply_to_message_id
            );
        }
        outcome => debug!("Message {} handled: {:?}", event.message_id, outcome),
    }

    Ok(())
}
