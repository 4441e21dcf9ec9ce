pub mod telegram;

use anyhow::Result;
use async_trait::async_trait;

/// Where an inbound message was posted, relative to the relay.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChatKind {
    /// One-to-one chat between a user and the bot
    Private,
    /// Any other group, supergroup or channel
    Group,
    /// The designated chat that receives forwarded messages
    ForwardChat,
}

impl ChatKind {
    /// The forwarding chat wins over the platform's own chat type.
    pub fn classify(chat_id: i64, is_private: bool, forward_chat_id: i64) -> Self {
        if chat_id == forward_chat_id {
            ChatKind::ForwardChat
        } else if is_private {
            ChatKind::Private
        } else {
            ChatKind::Group
        }
    }
}

/// A message received from the platform, reduced to what routing needs
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundEvent {
    /// Author of the message, if the platform reports one
    pub sender_id: Option<u64>,
    pub chat_id: i64,
    pub chat_kind: ChatKind,
    pub message_id: i32,
    /// Id of the message this one replies to, within the same chat
    pub reply_to_message_id: Option<i32>,
    /// Bot command name without the leading slash or `@botname` suffix
    pub command: Option<String>,
}

/// Outbound primitives the relay needs from a messaging client.
#[async_trait]
pub trait Messenger: Send + Sync {
    async fn send_text(&self, chat_id: i64, text: &str) -> Result<()>;

    /// Forward with attribution. Returns the id of the new copy in `dest_chat_id`.
    async fn forward_message(
        &self,
        dest_chat_id: i64,
        src_chat_id: i64,
        message_id: i32,
    ) -> Result<i32>;

    /// Copy without attribution, posted as a reply to `reply_to_message_id`.
    async fn copy_message(
        &self,
        dest_chat_id: i64,
        src_chat_id: i64,
        message_id: i32,
        reply_to_message_id: i32,
    ) -> Result<()>;
}

/// Extract the command name from message text such as `/start@relay_bot payload`.
pub fn parse_command(text: &str) -> Option<String> {
    let rest = text.strip_prefix('/')?;
    let word = rest.split(char::is_whitespace).next()?;
    let name = word.split('@').next().unwrap_or(word);
    if name.is_empty() {
        None
    } else {
        Some(name.to_lowercase())
    }
}
