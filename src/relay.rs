use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::{debug, info};

use crate::platform::{ChatKind, InboundEvent, Messenger};
use crate::store::{CorrelationRecord, CorrelationStore};

/// Static settings the relay needs at construction time
#[derive(Debug, Clone)]
pub struct RelaySettings {
    pub forward_chat_id: i64,
    /// The bot's own user id, used to drop self-authored messages
    pub bot_user_id: u64,
    pub greeting: String,
}

/// What the relay did with an event
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// `/start` answered with the greeting
    Greeted,
    /// Authored by the bot itself
    SelfAuthored,
    /// Forwarded into the forwarding chat and correlation stored
    Forwarded(CorrelationRecord),
    /// Reply copied back to the original user
    Replied {
        origin_chat_id: i64,
        origin_message_id: i32,
    },
    /// Reply to a forwarded message we have no record of
    Unrouted { reply_to_message_id: i32 },
    /// Commands, group chats, non-reply messages in the forwarding chat
    Ignored,
}

/// Routes messages between private chats and the forwarding chat.
pub struct Relay {
    settings: RelaySettings,
    store: Arc<dyn CorrelationStore>,
    messenger: Arc<dyn Messenger>,
}

impl Relay {
    pub fn new(
        settings: RelaySettings,
        store: Arc<dyn CorrelationStore>,
        messenger: Arc<dyn Messenger>,
    ) -> Self {
        Self {
            settings,
            store,
            messenger,
        }
    }

    pub fn forward_chat_id(&self) -> i64 {
        self.settings.forward_chat_id
    }

    pub async fn handle_start_command(&self, event: &InboundEvent) -> Result<()> {
        debug!("Sending greeting to chat {}", event.chat_id);
        self.messenger
            .send_text(event.chat_id, &self.settings.greeting)
            .await
            .with_context(|| format!("Failed to send greeting to chat {}", event.chat_id))
    }

    /// Entry point for the dispatcher. `/start` is answered before any
    /// routing rule, in every chat, including as a reply in the forwarding chat.
    pub async fn handle(&self, event: &InboundEvent) -> Result<Outcome> {
        if event.command.as_deref() == Some("start") {
            self.handle_start_command(event).await?;
            return Ok(Outcome::Greeted);
        }
        self.handle_inbound(event).await
    }

    /// Classify one inbound event and perform at most one outbound call.
    ///
    /// The reply check runs before the forward check so that a message that
    /// looks like both is always treated as a reply.
    pub async fn handle_inbound(&self, event: &InboundEvent) -> Result<Outcome> {
        if event.sender_id == Some(self.settings.bot_user_id) {
            debug!("Ignoring own message {} in chat {}", event.message_id, event.chat_id);
            return Ok(Outcome::SelfAuthored);
        }

        if event.chat_kind == ChatKind::ForwardChat {
            if let Some(reply_to) = event.reply_to_message_id {
                return self.route_reply(event, reply_to).await;
            }
        }

        if event.chat_kind == ChatKind::Private && event.command.is_none() {
            return self.forward(event).await;
        }

        debug!(
            "Ignoring message {} in chat {} ({:?})",
            event.message_id, event.chat_id, event.chat_kind
        );
        Ok(Outcome::Ignored)
    }

    async fn forward(&self, event: &InboundEvent) -> Result<Outcome> {
        let forwarded_message_id = self
            .messenger
            .forward_message(self.settings.forward_chat_id, event.chat_id, event.message_id)
            .await
            .with_context(|| {
                format!(
                    "Failed to forward message {} from chat {}",
                    event.message_id, event.chat_id
                )
            })?;

        // Only after the copy exists.
        let record = CorrelationRecord {
            forwarded_message_id,
            origin_chat_id: event.chat_id,
            origin_message_id: event.message_id,
        };
        self.store.put(record).await?;

        info!(
            "Forwarded message {} from chat {} as {}",
            event.message_id, event.chat_id, forwarded_message_id
        );
        Ok(Outcome::Forwarded(record))
    }

    async fn route_reply(&self, event: &InboundEvent, reply_to: i32) -> Result<Outcome> {
        let record = match self.store.get(reply_to).await? {
            Some(record) => record,
            None => {
                debug!("No origin known for forwarded message {}, dropping reply", reply_to);
                return Ok(Outcome::Unrouted {
                    reply_to_message_id: reply_to,
                });
            }
        };

        self.messenger
            .copy_message(
                record.origin_chat_id,
                event.chat_id,
                event.message_id,
                record.origin_message_id,
            )
            .await
            .with_context(|| {
                format!(
                    "Failed to copy reply {} to chat {}",
                    event.message_id, record.origin_chat_id
                )
            })?;

        info!(
            "Routed reply {} back to chat {} (message {})",
            event.message_id, record.origin_chat_id, record.origin_message_id
        );
        Ok(Outcome::Replied {
            origin_chat_id: record.origin_chat_id,
            origin_message_id: record.origin_message_id,
        })
    }
}
