//! One conversation: history plus live `new-message` events.

use std::future::Future;

use tokio::sync::watch;
use tracing::{debug, warn};

use super::Mounted;
use crate::api::ApiClient;
use crate::error::{ApiError, ChannelError};
use crate::live::{ChannelHandle, ChannelState, ClientEvent, Connect, EventName, Handlers, LiveEvent, Room};
use crate::models::{Message, OutgoingMessage};

const MESSAGES_ERROR: &str = "Failed to load messages.";

pub trait ChatSource: Clone + Send + Sync + 'static {
    fn messages(
        &self,
        conversation_id: &str,
    ) -> impl Future<Output = Result<Vec<Message>, ApiError>> + Send;
}

impl ChatSource for ApiClient {
    async fn messages(&self, conversation_id: &str) -> Result<Vec<Message>, ApiError> {
        ApiClient::messages(self, conversation_id).await
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChatState {
    /// Arrival order, oldest first. Never reordered or trimmed.
    pub messages: Vec<Message>,
    pub loading: bool,
    pub error: Option<String>,
}

pub struct ChatView {
    conversation_id: String,
    sender_id: String,
    view: Mounted<ChatState>,
    channel: Option<ChannelHandle>,
}

impl ChatView {
    /// Join the conversation's room, then load its history. Messages that
    /// arrive while history is loading are kept after it.
    pub async fn mount<S: ChatSource, C: Connect>(
        source: &S,
        connector: &C,
        conversation_id: &str,
        sender_id: &str,
    ) -> Self {
        let view = Mounted::new(ChatState {
            loading: true,
            ..Default::default()
        });

        let handlers = Handlers::new().on(
            EventName::NewMessage,
            message_handler(conversation_id.to_string(), view.clone()),
        );
        let channel = match connector
            .open(Room::Conversation(conversation_id.to_string()), handlers)
            .await
        {
            Ok(handle) => Some(handle),
            Err(e) => {
                warn!(conversation = conversation_id, "Chat live updates unavailable: {}", e);
                None
            }
        };

        let result = source.messages(conversation_id).await;
        view.update(|s| {
            match result {
                Ok(history) => {
                    let live = std::mem::replace(&mut s.messages, history);
                    for message in live {
                        append(&mut s.messages, message);
                    }
                }
                Err(e) => {
                    warn!(conversation = conversation_id, "Message history fetch failed: {}", e);
                    s.error = Some(MESSAGES_ERROR.into());
                }
            }
            s.loading = false;
        });

        Self {
            conversation_id: conversation_id.to_string(),
            sender_id: sender_id.to_string(),
            view,
            channel,
        }
    }

    pub fn conversation_id(&self) -> &str {
        &self.conversation_id
    }

    pub fn state(&self) -> ChatState {
        self.view.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<ChatState> {
        self.view.subscribe()
    }

    pub fn channel_state(&self) -> Option<ChannelState> {
        self.channel.as_ref().map(ChannelHandle::state)
    }

    pub fn dismiss_error(&self) {
        self.view.update(|s| s.error = None);
    }

    /// Send `content` over the channel. Blank input is ignored and yields
    /// `Ok(false)`. The message shows up once the server echoes it back.
    pub async fn send(&self, content: &str) -> Result<bool, ChannelError> {
        if content.trim().is_empty() {
            return Ok(false);
        }
        let channel = self.channel.as_ref().ok_or(ChannelError::Closed)?;
        channel
            .emit(ClientEvent::SendMessage(OutgoingMessage {
                conversation_id: self.conversation_id.clone(),
                sender_id: self.sender_id.clone(),
                content: content.to_string(),
                kind: "text".into(),
            }))
            .await?;
        Ok(true)
    }

    pub async fn unmount(mut self) {
        self.view.kill();
        if let Some(channel) = self.channel.take() {
            channel.close().await;
        }
    }
}

impl Drop for ChatView {
    fn drop(&mut self) {
        self.view.kill();
    }
}

fn message_handler(
    conversation_id: String,
    view: Mounted<ChatState>,
) -> impl FnMut(&LiveEvent) + Send + 'static {
    move |event| {
        let message = match event.payload::<Message>() {
            Ok(message) => message,
            Err(e) => {
                debug!("Ignoring malformed message: {}", e);
                return;
            }
        };
        if message.conversation != conversation_id {
            debug!(conversation = %message.conversation, "Ignoring message for another conversation");
            return;
        }
        view.update(|s| append(&mut s.messages, message));
    }
}

fn append(messages: &mut Vec<Message>, message: Message) {
    if !messages.iter().any(|m| m.id == message.id) {
        messages.push(message);
    }
}
