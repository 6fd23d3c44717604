// Messaging transport boundary: inbound events and outbound commands.

pub mod telegram;

use std::future::Future;

use serde::Serialize;
use thiserror::Error;

use crate::roster::Annotation;

pub type ChatId = i64;
pub type MessageId = i64;

/// A message addressed by chat and id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MessageRef {
    pub chat_id: ChatId,
    pub message_id: MessageId,
}

/// Buttons per keyboard row.
pub const KEYBOARD_COLUMNS: usize = 5;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("{method} rejected: {description}")]
    Api { method: String, description: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InlineButton {
    pub text: String,
    #[serde(rename = "callback_data")]
    pub payload: String,
}

pub type Keyboard = Vec<Vec<InlineButton>>;

/// Split buttons into rows of `columns`.
pub fn build_menu(buttons: Vec<InlineButton>, columns: usize) -> Keyboard {
    buttons
        .chunks(columns.max(1))
        .map(|row| row.to_vec())
        .collect()
}

/// A text message as seen by the bot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IncomingMessage {
    pub chat_id: ChatId,
    /// Whether the message came from a one-to-one conversation.
    pub private: bool,
    pub text: String,
    pub annotations: Vec<Annotation>,
}

/// An inline keyboard button was pressed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ButtonPress {
    pub callback_id: String,
    pub chat_id: ChatId,
    pub message_id: MessageId,
    pub payload: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InboundEvent {
    Message(IncomingMessage),
    ButtonPress(ButtonPress),
}

/// Outbound side of the messaging service. All text is HTML.
pub trait Transport: Send + Sync + 'static {
    fn send_message(
        &self,
        chat_id: ChatId,
        text: &str,
        keyboard: Option<&Keyboard>,
    ) -> impl Future<Output = Result<MessageId, TransportError>> + Send;

    fn edit_message(
        &self,
        chat_id: ChatId,
        message_id: MessageId,
        text: &str,
    ) -> impl Future<Output = Result<(), TransportError>> + Send;

    fn answer_button(
        &self,
        callback_id: &str,
        text: &str,
    ) -> impl Future<Output = Result<(), TransportError>> + Send;
}
