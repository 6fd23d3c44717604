// Telegram Bot API adapter: update decoding, outbound calls and long polling.

use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::json;

use super::{
    ButtonPress, ChatId, InboundEvent, IncomingMessage, Keyboard, MessageId, Transport,
    TransportError,
};
use crate::metrics;
use crate::roster::Annotation;
use crate::session::Coordinator;

// ── Update decoding ──────────────────────────────────────────────────

#[derive(Debug, Clone, Deserialize)]
pub struct Update {
    pub update_id: i64,
    pub message: Option<Message>,
    pub channel_post: Option<Message>,
    pub callback_query: Option<CallbackQuery>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Message {
    pub message_id: MessageId,
    pub chat: Chat,
    pub text: Option<String>,
    #[serde(default)]
    pub entities: Vec<MessageEntity>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Chat {
    pub id: ChatId,
    #[serde(rename = "type")]
    pub kind: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MessageEntity {
    #[serde(rename = "type")]
    pub kind: String,
    /// Offset in UTF-16 code units.
    pub offset: usize,
    /// Length in UTF-16 code units.
    pub length: usize,
    pub url: Option<String>,
    pub user: Option<User>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct User {
    pub id: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CallbackQuery {
    pub id: String,
    pub from: User,
    pub message: Option<Message>,
    pub data: Option<String>,
}

impl Update {
    /// Convert to a transport-neutral event. Updates the bot does not act on
    /// (edits, non-text messages, buttons without data) yield `None`.
    pub fn into_event(self) -> Option<InboundEvent> {
        if let Some(query) = self.callback_query {
            let message = query.message?;
            return Some(InboundEvent::ButtonPress(ButtonPress {
                callback_id: query.id,
                chat_id: message.chat.id,
                message_id: message.message_id,
                payload: query.data?,
            }));
        }

        let message = self.message.or(self.channel_post)?;
        let text = message.text?;
        let annotations = annotations(&text, &message.entities);
        Some(InboundEvent::Message(IncomingMessage {
            chat_id: message.chat.id,
            private: message.chat.kind == "private",
            text,
            annotations,
        }))
    }
}

/// Extract link and mention spans from the message entities.
fn annotations(text: &str, entities: &[MessageEntity]) -> Vec<Annotation> {
    let units: Vec<u16> = text.encode_utf16().collect();
    entities
        .iter()
        .filter_map(|entity| {
            let covered = utf16_slice(&units, entity.offset, entity.length)?;
            match entity.kind.as_str() {
                "text_link" => Some(Annotation::link(covered, entity.url.clone()?)),
                "text_mention" => Some(Annotation::mention(covered, entity.user.as_ref()?.id)),
                _ => None,
            }
        })
        .collect()
}

fn utf16_slice(units: &[u16], offset: usize, length: usize) -> Option<String> {
    let end = offset.checked_add(length)?;
    String::from_utf16(units.get(offset..end)?).ok()
}

// ── Bot API client ───────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct ApiResponse<R> {
    ok: bool,
    result: Option<R>,
    description: Option<String>,
}

#[derive(Debug, Clone)]
pub struct TelegramClient {
    http: reqwest::Client,
    endpoint: String,
}

impl TelegramClient {
    pub fn new(api_url: &str, token: &str) -> Self {
        Self {
            http: reqwest::Client::new(),
            endpoint: format!("{}/bot{}", api_url.trim_end_matches('/'), token),
        }
    }

    async fn call<R: DeserializeOwned>(
        &self,
        method: &str,
        body: serde_json::Value,
    ) -> Result<R, TransportError> {
        let result = self.request(method, body).await;
        if result.is_err() {
            metrics::TRANSPORT_ERRORS_TOTAL
                .with_label_values(&[method])
                .inc();
        }
        result
    }

    async fn request<R: DeserializeOwned>(
        &self,
        method: &str,
        body: serde_json::Value,
    ) -> Result<R, TransportError> {
        let response: ApiResponse<R> = self
            .http
            .post(format!("{}/{}", self.endpoint, method))
            .json(&body)
            .send()
            .await?
            .json()
            .await?;

        match (response.ok, response.result) {
            (true, Some(result)) => Ok(result),
            _ => Err(TransportError::Api {
                method: method.to_string(),
                description: response
                    .description
                    .unwrap_or_else(|| "no result".to_string()),
            }),
        }
    }

    /// Long-poll for updates starting at `offset`.
    pub async fn get_updates(
        &self,
        offset: i64,
        timeout_secs: u64,
    ) -> Result<Vec<Update>, TransportError> {
        self.call(
            "getUpdates",
            json!({
                "offset": offset,
                "timeout": timeout_secs,
                "allowed_updates": ["message", "channel_post", "callback_query"],
            }),
        )
        .await
    }
}

impl Transport for TelegramClient {
    async fn send_message(
        &self,
        chat_id: ChatId,
        text: &str,
        keyboard: Option<&Keyboard>,
    ) -> Result<MessageId, TransportError> {
        let mut body = json!({
            "chat_id": chat_id,
            "text": text,
            "parse_mode": "HTML",
        });
        if let Some(keyboard) = keyboard {
            body["reply_markup"] = json!({ "inline_keyboard": keyboard });
        }
        let sent: Message = self.call("sendMessage", body).await?;
        Ok(sent.message_id)
    }

    async fn edit_message(
        &self,
        chat_id: ChatId,
        message_id: MessageId,
        text: &str,
    ) -> Result<(), TransportError> {
        let _: serde_json::Value = self
            .call(
                "editMessageText",
                json!({
                    "chat_id": chat_id,
                    "message_id": message_id,
                    "text": text,
                    "parse_mode": "HTML",
                }),
            )
            .await?;
        Ok(())
    }

    async fn answer_button(&self, callback_id: &str, text: &str) -> Result<(), TransportError> {
        let _: bool = self
            .call(
                "answerCallbackQuery",
                json!({ "callback_query_id": callback_id, "text": text }),
            )
            .await?;
        Ok(())
    }
}

/// Spawn the long-polling loop. Updates are handled one at a time, in the
/// order Telegram delivers them.
pub fn spawn_polling(
    client: TelegramClient,
    coordinator: Coordinator<TelegramClient>,
    timeout_secs: u64,
) {
    tokio::spawn(async move {
        let mut offset = 0;
        loop {
            let updates = match client.get_updates(offset, timeout_secs).await {
                Ok(updates) => updates,
                Err(e) => {
                    tracing::warn!("getUpdates failed: {e}");
                    tokio::time::sleep(tokio::time::Duration::from_secs(2)).await;
                    continue;
                }
            };

            for update in updates {
                offset = offset.max(update.update_id + 1);
                let Some(event) = update.into_event() else {
                    continue;
                };
                if let Err(e) = coordinator.handle_event(event).await {
                    tracing::error!("Failed to handle update: {e}");
                }
            }
        }
    });
}
