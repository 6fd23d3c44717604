// Session coordinator: moves controller/target pairs from link request to an
// active leaderboard and routes every inbound event accordingly.

use std::sync::Arc;

use crate::error::{Error, Result};
use crate::link::{parse_chat_id, LinkRegistry};
use crate::metrics;
use crate::roster::{build_roster, escape_html, RosterError};
use crate::store::SessionStore;
use crate::tally::{split_tokens, TallyEngine, TallyError, Vote, VoteReceipt};
use crate::transport::{
    build_menu, ButtonPress, ChatId, InboundEvent, IncomingMessage, InlineButton, MessageRef,
    Transport, KEYBOARD_COLUMNS,
};

const NAMES_INSTRUCTIONS: &str = "Great, the chat is connected. Now you need to send me the \
names of the contestants. I accept 4 different types of names: a normal text, a username, an \
inline mention or an inline URL. Any other formatting will be treated as normal text. Separate \
the entries with a comma followed by a space. This would be valid input: Poolitzer, @poolitzer, \
<a href=\"https://t.me/s/pooltalks\">inline URL</a>, \
<a href=\"tg://user?id=208589966\">inline mention of Poolitzer</a>. Make sure all names are unique.";

const VOTING_INSTRUCTIONS: &str = "Great, got the names. Now we reached the main setup. To give \
a contestant a point, press their button below or send me a list of ids, separated by a comma \
and a space. You can also type out a name instead of its id; names are case sensitive.";

const ALREADY_ACTIVE: &str = "This chat is connected and already has a leaderboard. Points you \
send me now count towards it.";

const NOT_ACTIVE: &str = "This leaderboard is not active anymore.";

const NOT_PUBLISHED: &str = "The leaderboard message could not be updated, the points still count.";

const NOT_SAVED: &str = "The points count, but could not be saved and may be lost on a restart.";

const LINK_FAILED: &str = "Sorry, I couldn't connect that chat. Please send me the number there again.";

const SETUP_FAILED: &str = "Sorry, I couldn't set up the leaderboard. Please send me the names again.";

/// Where a chat stands, judged by its own id.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Nothing known about this chat.
    Unknown,
    /// Sent `/start`, waiting for a target chat to echo its id.
    Pending,
    /// Controls `target`, which still needs a roster.
    AwaitingNames(ChatId),
    /// Controls `target`, which has a leaderboard.
    Active(ChatId),
}

impl SessionState {
    pub fn of(registry: &LinkRegistry, chat: ChatId) -> Self {
        match registry.current_target(chat) {
            Some(target) => {
                if registry.is_awaiting_names(target) {
                    SessionState::AwaitingNames(target)
                } else {
                    SessionState::Active(target)
                }
            }
            _ if registry.is_pending(chat) => SessionState::Pending,
            _ => SessionState::Unknown,
        }
    }
}

fn is_start_command(text: &str) -> bool {
    let command = text.split_whitespace().next().unwrap_or("");
    command == "/start" || command.starts_with("/start@")
}

fn start_reply(chat: ChatId) -> String {
    format!(
        "Hey, please add me to a group or channel and send a message with this number \
         (the - is part of it if it's there): <code>{chat}</code>"
    )
}

fn roster_rejection(error: &RosterError) -> &'static str {
    match error {
        RosterError::DuplicateName(_) => {
            "Hey, sorry, you have names in there which aren't unique. Please try again."
        }
        RosterError::EmptyName => "Hey, sorry, one of the names is empty. Please try again.",
    }
}

fn tally_rejection(error: &TallyError) -> (&'static str, String) {
    match error {
        TallyError::InvalidToken(token) => (
            "invalid_token",
            format!("Sorry, {token} isn't an id or a valid name. Fix it ;P"),
        ),
        TallyError::UnknownIndex(token) => (
            "unknown_index",
            format!("Sorry, {token} is a wrong id. Fix it ;P"),
        ),
        TallyError::AlreadyInitialized(_) | TallyError::NotActive(_) => {
            ("not_active", NOT_ACTIVE.to_string())
        }
    }
}

/// Routes inbound events for every chat. Cheap to clone.
pub struct Coordinator<T> {
    store: Arc<SessionStore>,
    tally: TallyEngine,
    transport: Arc<T>,
}

impl<T> Clone for Coordinator<T> {
    fn clone(&self) -> Self {
        Self {
            store: self.store.clone(),
            tally: self.tally.clone(),
            transport: self.transport.clone(),
        }
    }
}

impl<T: Transport> Coordinator<T> {
    pub fn new(store: Arc<SessionStore>, transport: Arc<T>) -> Self {
        Self {
            tally: TallyEngine::new(store.clone()),
            store,
            transport,
        }
    }

    pub fn store(&self) -> &Arc<SessionStore> {
        &self.store
    }

    pub fn tally(&self) -> &TallyEngine {
        &self.tally
    }

    pub fn state_of(&self, chat: ChatId) -> SessionState {
        SessionState::of(&self.store.registry(), chat)
    }

    /// Handle one inbound event to completion. Rejected user input becomes a
    /// reply; only transport and storage failures are returned.
    pub async fn handle_event(&self, event: InboundEvent) -> Result<()> {
        let timer = metrics::UPDATE_DURATION_SECONDS.start_timer();
        let result = match event {
            InboundEvent::Message(message) => self.handle_message(message).await,
            InboundEvent::ButtonPress(press) => self.handle_button(press).await,
        };
        timer.observe_duration();
        result
    }

    async fn handle_message(&self, message: IncomingMessage) -> Result<()> {
        if is_start_command(&message.text) {
            return self.request_link(message.chat_id).await;
        }

        // A number nobody is waiting on is ordinary text
        if !message.private {
            if let Some(controller) = parse_chat_id(&message.text) {
                if self.confirm_link(message.chat_id, controller).await? {
                    return Ok(());
                }
            }
        }

        match self.state_of(message.chat_id) {
            SessionState::Unknown | SessionState::Pending => {
                tracing::debug!(chat = message.chat_id, "Ignoring message from untracked chat");
                Ok(())
            }
            SessionState::AwaitingNames(target) => self.register_roster(target, &message).await,
            SessionState::Active(target) => {
                self.vote_batch(message.chat_id, target, &message.text)
                    .await
            }
        }
    }

    async fn request_link(&self, controller: ChatId) -> Result<()> {
        self.store.registry().request_link(controller);
        self.store.db().add_pending(controller).await?;
        metrics::LINKS_REQUESTED_TOTAL.inc();
        tracing::info!(controller, "Link requested");

        self.transport
            .send_message(controller, &start_reply(controller), None)
            .await?;
        Ok(())
    }

    /// Link `target` to `controller` if it is waiting. Returns whether it
    /// was.
    async fn confirm_link(&self, target: ChatId, controller: ChatId) -> Result<bool> {
        let slot = self.store.slot(target);
        let board = slot.lock().await;
        let active = board.is_some();

        let change = {
            let mut registry = self.store.registry();
            match registry.confirm_link(target, controller) {
                Ok(change) => {
                    if active {
                        registry.names_received(target);
                    }
                    change
                }
                Err(e) => {
                    tracing::debug!(target_chat = target, "Not a link: {e}");
                    return Ok(false);
                }
            }
        };

        if let Err(e) = self.store.db().confirm_link(target, controller, !active).await {
            self.store.registry().revert(change);
            self.notify(controller, LINK_FAILED).await;
            return Err(e.into());
        }
        metrics::LINKS_CONFIRMED_TOTAL.inc();
        tracing::info!(controller, target_chat = target, "Chats linked");

        let reply = if active {
            ALREADY_ACTIVE
        } else {
            NAMES_INSTRUCTIONS
        };
        self.transport.send_message(controller, reply, None).await?;
        Ok(true)
    }

    async fn register_roster(&self, target: ChatId, message: &IncomingMessage) -> Result<()> {
        let controller = message.chat_id;
        let roster = match build_roster(&message.text, &message.annotations) {
            Ok(roster) => roster,
            Err(e) => {
                tracing::info!(controller, target_chat = target, "Roster rejected: {e}");
                let reason = match e {
                    RosterError::DuplicateName(_) => "duplicate_name",
                    RosterError::EmptyName => "empty_name",
                };
                metrics::REJECTED_INPUTS_TOTAL
                    .with_label_values(&[reason])
                    .inc();
                self.transport
                    .send_message(controller, roster_rejection(&e), None)
                    .await?;
                return Ok(());
            }
        };

        let index_list = roster.index_list();
        let buttons = (0..roster.len())
            .map(|i| InlineButton {
                text: i.to_string(),
                payload: i.to_string(),
            })
            .collect();

        let created = match self
            .tally
            .initialize(self.transport.as_ref(), target, roster)
            .await
        {
            Ok(created) => created,
            Err(Error::Tally(TallyError::AlreadyInitialized(_))) => {
                tracing::debug!(target_chat = target, "Roster already registered");
                return Ok(());
            }
            Err(e) => {
                self.notify(controller, SETUP_FAILED).await;
                return Err(e);
            }
        };
        metrics::ROSTERS_REGISTERED_TOTAL.inc();

        let keyboard = build_menu(buttons, KEYBOARD_COLUMNS);
        let mut text = format!("{VOTING_INSTRUCTIONS}\n\n{index_list}");
        if !created.saved {
            text.push('\n');
            text.push_str(NOT_SAVED);
        }
        let message_id = self
            .transport
            .send_message(controller, &text, Some(&keyboard))
            .await?;
        self.tally
            .attach_control(
                target,
                MessageRef {
                    chat_id: controller,
                    message_id,
                },
            )
            .await
    }

    async fn vote_batch(&self, controller: ChatId, target: ChatId, text: &str) -> Result<()> {
        let tokens: Vec<String> = split_tokens(text).into_iter().map(String::from).collect();
        if tokens.is_empty() {
            return Ok(());
        }

        let reply = match self
            .tally
            .apply_and_publish(self.transport.as_ref(), target, Vote::Batch(tokens))
            .await
        {
            Ok(receipt) => batch_confirmation(&receipt),
            Err(Error::Tally(e)) => {
                let (reason, text) = tally_rejection(&e);
                tracing::info!(controller, target_chat = target, "Vote rejected: {e}");
                metrics::REJECTED_INPUTS_TOTAL
                    .with_label_values(&[reason])
                    .inc();
                escape_html(&text)
            }
            Err(e) => return Err(e),
        };

        self.transport
            .send_message(controller, &reply, None)
            .await?;
        Ok(())
    }

    /// Best-effort message about a failure that is returned to the caller.
    async fn notify(&self, chat: ChatId, text: &str) {
        if let Err(e) = self.transport.send_message(chat, text, None).await {
            tracing::warn!(chat, "Failed to send failure notice: {e}");
        }
    }

    async fn handle_button(&self, press: ButtonPress) -> Result<()> {
        let control = MessageRef {
            chat_id: press.chat_id,
            message_id: press.message_id,
        };
        let target = self
            .store
            .target_for_control(control)
            .or_else(|| match self.state_of(press.chat_id) {
                SessionState::Active(target) => Some(target),
                _ => None,
            })
            .filter(|target| self.store.registry().controller_of(*target) == Some(press.chat_id));

        let answer = match target {
            None => NOT_ACTIVE.to_string(),
            Some(target) => self.vote_button(target, &press.payload).await?,
        };

        self.transport
            .answer_button(&press.callback_id, &answer)
            .await?;
        Ok(())
    }

    async fn vote_button(&self, target: ChatId, payload: &str) -> Result<String> {
        let vote = match payload.trim().parse::<usize>() {
            Ok(index) => Vote::Index(index),
            Err(_) => {
                let (_, text) = tally_rejection(&TallyError::UnknownIndex(payload.to_string()));
                return Ok(text);
            }
        };

        match self
            .tally
            .apply_and_publish(self.transport.as_ref(), target, vote)
            .await
        {
            Ok(receipt) => {
                let name = receipt
                    .awarded
                    .first()
                    .map(|c| c.name.as_str())
                    .unwrap_or_default();
                let mut text = format!("Got it. Contestant {name} got a point.");
                for note in receipt_notes(&receipt) {
                    text.push(' ');
                    text.push_str(note);
                }
                Ok(text)
            }
            Err(Error::Tally(e)) => {
                let (reason, text) = tally_rejection(&e);
                metrics::REJECTED_INPUTS_TOTAL
                    .with_label_values(&[reason])
                    .inc();
                Ok(text)
            }
            Err(e) => Err(e),
        }
    }
}

fn batch_confirmation(receipt: &VoteReceipt) -> String {
    let names: Vec<String> = receipt
        .awarded
        .iter()
        .map(|c| escape_html(&c.name))
        .collect();
    let mut text = format!(
        "Successfully gave these contestants a point: {}",
        names.join(", ")
    );
    for note in receipt_notes(receipt) {
        text.push_str("\n\n");
        text.push_str(note);
    }
    text
}

fn receipt_notes(receipt: &VoteReceipt) -> Vec<&'static str> {
    let mut notes = Vec::new();
    if !receipt.published {
        notes.push(NOT_PUBLISHED);
    }
    if !receipt.saved {
        notes.push(NOT_SAVED);
    }
    notes
}
