// Tally engine: per-target boards, point awards and leaderboard rendering.

use std::sync::Arc;

use thiserror::Error;

use crate::error::Result;
use crate::metrics;
use crate::roster::{Contestant, Roster, SEPARATOR};
use crate::store::SessionStore;
use crate::transport::{ChatId, MessageId, MessageRef, Transport};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TallyError {
    #[error("{0} isn't an id or a valid name")]
    InvalidToken(String),
    #[error("{0} is a wrong id")]
    UnknownIndex(String),
    #[error("chat {0} already has a leaderboard")]
    AlreadyInitialized(ChatId),
    #[error("chat {0} has no leaderboard")]
    NotActive(ChatId),
}

/// How a vote token addresses a contestant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Token<'a> {
    Index(i64),
    Name(&'a str),
}

/// Anything that parses as an integer is an index, everything else a name.
pub fn resolve_token(token: &str) -> Token<'_> {
    match token.trim().parse::<i64>() {
        Ok(n) => Token::Index(n),
        Err(_) => Token::Name(token),
    }
}

/// Split a vote message into tokens, dropping empty pieces.
pub fn split_tokens(text: &str) -> Vec<&str> {
    text.split(SEPARATOR).filter(|t| !t.is_empty()).collect()
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Vote {
    /// One point for the contestant at this index (button press).
    Index(usize),
    /// One point per token, by index or exact name.
    Batch(Vec<String>),
}

impl Vote {
    fn source(&self) -> &'static str {
        match self {
            Vote::Index(_) => "button",
            Vote::Batch(_) => "batch",
        }
    }
}

/// Scoring state of one active target chat.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Board {
    pub roster: Roster,
    /// Message in the target chat that shows the leaderboard.
    pub leaderboard_message: MessageId,
    /// Controller message carrying the vote buttons.
    pub control: Option<MessageRef>,
}

impl Board {
    pub fn new(roster: Roster, leaderboard_message: MessageId) -> Self {
        Self {
            roster,
            leaderboard_message,
            control: None,
        }
    }

    fn resolve(&self, token: &str) -> std::result::Result<usize, TallyError> {
        match resolve_token(token) {
            Token::Index(n) => usize::try_from(n)
                .ok()
                .filter(|i| *i < self.roster.len())
                .ok_or_else(|| TallyError::UnknownIndex(token.to_string())),
            Token::Name(name) => self
                .roster
                .position(name)
                .ok_or_else(|| TallyError::InvalidToken(token.to_string())),
        }
    }

    /// Resolve every target of `vote`, then add one point per resolved entry.
    /// Nothing changes unless every token resolves.
    pub fn apply(&mut self, vote: &Vote) -> std::result::Result<Vec<usize>, TallyError> {
        let indices = match vote {
            Vote::Index(index) if *index < self.roster.len() => vec![*index],
            Vote::Index(index) => return Err(TallyError::UnknownIndex(index.to_string())),
            Vote::Batch(tokens) => tokens
                .iter()
                .map(|t| self.resolve(t))
                .collect::<std::result::Result<Vec<_>, _>>()?,
        };

        for &index in &indices {
            if let Some(contestant) = self.roster.get_mut(index) {
                contestant.count += 1;
            }
        }
        Ok(indices)
    }

    pub fn award_by_index(&mut self, index: usize) -> std::result::Result<Contestant, TallyError> {
        self.apply(&Vote::Index(index))?;
        self.roster
            .get(index)
            .cloned()
            .ok_or_else(|| TallyError::UnknownIndex(index.to_string()))
    }

    pub fn award_by_batch<S: AsRef<str>>(
        &mut self,
        tokens: &[S],
    ) -> std::result::Result<Vec<Contestant>, TallyError> {
        let vote = Vote::Batch(tokens.iter().map(|t| t.as_ref().to_string()).collect());
        let indices = self.apply(&vote)?;
        Ok(self.contestants_at(&indices))
    }

    fn contestants_at(&self, indices: &[usize]) -> Vec<Contestant> {
        indices
            .iter()
            .filter_map(|&i| self.roster.get(i).cloned())
            .collect()
    }

    /// Leaderboard text: highest count first, ties in roster order. Counts
    /// are right-aligned to the widest count currently on the board.
    pub fn render_leaderboard(&self) -> String {
        let mut ranked: Vec<&Contestant> = self.roster.iter().collect();
        // Vec::sort_by is stable
        ranked.sort_by(|a, b| b.count.cmp(&a.count));

        let width = ranked
            .first()
            .map(|c| c.count.to_string().len())
            .unwrap_or(1);

        ranked
            .iter()
            .map(|c| format!("{:>width$} - {}\n", c.count, c.label()))
            .collect()
    }
}

/// Result of a committed vote.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VoteReceipt {
    /// Awarded contestants in token order, with their updated counts.
    pub awarded: Vec<Contestant>,
    /// The new counts reached the database.
    pub saved: bool,
    /// The leaderboard message was edited.
    pub published: bool,
}

/// Result of a successful `TallyEngine::initialize`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BoardCreated {
    pub leaderboard_message: MessageId,
    /// The leaderboard message reached the database.
    pub saved: bool,
}

/// Owns every board once its target chat is active. All count mutation goes
/// through here, under the target chat's lock.
#[derive(Clone)]
pub struct TallyEngine {
    store: Arc<SessionStore>,
}

impl TallyEngine {
    pub fn new(store: Arc<SessionStore>) -> Self {
        Self { store }
    }

    /// Bind `roster` to `target` and post its summary, which becomes the
    /// leaderboard message. Fails if `target` already has a board.
    ///
    /// The roster is stored before anything is posted, so a storage failure
    /// leaves the target chat untouched. A failed post discards the stored
    /// roster. Once posted, the board is live even if recording the message
    /// fails; the receipt says so.
    pub async fn initialize<T: Transport>(
        &self,
        transport: &T,
        target: ChatId,
        roster: Roster,
    ) -> Result<BoardCreated> {
        let slot = self.store.slot(target);
        let mut guard = slot.lock().await;
        if guard.is_some() {
            return Err(TallyError::AlreadyInitialized(target).into());
        }

        self.store.db().create_board(target, &roster).await?;

        let message = match transport.send_message(target, &roster.summary(), None).await {
            Ok(message) => message,
            Err(e) => {
                if let Err(db_err) = self.store.db().discard_board(target).await {
                    tracing::warn!(target_chat = target, "Failed to discard board: {db_err}");
                }
                return Err(e.into());
            }
        };

        let saved = match self.store.db().publish_board(target, message).await {
            Ok(()) => true,
            Err(e) => {
                tracing::error!(target_chat = target, "Failed to save leaderboard message: {e}");
                false
            }
        };

        tracing::info!(
            target_chat = target,
            contestants = roster.len(),
            leaderboard_message = message,
            "Board initialized"
        );
        *guard = Some(Board::new(roster, message));
        self.store.registry().names_received(target);
        metrics::ACTIVE_BOARDS.inc();
        Ok(BoardCreated {
            leaderboard_message: message,
            saved,
        })
    }

    /// Remember which controller message carries the buttons for `target`.
    pub async fn attach_control(&self, target: ChatId, control: MessageRef) -> Result<()> {
        let slot = self.store.slot(target);
        let mut guard = slot.lock().await;
        let board = guard.as_mut().ok_or(TallyError::NotActive(target))?;
        self.store.db().set_control_message(target, control).await?;
        board.control = Some(control);
        self.store.record_control(control, target);
        Ok(())
    }

    pub async fn render_leaderboard(&self, target: ChatId) -> Option<String> {
        let slot = self.store.slot(target);
        let guard = slot.lock().await;
        guard.as_ref().map(Board::render_leaderboard)
    }

    pub async fn is_active(&self, target: ChatId) -> bool {
        self.store.slot(target).lock().await.is_some()
    }

    /// Apply `vote` to `target`, then rewrite its leaderboard message.
    ///
    /// A rejected vote changes nothing. Once counts change in memory they
    /// stay changed: failures to save or edit are logged and reported in
    /// the receipt.
    pub async fn apply_and_publish<T: Transport>(
        &self,
        transport: &T,
        target: ChatId,
        vote: Vote,
    ) -> Result<VoteReceipt> {
        let slot = self.store.slot(target);
        let mut guard = slot.lock().await;
        let board = guard.as_mut().ok_or(TallyError::NotActive(target))?;

        let indices = board.apply(&vote)?;
        let awarded = board.contestants_at(&indices);
        metrics::VOTES_TOTAL
            .with_label_values(&[vote.source()])
            .inc_by(indices.len() as u64);

        let mut changed = indices.clone();
        changed.sort_unstable();
        changed.dedup();
        let counts: Vec<(usize, u32)> = changed
            .iter()
            .filter_map(|&i| board.roster.get(i).map(|c| (i, c.count)))
            .collect();

        let saved = match self.store.db().save_counts(target, &counts).await {
            Ok(()) => true,
            Err(e) => {
                tracing::error!(target_chat = target, "Failed to save counts: {e}");
                false
            }
        };

        let text = board.render_leaderboard();
        let published = match transport
            .edit_message(target, board.leaderboard_message, &text)
            .await
        {
            Ok(()) => true,
            Err(e) => {
                tracing::error!(target_chat = target, "Failed to edit leaderboard: {e}");
                false
            }
        };

        Ok(VoteReceipt {
            awarded,
            saved,
            published,
        })
    }
}
