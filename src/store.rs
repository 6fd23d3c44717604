// Session store: in-memory session state with write-through persistence.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use crate::db::Database;
use crate::link::LinkRegistry;
use crate::metrics;
use crate::tally::Board;
use crate::transport::{ChatId, MessageRef};

/// Board of one target chat, `None` until its roster is registered. Holding
/// the lock serializes every mutation for that chat.
pub type BoardSlot = Arc<tokio::sync::Mutex<Option<Board>>>;

/// All session state of the process.
///
/// The link registry sits behind a plain mutex that is never held across an
/// await. Each target chat gets its own async lock, so work on different
/// chats never contends.
pub struct SessionStore {
    db: Arc<Database>,
    registry: Mutex<LinkRegistry>,
    slots: Mutex<HashMap<ChatId, BoardSlot>>,
    controls: Mutex<HashMap<MessageRef, ChatId>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl SessionStore {
    /// Restore the state saved in `db`.
    pub async fn load(db: Arc<Database>) -> Result<Self, sqlx::Error> {
        let snapshot = db.load_snapshot().await?;

        let mut slots = HashMap::with_capacity(snapshot.boards.len());
        let mut controls = HashMap::new();
        for (target, board) in snapshot.boards {
            if let Some(control) = board.control {
                controls.insert(control, target);
            }
            slots.insert(target, Arc::new(tokio::sync::Mutex::new(Some(board))));
        }

        tracing::info!(
            boards = slots.len(),
            pending = snapshot.registry.pending().count(),
            "Session state loaded"
        );
        metrics::ACTIVE_BOARDS.set(slots.len() as i64);

        Ok(Self {
            db,
            registry: Mutex::new(snapshot.registry),
            slots: Mutex::new(slots),
            controls: Mutex::new(controls),
        })
    }

    pub fn db(&self) -> &Database {
        &self.db
    }

    pub fn registry(&self) -> MutexGuard<'_, LinkRegistry> {
        lock(&self.registry)
    }

    /// The lock slot for `target`, created empty on first use.
    pub fn slot(&self, target: ChatId) -> BoardSlot {
        lock(&self.slots)
            .entry(target)
            .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(None)))
            .clone()
    }

    /// Target chat whose vote buttons live on `control`.
    pub fn target_for_control(&self, control: MessageRef) -> Option<ChatId> {
        lock(&self.controls).get(&control).copied()
    }

    pub fn record_control(&self, control: MessageRef, target: ChatId) {
        lock(&self.controls).insert(control, target);
    }
}
