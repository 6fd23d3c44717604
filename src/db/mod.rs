// Session persistence (SQLite via sqlx).

use std::collections::BTreeMap;

use sqlx::sqlite::{SqlitePool, SqlitePoolOptions};

use crate::link::LinkRegistry;
use crate::roster::{Contestant, Roster};
use crate::tally::Board;
use crate::transport::{ChatId, MessageId, MessageRef};

#[derive(Debug, Clone, sqlx::FromRow)]
struct BoardRow {
    target_id: i64,
    leaderboard_message_id: i64,
    control_chat_id: Option<i64>,
    control_message_id: Option<i64>,
}

#[derive(Debug, Clone, sqlx::FromRow)]
struct ContestantRow {
    target_id: i64,
    name: String,
    link: Option<String>,
    count: i64,
}

/// Everything needed to resume after a restart.
#[derive(Debug, Clone, Default)]
pub struct SessionSnapshot {
    pub registry: LinkRegistry,
    pub boards: Vec<(ChatId, Board)>,
}

pub struct Database {
    pool: SqlitePool,
}

impl Database {
    pub async fn new(database_url: &str) -> Result<Self, sqlx::Error> {
        // Every connection to an in-memory database is a separate database,
        // so keep exactly one open for the life of the pool
        let options = if database_url.contains(":memory:") {
            SqlitePoolOptions::new()
                .max_connections(1)
                .min_connections(1)
                .idle_timeout(None)
                .max_lifetime(None)
        } else {
            SqlitePoolOptions::new().max_connections(5)
        };
        let pool = options.connect(database_url).await?;
        let db = Self { pool };
        db.run_migrations().await?;
        Ok(db)
    }

    async fn run_migrations(&self) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS pending_links (
                controller_id INTEGER PRIMARY KEY
            )
        "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS linked_pairs (
                target_id INTEGER PRIMARY KEY,
                controller_id INTEGER NOT NULL,
                linked_at TEXT NOT NULL DEFAULT (datetime('now'))
            )
        "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS awaiting_names (
                target_id INTEGER PRIMARY KEY
            )
        "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS controller_focus (
                controller_id INTEGER PRIMARY KEY,
                target_id INTEGER NOT NULL
            )
        "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS boards (
                target_id INTEGER PRIMARY KEY,
                leaderboard_message_id INTEGER,
                control_chat_id INTEGER,
                control_message_id INTEGER,
                created_at TEXT NOT NULL DEFAULT (datetime('now'))
            )
        "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS contestants (
                target_id INTEGER NOT NULL REFERENCES boards(target_id) ON DELETE CASCADE,
                idx INTEGER NOT NULL,
                name TEXT NOT NULL,
                link TEXT,
                count INTEGER NOT NULL DEFAULT 0,
                PRIMARY KEY (target_id, idx)
            )
        "#,
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    // ── Snapshot ──────────────────────────────────────────────────────

    pub async fn load_snapshot(&self) -> Result<SessionSnapshot, sqlx::Error> {
        let pending: Vec<i64> = sqlx::query_scalar("SELECT controller_id FROM pending_links")
            .fetch_all(&self.pool)
            .await?;
        let linked: Vec<(i64, i64)> =
            sqlx::query_as("SELECT target_id, controller_id FROM linked_pairs")
                .fetch_all(&self.pool)
                .await?;
        let awaiting: Vec<i64> = sqlx::query_scalar("SELECT target_id FROM awaiting_names")
            .fetch_all(&self.pool)
            .await?;
        let focus: Vec<(i64, i64)> =
            sqlx::query_as("SELECT controller_id, target_id FROM controller_focus")
                .fetch_all(&self.pool)
                .await?;

        let board_rows = sqlx::query_as::<_, BoardRow>(
            "SELECT target_id, leaderboard_message_id, control_chat_id, control_message_id FROM boards \
             WHERE leaderboard_message_id IS NOT NULL ORDER BY target_id",
        )
        .fetch_all(&self.pool)
        .await?;
        let contestant_rows = sqlx::query_as::<_, ContestantRow>(
            "SELECT target_id, name, link, count FROM contestants ORDER BY target_id, idx",
        )
        .fetch_all(&self.pool)
        .await?;

        let mut rosters: BTreeMap<i64, Vec<Contestant>> = BTreeMap::new();
        for row in contestant_rows {
            rosters.entry(row.target_id).or_default().push(Contestant {
                name: row.name,
                link: row.link,
                count: u32::try_from(row.count).unwrap_or(0),
            });
        }

        let boards = board_rows
            .into_iter()
            .map(|row| {
                let roster = Roster::from_contestants(
                    rosters.remove(&row.target_id).unwrap_or_default(),
                );
                let control = match (row.control_chat_id, row.control_message_id) {
                    (Some(chat_id), Some(message_id)) => Some(MessageRef {
                        chat_id,
                        message_id,
                    }),
                    _ => None,
                };
                let mut board = Board::new(roster, row.leaderboard_message_id);
                board.control = control;
                (row.target_id, board)
            })
            .collect();

        Ok(SessionSnapshot {
            registry: LinkRegistry::from_parts(pending, linked, awaiting, focus),
            boards,
        })
    }

    // ── Links ─────────────────────────────────────────────────────────

    pub async fn add_pending(&self, controller: ChatId) -> Result<(), sqlx::Error> {
        sqlx::query("INSERT OR IGNORE INTO pending_links (controller_id) VALUES (?)")
            .bind(controller)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Persist a confirmed link: pair, focus and consumed request. The target
    /// waits for names unless `awaiting_names` is false (it already has a
    /// board).
    pub async fn confirm_link(
        &self,
        target: ChatId,
        controller: ChatId,
        awaiting_names: bool,
    ) -> Result<(), sqlx::Error> {
        let mut tx = self.pool.begin().await?;

        sqlx::query("DELETE FROM pending_links WHERE controller_id = ?")
            .bind(controller)
            .execute(&mut *tx)
            .await?;
        sqlx::query(
            "INSERT INTO linked_pairs (target_id, controller_id) VALUES (?, ?) \
             ON CONFLICT(target_id) DO UPDATE SET controller_id = excluded.controller_id, linked_at = datetime('now')",
        )
        .bind(target)
        .bind(controller)
        .execute(&mut *tx)
        .await?;
        let awaiting = if awaiting_names {
            "INSERT OR IGNORE INTO awaiting_names (target_id) VALUES (?)"
        } else {
            "DELETE FROM awaiting_names WHERE target_id = ?"
        };
        sqlx::query(awaiting).bind(target).execute(&mut *tx).await?;
        sqlx::query(
            "INSERT INTO controller_focus (controller_id, target_id) VALUES (?, ?) \
             ON CONFLICT(controller_id) DO UPDATE SET target_id = excluded.target_id",
        )
        .bind(controller)
        .bind(target)
        .execute(&mut *tx)
        .await?;

        tx.commit().await
    }

    // ── Boards ────────────────────────────────────────────────────────

    /// Store `roster` for `target` as an unpublished board, replacing any
    /// earlier board of `target` that was never published.
    pub async fn create_board(&self, target: ChatId, roster: &Roster) -> Result<(), sqlx::Error> {
        let mut tx = self.pool.begin().await?;

        sqlx::query("DELETE FROM contestants WHERE target_id = ?")
            .bind(target)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM boards WHERE target_id = ? AND leaderboard_message_id IS NULL")
            .bind(target)
            .execute(&mut *tx)
            .await?;
        sqlx::query("INSERT INTO boards (target_id) VALUES (?)")
            .bind(target)
            .execute(&mut *tx)
            .await?;

        for (idx, contestant) in roster.iter().enumerate() {
            sqlx::query(
                "INSERT INTO contestants (target_id, idx, name, link, count) VALUES (?, ?, ?, ?, ?)",
            )
            .bind(target)
            .bind(idx as i64)
            .bind(&contestant.name)
            .bind(&contestant.link)
            .bind(i64::from(contestant.count))
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await
    }

    /// Drop an unpublished board.
    pub async fn discard_board(&self, target: ChatId) -> Result<(), sqlx::Error> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("DELETE FROM contestants WHERE target_id = ?")
            .bind(target)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM boards WHERE target_id = ? AND leaderboard_message_id IS NULL")
            .bind(target)
            .execute(&mut *tx)
            .await?;
        tx.commit().await
    }

    /// Bind the posted leaderboard message and stop waiting for names.
    pub async fn publish_board(
        &self,
        target: ChatId,
        leaderboard_message: MessageId,
    ) -> Result<(), sqlx::Error> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("UPDATE boards SET leaderboard_message_id = ? WHERE target_id = ?")
            .bind(leaderboard_message)
            .bind(target)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM awaiting_names WHERE target_id = ?")
            .bind(target)
            .execute(&mut *tx)
            .await?;
        tx.commit().await
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }

    pub async fn set_control_message(
        &self,
        target: ChatId,
        control: MessageRef,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            "UPDATE boards SET control_chat_id = ?, control_message_id = ? WHERE target_id = ?",
        )
        .bind(control.chat_id)
        .bind(control.message_id)
        .bind(target)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Write the given `(index, count)` pairs in one transaction.
    pub async fn save_counts(&self, target: ChatId, counts: &[(usize, u32)]) -> Result<(), sqlx::Error> {
        let mut tx = self.pool.begin().await?;
        for &(idx, count) in counts {
            sqlx::query("UPDATE contestants SET count = ? WHERE target_id = ? AND idx = ?")
                .bind(i64::from(count))
                .bind(target)
                .bind(idx as i64)
                .execute(&mut *tx)
                .await?;
        }
        tx.commit().await
    }
}
