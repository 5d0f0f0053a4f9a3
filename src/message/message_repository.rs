use async_trait::async_trait;
use sqlx::PgPool;
use uuid::Uuid;

use super::message_models::{HistoryCursor, Message, MessageRow, NewMessage, ReactionRow, ReadRow};
use crate::error::{AppError, Result};
use crate::store::MessageStore;

#[derive(Clone)]
pub struct PgMessageRepository {
    pool: PgPool,
}

impl PgMessageRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Attaches reactions and read receipts to a batch of rows, keeping row order.
    async fn hydrate(&self, rows: Vec<MessageRow>) -> Result<Vec<Message>> {
        if rows.is_empty() {
            return Ok(Vec::new());
        }

        let ids: Vec<Uuid> = rows.iter().map(|r| r.id).collect();

        let reactions = sqlx::query_as::<_, ReactionRow>(
            "SELECT message_id, user_id, reaction FROM message_reactions WHERE message_id = ANY($1)",
        )
        .bind(&ids)
        .fetch_all(&self.pool)
        .await?;

        let reads = sqlx::query_as::<_, ReadRow>(
            "SELECT message_id, user_id FROM message_reads WHERE message_id = ANY($1)",
        )
        .bind(&ids)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter()
            .map(|row| row.into_message(&reactions, &reads))
            .collect()
    }

    async fn load(&self, message_id: Uuid) -> Result<Message> {
        MessageStore::find_by_id(self, message_id)
            .await?
            .ok_or_else(|| AppError::NotFound("Message not found".to_string()))
    }

    /// Bumps `updated_at`, failing with `NotFound` for unknown ids.
    async fn touch(&self, message_id: Uuid) -> Result<()> {
        let result = sqlx::query("UPDATE messages SET updated_at = clock_timestamp() WHERE id = $1")
            .bind(message_id)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(AppError::NotFound("Message not found".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl MessageStore for PgMessageRepository {
    async fn insert(&self, message: NewMessage) -> Result<Message> {
        let mut tx = self.pool.begin().await?;

        let row = sqlx::query_as::<_, MessageRow>(
            "INSERT INTO messages (id, conversation_id, sender_id, kind, content, media, reply_to)
             VALUES ($1, $2, $3, $4, $5, $6, $7)
             RETURNING *",
        )
        .bind(Uuid::new_v4())
        .bind(message.conversation_id)
        .bind(message.sender_id)
        .bind(message.kind.as_str())
        .bind(&message.content)
        .bind(message.media.map(sqlx::types::Json))
        .bind(message.reply_to)
        .fetch_one(&mut *tx)
        .await?;

        if !message.read_by.is_empty() {
            sqlx::query(
                "INSERT INTO message_reads (message_id, user_id)
                 SELECT $1, unnest($2::uuid[])
                 ON CONFLICT DO NOTHING",
            )
            .bind(row.id)
            .bind(&message.read_by)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;

        let reads: Vec<ReadRow> = message
            .read_by
            .iter()
            .map(|user_id| ReadRow { message_id: row.id, user_id: *user_id })
            .collect();
        row.into_message(&[], &reads)
    }

    async fn find_by_id(&self, message_id: Uuid) -> Result<Option<Message>> {
        let row = sqlx::query_as::<_, MessageRow>("SELECT * FROM messages WHERE id = $1")
            .bind(message_id)
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(row) => Ok(self.hydrate(vec![row]).await?.pop()),
            None => Ok(None),
        }
    }

    async fn history(
        &self,
        conversation_id: Uuid,
        cursor: Option<HistoryCursor>,
        limit: usize,
    ) -> Result<Vec<Message>> {
        // seq starts at 1, so pairing a seq-less cursor with 0 compares on the
        // timestamp alone.
        let rows = sqlx::query_as::<_, MessageRow>(
            "SELECT * FROM messages
             WHERE conversation_id = $1
               AND ($2::timestamptz IS NULL
                    OR (created_at, seq) < ($2, COALESCE($3::bigint, 0)))
             ORDER BY created_at DESC, seq DESC
             LIMIT $4",
        )
        .bind(conversation_id)
        .bind(cursor.map(|c| c.before))
        .bind(cursor.and_then(|c| c.before_seq))
        .bind(i64::try_from(limit).unwrap_or(i64::MAX))
        .fetch_all(&self.pool)
        .await?;

        self.hydrate(rows).await
    }

    async fn list_all(&self, conversation_id: Uuid) -> Result<Vec<Message>> {
        let rows = sqlx::query_as::<_, MessageRow>(
            "SELECT * FROM messages
             WHERE conversation_id = $1
             ORDER BY created_at ASC, seq ASC",
        )
        .bind(conversation_id)
        .fetch_all(&self.pool)
        .await?;

        self.hydrate(rows).await
    }

    async fn latest_visible(&self, conversation_id: Uuid) -> Result<Option<Message>> {
        let row = sqlx::query_as::<_, MessageRow>(
            "SELECT * FROM messages
             WHERE conversation_id = $1 AND NOT is_deleted
             ORDER BY created_at DESC, seq DESC
             LIMIT 1",
        )
        .bind(conversation_id)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => Ok(self.hydrate(vec![row]).await?.pop()),
            None => Ok(None),
        }
    }

    async fn set_reaction(&self, message_id: Uuid, user_id: Uuid, reaction: &str) -> Result<Message> {
        self.touch(message_id).await?;

        sqlx::query(
            "INSERT INTO message_reactions (message_id, user_id, reaction)
             VALUES ($1, $2, $3)
             ON CONFLICT (message_id, user_id)
             DO UPDATE SET reaction = EXCLUDED.reaction, created_at = NOW()",
        )
        .bind(message_id)
        .bind(user_id)
        .bind(reaction)
        .execute(&self.pool)
        .await?;

        self.load(message_id).await
    }

    async fn clear_reaction(&self, message_id: Uuid, user_id: Uuid) -> Result<Message> {
        self.touch(message_id).await?;

        sqlx::query("DELETE FROM message_reactions WHERE message_id = $1 AND user_id = $2")
            .bind(message_id)
            .bind(user_id)
            .execute(&self.pool)
            .await?;

        self.load(message_id).await
    }

    async fn add_read_receipt(&self, message_id: Uuid, user_id: Uuid) -> Result<Message> {
        self.touch(message_id).await?;

        sqlx::query(
            "INSERT INTO message_reads (message_id, user_id)
             VALUES ($1, $2)
             ON CONFLICT (message_id, user_id) DO NOTHING",
        )
        .bind(message_id)
        .bind(user_id)
        .execute(&self.pool)
        .await?;

        self.load(message_id).await
    }

    async fn soft_delete(&self, message_id: Uuid, tombstone: &str) -> Result<Message> {
        let result = sqlx::query(
            "UPDATE messages
             SET is_deleted = TRUE, content = $2, updated_at = clock_timestamp()
             WHERE id = $1",
        )
        .bind(message_id)
        .bind(tombstone)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(AppError::NotFound("Message not found".to_string()));
        }
        self.load(message_id).await
    }
}
