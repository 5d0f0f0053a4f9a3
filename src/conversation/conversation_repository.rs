use std::collections::HashMap;

use async_trait::async_trait;
use sqlx::{PgPool, Postgres, Transaction};
use uuid::Uuid;

use super::conversation_models::{
    direct_pair_key, Conversation, ConversationRow, GroupInfoPatch, MessagePreview, NewGroup, ParticipantRow,
};
use crate::error::{AppError, Result};
use crate::store::ConversationStore;

const CONVERSATION_COLUMNS: &str = "c.id, c.kind, c.created_by, c.group_name, c.group_avatar, \
     c.group_description, c.last_message_id, c.last_message_preview, c.last_message_sender_id, \
     c.last_message_at, c.last_message_seq, c.created_at, c.updated_at";

#[derive(Clone)]
pub struct PgConversationRepository {
    pool: PgPool,
}

impl PgConversationRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    fn direct_key(user_a: Uuid, user_b: Uuid) -> String {
        let (low, high) = direct_pair_key(user_a, user_b);
        format!("{}:{}", low, high)
    }

    async fn participants_of(&self, conversation_ids: &[Uuid]) -> Result<Vec<ParticipantRow>> {
        let rows = sqlx::query_as::<_, ParticipantRow>(
            "SELECT conversation_id, user_id, is_admin, unread_count
             FROM conversation_participants
             WHERE conversation_id = ANY($1)",
        )
        .bind(conversation_ids)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows)
    }

    async fn load(&self, conversation_id: Uuid) -> Result<Conversation> {
        ConversationStore::find_by_id(self, conversation_id)
            .await?
            .ok_or_else(|| AppError::NotFound("Conversation not found".to_string()))
    }

    async fn insert_participants(
        tx: &mut Transaction<'_, Postgres>,
        conversation_id: Uuid,
        user_ids: &[Uuid],
    ) -> Result<()> {
        sqlx::query(
            "INSERT INTO conversation_participants (conversation_id, user_id)
             SELECT $1, unnest($2::uuid[])
             ON CONFLICT (conversation_id, user_id) DO NOTHING",
        )
        .bind(conversation_id)
        .bind(user_ids)
        .execute(&mut **tx)
        .await?;

        Ok(())
    }

    async fn touch(&self, conversation_id: Uuid) -> Result<()> {
        let result = sqlx::query("UPDATE conversations SET updated_at = NOW() WHERE id = $1")
            .bind(conversation_id)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(AppError::NotFound("Conversation not found".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl ConversationStore for PgConversationRepository {
    async fn get_or_create_direct(&self, user_a: Uuid, user_b: Uuid) -> Result<(Conversation, bool)> {
        let key = Self::direct_key(user_a, user_b);
        let mut tx = self.pool.begin().await?;

        // A concurrent insert of the same key blocks here until it commits, then
        // DO NOTHING applies and the SELECT below sees the winner's row.
        let inserted: Option<Uuid> = sqlx::query_scalar(
            "INSERT INTO conversations (id, kind, direct_key)
             VALUES ($1, 'direct', $2)
             ON CONFLICT (direct_key) DO NOTHING
             RETURNING id",
        )
        .bind(Uuid::new_v4())
        .bind(&key)
        .fetch_optional(&mut *tx)
        .await?;

        if let Some(conversation_id) = inserted {
            Self::insert_participants(&mut tx, conversation_id, &[user_a, user_b]).await?;
            tx.commit().await?;
            return Ok((self.load(conversation_id).await?, true));
        }
        tx.commit().await?;

        let existing: Uuid = sqlx::query_scalar("SELECT id FROM conversations WHERE direct_key = $1")
            .bind(&key)
            .fetch_one(&self.pool)
            .await?;

        Ok((self.load(existing).await?, false))
    }

    async fn insert_group(&self, group: NewGroup) -> Result<Conversation> {
        let conversation_id = Uuid::new_v4();
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            "INSERT INTO conversations (id, kind, created_by, group_name, group_description, group_avatar)
             VALUES ($1, 'group', $2, $3, $4, $5)",
        )
        .bind(conversation_id)
        .bind(group.creator_id)
        .bind(&group.name)
        .bind(group.description.as_deref())
        .bind(group.avatar_url.as_deref())
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            "INSERT INTO conversation_participants (conversation_id, user_id, is_admin)
             VALUES ($1, $2, TRUE)",
        )
        .bind(conversation_id)
        .bind(group.creator_id)
        .execute(&mut *tx)
        .await?;

        Self::insert_participants(&mut tx, conversation_id, &group.member_ids).await?;
        tx.commit().await?;

        self.load(conversation_id).await
    }

    async fn find_by_id(&self, conversation_id: Uuid) -> Result<Option<Conversation>> {
        let row = sqlx::query_as::<_, ConversationRow>(&format!(
            "SELECT {} FROM conversations c WHERE c.id = $1",
            CONVERSATION_COLUMNS
        ))
        .bind(conversation_id)
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = row else {
            return Ok(None);
        };

        let participants = self.participants_of(&[conversation_id]).await?;
        row.into_conversation(&participants).map(Some)
    }

    async fn list_for_user(&self, user_id: Uuid) -> Result<Vec<Conversation>> {
        let rows = sqlx::query_as::<_, ConversationRow>(&format!(
            "SELECT {} FROM conversations c
             INNER JOIN conversation_participants p ON p.conversation_id = c.id
             WHERE p.user_id = $1
             ORDER BY COALESCE(c.last_message_at, c.updated_at) DESC",
            CONVERSATION_COLUMNS
        ))
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;

        let ids: Vec<Uuid> = rows.iter().map(|r| r.id).collect();
        let participants = self.participants_of(&ids).await?;

        rows.into_iter()
            .map(|row| row.into_conversation(&participants))
            .collect()
    }

    async fn add_participants(&self, conversation_id: Uuid, user_ids: &[Uuid]) -> Result<Conversation> {
        let mut tx = self.pool.begin().await?;
        Self::insert_participants(&mut tx, conversation_id, user_ids).await?;
        tx.commit().await?;

        self.touch(conversation_id).await?;
        self.load(conversation_id).await
    }

    async fn remove_participant(&self, conversation_id: Uuid, user_id: Uuid) -> Result<Conversation> {
        sqlx::query(
            "DELETE FROM conversation_participants
             WHERE conversation_id = $1 AND user_id = $2",
        )
        .bind(conversation_id)
        .bind(user_id)
        .execute(&self.pool)
        .await?;

        self.touch(conversation_id).await?;
        self.load(conversation_id).await
    }

    async fn set_admin(&self, conversation_id: Uuid, user_id: Uuid, is_admin: bool) -> Result<Conversation> {
        sqlx::query(
            "UPDATE conversation_participants SET is_admin = $3
             WHERE conversation_id = $1 AND user_id = $2",
        )
        .bind(conversation_id)
        .bind(user_id)
        .bind(is_admin)
        .execute(&self.pool)
        .await?;

        self.touch(conversation_id).await?;
        self.load(conversation_id).await
    }

    async fn update_group_info(&self, conversation_id: Uuid, patch: &GroupInfoPatch) -> Result<Conversation> {
        let result = sqlx::query(
            "UPDATE conversations
             SET group_name = COALESCE($2, group_name),
                 group_description = COALESCE($3, group_description),
                 group_avatar = COALESCE($4, group_avatar),
                 updated_at = NOW()
             WHERE id = $1",
        )
        .bind(conversation_id)
        .bind(patch.name.as_deref())
        .bind(patch.description.as_deref())
        .bind(patch.avatar_url.as_deref())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(AppError::NotFound("Conversation not found".to_string()));
        }
        self.load(conversation_id).await
    }

    async fn delete(&self, conversation_id: Uuid) -> Result<()> {
        let result = sqlx::query("DELETE FROM conversations WHERE id = $1")
            .bind(conversation_id)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(AppError::NotFound("Conversation not found".to_string()));
        }
        Ok(())
    }

    async fn record_message(
        &self,
        conversation_id: Uuid,
        preview: &MessagePreview,
        count_unread: bool,
    ) -> Result<Conversation> {
        // One statement: the counter bump and the preview write commit together,
        // and `unread_count + 1` is evaluated against the locked row. The preview
        // only moves forward in (last_message_at, last_message_seq) order.
        let updated: Option<Uuid> = sqlx::query_scalar(
            "WITH bumped AS (
                 UPDATE conversation_participants
                 SET unread_count = unread_count + 1
                 WHERE conversation_id = $1 AND user_id <> $3 AND $6
                 RETURNING user_id
             ),
             advanced AS (
                 UPDATE conversations
                 SET last_message_id = $2,
                     last_message_sender_id = $3,
                     last_message_preview = $4,
                     last_message_at = $5,
                     last_message_seq = $7,
                     updated_at = GREATEST(updated_at, $5)
                 WHERE id = $1
                   AND (last_message_at IS NULL
                        OR (last_message_at, COALESCE(last_message_seq, 0)) < ($5, $7))
                 RETURNING id
             )
             SELECT id FROM conversations WHERE id = $1",
        )
        .bind(conversation_id)
        .bind(preview.message_id)
        .bind(preview.sender_id)
        .bind(&preview.preview)
        .bind(preview.sent_at)
        .bind(count_unread)
        .bind(preview.seq)
        .fetch_optional(&self.pool)
        .await?;

        match updated {
            Some(id) => self.load(id).await,
            None => Err(AppError::NotFound("Conversation not found".to_string())),
        }
    }

    async fn reset_unread(&self, conversation_id: Uuid, user_id: Uuid) -> Result<Conversation> {
        sqlx::query(
            "UPDATE conversation_participants SET unread_count = 0
             WHERE conversation_id = $1 AND user_id = $2",
        )
        .bind(conversation_id)
        .bind(user_id)
        .execute(&self.pool)
        .await?;

        self.load(conversation_id).await
    }

    async fn refresh_preview(
        &self,
        conversation_id: Uuid,
        expected: Option<Uuid>,
        preview: Option<&MessagePreview>,
    ) -> Result<Conversation> {
        sqlx::query(
            "UPDATE conversations
             SET last_message_id = $2,
                 last_message_sender_id = $3,
                 last_message_preview = $4,
                 last_message_at = $5,
                 last_message_seq = $6
             WHERE id = $1 AND last_message_id IS NOT DISTINCT FROM $7",
        )
        .bind(conversation_id)
        .bind(preview.map(|p| p.message_id))
        .bind(preview.map(|p| p.sender_id))
        .bind(preview.map(|p| p.preview.as_str()))
        .bind(preview.map(|p| p.sent_at))
        .bind(preview.map(|p| p.seq))
        .bind(expected)
        .execute(&self.pool)
        .await?;

        // Zero rows means either a missing conversation or a moved-on cache; `load` tells them apart.
        self.load(conversation_id).await
    }

    async fn overwrite_unread(
        &self,
        conversation_id: Uuid,
        counts: &HashMap<Uuid, u32>,
    ) -> Result<Conversation> {
        let (user_ids, values): (Vec<Uuid>, Vec<i32>) = counts
            .iter()
            .map(|(user_id, count)| (*user_id, i32::try_from(*count).unwrap_or(i32::MAX)))
            .unzip();

        sqlx::query(
            "UPDATE conversation_participants p
             SET unread_count = COALESCE(
                 (SELECT v.unread FROM unnest($2::uuid[], $3::int4[]) AS v(user_id, unread)
                  WHERE v.user_id = p.user_id),
                 0)
             WHERE p.conversation_id = $1",
        )
        .bind(conversation_id)
        .bind(&user_ids)
        .bind(&values)
        .execute(&self.pool)
        .await?;

        self.load(conversation_id).await
    }
}
