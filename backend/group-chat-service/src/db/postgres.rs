//! PostgreSQL repositories
//!
//! Settings, mutes and member states are JSONB columns on the group row so
//! the aggregate is written in a single versioned UPDATE.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::types::Json;
use sqlx::{FromRow, PgPool};
use std::sync::Arc;
use uuid::Uuid;

use super::{GroupRepository, MessageRepository};
use crate::error::{AppError, AppResult};
use crate::models::{
    Group, GroupMessage, GroupSettings, MemberState, MessageKind, ModerationRecord, MutedUser,
};

const GROUP_COLUMNS: &str = "id, name, description, created_by, admins, members, settings, \
                             muted_users, member_states, version, created_at, updated_at";

const MESSAGE_COLUMNS: &str =
    "id, group_id, sender_id, kind, text, media_url, reply_to, moderation, created_at";

#[derive(FromRow)]
struct GroupRow {
    id: Uuid,
    name: String,
    description: String,
    created_by: Uuid,
    admins: Vec<Uuid>,
    members: Vec<Uuid>,
    settings: Json<GroupSettings>,
    muted_users: Json<Vec<MutedUser>>,
    member_states: Json<Vec<MemberState>>,
    version: i64,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl From<GroupRow> for Group {
    fn from(row: GroupRow) -> Self {
        Self {
            id: row.id,
            name: row.name,
            description: row.description,
            created_by: row.created_by,
            admins: row.admins,
            members: row.members,
            settings: row.settings.0,
            muted_users: row.muted_users.0,
            member_states: row.member_states.0,
            version: row.version,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

#[derive(FromRow)]
struct MessageRow {
    id: Uuid,
    group_id: Uuid,
    sender_id: Option<Uuid>,
    kind: String,
    text: Option<String>,
    media_url: Option<String>,
    reply_to: Option<Uuid>,
    moderation: Json<ModerationRecord>,
    created_at: DateTime<Utc>,
}

impl TryFrom<MessageRow> for GroupMessage {
    type Error = AppError;

    fn try_from(row: MessageRow) -> Result<Self, Self::Error> {
        let kind = MessageKind::from_db(&row.kind)
            .ok_or_else(|| AppError::Database(format!("unknown message kind: {}", row.kind)))?;

        Ok(Self {
            id: row.id,
            group_id: row.group_id,
            sender_id: row.sender_id,
            kind,
            text: row.text,
            media_url: row.media_url,
            reply_to: row.reply_to,
            moderation: row.moderation.0,
            created_at: row.created_at,
        })
    }
}

/// Group aggregate storage
pub struct PgGroupRepository {
    pool: Arc<PgPool>,
}

impl PgGroupRepository {
    pub fn new(pool: Arc<PgPool>) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl GroupRepository for PgGroupRepository {
    async fn insert(&self, group: &Group) -> AppResult<()> {
        sqlx::query(
            r#"
            INSERT INTO groups (
                id, name, description, created_by, admins, members,
                settings, muted_users, member_states, version, created_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
            "#,
        )
        .bind(group.id)
        .bind(&group.name)
        .bind(&group.description)
        .bind(group.created_by)
        .bind(&group.admins)
        .bind(&group.members)
        .bind(Json(&group.settings))
        .bind(Json(&group.muted_users))
        .bind(Json(&group.member_states))
        .bind(group.version)
        .bind(group.created_at)
        .bind(group.updated_at)
        .execute(&*self.pool)
        .await?;

        tracing::info!(
            group_id = %group.id,
            created_by = %group.created_by,
            members = group.members.len(),
            "Group created"
        );

        Ok(())
    }

    async fn find(&self, group_id: Uuid) -> AppResult<Option<Group>> {
        let row = sqlx::query_as::<_, GroupRow>(&format!(
            "SELECT {GROUP_COLUMNS} FROM groups WHERE id = $1"
        ))
        .bind(group_id)
        .fetch_optional(&*self.pool)
        .await?;

        Ok(row.map(Group::from))
    }

    async fn list_for_member(&self, user_id: Uuid) -> AppResult<Vec<Group>> {
        let rows = sqlx::query_as::<_, GroupRow>(&format!(
            "SELECT {GROUP_COLUMNS} FROM groups WHERE $1 = ANY(members) ORDER BY updated_at DESC"
        ))
        .bind(user_id)
        .fetch_all(&*self.pool)
        .await?;

        Ok(rows.into_iter().map(Group::from).collect())
    }

    async fn save(&self, group: &Group) -> AppResult<Group> {
        let row = sqlx::query_as::<_, GroupRow>(&format!(
            r#"
            UPDATE groups
            SET name = $3,
                description = $4,
                admins = $5,
                members = $6,
                settings = $7,
                muted_users = $8,
                member_states = $9,
                version = version + 1,
                updated_at = NOW()
            WHERE id = $1 AND version = $2
            RETURNING {GROUP_COLUMNS}
            "#
        ))
        .bind(group.id)
        .bind(group.version)
        .bind(&group.name)
        .bind(&group.description)
        .bind(&group.admins)
        .bind(&group.members)
        .bind(Json(&group.settings))
        .bind(Json(&group.muted_users))
        .bind(Json(&group.member_states))
        .fetch_optional(&*self.pool)
        .await?;

        if let Some(row) = row {
            return Ok(row.into());
        }

        // No row updated: either the version moved on or the group is gone
        let exists =
            sqlx::query_scalar::<_, bool>("SELECT EXISTS(SELECT 1 FROM groups WHERE id = $1)")
                .bind(group.id)
                .fetch_one(&*self.pool)
                .await?;

        if exists {
            Err(AppError::VersionConflict)
        } else {
            Err(AppError::NotFound)
        }
    }
}

/// Message storage
pub struct PgMessageRepository {
    pool: Arc<PgPool>,
}

impl PgMessageRepository {
    pub fn new(pool: Arc<PgPool>) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl MessageRepository for PgMessageRepository {
    async fn insert(&self, message: &GroupMessage) -> AppResult<()> {
        sqlx::query(
            r#"
            INSERT INTO group_messages (
                id, group_id, sender_id, kind, text, media_url, reply_to, moderation, created_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            "#,
        )
        .bind(message.id)
        .bind(message.group_id)
        .bind(message.sender_id)
        .bind(message.kind.as_str())
        .bind(&message.text)
        .bind(&message.media_url)
        .bind(message.reply_to)
        .bind(Json(&message.moderation))
        .bind(message.created_at)
        .execute(&*self.pool)
        .await?;

        Ok(())
    }

    async fn find(&self, group_id: Uuid, message_id: Uuid) -> AppResult<Option<GroupMessage>> {
        let row = sqlx::query_as::<_, MessageRow>(&format!(
            "SELECT {MESSAGE_COLUMNS} FROM group_messages WHERE id = $1 AND group_id = $2"
        ))
        .bind(message_id)
        .bind(group_id)
        .fetch_optional(&*self.pool)
        .await?;

        row.map(GroupMessage::try_from).transpose()
    }

    async fn list(
        &self,
        group_id: Uuid,
        before: Option<DateTime<Utc>>,
        limit: i64,
    ) -> AppResult<Vec<GroupMessage>> {
        let rows = sqlx::query_as::<_, MessageRow>(&format!(
            r#"
            SELECT {MESSAGE_COLUMNS}
            FROM group_messages
            WHERE group_id = $1 AND ($2::timestamptz IS NULL OR created_at < $2)
            ORDER BY created_at DESC
            LIMIT $3
            "#
        ))
        .bind(group_id)
        .bind(before)
        .bind(limit)
        .fetch_all(&*self.pool)
        .await?;

        rows.into_iter().map(GroupMessage::try_from).collect()
    }

    async fn update_moderation(
        &self,
        message_id: Uuid,
        moderation: &ModerationRecord,
    ) -> AppResult<GroupMessage> {
        let row = sqlx::query_as::<_, MessageRow>(&format!(
            "UPDATE group_messages SET moderation = $2 WHERE id = $1 RETURNING {MESSAGE_COLUMNS}"
        ))
        .bind(message_id)
        .bind(Json(moderation))
        .fetch_one(&*self.pool)
        .await?;

        tracing::debug!(
            message_id = %message_id,
            status = moderation.status.as_str(),
            action = moderation.action.as_str(),
            "Message moderation updated"
        );

        GroupMessage::try_from(row)
    }
}
