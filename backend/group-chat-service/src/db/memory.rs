//! In-process repositories used when no database is configured and in tests

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use tokio::sync::RwLock;
use uuid::Uuid;

use super::{GroupRepository, MessageRepository};
use crate::error::{AppError, AppResult};
use crate::models::{Group, GroupMessage, ModerationRecord};

#[derive(Default)]
pub struct InMemoryGroupRepository {
    groups: RwLock<HashMap<Uuid, Group>>,
}

impl InMemoryGroupRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl GroupRepository for InMemoryGroupRepository {
    async fn insert(&self, group: &Group) -> AppResult<()> {
        let mut guard = self.groups.write().await;
        if guard.contains_key(&group.id) {
            return Err(AppError::BadRequest(format!(
                "group {} already exists",
                group.id
            )));
        }
        guard.insert(group.id, group.clone());
        Ok(())
    }

    async fn find(&self, group_id: Uuid) -> AppResult<Option<Group>> {
        Ok(self.groups.read().await.get(&group_id).cloned())
    }

    async fn list_for_member(&self, user_id: Uuid) -> AppResult<Vec<Group>> {
        let guard = self.groups.read().await;
        let mut groups: Vec<Group> = guard
            .values()
            .filter(|g| g.is_member(user_id))
            .cloned()
            .collect();
        groups.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        Ok(groups)
    }

    async fn save(&self, group: &Group) -> AppResult<Group> {
        let mut guard = self.groups.write().await;
        let stored = guard.get_mut(&group.id).ok_or(AppError::NotFound)?;
        if stored.version != group.version {
            return Err(AppError::VersionConflict);
        }

        let mut next = group.clone();
        next.version = group.version + 1;
        next.updated_at = Utc::now();
        *stored = next.clone();
        Ok(next)
    }
}

#[derive(Default)]
pub struct InMemoryMessageRepository {
    messages: RwLock<HashMap<Uuid, GroupMessage>>,
}

impl InMemoryMessageRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl MessageRepository for InMemoryMessageRepository {
    async fn insert(&self, message: &GroupMessage) -> AppResult<()> {
        self.messages
            .write()
            .await
            .insert(message.id, message.clone());
        Ok(())
    }

    async fn find(&self, group_id: Uuid, message_id: Uuid) -> AppResult<Option<GroupMessage>> {
        Ok(self
            .messages
            .read()
            .await
            .get(&message_id)
            .filter(|m| m.group_id == group_id)
            .cloned())
    }

    async fn list(
        &self,
        group_id: Uuid,
        before: Option<DateTime<Utc>>,
        limit: i64,
    ) -> AppResult<Vec<GroupMessage>> {
        let guard = self.messages.read().await;
        let mut messages: Vec<GroupMessage> = guard
            .values()
            .filter(|m| m.group_id == group_id)
            .filter(|m| before.map_or(true, |b| m.created_at < b))
            .cloned()
            .collect();
        messages.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        messages.truncate(limit.max(0) as usize);
        Ok(messages)
    }

    async fn update_moderation(
        &self,
        message_id: Uuid,
        moderation: &ModerationRecord,
    ) -> AppResult<GroupMessage> {
        let mut guard = self.messages.write().await;
        let message = guard.get_mut(&message_id).ok_or(AppError::NotFound)?;
        message.moderation = moderation.clone();
        Ok(message.clone())
    }
}
