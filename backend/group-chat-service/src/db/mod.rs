//! Persistence for groups and group messages
//!
//! The group aggregate is saved as a whole with an optimistic version check.
//! Writers go through [`mutate_group`], which re-reads and re-applies the
//! mutation when another writer got there first.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::error::{AppError, AppResult};
use crate::models::{Group, GroupMessage, ModerationRecord};

pub mod memory;
pub mod postgres;

pub use memory::{InMemoryGroupRepository, InMemoryMessageRepository};
pub use postgres::{PgGroupRepository, PgMessageRepository};

/// Attempts made by [`mutate_group`] before giving up on version conflicts
pub const MAX_WRITE_ATTEMPTS: usize = 5;

#[async_trait]
pub trait GroupRepository: Send + Sync {
    async fn insert(&self, group: &Group) -> AppResult<()>;

    async fn find(&self, group_id: Uuid) -> AppResult<Option<Group>>;

    async fn list_for_member(&self, user_id: Uuid) -> AppResult<Vec<Group>>;

    /// Store `group` if the stored version still equals `group.version`.
    ///
    /// Returns the stored aggregate with its bumped version, or
    /// `AppError::VersionConflict` when the row changed in between.
    async fn save(&self, group: &Group) -> AppResult<Group>;
}

#[async_trait]
pub trait MessageRepository: Send + Sync {
    async fn insert(&self, message: &GroupMessage) -> AppResult<()>;

    async fn find(&self, group_id: Uuid, message_id: Uuid) -> AppResult<Option<GroupMessage>>;

    /// Newest first, strictly older than `before` when given
    async fn list(
        &self,
        group_id: Uuid,
        before: Option<DateTime<Utc>>,
        limit: i64,
    ) -> AppResult<Vec<GroupMessage>>;

    /// Replace the moderation record of a message, the only mutable part
    async fn update_moderation(
        &self,
        message_id: Uuid,
        moderation: &ModerationRecord,
    ) -> AppResult<GroupMessage>;
}

/// Load a group or fail with NotFound
pub async fn load_group(repo: &dyn GroupRepository, group_id: Uuid) -> AppResult<Group> {
    repo.find(group_id).await?.ok_or(AppError::NotFound)
}

/// Read-modify-write of a group aggregate.
///
/// `apply` runs against a fresh copy on every attempt and may run more than
/// once. An error from `apply` aborts without writing.
pub async fn mutate_group<T, F>(
    repo: &dyn GroupRepository,
    group_id: Uuid,
    mut apply: F,
) -> AppResult<(Group, T)>
where
    F: FnMut(&mut Group) -> AppResult<T> + Send,
    T: Send,
{
    let mut attempt = 0;
    loop {
        attempt += 1;
        let mut group = load_group(repo, group_id).await?;
        let output = apply(&mut group)?;

        match repo.save(&group).await {
            Ok(saved) => return Ok((saved, output)),
            Err(e) if e.is_retryable() && attempt < MAX_WRITE_ATTEMPTS => {
                tracing::debug!(
                    group_id = %group_id,
                    attempt,
                    "group version conflict, retrying"
                );
            }
            Err(e) => {
                if e.is_retryable() {
                    tracing::warn!(
                        group_id = %group_id,
                        attempts = attempt,
                        "giving up on group write after repeated version conflicts"
                    );
                }
                return Err(e);
            }
        }
    }
}
