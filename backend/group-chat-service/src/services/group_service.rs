//! Group operations: membership, settings, mutes and messaging
//!
//! Every write to the group aggregate goes through `mutate_group`; the
//! authorization check runs inside the mutation so it sees the same version
//! that is written.

use chrono::{DateTime, Duration, Utc};
use std::sync::Arc;
use uuid::Uuid;
use validator::Validate;

use crate::db::{load_group, mutate_group, GroupRepository, MessageRepository};
use crate::error::{AppError, AppResult};
use crate::models::{
    CreateGroupRequest, Group, GroupMessage, GroupView, ModerationAction, ModerationOverrideRequest,
    ModerationRecord, MuteMemberRequest, MutedUser, SendMessageRequest, UpdateSettingsRequest,
    MAX_GROUP_NAME_CHARS, MIN_GROUP_NAME_CHARS,
};
use crate::moderation::ModerationOrchestrator;
use crate::realtime::{EventSink, GroupEvent};

pub const DEFAULT_PAGE_SIZE: i64 = 50;
pub const MAX_PAGE_SIZE: i64 = 100;

fn require_member(group: &Group, user_id: Uuid) -> AppResult<()> {
    if group.is_member(user_id) {
        Ok(())
    } else {
        Err(AppError::Forbidden("not a member of this group".to_string()))
    }
}

fn require_admin(group: &Group, user_id: Uuid) -> AppResult<()> {
    if group.is_admin(user_id) {
        Ok(())
    } else {
        Err(AppError::Forbidden("group admin required".to_string()))
    }
}

pub struct GroupService {
    groups: Arc<dyn GroupRepository>,
    messages: Arc<dyn MessageRepository>,
    events: Arc<dyn EventSink>,
    orchestrator: Arc<ModerationOrchestrator>,
}

impl GroupService {
    pub fn new(
        groups: Arc<dyn GroupRepository>,
        messages: Arc<dyn MessageRepository>,
        events: Arc<dyn EventSink>,
        orchestrator: Arc<ModerationOrchestrator>,
    ) -> Self {
        Self {
            groups,
            messages,
            events,
            orchestrator,
        }
    }

    pub async fn create_group(&self, creator: Uuid, req: CreateGroupRequest) -> AppResult<Group> {
        req.validate()?;
        let name = req.name.trim();
        let name_chars = name.chars().count();
        if !(MIN_GROUP_NAME_CHARS..=MAX_GROUP_NAME_CHARS).contains(&name_chars) {
            return Err(AppError::BadRequest(format!(
                "group name must be {MIN_GROUP_NAME_CHARS} to {MAX_GROUP_NAME_CHARS} characters"
            )));
        }

        let group = Group::new(
            name.to_string(),
            req.description.trim().to_string(),
            creator,
            &req.members,
        );
        self.groups.insert(&group).await?;
        Ok(group)
    }

    pub async fn list_groups(&self, user_id: Uuid) -> AppResult<Vec<GroupView>> {
        let groups = self.groups.list_for_member(user_id).await?;
        Ok(groups
            .into_iter()
            .map(|g| GroupView::for_viewer(g, user_id))
            .collect())
    }

    pub async fn get_group(&self, group_id: Uuid, user_id: Uuid) -> AppResult<GroupView> {
        let group = load_group(self.groups.as_ref(), group_id).await?;
        require_member(&group, user_id)?;
        Ok(GroupView::for_viewer(group, user_id))
    }

    pub async fn update_settings(
        &self,
        group_id: Uuid,
        admin_id: Uuid,
        req: UpdateSettingsRequest,
    ) -> AppResult<Group> {
        req.validate()?;

        let (group, _) = mutate_group(self.groups.as_ref(), group_id, |group| {
            require_admin(group, admin_id)?;
            req.apply(&mut group.settings);
            Ok(())
        })
        .await?;

        tracing::info!(group_id = %group_id, admin_id = %admin_id, "Group settings updated");
        self.events
            .to_group(
                group_id,
                GroupEvent::GroupSettingsUpdated {
                    group_id,
                    settings: group.settings.clone(),
                },
            )
            .await;

        Ok(group)
    }

    pub async fn add_member(
        &self,
        group_id: Uuid,
        admin_id: Uuid,
        user_id: Uuid,
    ) -> AppResult<Group> {
        let (group, _) = mutate_group(self.groups.as_ref(), group_id, |group| {
            require_admin(group, admin_id)?;
            group.add_member(user_id)?;
            Ok(())
        })
        .await?;

        self.events
            .to_group(
                group_id,
                GroupEvent::GroupMemberAdded {
                    group_id,
                    member_id: user_id,
                    by: admin_id,
                },
            )
            .await;

        Ok(group)
    }

    /// Remove a member; admins may remove anyone, members may leave
    pub async fn remove_member(
        &self,
        group_id: Uuid,
        actor_id: Uuid,
        user_id: Uuid,
    ) -> AppResult<Group> {
        let (group, _) = mutate_group(self.groups.as_ref(), group_id, |group| {
            if actor_id != user_id {
                require_admin(group, actor_id)?;
            }
            group.remove_member(user_id)?;
            Ok(())
        })
        .await?;

        tracing::info!(
            group_id = %group_id,
            member_id = %user_id,
            by = %actor_id,
            "Member removed from group"
        );
        self.events
            .to_group(
                group_id,
                GroupEvent::GroupMemberRemoved {
                    group_id,
                    member_id: user_id,
                    by: actor_id,
                },
            )
            .await;
        self.events.disconnect_member(group_id, user_id).await;

        Ok(group)
    }

    pub async fn promote(&self, group_id: Uuid, admin_id: Uuid, user_id: Uuid) -> AppResult<Group> {
        let (group, _) = mutate_group(self.groups.as_ref(), group_id, |group| {
            require_admin(group, admin_id)?;
            group.promote(user_id)?;
            Ok(())
        })
        .await?;

        self.emit_admins(&group).await;
        Ok(group)
    }

    /// Demote an admin; the last admin cannot be demoted
    pub async fn demote(&self, group_id: Uuid, admin_id: Uuid, user_id: Uuid) -> AppResult<Group> {
        let (group, _) = mutate_group(self.groups.as_ref(), group_id, |group| {
            require_admin(group, admin_id)?;
            group.demote(user_id)?;
            Ok(())
        })
        .await?;

        self.emit_admins(&group).await;
        Ok(group)
    }

    async fn emit_admins(&self, group: &Group) {
        self.events
            .to_group(
                group.id,
                GroupEvent::GroupAdminsUpdated {
                    group_id: group.id,
                    admins: group.admins.clone(),
                },
            )
            .await;
    }

    /// Mute a member, replacing any previous mute of the same member
    pub async fn mute_member(
        &self,
        group_id: Uuid,
        admin_id: Uuid,
        user_id: Uuid,
        req: MuteMemberRequest,
    ) -> AppResult<MutedUser> {
        req.validate()?;

        let lock = self.orchestrator.group_lock(group_id);
        let _guard = lock.lock().await;

        let (_, entry) = mutate_group(self.groups.as_ref(), group_id, |group| {
            require_admin(group, admin_id)?;
            if !group.is_member(user_id) {
                return Err(AppError::NotFound);
            }

            let now = Utc::now();
            let entry = MutedUser {
                user_id,
                muted_until: now + Duration::minutes(i64::from(req.minutes)),
                reason: req
                    .reason
                    .clone()
                    .filter(|r| !r.trim().is_empty())
                    .unwrap_or_else(|| "muted by admin".to_string()),
                muted_by: Some(admin_id),
                created_at: now,
            };
            group.prune_expired_mutes(now);
            group.upsert_mute(entry.clone());
            Ok(entry)
        })
        .await?;

        tracing::info!(
            group_id = %group_id,
            user_id = %user_id,
            admin_id = %admin_id,
            muted_until = %entry.muted_until,
            "Member muted by admin"
        );

        self.events
            .to_group(
                group_id,
                GroupEvent::GroupUserMuted {
                    group_id,
                    member_id: user_id,
                    muted_until: entry.muted_until,
                    reason: entry.reason.clone(),
                    by: Some(admin_id),
                },
            )
            .await;
        self.events
            .to_user(
                group_id,
                user_id,
                GroupEvent::GroupModerationNotice {
                    group_id,
                    message_id: None,
                    action: ModerationAction::Muted,
                    flags: Vec::new(),
                    warnings: None,
                    muted_until: Some(entry.muted_until),
                    reason: Some(entry.reason.clone()),
                },
            )
            .await;

        Ok(entry)
    }

    pub async fn unmute_member(
        &self,
        group_id: Uuid,
        admin_id: Uuid,
        user_id: Uuid,
    ) -> AppResult<()> {
        let lock = self.orchestrator.group_lock(group_id);
        let _guard = lock.lock().await;

        mutate_group(self.groups.as_ref(), group_id, |group| {
            require_admin(group, admin_id)?;
            if group.remove_mute(user_id) {
                Ok(())
            } else {
                Err(AppError::NotFound)
            }
        })
        .await?;

        tracing::info!(group_id = %group_id, user_id = %user_id, admin_id = %admin_id, "Member unmuted");
        self.events
            .to_group(
                group_id,
                GroupEvent::GroupUserUnmuted {
                    group_id,
                    member_id: user_id,
                    by: admin_id,
                },
            )
            .await;

        Ok(())
    }

    /// Active mutes; expired entries are pruned and the prune persisted
    pub async fn list_mutes(&self, group_id: Uuid, admin_id: Uuid) -> AppResult<Vec<MutedUser>> {
        let group = load_group(self.groups.as_ref(), group_id).await?;
        require_admin(&group, admin_id)?;

        let group = self.prune_mutes(group).await?;
        Ok(group.muted_users)
    }

    async fn prune_mutes(&self, group: Group) -> AppResult<Group> {
        if !group.has_expired_mutes(Utc::now()) {
            return Ok(group);
        }

        let (group, pruned) = mutate_group(self.groups.as_ref(), group.id, |group| {
            Ok(group.prune_expired_mutes(Utc::now()))
        })
        .await?;

        tracing::debug!(group_id = %group.id, pruned, "Expired mutes pruned");
        Ok(group)
    }

    pub async fn list_messages(
        &self,
        group_id: Uuid,
        user_id: Uuid,
        before: Option<DateTime<Utc>>,
        limit: Option<i64>,
    ) -> AppResult<Vec<GroupMessage>> {
        let group = load_group(self.groups.as_ref(), group_id).await?;
        require_member(&group, user_id)?;

        let limit = limit.unwrap_or(DEFAULT_PAGE_SIZE).clamp(1, MAX_PAGE_SIZE);
        self.messages.list(group_id, before, limit).await
    }

    /// Store and broadcast a message as clean, then hand it to moderation
    pub async fn send_message(
        &self,
        group_id: Uuid,
        sender_id: Uuid,
        req: SendMessageRequest,
    ) -> AppResult<GroupMessage> {
        req.validate()?;
        let text = req.normalized_text();
        let media_url = req
            .media_url
            .as_deref()
            .map(str::trim)
            .filter(|u| !u.is_empty())
            .map(str::to_string);
        if text.is_none() && media_url.is_none() {
            return Err(AppError::BadRequest(
                "message needs text or media".to_string(),
            ));
        }

        let group = load_group(self.groups.as_ref(), group_id).await?;
        require_member(&group, sender_id)?;

        let group = self.prune_mutes(group).await?;
        if let Some(mute) = group.active_mute(sender_id, Utc::now()) {
            return Err(AppError::Muted {
                muted_until: mute.muted_until,
                reason: mute.reason.clone(),
            });
        }

        if let Some(reply_to) = req.reply_to {
            if self.messages.find(group_id, reply_to).await?.is_none() {
                return Err(AppError::BadRequest(
                    "replied message does not exist in this group".to_string(),
                ));
            }
        }

        let message = GroupMessage::from_user(group_id, sender_id, text, media_url, req.reply_to);
        self.messages.insert(&message).await?;

        self.events
            .to_group(
                group_id,
                GroupEvent::GroupMessage {
                    group_id,
                    message: message.clone(),
                },
            )
            .await;
        self.orchestrator.schedule(message.clone());

        Ok(message)
    }

    /// Admin review: clear or block a message
    pub async fn override_moderation(
        &self,
        group_id: Uuid,
        admin_id: Uuid,
        message_id: Uuid,
        req: ModerationOverrideRequest,
    ) -> AppResult<GroupMessage> {
        let group = load_group(self.groups.as_ref(), group_id).await?;
        require_admin(&group, admin_id)?;

        self.messages
            .find(group_id, message_id)
            .await?
            .ok_or(AppError::NotFound)?;

        let record = ModerationRecord::overridden(req.status, req.note, Utc::now());
        let message = self.messages.update_moderation(message_id, &record).await?;

        tracing::info!(
            group_id = %group_id,
            message_id = %message_id,
            admin_id = %admin_id,
            status = record.status.as_str(),
            "Moderation overridden by admin"
        );
        self.events
            .to_group(
                group_id,
                GroupEvent::GroupMessageUpdated {
                    group_id,
                    message_id,
                    moderation: record,
                },
            )
            .await;

        Ok(message)
    }
}
