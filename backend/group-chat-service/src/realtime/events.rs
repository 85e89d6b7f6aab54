use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::{GroupMessage, GroupSettings, ModerationAction, ModerationFlag, ModerationRecord};

/// Outbound events delivered to group members
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum GroupEvent {
    /// New message, always with a clean moderation record
    #[serde(rename_all = "camelCase")]
    GroupMessage { group_id: Uuid, message: GroupMessage },

    #[serde(rename_all = "camelCase")]
    GroupMessageUpdated {
        group_id: Uuid,
        message_id: Uuid,
        moderation: ModerationRecord,
    },

    #[serde(rename_all = "camelCase")]
    GroupSystemMessage { group_id: Uuid, message: GroupMessage },

    #[serde(rename_all = "camelCase")]
    GroupUserMuted {
        group_id: Uuid,
        member_id: Uuid,
        muted_until: DateTime<Utc>,
        reason: String,
        /// None for pipeline-issued mutes
        by: Option<Uuid>,
    },

    #[serde(rename_all = "camelCase")]
    GroupUserUnmuted {
        group_id: Uuid,
        member_id: Uuid,
        by: Uuid,
    },

    /// Private notice, only sent to the affected member
    #[serde(rename_all = "camelCase")]
    GroupModerationNotice {
        group_id: Uuid,
        /// Message that triggered the notice, None for admin actions
        #[serde(default, skip_serializing_if = "Option::is_none")]
        message_id: Option<Uuid>,
        action: ModerationAction,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        flags: Vec<ModerationFlag>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        warnings: Option<u32>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        muted_until: Option<DateTime<Utc>>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        reason: Option<String>,
    },

    #[serde(rename_all = "camelCase")]
    GroupMemberAdded {
        group_id: Uuid,
        member_id: Uuid,
        by: Uuid,
    },

    #[serde(rename_all = "camelCase")]
    GroupMemberRemoved {
        group_id: Uuid,
        member_id: Uuid,
        by: Uuid,
    },

    #[serde(rename_all = "camelCase")]
    GroupAdminsUpdated { group_id: Uuid, admins: Vec<Uuid> },

    #[serde(rename_all = "camelCase")]
    GroupSettingsUpdated {
        group_id: Uuid,
        settings: GroupSettings,
    },
}

impl GroupEvent {
    pub fn event_type(&self) -> &'static str {
        match self {
            GroupEvent::GroupMessage { .. } => "groupMessage",
            GroupEvent::GroupMessageUpdated { .. } => "groupMessageUpdated",
            GroupEvent::GroupSystemMessage { .. } => "groupSystemMessage",
            GroupEvent::GroupUserMuted { .. } => "groupUserMuted",
            GroupEvent::GroupUserUnmuted { .. } => "groupUserUnmuted",
            GroupEvent::GroupModerationNotice { .. } => "groupModerationNotice",
            GroupEvent::GroupMemberAdded { .. } => "groupMemberAdded",
            GroupEvent::GroupMemberRemoved { .. } => "groupMemberRemoved",
            GroupEvent::GroupAdminsUpdated { .. } => "groupAdminsUpdated",
            GroupEvent::GroupSettingsUpdated { .. } => "groupSettingsUpdated",
        }
    }
}

/// Delivery of events to connected members.
///
/// Delivery is best effort: members without a live connection miss the
/// event and catch up through the message history.
#[async_trait]
pub trait EventSink: Send + Sync {
    /// Every connection subscribed to the group
    async fn to_group(&self, group_id: Uuid, event: GroupEvent);

    /// Connections of one member of the group
    async fn to_user(&self, group_id: Uuid, user_id: Uuid, event: GroupEvent);

    /// Close the member's connections to the group once they lose membership
    async fn disconnect_member(&self, _group_id: Uuid, _user_id: Uuid) {}
}
