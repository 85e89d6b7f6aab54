//! Request payloads accepted by the group API

use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::Validate;

use super::{GroupSettings, ModerationStatus};

pub const MAX_MESSAGE_CHARS: u64 = 4000;
pub const MIN_GROUP_NAME_CHARS: usize = 3;
pub const MAX_GROUP_NAME_CHARS: usize = 64;

#[derive(Debug, Clone, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct CreateGroupRequest {
    #[validate(length(min = 3, max = 64, message = "group name must be 3 to 64 characters"))]
    pub name: String,
    #[serde(default)]
    #[validate(length(max = 500))]
    pub description: String,
    #[serde(default)]
    pub members: Vec<Uuid>,
}

/// Partial settings update; absent fields keep their value
#[derive(Debug, Clone, Default, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct UpdateSettingsRequest {
    pub ai_moderator_enabled: Option<bool>,
    pub auto_mute_enabled: Option<bool>,
    #[validate(range(min = 1, max = 10080))]
    pub auto_mute_minutes: Option<u32>,
    #[validate(range(min = 1, max = 100))]
    pub warn_threshold: Option<u32>,
    #[validate(range(min = 1, max = 1000))]
    pub spam_limit_per_minute: Option<u32>,
    #[validate(range(min = 1, max = 1000))]
    pub flood_limit_per_minute: Option<u32>,
    pub highlight_quality: Option<bool>,
}

impl UpdateSettingsRequest {
    pub fn apply(&self, settings: &mut GroupSettings) {
        if let Some(v) = self.ai_moderator_enabled {
            settings.ai_moderator_enabled = v;
        }
        if let Some(v) = self.auto_mute_enabled {
            settings.auto_mute_enabled = v;
        }
        if let Some(v) = self.auto_mute_minutes {
            settings.auto_mute_minutes = v;
        }
        if let Some(v) = self.warn_threshold {
            settings.warn_threshold = v;
        }
        if let Some(v) = self.spam_limit_per_minute {
            settings.spam_limit_per_minute = Some(v);
        }
        if let Some(v) = self.flood_limit_per_minute {
            settings.flood_limit_per_minute = Some(v);
        }
        if let Some(v) = self.highlight_quality {
            settings.highlight_quality = v;
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AddMemberRequest {
    pub user_id: Uuid,
}

fn default_mute_minutes() -> u32 {
    10
}

#[derive(Debug, Clone, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct MuteMemberRequest {
    #[serde(default = "default_mute_minutes")]
    #[validate(range(min = 1, max = 10080))]
    pub minutes: u32,
    #[serde(default)]
    #[validate(length(max = 200))]
    pub reason: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct SendMessageRequest {
    #[validate(length(max = 4000, message = "message text is too long"))]
    pub text: Option<String>,
    #[validate(url)]
    pub media_url: Option<String>,
    pub reply_to: Option<Uuid>,
}

impl SendMessageRequest {
    /// Trimmed text, None when blank
    pub fn normalized_text(&self) -> Option<String> {
        self.text
            .as_deref()
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .map(str::to_string)
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ModerationOverrideRequest {
    pub status: ModerationStatus,
    #[serde(default)]
    pub note: Option<String>,
}
