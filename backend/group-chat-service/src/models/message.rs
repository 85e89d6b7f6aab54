use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Scores at or above these values make a message "blocked" instead of "flagged"
pub const BLOCK_TOXICITY: f32 = 0.9;
pub const BLOCK_SPAM: f32 = 0.95;

/// Moderation status of a group message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModerationStatus {
    #[default]
    Clean,
    Flagged,
    Blocked,
}

impl ModerationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ModerationStatus::Clean => "clean",
            ModerationStatus::Flagged => "flagged",
            ModerationStatus::Blocked => "blocked",
        }
    }

    /// Status for a set of combined scores and the flags raised from them.
    ///
    /// Blocked wins over flagged; a message without flags that is not
    /// severe enough to block stays clean.
    pub fn derive(scores: &ModerationScores, flags: &[ModerationFlag]) -> Self {
        if scores.toxicity >= BLOCK_TOXICITY || scores.spam >= BLOCK_SPAM {
            ModerationStatus::Blocked
        } else if !flags.is_empty() {
            ModerationStatus::Flagged
        } else {
            ModerationStatus::Clean
        }
    }
}

/// Policy flag raised by the evaluator.
///
/// The declaration order is the canonical order flags are reported in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModerationFlag {
    Spam,
    Toxic,
    OffTopic,
    Flood,
}

impl ModerationFlag {
    pub fn as_str(&self) -> &'static str {
        match self {
            ModerationFlag::Spam => "spam",
            ModerationFlag::Toxic => "toxic",
            ModerationFlag::OffTopic => "off_topic",
            ModerationFlag::Flood => "flood",
        }
    }

    /// Comma separated flag names, used as a mute reason
    pub fn join(flags: &[ModerationFlag]) -> String {
        flags
            .iter()
            .map(|f| f.as_str())
            .collect::<Vec<_>>()
            .join(", ")
    }
}

/// Action recorded on a message after moderation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModerationAction {
    #[default]
    None,
    Warned,
    Muted,
    Highlighted,
    Blocked,
}

impl ModerationAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            ModerationAction::None => "none",
            ModerationAction::Warned => "warned",
            ModerationAction::Muted => "muted",
            ModerationAction::Highlighted => "highlighted",
            ModerationAction::Blocked => "blocked",
        }
    }
}

/// Combined scores, each in [0, 1]
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModerationScores {
    pub toxicity: f32,
    pub spam: f32,
    pub off_topic: f32,
    pub quality: f32,
}

/// Moderation metadata embedded in every group message
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ModerationRecord {
    pub status: ModerationStatus,
    pub flags: Vec<ModerationFlag>,
    pub action: ModerationAction,
    pub scores: ModerationScores,
    pub note: Option<String>,
    pub reviewed_at: Option<DateTime<Utc>>,
    pub highlighted: bool,
}

impl ModerationRecord {
    /// Default record attached at creation time
    pub fn clean() -> Self {
        Self::default()
    }

    /// Record written by an admin override
    pub fn overridden(status: ModerationStatus, note: Option<String>, now: DateTime<Utc>) -> Self {
        let action = match status {
            ModerationStatus::Blocked => ModerationAction::Blocked,
            _ => ModerationAction::None,
        };

        Self {
            status,
            flags: Vec::new(),
            action,
            scores: ModerationScores::default(),
            note,
            reviewed_at: Some(now),
            highlighted: false,
        }
    }
}

/// Who authored a message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageKind {
    User,
    System,
}

impl MessageKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageKind::User => "user",
            MessageKind::System => "system",
        }
    }

    pub fn from_db(s: &str) -> Option<Self> {
        match s {
            "user" => Some(Self::User),
            "system" => Some(Self::System),
            _ => None,
        }
    }
}

/// A message posted in a group.
///
/// Everything except `moderation` is immutable once persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GroupMessage {
    pub id: Uuid,
    pub group_id: Uuid,
    pub sender_id: Option<Uuid>,
    pub kind: MessageKind,
    pub text: Option<String>,
    pub media_url: Option<String>,
    pub reply_to: Option<Uuid>,
    pub moderation: ModerationRecord,
    pub created_at: DateTime<Utc>,
}

impl GroupMessage {
    /// New member-authored message with a clean moderation record
    pub fn from_user(
        group_id: Uuid,
        sender_id: Uuid,
        text: Option<String>,
        media_url: Option<String>,
        reply_to: Option<Uuid>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            group_id,
            sender_id: Some(sender_id),
            kind: MessageKind::User,
            text,
            media_url,
            reply_to,
            moderation: ModerationRecord::clean(),
            created_at: Utc::now(),
        }
    }

    /// System-authored announcement (no sender)
    pub fn system(group_id: Uuid, text: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            group_id,
            sender_id: None,
            kind: MessageKind::System,
            text: Some(text.into()),
            media_url: None,
            reply_to: None,
            moderation: ModerationRecord::clean(),
            created_at: Utc::now(),
        }
    }

    pub fn is_system(&self) -> bool {
        self.kind == MessageKind::System
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_derivation() {
        let mut scores = ModerationScores::default();
        assert_eq!(ModerationStatus::derive(&scores, &[]), ModerationStatus::Clean);
        assert_eq!(
            ModerationStatus::derive(&scores, &[ModerationFlag::Flood]),
            ModerationStatus::Flagged
        );

        scores.toxicity = 0.9;
        assert_eq!(
            ModerationStatus::derive(&scores, &[ModerationFlag::Toxic]),
            ModerationStatus::Blocked
        );

        scores.toxicity = 0.89;
        scores.spam = 0.95;
        assert_eq!(
            ModerationStatus::derive(&scores, &[ModerationFlag::Spam]),
            ModerationStatus::Blocked
        );
    }

    #[test]
    fn test_flag_join() {
        assert_eq!(
            ModerationFlag::join(&[ModerationFlag::Spam, ModerationFlag::Flood]),
            "spam, flood"
        );
        assert_eq!(ModerationFlag::join(&[]), "");
    }

    #[test]
    fn test_record_wire_format() {
        let record = ModerationRecord {
            status: ModerationStatus::Flagged,
            flags: vec![ModerationFlag::OffTopic],
            action: ModerationAction::Warned,
            ..Default::default()
        };

        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["status"], "flagged");
        assert_eq!(json["flags"][0], "off_topic");
        assert_eq!(json["action"], "warned");
        assert!(json["scores"].get("offTopic").is_some());
        assert_eq!(json["highlighted"], false);
    }

    #[test]
    fn test_new_message_is_clean() {
        let msg = GroupMessage::from_user(
            Uuid::new_v4(),
            Uuid::new_v4(),
            Some("hello".to_string()),
            None,
            None,
        );
        assert_eq!(msg.moderation, ModerationRecord::clean());
        assert!(!msg.is_system());

        let system = GroupMessage::system(msg.group_id, "announcement");
        assert!(system.is_system());
        assert!(system.sender_id.is_none());
    }

    #[test]
    fn test_override_record() {
        let now = Utc::now();
        let blocked = ModerationRecord::overridden(ModerationStatus::Blocked, None, now);
        assert_eq!(blocked.action, ModerationAction::Blocked);

        let cleared = ModerationRecord::overridden(ModerationStatus::Clean, None, now);
        assert_eq!(cleared.action, ModerationAction::None);
        assert!(cleared.flags.is_empty());
        assert_eq!(cleared.reviewed_at, Some(now));
    }
}
