//! Group aggregate
//!
//! A group owns its settings, membership, mute list and per-member warning
//! state. All of it is persisted and versioned together.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

fn default_true() -> bool {
    true
}

fn default_auto_mute_minutes() -> u32 {
    10
}

fn default_warn_threshold() -> u32 {
    2
}

fn default_spam_limit() -> Option<u32> {
    Some(8)
}

/// Per-group moderation settings, mutated only by admins
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GroupSettings {
    #[serde(default = "default_true")]
    pub ai_moderator_enabled: bool,
    #[serde(default = "default_true")]
    pub auto_mute_enabled: bool,
    #[serde(default = "default_auto_mute_minutes")]
    pub auto_mute_minutes: u32,
    #[serde(default = "default_warn_threshold")]
    pub warn_threshold: u32,
    #[serde(default = "default_spam_limit")]
    pub spam_limit_per_minute: Option<u32>,
    #[serde(default)]
    pub flood_limit_per_minute: Option<u32>,
    #[serde(default = "default_true")]
    pub highlight_quality: bool,
}

impl Default for GroupSettings {
    fn default() -> Self {
        Self {
            ai_moderator_enabled: true,
            auto_mute_enabled: true,
            auto_mute_minutes: default_auto_mute_minutes(),
            warn_threshold: default_warn_threshold(),
            spam_limit_per_minute: default_spam_limit(),
            flood_limit_per_minute: None,
            highlight_quality: true,
        }
    }
}

impl GroupSettings {
    /// Flood limit falls back to the spam limit when not set explicitly
    pub fn effective_flood_limit(&self) -> Option<u32> {
        self.flood_limit_per_minute.or(self.spam_limit_per_minute)
    }
}

/// Active mute of one member
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MutedUser {
    pub user_id: Uuid,
    pub muted_until: DateTime<Utc>,
    pub reason: String,
    /// None when issued by the moderator pipeline
    pub muted_by: Option<Uuid>,
    pub created_at: DateTime<Utc>,
}

impl MutedUser {
    pub fn is_active(&self, now: DateTime<Utc>) -> bool {
        self.muted_until > now
    }
}

/// Warning counters of one member
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MemberState {
    pub user_id: Uuid,
    pub warnings: u32,
    /// Reserved, not used by the evaluator
    pub strikes: u32,
    pub last_warning_at: Option<DateTime<Utc>>,
}

impl MemberState {
    pub fn new(user_id: Uuid) -> Self {
        Self {
            user_id,
            warnings: 0,
            strikes: 0,
            last_warning_at: None,
        }
    }
}

/// Violations of group membership rules
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MembershipError {
    #[error("user {0} is not a member of this group")]
    NotMember(Uuid),

    #[error("user {0} is already a member of this group")]
    AlreadyMember(Uuid),

    #[error("user {0} is not an admin of this group")]
    NotAdmin(Uuid),

    #[error("a group must keep at least one admin")]
    LastAdmin,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Group {
    pub id: Uuid,
    pub name: String,
    pub description: String,
    pub created_by: Uuid,
    pub admins: Vec<Uuid>,
    pub members: Vec<Uuid>,
    pub settings: GroupSettings,
    pub muted_users: Vec<MutedUser>,
    pub member_states: Vec<MemberState>,
    /// Optimistic concurrency version, bumped on every save
    pub version: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Group {
    /// New group with the creator as its only admin
    pub fn new(name: String, description: String, created_by: Uuid, members: &[Uuid]) -> Self {
        let now = Utc::now();
        let mut all_members = vec![created_by];
        for member in members {
            if !all_members.contains(member) {
                all_members.push(*member);
            }
        }

        Self {
            id: Uuid::new_v4(),
            name,
            description,
            created_by,
            admins: vec![created_by],
            members: all_members,
            settings: GroupSettings::default(),
            muted_users: Vec::new(),
            member_states: Vec::new(),
            version: 0,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_member(&self, user_id: Uuid) -> bool {
        self.members.contains(&user_id)
    }

    pub fn is_admin(&self, user_id: Uuid) -> bool {
        self.admins.contains(&user_id)
    }

    /// Context handed to the oracle for off-topic detection
    pub fn topic(&self) -> &str {
        if self.description.trim().is_empty() {
            &self.name
        } else {
            &self.description
        }
    }

    pub fn has_expired_mutes(&self, now: DateTime<Utc>) -> bool {
        self.muted_users.iter().any(|m| !m.is_active(now))
    }

    /// Drop mute entries whose expiry has passed, returns how many were removed
    pub fn prune_expired_mutes(&mut self, now: DateTime<Utc>) -> usize {
        let before = self.muted_users.len();
        self.muted_users.retain(|m| m.is_active(now));
        before - self.muted_users.len()
    }

    pub fn active_mute(&self, user_id: Uuid, now: DateTime<Utc>) -> Option<&MutedUser> {
        self.muted_users
            .iter()
            .find(|m| m.user_id == user_id && m.is_active(now))
    }

    /// Insert a mute, replacing any previous entry for the same user
    pub fn upsert_mute(&mut self, entry: MutedUser) {
        self.muted_users.retain(|m| m.user_id != entry.user_id);
        self.muted_users.push(entry);
    }

    pub fn remove_mute(&mut self, user_id: Uuid) -> bool {
        let before = self.muted_users.len();
        self.muted_users.retain(|m| m.user_id != user_id);
        before != self.muted_users.len()
    }

    pub fn member_state(&self, user_id: Uuid) -> Option<&MemberState> {
        self.member_states.iter().find(|s| s.user_id == user_id)
    }

    pub fn add_member(&mut self, user_id: Uuid) -> Result<(), MembershipError> {
        if self.is_member(user_id) {
            return Err(MembershipError::AlreadyMember(user_id));
        }
        self.members.push(user_id);
        Ok(())
    }

    /// Remove a member together with its admin seat, mute and warning state
    pub fn remove_member(&mut self, user_id: Uuid) -> Result<(), MembershipError> {
        if !self.is_member(user_id) {
            return Err(MembershipError::NotMember(user_id));
        }
        if self.is_admin(user_id) && self.admins.len() <= 1 {
            return Err(MembershipError::LastAdmin);
        }

        self.members.retain(|m| *m != user_id);
        self.admins.retain(|a| *a != user_id);
        self.muted_users.retain(|m| m.user_id != user_id);
        self.member_states.retain(|s| s.user_id != user_id);
        Ok(())
    }

    /// Promote a member to admin; promoting an admin is a no-op
    pub fn promote(&mut self, user_id: Uuid) -> Result<(), MembershipError> {
        if !self.is_member(user_id) {
            return Err(MembershipError::NotMember(user_id));
        }
        if !self.is_admin(user_id) {
            self.admins.push(user_id);
        }
        Ok(())
    }

    pub fn demote(&mut self, user_id: Uuid) -> Result<(), MembershipError> {
        if !self.is_admin(user_id) {
            return Err(MembershipError::NotAdmin(user_id));
        }
        if self.admins.len() <= 1 {
            return Err(MembershipError::LastAdmin);
        }
        self.admins.retain(|a| *a != user_id);
        Ok(())
    }
}

/// A group as one member sees it
///
/// Warning counters are private: admins see every member's state, other
/// members only their own.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GroupView {
    pub id: Uuid,
    pub name: String,
    pub description: String,
    pub created_by: Uuid,
    pub admins: Vec<Uuid>,
    pub members: Vec<Uuid>,
    pub settings: GroupSettings,
    pub muted_users: Vec<MutedUser>,
    pub member_states: Vec<MemberState>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl GroupView {
    pub fn for_viewer(group: Group, viewer: Uuid) -> Self {
        let member_states = if group.is_admin(viewer) {
            group.member_states
        } else {
            group
                .member_states
                .into_iter()
                .filter(|s| s.user_id == viewer)
                .collect()
        };

        Self {
            id: group.id,
            name: group.name,
            description: group.description,
            created_by: group.created_by,
            admins: group.admins,
            members: group.members,
            settings: group.settings,
            muted_users: group.muted_users,
            member_states,
            created_at: group.created_at,
            updated_at: group.updated_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn mute(user_id: Uuid, until: DateTime<Utc>, reason: &str) -> MutedUser {
        MutedUser {
            user_id,
            muted_until: until,
            reason: reason.to_string(),
            muted_by: None,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn test_view_hides_other_members_warnings() {
        let admin = Uuid::new_v4();
        let (alice, bob) = (Uuid::new_v4(), Uuid::new_v4());
        let mut group = Group::new("rustaceans".into(), String::new(), admin, &[alice, bob]);
        let mut warned = MemberState::new(alice);
        warned.warnings = 1;
        group.member_states.push(warned);

        let bob_view = GroupView::for_viewer(group.clone(), bob);
        assert!(bob_view.member_states.is_empty());
        let json = serde_json::to_value(&bob_view).unwrap();
        assert_eq!(json["memberStates"], serde_json::json!([]));

        let alice_view = GroupView::for_viewer(group.clone(), alice);
        assert_eq!(alice_view.member_states.len(), 1);

        let admin_view = GroupView::for_viewer(group, admin);
        assert_eq!(admin_view.member_states[0].warnings, 1);
    }

    #[test]
    fn test_new_group_membership() {
        let creator = Uuid::new_v4();
        let other = Uuid::new_v4();
        let group = Group::new("rustaceans".into(), String::new(), creator, &[other, creator]);

        assert_eq!(group.members, vec![creator, other]);
        assert_eq!(group.admins, vec![creator]);
        assert_eq!(group.topic(), "rustaceans");
        assert_eq!(group.settings, GroupSettings::default());
    }

    #[test]
    fn test_settings_defaults_from_partial_json() {
        let settings: GroupSettings =
            serde_json::from_str(r#"{"floodLimitPerMinute": 5}"#).unwrap();
        assert!(settings.ai_moderator_enabled);
        assert_eq!(settings.auto_mute_minutes, 10);
        assert_eq!(settings.warn_threshold, 2);
        assert_eq!(settings.effective_flood_limit(), Some(5));

        let fallback = GroupSettings::default();
        assert_eq!(fallback.effective_flood_limit(), Some(8));
    }

    #[test]
    fn test_mute_replaces_existing_entry() {
        let creator = Uuid::new_v4();
        let target = Uuid::new_v4();
        let mut group = Group::new("g".into(), String::new(), creator, &[target]);
        let now = Utc::now();

        for minutes in [5, 10, 15] {
            group.upsert_mute(mute(target, now + Duration::minutes(minutes), "spam"));
        }

        assert_eq!(group.muted_users.len(), 1);
        assert_eq!(
            group.active_mute(target, now).map(|m| m.muted_until),
            Some(now + Duration::minutes(15))
        );
    }

    #[test]
    fn test_prune_expired_mutes() {
        let creator = Uuid::new_v4();
        let expired = Uuid::new_v4();
        let active = Uuid::new_v4();
        let mut group = Group::new("g".into(), String::new(), creator, &[expired, active]);
        let now = Utc::now();

        group.upsert_mute(mute(expired, now - Duration::seconds(1), "flood"));
        group.upsert_mute(mute(active, now + Duration::minutes(1), "toxic"));

        assert!(group.has_expired_mutes(now));
        assert!(group.active_mute(expired, now).is_none());
        assert_eq!(group.prune_expired_mutes(now), 1);
        assert_eq!(group.muted_users.len(), 1);
        assert!(group.active_mute(active, now).is_some());
    }

    #[test]
    fn test_last_admin_cannot_leave_or_be_demoted() {
        let creator = Uuid::new_v4();
        let mut group = Group::new("g".into(), String::new(), creator, &[]);

        assert_eq!(group.demote(creator), Err(MembershipError::LastAdmin));
        assert_eq!(group.remove_member(creator), Err(MembershipError::LastAdmin));
        assert_eq!(group.admins, vec![creator]);
    }

    #[test]
    fn test_remove_member_clears_state() {
        let creator = Uuid::new_v4();
        let member = Uuid::new_v4();
        let mut group = Group::new("g".into(), String::new(), creator, &[member]);
        group.promote(member).unwrap();
        group.member_states.push(MemberState::new(member));
        group.upsert_mute(mute(member, Utc::now() + Duration::minutes(1), "spam"));

        group.remove_member(member).unwrap();

        assert!(!group.is_member(member));
        assert!(!group.is_admin(member));
        assert!(group.muted_users.is_empty());
        assert!(group.member_state(member).is_none());
    }

    #[test]
    fn test_promote_requires_membership() {
        let creator = Uuid::new_v4();
        let mut group = Group::new("g".into(), String::new(), creator, &[]);
        let stranger = Uuid::new_v4();

        assert_eq!(group.promote(stranger), Err(MembershipError::NotMember(stranger)));
        assert_eq!(group.add_member(creator), Err(MembershipError::AlreadyMember(creator)));
    }
}
