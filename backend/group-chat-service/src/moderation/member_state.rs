//! Warning bookkeeping on the group aggregate
//!
//! Pure in-memory mutation; callers persist the group.

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::models::{Group, MemberState};

/// Member state for `user_id`, appended to the group if absent
pub fn get_or_create(group: &mut Group, user_id: Uuid) -> &mut MemberState {
    let idx = match group
        .member_states
        .iter()
        .position(|s| s.user_id == user_id)
    {
        Some(idx) => idx,
        None => {
            group.member_states.push(MemberState::new(user_id));
            group.member_states.len() - 1
        }
    };
    &mut group.member_states[idx]
}

pub fn record_warning(state: &mut MemberState, now: DateTime<Utc>) {
    state.warnings = state.warnings.saturating_add(1);
    state.last_warning_at = Some(now);
}
