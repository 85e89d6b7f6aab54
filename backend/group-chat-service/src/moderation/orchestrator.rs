//! Post-send moderation pipeline
//!
//! A message is stored and broadcast as clean first. The pipeline then runs
//! in the background, scores it, and applies the decision: record on the
//! message, warning counters, auto-mute and notices. Failures never reach
//! the sender.

use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use uuid::Uuid;

use super::evaluator::{Decision, Evaluation, EvaluationInput, ModerationEvaluator};
use super::flood_tracker::FloodTracker;
use super::member_state;
use crate::db::{mutate_group, GroupRepository, MessageRepository};
use crate::error::AppResult;
use crate::metrics::{AUTO_MUTES_TOTAL, MODERATION_DECISIONS_TOTAL, PIPELINE_FAILURES_TOTAL};
use crate::models::{
    GroupMessage, ModerationAction, ModerationFlag, ModerationRecord, ModerationStatus, MutedUser,
};
use crate::realtime::{EventSink, GroupEvent};

/// Mute reason when no flag explains the decision
pub const DEFAULT_MUTE_REASON: &str = "policy violation";

/// What the pipeline did with one message
#[derive(Debug, Clone, PartialEq)]
pub enum ModerationOutcome {
    /// Not moderated: system message, moderation disabled or group gone
    Skipped,
    Clean,
    Highlighted { highlighted: bool },
    Warned { warnings: u32 },
    Muted {
        warnings: u32,
        muted_until: DateTime<Utc>,
    },
}

pub struct ModerationOrchestrator {
    groups: Arc<dyn GroupRepository>,
    messages: Arc<dyn MessageRepository>,
    events: Arc<dyn EventSink>,
    evaluator: ModerationEvaluator,
    flood: Arc<FloodTracker>,
    // group_id -> lock serializing moderation and mute writes of that group
    locks: DashMap<Uuid, Arc<Mutex<()>>>,
    enabled: bool,
}

impl ModerationOrchestrator {
    pub fn new(
        groups: Arc<dyn GroupRepository>,
        messages: Arc<dyn MessageRepository>,
        events: Arc<dyn EventSink>,
        evaluator: ModerationEvaluator,
        flood: Arc<FloodTracker>,
        enabled: bool,
    ) -> Self {
        Self {
            groups,
            messages,
            events,
            evaluator,
            flood,
            locks: DashMap::new(),
            enabled,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Lock shared by every writer of a group's mute list
    pub fn group_lock(&self, group_id: Uuid) -> Arc<Mutex<()>> {
        self.locks.entry(group_id).or_default().clone()
    }

    /// Run the pipeline for `message` in the background
    pub fn schedule(self: &Arc<Self>, message: GroupMessage) -> JoinHandle<Option<ModerationOutcome>> {
        let orchestrator = Arc::clone(self);
        tokio::spawn(async move { orchestrator.run_guarded(&message).await })
    }

    /// Run the pipeline, logging and swallowing any failure
    pub async fn run_guarded(&self, message: &GroupMessage) -> Option<ModerationOutcome> {
        match self.moderate(message).await {
            Ok(outcome) => {
                tracing::debug!(
                    group_id = %message.group_id,
                    message_id = %message.id,
                    outcome = ?outcome,
                    "message moderated"
                );
                Some(outcome)
            }
            Err(e) => {
                PIPELINE_FAILURES_TOTAL.inc();
                tracing::error!(
                    group_id = %message.group_id,
                    message_id = %message.id,
                    error = %e,
                    "moderation pipeline failed"
                );
                None
            }
        }
    }

    pub async fn moderate(&self, message: &GroupMessage) -> AppResult<ModerationOutcome> {
        if !self.enabled || message.is_system() {
            return Ok(ModerationOutcome::Skipped);
        }
        let Some(sender_id) = message.sender_id else {
            return Ok(ModerationOutcome::Skipped);
        };
        let group_id = message.group_id;

        let Some(group) = self.groups.find(group_id).await? else {
            tracing::debug!(group_id = %group_id, "group disappeared before moderation");
            return Ok(ModerationOutcome::Skipped);
        };

        let flood_count = self.flood.track(group_id, sender_id);
        let eval = self
            .evaluator
            .evaluate(EvaluationInput {
                text: message.text.as_deref(),
                group_topic: group.topic(),
                flood_count,
                flood_limit: group.settings.effective_flood_limit(),
                ai_enabled: group.settings.ai_moderator_enabled,
            })
            .await;

        MODERATION_DECISIONS_TOTAL
            .with_label_values(&[eval.decision.as_str()])
            .inc();

        if eval.is_noop() {
            return Ok(ModerationOutcome::Clean);
        }

        let highlighted = eval.decision == Decision::Highlight && group.settings.highlight_quality;
        let record = ModerationRecord {
            status: ModerationStatus::derive(&eval.scores, &eval.flags),
            flags: eval.flags.clone(),
            action: eval.decision.action(),
            scores: eval.scores,
            note: eval.note.clone(),
            reviewed_at: Some(Utc::now()),
            highlighted,
        };

        // Only the writes are serialized per group; evaluation runs unlocked
        let lock = self.group_lock(group_id);
        let _guard = lock.lock().await;

        self.messages.update_moderation(message.id, &record).await?;
        self.events
            .to_group(
                group_id,
                GroupEvent::GroupMessageUpdated {
                    group_id,
                    message_id: message.id,
                    moderation: record,
                },
            )
            .await;

        match eval.decision {
            Decision::None => Ok(ModerationOutcome::Clean),
            Decision::Highlight => Ok(ModerationOutcome::Highlighted { highlighted }),
            Decision::Warn | Decision::Mute => {
                let still_member = self
                    .groups
                    .find(group_id)
                    .await?
                    .is_some_and(|g| g.is_member(sender_id));
                if !still_member {
                    tracing::debug!(
                        group_id = %group_id,
                        user_id = %sender_id,
                        "sender left the group, skipping penalties"
                    );
                    return Ok(ModerationOutcome::Clean);
                }
                self.penalize(message, sender_id, &eval).await
            }
        }
    }

    /// Count a warning and auto-mute when the decision or the threshold says so
    async fn penalize(
        &self,
        message: &GroupMessage,
        sender_id: Uuid,
        eval: &Evaluation,
    ) -> AppResult<ModerationOutcome> {
        let group_id = message.group_id;
        let severe = eval.decision == Decision::Mute;
        let reason = if eval.flags.is_empty() {
            DEFAULT_MUTE_REASON.to_string()
        } else {
            ModerationFlag::join(&eval.flags)
        };

        let (group, (warnings, mute)) =
            mutate_group(self.groups.as_ref(), group_id, |group| {
                let now = Utc::now();
                let state = member_state::get_or_create(group, sender_id);
                member_state::record_warning(state, now);
                let warnings = state.warnings;

                let settings = &group.settings;
                let auto_mute =
                    severe || (settings.auto_mute_enabled && warnings >= settings.warn_threshold);
                if !auto_mute {
                    return Ok((warnings, None));
                }

                let entry = MutedUser {
                    user_id: sender_id,
                    muted_until: now + Duration::minutes(i64::from(settings.auto_mute_minutes)),
                    reason: reason.clone(),
                    muted_by: None,
                    created_at: now,
                };
                group.upsert_mute(entry.clone());
                Ok((warnings, Some(entry)))
            })
            .await?;

        let Some(mute) = mute else {
            tracing::info!(
                group_id = %group_id,
                user_id = %sender_id,
                warnings,
                flags = %ModerationFlag::join(&eval.flags),
                "member warned"
            );
            self.events
                .to_user(
                    group_id,
                    sender_id,
                    GroupEvent::GroupModerationNotice {
                        group_id,
                        message_id: Some(message.id),
                        action: ModerationAction::Warned,
                        flags: eval.flags.clone(),
                        warnings: Some(warnings),
                        muted_until: None,
                        reason: None,
                    },
                )
                .await;
            return Ok(ModerationOutcome::Warned { warnings });
        };

        AUTO_MUTES_TOTAL.inc();
        tracing::info!(
            group_id = %group_id,
            user_id = %sender_id,
            warnings,
            muted_until = %mute.muted_until,
            reason = %mute.reason,
            "member auto-muted"
        );

        self.events
            .to_group(
                group_id,
                GroupEvent::GroupUserMuted {
                    group_id,
                    member_id: sender_id,
                    muted_until: mute.muted_until,
                    reason: mute.reason.clone(),
                    by: None,
                },
            )
            .await;
        self.events
            .to_user(
                group_id,
                sender_id,
                GroupEvent::GroupModerationNotice {
                    group_id,
                    message_id: Some(message.id),
                    action: ModerationAction::Muted,
                    flags: eval.flags.clone(),
                    warnings: Some(warnings),
                    muted_until: Some(mute.muted_until),
                    reason: Some(mute.reason.clone()),
                },
            )
            .await;

        let announcement = GroupMessage::system(
            group_id,
            format!(
                "A member was muted for {} minutes by the moderator ({}).",
                group.settings.auto_mute_minutes, mute.reason
            ),
        );
        self.messages.insert(&announcement).await?;
        self.events
            .to_group(
                group_id,
                GroupEvent::GroupSystemMessage {
                    group_id,
                    message: announcement,
                },
            )
            .await;

        Ok(ModerationOutcome::Muted {
            warnings,
            muted_until: mute.muted_until,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{InMemoryGroupRepository, InMemoryMessageRepository};
    use crate::models::Group;
    use async_trait::async_trait;

    #[derive(Default)]
    struct RecordingSink {
        events: Mutex<Vec<(Option<Uuid>, GroupEvent)>>,
    }

    impl RecordingSink {
        async fn types(&self) -> Vec<&'static str> {
            self.events
                .lock()
                .await
                .iter()
                .map(|(_, e)| e.event_type())
                .collect()
        }
    }

    #[async_trait]
    impl EventSink for RecordingSink {
        async fn to_group(&self, _group_id: Uuid, event: GroupEvent) {
            self.events.lock().await.push((None, event));
        }

        async fn to_user(&self, _group_id: Uuid, user_id: Uuid, event: GroupEvent) {
            self.events.lock().await.push((Some(user_id), event));
        }
    }

    struct Fixture {
        orchestrator: Arc<ModerationOrchestrator>,
        groups: Arc<InMemoryGroupRepository>,
        messages: Arc<InMemoryMessageRepository>,
        sink: Arc<RecordingSink>,
        group: Group,
        member: Uuid,
    }

    async fn fixture(enabled: bool) -> Fixture {
        let groups = Arc::new(InMemoryGroupRepository::new());
        let messages = Arc::new(InMemoryMessageRepository::new());
        let sink = Arc::new(RecordingSink::default());
        let member = Uuid::new_v4();
        let group = Group::new("rust".into(), String::new(), Uuid::new_v4(), &[member]);
        groups.insert(&group).await.unwrap();

        let orchestrator = Arc::new(ModerationOrchestrator::new(
            groups.clone(),
            messages.clone(),
            sink.clone(),
            ModerationEvaluator::heuristic_only(),
            Arc::new(FloodTracker::new()),
            enabled,
        ));

        Fixture {
            orchestrator,
            groups,
            messages,
            sink,
            group,
            member,
        }
    }

    async fn send(f: &Fixture, text: &str) -> GroupMessage {
        let message = GroupMessage::from_user(f.group.id, f.member, Some(text.into()), None, None);
        f.messages.insert(&message).await.unwrap();
        message
    }

    #[tokio::test]
    async fn test_clean_message_emits_nothing() {
        let f = fixture(true).await;
        let message = send(&f, "good morning everyone").await;

        let outcome = f.orchestrator.moderate(&message).await.unwrap();

        assert_eq!(outcome, ModerationOutcome::Clean);
        assert!(f.sink.types().await.is_empty());
    }

    #[tokio::test]
    async fn test_first_warning_is_private() {
        let f = fixture(true).await;
        let message = send(&f, "you are an idiot!!!").await;

        let outcome = f.orchestrator.moderate(&message).await.unwrap();
        assert_eq!(outcome, ModerationOutcome::Warned { warnings: 1 });

        let stored = f.messages.find(f.group.id, message.id).await.unwrap().unwrap();
        assert_eq!(stored.moderation.status, ModerationStatus::Flagged);
        assert_eq!(stored.moderation.action, ModerationAction::Warned);

        let events = f.sink.events.lock().await;
        assert_eq!(events.len(), 2);
        assert!(events[0].0.is_none());
        assert_eq!(events[1].0, Some(f.member));
        assert!(matches!(
            events[1].1,
            GroupEvent::GroupModerationNotice {
                action: ModerationAction::Warned,
                warnings: Some(1),
                ..
            }
        ));
    }

    #[tokio::test]
    async fn test_severe_message_mutes_immediately() {
        let f = fixture(true).await;
        let message = send(&f, "shut up you moron").await;

        let outcome = f.orchestrator.moderate(&message).await.unwrap();
        let ModerationOutcome::Muted { warnings, .. } = outcome else {
            panic!("expected mute, got {outcome:?}");
        };
        assert_eq!(warnings, 1);

        let group = f.groups.find(f.group.id).await.unwrap().unwrap();
        let mute = group.active_mute(f.member, Utc::now()).unwrap();
        assert_eq!(mute.reason, "toxic");
        assert!(mute.muted_by.is_none());

        assert_eq!(
            f.sink.types().await,
            vec![
                "groupMessageUpdated",
                "groupUserMuted",
                "groupModerationNotice",
                "groupSystemMessage"
            ]
        );
        let history = f.messages.list(f.group.id, None, 10).await.unwrap();
        assert!(history.iter().any(|m| m.is_system()));
    }

    #[tokio::test]
    async fn test_disabled_pipeline_and_system_messages_are_skipped() {
        let f = fixture(false).await;
        let message = send(&f, "you are an idiot!!!").await;
        assert_eq!(
            f.orchestrator.moderate(&message).await.unwrap(),
            ModerationOutcome::Skipped
        );

        let f = fixture(true).await;
        let system = GroupMessage::system(f.group.id, "welcome");
        assert_eq!(
            f.orchestrator.moderate(&system).await.unwrap(),
            ModerationOutcome::Skipped
        );
    }

    #[tokio::test]
    async fn test_failure_is_swallowed() {
        let f = fixture(true).await;
        // Never inserted, so the moderation update cannot find it
        let orphan =
            GroupMessage::from_user(f.group.id, f.member, Some("you idiot!!!".into()), None, None);

        let handle = f.orchestrator.schedule(orphan);
        assert_eq!(handle.await.unwrap(), None);
    }
}
