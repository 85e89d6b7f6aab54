use crate::{
    db::{GroupRepository, MessageRepository},
    moderation::{FloodTracker, ModerationEvaluator, ModerationOrchestrator},
    realtime::{ConnectionRegistry, EventSink},
    services::GroupService,
};
use std::sync::Arc;

#[derive(Clone)]
pub struct AppState {
    pub groups: Arc<GroupService>,
    /// Open event streams, also the event sink of the group service
    pub registry: ConnectionRegistry,
}

impl AppState {
    pub fn new(
        groups: Arc<dyn GroupRepository>,
        messages: Arc<dyn MessageRepository>,
        evaluator: ModerationEvaluator,
        flood: Arc<FloodTracker>,
        moderation_enabled: bool,
    ) -> Self {
        let registry = ConnectionRegistry::new();
        let events: Arc<dyn EventSink> = Arc::new(registry.clone());

        let orchestrator = Arc::new(ModerationOrchestrator::new(
            groups.clone(),
            messages.clone(),
            events.clone(),
            evaluator,
            flood,
            moderation_enabled,
        ));

        Self {
            groups: Arc::new(GroupService::new(groups, messages, events, orchestrator)),
            registry,
        }
    }
}
