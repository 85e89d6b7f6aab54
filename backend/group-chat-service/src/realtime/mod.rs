//! Real-time delivery of group events to connected members

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{
    mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender},
    RwLock,
};
use uuid::Uuid;

pub mod events;

pub use events::{EventSink, GroupEvent};

/// Unique identifier for one event stream connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriberId(Uuid);

impl SubscriberId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for SubscriberId {
    fn default() -> Self {
        Self::new()
    }
}

struct Subscriber {
    id: SubscriberId,
    user_id: Uuid,
    sender: UnboundedSender<String>,
}

/// Connection registry for group event streams
///
/// Tracks which connections are subscribed to which groups, and which member
/// owns each connection so private notices reach only that member.
#[derive(Default, Clone)]
pub struct ConnectionRegistry {
    // group_id -> list of subscribers
    inner: Arc<RwLock<HashMap<Uuid, Vec<Subscriber>>>>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribe a member's connection to a group
    pub async fn add_subscriber(
        &self,
        group_id: Uuid,
        user_id: Uuid,
    ) -> (SubscriberId, UnboundedReceiver<String>) {
        let (tx, rx) = unbounded_channel();
        let subscriber_id = SubscriberId::new();

        let mut guard = self.inner.write().await;
        guard.entry(group_id).or_default().push(Subscriber {
            id: subscriber_id,
            user_id,
            sender: tx,
        });

        tracing::debug!(
            group_id = %group_id,
            user_id = %user_id,
            subscribers = guard.get(&group_id).map(|v| v.len()).unwrap_or(0),
            "event stream subscribed"
        );

        (subscriber_id, rx)
    }

    /// Must be called when a connection closes
    pub async fn remove_subscriber(&self, group_id: Uuid, subscriber_id: SubscriberId) {
        let mut guard = self.inner.write().await;

        if let Some(subscribers) = guard.get_mut(&group_id) {
            subscribers.retain(|s| s.id != subscriber_id);
            if subscribers.is_empty() {
                guard.remove(&group_id);
            }
        }
    }

    /// Drop every connection a member holds on a group, ending their streams
    pub async fn remove_member_subscribers(&self, group_id: Uuid, user_id: Uuid) -> usize {
        let mut guard = self.inner.write().await;
        let Some(subscribers) = guard.get_mut(&group_id) else {
            return 0;
        };

        let before = subscribers.len();
        subscribers.retain(|s| s.user_id != user_id);
        let removed = before - subscribers.len();
        if subscribers.is_empty() {
            guard.remove(&group_id);
        }
        removed
    }

    /// Send to every subscriber of a group, dropping dead senders
    pub async fn broadcast(&self, group_id: Uuid, msg: String) {
        self.deliver(group_id, None, msg).await;
    }

    /// Send to the connections of one member, dropping dead senders
    pub async fn send_to_user(&self, group_id: Uuid, user_id: Uuid, msg: String) {
        self.deliver(group_id, Some(user_id), msg).await;
    }

    async fn deliver(&self, group_id: Uuid, user_id: Option<Uuid>, msg: String) {
        let mut guard = self.inner.write().await;
        let Some(subscribers) = guard.get_mut(&group_id) else {
            return;
        };

        let before = subscribers.len();
        subscribers.retain(|s| {
            if user_id.is_some_and(|u| u != s.user_id) {
                return true;
            }
            s.sender.send(msg.clone()).is_ok()
        });

        let after = subscribers.len();
        if before != after {
            tracing::debug!(
                group_id = %group_id,
                cleaned = before - after,
                active = after,
                "dead event streams cleaned up"
            );
        }
        if subscribers.is_empty() {
            guard.remove(&group_id);
        }
    }

    pub async fn subscriber_count(&self, group_id: Uuid) -> usize {
        let guard = self.inner.read().await;
        guard.get(&group_id).map(|v| v.len()).unwrap_or(0)
    }
}

fn encode(event: &GroupEvent) -> Option<String> {
    match serde_json::to_string(event) {
        Ok(payload) => Some(payload),
        Err(e) => {
            tracing::error!(event = event.event_type(), error = %e, "failed to encode group event");
            None
        }
    }
}

#[async_trait]
impl EventSink for ConnectionRegistry {
    async fn to_group(&self, group_id: Uuid, event: GroupEvent) {
        if let Some(payload) = encode(&event) {
            self.broadcast(group_id, payload).await;
        }
    }

    async fn to_user(&self, group_id: Uuid, user_id: Uuid, event: GroupEvent) {
        if let Some(payload) = encode(&event) {
            self.send_to_user(group_id, user_id, payload).await;
        }
    }

    async fn disconnect_member(&self, group_id: Uuid, user_id: Uuid) {
        let closed = self.remove_member_subscribers(group_id, user_id).await;
        if closed > 0 {
            tracing::debug!(
                group_id = %group_id,
                user_id = %user_id,
                closed,
                "event streams closed for former member"
            );
        }
    }
}
