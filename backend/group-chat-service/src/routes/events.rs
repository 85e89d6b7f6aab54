use actix_web::{get, http::header, web, HttpResponse};
use futures::StreamExt;
use tokio_stream::wrappers::UnboundedReceiverStream;
use uuid::Uuid;

use crate::{
    error::AppError,
    middleware::guards::User,
    realtime::{ConnectionRegistry, SubscriberId},
    state::AppState,
};

/// Unsubscribes the connection when the response stream is dropped
struct Subscription {
    registry: ConnectionRegistry,
    group_id: Uuid,
    id: SubscriberId,
}

impl Drop for Subscription {
    fn drop(&mut self) {
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            return;
        };
        let registry = self.registry.clone();
        let (group_id, id) = (self.group_id, self.id);
        runtime.spawn(async move {
            registry.remove_subscriber(group_id, id).await;
            tracing::debug!(group_id = %group_id, subscriber = ?id, "event stream closed");
        });
    }
}

/// GET /api/v1/groups/{id}/events
///
/// Server-sent events stream of group events and the caller's private
/// notices. The subscription leaves the registry when the client
/// disconnects, or when the caller is removed from the group.
#[get("/api/v1/groups/{id}/events")]
pub async fn group_events(
    state: web::Data<AppState>,
    user: User,
    group_id: web::Path<Uuid>,
) -> Result<HttpResponse, AppError> {
    let group_id = group_id.into_inner();
    state.groups.get_group(group_id, user.id).await?;

    let (subscriber_id, rx) = state.registry.add_subscriber(group_id, user.id).await;
    tracing::debug!(
        group_id = %group_id,
        user_id = %user.id,
        subscriber = ?subscriber_id,
        "event stream opened"
    );

    let subscription = Subscription {
        registry: state.registry.clone(),
        group_id,
        id: subscriber_id,
    };
    let stream = UnboundedReceiverStream::new(rx).map(move |payload| {
        let _held = &subscription;
        Ok::<_, AppError>(web::Bytes::from(format!("data: {payload}\n\n")))
    });

    Ok(HttpResponse::Ok()
        .insert_header((header::CONTENT_TYPE, "text/event-stream"))
        .insert_header((header::CACHE_CONTROL, "no-cache"))
        .streaming(stream))
}
