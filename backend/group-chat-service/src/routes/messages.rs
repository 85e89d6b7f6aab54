use actix_web::{get, post, put, web, HttpResponse};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use uuid::Uuid;

use crate::{
    error::AppError,
    middleware::guards::User,
    models::{ModerationOverrideRequest, SendMessageRequest},
    state::AppState,
};

#[derive(Debug, Deserialize)]
pub struct MessageHistoryQuery {
    /// Only messages created strictly before this instant
    pub before: Option<DateTime<Utc>>,
    pub limit: Option<i64>,
}

/// POST /api/v1/groups/{id}/messages
///
/// The message is returned as clean; moderation results arrive later as a
/// `groupMessageUpdated` event.
#[post("/api/v1/groups/{id}/messages")]
pub async fn send_message(
    state: web::Data<AppState>,
    user: User,
    group_id: web::Path<Uuid>,
    body: web::Json<SendMessageRequest>,
) -> Result<HttpResponse, AppError> {
    let message = state
        .groups
        .send_message(group_id.into_inner(), user.id, body.into_inner())
        .await?;
    Ok(HttpResponse::Created().json(message))
}

/// GET /api/v1/groups/{id}/messages?before=&limit=
#[get("/api/v1/groups/{id}/messages")]
pub async fn list_messages(
    state: web::Data<AppState>,
    user: User,
    group_id: web::Path<Uuid>,
    query: web::Query<MessageHistoryQuery>,
) -> Result<HttpResponse, AppError> {
    let query = query.into_inner();
    let messages = state
        .groups
        .list_messages(group_id.into_inner(), user.id, query.before, query.limit)
        .await?;
    Ok(HttpResponse::Ok().json(messages))
}

/// PUT /api/v1/groups/{id}/messages/{message_id}/moderation
///
/// Authorization: group admin
#[put("/api/v1/groups/{id}/messages/{message_id}/moderation")]
pub async fn override_moderation(
    state: web::Data<AppState>,
    user: User,
    path: web::Path<(Uuid, Uuid)>,
    body: web::Json<ModerationOverrideRequest>,
) -> Result<HttpResponse, AppError> {
    let (group_id, message_id) = path.into_inner();
    let message = state
        .groups
        .override_moderation(group_id, user.id, message_id, body.into_inner())
        .await?;
    Ok(HttpResponse::Ok().json(message))
}
