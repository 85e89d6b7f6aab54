//! Group management endpoints
//!
//! Admin checks are enforced by the group service against the stored
//! aggregate.

use actix_web::{delete, get, post, put, web, HttpResponse};
use uuid::Uuid;

use crate::{
    error::AppError,
    middleware::guards::User,
    models::{
        AddMemberRequest, CreateGroupRequest, GroupView, MuteMemberRequest, UpdateSettingsRequest,
    },
    state::AppState,
};

/// POST /api/v1/groups
#[post("/api/v1/groups")]
pub async fn create_group(
    state: web::Data<AppState>,
    user: User,
    body: web::Json<CreateGroupRequest>,
) -> Result<HttpResponse, AppError> {
    let group = state.groups.create_group(user.id, body.into_inner()).await?;
    Ok(HttpResponse::Created().json(GroupView::for_viewer(group, user.id)))
}

/// GET /api/v1/groups
/// Groups the caller is a member of
#[get("/api/v1/groups")]
pub async fn list_groups(
    state: web::Data<AppState>,
    user: User,
) -> Result<HttpResponse, AppError> {
    let groups = state.groups.list_groups(user.id).await?;
    Ok(HttpResponse::Ok().json(groups))
}

#[get("/api/v1/groups/{id}")]
pub async fn get_group(
    state: web::Data<AppState>,
    user: User,
    group_id: web::Path<Uuid>,
) -> Result<HttpResponse, AppError> {
    let group = state.groups.get_group(group_id.into_inner(), user.id).await?;
    Ok(HttpResponse::Ok().json(group))
}

/// PUT /api/v1/groups/{id}/settings
///
/// Authorization: group admin
#[put("/api/v1/groups/{id}/settings")]
pub async fn update_settings(
    state: web::Data<AppState>,
    user: User,
    group_id: web::Path<Uuid>,
    body: web::Json<UpdateSettingsRequest>,
) -> Result<HttpResponse, AppError> {
    let group = state
        .groups
        .update_settings(group_id.into_inner(), user.id, body.into_inner())
        .await?;
    Ok(HttpResponse::Ok().json(group.settings))
}

/// POST /api/v1/groups/{id}/members
///
/// Authorization: group admin
#[post("/api/v1/groups/{id}/members")]
pub async fn add_member(
    state: web::Data<AppState>,
    user: User,
    group_id: web::Path<Uuid>,
    body: web::Json<AddMemberRequest>,
) -> Result<HttpResponse, AppError> {
    let group = state
        .groups
        .add_member(group_id.into_inner(), user.id, body.user_id)
        .await?;
    Ok(HttpResponse::Created().json(GroupView::for_viewer(group, user.id)))
}

/// DELETE /api/v1/groups/{id}/members/{user_id}
///
/// Authorization: group admin, or the member leaving
#[delete("/api/v1/groups/{id}/members/{user_id}")]
pub async fn remove_member(
    state: web::Data<AppState>,
    user: User,
    path: web::Path<(Uuid, Uuid)>,
) -> Result<HttpResponse, AppError> {
    let (group_id, member_id) = path.into_inner();
    state
        .groups
        .remove_member(group_id, user.id, member_id)
        .await?;
    Ok(HttpResponse::NoContent().finish())
}

#[post("/api/v1/groups/{id}/admins/{user_id}")]
pub async fn promote_admin(
    state: web::Data<AppState>,
    user: User,
    path: web::Path<(Uuid, Uuid)>,
) -> Result<HttpResponse, AppError> {
    let (group_id, member_id) = path.into_inner();
    let group = state.groups.promote(group_id, user.id, member_id).await?;
    Ok(HttpResponse::Ok().json(group.admins))
}

/// DELETE /api/v1/groups/{id}/admins/{user_id}
/// Rejected when it would leave the group without an admin
#[delete("/api/v1/groups/{id}/admins/{user_id}")]
pub async fn demote_admin(
    state: web::Data<AppState>,
    user: User,
    path: web::Path<(Uuid, Uuid)>,
) -> Result<HttpResponse, AppError> {
    let (group_id, member_id) = path.into_inner();
    let group = state.groups.demote(group_id, user.id, member_id).await?;
    Ok(HttpResponse::Ok().json(group.admins))
}

/// GET /api/v1/groups/{id}/mutes
///
/// Authorization: group admin
#[get("/api/v1/groups/{id}/mutes")]
pub async fn list_mutes(
    state: web::Data<AppState>,
    user: User,
    group_id: web::Path<Uuid>,
) -> Result<HttpResponse, AppError> {
    let mutes = state
        .groups
        .list_mutes(group_id.into_inner(), user.id)
        .await?;
    Ok(HttpResponse::Ok().json(mutes))
}

#[post("/api/v1/groups/{id}/mutes/{user_id}")]
pub async fn mute_member(
    state: web::Data<AppState>,
    user: User,
    path: web::Path<(Uuid, Uuid)>,
    body: web::Json<MuteMemberRequest>,
) -> Result<HttpResponse, AppError> {
    let (group_id, member_id) = path.into_inner();
    let mute = state
        .groups
        .mute_member(group_id, user.id, member_id, body.into_inner())
        .await?;
    Ok(HttpResponse::Ok().json(mute))
}

#[delete("/api/v1/groups/{id}/mutes/{user_id}")]
pub async fn unmute_member(
    state: web::Data<AppState>,
    user: User,
    path: web::Path<(Uuid, Uuid)>,
) -> Result<HttpResponse, AppError> {
    let (group_id, member_id) = path.into_inner();
    state
        .groups
        .unmute_member(group_id, user.id, member_id)
        .await?;
    Ok(HttpResponse::NoContent().finish())
}
