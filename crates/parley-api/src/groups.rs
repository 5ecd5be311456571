use axum::{
    Extension, Json,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
};
use chrono::Utc;
use uuid::Uuid;

use parley_gateway::engine::EngineError;
use parley_types::api::{AddMemberRequest, Claims, CreateGroupRequest, UpdateGroupRequest};
use parley_types::models::Group;

use crate::auth::AppState;
use crate::error::ApiResult;

pub async fn create_group(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<CreateGroupRequest>,
) -> ApiResult<impl IntoResponse> {
    if req.name.trim().is_empty() {
        return Err(EngineError::Validation("group name is required").into());
    }

    // The creator starts as both member and admin.
    let group = Group {
        id: Uuid::new_v4(),
        name: req.name,
        description: req.description,
        creator: claims.sub,
        members: vec![claims.sub],
        admins: vec![claims.sub],
        avatar: None,
        created_at: Utc::now(),
    };
    state.store.create_group(&group).await?;

    Ok((StatusCode::CREATED, Json(group)))
}

pub async fn get_group(
    State(state): State<AppState>,
    Path(group_id): Path<Uuid>,
    Extension(_claims): Extension<Claims>,
) -> ApiResult<Json<Group>> {
    let group = state
        .store
        .find_group_by_id(group_id)
        .await?
        .ok_or(EngineError::NotFound("group"))?;
    Ok(Json(group))
}

pub async fn update_group(
    State(state): State<AppState>,
    Path(group_id): Path<Uuid>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<UpdateGroupRequest>,
) -> ApiResult<Json<Group>> {
    let mut group = state
        .store
        .find_group_by_id(group_id)
        .await?
        .ok_or(EngineError::NotFound("group"))?;
    if !group.is_admin(claims.sub) {
        return Err(EngineError::Forbidden("only a group admin may update the group").into());
    }

    if let Some(name) = req.name {
        group.name = name;
    }
    if let Some(description) = req.description {
        group.description = Some(description);
    }
    state.store.update_group(&group).await?;

    Ok(Json(group))
}

pub async fn add_member(
    State(state): State<AppState>,
    Path(group_id): Path<Uuid>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<AddMemberRequest>,
) -> ApiResult<Json<Group>> {
    let group = state
        .store
        .find_group_by_id(group_id)
        .await?
        .ok_or(EngineError::NotFound("group"))?;
    if !group.is_admin(claims.sub) {
        return Err(EngineError::Forbidden("only a group admin may add members").into());
    }
    if state.store.find_user_by_id(req.user_id).await?.is_none() {
        return Err(EngineError::NotFound("user").into());
    }
    if group.members.contains(&req.user_id) {
        return Err(EngineError::Validation("user is already a member").into());
    }

    state.store.add_member(group_id, req.user_id, false).await?;
    let group = state
        .store
        .find_group_by_id(group_id)
        .await?
        .ok_or(EngineError::NotFound("group"))?;
    Ok(Json(group))
}

pub async fn remove_member(
    State(state): State<AppState>,
    Path((group_id, user_id)): Path<(Uuid, Uuid)>,
    Extension(claims): Extension<Claims>,
) -> ApiResult<Json<Group>> {
    let group = state
        .store
        .find_group_by_id(group_id)
        .await?
        .ok_or(EngineError::NotFound("group"))?;
    if !group.is_admin(claims.sub) {
        return Err(EngineError::Forbidden("only a group admin may remove members").into());
    }

    state.store.remove_member(group_id, user_id).await?;
    let group = state
        .store
        .find_group_by_id(group_id)
        .await?
        .ok_or(EngineError::NotFound("group"))?;
    Ok(Json(group))
}
