use axum::{
    Extension, Json,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
};
use uuid::Uuid;

use parley_gateway::engine::EngineError;
use parley_types::api::{
    Claims, EditMessageRequest, ForwardRequest, ReactionRequest, ReplyRequest, SendMessageRequest,
};
use parley_types::models::Message;

use crate::auth::AppState;
use crate::error::ApiResult;

pub async fn send_message(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<SendMessageRequest>,
) -> ApiResult<impl IntoResponse> {
    let message = state.engine.send_message(claims.sub, req).await?;
    Ok((StatusCode::CREATED, Json(message)))
}

/// Direct history between the caller and another user, chronological.
pub async fn direct_history(
    State(state): State<AppState>,
    Path(other_user_id): Path<Uuid>,
    Extension(claims): Extension<Claims>,
) -> ApiResult<Json<Vec<Message>>> {
    let messages = state
        .store
        .direct_messages(claims.sub, other_user_id)
        .await?;
    Ok(Json(messages))
}

pub async fn group_history(
    State(state): State<AppState>,
    Path(group_id): Path<Uuid>,
    Extension(_claims): Extension<Claims>,
) -> ApiResult<Json<Vec<Message>>> {
    if state.store.find_group_by_id(group_id).await?.is_none() {
        return Err(EngineError::NotFound("group").into());
    }
    let messages = state.store.group_messages(group_id).await?;
    Ok(Json(messages))
}

pub async fn edit_message(
    State(state): State<AppState>,
    Path(message_id): Path<Uuid>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<EditMessageRequest>,
) -> ApiResult<Json<Message>> {
    let message = state
        .engine
        .edit_message(claims.sub, message_id, req.content)
        .await?;
    Ok(Json(message))
}

pub async fn delete_message(
    State(state): State<AppState>,
    Path(message_id): Path<Uuid>,
    Extension(claims): Extension<Claims>,
) -> ApiResult<impl IntoResponse> {
    state.engine.delete_message(claims.sub, message_id).await?;
    Ok(Json(serde_json::json!({ "message": "message deleted" })))
}

pub async fn pin_message(
    State(state): State<AppState>,
    Path(message_id): Path<Uuid>,
    Extension(claims): Extension<Claims>,
) -> ApiResult<impl IntoResponse> {
    let pinned = state.engine.toggle_pin(claims.sub, message_id).await?;
    Ok(Json(serde_json::json!({ "pinned": pinned })))
}

pub async fn mark_read(
    State(state): State<AppState>,
    Path(message_id): Path<Uuid>,
    Extension(claims): Extension<Claims>,
) -> ApiResult<Json<Message>> {
    let message = state.engine.mark_read(claims.sub, message_id).await?;
    Ok(Json(message))
}

pub async fn add_reaction(
    State(state): State<AppState>,
    Path(message_id): Path<Uuid>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<ReactionRequest>,
) -> ApiResult<Json<Message>> {
    let message = state
        .engine
        .add_reaction(claims.sub, message_id, &req.emoji)
        .await?;
    Ok(Json(message))
}

pub async fn remove_reaction(
    State(state): State<AppState>,
    Path(message_id): Path<Uuid>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<ReactionRequest>,
) -> ApiResult<Json<Message>> {
    let message = state
        .engine
        .remove_reaction(claims.sub, message_id, &req.emoji)
        .await?;
    Ok(Json(message))
}

pub async fn reply(
    State(state): State<AppState>,
    Path(parent_id): Path<Uuid>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<ReplyRequest>,
) -> ApiResult<impl IntoResponse> {
    let message = state
        .engine
        .reply_to_message(claims.sub, parent_id, req)
        .await?;
    Ok((StatusCode::CREATED, Json(message)))
}

pub async fn forward(
    State(state): State<AppState>,
    Path(message_id): Path<Uuid>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<ForwardRequest>,
) -> ApiResult<impl IntoResponse> {
    let message = state
        .engine
        .forward_message(claims.sub, message_id, req)
        .await?;
    Ok((StatusCode::CREATED, Json(message)))
}

pub async fn thread(
    State(state): State<AppState>,
    Path(message_id): Path<Uuid>,
    Extension(_claims): Extension<Claims>,
) -> ApiResult<Json<Vec<Message>>> {
    if state.store.find_message_by_id(message_id).await?.is_none() {
        return Err(EngineError::NotFound("message").into());
    }
    let messages = state.store.thread_messages(message_id).await?;
    Ok(Json(messages))
}
