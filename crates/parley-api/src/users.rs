use axum::{
    Extension, Json,
    extract::{Path, State},
    response::IntoResponse,
};
use uuid::Uuid;

use parley_gateway::engine::EngineError;
use parley_types::api::Claims;
use parley_types::models::User;

use crate::auth::AppState;
use crate::error::ApiResult;

pub async fn list_users(
    State(state): State<AppState>,
    Extension(_claims): Extension<Claims>,
) -> ApiResult<Json<Vec<User>>> {
    let users = state.store.list_users().await?;
    Ok(Json(users))
}

pub async fn block_user(
    State(state): State<AppState>,
    Path(blocked_id): Path<Uuid>,
    Extension(claims): Extension<Claims>,
) -> ApiResult<impl IntoResponse> {
    set_block(&state, claims.sub, blocked_id, true).await?;
    Ok(Json(serde_json::json!({ "blocked": true })))
}

pub async fn unblock_user(
    State(state): State<AppState>,
    Path(blocked_id): Path<Uuid>,
    Extension(claims): Extension<Claims>,
) -> ApiResult<impl IntoResponse> {
    set_block(&state, claims.sub, blocked_id, false).await?;
    Ok(Json(serde_json::json!({ "blocked": false })))
}

async fn set_block(
    state: &AppState,
    user_id: Uuid,
    blocked_id: Uuid,
    blocked: bool,
) -> ApiResult<()> {
    if user_id == blocked_id {
        return Err(EngineError::Validation("cannot block yourself").into());
    }
    if state.store.find_user_by_id(blocked_id).await?.is_none() {
        return Err(EngineError::NotFound("user").into());
    }
    state.store.set_block(user_id, blocked_id, blocked).await?;
    Ok(())
}
