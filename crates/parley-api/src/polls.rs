use axum::{
    Extension, Json,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
};
use uuid::Uuid;

use parley_gateway::engine::EngineError;
use parley_types::api::{Claims, CreatePollRequest, VoteBody, VotePollRequest};
use parley_types::models::Poll;

use crate::auth::AppState;
use crate::error::ApiResult;

pub async fn create_poll(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<CreatePollRequest>,
) -> ApiResult<impl IntoResponse> {
    let (poll, message) = state.engine.create_poll(claims.sub, req).await?;
    Ok((
        StatusCode::CREATED,
        Json(serde_json::json!({ "poll": poll, "message": message })),
    ))
}

pub async fn get_poll(
    State(state): State<AppState>,
    Path(poll_id): Path<Uuid>,
    Extension(_claims): Extension<Claims>,
) -> ApiResult<Json<Poll>> {
    let poll = state
        .store
        .find_poll_by_id(poll_id)
        .await?
        .ok_or(EngineError::NotFound("poll"))?;
    Ok(Json(poll))
}

pub async fn vote(
    State(state): State<AppState>,
    Path(poll_id): Path<Uuid>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<VoteBody>,
) -> ApiResult<Json<Poll>> {
    let poll = state
        .engine
        .vote_poll(
            claims.sub,
            VotePollRequest {
                poll_id,
                option_indexes: req.option_indexes,
            },
        )
        .await?;
    Ok(Json(poll))
}
