use axum::{
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Extension, Json,
};
use chrono::Utc;
use serde_json::json;
use uuid::Uuid;
use validator::Validate;

use crate::dto::attempt_dto::{StartAttemptRequest, StartAttemptResponse};
use crate::dto::quiz_view_dto::{PreventMessage, QuizView};
use crate::error::{Error, Result};
use crate::models::viewer::Viewer;
use crate::services::attempt_lifecycle::{StartOutcome, StartRequest};
use crate::services::preflight::PreflightInput;
use crate::utils::net::client_ip;
use crate::AppState;

pub async fn view_quiz(
    State(state): State<AppState>,
    Extension(viewer): Extension<Viewer>,
    Path(quiz_id): Path<Uuid>,
) -> Result<Json<QuizView>> {
    let view = state.views.build(&viewer, quiz_id, Utc::now()).await?;
    Ok(Json(view))
}

pub async fn start_attempt(
    State(state): State<AppState>,
    Extension(viewer): Extension<Viewer>,
    Path(quiz_id): Path<Uuid>,
    headers: HeaderMap,
    Json(payload): Json<StartAttemptRequest>,
) -> Result<Response> {
    payload.validate()?;

    let quiz = state.views.load_quiz(quiz_id).await?;
    if !viewer.caps.view || !(viewer.caps.attempt || viewer.caps.preview) {
        return Err(Error::Forbidden(
            "You may not attempt this quiz".to_string(),
        ));
    }

    let outcome = state
        .lifecycle
        .start_attempt(
            &quiz,
            StartRequest {
                user_id: viewer.user_id,
                now: Utc::now(),
                bypass_time_limits: viewer.caps.ignore_time_limits,
                preview: viewer.caps.preview,
                preflight: PreflightInput {
                    password: payload.password,
                    client_ip: client_ip(&headers),
                },
            },
        )
        .await?;

    let response = match outcome {
        StartOutcome::Started(attempt) => (
            StatusCode::CREATED,
            Json(StartAttemptResponse::new(&attempt, false)),
        )
            .into_response(),
        StartOutcome::Resumed(attempt) => {
            (StatusCode::OK, Json(StartAttemptResponse::new(&attempt, true))).into_response()
        }
        StartOutcome::Denied(reasons) => {
            let reasons: Vec<PreventMessage> = reasons.iter().map(PreventMessage::from).collect();
            (
                StatusCode::FORBIDDEN,
                Json(json!({ "error": "attempt_denied", "reasons": reasons })),
            )
                .into_response()
        }
    };
    Ok(response)
}
