// rest/routes/generate.rs — generation endpoints.
//
// Marshaling only: deserialize the request, hand it to the pipeline, shape
// the answer. A gate-blocked outcome is a normal 200 with followups; only a
// fatal generation failure becomes a 500.

use axum::{
    body::Body,
    extract::State,
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use futures_util::StreamExt;
use serde_json::{json, Value};
use std::sync::Arc;

use crate::pipeline::followup::{FollowupGate, GateResult};
use crate::pipeline::stream::stream_generate;
use crate::pipeline::GenerateRequest;
use crate::AppContext;

pub async fn generate(
    State(ctx): State<Arc<AppContext>>,
    Json(request): Json<GenerateRequest>,
) -> Result<Json<Value>, (StatusCode, Json<Value>)> {
    match ctx.generator.generate(request).await {
        Ok(response) => Ok(Json(json!(response))),
        Err(e) => Err((
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({ "error": e.to_string() })),
        )),
    }
}

pub async fn generate_stream(
    State(ctx): State<Arc<AppContext>>,
    Json(request): Json<GenerateRequest>,
) -> Response {
    let events = stream_generate(ctx.generator.clone(), request);
    let body = Body::from_stream(
        events.map(|event| Ok::<_, std::convert::Infallible>(event.to_line())),
    );
    (
        [(header::CONTENT_TYPE, "application/x-ndjson")],
        body,
    )
        .into_response()
}

pub async fn questions(
    State(ctx): State<Arc<AppContext>>,
    Json(request): Json<GenerateRequest>,
) -> Json<Value> {
    let mut options = request.options.clone();
    options.request_questions = true;

    let gate = FollowupGate::new(
        ctx.generator.model.as_ref(),
        ctx.config.model.gate_policy(),
    );
    let (result, _) = gate
        .decide(
            &request.requirements,
            &ctx.generator.gate_options(&options),
        )
        .await;

    match result {
        GateResult::Ask(followups) => Json(json!({ "followups": followups })),
        GateResult::Proceed => Json(json!({ "followups": [] })),
    }
}
