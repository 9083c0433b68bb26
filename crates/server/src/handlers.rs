//! HTTP handlers for the three endpoints this bridge exposes (spec §4.10).

use std::convert::Infallible;

use axum::{
    Json,
    extract::State,
    http::HeaderMap,
    response::{
        IntoResponse, Response,
        sse::{KeepAlive, Sse},
    },
};
use futures::StreamExt;
use serde_json::{Value, json};

use proxy::{RequestContext, forwarder, model::ClientRequest, prompt, token_counter};

use crate::{AppState, auth::extract_client_key};

pub async fn healthz() -> Json<Value> {
    Json(json!({"status": "ok"}))
}

pub async fn messages(State(state): State<AppState>, headers: HeaderMap, Json(request): Json<ClientRequest>) -> Response {
    let request_id = uuid::Uuid::new_v4().to_string();
    let client_api_key = extract_client_key(&headers);

    let ctx = match RequestContext::build(request_id, request, &state.config.proxy, client_api_key) {
        Ok(ctx) => ctx,
        Err(err) => return err.into_response(),
    };

    if ctx.original.stream {
        let stream = state.forwarder.stream(ctx, state.config.proxy.clone());
        let sse_stream = stream.map(|frame| Ok::<_, Infallible>(frame.event.into_axum_event()));
        Sse::new(sse_stream).keep_alive(KeepAlive::default()).into_response()
    } else {
        match state.forwarder.complete(&ctx, &state.config.proxy).await {
            Ok(response) => Json(response).into_response(),
            Err(err) => err.into_response(),
        }
    }
}

pub async fn count_tokens(Json(request): Json<ClientRequest>) -> Json<Value> {
    let (enriched, _delimiter) = prompt::enrich(&request);
    let rendered = forwarder::render_for_token_count(&enriched);
    let count = token_counter::count(&rendered, &request.model);

    Json(json!({"input_tokens": count, "token_count": count, "tokens": count}))
}
