use std::collections::HashMap;
use std::sync::Arc;

use axum::body::Body;
use axum::extract::{Path, Query, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::Router;
use bytes::Bytes;
use serde_json::{json, Value};
use tokio_stream::wrappers::ReceiverStream;
use tokio_stream::StreamExt;

use aiproxy_common::json as json_path;
use aiproxy_translate::Format;

use crate::error::ErrorMessage;
use crate::handler::ProxyHandler;

/// Inbound surface: the four chat endpoints plus per-protocol model
/// listings, answered locally from the registry.
pub fn proxy_router(handler: Arc<ProxyHandler>) -> Router {
    Router::new()
        .route("/v1/chat/completions", post(openai_chat))
        .route("/v1/responses", post(openai_responses))
        .route("/v1/messages", post(claude_messages))
        .route("/v1/messages/count_tokens", post(claude_count_tokens))
        .route("/v1/models", get(openai_models))
        .route("/v1beta/models", get(gemini_models))
        .route("/v1beta/models/{model_action}", post(gemini_action))
        .with_state(handler)
}

/// `alt|$alt=sse` switches unary Gemini endpoints into SSE streaming.
fn alt_param(params: &HashMap<String, String>) -> String {
    params
        .get("alt")
        .or_else(|| params.get("$alt"))
        .cloned()
        .unwrap_or_default()
}

fn error_response(err: ErrorMessage) -> Response {
    let status = StatusCode::from_u16(err.status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    let mut response = (status, err.body()).into_response();
    if let Some(extra) = &err.headers {
        for (name, value) in extra {
            response.headers_mut().insert(name.clone(), value.clone());
        }
    }
    response
        .headers_mut()
        .insert(header::CONTENT_TYPE, "application/json".parse().expect("static header"));
    response
}

fn json_response(payload: Vec<u8>) -> Response {
    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, "application/json")],
        payload,
    )
        .into_response()
}

/// Wraps the handler's chunk channel as an SSE body. Errors arriving after
/// the first forwarded byte terminate the stream with one error block.
fn sse_response(rx: tokio::sync::mpsc::Receiver<Result<Vec<u8>, ErrorMessage>>) -> Response {
    let stream = ReceiverStream::new(rx).map(|item| match item {
        Ok(payload) => Ok::<Bytes, std::convert::Infallible>(Bytes::from(payload)),
        Err(err) => {
            let body = err.body();
            let mut block = Vec::with_capacity(body.len() + 16);
            block.extend_from_slice(b"data: ");
            block.extend_from_slice(&body);
            block.extend_from_slice(b"\n\n");
            Ok(Bytes::from(block))
        }
    });
    (
        StatusCode::OK,
        [
            (header::CONTENT_TYPE, "text/event-stream"),
            (header::CACHE_CONTROL, "no-cache"),
        ],
        Body::from_stream(stream),
    )
        .into_response()
}

async fn run(
    handler: Arc<ProxyHandler>,
    format: Format,
    model: String,
    stream: bool,
    alt: String,
    headers: HeaderMap,
    payload: Bytes,
) -> Response {
    if stream {
        let rx = handler
            .execute_stream(format, &model, &payload, &alt, &headers)
            .await;
        sse_response(rx)
    } else {
        match handler.execute(format, &model, &payload, &alt, &headers).await {
            Ok(body) => json_response(body),
            Err(err) => error_response(err),
        }
    }
}

async fn openai_chat(
    State(handler): State<Arc<ProxyHandler>>,
    headers: HeaderMap,
    payload: Bytes,
) -> Response {
    let Ok(body) = serde_json::from_slice::<Value>(&payload) else {
        return error_response(ErrorMessage::new(400, "invalid json body"));
    };
    let model = json_path::get_str(&body, "model").unwrap_or_default().to_string();
    let stream = json_path::get_bool(&body, "stream").unwrap_or(false);
    run(handler, Format::OpenAI, model, stream, String::new(), headers, payload).await
}

async fn openai_responses(
    State(handler): State<Arc<ProxyHandler>>,
    headers: HeaderMap,
    payload: Bytes,
) -> Response {
    let Ok(body) = serde_json::from_slice::<Value>(&payload) else {
        return error_response(ErrorMessage::new(400, "invalid json body"));
    };
    let model = json_path::get_str(&body, "model").unwrap_or_default().to_string();
    let stream = json_path::get_bool(&body, "stream").unwrap_or(false);
    run(handler, Format::Responses, model, stream, String::new(), headers, payload).await
}

async fn claude_messages(
    State(handler): State<Arc<ProxyHandler>>,
    headers: HeaderMap,
    payload: Bytes,
) -> Response {
    let Ok(body) = serde_json::from_slice::<Value>(&payload) else {
        return error_response(ErrorMessage::new(400, "invalid json body"));
    };
    let model = json_path::get_str(&body, "model").unwrap_or_default().to_string();
    let stream = json_path::get_bool(&body, "stream").unwrap_or(false);
    run(handler, Format::Claude, model, stream, String::new(), headers, payload).await
}

async fn claude_count_tokens(
    State(handler): State<Arc<ProxyHandler>>,
    headers: HeaderMap,
    payload: Bytes,
) -> Response {
    let Ok(body) = serde_json::from_slice::<Value>(&payload) else {
        return error_response(ErrorMessage::new(400, "invalid json body"));
    };
    let model = json_path::get_str(&body, "model").unwrap_or_default().to_string();
    match handler
        .execute_count(Format::Claude, &model, &payload, "", &headers)
        .await
    {
        Ok(body) => json_response(body),
        Err(err) => error_response(err),
    }
}

/// Gemini actions arrive as one path segment: `{model}:{action}`.
async fn gemini_action(
    State(handler): State<Arc<ProxyHandler>>,
    Path(model_action): Path<String>,
    Query(params): Query<HashMap<String, String>>,
    headers: HeaderMap,
    payload: Bytes,
) -> Response {
    let Some((model, action)) = model_action.rsplit_once(':') else {
        return error_response(ErrorMessage::new(404, "unknown gemini path"));
    };
    let alt = alt_param(&params);
    match action {
        "generateContent" => {
            let stream = alt.eq_ignore_ascii_case("sse");
            run(
                handler,
                Format::Gemini,
                model.to_string(),
                stream,
                alt,
                headers,
                payload,
            )
            .await
        }
        "streamGenerateContent" => {
            run(
                handler,
                Format::Gemini,
                model.to_string(),
                true,
                "sse".to_string(),
                headers,
                payload,
            )
            .await
        }
        "countTokens" => {
            match handler
                .execute_count(Format::Gemini, model, &payload, &alt, &headers)
                .await
            {
                Ok(body) => json_response(body),
                Err(err) => error_response(err),
            }
        }
        _ => error_response(ErrorMessage::new(404, "unknown gemini action")),
    }
}

async fn openai_models(State(handler): State<Arc<ProxyHandler>>) -> Response {
    let now = time::OffsetDateTime::now_utc().unix_timestamp();
    let data: Vec<Value> = handler
        .manager()
        .registry()
        .all_models()
        .into_iter()
        .map(|model| {
            json!({
                "id": model.id,
                "object": "model",
                "created": now,
                "owned_by": model.provider,
            })
        })
        .collect();
    json_response(
        serde_json::to_vec(&json!({"object": "list", "data": data})).unwrap_or_default(),
    )
}

async fn gemini_models(State(handler): State<Arc<ProxyHandler>>) -> Response {
    let models: Vec<Value> = handler
        .manager()
        .registry()
        .all_models()
        .into_iter()
        .map(|model| {
            json!({
                "name": format!("models/{}", model.id),
                "displayName": model.display_name.unwrap_or_else(|| model.id.clone()),
                "supportedGenerationMethods": ["generateContent", "streamGenerateContent", "countTokens"],
            })
        })
        .collect();
    json_response(serde_json::to_vec(&json!({"models": models})).unwrap_or_default())
}
