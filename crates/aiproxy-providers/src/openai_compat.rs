//! Shared plumbing for OpenAI-compatible chat upstreams (Qwen, iFlow).

use serde_json::{json, Map, Value};
use tokio::sync::mpsc;
use wreq::Method;

use aiproxy_auth::{Auth, ExecutorError, Options, Request, Response, StreamChunk};
use aiproxy_common::{json as json_path, Config};
use aiproxy_registry::ModelRegistry;
use aiproxy_thinking::{apply_thinking, model_with_metadata_suffix, parse_suffix};
use aiproxy_translate::{
    translate_non_stream, translate_request, translate_stream, translate_token_count, Format,
    StreamState,
};

use crate::client::{send, send_unary, SharedHttpClient};
use crate::payload::apply_payload_config;
use crate::sse::{ensure_stream, spawn_reader};
use crate::usage::parse_openai_usage;

pub(crate) struct CompatContext<'a> {
    pub provider: &'static str,
    pub http: &'a SharedHttpClient,
    pub config: &'a Config,
    pub registry: &'a ModelRegistry,
    pub base_url: String,
    pub headers: Vec<(String, String)>,
}

pub(crate) fn bearer_headers(auth: &Auth) -> Result<Vec<(String, String)>, ExecutorError> {
    let token = auth
        .access_credential()
        .ok_or_else(|| ExecutorError::new(401, "credential has no usable token"))?;
    Ok(vec![
        ("Authorization".to_string(), format!("Bearer {token}")),
        ("Content-Type".to_string(), "application/json".to_string()),
    ])
}

pub(crate) fn prepare_body(
    ctx: &CompatContext<'_>,
    req: &Request,
    opts: &Options,
    stream: bool,
) -> Result<Vec<u8>, ExecutorError> {
    let base_model = parse_suffix(&req.model).model_name;
    let from = opts.source_format.wire();
    let translated = translate_request(from, Format::OpenAI, &base_model, &req.payload, stream);
    let mut body: Value = serde_json::from_slice(&translated)
        .map_err(|err| ExecutorError::new(400, format!("invalid request payload: {err}")))?;
    json_path::set(&mut body, "model", json!(base_model.clone()));
    json_path::set(&mut body, "stream", json!(stream));

    let thinking_model = model_with_metadata_suffix(&req.model, &req.metadata);
    let model_info = ctx.registry.model_info(&base_model);
    apply_thinking(&mut body, &thinking_model, ctx.provider, model_info.as_ref())
        .map_err(|err| ExecutorError::new(err.status_code(), err.to_string()))?;

    let original_source = if opts.original_request.is_empty() {
        req.payload.clone()
    } else {
        opts.original_request.clone()
    };
    let original_translated =
        translate_request(from, Format::OpenAI, &base_model, &original_source, stream);
    let original: Value =
        serde_json::from_slice(&original_translated).unwrap_or(Value::Object(Map::new()));
    apply_payload_config(ctx.config, &base_model, ctx.provider, "", &mut body, &original);

    serde_json::to_vec(&body)
        .map_err(|err| ExecutorError::fatal(format!("payload serialization failed: {err}")))
}

pub(crate) async fn execute(
    ctx: &CompatContext<'_>,
    req: &Request,
    opts: &Options,
) -> Result<Response, ExecutorError> {
    let from = opts.source_format.wire();
    let body = prepare_body(ctx, req, opts, false)?;
    let url = format!("{}/chat/completions", ctx.base_url);
    tracing::debug!(url = %url, provider = ctx.provider, "openai-compatible upstream request");
    let client = ctx.http.client()?;
    let upstream = send_unary(&client, Method::POST, &url, &ctx.headers, Some(body)).await?;

    let value: Value = serde_json::from_slice(&upstream.body)
        .map_err(|err| ExecutorError::fatal(format!("unparsable upstream response: {err}")))?;
    let usage = parse_openai_usage(&value);
    let mut state = StreamState::default();
    let payload = translate_non_stream(Format::OpenAI, from, &req.model, &upstream.body, &mut state);
    let mut metadata = Map::new();
    usage.into_metadata(&mut metadata);
    Ok(Response { payload, metadata })
}

pub(crate) async fn execute_stream(
    ctx: &CompatContext<'_>,
    req: &Request,
    opts: &Options,
) -> Result<mpsc::Receiver<StreamChunk>, ExecutorError> {
    let from = opts.source_format.wire();
    let body = prepare_body(ctx, req, opts, true)?;
    let url = format!("{}/chat/completions", ctx.base_url);
    tracing::debug!(url = %url, provider = ctx.provider, "openai-compatible upstream stream");
    let client = ctx.http.client()?;
    let response = send(&client, Method::POST, &url, &ctx.headers, Some(body)).await?;
    let response = ensure_stream(response).await?;

    let model = req.model.clone();
    let mut state = StreamState::default();
    Ok(spawn_reader(response, move |line| {
        translate_stream(Format::OpenAI, from, &model, line, &mut state)
    }))
}

/// These upstreams expose no token counter; a character-based estimate keeps
/// the count surface working.
pub(crate) fn estimate_count(req: &Request, opts: &Options) -> Response {
    let from = opts.source_format.wire();
    let estimate = (req.payload.len() as i64 / 4).max(1);
    Response {
        payload: translate_token_count(from, estimate, &req.payload),
        metadata: Map::new(),
    }
}
