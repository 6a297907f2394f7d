//! Anthropic Claude executor (OAuth and API-key credentials).

mod cloak;
mod tool_prefix;
mod user_id;

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Map, Value};
use time::format_description::well_known::Rfc3339;
use time::{Duration, OffsetDateTime};
use tokio::sync::mpsc;
use wreq::Method;

use aiproxy_auth::{
    Auth, ExecutorError, Options, ProviderExecutor, Request, Response, StreamChunk,
    IDEMPOTENCY_KEY_METADATA_KEY,
};
use aiproxy_common::{json as json_path, Config};
use aiproxy_registry::ModelRegistry;
use aiproxy_thinking::{apply_thinking, model_with_metadata_suffix, parse_suffix};
use aiproxy_translate::{translate_non_stream, translate_request, translate_stream, translate_token_count, Format, StreamState};

use crate::client::{send, send_unary, SharedHttpClient};
use crate::payload::apply_payload_config;
use crate::sse::{ensure_stream, spawn_reader};
use crate::usage::{parse_claude_stream_usage, parse_claude_usage, Usage};

const PROVIDER: &str = "claude";
const DEFAULT_BASE_URL: &str = "https://api.anthropic.com";
const OAUTH_TOKEN_URL: &str = "https://console.anthropic.com/v1/oauth/token";
const OAUTH_CLIENT_ID: &str = "9d1c250a-e61b-44d9-88ed-5944d1962f5e";
const OAUTH_TOKEN_MARKER: &str = "sk-ant-oat";
const OAUTH_BETA: &str = "oauth-2025-04-20";
const BASE_BETAS: &str =
    "claude-code-20250219,oauth-2025-04-20,interleaved-thinking-2025-05-14,fine-grained-tool-streaming-2025-05-14";
const USER_AGENT: &str = "claude-cli/1.0.83 (external, cli)";

pub struct ClaudeExecutor {
    http: Arc<SharedHttpClient>,
    config: Arc<Config>,
    registry: Arc<ModelRegistry>,
}

impl ClaudeExecutor {
    pub fn new(http: Arc<SharedHttpClient>, config: Arc<Config>, registry: Arc<ModelRegistry>) -> Self {
        Self {
            http,
            config,
            registry,
        }
    }

    fn credentials(auth: &Auth) -> Result<(String, String, bool), ExecutorError> {
        let api_key = auth
            .access_credential()
            .ok_or_else(|| ExecutorError::new(401, "credential has no usable token"))?;
        let base_url = auth
            .attributes
            .get("base_url")
            .filter(|url| !url.trim().is_empty())
            .cloned()
            .unwrap_or_else(|| DEFAULT_BASE_URL.to_string());
        let is_oauth = api_key.contains(OAUTH_TOKEN_MARKER);
        Ok((api_key, base_url, is_oauth))
    }

    /// Full request preparation shared by the unary and streaming paths:
    /// translate, thinking, cloaking, payload rules, beta extraction, and
    /// OAuth tool prefixing.
    fn prepare_body(
        &self,
        auth: &Auth,
        req: &Request,
        opts: &Options,
        stream_shape: bool,
        is_oauth: bool,
    ) -> Result<(Vec<u8>, Vec<String>, String), ExecutorError> {
        let base_model = parse_suffix(&req.model).model_name;
        let from = opts.source_format.wire();
        let translated = translate_request(from, Format::Claude, &base_model, &req.payload, stream_shape);
        let mut body: Value = serde_json::from_slice(&translated)
            .map_err(|err| ExecutorError::new(400, format!("invalid request payload: {err}")))?;
        json_path::set(&mut body, "model", json!(base_model.clone()));

        let thinking_model = model_with_metadata_suffix(&req.model, &req.metadata);
        let model_info = self.registry.model_info(&base_model);
        apply_thinking(&mut body, &thinking_model, PROVIDER, model_info.as_ref())
            .map_err(|err| ExecutorError::new(err.status_code(), err.to_string()))?;

        let client_user_agent = opts
            .headers
            .get(http::header::USER_AGENT)
            .and_then(|value| value.to_str().ok())
            .unwrap_or_default();
        cloak::apply_cloaking(&self.config, auth, &mut body, &base_model, client_user_agent);

        let original_source = if opts.original_request.is_empty() {
            req.payload.clone()
        } else {
            opts.original_request.clone()
        };
        let original_translated =
            translate_request(from, Format::Claude, &base_model, &original_source, stream_shape);
        let original: Value = serde_json::from_slice(&original_translated).unwrap_or(json!({}));
        apply_payload_config(&self.config, &base_model, PROVIDER, "", &mut body, &original);

        // Upstream rejects thinking combined with a forced tool choice.
        if matches!(json_path::get_str(&body, "tool_choice.type"), Some("any") | Some("tool")) {
            json_path::remove(&mut body, "thinking");
        }

        let betas = extract_betas(&mut body);
        if is_oauth {
            tool_prefix::apply_tool_prefix(&mut body);
        }
        let bytes = serde_json::to_vec(&body)
            .map_err(|err| ExecutorError::fatal(format!("payload serialization failed: {err}")))?;
        Ok((bytes, betas, base_model))
    }

    fn headers(
        &self,
        auth: &Auth,
        api_key: &str,
        base_url: &str,
        stream: bool,
        extra_betas: &[String],
        opts: &Options,
    ) -> Vec<(String, String)> {
        let mut headers = Vec::new();
        let use_api_key = auth.attributes.contains_key("api_key")
            && base_url.contains("api.anthropic.com");
        if use_api_key {
            headers.push(("x-api-key".to_string(), api_key.to_string()));
        } else {
            headers.push(("Authorization".to_string(), format!("Bearer {api_key}")));
        }
        headers.push(("Content-Type".to_string(), "application/json".to_string()));

        let mut betas = opts
            .headers
            .get("anthropic-beta")
            .and_then(|value| value.to_str().ok())
            .map(str::to_string)
            .unwrap_or_else(|| BASE_BETAS.to_string());
        if !betas.contains("oauth") {
            betas.push(',');
            betas.push_str(OAUTH_BETA);
        }
        for beta in extra_betas {
            if !betas.split(',').any(|existing| existing.trim() == beta) {
                betas.push(',');
                betas.push_str(beta);
            }
        }
        headers.push(("Anthropic-Beta".to_string(), betas));
        headers.push(("Anthropic-Version".to_string(), "2023-06-01".to_string()));
        headers.push((
            "Anthropic-Dangerous-Direct-Browser-Access".to_string(),
            "true".to_string(),
        ));
        headers.push(("X-App".to_string(), "cli".to_string()));
        headers.push(("X-Stainless-Helper-Method".to_string(), "stream".to_string()));
        headers.push(("X-Stainless-Retry-Count".to_string(), "0".to_string()));
        headers.push(("X-Stainless-Runtime".to_string(), "node".to_string()));
        headers.push(("X-Stainless-Runtime-Version".to_string(), "v24.3.0".to_string()));
        headers.push(("X-Stainless-Package-Version".to_string(), "0.55.1".to_string()));
        headers.push(("X-Stainless-Lang".to_string(), "js".to_string()));
        headers.push(("X-Stainless-Arch".to_string(), "arm64".to_string()));
        headers.push(("X-Stainless-Os".to_string(), "MacOS".to_string()));
        headers.push(("X-Stainless-Timeout".to_string(), "60".to_string()));
        headers.push(("User-Agent".to_string(), USER_AGENT.to_string()));
        if let Some(Value::String(key)) = opts.metadata.get(IDEMPOTENCY_KEY_METADATA_KEY) {
            headers.push(("Idempotency-Key".to_string(), key.clone()));
        }
        headers.push((
            "Accept".to_string(),
            if stream {
                "text/event-stream".to_string()
            } else {
                "application/json".to_string()
            },
        ));
        headers
    }
}

fn extract_betas(body: &mut Value) -> Vec<String> {
    match json_path::remove(body, "betas") {
        Some(Value::Array(items)) => items
            .iter()
            .filter_map(Value::as_str)
            .map(str::trim)
            .filter(|beta| !beta.is_empty())
            .map(str::to_string)
            .collect(),
        Some(Value::String(single)) if !single.trim().is_empty() => {
            vec![single.trim().to_string()]
        }
        _ => Vec::new(),
    }
}

#[async_trait]
impl ProviderExecutor for ClaudeExecutor {
    fn identifier(&self) -> &'static str {
        PROVIDER
    }

    async fn execute(
        &self,
        auth: &Auth,
        req: Request,
        opts: Options,
    ) -> Result<Response, ExecutorError> {
        let (api_key, base_url, is_oauth) = Self::credentials(auth)?;
        let from = opts.source_format.wire();
        let stream_shape = from != Format::Claude;
        let (body, betas, base_model) =
            self.prepare_body(auth, &req, &opts, stream_shape, is_oauth)?;

        let url = format!("{base_url}/v1/messages?beta=true");
        let headers = self.headers(auth, &api_key, &base_url, false, &betas, &opts);
        tracing::debug!(url = %url, model = %base_model, auth = %auth.id, "claude upstream request");
        let client = self.http.client()?;
        let upstream = send_unary(&client, Method::POST, &url, &headers, Some(body.clone())).await?;

        let mut response_value: Value = serde_json::from_slice(&upstream.body)
            .map_err(|err| ExecutorError::fatal(format!("unparsable upstream response: {err}")))?;
        if is_oauth {
            tool_prefix::strip_prefix_from_response(&mut response_value);
        }
        let usage = parse_claude_usage(&response_value);
        let response_bytes = serde_json::to_vec(&response_value).unwrap_or_default();
        let mut state = StreamState::default();
        let payload =
            translate_non_stream(Format::Claude, from, &req.model, &response_bytes, &mut state);

        let mut metadata = Map::new();
        usage.into_metadata(&mut metadata);
        Ok(Response { payload, metadata })
    }

    async fn execute_stream(
        &self,
        auth: &Auth,
        req: Request,
        opts: Options,
    ) -> Result<mpsc::Receiver<StreamChunk>, ExecutorError> {
        let (api_key, base_url, is_oauth) = Self::credentials(auth)?;
        let from = opts.source_format.wire();
        let (body, betas, base_model) = self.prepare_body(auth, &req, &opts, true, is_oauth)?;

        let url = format!("{base_url}/v1/messages?beta=true");
        let headers = self.headers(auth, &api_key, &base_url, true, &betas, &opts);
        tracing::debug!(url = %url, model = %base_model, auth = %auth.id, "claude upstream stream");
        let client = self.http.client()?;
        let response = send(&client, Method::POST, &url, &headers, Some(body)).await?;
        let response = ensure_stream(response).await?;

        let model = req.model.clone();
        let auth_id = auth.id.clone();
        let provider = PROVIDER;
        let mut state = StreamState::default();
        let mut usage = Usage::default();
        Ok(spawn_reader(response, move |line| {
            parse_claude_stream_usage(line, &mut usage);
            if line == b"[DONE]" {
                tracing::info!(provider, model = %model, auth = %auth_id,
                    input_tokens = usage.input_tokens, output_tokens = usage.output_tokens, "usage");
            }
            let stripped;
            let line = if is_oauth {
                match tool_prefix::strip_prefix_from_stream_line(line) {
                    Some(rewritten) => {
                        stripped = rewritten;
                        stripped.as_slice()
                    }
                    None => line,
                }
            } else {
                line
            };
            translate_stream(Format::Claude, from, &model, line, &mut state)
        }))
    }

    async fn count_tokens(
        &self,
        auth: &Auth,
        req: Request,
        opts: Options,
    ) -> Result<Response, ExecutorError> {
        let (api_key, base_url, is_oauth) = Self::credentials(auth)?;
        let from = opts.source_format.wire();
        let stream_shape = from != Format::Claude;
        let (mut body_bytes, betas, _) =
            self.prepare_body(auth, &req, &opts, stream_shape, is_oauth)?;
        // The count endpoint rejects streaming-only fields.
        if let Ok(mut value) = serde_json::from_slice::<Value>(&body_bytes) {
            json_path::remove(&mut value, "stream");
            body_bytes = serde_json::to_vec(&value).unwrap_or(body_bytes);
        }

        let url = format!("{base_url}/v1/messages/count_tokens?beta=true");
        let headers = self.headers(auth, &api_key, &base_url, false, &betas, &opts);
        let client = self.http.client()?;
        let upstream = send_unary(&client, Method::POST, &url, &headers, Some(body_bytes)).await?;

        let value: Value = serde_json::from_slice(&upstream.body)
            .map_err(|err| ExecutorError::fatal(format!("unparsable count response: {err}")))?;
        let count = json_path::get_i64(&value, "input_tokens").unwrap_or(0);
        Ok(Response {
            payload: translate_token_count(from, count, &upstream.body),
            metadata: Map::new(),
        })
    }

    async fn refresh(&self, auth: &Auth) -> Result<Auth, ExecutorError> {
        let Some(refresh_token) = auth.metadata_str("refresh_token").map(str::to_string) else {
            return Ok(auth.clone());
        };
        if refresh_token.is_empty() {
            return Ok(auth.clone());
        }
        let payload = serde_json::to_vec(&json!({
            "grant_type": "refresh_token",
            "refresh_token": refresh_token,
            "client_id": OAUTH_CLIENT_ID,
        }))
        .map_err(|err| ExecutorError::fatal(err.to_string()))?;
        let headers = vec![("Content-Type".to_string(), "application/json".to_string())];
        let client = self.http.client()?;
        let upstream =
            send_unary(&client, Method::POST, OAUTH_TOKEN_URL, &headers, Some(payload)).await?;
        let token: Value = serde_json::from_slice(&upstream.body)
            .map_err(|err| ExecutorError::fatal(format!("unparsable token response: {err}")))?;

        let mut updated = auth.clone();
        if let Some(access_token) = json_path::get_str(&token, "access_token") {
            updated
                .metadata
                .insert("access_token".to_string(), Value::String(access_token.to_string()));
        }
        if let Some(new_refresh) = json_path::get_str(&token, "refresh_token") {
            if !new_refresh.is_empty() {
                updated
                    .metadata
                    .insert("refresh_token".to_string(), Value::String(new_refresh.to_string()));
            }
        }
        if let Some(expires_in) = json_path::get_i64(&token, "expires_in") {
            let expiry = OffsetDateTime::now_utc() + Duration::seconds(expires_in);
            if let Ok(formatted) = expiry.format(&Rfc3339) {
                updated
                    .metadata
                    .insert("expired".to_string(), Value::String(formatted));
            }
        }
        updated.metadata.insert("type".to_string(), Value::String(PROVIDER.to_string()));
        if let Ok(now) = OffsetDateTime::now_utc().format(&Rfc3339) {
            updated
                .metadata
                .insert("last_refresh".to_string(), Value::String(now));
        }
        Ok(updated)
    }
}
