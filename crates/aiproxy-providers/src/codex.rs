//! Codex executor: ChatGPT backend Responses API over OAuth.

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
use aiproxy_translate::{
    translate_non_stream, translate_request, translate_stream, translate_token_count, Format,
    StreamState,
};

use crate::client::{send, SharedHttpClient};
use crate::payload::apply_payload_config;
use crate::sse::{collect_stream, ensure_stream, spawn_reader};
use crate::usage::parse_openai_usage;

const PROVIDER: &str = "codex";
const BASE_URL: &str = "https://chatgpt.com/backend-api/codex";
const OAUTH_TOKEN_URL: &str = "https://auth.openai.com/oauth/token";
const OAUTH_CLIENT_ID: &str = "app_EMoamEEZ73f0CkXaXp7hrann";
const USER_AGENT: &str = "codex_cli_rs/0.44.0 (Ubuntu 24.04.2 LTS; x86_64) terminal";
const DEFAULT_INSTRUCTIONS: &str =
    "You are a coding agent. Be precise, safe, and helpful; prefer minimal, correct changes.";

pub struct CodexExecutor {
    http: Arc<SharedHttpClient>,
    config: Arc<Config>,
    registry: Arc<ModelRegistry>,
}

impl CodexExecutor {
    pub fn new(http: Arc<SharedHttpClient>, config: Arc<Config>, registry: Arc<ModelRegistry>) -> Self {
        Self {
            http,
            config,
            registry,
        }
    }

    fn headers(auth: &Auth, opts: &Options) -> Result<Vec<(String, String)>, ExecutorError> {
        let token = auth
            .access_credential()
            .ok_or_else(|| ExecutorError::new(401, "credential has no access token"))?;
        let mut headers = vec![
            ("Authorization".to_string(), format!("Bearer {token}")),
            ("Content-Type".to_string(), "application/json".to_string()),
            ("Accept".to_string(), "text/event-stream".to_string()),
            ("OpenAI-Beta".to_string(), "responses=experimental".to_string()),
            ("Originator".to_string(), "codex_cli_rs".to_string()),
            ("User-Agent".to_string(), USER_AGENT.to_string()),
        ];
        if let Some(account_id) = auth.metadata_str("account_id") {
            if !account_id.is_empty() {
                headers.push(("chatgpt-account-id".to_string(), account_id.to_string()));
            }
        }
        let session = opts
            .metadata
            .get(IDEMPOTENCY_KEY_METADATA_KEY)
            .and_then(Value::as_str)
            .map(str::to_string)
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
        headers.push(("session_id".to_string(), session));
        Ok(headers)
    }

    fn prepare_body(
        &self,
        req: &Request,
        opts: &Options,
    ) -> Result<Vec<u8>, ExecutorError> {
        let base_model = parse_suffix(&req.model).model_name;
        let from = opts.source_format.wire();
        let translated =
            translate_request(from, Format::Responses, &base_model, &req.payload, true);
        let mut body: Value = serde_json::from_slice(&translated)
            .map_err(|err| ExecutorError::new(400, format!("invalid request payload: {err}")))?;
        json_path::set(&mut body, "model", json!(base_model.clone()));
        // The backend only streams and requires an instructions field.
        json_path::set(&mut body, "stream", json!(true));
        json_path::set(&mut body, "store", json!(false));
        if json_path::get_str(&body, "instructions").unwrap_or_default().is_empty() {
            json_path::set(&mut body, "instructions", json!(DEFAULT_INSTRUCTIONS));
        }

        let thinking_model = model_with_metadata_suffix(&req.model, &req.metadata);
        let model_info = self.registry.model_info(&base_model);
        apply_thinking(&mut body, &thinking_model, PROVIDER, model_info.as_ref())
            .map_err(|err| ExecutorError::new(err.status_code(), err.to_string()))?;

        let original_source = if opts.original_request.is_empty() {
            req.payload.clone()
        } else {
            opts.original_request.clone()
        };
        let original_translated =
            translate_request(from, Format::Responses, &base_model, &original_source, true);
        let original: Value =
            serde_json::from_slice(&original_translated).unwrap_or(Value::Object(Map::new()));
        apply_payload_config(&self.config, &base_model, PROVIDER, "", &mut body, &original);

        serde_json::to_vec(&body)
            .map_err(|err| ExecutorError::fatal(format!("payload serialization failed: {err}")))
    }

    async fn open_stream(
        &self,
        auth: &Auth,
        req: &Request,
        opts: &Options,
    ) -> Result<wreq::Response, ExecutorError> {
        let body = self.prepare_body(req, opts)?;
        let url = format!("{BASE_URL}/responses");
        tracing::debug!(url = %url, auth = %auth.id, "codex upstream request");
        let client = self.http.client()?;
        let response =
            send(&client, Method::POST, &url, &Self::headers(auth, opts)?, Some(body)).await?;
        ensure_stream(response).await
    }
}

#[async_trait]
impl ProviderExecutor for CodexExecutor {
    fn identifier(&self) -> &'static str {
        PROVIDER
    }

    async fn execute(
        &self,
        auth: &Auth,
        req: Request,
        opts: Options,
    ) -> Result<Response, ExecutorError> {
        // The backend is stream-only: collect events and keep the terminal
        // response envelope.
        let from = opts.source_format.wire();
        let response = self.open_stream(auth, &req, &opts).await?;
        let raw = spawn_reader(response, |line| {
            if line == b"[DONE]" {
                Vec::new()
            } else {
                vec![String::from_utf8_lossy(line).into_owned()]
            }
        });
        let lines = collect_stream(raw).await?;

        let mut completed: Option<Value> = None;
        for line in &lines {
            let text = String::from_utf8_lossy(line);
            let payload = text.trim().strip_prefix("data:").map(str::trim).unwrap_or(text.trim());
            let Ok(value) = serde_json::from_str::<Value>(payload) else {
                continue;
            };
            match json_path::get_str(&value, "type") {
                Some("response.completed") | Some("response.incomplete") => {
                    completed = json_path::get(&value, "response").cloned();
                }
                _ => {}
            }
        }
        let completed = completed
            .ok_or_else(|| ExecutorError::fatal("upstream stream ended without a response"))?;
        let usage = parse_openai_usage(&completed);
        let response_bytes =
            serde_json::to_vec(&completed).map_err(|err| ExecutorError::fatal(err.to_string()))?;
        let mut state = StreamState::default();
        let payload =
            translate_non_stream(Format::Responses, from, &req.model, &response_bytes, &mut state);
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
        let from = opts.source_format.wire();
        let response = self.open_stream(auth, &req, &opts).await?;
        let model = req.model.clone();
        let mut state = StreamState::default();
        Ok(spawn_reader(response, move |line| {
            translate_stream(Format::Responses, from, &model, line, &mut state)
        }))
    }

    async fn count_tokens(
        &self,
        auth: &Auth,
        req: Request,
        opts: Options,
    ) -> Result<Response, ExecutorError> {
        // No upstream counter; estimate from the serialized prompt.
        let _ = auth;
        let from = opts.source_format.wire();
        let chars = req.payload.len() as i64;
        let estimate = (chars / 4).max(1);
        Ok(Response {
            payload: translate_token_count(from, estimate, &req.payload),
            metadata: Map::new(),
        })
    }

    async fn refresh(&self, auth: &Auth) -> Result<Auth, ExecutorError> {
        let refresh_token = auth.metadata_str("refresh_token").unwrap_or_default().to_string();
        if refresh_token.is_empty() {
            return Ok(auth.clone());
        }
        let payload = serde_json::to_vec(&json!({
            "grant_type": "refresh_token",
            "refresh_token": refresh_token,
            "client_id": OAUTH_CLIENT_ID,
            "scope": "openid profile email",
        }))
        .map_err(|err| ExecutorError::fatal(err.to_string()))?;
        let headers = vec![("Content-Type".to_string(), "application/json".to_string())];
        let client = self.http.client()?;
        let upstream = crate::client::send_unary(
            &client,
            Method::POST,
            OAUTH_TOKEN_URL,
            &headers,
            Some(payload),
        )
        .await?;
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
        if let Some(id_token) = json_path::get_str(&token, "id_token") {
            updated
                .metadata
                .insert("id_token".to_string(), Value::String(id_token.to_string()));
        }
        if let Some(expires_in) = json_path::get_i64(&token, "expires_in") {
            let expiry = OffsetDateTime::now_utc() + Duration::seconds(expires_in);
            if let Ok(formatted) = expiry.format(&Rfc3339) {
                updated
                    .metadata
                    .insert("expired".to_string(), Value::String(formatted));
            }
        }
        updated
            .metadata
            .insert("type".to_string(), Value::String(PROVIDER.to_string()));
        if let Ok(now) = OffsetDateTime::now_utc().format(&Rfc3339) {
            updated
                .metadata
                .insert("last_refresh".to_string(), Value::String(now));
        }
        Ok(updated)
    }
}
