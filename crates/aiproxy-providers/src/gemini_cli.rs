//! Gemini CLI executor: OAuth credentials against the Cloud Code internal
//! API, speaking the `{"model":…,"project":…,"request":{…}}` envelope.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Map, Value};
use time::format_description::well_known::Rfc3339;
use time::{Duration, OffsetDateTime};
use tokio::sync::mpsc;
use wreq::Method;

use aiproxy_auth::{Auth, ExecutorError, Options, ProviderExecutor, Request, Response, StreamChunk};
use aiproxy_common::{json as json_path, Config};
use aiproxy_registry::ModelRegistry;
use aiproxy_thinking::{apply_thinking, model_with_metadata_suffix, parse_suffix};
use aiproxy_translate::{
    translate_non_stream, translate_request, translate_stream, translate_token_count, Format,
    StreamState,
};

use crate::client::{send, send_unary, SharedHttpClient};
use crate::payload::apply_payload_config;
use crate::schema::clean_gemini_tools;
use crate::sse::{ensure_stream, spawn_reader};
use crate::usage::parse_gemini_usage;

const PROVIDER: &str = "gemini-cli";
const BASE_URL: &str = "https://cloudcode-pa.googleapis.com/v1internal";
const USER_AGENT: &str = "GeminiCLI/0.8.1 (linux; x64)";
const GOOGLE_TOKEN_URL: &str = "https://oauth2.googleapis.com/token";

pub struct GeminiCliExecutor {
    http: Arc<SharedHttpClient>,
    config: Arc<Config>,
    registry: Arc<ModelRegistry>,
}

impl GeminiCliExecutor {
    pub fn new(http: Arc<SharedHttpClient>, config: Arc<Config>, registry: Arc<ModelRegistry>) -> Self {
        Self {
            http,
            config,
            registry,
        }
    }

    fn prepare_body(
        &self,
        auth: &Auth,
        req: &Request,
        opts: &Options,
    ) -> Result<(Vec<u8>, String), ExecutorError> {
        let base_model = parse_suffix(&req.model).model_name;
        let from = opts.source_format.wire();
        let translated =
            translate_request(from, Format::GeminiCli, &base_model, &req.payload, true);
        let mut body: Value = serde_json::from_slice(&translated)
            .map_err(|err| ExecutorError::new(400, format!("invalid request payload: {err}")))?;
        json_path::set(&mut body, "model", json!(base_model.clone()));
        json_path::set(
            &mut body,
            "project",
            json!(auth.metadata_str("project_id").unwrap_or_default()),
        );

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
            translate_request(from, Format::GeminiCli, &base_model, &original_source, true);
        let original: Value =
            serde_json::from_slice(&original_translated).unwrap_or(Value::Object(Map::new()));
        apply_payload_config(&self.config, &base_model, PROVIDER, "request", &mut body, &original);
        clean_gemini_tools(&mut body, "request");

        let bytes = serde_json::to_vec(&body)
            .map_err(|err| ExecutorError::fatal(format!("payload serialization failed: {err}")))?;
        Ok((bytes, base_model))
    }

    fn headers(auth: &Auth) -> Result<Vec<(String, String)>, ExecutorError> {
        let token = auth
            .access_credential()
            .ok_or_else(|| ExecutorError::new(401, "credential has no access token"))?;
        Ok(vec![
            ("Authorization".to_string(), format!("Bearer {token}")),
            ("Content-Type".to_string(), "application/json".to_string()),
            ("User-Agent".to_string(), USER_AGENT.to_string()),
        ])
    }
}

#[async_trait]
impl ProviderExecutor for GeminiCliExecutor {
    fn identifier(&self) -> &'static str {
        PROVIDER
    }

    async fn execute(
        &self,
        auth: &Auth,
        req: Request,
        opts: Options,
    ) -> Result<Response, ExecutorError> {
        let from = opts.source_format.wire();
        let (body, _) = self.prepare_body(auth, &req, &opts)?;
        let url = format!("{BASE_URL}:generateContent");
        tracing::debug!(url = %url, auth = %auth.id, "gemini-cli upstream request");
        let client = self.http.client()?;
        let upstream =
            send_unary(&client, Method::POST, &url, &Self::headers(auth)?, Some(body)).await?;

        let value: Value = serde_json::from_slice(&upstream.body)
            .map_err(|err| ExecutorError::fatal(format!("unparsable upstream response: {err}")))?;
        let unwrapped = aiproxy_translate::envelope::unwrap_response(value, Format::GeminiCli);
        let mut metadata = Map::new();
        if let Some(usage) = parse_gemini_usage(&unwrapped) {
            usage.into_metadata(&mut metadata);
        }
        let mut state = StreamState::default();
        let payload =
            translate_non_stream(Format::GeminiCli, from, &req.model, &upstream.body, &mut state);
        Ok(Response { payload, metadata })
    }

    async fn execute_stream(
        &self,
        auth: &Auth,
        req: Request,
        opts: Options,
    ) -> Result<mpsc::Receiver<StreamChunk>, ExecutorError> {
        let from = opts.source_format.wire();
        let (body, _) = self.prepare_body(auth, &req, &opts)?;
        let url = format!("{BASE_URL}:streamGenerateContent?alt=sse");
        tracing::debug!(url = %url, auth = %auth.id, "gemini-cli upstream stream");
        let client = self.http.client()?;
        let response = send(&client, Method::POST, &url, &Self::headers(auth)?, Some(body)).await?;
        let response = ensure_stream(response).await?;

        let model = req.model.clone();
        let mut state = StreamState::default();
        Ok(spawn_reader(response, move |line| {
            translate_stream(Format::GeminiCli, from, &model, line, &mut state)
        }))
    }

    async fn count_tokens(
        &self,
        auth: &Auth,
        req: Request,
        opts: Options,
    ) -> Result<Response, ExecutorError> {
        let from = opts.source_format.wire();
        let (body, _) = self.prepare_body(auth, &req, &opts)?;
        let mut value: Value = serde_json::from_slice(&body)
            .map_err(|err| ExecutorError::fatal(err.to_string()))?;
        for key in [
            "request.generationConfig",
            "request.safetySettings",
            "request.systemInstruction",
            "project",
        ] {
            json_path::remove(&mut value, key);
        }
        let count_body =
            serde_json::to_vec(&value).map_err(|err| ExecutorError::fatal(err.to_string()))?;

        let url = format!("{BASE_URL}:countTokens");
        let client = self.http.client()?;
        let upstream =
            send_unary(&client, Method::POST, &url, &Self::headers(auth)?, Some(count_body))
                .await?;
        let value: Value = serde_json::from_slice(&upstream.body)
            .map_err(|err| ExecutorError::fatal(format!("unparsable count response: {err}")))?;
        let count = json_path::get_i64(&value, "totalTokens")
            .or_else(|| json_path::get_i64(&value, "response.totalTokens"))
            .unwrap_or(0);
        Ok(Response {
            payload: translate_token_count(from, count, &upstream.body),
            metadata: Map::new(),
        })
    }

    async fn refresh(&self, auth: &Auth) -> Result<Auth, ExecutorError> {
        google_oauth_refresh(&self.http, auth, PROVIDER).await
    }
}

/// Google OAuth refresh shared by the Cloud Code family of executors.
pub(crate) async fn google_oauth_refresh(
    http: &SharedHttpClient,
    auth: &Auth,
    provider: &str,
) -> Result<Auth, ExecutorError> {
    let refresh_token = auth.metadata_str("refresh_token").unwrap_or_default().to_string();
    if refresh_token.is_empty() {
        return Ok(auth.clone());
    }
    let client_id = auth.metadata_str("client_id").unwrap_or_default();
    let client_secret = auth.metadata_str("client_secret").unwrap_or_default();
    let form = format!(
        "grant_type=refresh_token&refresh_token={}&client_id={}&client_secret={}",
        url_encode(&refresh_token),
        url_encode(client_id),
        url_encode(client_secret),
    );
    let headers = vec![(
        "Content-Type".to_string(),
        "application/x-www-form-urlencoded".to_string(),
    )];
    let client = http.client()?;
    let upstream = send_unary(
        &client,
        Method::POST,
        GOOGLE_TOKEN_URL,
        &headers,
        Some(form.into_bytes()),
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
        .insert("type".to_string(), Value::String(provider.to_string()));
    if let Ok(now) = OffsetDateTime::now_utc().format(&Rfc3339) {
        updated
            .metadata
            .insert("last_refresh".to_string(), Value::String(now));
    }
    Ok(updated)
}

pub(crate) fn url_encode(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for byte in value.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                out.push(byte as char)
            }
            other => out.push_str(&format!("%{other:02X}")),
        }
    }
    out
}
