//! Antigravity executor: Gemini and Claude models behind the Cloud Code
//! internal API, with sandbox/prod endpoint fallback.

mod models;

use std::sync::Arc;

use async_trait::async_trait;
use rand::Rng;
use serde_json::{json, Map, Value};
use sha2::{Digest, Sha256};
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
use crate::gemini_cli::google_oauth_refresh;
use crate::payload::apply_payload_config;
use crate::schema::clean_gemini_tools;
use crate::sse::{collect_stream, ensure_stream, spawn_reader};
use crate::usage::parse_gemini_usage;

const PROVIDER: &str = "antigravity";
/// Dialed in order; transport errors and 5xx fall through to the next.
const BASE_URLS: &[&str] = &[
    "https://daily-cloudcode-pa.googleapis.com/v1internal",
    "https://daily-cloudcode-pa.sandbox.googleapis.com/v1internal",
    "https://cloudcode-pa.googleapis.com/v1internal",
];
const USER_AGENT: &str = "antigravity/1.11.5 (linux; x64)";

pub struct AntigravityExecutor {
    http: Arc<SharedHttpClient>,
    config: Arc<Config>,
    registry: Arc<ModelRegistry>,
}

impl AntigravityExecutor {
    pub fn new(http: Arc<SharedHttpClient>, config: Arc<Config>, registry: Arc<ModelRegistry>) -> Self {
        Self {
            http,
            config,
            registry,
        }
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

    fn prepare_body(
        &self,
        auth: &Auth,
        req: &Request,
        opts: &Options,
    ) -> Result<(Vec<u8>, String, bool), ExecutorError> {
        let base_model = parse_suffix(&req.model).model_name;
        let from = opts.source_format.wire();
        let translated =
            translate_request(from, Format::Antigravity, &base_model, &req.payload, true);
        let mut body: Value = serde_json::from_slice(&translated)
            .map_err(|err| ExecutorError::new(400, format!("invalid request payload: {err}")))?;

        let upstream_model = models::to_upstream(&base_model).to_string();
        json_path::set(&mut body, "model", json!(upstream_model.clone()));
        json_path::set(
            &mut body,
            "project",
            json!(auth.metadata_str("project_id").unwrap_or_default()),
        );
        json_path::set(
            &mut body,
            "requestId",
            json!(uuid::Uuid::new_v4().to_string()),
        );
        let session_id = session_id(&body);
        json_path::set(&mut body, "request.sessionId", json!(session_id));

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
            translate_request(from, Format::Antigravity, &base_model, &original_source, true);
        let original: Value =
            serde_json::from_slice(&original_translated).unwrap_or(Value::Object(Map::new()));
        apply_payload_config(&self.config, &base_model, PROVIDER, "request", &mut body, &original);

        // The internal endpoint takes the full JSON-Schema dialect under a
        // dedicated key; plain `parameters` stays for anything it already
        // understands.
        rename_tool_parameters(&mut body);
        clean_gemini_tools(&mut body, "request");

        let is_claude = upstream_model.to_ascii_lowercase().contains("claude");
        let bytes = serde_json::to_vec(&body)
            .map_err(|err| ExecutorError::fatal(format!("payload serialization failed: {err}")))?;
        Ok((bytes, base_model, is_claude))
    }

    /// Dials the endpoint list in order; 5xx and transport errors fall
    /// through, everything else settles immediately.
    async fn send_with_fallback(
        &self,
        action: &str,
        query: &str,
        headers: &[(String, String)],
        body: &[u8],
        stream: bool,
    ) -> Result<FallbackOutcome, ExecutorError> {
        let client = self.http.client()?;
        let mut last_error: Option<ExecutorError> = None;
        for base in BASE_URLS {
            let url = format!("{base}:{action}{query}");
            if stream {
                match send(&client, Method::POST, &url, headers, Some(body.to_vec())).await {
                    Ok(response) => match ensure_stream(response).await {
                        Ok(response) => return Ok(FallbackOutcome::Stream(response)),
                        Err(err) if err.status >= 500 || err.status == 0 => {
                            tracing::debug!(url = %url, status = err.status, "antigravity endpoint failed, trying next");
                            last_error = Some(err);
                        }
                        Err(err) => return Err(err),
                    },
                    Err(err) => last_error = Some(err),
                }
            } else {
                match send_unary(&client, Method::POST, &url, headers, Some(body.to_vec())).await {
                    Ok(upstream) => return Ok(FallbackOutcome::Unary(upstream.body.to_vec())),
                    Err(err) if err.status >= 500 || err.status == 0 => {
                        tracing::debug!(url = %url, status = err.status, "antigravity endpoint failed, trying next");
                        last_error = Some(err);
                    }
                    Err(err) => return Err(err),
                }
            }
        }
        Err(last_error.unwrap_or_else(|| ExecutorError::transport("all antigravity endpoints failed")))
    }
}

enum FallbackOutcome {
    Unary(Vec<u8>),
    Stream(wreq::Response),
}

/// Stable session id: SHA-256 of the first user text part, or a random
/// positive value when the conversation has no text yet.
fn session_id(body: &Value) -> String {
    let text = json_path::get(body, "request.contents")
        .and_then(Value::as_array)
        .and_then(|contents| {
            contents
                .iter()
                .filter(|content| json_path::get_str(content, "role") == Some("user"))
                .flat_map(|content| {
                    content
                        .get("parts")
                        .and_then(Value::as_array)
                        .into_iter()
                        .flatten()
                })
                .find_map(|part| json_path::get_str(part, "text"))
        });
    match text {
        Some(text) if !text.is_empty() => {
            let digest = Sha256::digest(text.as_bytes());
            let hex: String = digest.iter().take(16).map(|b| format!("{b:02x}")).collect();
            format!("sid-{hex}")
        }
        _ => {
            let value: i64 = rand::rng().random_range(1..i64::MAX);
            value.to_string()
        }
    }
}

fn rename_tool_parameters(body: &mut Value) {
    let Some(Value::Array(tools)) = json_path::get_mut(body, "request.tools") else {
        return;
    };
    for tool in tools {
        let Some(Value::Array(declarations)) = json_path::get_mut(tool, "functionDeclarations")
        else {
            continue;
        };
        for declaration in declarations {
            if let Some(schema) = json_path::remove(declaration, "parameters") {
                json_path::set(declaration, "parametersJsonSchema", schema);
            }
        }
    }
}

/// Folds collected streaming chunks into one non-streaming Gemini envelope
/// for the stream-only Claude submodels.
fn aggregate_chunks(chunks: &[Vec<u8>]) -> Value {
    let mut text = String::new();
    let mut thought = String::new();
    let mut thought_signature = String::new();
    let mut function_calls: Vec<Value> = Vec::new();
    let mut finish = "STOP".to_string();
    let mut usage = Value::Null;
    let mut response_id = String::new();
    let mut model_version = String::new();

    for chunk in chunks {
        let Ok(value) = serde_json::from_slice::<Value>(strip_data_prefix(chunk)) else {
            continue;
        };
        let value = aiproxy_translate::envelope::unwrap_response(value, Format::Antigravity);
        if let Some(id) = json_path::get_str(&value, "responseId") {
            response_id = id.to_string();
        }
        if let Some(version) = json_path::get_str(&value, "modelVersion") {
            model_version = version.to_string();
        }
        if let Some(reason) = json_path::get_str(&value, "candidates.0.finishReason") {
            finish = reason.to_string();
        }
        if let Some(metadata) = json_path::get(&value, "usageMetadata") {
            usage = metadata.clone();
        }
        if let Some(Value::Array(parts)) = json_path::get(&value, "candidates.0.content.parts") {
            for part in parts {
                if json_path::get_bool(part, "thought") == Some(true) {
                    thought.push_str(json_path::get_str(part, "text").unwrap_or_default());
                    if let Some(signature) = json_path::get_str(part, "thoughtSignature") {
                        thought_signature = signature.to_string();
                    }
                } else if let Some(part_text) = json_path::get_str(part, "text") {
                    text.push_str(part_text);
                } else if part.get("functionCall").is_some() {
                    function_calls.push(part.clone());
                }
            }
        }
    }

    let mut parts: Vec<Value> = Vec::new();
    if !thought.is_empty() {
        let mut part = json!({"thought": true, "text": thought});
        if !thought_signature.is_empty() {
            json_path::set(&mut part, "thoughtSignature", json!(thought_signature));
        }
        parts.push(part);
    }
    if !text.is_empty() {
        parts.push(json!({"text": text}));
    }
    parts.extend(function_calls);

    json!({
        "candidates": [{
            "content": {"role": "model", "parts": parts},
            "finishReason": finish,
            "index": 0,
        }],
        "usageMetadata": usage,
        "modelVersion": models::to_public(&model_version),
        "responseId": response_id,
    })
}

fn strip_data_prefix(chunk: &[u8]) -> &[u8] {
    let text = std::str::from_utf8(chunk).unwrap_or_default().trim();
    match text.strip_prefix("data:") {
        Some(rest) => rest.trim().as_bytes(),
        None => text.as_bytes(),
    }
}

#[async_trait]
impl ProviderExecutor for AntigravityExecutor {
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
        let (body, _, is_claude) = self.prepare_body(auth, &req, &opts)?;
        let headers = Self::headers(auth)?;

        let response_bytes = if is_claude {
            // Claude submodels only stream; synthesize the unary envelope.
            let outcome = self
                .send_with_fallback("streamGenerateContent", "?alt=sse", &headers, &body, true)
                .await?;
            let FallbackOutcome::Stream(response) = outcome else {
                return Err(ExecutorError::fatal("expected stream outcome"));
            };
            let raw = spawn_reader(response, |line| {
                if line == b"[DONE]" {
                    Vec::new()
                } else {
                    vec![format!("{}\n", String::from_utf8_lossy(line))]
                }
            });
            let chunks = collect_stream(raw).await?;
            serde_json::to_vec(&aggregate_chunks(&chunks))
                .map_err(|err| ExecutorError::fatal(err.to_string()))?
        } else {
            let outcome = self
                .send_with_fallback("generateContent", "", &headers, &body, false)
                .await?;
            let FallbackOutcome::Unary(bytes) = outcome else {
                return Err(ExecutorError::fatal("expected unary outcome"));
            };
            bytes
        };

        let value: Value = serde_json::from_slice(&response_bytes)
            .map_err(|err| ExecutorError::fatal(format!("unparsable upstream response: {err}")))?;
        let unwrapped = aiproxy_translate::envelope::unwrap_response(value, Format::Antigravity);
        let mut metadata = Map::new();
        if let Some(usage) = parse_gemini_usage(&unwrapped) {
            usage.into_metadata(&mut metadata);
        }
        let mut state = StreamState::default();
        let payload = translate_non_stream(
            Format::Antigravity,
            from,
            &req.model,
            &response_bytes,
            &mut state,
        );
        Ok(Response { payload, metadata })
    }

    async fn execute_stream(
        &self,
        auth: &Auth,
        req: Request,
        opts: Options,
    ) -> Result<mpsc::Receiver<StreamChunk>, ExecutorError> {
        let from = opts.source_format.wire();
        let (body, _, _) = self.prepare_body(auth, &req, &opts)?;
        let headers = Self::headers(auth)?;
        let outcome = self
            .send_with_fallback("streamGenerateContent", "?alt=sse", &headers, &body, true)
            .await?;
        let FallbackOutcome::Stream(response) = outcome else {
            return Err(ExecutorError::fatal("expected stream outcome"));
        };

        let model = req.model.clone();
        let mut state = StreamState::default();
        Ok(spawn_reader(response, move |line| {
            translate_stream(Format::Antigravity, from, &model, line, &mut state)
        }))
    }

    async fn count_tokens(
        &self,
        auth: &Auth,
        req: Request,
        opts: Options,
    ) -> Result<Response, ExecutorError> {
        let from = opts.source_format.wire();
        let (body, _, _) = self.prepare_body(auth, &req, &opts)?;
        let mut value: Value = serde_json::from_slice(&body)
            .map_err(|err| ExecutorError::fatal(err.to_string()))?;
        for key in [
            "request.generationConfig",
            "request.safetySettings",
            "request.systemInstruction",
            "requestId",
        ] {
            json_path::remove(&mut value, key);
        }
        let count_body =
            serde_json::to_vec(&value).map_err(|err| ExecutorError::fatal(err.to_string()))?;
        let headers = Self::headers(auth)?;
        let outcome = self
            .send_with_fallback("countTokens", "", &headers, &count_body, false)
            .await?;
        let FallbackOutcome::Unary(bytes) = outcome else {
            return Err(ExecutorError::fatal("expected unary outcome"));
        };
        let value: Value = serde_json::from_slice(&bytes)
            .map_err(|err| ExecutorError::fatal(format!("unparsable count response: {err}")))?;
        let count = json_path::get_i64(&value, "totalTokens")
            .or_else(|| json_path::get_i64(&value, "response.totalTokens"))
            .unwrap_or(0);
        Ok(Response {
            payload: translate_token_count(from, count, &bytes),
            metadata: Map::new(),
        })
    }

    async fn refresh(&self, auth: &Auth) -> Result<Auth, ExecutorError> {
        google_oauth_refresh(&self.http, auth, PROVIDER).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn session_id_is_stable_for_same_first_user_text() {
        let body = json!({"request": {"contents": [
            {"role": "user", "parts": [{"text": "hello there"}]},
        ]}});
        let first = session_id(&body);
        let second = session_id(&body);
        assert_eq!(first, second);
        assert!(first.starts_with("sid-"));

        let other = json!({"request": {"contents": [
            {"role": "user", "parts": [{"text": "different"}]},
        ]}});
        assert_ne!(session_id(&other), first);
    }

    #[test]
    fn session_id_without_text_is_random_positive() {
        let body = json!({"request": {"contents": []}});
        let id = session_id(&body);
        assert!(id.parse::<i64>().map(|v| v > 0).unwrap_or(false));
    }

    #[test]
    fn aggregates_claude_stream_chunks_into_one_envelope() {
        let chunks: Vec<Vec<u8>> = vec![
            br#"data: {"response":{"candidates":[{"content":{"parts":[{"thought":true,"text":"hm","thoughtSignature":"s"}]},"index":0}],"responseId":"r1"}}"#.to_vec(),
            br#"data: {"response":{"candidates":[{"content":{"parts":[{"text":"hel"}]},"index":0}]}}"#.to_vec(),
            br#"data: {"response":{"candidates":[{"content":{"parts":[{"text":"lo"}]},"finishReason":"STOP","index":0}],"usageMetadata":{"promptTokenCount":2,"candidatesTokenCount":3}}}"#.to_vec(),
        ];
        let merged = aggregate_chunks(&chunks);
        assert_eq!(json_path::get_str(&merged, "candidates.0.content.parts.1.text"), Some("hello"));
        assert_eq!(json_path::get_bool(&merged, "candidates.0.content.parts.0.thought"), Some(true));
        assert_eq!(json_path::get_str(&merged, "candidates.0.finishReason"), Some("STOP"));
        assert_eq!(json_path::get_i64(&merged, "usageMetadata.candidatesTokenCount"), Some(3));
        assert_eq!(json_path::get_str(&merged, "responseId"), Some("r1"));
    }

    #[test]
    fn tool_parameters_renamed_for_internal_endpoint() {
        let mut body = json!({"request": {"tools": [{"functionDeclarations": [
            {"name": "read", "parameters": {"type": "object"}},
        ]}]}});
        rename_tool_parameters(&mut body);
        assert!(!json_path::exists(&body, "request.tools.0.functionDeclarations.0.parameters"));
        assert!(json_path::exists(
            &body,
            "request.tools.0.functionDeclarations.0.parametersJsonSchema"
        ));
    }
}
