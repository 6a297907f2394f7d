//! Gemini executor for AIStudio API-key credentials
//! (`generativelanguage.googleapis.com`).

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Map, Value};
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

const PROVIDER: &str = "gemini";
const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";

pub struct GeminiExecutor {
    http: Arc<SharedHttpClient>,
    config: Arc<Config>,
    registry: Arc<ModelRegistry>,
}

impl GeminiExecutor {
    pub fn new(http: Arc<SharedHttpClient>, config: Arc<Config>, registry: Arc<ModelRegistry>) -> Self {
        Self {
            http,
            config,
            registry,
        }
    }

    fn api_key(auth: &Auth) -> Result<String, ExecutorError> {
        auth.access_credential()
            .ok_or_else(|| ExecutorError::new(401, "credential has no API key"))
    }

    fn base_url(auth: &Auth) -> String {
        auth.attributes
            .get("base_url")
            .filter(|url| !url.trim().is_empty())
            .cloned()
            .unwrap_or_else(|| DEFAULT_BASE_URL.to_string())
    }

    fn prepare_body(
        &self,
        req: &Request,
        opts: &Options,
    ) -> Result<(Vec<u8>, String), ExecutorError> {
        let base_model = parse_suffix(&req.model).model_name;
        let from = opts.source_format.wire();
        let translated = translate_request(from, Format::Gemini, &base_model, &req.payload, true);
        let mut body: Value = serde_json::from_slice(&translated)
            .map_err(|err| ExecutorError::new(400, format!("invalid request payload: {err}")))?;

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
            translate_request(from, Format::Gemini, &base_model, &original_source, true);
        let original: Value =
            serde_json::from_slice(&original_translated).unwrap_or(Value::Object(Map::new()));
        apply_payload_config(&self.config, &base_model, PROVIDER, "", &mut body, &original);
        clean_gemini_tools(&mut body, "");

        let bytes = serde_json::to_vec(&body)
            .map_err(|err| ExecutorError::fatal(format!("payload serialization failed: {err}")))?;
        Ok((bytes, base_model))
    }

    fn headers(api_key: &str) -> Vec<(String, String)> {
        vec![
            ("x-goog-api-key".to_string(), api_key.to_string()),
            ("Content-Type".to_string(), "application/json".to_string()),
        ]
    }
}

#[async_trait]
impl ProviderExecutor for GeminiExecutor {
    fn identifier(&self) -> &'static str {
        PROVIDER
    }

    async fn execute(
        &self,
        auth: &Auth,
        req: Request,
        opts: Options,
    ) -> Result<Response, ExecutorError> {
        let api_key = Self::api_key(auth)?;
        let from = opts.source_format.wire();
        let (body, base_model) = self.prepare_body(&req, &opts)?;
        let url = format!("{}/models/{base_model}:generateContent", Self::base_url(auth));
        tracing::debug!(url = %url, auth = %auth.id, "gemini upstream request");
        let client = self.http.client()?;
        let upstream =
            send_unary(&client, Method::POST, &url, &Self::headers(&api_key), Some(body)).await?;

        let value: Value = serde_json::from_slice(&upstream.body)
            .map_err(|err| ExecutorError::fatal(format!("unparsable upstream response: {err}")))?;
        let mut metadata = Map::new();
        if let Some(usage) = parse_gemini_usage(&value) {
            usage.into_metadata(&mut metadata);
        }
        let mut state = StreamState::default();
        let payload =
            translate_non_stream(Format::Gemini, from, &req.model, &upstream.body, &mut state);
        Ok(Response { payload, metadata })
    }

    async fn execute_stream(
        &self,
        auth: &Auth,
        req: Request,
        opts: Options,
    ) -> Result<mpsc::Receiver<StreamChunk>, ExecutorError> {
        let api_key = Self::api_key(auth)?;
        let from = opts.source_format.wire();
        let (body, base_model) = self.prepare_body(&req, &opts)?;
        let url = format!(
            "{}/models/{base_model}:streamGenerateContent?alt=sse",
            Self::base_url(auth)
        );
        tracing::debug!(url = %url, auth = %auth.id, "gemini upstream stream");
        let client = self.http.client()?;
        let response = send(&client, Method::POST, &url, &Self::headers(&api_key), Some(body)).await?;
        let response = ensure_stream(response).await?;

        let model = req.model.clone();
        let mut state = StreamState::default();
        Ok(spawn_reader(response, move |line| {
            translate_stream(Format::Gemini, from, &model, line, &mut state)
        }))
    }

    async fn count_tokens(
        &self,
        auth: &Auth,
        req: Request,
        opts: Options,
    ) -> Result<Response, ExecutorError> {
        let api_key = Self::api_key(auth)?;
        let from = opts.source_format.wire();
        let (body, base_model) = self.prepare_body(&req, &opts)?;
        // countTokens only understands contents and tools.
        let mut value: Value = serde_json::from_slice(&body)
            .map_err(|err| ExecutorError::fatal(err.to_string()))?;
        for key in ["generationConfig", "safetySettings", "systemInstruction"] {
            json_path::remove(&mut value, key);
        }
        let count_body = serde_json::to_vec(&value)
            .map_err(|err| ExecutorError::fatal(err.to_string()))?;

        let url = format!("{}/models/{base_model}:countTokens", Self::base_url(auth));
        let client = self.http.client()?;
        let upstream =
            send_unary(&client, Method::POST, &url, &Self::headers(&api_key), Some(count_body))
                .await?;
        let value: Value = serde_json::from_slice(&upstream.body)
            .map_err(|err| ExecutorError::fatal(format!("unparsable count response: {err}")))?;
        let count = json_path::get_i64(&value, "totalTokens").unwrap_or(0);
        Ok(Response {
            payload: translate_token_count(from, count, &upstream.body),
            metadata: Map::new(),
        })
    }

    async fn refresh(&self, auth: &Auth) -> Result<Auth, ExecutorError> {
        // API keys do not rotate.
        Ok(auth.clone())
    }
}
