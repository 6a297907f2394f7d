use async_trait::async_trait;
use http::HeaderMap;
use serde_json::{Map, Value};
use tokio::sync::mpsc;

use aiproxy_translate::Format;

use crate::auth::Auth;
use crate::error::ExecutorError;

/// Metadata key carrying the client's `Idempotency-Key` (or a generated UUID).
pub const IDEMPOTENCY_KEY_METADATA_KEY: &str = "idempotency_key";
/// Metadata key recording the client-requested model after an OAuth alias
/// rewrote `Request::model` to the upstream's true name.
pub const MODEL_MAPPING_ORIGINAL_MODEL_METADATA_KEY: &str = "model_mapping_original_model";

/// Translated payload headed for a provider executor.
#[derive(Debug, Clone, Default)]
pub struct Request {
    /// Model name as the caller declared it; may still carry a thinking
    /// suffix that executors strip before dialing upstream.
    pub model: String,
    pub payload: Vec<u8>,
    /// Execution hints; only the whitelisted keys are interpreted.
    pub metadata: Map<String, Value>,
}

/// Execution options shared by unary and streaming calls.
#[derive(Debug, Clone)]
pub struct Options {
    pub stream: bool,
    /// Alternate-format hint (`alt=sse` inbound switches unary to SSE).
    pub alt: String,
    /// Schema of the inbound request.
    pub source_format: Format,
    /// Inbound headers the executor may forward selectively.
    pub headers: HeaderMap,
    /// Pre-translation inbound bytes, kept for error reporting and for
    /// translators that need the original view.
    pub original_request: Vec<u8>,
    pub metadata: Map<String, Value>,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            stream: false,
            alt: String::new(),
            source_format: Format::OpenAI,
            headers: HeaderMap::new(),
            original_request: Vec::new(),
            metadata: Map::new(),
        }
    }
}

/// Provider response. `metadata` may carry parsed usage numbers
/// (`input_tokens`, `output_tokens`) for the reporter.
#[derive(Debug, Clone, Default)]
pub struct Response {
    pub payload: Vec<u8>,
    pub metadata: Map<String, Value>,
}

/// One streaming payload unit. A chunk carries payload bytes or a terminal
/// error, never both.
#[derive(Debug, Default)]
pub struct StreamChunk {
    pub payload: Vec<u8>,
    pub err: Option<ExecutorError>,
}

impl StreamChunk {
    pub fn payload(bytes: impl Into<Vec<u8>>) -> Self {
        Self {
            payload: bytes.into(),
            err: None,
        }
    }

    pub fn error(err: ExecutorError) -> Self {
        Self {
            payload: Vec::new(),
            err: Some(err),
        }
    }
}

/// One upstream provider family.
///
/// Implementations are stateless once constructed; per-request state stays
/// local to each call. `refresh` returns an updated credential snapshot that
/// the manager persists and publishes.
#[async_trait]
pub trait ProviderExecutor: Send + Sync {
    fn identifier(&self) -> &'static str;

    async fn execute(
        &self,
        auth: &Auth,
        req: Request,
        opts: Options,
    ) -> Result<Response, ExecutorError>;

    async fn execute_stream(
        &self,
        auth: &Auth,
        req: Request,
        opts: Options,
    ) -> Result<mpsc::Receiver<StreamChunk>, ExecutorError>;

    async fn count_tokens(
        &self,
        auth: &Auth,
        req: Request,
        opts: Options,
    ) -> Result<Response, ExecutorError>;

    async fn refresh(&self, auth: &Auth) -> Result<Auth, ExecutorError>;
}
