use std::sync::Arc;

use http::HeaderMap;
use serde_json::{Map, Value};
use tokio::sync::mpsc;

use aiproxy_auth::{Manager, Options, Request, IDEMPOTENCY_KEY_METADATA_KEY};
use aiproxy_common::Config;
use aiproxy_thinking::normalize_thinking_model;
use aiproxy_translate::Format;

use crate::error::ErrorMessage;

/// Statuses eligible for pre-first-byte stream retry (0 = transport error).
fn bootstrap_eligible(status: u16) -> bool {
    matches!(status, 0 | 401 | 402 | 403 | 408 | 429) || status >= 500
}

/// Bridges inbound HTTP context to the auth manager: provider resolution,
/// idempotency key, and the bootstrap retry for streams.
pub struct ProxyHandler {
    manager: Arc<Manager>,
    config: Arc<Config>,
}

impl ProxyHandler {
    pub fn new(manager: Arc<Manager>, config: Arc<Config>) -> Self {
        Self { manager, config }
    }

    pub fn manager(&self) -> &Arc<Manager> {
        &self.manager
    }

    /// Resolves the provider set and strips the thinking suffix into
    /// metadata. Unknown models are a 400.
    fn request_details(
        &self,
        model: &str,
    ) -> Result<(Vec<String>, String, Map<String, Value>), ErrorMessage> {
        let (normalized, suffix_metadata) = normalize_thinking_model(model);
        let providers = self.manager.registry().provider_names_for_model(&normalized);
        if providers.is_empty() {
            return Err(ErrorMessage::new(
                400,
                format!("unknown provider for model {model}"),
            ));
        }
        Ok((providers, normalized, suffix_metadata.unwrap_or_default()))
    }

    fn build_request(
        model: String,
        payload: &[u8],
        metadata: Map<String, Value>,
    ) -> Request {
        Request {
            model,
            payload: payload.to_vec(),
            metadata,
        }
    }

    fn build_options(
        &self,
        stream: bool,
        alt: &str,
        source_format: Format,
        headers: &HeaderMap,
        payload: &[u8],
        extra_metadata: &Map<String, Value>,
    ) -> Options {
        let mut metadata = extra_metadata.clone();
        let idempotency_key = headers
            .get("idempotency-key")
            .and_then(|value| value.to_str().ok())
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .map(str::to_string)
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
        metadata.insert(
            IDEMPOTENCY_KEY_METADATA_KEY.to_string(),
            Value::String(idempotency_key),
        );
        Options {
            stream,
            alt: alt.to_string(),
            source_format,
            headers: headers.clone(),
            original_request: payload.to_vec(),
            metadata,
        }
    }

    /// Unary execution.
    pub async fn execute(
        &self,
        source_format: Format,
        model: &str,
        payload: &[u8],
        alt: &str,
        headers: &HeaderMap,
    ) -> Result<Vec<u8>, ErrorMessage> {
        let (providers, normalized, metadata) = self.request_details(model)?;
        let req = Self::build_request(normalized, payload, metadata.clone());
        let opts = self.build_options(false, alt, source_format, headers, payload, &metadata);
        self.manager
            .execute(&providers, req, opts)
            .await
            .map(|response| response.payload)
            .map_err(ErrorMessage::from)
    }

    /// Upstream token counting.
    pub async fn execute_count(
        &self,
        source_format: Format,
        model: &str,
        payload: &[u8],
        alt: &str,
        headers: &HeaderMap,
    ) -> Result<Vec<u8>, ErrorMessage> {
        let (providers, normalized, metadata) = self.request_details(model)?;
        let req = Self::build_request(normalized, payload, metadata.clone());
        let opts = self.build_options(false, alt, source_format, headers, payload, &metadata);
        self.manager
            .execute_count(&providers, req, opts)
            .await
            .map(|response| response.payload)
            .map_err(ErrorMessage::from)
    }

    /// Streaming execution with pre-first-byte retry.
    ///
    /// The returned channel yields payload byte blocks; a terminal error is
    /// delivered as `Err` and closes the stream. An upstream error observed
    /// before any payload has been forwarded re-invokes the manager up to
    /// `bootstrap_retries` times; after the first forwarded byte errors are
    /// surfaced as-is.
    pub async fn execute_stream(
        &self,
        source_format: Format,
        model: &str,
        payload: &[u8],
        alt: &str,
        headers: &HeaderMap,
    ) -> mpsc::Receiver<Result<Vec<u8>, ErrorMessage>> {
        let (tx, rx) = mpsc::channel(64);
        let details = match self.request_details(model) {
            Ok(details) => details,
            Err(err) => {
                let _ = tx.send(Err(err)).await;
                return rx;
            }
        };
        let (providers, normalized, metadata) = details;
        let req = Self::build_request(normalized, payload, metadata.clone());
        let opts = self.build_options(true, alt, source_format, headers, payload, &metadata);
        let manager = self.manager.clone();
        let max_bootstrap_retries = self.config.streaming.bootstrap_retries;

        tokio::spawn(async move {
            let mut sent_payload = false;
            let mut bootstrap_retries = 0usize;

            let mut chunks = match manager.execute_stream(&providers, req.clone(), opts.clone()).await
            {
                Ok(chunks) => chunks,
                Err(err) => {
                    let _ = tx.send(Err(ErrorMessage::from(err))).await;
                    return;
                }
            };

            loop {
                let Some(chunk) = chunks.recv().await else {
                    return;
                };
                if let Some(err) = chunk.err {
                    // Bootstrap window: nothing forwarded yet, eligible
                    // status, retries left.
                    if !sent_payload
                        && bootstrap_retries < max_bootstrap_retries
                        && bootstrap_eligible(err.status)
                    {
                        bootstrap_retries += 1;
                        tracing::debug!(status = err.status, attempt = bootstrap_retries,
                            "bootstrap retry for stream");
                        match manager.execute_stream(&providers, req.clone(), opts.clone()).await {
                            Ok(retried) => {
                                chunks = retried;
                                continue;
                            }
                            Err(retry_err) => {
                                let _ = tx.send(Err(ErrorMessage::from(retry_err))).await;
                                return;
                            }
                        }
                    }
                    let _ = tx.send(Err(ErrorMessage::from(err))).await;
                    return;
                }
                if chunk.payload.is_empty() {
                    continue;
                }
                sent_payload = true;
                if tx.send(Ok(chunk.payload)).await.is_err() {
                    return;
                }
            }
        });
        rx
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use aiproxy_auth::{
        Auth, ExecutorError, FillFirstSelector, ManagerBuilder, ProviderExecutor, Response,
        StreamChunk,
    };
    use aiproxy_common::StreamingConfig;
    use aiproxy_registry::ModelRegistry;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Stream executor that fails its first invocation with an in-channel
    /// 401 and streams "ok" on the second.
    struct FlakyStreamExecutor {
        invocations: AtomicUsize,
    }

    #[async_trait]
    impl ProviderExecutor for FlakyStreamExecutor {
        fn identifier(&self) -> &'static str {
            "claude"
        }

        async fn execute(
            &self,
            _auth: &Auth,
            _req: Request,
            _opts: Options,
        ) -> Result<Response, ExecutorError> {
            Ok(Response::default())
        }

        async fn execute_stream(
            &self,
            _auth: &Auth,
            _req: Request,
            _opts: Options,
        ) -> Result<mpsc::Receiver<StreamChunk>, ExecutorError> {
            let attempt = self.invocations.fetch_add(1, Ordering::SeqCst);
            let (tx, rx) = mpsc::channel(4);
            if attempt == 0 {
                tx.try_send(StreamChunk::error(ExecutorError::new(401, "expired")))
                    .ok();
            } else {
                tx.try_send(StreamChunk::payload(b"ok".to_vec())).ok();
            }
            Ok(rx)
        }

        async fn count_tokens(
            &self,
            _auth: &Auth,
            _req: Request,
            _opts: Options,
        ) -> Result<Response, ExecutorError> {
            Ok(Response::default())
        }

        async fn refresh(&self, auth: &Auth) -> Result<Auth, ExecutorError> {
            Ok(auth.clone())
        }
    }

    fn handler_with_retries(retries: usize) -> (ProxyHandler, Arc<FlakyStreamExecutor>) {
        let registry = Arc::new(ModelRegistry::new());
        let manager = Arc::new(
            ManagerBuilder::new(Box::new(FillFirstSelector), registry).build(),
        );
        let executor = Arc::new(FlakyStreamExecutor {
            invocations: AtomicUsize::new(0),
        });
        manager.register_executor(executor.clone());
        manager.register(Auth::new("a", "claude"));
        let config = Arc::new(Config {
            streaming: StreamingConfig {
                bootstrap_retries: retries,
                keep_alive_seconds: 0,
            },
            ..Config::default()
        });
        (ProxyHandler::new(manager, config), executor)
    }

    #[tokio::test]
    async fn pre_first_byte_error_triggers_bootstrap_retry() {
        let (handler, executor) = handler_with_retries(1);
        let mut rx = handler
            .execute_stream(
                Format::Claude,
                "claude-sonnet-4-5",
                b"{}",
                "",
                &HeaderMap::new(),
            )
            .await;

        let mut payloads = Vec::new();
        while let Some(item) = rx.recv().await {
            match item {
                Ok(payload) => payloads.push(payload),
                Err(err) => panic!("unexpected stream error: {}", err.message),
            }
        }
        // Client observes exactly "ok"; the executor ran twice.
        assert_eq!(payloads, vec![b"ok".to_vec()]);
        assert_eq!(executor.invocations.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn bootstrap_retries_exhausted_surfaces_error() {
        let (handler, executor) = handler_with_retries(0);
        let mut rx = handler
            .execute_stream(
                Format::Claude,
                "claude-sonnet-4-5",
                b"{}",
                "",
                &HeaderMap::new(),
            )
            .await;
        let first = rx.recv().await.expect("one item");
        let err = first.expect_err("must be an error");
        assert_eq!(err.status, 401);
        assert_eq!(executor.invocations.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn unknown_model_is_a_400() {
        let (handler, _) = handler_with_retries(0);
        let err = handler
            .execute(Format::OpenAI, "made-up-model", b"{}", "", &HeaderMap::new())
            .await
            .expect_err("unknown model");
        assert_eq!(err.status, 400);
    }
}
