//! iFlow executor: OAuth-provisioned API keys against the iFlow
//! OpenAI-compatible chat endpoint (GLM, MiniMax, Qwen-max families).

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc;

use aiproxy_auth::{Auth, ExecutorError, Options, ProviderExecutor, Request, Response, StreamChunk};
use aiproxy_common::Config;
use aiproxy_registry::ModelRegistry;

use crate::client::SharedHttpClient;
use crate::openai_compat::{self, CompatContext};

const PROVIDER: &str = "iflow";
const DEFAULT_BASE_URL: &str = "https://apis.iflow.cn/v1";

pub struct IFlowExecutor {
    http: Arc<SharedHttpClient>,
    config: Arc<Config>,
    registry: Arc<ModelRegistry>,
}

impl IFlowExecutor {
    pub fn new(http: Arc<SharedHttpClient>, config: Arc<Config>, registry: Arc<ModelRegistry>) -> Self {
        Self {
            http,
            config,
            registry,
        }
    }

    fn context<'a>(&'a self, auth: &Auth) -> Result<CompatContext<'a>, ExecutorError> {
        // iFlow hands out a long-lived API key next to the OAuth tokens;
        // requests authenticate with the key, not the access token.
        let key = auth
            .metadata_str("apikey")
            .or_else(|| auth.metadata_str("api_key"))
            .map(str::to_string)
            .or_else(|| auth.access_credential())
            .ok_or_else(|| ExecutorError::new(401, "credential has no usable token"))?;
        Ok(CompatContext {
            provider: PROVIDER,
            http: &self.http,
            config: &self.config,
            registry: &self.registry,
            base_url: DEFAULT_BASE_URL.to_string(),
            headers: vec![
                ("Authorization".to_string(), format!("Bearer {key}")),
                ("Content-Type".to_string(), "application/json".to_string()),
            ],
        })
    }
}

#[async_trait]
impl ProviderExecutor for IFlowExecutor {
    fn identifier(&self) -> &'static str {
        PROVIDER
    }

    async fn execute(
        &self,
        auth: &Auth,
        req: Request,
        opts: Options,
    ) -> Result<Response, ExecutorError> {
        openai_compat::execute(&self.context(auth)?, &req, &opts).await
    }

    async fn execute_stream(
        &self,
        auth: &Auth,
        req: Request,
        opts: Options,
    ) -> Result<mpsc::Receiver<StreamChunk>, ExecutorError> {
        openai_compat::execute_stream(&self.context(auth)?, &req, &opts).await
    }

    async fn count_tokens(
        &self,
        _auth: &Auth,
        req: Request,
        opts: Options,
    ) -> Result<Response, ExecutorError> {
        Ok(openai_compat::estimate_count(&req, &opts))
    }

    async fn refresh(&self, auth: &Auth) -> Result<Auth, ExecutorError> {
        // The API key is long-lived; OAuth token rotation is handled by the
        // login flow, not the runtime.
        Ok(auth.clone())
    }
}
