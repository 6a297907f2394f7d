//! Qwen executor: OAuth credentials against the Qwen portal's
//! OpenAI-compatible chat endpoint.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use time::format_description::well_known::Rfc3339;
use time::{Duration, OffsetDateTime};
use tokio::sync::mpsc;
use wreq::Method;

use aiproxy_auth::{Auth, ExecutorError, Options, ProviderExecutor, Request, Response, StreamChunk};
use aiproxy_common::{json as json_path, Config};
use aiproxy_registry::ModelRegistry;
use crate::client::{send_unary, SharedHttpClient};
use crate::gemini_cli::url_encode;
use crate::openai_compat::{self, bearer_headers, CompatContext};

const PROVIDER: &str = "qwen";
const DEFAULT_BASE_URL: &str = "https://portal.qwen.ai/v1";
const OAUTH_TOKEN_URL: &str = "https://chat.qwen.ai/api/v1/oauth2/token";
const OAUTH_CLIENT_ID: &str = "f0304373b74a44d2b584a3fb70ca9e56";

pub struct QwenExecutor {
    http: Arc<SharedHttpClient>,
    config: Arc<Config>,
    registry: Arc<ModelRegistry>,
}

impl QwenExecutor {
    pub fn new(http: Arc<SharedHttpClient>, config: Arc<Config>, registry: Arc<ModelRegistry>) -> Self {
        Self {
            http,
            config,
            registry,
        }
    }

    fn context<'a>(&'a self, auth: &Auth) -> Result<CompatContext<'a>, ExecutorError> {
        // Accounts pin their serving endpoint in `resource_url`.
        let base_url = auth
            .metadata_str("resource_url")
            .filter(|url| !url.trim().is_empty())
            .map(|url| {
                let url = url.trim_end_matches('/');
                if url.starts_with("http") {
                    url.to_string()
                } else {
                    format!("https://{url}/v1")
                }
            })
            .unwrap_or_else(|| DEFAULT_BASE_URL.to_string());
        Ok(CompatContext {
            provider: PROVIDER,
            http: &self.http,
            config: &self.config,
            registry: &self.registry,
            base_url,
            headers: bearer_headers(auth)?,
        })
    }
}

#[async_trait]
impl ProviderExecutor for QwenExecutor {
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
        let refresh_token = auth.metadata_str("refresh_token").unwrap_or_default().to_string();
        if refresh_token.is_empty() {
            return Ok(auth.clone());
        }
        let form = format!(
            "grant_type=refresh_token&refresh_token={}&client_id={}",
            url_encode(&refresh_token),
            url_encode(OAUTH_CLIENT_ID),
        );
        let headers = vec![(
            "Content-Type".to_string(),
            "application/x-www-form-urlencoded".to_string(),
        )];
        let client = self.http.client()?;
        let upstream = send_unary(
            &client,
            Method::POST,
            OAUTH_TOKEN_URL,
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
        if let Some(new_refresh) = json_path::get_str(&token, "refresh_token") {
            if !new_refresh.is_empty() {
                updated
                    .metadata
                    .insert("refresh_token".to_string(), Value::String(new_refresh.to_string()));
            }
        }
        if let Some(resource_url) = json_path::get_str(&token, "resource_url") {
            updated
                .metadata
                .insert("resource_url".to_string(), Value::String(resource_url.to_string()));
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
