//! Provider executors: one per upstream family. Each builds the upstream
//! HTTP request, performs the unary or streaming call, parses errors into
//! status-carrying failures, and reports usage.

mod antigravity;
mod claude;
mod client;
mod codex;
mod gemini;
mod gemini_cli;
mod iflow;
mod openai_compat;
mod payload;
mod qwen;
mod schema;
mod sse;
mod usage;
mod vertex;

pub use antigravity::AntigravityExecutor;
pub use claude::ClaudeExecutor;
pub use client::SharedHttpClient;
pub use codex::CodexExecutor;
pub use gemini::GeminiExecutor;
pub use gemini_cli::GeminiCliExecutor;
pub use iflow::IFlowExecutor;
pub use payload::apply_payload_config;
pub use qwen::QwenExecutor;
pub use schema::clean_tool_schema;
pub use vertex::VertexExecutor;

use std::collections::HashMap;
use std::sync::Arc;

use aiproxy_auth::{Manager, ProviderExecutor};
use aiproxy_common::Config;
use aiproxy_registry::ModelRegistry;

/// Builds every executor against a shared HTTP client and registers them
/// with the manager. Returns the map the refresh worker scans.
pub fn register_all(
    manager: &Manager,
    config: Arc<Config>,
    registry: Arc<ModelRegistry>,
) -> HashMap<String, Arc<dyn ProviderExecutor>> {
    let http = Arc::new(SharedHttpClient::new(config.proxy.clone()));
    let executors: Vec<Arc<dyn ProviderExecutor>> = vec![
        Arc::new(ClaudeExecutor::new(http.clone(), config.clone(), registry.clone())),
        Arc::new(GeminiExecutor::new(http.clone(), config.clone(), registry.clone())),
        Arc::new(GeminiCliExecutor::new(http.clone(), config.clone(), registry.clone())),
        Arc::new(VertexExecutor::new(http.clone(), config.clone(), registry.clone())),
        Arc::new(AntigravityExecutor::new(http.clone(), config.clone(), registry.clone())),
        Arc::new(CodexExecutor::new(http.clone(), config.clone(), registry.clone())),
        Arc::new(QwenExecutor::new(http.clone(), config.clone(), registry.clone())),
        Arc::new(IFlowExecutor::new(http.clone(), config.clone(), registry.clone())),
    ];
    let mut map = HashMap::new();
    for executor in executors {
        manager.register_executor(executor.clone());
        map.insert(executor.identifier().to_string(), executor);
    }
    map
}
