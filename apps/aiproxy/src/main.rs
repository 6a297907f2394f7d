use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tracing_subscriber::EnvFilter;

use aiproxy_auth::{
    spawn_refresh_worker, FileTokenStore, FillFirstSelector, ManagerBuilder, RoundRobinSelector,
    Selector,
};
use aiproxy_common::Config;
use aiproxy_core::{proxy_router, ProxyHandler};
use aiproxy_registry::{builtin_models, ModelInfo, ModelRegistry};

mod cli;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let args = cli::Cli::parse();
    let mut config =
        Config::load(Path::new(&args.config)).context("failed to parse configuration")?;
    if let Some(host) = args.host {
        config.host = host;
    }
    if let Some(port) = args.port {
        config.port = port;
    }
    if let Some(auth_dir) = args.auth_dir {
        config.auth_dir = auth_dir;
    }
    let config = Arc::new(config);

    let selector: Box<dyn Selector> = match args.selector.as_str() {
        "round-robin" => Box::new(RoundRobinSelector::default()),
        _ => Box::new(FillFirstSelector),
    };
    let registry = Arc::new(ModelRegistry::new());
    let store = Arc::new(FileTokenStore::new(expand_home(&config.auth_dir)));
    let manager = Arc::new(
        ManagerBuilder::new(selector, registry.clone())
            .with_store(store.clone())
            .with_max_attempts(config.max_retry_attempts)
            .build(),
    );

    let executors = aiproxy_providers::register_all(&manager, config.clone(), registry.clone());
    manager.set_oauth_model_mappings(&config.oauth_model_alias);

    // Load every persisted credential and register it together with any
    // user-defined models declared for its provider.
    let auths = aiproxy_auth::TokenStore::load_all(store.as_ref())
        .context("failed to read credential directory")?;
    tracing::info!(count = auths.len(), dir = %config.auth_dir, "loaded credentials");
    for auth in auths {
        let mut models = builtin_models(&auth.provider);
        models.extend(user_models(&config, &auth.provider));
        let id = auth.id.clone();
        let provider = auth.provider.clone();
        manager.register(auth);
        registry.register_client(&id, &provider, models);
    }

    // Claude API keys declared in config register directly, without a token
    // file on disk.
    for (index, entry) in config.claude_keys.iter().enumerate() {
        let mut auth = aiproxy_auth::Auth::new(format!("claude-key-{index}"), "claude");
        auth.attributes
            .insert("api_key".to_string(), entry.api_key.clone());
        if let Some(base_url) = &entry.base_url {
            auth.attributes.insert("base_url".to_string(), base_url.clone());
        }
        let id = auth.id.clone();
        let mut models = builtin_models("claude");
        models.extend(user_models(&config, "claude"));
        manager.register(auth);
        registry.register_client(&id, "claude", models);
    }

    let _refresh_worker = spawn_refresh_worker(manager.clone(), executors);

    let handler = Arc::new(ProxyHandler::new(manager, config.clone()));
    let app = proxy_router(handler);

    let bind = format!("{}:{}", config.host, config.port);
    let listener = tokio::net::TcpListener::bind(&bind)
        .await
        .with_context(|| format!("failed to bind {bind}"))?;
    tracing::info!(addr = %bind, "listening");
    axum::serve(listener, app).await?;
    Ok(())
}

fn user_models(config: &Config, provider: &str) -> Vec<ModelInfo> {
    config
        .models
        .iter()
        .filter(|entry| entry.provider.eq_ignore_ascii_case(provider))
        .map(|entry| {
            let mut info = ModelInfo::new(entry.name.clone(), provider);
            info.display_name = entry.display_name.clone();
            info.max_completion_tokens = entry.max_completion_tokens.unwrap_or(0);
            info.user_defined = true;
            info
        })
        .collect()
}

fn expand_home(path: &str) -> String {
    if let Some(rest) = path.strip_prefix("~/") {
        if let Ok(home) = std::env::var("HOME") {
            return format!("{home}/{rest}");
        }
    }
    path.to_string()
}
