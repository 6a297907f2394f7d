use std::collections::{HashMap, HashSet};
use std::sync::{Arc, RwLock};

use arc_swap::ArcSwap;
use serde_json::Value;
use time::{Duration, OffsetDateTime};
use tokio::sync::mpsc;

use aiproxy_common::ModelAliasEntry;
use aiproxy_registry::{builtin_models, ModelRegistry};

use crate::auth::{Auth, ModelState, QuotaState};
use crate::error::{ErrorKind, ExecutorError};
use crate::executor::{
    Options, ProviderExecutor, Request, Response, StreamChunk,
    MODEL_MAPPING_ORIGINAL_MODEL_METADATA_KEY,
};
use crate::mappings::ModelMappingTable;
use crate::selector::Selector;
use crate::store::TokenStore;

const AUTH_COOLDOWN_BASE: Duration = Duration::minutes(5);
const AUTH_COOLDOWN_CAP: Duration = Duration::hours(1);
const QUOTA_DEFAULT_RESET: Duration = Duration::minutes(5);
const TRANSIENT_COOLDOWN: Duration = Duration::seconds(10);

/// Usage numbers published after each successful upstream call.
#[derive(Debug, Clone, Default)]
pub struct UsageRecord {
    pub provider: String,
    pub model: String,
    pub auth_id: String,
    pub input_tokens: i64,
    pub output_tokens: i64,
}

pub trait UsageReporter: Send + Sync {
    fn publish(&self, record: UsageRecord);
}

/// Default reporter: structured log lines.
struct TracingReporter;

impl UsageReporter for TracingReporter {
    fn publish(&self, record: UsageRecord) {
        tracing::info!(
            provider = %record.provider,
            model = %record.model,
            auth = %record.auth_id,
            input_tokens = record.input_tokens,
            output_tokens = record.output_tokens,
            "usage"
        );
    }
}

#[derive(Clone, Copy)]
enum CallKind {
    Unary,
    Count,
}

/// Owns the authoritative credential set and drives provider executors with
/// selection, alias rewriting, and bounded retry/failover.
pub struct Manager {
    auths: RwLock<HashMap<String, Auth>>,
    executors: RwLock<HashMap<String, Arc<dyn ProviderExecutor>>>,
    selector: Box<dyn Selector>,
    registry: Arc<ModelRegistry>,
    store: Option<Arc<dyn TokenStore>>,
    mappings: ArcSwap<ModelMappingTable>,
    reporter: Arc<dyn UsageReporter>,
    /// 0 means "as many attempts as there are candidates".
    max_attempts: usize,
}

pub struct ManagerBuilder {
    selector: Box<dyn Selector>,
    registry: Arc<ModelRegistry>,
    store: Option<Arc<dyn TokenStore>>,
    reporter: Option<Arc<dyn UsageReporter>>,
    max_attempts: usize,
}

impl ManagerBuilder {
    pub fn new(selector: Box<dyn Selector>, registry: Arc<ModelRegistry>) -> Self {
        Self {
            selector,
            registry,
            store: None,
            reporter: None,
            max_attempts: 0,
        }
    }

    pub fn with_store(mut self, store: Arc<dyn TokenStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn with_reporter(mut self, reporter: Arc<dyn UsageReporter>) -> Self {
        self.reporter = Some(reporter);
        self
    }

    pub fn with_max_attempts(mut self, max_attempts: usize) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    pub fn build(self) -> Manager {
        Manager {
            auths: RwLock::new(HashMap::new()),
            executors: RwLock::new(HashMap::new()),
            selector: self.selector,
            registry: self.registry,
            store: self.store,
            mappings: ArcSwap::from_pointee(ModelMappingTable::default()),
            reporter: self.reporter.unwrap_or_else(|| Arc::new(TracingReporter)),
            max_attempts: self.max_attempts,
        }
    }
}

impl Manager {
    /// Adds (or replaces) a credential, registers its models, and writes the
    /// record through to the token store.
    pub fn register(&self, mut auth: Auth) {
        let now = OffsetDateTime::now_utc();
        if auth.created_at.is_none() {
            auth.created_at = Some(now);
        }
        auth.updated_at = Some(now);
        self.registry
            .register_client(&auth.id, &auth.provider, builtin_models(&auth.provider));
        if let Some(store) = &self.store {
            if let Err(err) = store.save(&auth) {
                tracing::warn!(auth = %auth.id, error = %err, "token store write failed");
            }
        }
        self.auths
            .write()
            .expect("auth map lock poisoned")
            .insert(auth.id.clone(), auth);
    }

    pub fn unregister(&self, id: &str) {
        let removed = self
            .auths
            .write()
            .expect("auth map lock poisoned")
            .remove(id);
        self.registry.unregister_client(id);
        if let (Some(store), Some(auth)) = (&self.store, removed) {
            if let Err(err) = store.delete(&auth) {
                tracing::warn!(auth = %auth.id, error = %err, "token store delete failed");
            }
        }
    }

    pub fn register_executor(&self, executor: Arc<dyn ProviderExecutor>) {
        self.executors
            .write()
            .expect("executor map lock poisoned")
            .insert(executor.identifier().to_string(), executor);
    }

    pub fn set_oauth_model_mappings(&self, mappings: &HashMap<String, Vec<ModelAliasEntry>>) {
        self.mappings
            .store(Arc::new(ModelMappingTable::compile(mappings)));
        // Aliases are also resolvable for inbound provider lookup; they still
        // never change which provider serves a known canonical name.
        self.registry.set_model_aliases(mappings);
    }

    pub fn registry(&self) -> &Arc<ModelRegistry> {
        &self.registry
    }

    /// Snapshot of every credential; used by the refresh worker and admin
    /// surfaces.
    pub fn list_auths(&self) -> Vec<Auth> {
        let mut auths: Vec<Auth> = self
            .auths
            .read()
            .expect("auth map lock poisoned")
            .values()
            .cloned()
            .collect();
        auths.sort_by(|a, b| a.id.cmp(&b.id));
        auths
    }

    pub fn get_auth(&self, id: &str) -> Option<Auth> {
        self.auths
            .read()
            .expect("auth map lock poisoned")
            .get(id)
            .cloned()
    }

    /// Publishes an updated credential snapshot (refresh write-back).
    pub fn update_auth(&self, auth: Auth) {
        if let Some(store) = &self.store {
            if let Err(err) = store.save(&auth) {
                tracing::warn!(auth = %auth.id, error = %err, "token store write failed");
            }
        }
        self.auths
            .write()
            .expect("auth map lock poisoned")
            .insert(auth.id.clone(), auth);
    }

    /// Unary execution with bounded failover across credentials.
    pub async fn execute(
        &self,
        providers: &[String],
        req: Request,
        opts: Options,
    ) -> Result<Response, ExecutorError> {
        self.run_with_failover(providers, req, opts, CallKind::Unary)
            .await
    }

    /// Upstream token-count path; same selection and failover as `execute`.
    pub async fn execute_count(
        &self,
        providers: &[String],
        req: Request,
        opts: Options,
    ) -> Result<Response, ExecutorError> {
        self.run_with_failover(providers, req, opts, CallKind::Count)
            .await
    }

    /// Streaming execution. Failover applies until an upstream stream is
    /// established; later errors arrive on the channel and are the handler's
    /// bootstrap-retry problem.
    pub async fn execute_stream(
        &self,
        providers: &[String],
        req: Request,
        opts: Options,
    ) -> Result<mpsc::Receiver<StreamChunk>, ExecutorError> {
        let mut excluded: HashSet<String> = HashSet::new();
        let mut attempts_left = self.attempt_budget(providers, &req.model);
        let mut last_error: Option<ExecutorError> = None;

        while attempts_left > 0 {
            attempts_left -= 1;
            let Some((auth, executor)) = self.pick(providers, &req.model, &opts, &excluded) else {
                break;
            };
            let attempt_req = self.mapped_request(&auth, &req);
            match executor.execute_stream(&auth, attempt_req, opts.clone()).await {
                Ok(receiver) => {
                    self.note_success(&auth.id, &req.model, None);
                    return Ok(receiver);
                }
                Err(err) => {
                    let kind = self.note_failure(&auth.id, &req.model, &err);
                    if !kind.retryable() {
                        return Err(err);
                    }
                    excluded.insert(auth.id.clone());
                    last_error = Some(err);
                }
            }
        }
        Err(last_error.unwrap_or_else(|| self.no_candidates_error(providers)))
    }

    async fn run_with_failover(
        &self,
        providers: &[String],
        req: Request,
        opts: Options,
        kind: CallKind,
    ) -> Result<Response, ExecutorError> {
        let mut excluded: HashSet<String> = HashSet::new();
        let mut attempts_left = self.attempt_budget(providers, &req.model);
        let mut last_error: Option<ExecutorError> = None;

        while attempts_left > 0 {
            attempts_left -= 1;
            let Some((auth, executor)) = self.pick(providers, &req.model, &opts, &excluded) else {
                break;
            };
            let attempt_req = self.mapped_request(&auth, &req);
            let result = match kind {
                CallKind::Unary => executor.execute(&auth, attempt_req, opts.clone()).await,
                CallKind::Count => executor.count_tokens(&auth, attempt_req, opts.clone()).await,
            };
            match result {
                Ok(response) => {
                    self.note_success(&auth.id, &req.model, Some(&response));
                    return Ok(response);
                }
                Err(err) => {
                    let error_kind = self.note_failure(&auth.id, &req.model, &err);
                    if !error_kind.retryable() {
                        return Err(err);
                    }
                    excluded.insert(auth.id.clone());
                    last_error = Some(err);
                }
            }
        }
        Err(last_error.unwrap_or_else(|| self.no_candidates_error(providers)))
    }

    /// Attempts are bounded by `min(#candidates, max_attempts)`.
    fn attempt_budget(&self, providers: &[String], model: &str) -> usize {
        let candidates = self.candidates(providers, model, &HashSet::new()).len();
        if self.max_attempts == 0 {
            candidates
        } else {
            candidates.min(self.max_attempts)
        }
    }

    fn pick(
        &self,
        providers: &[String],
        model: &str,
        opts: &Options,
        excluded: &HashSet<String>,
    ) -> Option<(Auth, Arc<dyn ProviderExecutor>)> {
        for provider in providers {
            let candidates = self.candidates(std::slice::from_ref(provider), model, excluded);
            if candidates.is_empty() {
                continue;
            }
            let Some(picked) = self.selector.pick(provider, model, opts, &candidates) else {
                continue;
            };
            let executor = self
                .executors
                .read()
                .expect("executor map lock poisoned")
                .get(&picked.provider)
                .cloned();
            match executor {
                Some(executor) => return Some((picked.clone(), executor)),
                None => {
                    tracing::warn!(provider = %picked.provider, "no executor bound for provider");
                }
            }
        }
        None
    }

    fn candidates(
        &self,
        providers: &[String],
        model: &str,
        excluded: &HashSet<String>,
    ) -> Vec<Auth> {
        let now = OffsetDateTime::now_utc();
        let auths = self.auths.read().expect("auth map lock poisoned");
        let mut out: Vec<Auth> = auths
            .values()
            .filter(|auth| {
                providers
                    .iter()
                    .any(|provider| provider.eq_ignore_ascii_case(&auth.provider))
            })
            .filter(|auth| auth.runnable())
            .filter(|auth| !excluded.contains(&auth.id))
            .filter(|auth| self.registry.client_supports_model(&auth.id, model))
            .filter(|auth| auth.model_available(model, now))
            .cloned()
            .collect();
        out.sort_by(|a, b| a.id.cmp(&b.id));
        out
    }

    /// Applies the channel-scoped alias, rewriting the upstream model name
    /// and recording the client-requested name in metadata.
    fn mapped_request(&self, auth: &Auth, req: &Request) -> Request {
        let mut attempt = req.clone();
        if let Some(upstream_model) = self.mappings.load().resolve(auth, &req.model) {
            attempt.metadata.insert(
                MODEL_MAPPING_ORIGINAL_MODEL_METADATA_KEY.to_string(),
                Value::String(req.model.clone()),
            );
            attempt.model = upstream_model;
        }
        attempt
    }

    fn note_success(&self, auth_id: &str, model: &str, response: Option<&Response>) {
        let mut usage = UsageRecord {
            model: model.to_string(),
            auth_id: auth_id.to_string(),
            ..UsageRecord::default()
        };
        {
            let mut auths = self.auths.write().expect("auth map lock poisoned");
            if let Some(auth) = auths.get_mut(auth_id) {
                usage.provider = auth.provider.clone();
                auth.auth_error_streak = 0;
                auth.model_states.remove(model);
                auth.updated_at = Some(OffsetDateTime::now_utc());
            }
        }
        self.registry.clear_model_quota_exceeded(auth_id, model);
        if let Some(response) = response {
            usage.input_tokens = response
                .metadata
                .get("input_tokens")
                .and_then(Value::as_i64)
                .unwrap_or(0);
            usage.output_tokens = response
                .metadata
                .get("output_tokens")
                .and_then(Value::as_i64)
                .unwrap_or(0);
        }
        self.reporter.publish(usage);
    }

    /// Classifies a failure and feeds it back into credential state.
    fn note_failure(&self, auth_id: &str, model: &str, err: &ExecutorError) -> ErrorKind {
        let kind = err.kind();
        let now = OffsetDateTime::now_utc();
        let mut quota_exceeded = false;
        {
            let mut auths = self.auths.write().expect("auth map lock poisoned");
            if let Some(auth) = auths.get_mut(auth_id) {
                auth.last_error = Some((err.status, err.message.clone(), now));
                auth.updated_at = Some(now);
                match kind {
                    ErrorKind::Auth => {
                        auth.auth_error_streak = auth.auth_error_streak.saturating_add(1);
                        let cooldown = AUTH_COOLDOWN_BASE
                            .saturating_mul(auth.auth_error_streak.min(i32::MAX as u32) as i32)
                            .min(AUTH_COOLDOWN_CAP);
                        auth.model_states.insert(
                            model.to_string(),
                            ModelState {
                                unavailable: true,
                                next_retry_after: Some(now + cooldown),
                                quota: QuotaState::default(),
                            },
                        );
                        tracing::warn!(auth = %auth_id, model, status = err.status,
                            streak = auth.auth_error_streak, "auth error, cooling credential");
                    }
                    ErrorKind::Quota => {
                        let reset = err
                            .retry_after_secs()
                            .map(|secs| Duration::seconds(secs as i64))
                            .unwrap_or(QUOTA_DEFAULT_RESET);
                        auth.model_states.insert(
                            model.to_string(),
                            ModelState {
                                unavailable: true,
                                next_retry_after: Some(now + reset),
                                quota: QuotaState {
                                    exceeded: true,
                                    reset_at: Some(now + reset),
                                },
                            },
                        );
                        quota_exceeded = true;
                        tracing::warn!(auth = %auth_id, model, status = err.status,
                            reset_secs = reset.whole_seconds(), "quota exceeded");
                    }
                    ErrorKind::Transient => {
                        auth.model_states.insert(
                            model.to_string(),
                            ModelState {
                                unavailable: true,
                                next_retry_after: Some(now + TRANSIENT_COOLDOWN),
                                quota: QuotaState::default(),
                            },
                        );
                        tracing::debug!(auth = %auth_id, model, status = err.status,
                            "transient upstream error");
                    }
                    ErrorKind::Client | ErrorKind::Fatal => {}
                }
            }
        }
        if quota_exceeded {
            self.registry.set_model_quota_exceeded(auth_id, model);
        }
        kind
    }

    /// Error surfaced when the candidate set is empty: 429 unless a
    /// disabled/error credential holds a fresher upstream status.
    fn no_candidates_error(&self, providers: &[String]) -> ExecutorError {
        let auths = self.auths.read().expect("auth map lock poisoned");
        let freshest = auths
            .values()
            .filter(|auth| {
                providers
                    .iter()
                    .any(|provider| provider.eq_ignore_ascii_case(&auth.provider))
            })
            .filter_map(|auth| auth.last_error.as_ref())
            .max_by_key(|(_, _, at)| *at);
        match freshest {
            Some((status, message, _)) if *status > 0 => {
                ExecutorError::new(*status, message.clone())
            }
            _ => ExecutorError::new(429, "no available credentials for request"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::AuthStatus;
    use crate::selector::FillFirstSelector;
    use async_trait::async_trait;
    use std::sync::Mutex;

    /// Scripted executor: pops one outcome per call and records the model
    /// and credential it was invoked with.
    struct FakeExecutor {
        provider: &'static str,
        outcomes: Mutex<Vec<Result<Response, ExecutorError>>>,
        calls: Mutex<Vec<(String, String)>>,
    }

    impl FakeExecutor {
        fn new(provider: &'static str, outcomes: Vec<Result<Response, ExecutorError>>) -> Self {
            Self {
                provider,
                outcomes: Mutex::new(outcomes),
                calls: Mutex::new(Vec::new()),
            }
        }

        fn calls(&self) -> Vec<(String, String)> {
            self.calls.lock().expect("calls lock").clone()
        }

        fn next_outcome(&self, auth: &Auth, req: &Request) -> Result<Response, ExecutorError> {
            self.calls
                .lock()
                .expect("calls lock")
                .push((auth.id.clone(), req.model.clone()));
            let mut outcomes = self.outcomes.lock().expect("outcomes lock");
            if outcomes.is_empty() {
                Ok(Response::default())
            } else {
                outcomes.remove(0)
            }
        }
    }

    #[async_trait]
    impl ProviderExecutor for FakeExecutor {
        fn identifier(&self) -> &'static str {
            self.provider
        }

        async fn execute(
            &self,
            auth: &Auth,
            req: Request,
            _opts: Options,
        ) -> Result<Response, ExecutorError> {
            self.next_outcome(auth, &req)
        }

        async fn execute_stream(
            &self,
            auth: &Auth,
            req: Request,
            _opts: Options,
        ) -> Result<mpsc::Receiver<StreamChunk>, ExecutorError> {
            self.next_outcome(auth, &req)?;
            let (tx, rx) = mpsc::channel(4);
            tx.try_send(StreamChunk::payload(b"ok".to_vec())).ok();
            Ok(rx)
        }

        async fn count_tokens(
            &self,
            auth: &Auth,
            req: Request,
            _opts: Options,
        ) -> Result<Response, ExecutorError> {
            self.next_outcome(auth, &req)
        }

        async fn refresh(&self, auth: &Auth) -> Result<Auth, ExecutorError> {
            Ok(auth.clone())
        }
    }

    fn manager_with(executor: Arc<FakeExecutor>, auth_ids: &[&str]) -> Manager {
        let registry = Arc::new(ModelRegistry::new());
        let manager =
            ManagerBuilder::new(Box::new(FillFirstSelector), registry).build();
        manager.register_executor(executor);
        for id in auth_ids {
            manager.register(Auth::new(*id, "claude"));
        }
        manager
    }

    fn claude_request() -> Request {
        Request {
            model: "claude-sonnet-4-5".to_string(),
            payload: b"{}".to_vec(),
            metadata: serde_json::Map::new(),
        }
    }

    #[tokio::test]
    async fn fails_over_on_quota_and_marks_state() {
        let executor = Arc::new(FakeExecutor::new(
            "claude",
            vec![Err(ExecutorError::new(429, "quota")), Ok(Response::default())],
        ));
        let manager = manager_with(executor.clone(), &["a", "b"]);

        let response = manager
            .execute(&["claude".to_string()], claude_request(), Options::default())
            .await;
        assert!(response.is_ok());
        assert_eq!(
            executor.calls(),
            vec![
                ("a".to_string(), "claude-sonnet-4-5".to_string()),
                ("b".to_string(), "claude-sonnet-4-5".to_string()),
            ]
        );
        let cooled = manager.get_auth("a").expect("auth a");
        let state = cooled.model_states.get("claude-sonnet-4-5").expect("state");
        assert!(state.quota.exceeded);
        assert!(state.next_retry_after.expect("deadline") > OffsetDateTime::now_utc());
    }

    #[tokio::test]
    async fn quota_exceeded_pair_is_never_picked_first() {
        let executor = Arc::new(FakeExecutor::new("claude", vec![Ok(Response::default())]));
        let manager = manager_with(executor.clone(), &["a", "b"]);
        {
            let mut auth = manager.get_auth("a").expect("auth a");
            auth.model_states.insert(
                "claude-sonnet-4-5".to_string(),
                ModelState {
                    unavailable: true,
                    next_retry_after: Some(OffsetDateTime::now_utc() + Duration::minutes(30)),
                    quota: QuotaState {
                        exceeded: true,
                        reset_at: None,
                    },
                },
            );
            manager.update_auth(auth);
        }

        manager
            .execute(&["claude".to_string()], claude_request(), Options::default())
            .await
            .expect("execute");
        assert_eq!(executor.calls()[0].0, "b");
    }

    #[tokio::test]
    async fn client_errors_are_not_retried() {
        let executor = Arc::new(FakeExecutor::new(
            "claude",
            vec![Err(ExecutorError::new(400, "bad payload"))],
        ));
        let manager = manager_with(executor.clone(), &["a", "b"]);

        let err = manager
            .execute(&["claude".to_string()], claude_request(), Options::default())
            .await
            .expect_err("must fail");
        assert_eq!(err.status, 400);
        assert_eq!(executor.calls().len(), 1);
        // No credential state change for client errors.
        let auth = manager.get_auth("a").expect("auth a");
        assert!(auth.model_states.is_empty());
    }

    #[tokio::test]
    async fn attempts_are_bounded_by_max_attempts() {
        let executor = Arc::new(FakeExecutor::new(
            "claude",
            vec![
                Err(ExecutorError::new(500, "boom")),
                Err(ExecutorError::new(500, "boom")),
                Err(ExecutorError::new(500, "boom")),
            ],
        ));
        let registry = Arc::new(ModelRegistry::new());
        let manager = ManagerBuilder::new(Box::new(FillFirstSelector), registry)
            .with_max_attempts(2)
            .build();
        manager.register_executor(executor.clone());
        for id in ["a", "b", "c"] {
            manager.register(Auth::new(id, "claude"));
        }

        let err = manager
            .execute(&["claude".to_string()], claude_request(), Options::default())
            .await
            .expect_err("must fail");
        assert_eq!(err.status, 500);
        assert_eq!(executor.calls().len(), 2);
    }

    #[tokio::test]
    async fn empty_candidate_set_surfaces_429() {
        let registry = Arc::new(ModelRegistry::new());
        let manager = ManagerBuilder::new(Box::new(FillFirstSelector), registry).build();
        let err = manager
            .execute(&["claude".to_string()], claude_request(), Options::default())
            .await
            .expect_err("must fail");
        assert_eq!(err.status, 429);
    }

    #[tokio::test]
    async fn disabled_auth_with_fresh_error_dominates_no_candidates() {
        let executor = Arc::new(FakeExecutor::new("claude", vec![]));
        let manager = manager_with(executor, &["a"]);
        {
            let mut auth = manager.get_auth("a").expect("auth a");
            auth.status = AuthStatus::Error;
            auth.last_error = Some((403, "org disabled".to_string(), OffsetDateTime::now_utc()));
            manager.update_auth(auth);
        }
        let err = manager
            .execute(&["claude".to_string()], claude_request(), Options::default())
            .await
            .expect_err("must fail");
        assert_eq!(err.status, 403);
    }

    #[tokio::test]
    async fn alias_applies_after_provider_resolution() {
        let executor = Arc::new(FakeExecutor::new("claude", vec![Ok(Response::default())]));
        let manager = manager_with(executor.clone(), &["a"]);
        let mut mappings = HashMap::new();
        mappings.insert(
            "claude".to_string(),
            vec![ModelAliasEntry {
                name: "claude-sonnet-4-5".to_string(),
                alias: "sonnet-latest".to_string(),
            }],
        );
        manager.set_oauth_model_mappings(&mappings);

        let mut req = claude_request();
        req.model = "sonnet-latest".to_string();
        manager
            .execute(&["claude".to_string()], req, Options::default())
            .await
            .expect("execute");
        // The executor saw the true upstream name, not the alias.
        assert_eq!(executor.calls()[0].1, "claude-sonnet-4-5");
    }

    #[tokio::test]
    async fn stream_failover_before_channel_established() {
        let executor = Arc::new(FakeExecutor::new(
            "claude",
            vec![Err(ExecutorError::new(503, "down")), Ok(Response::default())],
        ));
        let manager = manager_with(executor.clone(), &["a", "b"]);

        let mut receiver = manager
            .execute_stream(&["claude".to_string()], claude_request(), Options::default())
            .await
            .expect("stream");
        let chunk = receiver.recv().await.expect("chunk");
        assert_eq!(chunk.payload, b"ok");
        assert_eq!(executor.calls().len(), 2);
    }
}
