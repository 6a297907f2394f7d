//! Credential lifecycle, per-model quota state, selection policies, and the
//! execution manager that drives provider executors with retry/failover.

mod auth;
mod error;
mod executor;
mod manager;
mod mappings;
mod refresh;
mod selector;
mod store;

pub use auth::{Auth, AuthStatus, ModelState, QuotaState};
pub use error::{classify_status, ErrorKind, ExecutorError};
pub use executor::{
    Options, ProviderExecutor, Request, Response, StreamChunk, IDEMPOTENCY_KEY_METADATA_KEY,
    MODEL_MAPPING_ORIGINAL_MODEL_METADATA_KEY,
};
pub use manager::{Manager, ManagerBuilder, UsageRecord, UsageReporter};
pub use mappings::oauth_model_mapping_channel;
pub use refresh::spawn_refresh_worker;
pub use selector::{FillFirstSelector, RoundRobinSelector, Selector};
pub use store::{FileTokenStore, TokenStore};
