//! In-memory index of (credential, model) pairs and static model capability
//! metadata.
//!
//! The registry is read on every request (provider resolution, thinking
//! validation) and written only when credentials register or config reloads,
//! so all maps sit behind `std::sync::RwLock`.

mod builtin;
mod model;
mod registry;

pub use builtin::builtin_models;
pub use model::{ModelInfo, ThinkingSupport};
pub use registry::ModelRegistry;
