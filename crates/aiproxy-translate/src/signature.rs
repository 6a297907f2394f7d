//! Thinking-signature cache.
//!
//! Claude requires thinking blocks to round-trip their `signature`; Gemini
//! likewise for `thoughtSignature`. Clients routinely drop these on the next
//! turn, so translators stash them here keyed by a hash of the thinking text
//! and restore them on the outbound conversion.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, OnceLock};
use std::time::{Duration, Instant};

use sha2::{Digest, Sha256};

const SIGNATURE_TTL: Duration = Duration::from_secs(3 * 60 * 60);
const TEXT_HASH_LEN: usize = 16;
const MIN_VALID_SIGNATURE_LEN: usize = 50;
const SWEEP_INTERVAL: Duration = Duration::from_secs(10 * 60);

/// Sentinel returned for the Gemini family when no cached signature exists;
/// the upstream accepts it in place of a real signature.
pub const GEMINI_SKIP_SIGNATURE: &str = "skip_thought_signature_validator";

#[derive(Clone)]
struct Entry {
    signature: String,
    stamped: Instant,
}

struct SessionShard {
    entries: Mutex<HashMap<String, Entry>>,
}

fn shards() -> &'static Mutex<HashMap<String, &'static SessionShard>> {
    static SHARDS: OnceLock<Mutex<HashMap<String, &'static SessionShard>>> = OnceLock::new();
    SHARDS.get_or_init(|| Mutex::new(HashMap::new()))
}

static SWEEPER_STARTED: AtomicBool = AtomicBool::new(false);

fn hash_text(text: &str) -> String {
    let digest = Sha256::digest(text.as_bytes());
    let hex: String = digest.iter().map(|b| format!("{b:02x}")).collect();
    hex[..TEXT_HASH_LEN].to_string()
}

/// Model family grouping so signatures never cross provider families.
pub fn model_group(model: &str) -> &str {
    if model.contains("gpt") {
        "gpt"
    } else if model.contains("claude") {
        "claude"
    } else if model.contains("gemini") {
        "gemini"
    } else {
        model
    }
}

fn shard_for(key: &str, create: bool) -> Option<&'static SessionShard> {
    start_sweeper();
    let mut guard = shards().lock().expect("signature cache lock poisoned");
    if let Some(shard) = guard.get(key) {
        return Some(shard);
    }
    if !create {
        return None;
    }
    let shard: &'static SessionShard = Box::leak(Box::new(SessionShard {
        entries: Mutex::new(HashMap::new()),
    }));
    guard.insert(key.to_string(), shard);
    Some(shard)
}

fn start_sweeper() {
    if SWEEPER_STARTED.swap(true, Ordering::SeqCst) {
        return;
    }
    std::thread::Builder::new()
        .name("signature-cache-sweep".to_string())
        .spawn(|| loop {
            std::thread::sleep(SWEEP_INTERVAL);
            purge_expired();
        })
        .ok();
}

fn purge_expired() {
    let now = Instant::now();
    let mut outer = shards().lock().expect("signature cache lock poisoned");
    outer.retain(|_, shard| {
        let mut entries = shard.entries.lock().expect("signature shard lock poisoned");
        entries.retain(|_, entry| now.duration_since(entry.stamped) <= SIGNATURE_TTL);
        !entries.is_empty()
    });
}

/// Stores a signature for the given model family and thinking text.
/// Too-short signatures are upstream noise and are not cached.
pub fn cache_signature(model: &str, text: &str, signature: &str) {
    if text.is_empty() || signature.is_empty() || signature.len() < MIN_VALID_SIGNATURE_LEN {
        return;
    }
    let keyed = format!("{}#{}", model_group(model), text);
    let hash = hash_text(&keyed);
    if let Some(shard) = shard_for(&hash, true) {
        let mut entries = shard.entries.lock().expect("signature shard lock poisoned");
        entries.insert(
            hash,
            Entry {
                signature: signature.to_string(),
                stamped: Instant::now(),
            },
        );
    }
}

/// Looks up the signature cached for this thinking text. TTL refreshes on
/// access. The Gemini family gets the skip sentinel instead of an empty miss.
pub fn get_cached_signature(model: &str, text: &str) -> String {
    let family_fallback = || {
        if model_group(model) == "gemini" {
            GEMINI_SKIP_SIGNATURE.to_string()
        } else {
            String::new()
        }
    };
    if text.is_empty() {
        return family_fallback();
    }
    let keyed = format!("{}#{}", model_group(model), text);
    let hash = hash_text(&keyed);
    let Some(shard) = shard_for(&hash, false) else {
        return family_fallback();
    };
    let mut entries = shard.entries.lock().expect("signature shard lock poisoned");
    let now = Instant::now();
    match entries.get_mut(&hash) {
        Some(entry) if now.duration_since(entry.stamped) <= SIGNATURE_TTL => {
            entry.stamped = now;
            entry.signature.clone()
        }
        Some(_) => {
            entries.remove(&hash);
            family_fallback()
        }
        None => family_fallback(),
    }
}

/// Drops every cached signature. Exposed for tests and admin resets.
pub fn clear_signature_cache() {
    let mut outer = shards().lock().expect("signature cache lock poisoned");
    outer.clear();
}

pub fn has_valid_signature(model: &str, signature: &str) -> bool {
    (!signature.is_empty() && signature.len() >= MIN_VALID_SIGNATURE_LEN)
        || (signature == GEMINI_SKIP_SIGNATURE && model_group(model) == "gemini")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn long_signature(tag: &str) -> String {
        format!("{tag}{}", "x".repeat(MIN_VALID_SIGNATURE_LEN + 10))
    }

    #[test]
    fn caches_and_restores_by_family_and_text() {
        clear_signature_cache();
        let signature = long_signature("sig-a-");
        cache_signature("claude-sonnet-4-5", "let me think", &signature);
        assert_eq!(
            get_cached_signature("claude-opus-4-5", "let me think"),
            signature,
            "same family shares the cache"
        );
        assert_eq!(get_cached_signature("gpt-5", "let me think"), "");
    }

    #[test]
    fn short_signatures_are_rejected() {
        clear_signature_cache();
        cache_signature("claude-sonnet-4-5", "text", "short");
        assert_eq!(get_cached_signature("claude-sonnet-4-5", "text"), "");
        assert!(!has_valid_signature("claude-sonnet-4-5", "short"));
    }

    #[test]
    fn gemini_misses_return_skip_sentinel() {
        clear_signature_cache();
        assert_eq!(
            get_cached_signature("gemini-2.5-pro", "unseen text"),
            GEMINI_SKIP_SIGNATURE
        );
        assert!(has_valid_signature("gemini-2.5-pro", GEMINI_SKIP_SIGNATURE));
        assert!(!has_valid_signature("claude-sonnet-4-5", GEMINI_SKIP_SIGNATURE));
    }

    #[test]
    fn model_groups() {
        assert_eq!(model_group("gpt-5-codex"), "gpt");
        assert_eq!(model_group("claude-sonnet-4-5"), "claude");
        assert_eq!(model_group("gemini-2.5-flash"), "gemini");
        assert_eq!(model_group("qwen3-coder-plus"), "qwen3-coder-plus");
    }
}
