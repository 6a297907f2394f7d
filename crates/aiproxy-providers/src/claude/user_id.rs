//! Fake `metadata.user_id` cache for cloaked Claude requests.
//!
//! Keyed by SHA-256 of the API key, 1h sliding TTL, so one credential keeps
//! presenting the same synthetic identity across consecutive requests.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, OnceLock};
use std::time::{Duration, Instant};

use rand::RngCore;
use sha2::{Digest, Sha256};

const USER_ID_TTL: Duration = Duration::from_secs(60 * 60);
const SWEEP_INTERVAL: Duration = Duration::from_secs(15 * 60);

struct Entry {
    value: String,
    expires: Instant,
}

fn cache() -> &'static Mutex<HashMap<String, Entry>> {
    static CACHE: OnceLock<Mutex<HashMap<String, Entry>>> = OnceLock::new();
    CACHE.get_or_init(|| Mutex::new(HashMap::new()))
}

static SWEEPER_STARTED: AtomicBool = AtomicBool::new(false);

fn start_sweeper() {
    if SWEEPER_STARTED.swap(true, Ordering::SeqCst) {
        return;
    }
    std::thread::Builder::new()
        .name("user-id-cache-sweep".to_string())
        .spawn(|| loop {
            std::thread::sleep(SWEEP_INTERVAL);
            let now = Instant::now();
            let mut guard = cache().lock().expect("user id cache lock poisoned");
            guard.retain(|_, entry| entry.expires > now);
        })
        .ok();
}

pub(crate) fn generate_fake_user_id() -> String {
    let mut bytes = [0u8; 32];
    rand::rng().fill_bytes(&mut bytes);
    let hex: String = bytes.iter().map(|b| format!("{b:02x}")).collect();
    format!("user_{hex}")
}

pub(crate) fn is_valid_user_id(value: &str) -> bool {
    let Some(hex) = value.strip_prefix("user_") else {
        return false;
    };
    hex.len() == 64 && hex.chars().all(|c| c.is_ascii_hexdigit())
}

/// Stable fake user id for this API key; TTL renews on access.
pub(crate) fn cached_user_id(api_key: &str) -> String {
    if api_key.is_empty() {
        return generate_fake_user_id();
    }
    start_sweeper();
    let digest = Sha256::digest(api_key.as_bytes());
    let key: String = digest.iter().map(|b| format!("{b:02x}")).collect();
    let now = Instant::now();

    let mut guard = cache().lock().expect("user id cache lock poisoned");
    if let Some(entry) = guard.get_mut(&key) {
        if entry.expires > now && is_valid_user_id(&entry.value) {
            entry.expires = now + USER_ID_TTL;
            return entry.value.clone();
        }
    }
    let value = generate_fake_user_id();
    guard.insert(
        key,
        Entry {
            value: value.clone(),
            expires: now + USER_ID_TTL,
        },
    );
    value
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_are_well_formed_and_stable_per_key() {
        let id = cached_user_id("sk-ant-key-1");
        assert!(is_valid_user_id(&id));
        assert_eq!(cached_user_id("sk-ant-key-1"), id);
        assert_ne!(cached_user_id("sk-ant-key-2"), id);
    }

    #[test]
    fn empty_key_gets_a_fresh_id_each_time() {
        assert_ne!(cached_user_id(""), cached_user_id(""));
    }

    #[test]
    fn validity_check() {
        assert!(is_valid_user_id(&generate_fake_user_id()));
        assert!(!is_valid_user_id("user_short"));
        assert!(!is_valid_user_id("session_abc"));
    }
}
