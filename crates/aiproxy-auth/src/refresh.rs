use std::collections::HashMap;
use std::sync::Arc;

use time::{Duration, OffsetDateTime};

use crate::auth::AuthStatus;
use crate::executor::ProviderExecutor;
use crate::manager::Manager;

const SCAN_INTERVAL_SECS: u64 = 60;
/// Tokens expiring within this window are refreshed proactively.
const REFRESH_SKEW: Duration = Duration::minutes(3);
const BACKOFF_BASE: Duration = Duration::seconds(30);
const BACKOFF_CAP: Duration = Duration::minutes(30);

/// Spawns the background refresher: scans every credential on a tick and
/// refreshes those whose token expires within the skew window. Failures set
/// `Error` status and back off exponentially; success clears both.
///
/// The task ends when the manager is dropped elsewhere and the handle is
/// aborted; callers typically let it run for the process lifetime.
pub fn spawn_refresh_worker(
    manager: Arc<Manager>,
    executors: HashMap<String, Arc<dyn ProviderExecutor>>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker =
            tokio::time::interval(std::time::Duration::from_secs(SCAN_INTERVAL_SECS));
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            scan_once(&manager, &executors).await;
        }
    })
}

async fn scan_once(manager: &Manager, executors: &HashMap<String, Arc<dyn ProviderExecutor>>) {
    let now = OffsetDateTime::now_utc();
    for auth in manager.list_auths() {
        if auth.disabled {
            continue;
        }
        if !needs_refresh(&auth, now) {
            continue;
        }
        let Some(executor) = executors.get(&auth.provider) else {
            continue;
        };
        match executor.refresh(&auth).await {
            Ok(mut updated) => {
                updated.status = AuthStatus::Active;
                updated.last_refresh = Some(now);
                updated.refresh_error_streak = 0;
                updated.next_refresh_after = None;
                updated.updated_at = Some(now);
                tracing::info!(auth = %updated.id, provider = %updated.provider, "credential refreshed");
                manager.update_auth(updated);
            }
            Err(err) => {
                let mut failed = auth.clone();
                failed.status = AuthStatus::Error;
                failed.refresh_error_streak = failed.refresh_error_streak.saturating_add(1);
                let backoff = BACKOFF_BASE
                    .saturating_mul(1_i32 << failed.refresh_error_streak.min(16))
                    .min(BACKOFF_CAP);
                failed.next_refresh_after = Some(now + backoff);
                failed.updated_at = Some(now);
                tracing::warn!(auth = %failed.id, provider = %failed.provider, error = %err,
                    retry_in_secs = backoff.whole_seconds(), "credential refresh failed");
                manager.update_auth(failed);
            }
        }
    }
}

fn needs_refresh(auth: &crate::auth::Auth, now: OffsetDateTime) -> bool {
    if let Some(next) = auth.next_refresh_after {
        // An earlier failure scheduled the retry; respect the backoff.
        return next <= now;
    }
    if auth.metadata_str("refresh_token").unwrap_or_default().is_empty() {
        return false;
    }
    match auth.token_expiry() {
        Some(expiry) => expiry - REFRESH_SKEW <= now,
        None => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::Auth;
    use serde_json::Value;
    use time::format_description::well_known::Rfc3339;

    fn auth_expiring_in(minutes: i64) -> Auth {
        let mut auth = Auth::new("a", "claude");
        auth.metadata
            .insert("refresh_token".to_string(), Value::String("rt".into()));
        let expiry = (OffsetDateTime::now_utc() + Duration::minutes(minutes))
            .format(&Rfc3339)
            .expect("format");
        auth.metadata.insert("expired".to_string(), Value::String(expiry));
        auth
    }

    #[test]
    fn refresh_window_honors_skew() {
        let now = OffsetDateTime::now_utc();
        assert!(needs_refresh(&auth_expiring_in(1), now));
        assert!(needs_refresh(&auth_expiring_in(2), now));
        assert!(!needs_refresh(&auth_expiring_in(10), now));
    }

    #[test]
    fn missing_refresh_token_is_skipped() {
        let now = OffsetDateTime::now_utc();
        let mut auth = auth_expiring_in(1);
        auth.metadata.remove("refresh_token");
        assert!(!needs_refresh(&auth, now));
    }

    #[test]
    fn failed_refresh_backoff_schedules_retry() {
        let now = OffsetDateTime::now_utc();
        let mut auth = auth_expiring_in(1);
        auth.next_refresh_after = Some(now + Duration::minutes(5));
        assert!(!needs_refresh(&auth, now));
        auth.next_refresh_after = Some(now - Duration::seconds(1));
        assert!(needs_refresh(&auth, now));
    }
}
