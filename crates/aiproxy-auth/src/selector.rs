use std::collections::HashMap;
use std::sync::Mutex;

use time::OffsetDateTime;

use crate::auth::Auth;
use crate::executor::Options;

/// Pick policy over the candidate set the manager assembled.
///
/// Candidates arrive pre-filtered to Active credentials supporting the model;
/// selectors still honor per-model cooldowns so a freshly cooled pair is
/// skipped while a viable alternative exists.
pub trait Selector: Send + Sync {
    fn name(&self) -> &'static str;

    fn pick<'a>(
        &self,
        provider: &str,
        model: &str,
        opts: &Options,
        candidates: &'a [Auth],
    ) -> Option<&'a Auth>;
}

/// Buckets candidates by priority, highest first; each bucket is sorted by ID
/// for determinism. Only buckets with at least one non-cooling member count.
fn priority_buckets<'a>(model: &str, candidates: &'a [Auth]) -> Vec<(i64, Vec<&'a Auth>)> {
    let now = OffsetDateTime::now_utc();
    let mut buckets: HashMap<i64, Vec<&Auth>> = HashMap::new();
    for auth in candidates {
        buckets.entry(auth.priority()).or_default().push(auth);
    }
    let mut ordered: Vec<(i64, Vec<&Auth>)> = buckets.into_iter().collect();
    ordered.sort_by(|a, b| b.0.cmp(&a.0));
    for (_, bucket) in &mut ordered {
        bucket.sort_by(|a, b| a.id.cmp(&b.id));
        bucket.retain(|auth| auth.model_available(model, now));
    }
    ordered.retain(|(_, bucket)| !bucket.is_empty());
    ordered
}

/// Deterministic fill-first: the lexically smallest viable ID in the highest
/// viable priority bucket.
#[derive(Debug, Default)]
pub struct FillFirstSelector;

impl Selector for FillFirstSelector {
    fn name(&self) -> &'static str {
        "fill-first"
    }

    fn pick<'a>(
        &self,
        _provider: &str,
        model: &str,
        _opts: &Options,
        candidates: &'a [Auth],
    ) -> Option<&'a Auth> {
        priority_buckets(model, candidates)
            .into_iter()
            .next()
            .and_then(|(_, bucket)| bucket.into_iter().next())
    }
}

/// Round-robin over the sorted viable members of the highest viable bucket.
///
/// Counters are keyed by (provider, priority bucket) and start at zero, so
/// the cycle is deterministic across restarts for the same candidate set.
/// Lower buckets are never consulted while a higher one has a viable member.
#[derive(Debug, Default)]
pub struct RoundRobinSelector {
    counters: Mutex<HashMap<(String, i64), u64>>,
}

impl Selector for RoundRobinSelector {
    fn name(&self) -> &'static str {
        "round-robin"
    }

    fn pick<'a>(
        &self,
        provider: &str,
        model: &str,
        _opts: &Options,
        candidates: &'a [Auth],
    ) -> Option<&'a Auth> {
        let (priority, bucket) = priority_buckets(model, candidates).into_iter().next()?;
        let mut counters = self.counters.lock().expect("selector counter lock poisoned");
        let counter = counters
            .entry((provider.to_string(), priority))
            .or_insert(0);
        let index = (*counter as usize) % bucket.len();
        *counter += 1;
        Some(bucket[index])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::{ModelState, QuotaState};
    use time::Duration;

    fn auth(id: &str) -> Auth {
        Auth::new(id, "gemini")
    }

    fn auth_with_priority(id: &str, priority: &str) -> Auth {
        let mut auth = auth(id);
        auth.attributes.insert("priority".to_string(), priority.to_string());
        auth
    }

    fn cooled(mut auth: Auth, model: &str, minutes: i64) -> Auth {
        auth.model_states.insert(
            model.to_string(),
            ModelState {
                unavailable: true,
                next_retry_after: Some(OffsetDateTime::now_utc() + Duration::minutes(minutes)),
                quota: QuotaState {
                    exceeded: true,
                    reset_at: Some(OffsetDateTime::now_utc() + Duration::minutes(minutes)),
                },
            },
        );
        auth
    }

    #[test]
    fn fill_first_is_deterministic() {
        let selector = FillFirstSelector;
        let candidates = vec![auth("b"), auth("a"), auth("c")];
        let picked = selector
            .pick("gemini", "", &Options::default(), &candidates)
            .expect("pick");
        assert_eq!(picked.id, "a");
    }

    #[test]
    fn fill_first_skips_cooling_then_returns() {
        let selector = FillFirstSelector;
        let model = "m";
        let candidates = vec![cooled(auth("a"), model, 30), auth("b"), auth("c")];
        let picked = selector
            .pick("gemini", model, &Options::default(), &candidates)
            .expect("pick");
        assert_eq!(picked.id, "b");

        // Cooldown cleared: a is preferred again.
        let candidates = vec![auth("a"), auth("b"), auth("c")];
        let picked = selector
            .pick("gemini", model, &Options::default(), &candidates)
            .expect("pick");
        assert_eq!(picked.id, "a");
    }

    #[test]
    fn fill_first_falls_back_across_priority_buckets() {
        let selector = FillFirstSelector;
        let model = "m";
        let high = cooled(auth_with_priority("high", "10"), model, 30);
        let low = auth_with_priority("low", "0");
        let candidates = vec![high, low];
        let picked = selector
            .pick("mixed", model, &Options::default(), &candidates)
            .expect("pick");
        assert_eq!(picked.id, "low");

        // After the cooldown expires the high-priority auth wins again.
        let mut high = auth_with_priority("high", "10");
        high.model_states.insert(
            model.to_string(),
            ModelState {
                unavailable: true,
                next_retry_after: Some(OffsetDateTime::now_utc() - Duration::minutes(1)),
                quota: QuotaState::default(),
            },
        );
        let candidates = vec![high, auth_with_priority("low", "0")];
        let picked = selector
            .pick("mixed", model, &Options::default(), &candidates)
            .expect("pick");
        assert_eq!(picked.id, "high");
    }

    #[test]
    fn round_robin_cycles_deterministically() {
        let selector = RoundRobinSelector::default();
        let candidates = vec![auth("b"), auth("a"), auth("c")];
        let want = ["a", "b", "c", "a", "b"];
        for expected in want {
            let picked = selector
                .pick("gemini", "", &Options::default(), &candidates)
                .expect("pick");
            assert_eq!(picked.id, expected);
        }
    }

    #[test]
    fn round_robin_never_leaves_the_top_bucket() {
        let selector = RoundRobinSelector::default();
        let candidates = vec![
            auth_with_priority("c", "0"),
            auth_with_priority("a", "10"),
            auth_with_priority("b", "10"),
        ];
        let want = ["a", "b", "a", "b"];
        for expected in want {
            let picked = selector
                .pick("mixed", "", &Options::default(), &candidates)
                .expect("pick");
            assert_eq!(picked.id, expected);
            assert_ne!(picked.id, "c");
        }
    }

    #[test]
    fn empty_and_fully_cooled_sets_yield_none() {
        let selector = FillFirstSelector;
        assert!(selector.pick("gemini", "m", &Options::default(), &[]).is_none());
        let candidates = vec![cooled(auth("a"), "m", 5)];
        assert!(selector
            .pick("gemini", "m", &Options::default(), &candidates)
            .is_none());
    }
}
