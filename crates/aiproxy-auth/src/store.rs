use std::collections::HashMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use serde_json::{Map, Value};
use sha2::{Digest, Sha256};
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;

use crate::auth::{Auth, AuthStatus};

/// Persistence for credential records.
pub trait TokenStore: Send + Sync {
    fn save(&self, auth: &Auth) -> io::Result<PathBuf>;
    fn delete(&self, auth: &Auth) -> io::Result<()>;
    fn load_all(&self) -> io::Result<Vec<Auth>>;
}

/// One JSON file per credential under a flat directory.
///
/// File content is the auth's metadata object verbatim; the filename carries
/// the provider prefix plus disambiguators so two accounts with the same
/// email never collide.
pub struct FileTokenStore {
    dir: PathBuf,
}

impl FileTokenStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn file_path(&self, auth: &Auth) -> PathBuf {
        if let Some(path) = auth.attributes.get("path") {
            return PathBuf::from(path);
        }
        self.dir.join(format!("{}.json", file_stem(auth)))
    }
}

/// `{provider}-{email-or-id}[-{plan}][-{hash8}].json`, sanitized.
fn file_stem(auth: &Auth) -> String {
    let account = auth
        .metadata_str("email")
        .filter(|email| !email.trim().is_empty())
        .unwrap_or(&auth.id);
    let mut stem = format!("{}-{}", auth.provider, sanitize(account));
    if let Some(plan) = auth.metadata_str("plan") {
        if !plan.trim().is_empty() {
            stem.push('-');
            stem.push_str(&sanitize(plan));
        }
    }
    if let Some(account_id) = auth.metadata_str("account_id") {
        if !account_id.trim().is_empty() {
            let digest = Sha256::digest(account_id.as_bytes());
            let short: String = digest.iter().take(4).map(|b| format!("{b:02x}")).collect();
            stem.push('-');
            stem.push_str(&short);
        }
    }
    stem
}

fn sanitize(value: &str) -> String {
    value
        .trim()
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '.' || c == '-' || c == '_' || c == '@' {
                c
            } else {
                '_'
            }
        })
        .collect()
}

impl TokenStore for FileTokenStore {
    fn save(&self, auth: &Auth) -> io::Result<PathBuf> {
        fs::create_dir_all(&self.dir)?;
        let path = self.file_path(auth);
        let mut payload = auth.metadata.clone();
        payload.insert("type".to_string(), Value::String(auth.provider.clone()));
        if !auth.label.is_empty() {
            payload.insert("label".to_string(), Value::String(auth.label.clone()));
        }
        payload.insert("disabled".to_string(), Value::Bool(auth.disabled));
        payload.insert(
            "timestamp".to_string(),
            Value::from(OffsetDateTime::now_utc().unix_timestamp() * 1000),
        );
        let bytes = serde_json::to_vec_pretty(&Value::Object(payload))
            .map_err(|err| io::Error::new(io::ErrorKind::InvalidData, err))?;
        fs::write(&path, bytes)?;
        Ok(path)
    }

    fn delete(&self, auth: &Auth) -> io::Result<()> {
        let path = self.file_path(auth);
        match fs::remove_file(path) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err),
        }
    }

    fn load_all(&self) -> io::Result<Vec<Auth>> {
        let mut auths = Vec::new();
        let entries = match fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(auths),
            Err(err) => return Err(err),
        };
        for entry in entries {
            let entry = entry?;
            let path = entry.path();
            if path.extension().and_then(|ext| ext.to_str()) != Some("json") {
                continue;
            }
            match load_file(&path) {
                Ok(auth) => auths.push(auth),
                Err(err) => {
                    tracing::warn!(path = %path.display(), error = %err, "skipping unreadable token file");
                }
            }
        }
        auths.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(auths)
    }
}

fn load_file(path: &Path) -> io::Result<Auth> {
    let bytes = fs::read(path)?;
    let metadata: Map<String, Value> = serde_json::from_slice(&bytes)
        .map_err(|err| io::Error::new(io::ErrorKind::InvalidData, err))?;

    let provider = metadata
        .get("type")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();
    if provider.is_empty() {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            "token file has no `type` key",
        ));
    }
    let id = path
        .file_stem()
        .and_then(|stem| stem.to_str())
        .unwrap_or_default()
        .to_string();
    let disabled = metadata.get("disabled").and_then(Value::as_bool).unwrap_or(false);

    let mut auth = Auth::new(id, provider);
    auth.label = metadata
        .get("label")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();
    auth.disabled = disabled;
    auth.status = if disabled {
        AuthStatus::Disabled
    } else {
        AuthStatus::Active
    };
    auth.attributes
        .insert("path".to_string(), path.display().to_string());
    if let Some(refreshed) = metadata.get("last_refresh").and_then(Value::as_str) {
        auth.last_refresh = OffsetDateTime::parse(refreshed, &Rfc3339).ok();
    }
    auth.metadata = metadata;
    auth.created_at = Some(OffsetDateTime::now_utc());
    auth.updated_at = auth.created_at;
    Ok(auth)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_dir(tag: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("aiproxy-store-{tag}-{}", std::process::id()));
        let _ = fs::remove_dir_all(&dir);
        dir
    }

    #[test]
    fn save_and_load_round_trip() {
        let dir = temp_dir("roundtrip");
        let store = FileTokenStore::new(&dir);

        let mut auth = Auth::new("ignored", "claude");
        auth.metadata
            .insert("email".to_string(), Value::String("user@example.com".into()));
        auth.metadata
            .insert("access_token".to_string(), Value::String("tok".into()));
        auth.metadata
            .insert("custom-key".to_string(), Value::String("survives".into()));
        let path = store.save(&auth).expect("save");
        assert!(path
            .file_name()
            .and_then(|name| name.to_str())
            .expect("file name")
            .starts_with("claude-user@example.com"));

        let loaded = store.load_all().expect("load");
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].provider, "claude");
        assert_eq!(loaded[0].metadata_str("access_token"), Some("tok"));
        assert_eq!(loaded[0].metadata_str("custom-key"), Some("survives"));
        assert_eq!(loaded[0].status, AuthStatus::Active);

        let _ = fs::remove_dir_all(&dir);
    }

    #[test]
    fn same_email_different_plan_gets_distinct_files() {
        let dir = temp_dir("plans");
        let store = FileTokenStore::new(&dir);

        let mut pro = Auth::new("a", "claude");
        pro.metadata
            .insert("email".to_string(), Value::String("u@x.com".into()));
        pro.metadata.insert("plan".to_string(), Value::String("pro".into()));
        let mut team = Auth::new("b", "claude");
        team.metadata
            .insert("email".to_string(), Value::String("u@x.com".into()));
        team.metadata.insert("plan".to_string(), Value::String("team".into()));
        team.metadata
            .insert("account_id".to_string(), Value::String("acct_9".into()));

        let p1 = store.save(&pro).expect("save pro");
        let p2 = store.save(&team).expect("save team");
        assert_ne!(p1, p2);
        assert_eq!(store.load_all().expect("load").len(), 2);

        let _ = fs::remove_dir_all(&dir);
    }

    #[test]
    fn disabled_flag_round_trips() {
        let dir = temp_dir("disabled");
        let store = FileTokenStore::new(&dir);
        let mut auth = Auth::new("a", "codex");
        auth.disabled = true;
        store.save(&auth).expect("save");
        let loaded = store.load_all().expect("load");
        assert!(loaded[0].disabled);
        assert_eq!(loaded[0].status, AuthStatus::Disabled);
        let _ = fs::remove_dir_all(&dir);
    }
}
