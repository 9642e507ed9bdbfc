//! On-disk session: the signed-in user, their token, form autosaves and
//! snapshots of the notification store and query cache.
//!
//! The file is one JSON object keyed like browser storage (`access_token`,
//! `user`, `userRole`, `auth-storage`, `autosave:<form>`).

use chrono::{DateTime, Utc};
use msq_cache::PersistedQuery;
use msq_core::{EntityId, NotificationData};
use msq_notify::Recipient;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::path::{Path, PathBuf};

const ACCESS_TOKEN_KEY: &str = "access_token";
const USER_KEY: &str = "user";
const USER_ROLE_KEY: &str = "userRole";
const AUTH_STORAGE_KEY: &str = "auth-storage";
const NOTIFICATIONS_KEY: &str = "notifications";
const QUERY_CACHE_KEY: &str = "query-cache";
const AUTOSAVE_PREFIX: &str = "autosave:";

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Serialization error: {0}")]
    Serde(#[from] serde_json::Error),
    #[error("Session file is not a JSON object")]
    NotAnObject,
}

/// The user record the login flow stores.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionUser {
    #[serde(alias = "id")]
    pub user_id: EntityId,
    #[serde(default, alias = "role_name")]
    pub role: Option<String>,
    #[serde(default)]
    pub full_name: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AutosaveEntry {
    pub data: Value,
    pub saved_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct SessionStore {
    path: PathBuf,
    entries: Map<String, Value>,
}

impl SessionStore {
    /// Read the session at `path`. A missing file is an empty session.
    pub fn load(path: impl Into<PathBuf>) -> Result<Self, SessionError> {
        let path = path.into();
        if !path.exists() {
            return Ok(Self::empty(path));
        }
        let contents = std::fs::read_to_string(&path)?;
        if contents.trim().is_empty() {
            return Ok(Self::empty(path));
        }
        match serde_json::from_str::<Value>(&contents)? {
            Value::Object(entries) => Ok(Self { path, entries }),
            _ => Err(SessionError::NotAnObject),
        }
    }

    pub fn empty(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            entries: Map::new(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn save(&self) -> Result<(), SessionError> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let contents = serde_json::to_string_pretty(&self.entries)?;
        std::fs::write(&self.path, contents)?;
        Ok(())
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.entries.get(key)
    }

    pub fn set(&mut self, key: impl Into<String>, value: Value) {
        self.entries.insert(key.into(), value);
    }

    pub fn remove(&mut self, key: &str) -> Option<Value> {
        self.entries.remove(key)
    }

    pub fn access_token(&self) -> Option<&str> {
        self.get(ACCESS_TOKEN_KEY)
            .and_then(Value::as_str)
            .filter(|token| !token.is_empty())
    }

    pub fn set_access_token(&mut self, token: impl Into<String>) {
        self.set(ACCESS_TOKEN_KEY, Value::String(token.into()));
    }

    /// The stored user, falling back to the auth store's persisted state.
    pub fn user(&self) -> Option<SessionUser> {
        let direct = self.get(USER_KEY).and_then(|value| decode_user(value.clone()));
        direct.or_else(|| {
            self.get(AUTH_STORAGE_KEY)
                .and_then(|auth| auth_storage_user(auth.clone()))
        })
    }

    pub fn set_user(&mut self, user: &SessionUser) -> Result<(), SessionError> {
        self.set(USER_KEY, serde_json::to_value(user)?);
        Ok(())
    }

    /// `userRole` wins over the role on the user record.
    pub fn role(&self) -> Option<String> {
        self.get(USER_ROLE_KEY)
            .and_then(Value::as_str)
            .filter(|role| !role.is_empty())
            .map(str::to_string)
            .or_else(|| self.user().and_then(|user| user.role))
    }

    pub fn recipient(&self) -> Option<Recipient> {
        let user = self.user()?;
        let role = self.role()?;
        Some(Recipient::new(user.user_id, role))
    }

    /// Drop credentials and user identity. Autosaves survive a sign-out.
    pub fn clear_auth(&mut self) {
        for key in [ACCESS_TOKEN_KEY, USER_KEY, USER_ROLE_KEY, AUTH_STORAGE_KEY] {
            self.entries.remove(key);
        }
    }

    pub fn autosave_form(&mut self, form: &str, data: Value) {
        self.autosave_form_at(form, data, Utc::now());
    }

    pub fn autosave_form_at(&mut self, form: &str, data: Value, saved_at: DateTime<Utc>) {
        let entry = AutosaveEntry { data, saved_at };
        // AutosaveEntry always serializes.
        if let Ok(value) = serde_json::to_value(entry) {
            self.set(autosave_key(form), value);
        }
    }

    pub fn restore_autosave(&self, form: &str) -> Option<AutosaveEntry> {
        let value = self.get(&autosave_key(form))?.clone();
        match serde_json::from_value(value) {
            Ok(entry) => Some(entry),
            Err(err) => {
                tracing::warn!(form, error = %err, "Ignoring unreadable autosave");
                None
            }
        }
    }

    pub fn clear_autosave(&mut self, form: &str) -> bool {
        self.remove(&autosave_key(form)).is_some()
    }

    pub fn autosaved_forms(&self) -> Vec<String> {
        self.entries
            .keys()
            .filter_map(|key| key.strip_prefix(AUTOSAVE_PREFIX))
            .map(str::to_string)
            .collect()
    }

    pub fn save_notifications(&mut self, items: &[NotificationData]) -> Result<(), SessionError> {
        self.set(NOTIFICATIONS_KEY, serde_json::to_value(items)?);
        Ok(())
    }

    pub fn load_notifications(&self) -> Vec<NotificationData> {
        self.decode_list(NOTIFICATIONS_KEY)
    }

    pub fn save_query_cache(&mut self, snapshot: &[PersistedQuery]) -> Result<(), SessionError> {
        self.set(QUERY_CACHE_KEY, serde_json::to_value(snapshot)?);
        Ok(())
    }

    pub fn load_query_cache(&self) -> Vec<PersistedQuery> {
        self.decode_list(QUERY_CACHE_KEY)
    }

    fn decode_list<T: serde::de::DeserializeOwned>(&self, key: &str) -> Vec<T> {
        let Some(value) = self.get(key) else {
            return Vec::new();
        };
        serde_json::from_value(value.clone()).unwrap_or_else(|err| {
            tracing::warn!(key, error = %err, "Discarding unreadable session snapshot");
            Vec::new()
        })
    }
}

fn autosave_key(form: &str) -> String {
    format!("{}{}", AUTOSAVE_PREFIX, form)
}

/// Older logins stored the user as a JSON string.
fn decode_user(value: Value) -> Option<SessionUser> {
    match value {
        Value::String(text) => serde_json::from_str(&text).ok(),
        Value::Null => None,
        other => serde_json::from_value(other).ok(),
    }
}

fn auth_storage_user(auth: Value) -> Option<SessionUser> {
    let auth = match auth {
        Value::String(text) => serde_json::from_str(&text).ok()?,
        other => other,
    };
    decode_user(auth.get("state")?.get("user")?.clone())
}
