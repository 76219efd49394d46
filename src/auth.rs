//! User accounts and sessions.
//!
//! Accounts are kept in a `users.json` file (or only in memory for tests),
//! passwords are stored as Argon2 hashes. Sessions are opaque UUID tokens
//! held by a [`SessionStore`] that the web layer receives through its state.

use crate::error::{AppError, Result};
use argon2::{
    Argon2,
    password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString, rand_core::OsRng},
};
use chrono::{DateTime, Utc};
use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{PoisonError, RwLock};
use std::time::{Duration, SystemTime};
use uuid::Uuid;

lazy_static! {
    static ref USERNAME: Regex = Regex::new(r"^[A-Za-z0-9_.-]{1,64}$").unwrap();
}

const MIN_PASSWORD_LEN: usize = 6;

/// Registered application user
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct User {
    /// Unique login name
    pub username: String,

    /// Argon2 hash of the user's password
    pub password_hash: String,

    pub created_at: DateTime<Utc>,
}

/// Login data, from a JSON body or a form
#[derive(Debug, Serialize, Deserialize)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

/// Registration data; `confirm_password` must repeat `password`
#[derive(Debug, Serialize, Deserialize)]
pub struct Registration {
    pub username: String,
    pub password: String,
    #[serde(default)]
    pub confirm_password: Option<String>,
}

/// Account storage backed by an optional JSON file
#[derive(Debug, Default)]
pub struct UserStore {
    users: RwLock<HashMap<String, User>>,
    path: Option<PathBuf>,
}

impl UserStore {
    /// A store that never touches the disk
    pub fn in_memory() -> Self {
        Self::default()
    }

    /// Opens the users file, creating an empty one if it does not exist
    ///
    /// # Errors
    /// * `IoError` if the file cannot be created or read
    /// * `InternalError` if the file is not valid JSON
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        if !path.exists() {
            fs::write(&path, b"{}")?;
        }

        let contents = fs::read_to_string(&path)?;
        let users: HashMap<String, User> = serde_json::from_str(&contents)?;
        tracing::info!(users = users.len(), path = %path.display(), "loaded user accounts");

        Ok(Self {
            users: RwLock::new(users),
            path: Some(path),
        })
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Writes the users file through a temporary file renamed into place
    fn save(&self, users: &HashMap<String, User>) -> Result<()> {
        if let Some(path) = &self.path {
            let json = serde_json::to_string_pretty(users)?;
            let tmp = path.with_extension("json.tmp");
            fs::write(&tmp, json)?;
            fs::rename(&tmp, path)?;
        }
        Ok(())
    }

    /// Register a new user
    ///
    /// # Arguments
    /// * `username` - Unique name, `[A-Za-z0-9_.-]`, at most 64 characters
    /// * `password` - Plain text password, at least 6 characters
    /// * `confirm_password` - Must equal `password` when given
    ///
    /// # Errors
    /// * `ValidationError` for blank or malformed fields, mismatched
    ///   passwords, or an existing username
    pub fn register(
        &self,
        username: &str,
        password: &str,
        confirm_password: Option<&str>,
    ) -> Result<User> {
        let username = username.trim();
        if username.is_empty() || password.is_empty() {
            return Err(AppError::validation("username and password are required"));
        }
        if !USERNAME.is_match(username) {
            return Err(AppError::validation(
                "username may only contain letters, digits, '_', '.' and '-' (at most 64 characters)",
            ));
        }
        if password.len() < MIN_PASSWORD_LEN {
            return Err(AppError::validation(format!(
                "password must be at least {} characters",
                MIN_PASSWORD_LEN
            )));
        }
        if confirm_password.is_some_and(|confirm| confirm != password) {
            return Err(AppError::validation("passwords do not match"));
        }

        if self.exists(username) {
            return Err(AppError::validation("username already exists"));
        }

        // no lock held while hashing
        let user = User {
            username: username.to_string(),
            password_hash: hash_password(password)?,
            created_at: Utc::now(),
        };

        let mut users = self.users.write().unwrap_or_else(PoisonError::into_inner);
        if users.contains_key(username) {
            return Err(AppError::validation("username already exists"));
        }
        users.insert(user.username.clone(), user.clone());
        if let Err(e) = self.save(&users) {
            users.remove(username);
            return Err(e);
        }

        tracing::info!(username = %user.username, "registered user");
        Ok(user)
    }

    /// Whether the credentials match a registered user. Unknown users and
    /// wrong passwords both yield `false`.
    pub fn verify(&self, username: &str, password: &str) -> Result<bool> {
        let users = self.users.read().unwrap_or_else(PoisonError::into_inner);
        match users.get(username.trim()) {
            Some(user) => verify_password(password, &user.password_hash),
            None => Ok(false),
        }
    }

    pub fn exists(&self, username: &str) -> bool {
        self.users
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(username)
    }
}

/// Hash a password using Argon2 with a fresh random salt
fn hash_password(password: &str) -> Result<String> {
    let salt = SaltString::generate(&mut OsRng);
    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|e| AppError::Internal(format!("password hashing failed: {}", e)))
}

/// Verify a password against a stored hash
///
/// # Errors
/// * `InternalError` if the stored hash is malformed
fn verify_password(password: &str, hash: &str) -> Result<bool> {
    let parsed = PasswordHash::new(hash)
        .map_err(|e| AppError::Internal(format!("invalid password hash format: {}", e)))?;
    Ok(Argon2::default()
        .verify_password(password.as_bytes(), &parsed)
        .is_ok())
}

/// Server-side session registry
pub trait SessionStore: Send + Sync {
    /// Starts a session and returns its token
    fn create(&self, username: &str) -> String;

    /// Username bound to a live token; refreshes the idle timer
    fn validate(&self, token: &str) -> Option<String>;

    fn revoke(&self, token: &str);

    /// Drops expired sessions, returning how many were removed
    fn purge_expired(&self) -> usize;
}

#[derive(Debug, Clone)]
struct Session {
    username: String,
    last_seen: SystemTime,
}

/// Sessions in a locked map, expiring after a period of inactivity
#[derive(Debug)]
pub struct InMemorySessionStore {
    sessions: RwLock<HashMap<String, Session>>,
    idle_timeout: Duration,
}

impl InMemorySessionStore {
    pub fn new(idle_timeout: Duration) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            idle_timeout,
        }
    }

    pub fn idle_timeout(&self) -> Duration {
        self.idle_timeout
    }

    pub fn len(&self) -> usize {
        self.sessions
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn create_at(&self, username: &str, now: SystemTime) -> String {
        let token = Uuid::new_v4().to_string();
        let session = Session {
            username: username.to_string(),
            last_seen: now,
        };
        self.sessions
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(token.clone(), session);
        token
    }

    fn is_expired(&self, session: &Session, now: SystemTime) -> bool {
        match now.duration_since(session.last_seen) {
            Ok(idle) => idle > self.idle_timeout,
            // clock went backwards
            Err(_) => false,
        }
    }

    pub fn validate_at(&self, token: &str, now: SystemTime) -> Option<String> {
        let mut sessions = self.sessions.write().unwrap_or_else(PoisonError::into_inner);
        let expired = {
            let session = sessions.get(token)?;
            self.is_expired(session, now)
        };
        if expired {
            sessions.remove(token);
            return None;
        }
        let session = sessions.get_mut(token)?;
        session.last_seen = now;
        Some(session.username.clone())
    }

    pub fn purge_expired_at(&self, now: SystemTime) -> usize {
        let mut sessions = self.sessions.write().unwrap_or_else(PoisonError::into_inner);
        let before = sessions.len();
        sessions.retain(|_, session| !self.is_expired(session, now));
        before - sessions.len()
    }
}

impl SessionStore for InMemorySessionStore {
    fn create(&self, username: &str) -> String {
        self.create_at(username, SystemTime::now())
    }

    fn validate(&self, token: &str) -> Option<String> {
        self.validate_at(token, SystemTime::now())
    }

    fn revoke(&self, token: &str) {
        self.sessions
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(token);
    }

    fn purge_expired(&self) -> usize {
        self.purge_expired_at(SystemTime::now())
    }
}
