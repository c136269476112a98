//! Redis backend.
//!
//! - The lock is a `SET NX PX` key holding a per-acquisition token, so a
//!   crashed holder's lease expires instead of wedging every later run.
//! - The history is a list (commit order) plus a hash of JSON records.
//! - A migration body renders into a [`LuaScript`]; applying it runs one
//!   script that checks lock ownership, refreshes the lease, runs the body
//!   under `pcall` and records the identifier only if the body succeeded.
//!
//! Scripts execute atomically with respect to other clients, but Redis has no
//! rollback: writes a failing body performed before its error remain.
//! Each distinct body yields a distinct apply script, and Redis keeps every
//! script it has run in its script cache until `SCRIPT FLUSH` or a restart.
//! Migration bodies must not read `KEYS` or `ARGV`; those belong to the
//! wrapper script.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{SecondsFormat, Utc};
use redis::AsyncCommands;
use redis::aio::ConnectionManager;

use super::scripts::{UNLOCK_SCRIPT, apply_script_source};
use super::{AppliedMigration, Backend};
use crate::errors::{BackendError, BoxError};
use crate::id::generate_lock_token;
use crate::keys::MigrationKeys;
use crate::migration::{Execer, Migration};

/// Lua chunk built by a migration body and run inside the apply script.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LuaScript {
    body: String,
}

impl LuaScript {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends `redis.call(command, args...)` with every argument quoted.
    pub fn call<I, A>(&mut self, command: &str, args: I) -> &mut Self
    where
        I: IntoIterator<Item = A>,
        A: AsRef<str>,
    {
        self.body.push_str("redis.call(");
        self.body.push_str(&lua_quote(command));
        for arg in args {
            self.body.push_str(", ");
            self.body.push_str(&lua_quote(arg.as_ref()));
        }
        self.body.push_str(")\n");
        self
    }

    /// Appends a raw Lua chunk.
    pub fn raw(&mut self, chunk: &str) -> &mut Self {
        self.body.push_str(chunk);
        if !chunk.ends_with('\n') {
            self.body.push('\n');
        }
        self
    }

    pub fn body(&self) -> &str {
        &self.body
    }

    pub fn is_empty(&self) -> bool {
        self.body.trim().is_empty()
    }
}

#[async_trait]
impl Execer for LuaScript {
    async fn exec(&mut self, payload: &str) -> Result<(), BoxError> {
        self.raw(payload);
        Ok(())
    }
}

/// Quotes a string as a Lua single-quoted literal.
fn lua_quote(value: &str) -> String {
    let mut quoted = String::with_capacity(value.len() + 2);
    quoted.push('\'');
    for ch in value.chars() {
        match ch {
            '\\' => quoted.push_str("\\\\"),
            '\'' => quoted.push_str("\\'"),
            '\n' => quoted.push_str("\\n"),
            '\r' => quoted.push_str("\\r"),
            '\0' => quoted.push_str("\\0"),
            other => quoted.push(other),
        }
    }
    quoted.push('\'');
    quoted
}

/// Settings for [`RedisBackend`].
#[derive(Debug, Clone)]
pub struct RedisBackendConfig {
    /// Prefix for every key the backend touches.
    pub namespace: String,
    /// Lease on the lock key, refreshed before each migration.
    pub lock_ttl: Duration,
}

impl RedisBackendConfig {
    pub const DEFAULT_NAMESPACE: &'static str = "convoy";
    pub const DEFAULT_LOCK_TTL: Duration = Duration::from_secs(300);

    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = namespace.into();
        self
    }

    pub fn with_lock_ttl(mut self, lock_ttl: Duration) -> Self {
        self.lock_ttl = lock_ttl;
        self
    }
}

impl Default for RedisBackendConfig {
    fn default() -> Self {
        Self {
            namespace: Self::DEFAULT_NAMESPACE.to_string(),
            lock_ttl: Self::DEFAULT_LOCK_TTL,
        }
    }
}

/// Backend storing history and the coordination lock in Redis.
pub struct RedisBackend {
    conn: ConnectionManager,
    keys: MigrationKeys,
    lock_ttl: Duration,
    token: Option<String>,
}

impl RedisBackend {
    pub fn new(conn: ConnectionManager, config: RedisBackendConfig) -> Self {
        Self {
            conn,
            keys: MigrationKeys::new(config.namespace),
            lock_ttl: config.lock_ttl,
            token: None,
        }
    }

    /// Opens a managed connection to `redis_url`.
    pub async fn connect(redis_url: &str, config: RedisBackendConfig) -> Result<Self, BackendError> {
        let client = redis::Client::open(redis_url)?;
        let conn = ConnectionManager::new(client).await?;
        Ok(Self::new(conn, config))
    }

    pub fn keys(&self) -> &MigrationKeys {
        &self.keys
    }

    pub fn is_locked(&self) -> bool {
        self.token.is_some()
    }

    /// Applied-migration records in commit order.
    pub async fn records(&mut self) -> Result<Vec<AppliedMigration>, BackendError> {
        let ids = self.applied().await?;
        if ids.is_empty() {
            return Ok(Vec::new());
        }

        let raw: Vec<Option<String>> = redis::cmd("HMGET")
            .arg(self.keys.records())
            .arg(&ids)
            .query_async(&mut self.conn)
            .await?;

        let mut records = Vec::with_capacity(ids.len());
        for (id, json) in ids.into_iter().zip(raw) {
            match json {
                Some(json) => records.push(serde_json::from_str(&json)?),
                None => {
                    return Err(BackendError::other(format!(
                        "history lists {id} but no record exists for it"
                    )));
                }
            }
        }
        Ok(records)
    }

    /// Deletes every key in the namespace, lock included. Returns the number
    /// of keys removed.
    ///
    /// Uses SCAN + DEL so Redis is never blocked on a large keyspace.
    pub async fn purge(&mut self) -> Result<u64, BackendError> {
        const SCAN_COUNT: usize = 1000;
        let pattern = self.keys.pattern();
        let mut cursor: u64 = 0;
        let mut total_deleted: u64 = 0;

        loop {
            let (next_cursor, keys): (u64, Vec<String>) = redis::cmd("SCAN")
                .arg(cursor)
                .arg("MATCH")
                .arg(&pattern)
                .arg("COUNT")
                .arg(SCAN_COUNT)
                .query_async(&mut self.conn)
                .await?;

            if !keys.is_empty() {
                let deleted: u64 = redis::cmd("DEL").arg(&keys).query_async(&mut self.conn).await?;
                total_deleted += deleted;
            }

            cursor = next_cursor;
            if cursor == 0 {
                break;
            }
        }

        self.token = None;
        Ok(total_deleted)
    }

    fn lock_ttl_ms(&self) -> u64 {
        self.lock_ttl.as_millis().max(1) as u64
    }
}

#[async_trait]
impl Backend for RedisBackend {
    type Conn = LuaScript;

    async fn lock(&mut self) -> Result<(), BackendError> {
        if self.token.is_some() {
            return Err(BackendError::AlreadyLocked);
        }

        let token = generate_lock_token();
        let reply: Option<String> = redis::cmd("SET")
            .arg(self.keys.lock())
            .arg(&token)
            .arg("NX")
            .arg("PX")
            .arg(self.lock_ttl_ms())
            .query_async(&mut self.conn)
            .await?;

        match reply {
            Some(_) => {
                self.token = Some(token);
                Ok(())
            }
            None => Err(BackendError::LockHeld),
        }
    }

    async fn unlock(&mut self) -> Result<(), BackendError> {
        let token = self.token.take().ok_or(BackendError::NotLocked)?;

        let released: i64 = UNLOCK_SCRIPT
            .key(self.keys.lock())
            .arg(token)
            .invoke_async(&mut self.conn)
            .await?;

        if released == 1 {
            Ok(())
        } else {
            Err(BackendError::LockLost)
        }
    }

    async fn applied(&mut self) -> Result<Vec<String>, BackendError> {
        let ids: Vec<String> = self.conn.lrange(self.keys.history(), 0, -1).await?;
        Ok(ids)
    }

    async fn apply(&mut self, migration: &dyn Migration<LuaScript>) -> Result<(), BackendError> {
        let token = self.token.clone().ok_or(BackendError::NotLocked)?;
        let id = migration.id().to_string();

        let mut script = LuaScript::new();
        migration.migrate(&mut script).await.map_err(BackendError::Payload)?;

        let source = apply_script_source(script.body());
        let applied_at = Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true);

        let apply_script = redis::Script::new(&source);
        let mut invocation = apply_script.prepare_invoke();
        invocation
            .key(self.keys.lock())
            .key(self.keys.history())
            .key(self.keys.records())
            .arg(token)
            .arg(self.lock_ttl_ms())
            .arg(&id)
            .arg(applied_at);

        let result: Result<String, redis::RedisError> = invocation.invoke_async(&mut self.conn).await;
        result.map(|_| ()).map_err(|err| classify_apply_error(&id, err))
    }
}

/// Maps the apply script's error replies onto backend errors.
fn classify_apply_error(id: &str, err: redis::RedisError) -> BackendError {
    match err.code() {
        Some("CONVOY_LOCK_LOST") => BackendError::LockLost,
        Some("CONVOY_ALREADY_RECORDED") => BackendError::AlreadyRecorded { id: id.to_string() },
        Some("CONVOY_PAYLOAD") => {
            let detail = err.detail().unwrap_or("migration body failed").to_string();
            BackendError::Payload(detail.into())
        }
        _ => BackendError::Redis(err),
    }
}
