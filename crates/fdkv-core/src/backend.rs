//! KV backend abstraction: a real connection to a Redis-compatible
//! server, or an in-memory fake satisfying the same contract for
//! deterministic tests without a live server. Dispatch is a closed enum
//! rather than a trait object, following the same `engine::any`-style
//! pattern the rest of this workspace uses for swappable backends.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use redis::aio::MultiplexedConnection;
use redis::AsyncCommands;
use tokio::sync::Mutex;
use tracing::debug;

use crate::error::{CoreError, Result};
use crate::scripts::{DELETE_SCRIPT, INSERT_SCRIPT};

/// One field's contribution to an atomic insert: its storage key, value
/// (`None` for null, written nowhere), and the dependency index-set keys
/// that must agree with it.
#[derive(Debug, Clone)]
pub struct InsertField {
    pub field_key: String,
    pub field_value: Option<String>,
    pub dependency_keys: Vec<String>,
}

/// Everything an atomic insert needs, independent of backend.
#[derive(Debug, Clone)]
pub struct InsertPlan {
    pub table_key: String,
    pub key_identifier: String,
    pub fields: Vec<InsertField>,
}

/// Identifies the functional dependency that actually blocked a commit, so
/// the caller can report the real violator rather than guessing from plan
/// construction order.
#[derive(Debug, Clone)]
pub struct BrokenDependency {
    pub determinants: String,
    pub dependent: String,
}

impl BrokenDependency {
    /// Recover the determinant/dependent names from one of `InsertField`'s
    /// `dependency_keys` strings (`__dependency_index__:<determinants>=>
    /// <dependent>:<identifier>`). Falls back to putting the raw key in
    /// `determinants` if it doesn't match the expected layout — this should
    /// never happen for keys this crate generated itself.
    fn from_key(key: &str) -> Self {
        parse_dependency_key(key).unwrap_or_else(|| BrokenDependency {
            determinants: key.to_string(),
            dependent: String::new(),
        })
    }
}

fn parse_dependency_key(key: &str) -> Option<BrokenDependency> {
    let rest = key.strip_prefix("__dependency_index__:")?;
    let (determinants, rest) = rest.split_once("=>")?;
    let (dependent, _identifier) = rest.split_once(':')?;
    Some(BrokenDependency {
        determinants: determinants.to_string(),
        dependent: dependent.to_string(),
    })
}

/// One field's contribution to an atomic delete.
#[derive(Debug, Clone)]
pub struct DeleteField {
    pub field_key: String,
    pub dependency_keys: Vec<String>,
}

/// Everything an atomic delete needs, independent of backend.
#[derive(Debug, Clone)]
pub struct DeletePlan {
    pub table_key: String,
    pub key_identifier: String,
    pub fields: Vec<DeleteField>,
}

/// Connection to the KV store backing a `Core`. Either a real Redis-protocol
/// connection, or an in-memory fake for tests that would otherwise require a
/// live server.
#[derive(Clone)]
pub enum KvConnection {
    Redis(RedisConnection),
    Memory(Arc<MemoryStore>),
}

impl KvConnection {
    /// Connect to a Redis-compatible server at `url` (e.g. `redis://127.0.0.1:6379`).
    pub async fn connect(url: &str) -> Result<Self> {
        let client = redis::Client::open(url).map_err(CoreError::from)?;
        let connection = client.get_multiplexed_async_connection().await.map_err(CoreError::from)?;
        Ok(KvConnection::Redis(RedisConnection {
            connection: Arc::new(Mutex::new(connection)),
        }))
    }

    /// An in-memory fake backend, for tests.
    pub fn memory() -> Self {
        KvConnection::Memory(Arc::new(MemoryStore::default()))
    }

    /// Drop every key this `Core` knows about.
    pub async fn flush_db(&self) -> Result<()> {
        match self {
            KvConnection::Redis(conn) => {
                let mut guard = conn.connection.lock().await;
                redis::cmd("FLUSHDB").query_async(&mut *guard).await.map_err(CoreError::from)
            }
            KvConnection::Memory(store) => {
                let mut state = store.state.lock().await;
                state.strings.clear();
                state.sets.clear();
                Ok(())
            }
        }
    }

    /// Read a string value, or `None` if absent (null).
    pub async fn get(&self, key: &str) -> Result<Option<String>> {
        match self {
            KvConnection::Redis(conn) => {
                let mut guard = conn.connection.lock().await;
                guard.get(key).await.map_err(CoreError::from)
            }
            KvConnection::Memory(store) => {
                let state = store.state.lock().await;
                Ok(state.strings.get(key).cloned())
            }
        }
    }

    /// A set member chosen uniformly at random, or `None` if the set is
    /// empty/absent.
    pub async fn srandmember(&self, key: &str) -> Result<Option<String>> {
        match self {
            KvConnection::Redis(conn) => {
                let mut guard = conn.connection.lock().await;
                guard.srandmember(key).await.map_err(CoreError::from)
            }
            KvConnection::Memory(store) => {
                let state = store.state.lock().await;
                Ok(state.sets.get(key).and_then(|s| s.iter().next().cloned()))
            }
        }
    }

    /// Every member of a set.
    pub async fn smembers(&self, key: &str) -> Result<Vec<String>> {
        match self {
            KvConnection::Redis(conn) => {
                let mut guard = conn.connection.lock().await;
                guard.smembers(key).await.map_err(CoreError::from)
            }
            KvConnection::Memory(store) => {
                let state = store.state.lock().await;
                Ok(state.sets.get(key).map(|s| s.iter().cloned().collect()).unwrap_or_default())
            }
        }
    }

    /// Keys matching `pattern` via a one-shot `KEYS` call.
    pub async fn keys(&self, pattern: &str) -> Result<Vec<String>> {
        match self {
            KvConnection::Redis(conn) => {
                let mut guard = conn.connection.lock().await;
                guard.keys(pattern).await.map_err(CoreError::from)
            }
            KvConnection::Memory(store) => {
                let state = store.state.lock().await;
                Ok(state
                    .strings
                    .keys()
                    .filter(|k| glob_match(pattern, k))
                    .cloned()
                    .collect())
            }
        }
    }

    /// Keys matching `pattern`, collected by driving a cursor-based `SCAN`
    /// to completion.
    pub async fn scan_match(&self, pattern: &str) -> Result<Vec<String>> {
        match self {
            KvConnection::Redis(conn) => {
                let mut guard = conn.connection.lock().await;
                let mut cursor: u64 = 0;
                let mut found = Vec::new();
                loop {
                    let (next_cursor, keys): (u64, Vec<String>) = redis::cmd("SCAN")
                        .arg(cursor)
                        .arg("MATCH")
                        .arg(pattern)
                        .query_async(&mut *guard)
                        .await
                        .map_err(CoreError::from)?;
                    found.extend(keys);
                    if next_cursor == 0 {
                        break;
                    }
                    cursor = next_cursor;
                }
                Ok(found)
            }
            // A single-pass scan and KEYS see the same snapshot in the fake;
            // SCAN's only observable advantage (not blocking the server) has
            // no analogue here.
            KvConnection::Memory(_) => self.keys(pattern).await,
        }
    }

    /// Run an `InsertPlan` atomically: either every write lands, or none do
    /// and the broken dependency is returned instead.
    pub async fn run_insert_plan(&self, plan: &InsertPlan) -> Result<Option<BrokenDependency>> {
        match self {
            KvConnection::Redis(conn) => run_insert_script(conn, plan).await,
            KvConnection::Memory(store) => Ok(store.run_insert_plan(plan).await),
        }
    }

    /// Run a `DeletePlan` atomically.
    pub async fn run_delete_plan(&self, plan: &DeletePlan) -> Result<()> {
        match self {
            KvConnection::Redis(conn) => run_delete_script(conn, plan).await,
            KvConnection::Memory(store) => {
                store.run_delete_plan(plan).await;
                Ok(())
            }
        }
    }

    /// Check `plan`'s dependencies using `WATCH`ed reads, then commit with a
    /// `MULTI`/`EXEC` pipeline; retries on write conflict up to
    /// [`MAX_TRANSACTION_ATTEMPTS`]. Returns `(broken, retries)`.
    /// `broken = Some(..)` means a dependency would be broken (no retry in
    /// that case — the data itself is inconsistent with the schema, not
    /// merely contended).
    pub async fn run_insert_transactional(&self, plan: &InsertPlan) -> Result<(Option<BrokenDependency>, u32)> {
        match self {
            KvConnection::Redis(conn) => run_insert_transactional_redis(conn, plan).await,
            // The fake holds one global lock; there is no concurrent writer
            // to race against, so the transactional path degenerates to the
            // same atomic check-then-commit as the script path, with zero
            // retries.
            KvConnection::Memory(store) => Ok((store.run_insert_plan(plan).await, 0)),
        }
    }

    /// `MULTI`/`EXEC` pipelined delete, no `WATCH` (deletes never conflict on
    /// a dependency check — they only remove).
    pub async fn run_delete_simple(&self, plan: &DeletePlan) -> Result<()> {
        match self {
            KvConnection::Redis(conn) => run_delete_pipeline_redis(conn, plan).await,
            KvConnection::Memory(store) => {
                store.run_delete_plan(plan).await;
                Ok(())
            }
        }
    }

    /// Validate `plan`'s dependencies on the live connection and, if none are
    /// broken, write directly (no pipelining, no atomicity across fields).
    pub async fn run_insert_simple(&self, plan: &InsertPlan) -> Result<Option<BrokenDependency>> {
        match self {
            KvConnection::Redis(conn) => run_insert_simple_redis(conn, plan).await,
            KvConnection::Memory(store) => Ok(store.run_insert_plan(plan).await),
        }
    }
}

/// A live connection to a Redis-compatible server.
#[derive(Clone)]
pub struct RedisConnection {
    connection: Arc<Mutex<MultiplexedConnection>>,
}

async fn check_insert_dependencies(
    conn: &mut MultiplexedConnection,
    plan: &InsertPlan,
) -> Result<Option<BrokenDependency>> {
    for field in &plan.fields {
        for dependency_key in &field.dependency_keys {
            let existing: Option<String> = conn.srandmember(dependency_key).await.map_err(CoreError::from)?;
            if let Some(existing_member) = existing {
                let expected: Option<String> = conn.get(&existing_member).await.map_err(CoreError::from)?;
                if expected.as_deref() != field.field_value.as_deref() {
                    return Ok(Some(BrokenDependency::from_key(dependency_key)));
                }
            }
        }
    }
    Ok(None)
}

async fn run_insert_simple_redis(conn: &RedisConnection, plan: &InsertPlan) -> Result<Option<BrokenDependency>> {
    let mut guard = conn.connection.lock().await;

    if let Some(broken) = check_insert_dependencies(&mut guard, plan).await? {
        return Ok(Some(broken));
    }

    for field in &plan.fields {
        for dependency_key in &field.dependency_keys {
            let _: () = guard.sadd(dependency_key, &field.field_key).await.map_err(CoreError::from)?;
        }
    }
    let _: () = guard.sadd(&plan.table_key, &plan.key_identifier).await.map_err(CoreError::from)?;
    for field in &plan.fields {
        if let Some(value) = &field.field_value {
            let _: () = guard.set(&field.field_key, value).await.map_err(CoreError::from)?;
        }
    }
    Ok(None)
}

/// Upper bound on optimistic-retry attempts before `TransactionInterrupted`
/// is surfaced (the retry loop is capped defensively).
const MAX_TRANSACTION_ATTEMPTS: u32 = 1_000;

async fn run_insert_transactional_redis(
    conn: &RedisConnection,
    plan: &InsertPlan,
) -> Result<(Option<BrokenDependency>, u32)> {
    let mut guard = conn.connection.lock().await;

    let watch_keys: Vec<&String> = plan
        .fields
        .iter()
        .flat_map(|f| f.dependency_keys.iter())
        .collect();

    let mut retries = 0u32;
    loop {
        if !watch_keys.is_empty() {
            let mut watch_cmd = redis::cmd("WATCH");
            for key in &watch_keys {
                watch_cmd.arg(key.as_str());
            }
            watch_cmd.query_async::<()>(&mut *guard).await.map_err(CoreError::from)?;
        }

        if let Some(broken) = check_insert_dependencies(&mut guard, plan).await? {
            redis::cmd("UNWATCH").query_async::<()>(&mut *guard).await.map_err(CoreError::from)?;
            return Ok((Some(broken), retries));
        }

        let mut pipe = redis::pipe();
        pipe.atomic();
        for field in &plan.fields {
            for dependency_key in &field.dependency_keys {
                pipe.sadd(dependency_key, &field.field_key);
            }
        }
        pipe.sadd(&plan.table_key, &plan.key_identifier);
        for field in &plan.fields {
            if let Some(value) = &field.field_value {
                pipe.set(&field.field_key, value);
            }
        }

        let result: Option<()> = pipe.query_async(&mut *guard).await.map_err(CoreError::from)?;
        match result {
            Some(()) => return Ok((None, retries)),
            None => {
                retries += 1;
                if retries >= MAX_TRANSACTION_ATTEMPTS {
                    return Err(CoreError::TransactionInterrupted { attempts: retries });
                }
                debug!(retries, "transaction aborted by a concurrent writer, retrying");
                continue;
            }
        }
    }
}

async fn run_delete_pipeline_redis(conn: &RedisConnection, plan: &DeletePlan) -> Result<()> {
    let mut guard = conn.connection.lock().await;
    let mut pipe = redis::pipe();
    pipe.atomic();
    for field in &plan.fields {
        for dependency_key in &field.dependency_keys {
            pipe.srem(dependency_key, &field.field_key);
        }
        pipe.del(&field.field_key);
    }
    pipe.srem(&plan.table_key, &plan.key_identifier);
    let _: () = pipe.query_async(&mut *guard).await.map_err(CoreError::from)?;
    Ok(())
}

async fn run_insert_script(conn: &RedisConnection, plan: &InsertPlan) -> Result<Option<BrokenDependency>> {
    let mut keys: Vec<&str> = vec![plan.table_key.as_str()];
    let mut args: Vec<String> = vec![plan.key_identifier.clone()];

    for field in &plan.fields {
        keys.push(field.field_key.as_str());
        match &field.field_value {
            Some(value) => {
                args.push("1".to_string());
                args.push(value.clone());
            }
            None => {
                args.push("0".to_string());
                args.push(String::new());
            }
        }
        args.push(field.dependency_keys.len().to_string());
        for dependency_key in &field.dependency_keys {
            keys.push(dependency_key.as_str());
        }
    }

    let script = redis::Script::new(INSERT_SCRIPT);
    let mut invocation = script.prepare_invoke();
    for key in &keys {
        invocation.key(*key);
    }
    for arg in &args {
        invocation.arg(arg);
    }

    let mut guard = conn.connection.lock().await;
    match invocation.invoke_async::<String>(&mut *guard).await {
        Ok(_) => Ok(None),
        Err(err) => match extract_broken_dependency(&err.to_string()) {
            Some(broken) => Ok(Some(broken)),
            None => Err(CoreError::from(err)),
        },
    }
}

/// Pulls the offending dependency-index key out of a `DEPENDENCY_BROKEN:<key>`
/// error reply from [`INSERT_SCRIPT`], however the client has wrapped it.
fn extract_broken_dependency(message: &str) -> Option<BrokenDependency> {
    const MARKER: &str = "DEPENDENCY_BROKEN:";
    let after = &message[message.find(MARKER)? + MARKER.len()..];
    let key = after.split(|c: char| c.is_whitespace() || c == '"' || c == '\'').next()?;
    Some(BrokenDependency::from_key(key))
}

async fn run_delete_script(conn: &RedisConnection, plan: &DeletePlan) -> Result<()> {
    let mut keys: Vec<&str> = vec![plan.table_key.as_str()];
    let mut args: Vec<String> = vec![plan.key_identifier.clone()];

    for field in &plan.fields {
        keys.push(field.field_key.as_str());
        args.push(field.dependency_keys.len().to_string());
        for dependency_key in &field.dependency_keys {
            keys.push(dependency_key.as_str());
        }
    }

    let script = redis::Script::new(DELETE_SCRIPT);
    let mut invocation = script.prepare_invoke();
    for key in &keys {
        invocation.key(*key);
    }
    for arg in &args {
        invocation.arg(arg);
    }

    let mut guard = conn.connection.lock().await;
    invocation.invoke_async::<String>(&mut *guard).await.map_err(CoreError::from)?;
    Ok(())
}

#[derive(Debug, Default)]
struct MemoryState {
    strings: HashMap<String, String>,
    sets: HashMap<String, HashSet<String>>,
}

/// In-memory KV fake: a single mutex-guarded map of strings and a map of
/// sets, enough to satisfy every operation `Core` performs without a live
/// server.
#[derive(Debug, Default)]
pub struct MemoryStore {
    state: Mutex<MemoryState>,
}

impl MemoryStore {
    async fn run_insert_plan(&self, plan: &InsertPlan) -> Option<BrokenDependency> {
        let mut state = self.state.lock().await;

        for field in &plan.fields {
            for dependency_key in &field.dependency_keys {
                if let Some(existing_member) = state.sets.get(dependency_key).and_then(|s| s.iter().next()) {
                    let expected = state.strings.get(existing_member).cloned();
                    if expected.as_deref() != field.field_value.as_deref() {
                        return Some(BrokenDependency::from_key(dependency_key));
                    }
                }
            }
        }

        for field in &plan.fields {
            for dependency_key in &field.dependency_keys {
                state
                    .sets
                    .entry(dependency_key.clone())
                    .or_default()
                    .insert(field.field_key.clone());
            }
        }
        state.sets.entry(plan.table_key.clone()).or_default().insert(plan.key_identifier.clone());
        for field in &plan.fields {
            if let Some(value) = &field.field_value {
                state.strings.insert(field.field_key.clone(), value.clone());
            }
        }
        None
    }

    async fn run_delete_plan(&self, plan: &DeletePlan) {
        let mut state = self.state.lock().await;
        for field in &plan.fields {
            for dependency_key in &field.dependency_keys {
                if let Some(set) = state.sets.get_mut(dependency_key) {
                    set.remove(&field.field_key);
                }
            }
            state.strings.remove(&field.field_key);
        }
        if let Some(set) = state.sets.get_mut(&plan.table_key) {
            set.remove(&plan.key_identifier);
        }
    }
}

/// Minimal glob matcher supporting the only wildcard the table-iteration
/// patterns use: a single trailing `*`.
fn glob_match(pattern: &str, candidate: &str) -> bool {
    match pattern.strip_suffix('*') {
        Some(prefix) => candidate.starts_with(prefix),
        None => pattern == candidate,
    }
}
