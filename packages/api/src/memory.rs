use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde_json::Value;
use store::{EntityType, RecordId, Role};

use crate::error::{ApiError, Result};
use crate::{RemoteApi, Session};

#[derive(Debug, Default)]
struct State {
    users: HashMap<String, (String, Option<Role>)>,
    tokens: HashSet<String>,
    tables: HashMap<EntityType, BTreeMap<i64, Value>>,
    next_id: i64,
    unreachable: bool,
    failures: usize,
    rejected: HashSet<EntityType>,
    calls: Vec<String>,
}

impl State {
    fn reach(&mut self, call: String) -> Result<()> {
        if self.unreachable {
            return Err(ApiError::Network("server unreachable".to_string()));
        }
        if self.failures > 0 {
            self.failures -= 1;
            return Err(ApiError::Network("connection reset".to_string()));
        }
        self.calls.push(call);
        Ok(())
    }

    fn authorise(&self, token: &str) -> Result<()> {
        if self.tokens.contains(token) {
            Ok(())
        } else {
            Err(ApiError::Auth("token expired".to_string()))
        }
    }

    fn check_rejected(&self, entity: EntityType) -> Result<()> {
        if self.rejected.contains(&entity) {
            return Err(ApiError::Status {
                status: 500,
                body: format!("{entity} rejected"),
            });
        }
        Ok(())
    }
}

fn server_id(id: &RecordId) -> Result<i64> {
    match id {
        RecordId::Server(id) => Ok(*id),
        RecordId::Temp(_) => Err(ApiError::NotFound),
    }
}

/// In-process [`RemoteApi`] used by tests and offline demos.
///
/// Ids are assigned from 1 upwards across all collections. Every call that
/// reaches the server is recorded as `"<METHOD> <entity>[/<id>]"` and can be
/// read back with [`calls`](MemoryApi::calls).
#[derive(Clone, Debug, Default)]
pub struct MemoryApi {
    state: Arc<Mutex<State>>,
}

impl MemoryApi {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn with_user(self, username: &str, password: &str, role: Option<Role>) -> Self {
        self.state()
            .users
            .insert(username.to_string(), (password.to_string(), role));
        self
    }

    /// Register a token directly, skipping login.
    pub fn issue_token(&self, token: &str) {
        self.state().tokens.insert(token.to_string());
    }

    /// Invalidate every issued token.
    pub fn expire_tokens(&self) {
        self.state().tokens.clear();
    }

    pub fn set_reachable(&self, reachable: bool) {
        self.state().unreachable = !reachable;
    }

    /// Fail the next `n` calls with a network error.
    pub fn fail_next(&self, n: usize) {
        self.state().failures = n;
    }

    /// Answer every write of `entity` with a 500 until cleared.
    pub fn reject(&self, entity: EntityType, rejected: bool) {
        let mut state = self.state();
        if rejected {
            state.rejected.insert(entity);
        } else {
            state.rejected.remove(&entity);
        }
    }

    /// Store a record as if it had been created earlier.
    pub fn seed(&self, entity: EntityType, mut record: Value) -> RecordId {
        let mut state = self.state();
        state.next_id += 1;
        let id = state.next_id;
        record["id"] = Value::from(id);
        state.tables.entry(entity).or_default().insert(id, record);
        RecordId::Server(id)
    }

    pub fn records(&self, entity: EntityType) -> Vec<Value> {
        self.state()
            .tables
            .get(&entity)
            .map(|table| table.values().cloned().collect())
            .unwrap_or_default()
    }

    pub fn calls(&self) -> Vec<String> {
        self.state().calls.clone()
    }
}

impl RemoteApi for MemoryApi {
    async fn login(&self, username: &str, password: &str) -> Result<Session> {
        let mut state = self.state();
        state.reach(format!("POST login/{username}"))?;
        let role = match state.users.get(username) {
            Some((expected, role)) if expected == password => *role,
            _ => return Err(ApiError::Auth("invalid credentials".to_string())),
        };
        let token = format!("token-{}-{}", username, state.tokens.len() + 1);
        state.tokens.insert(token.clone());
        Ok(Session { token, role })
    }

    async fn list(&self, token: &str, entity: EntityType) -> Result<Vec<Value>> {
        let mut state = self.state();
        state.reach(format!("GET {entity}"))?;
        state.authorise(token)?;
        Ok(state
            .tables
            .get(&entity)
            .map(|table| table.values().cloned().collect())
            .unwrap_or_default())
    }

    async fn list_aids_for(&self, token: &str, resident: &RecordId) -> Result<Vec<Value>> {
        let mut state = self.state();
        state.reach(format!("GET aid?resident_id={resident}"))?;
        state.authorise(token)?;
        let wanted = Value::from(server_id(resident)?);
        Ok(state
            .tables
            .get(&EntityType::Aid)
            .map(|table| {
                table
                    .values()
                    .filter(|aid| aid.get("resident_id") == Some(&wanted))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn create(&self, token: &str, entity: EntityType, payload: &Value) -> Result<Value> {
        let mut state = self.state();
        state.reach(format!("POST {entity}"))?;
        state.authorise(token)?;
        state.check_rejected(entity)?;
        if !payload.is_object() {
            return Err(ApiError::Status {
                status: 400,
                body: "expected a JSON object".to_string(),
            });
        }
        state.next_id += 1;
        let id = state.next_id;
        let mut record = payload.clone();
        record["id"] = Value::from(id);
        state
            .tables
            .entry(entity)
            .or_default()
            .insert(id, record.clone());
        Ok(record)
    }

    async fn update(
        &self,
        token: &str,
        entity: EntityType,
        id: &RecordId,
        payload: &Value,
    ) -> Result<Value> {
        let mut state = self.state();
        state.reach(format!("PUT {entity}/{id}"))?;
        state.authorise(token)?;
        state.check_rejected(entity)?;
        let id = server_id(id)?;
        let table = state.tables.entry(entity).or_default();
        let Some(slot) = table.get_mut(&id) else {
            return Err(ApiError::NotFound);
        };
        let mut record = payload.clone();
        record["id"] = Value::from(id);
        *slot = record.clone();
        Ok(record)
    }

    async fn delete(&self, token: &str, entity: EntityType, id: &RecordId) -> Result<()> {
        let mut state = self.state();
        state.reach(format!("DELETE {entity}/{id}"))?;
        state.authorise(token)?;
        state.check_rejected(entity)?;
        let id = server_id(id)?;
        match state.tables.get_mut(&entity).and_then(|t| t.remove(&id)) {
            Some(_) => Ok(()),
            None => Err(ApiError::NotFound),
        }
    }

    async fn ping(&self) -> Result<()> {
        if self.state().unreachable {
            return Err(ApiError::Network("server unreachable".to_string()));
        }
        Ok(())
    }
}
