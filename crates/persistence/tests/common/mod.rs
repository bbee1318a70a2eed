//! Shared test fixtures: an in-memory dictionary store with statement
//! counters and fault injection.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;

use meridian_persistence::db::ParamValueStore;
use meridian_persistence::error::{DbError, DbResult};
use meridian_persistence::params::{
    CommonCanonicalValueKey, CommonTokenValueKey, LogicalResourceIdentKey, ParameterRow,
};

/// Dictionary tables and inserted parameter rows.
#[derive(Default)]
pub struct StoreState {
    pub parameter_names: HashMap<String, i32>,
    pub code_systems: HashMap<String, i32>,
    pub token_values: HashMap<CommonTokenValueKey, i64>,
    pub canonical_values: HashMap<CommonCanonicalValueKey, i64>,
    pub logical_resource_idents: HashMap<LogicalResourceIdentKey, i64>,
    pub rows: Vec<ParameterRow>,
    next_small: i32,
    next_big: i64,
}

impl StoreState {
    fn next_small_id(&mut self) -> i32 {
        self.next_small += 1;
        self.next_small
    }

    fn next_big_id(&mut self) -> i64 {
        self.next_big += 1;
        self.next_big
    }
}

/// In-memory [`ParamValueStore`] with per-statement counters and injectable
/// transient failures.
#[derive(Default)]
pub struct MockStore {
    state: Mutex<StoreState>,
    statements: Mutex<HashMap<&'static str, usize>>,
    /// How many upcoming parameter-row pushes fail with a deadlock.
    row_push_deadlocks: AtomicUsize,
    /// How many upcoming token-value inserts fail with a deadlock.
    token_insert_deadlocks: AtomicUsize,
}

impl MockStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Number of statements executed for the given operation name.
    pub fn statement_count(&self, name: &str) -> usize {
        self.statements.lock().get(name).copied().unwrap_or(0)
    }

    /// All inserted parameter rows.
    pub fn rows(&self) -> Vec<ParameterRow> {
        self.state.lock().rows.clone()
    }

    /// Number of rows in the token dictionary.
    pub fn token_dictionary_len(&self) -> usize {
        self.state.lock().token_values.len()
    }

    /// Number of rows in the code-system dictionary.
    pub fn code_system_dictionary_len(&self) -> usize {
        self.state.lock().code_systems.len()
    }

    /// Number of rows in the logical-resource-ident dictionary.
    pub fn logical_ident_dictionary_len(&self) -> usize {
        self.state.lock().logical_resource_idents.len()
    }

    /// Number of rows in the canonical-value dictionary.
    pub fn canonical_dictionary_len(&self) -> usize {
        self.state.lock().canonical_values.len()
    }

    /// Arms `n` deadlock failures on parameter-row pushes.
    pub fn arm_row_push_deadlocks(&self, n: usize) {
        self.row_push_deadlocks.store(n, Ordering::SeqCst);
    }

    /// Arms `n` deadlock failures on token-value inserts.
    pub fn arm_token_insert_deadlocks(&self, n: usize) {
        self.token_insert_deadlocks.store(n, Ordering::SeqCst);
    }

    /// Simulates the database rollback of everything this store has minted,
    /// as if the transaction that created the dictionary rows never
    /// committed. Sequences are not rolled back, matching real databases.
    pub fn roll_back_dictionaries(&self) {
        let mut state = self.state.lock();
        state.parameter_names.clear();
        state.code_systems.clear();
        state.token_values.clear();
        state.canonical_values.clear();
        state.logical_resource_idents.clear();
        state.rows.clear();
    }

    fn bump(&self, name: &'static str) {
        *self.statements.lock().entry(name).or_insert(0) += 1;
    }

    fn take_deadlock(counter: &AtomicUsize) -> bool {
        counter
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

#[async_trait]
impl ParamValueStore for MockStore {
    async fn fetch_parameter_name_id(&self, parameter_name: &str) -> DbResult<Option<i32>> {
        self.bump("fetch_parameter_name");
        Ok(self.state.lock().parameter_names.get(parameter_name).copied())
    }

    async fn create_parameter_name(&self, parameter_name: &str) -> DbResult<i32> {
        self.bump("create_parameter_name");
        let mut state = self.state.lock();
        if let Some(id) = state.parameter_names.get(parameter_name) {
            return Ok(*id);
        }
        let id = state.next_small_id();
        state.parameter_names.insert(parameter_name.to_string(), id);
        Ok(id)
    }

    async fn fetch_code_system_ids(&self, code_systems: &[String]) -> DbResult<Vec<(String, i32)>> {
        self.bump("fetch_code_systems");
        let state = self.state.lock();
        Ok(code_systems
            .iter()
            .filter_map(|s| state.code_systems.get(s).map(|id| (s.clone(), *id)))
            .collect())
    }

    async fn insert_code_systems(&self, missing: &[String]) -> DbResult<()> {
        self.bump("insert_code_systems");
        let mut state = self.state.lock();
        for system in missing {
            if !state.code_systems.contains_key(system) {
                let id = state.next_small_id();
                state.code_systems.insert(system.clone(), id);
            }
        }
        Ok(())
    }

    async fn fetch_common_token_value_ids(
        &self,
        keys: &[CommonTokenValueKey],
    ) -> DbResult<Vec<(CommonTokenValueKey, i64)>> {
        self.bump("fetch_token_values");
        let state = self.state.lock();
        Ok(keys
            .iter()
            .filter_map(|k| state.token_values.get(k).map(|id| (k.clone(), *id)))
            .collect())
    }

    async fn insert_common_token_values(&self, missing: &[CommonTokenValueKey]) -> DbResult<()> {
        self.bump("insert_token_values");
        if MockStore::take_deadlock(&self.token_insert_deadlocks) {
            return Err(DbError::deadlock("token value insert chosen as victim"));
        }
        let mut state = self.state.lock();
        for key in missing {
            if !state.token_values.contains_key(key) {
                let id = state.next_big_id();
                state.token_values.insert(key.clone(), id);
            }
        }
        Ok(())
    }

    async fn fetch_canonical_ids(
        &self,
        keys: &[CommonCanonicalValueKey],
    ) -> DbResult<Vec<(CommonCanonicalValueKey, i64)>> {
        self.bump("fetch_canonical_values");
        let state = self.state.lock();
        Ok(keys
            .iter()
            .filter_map(|k| state.canonical_values.get(k).map(|id| (k.clone(), *id)))
            .collect())
    }

    async fn insert_canonical_values(&self, missing: &[CommonCanonicalValueKey]) -> DbResult<()> {
        self.bump("insert_canonical_values");
        let mut state = self.state.lock();
        for key in missing {
            if !state.canonical_values.contains_key(key) {
                let id = state.next_big_id();
                state.canonical_values.insert(key.clone(), id);
            }
        }
        Ok(())
    }

    async fn fetch_logical_resource_ident_ids(
        &self,
        keys: &[LogicalResourceIdentKey],
    ) -> DbResult<Vec<(LogicalResourceIdentKey, i64)>> {
        self.bump("fetch_logical_resource_idents");
        let state = self.state.lock();
        Ok(keys
            .iter()
            .filter_map(|k| state.logical_resource_idents.get(k).map(|id| (k.clone(), *id)))
            .collect())
    }

    async fn insert_logical_resource_idents(
        &self,
        missing: &[LogicalResourceIdentKey],
    ) -> DbResult<()> {
        self.bump("insert_logical_resource_idents");
        let mut state = self.state.lock();
        for key in missing {
            if !state.logical_resource_idents.contains_key(key) {
                let id = state.next_big_id();
                state.logical_resource_idents.insert(key.clone(), id);
            }
        }
        Ok(())
    }

    async fn insert_parameter_rows(&self, rows: &[ParameterRow]) -> DbResult<()> {
        self.bump("insert_parameter_rows");
        if MockStore::take_deadlock(&self.row_push_deadlocks) {
            return Err(DbError::deadlock("row batch chosen as deadlock victim"));
        }
        self.state.lock().rows.extend_from_slice(rows);
        Ok(())
    }
}
