//! Per-instance stump registry.
//!
//! Mirrors rtrtr's habit of pairing an insertion-ordered list with a
//! lookup map behind a single lock (cf. `comms::Gate`'s `Slab` of update
//! senders) rather than using a `BTreeMap`/`IndexMap`: we need both O(1)
//! lookup by id and stable insertion-order iteration for stump matching.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use crate::error::{Error, Result};
use crate::stump::{CannedResponse, Stump, StumpId, StumpName};

/// A request to create a stump, supplied by the administrative caller.
pub struct StumpContract {
    /// If absent, an id is generated.
    pub id: Option<StumpId>,
    pub name: StumpName,
    pub rules: Vec<Box<dyn crate::rules::MatchRule>>,
    pub response: CannedResponse,
}

struct State {
    /// Stump ids in insertion order.
    order: Vec<StumpId>,
    by_id: HashMap<StumpId, Arc<Stump>>,
}

impl State {
    fn new() -> Self {
        State { order: Vec::new(), by_id: HashMap::new() }
    }

    fn name_exists(&self, name: &StumpName) -> bool {
        let key = name.fold_key();
        self.by_id.values().any(|s| s.name().fold_key() == key)
    }
}

/// The per-instance registry of stumps.
pub struct StumpRegistry {
    state: RwLock<State>,
}

impl Default for StumpRegistry {
    fn default() -> Self {
        StumpRegistry { state: RwLock::new(State::new()) }
    }
}

impl StumpRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates and registers a stump from `contract`.
    ///
    /// Assigns an id if none was supplied, enforces case-insensitive name
    /// uniqueness, and appends the stump to the end of insertion order.
    pub fn create_stump(&self, contract: StumpContract) -> Result<StumpId> {
        let mut state = self.state.write().unwrap();
        if state.name_exists(&contract.name) {
            return Err(Error::invalid_argument(format!(
                "stump name '{}' already exists", contract.name
            )));
        }
        let id = contract.id.unwrap_or_else(StumpId::generate);
        if state.by_id.contains_key(&id) {
            return Err(Error::invalid_argument(format!(
                "stump id '{id}' already exists"
            )));
        }

        let mut stump = Stump::new(id.clone(), contract.name);
        for rule in contract.rules {
            stump.add_rule(rule);
        }
        stump.set_response(contract.response);

        state.order.push(id.clone());
        state.by_id.insert(id.clone(), Arc::new(stump));
        Ok(id)
    }

    /// Removes a stump by id.
    ///
    /// Fails with [`Error::NotFound`] if `id` is not registered.
    pub fn delete_stump(&self, id: &StumpId) -> Result<()> {
        let mut state = self.state.write().unwrap();
        if state.by_id.remove(id).is_none() {
            return Err(Error::not_found(format!("stump '{id}' not found")));
        }
        state.order.retain(|existing| existing != id);
        Ok(())
    }

    /// Returns the stump registered under `id`.
    pub fn find_stump(&self, id: &StumpId) -> Result<Arc<Stump>> {
        let state = self.state.read().unwrap();
        state.by_id.get(id).cloned()
            .ok_or_else(|| Error::not_found(format!("stump '{id}' not found")))
    }

    /// Returns a stable snapshot of all stumps in insertion order.
    ///
    /// Because this clones `Arc` handles into a fresh `Vec`, later
    /// `create_stump`/`delete_stump` calls cannot affect what was already
    /// returned (spec invariant 8).
    pub fn find_all_contracts(&self) -> Vec<Arc<Stump>> {
        let state = self.state.read().unwrap();
        state.order.iter()
            .filter_map(|id| state.by_id.get(id).cloned())
            .collect()
    }

    /// Returns whether `name` is already registered, case-insensitively.
    pub fn stump_name_exists(&self, name: &StumpName) -> bool {
        let state = self.state.read().unwrap();
        state.name_exists(name)
    }

    pub fn len(&self) -> usize {
        self.state.read().unwrap().order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
