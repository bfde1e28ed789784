//! The persistence collaborator.
//!
//! The core treats on-disk representation as out of scope (spec §6): it
//! depends only on this trait, the way rtrtr's units depend on `comms::Gate`
//! rather than on a concrete transport. [`InMemoryStore`] is the
//! implementation used by the CLI bootstrap and by tests; a real deployment
//! would swap in a file- or database-backed implementation without the
//! core noticing.

use std::collections::HashMap;
use std::sync::RwLock;

use crate::error::{Error, Result};
use crate::instance::InstanceConfig;

/// A persisted stump: enough to reconstruct a [`crate::stump::Stump`]
/// without going through the administrative rule-building API.
#[derive(Clone, Debug)]
pub struct StumpRecord {
    pub id: String,
    pub name: String,
    pub request_body: String,
    pub response_body: String,
}

/// The data-access interface the core depends on (spec §6). Entities are
/// treated as plain records; persistence failures are reported as
/// [`Error::PersistenceFailure`].
pub trait Store: Send + Sync {
    fn proxy_server_find(&self, id: &str) -> Result<InstanceConfig>;
    fn proxy_server_find_all(&self) -> Result<Vec<InstanceConfig>>;
    fn proxy_server_create(&self, entity: InstanceConfig) -> Result<()>;
    fn proxy_server_delete(&self, id: &str) -> Result<()>;

    fn stump_find_all(&self, server_id: &str) -> Result<Vec<StumpRecord>>;
    fn stump_create(
        &self, server_id: &str, entity: StumpRecord, request_body: &str, response_body: &str,
    ) -> Result<()>;
    fn stump_delete(&self, server_id: &str, stump_id: &str) -> Result<()>;
}

#[derive(Default)]
struct State {
    servers: HashMap<String, InstanceConfig>,
    stumps: HashMap<String, Vec<StumpRecord>>,
}

/// A process-local, non-persistent [`Store`] backed by a `RwLock`-guarded
/// map. Sufficient for CLI bootstrap and for exercising the core without a
/// real database.
#[derive(Default)]
pub struct InMemoryStore {
    state: RwLock<State>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Store for InMemoryStore {
    fn proxy_server_find(&self, id: &str) -> Result<InstanceConfig> {
        self.state.read().unwrap().servers.get(id).cloned()
            .ok_or_else(|| Error::not_found(format!("instance '{id}' not found")))
    }

    fn proxy_server_find_all(&self) -> Result<Vec<InstanceConfig>> {
        Ok(self.state.read().unwrap().servers.values().cloned().collect())
    }

    fn proxy_server_create(&self, entity: InstanceConfig) -> Result<()> {
        let mut state = self.state.write().unwrap();
        if state.servers.contains_key(&entity.instance_id) {
            return Err(Error::invalid_argument(format!(
                "instance '{}' already exists", entity.instance_id
            )));
        }
        state.servers.insert(entity.instance_id.clone(), entity);
        Ok(())
    }

    fn proxy_server_delete(&self, id: &str) -> Result<()> {
        let mut state = self.state.write().unwrap();
        if state.servers.remove(id).is_none() {
            return Err(Error::not_found(format!("instance '{id}' not found")));
        }
        state.stumps.remove(id);
        Ok(())
    }

    fn stump_find_all(&self, server_id: &str) -> Result<Vec<StumpRecord>> {
        Ok(self.state.read().unwrap().stumps.get(server_id).cloned().unwrap_or_default())
    }

    fn stump_create(
        &self, server_id: &str, entity: StumpRecord, _request_body: &str, _response_body: &str,
    ) -> Result<()> {
        let mut state = self.state.write().unwrap();
        state.stumps.entry(server_id.to_string()).or_default().push(entity);
        Ok(())
    }

    fn stump_delete(&self, server_id: &str, stump_id: &str) -> Result<()> {
        let mut state = self.state.write().unwrap();
        let stumps = state.stumps.get_mut(server_id)
            .ok_or_else(|| Error::not_found(format!("instance '{server_id}' not found")))?;
        let before = stumps.len();
        stumps.retain(|s| s.id != stump_id);
        if stumps.len() == before {
            return Err(Error::not_found(format!("stump '{stump_id}' not found")));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::instance::{FallbackResponse, RecordingBehavior};

    fn config(id: &str) -> InstanceConfig {
        InstanceConfig {
            instance_id: id.into(),
            external_host_name: None,
            use_secure_transport_upstream: false,
            listening_port: 7001,
            auto_start: false,
            stumps_enabled: true,
            record_traffic: false,
            recording_behavior: RecordingBehavior::LeaveStumpsUnchanged,
            fallback_response: FallbackResponse::Http404NotFound,
        }
    }

    #[test]
    fn create_find_delete_round_trips() {
        let store = InMemoryStore::new();
        store.proxy_server_create(config("a")).unwrap();
        assert_eq!(store.proxy_server_find("a").unwrap().instance_id, "a");
        store.proxy_server_delete("a").unwrap();
        assert!(matches!(store.proxy_server_find("a"), Err(Error::NotFound(_))));
    }

    #[test]
    fn duplicate_create_is_invalid_argument() {
        let store = InMemoryStore::new();
        store.proxy_server_create(config("a")).unwrap();
        assert!(matches!(store.proxy_server_create(config("a")), Err(Error::InvalidArgument(_))));
    }

    #[test]
    fn stump_create_find_delete() {
        let store = InMemoryStore::new();
        store.proxy_server_create(config("a")).unwrap();
        store.stump_create("a", StumpRecord {
            id: "s1".into(), name: "demo".into(), request_body: String::new(), response_body: String::new(),
        }, "", "").unwrap();
        assert_eq!(store.stump_find_all("a").unwrap().len(), 1);
        store.stump_delete("a", "s1").unwrap();
        assert!(store.stump_find_all("a").unwrap().is_empty());
        assert!(matches!(store.stump_delete("a", "s1"), Err(Error::NotFound(_))));
    }
}
