//! Host Registry: the process-wide directory of instances.
//!
//! Generalizes rtrtr's `Manager.units: HashMap<String, GateAgent>` from "one
//! map of named components wired together by gates" to "one map of
//! independent instances" -- this spec has no inter-instance data flow, so
//! there is nothing playing the role of `comms::Gate`/`Link` here.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use crate::error::{Error, Result};
use crate::instance::{Instance, InstanceConfig};
use crate::store::Store;

/// The key instances are looked up by, compared case-insensitively.
fn fold_key(id: &str) -> String {
    id.to_lowercase()
}

/// Process-wide instance directory keyed by instance id.
///
/// Backed by a single `RwLock`-guarded map, the same single-writer /
/// multiple-reader discipline [`crate::registry::StumpRegistry`] uses for
/// its own map -- `Create`/`Delete` take the write guard, `Find`/`FindAll`
/// take the read guard.
pub struct HostRegistry {
    store: Arc<dyn Store>,
    instances: RwLock<HashMap<String, Arc<Instance>>>,
}

impl HostRegistry {
    pub fn new(store: Arc<dyn Store>) -> Self {
        HostRegistry { store, instances: RwLock::new(HashMap::new()) }
    }

    /// Creates and registers a new instance, but does not start it.
    ///
    /// Fails with [`Error::InvalidArgument`] if `host_name` is empty or
    /// `port` is outside `[1, 65535]`; `port = 0` is treated as "not yet
    /// assigned" and is rejected the same as any other out-of-range value,
    /// since the spec requires a concrete listening port at creation time.
    pub fn create(
        &self,
        host_name: impl Into<String>,
        port: u16,
        use_secure_transport: bool,
        auto_start: bool,
    ) -> Result<Arc<Instance>> {
        let host_name = host_name.into();
        if host_name.trim().is_empty() {
            return Err(Error::invalid_argument("external host name must not be empty"));
        }
        if port == 0 {
            return Err(Error::invalid_argument("listening port must be in 1-65535"));
        }

        let config = InstanceConfig {
            instance_id: uuid::Uuid::new_v4().to_string(),
            external_host_name: Some(host_name),
            use_secure_transport_upstream: use_secure_transport,
            listening_port: port,
            auto_start,
            stumps_enabled: true,
            record_traffic: false,
            recording_behavior: crate::instance::RecordingBehavior::LeaveStumpsUnchanged,
            fallback_response: crate::instance::FallbackResponse::Http404NotFound,
        };

        self.register(config)
    }

    /// Registers an already-built config as a new instance, persisting it
    /// via the data-access collaborator.
    fn register(&self, config: InstanceConfig) -> Result<Arc<Instance>> {
        let key = fold_key(&config.instance_id);
        let mut instances = self.instances.write().unwrap();
        if instances.contains_key(&key) {
            return Err(Error::invalid_argument(format!(
                "instance '{}' already exists", config.instance_id
            )));
        }
        self.store.proxy_server_create(config.clone())?;
        let instance = Instance::new(config, self.store.clone());
        instances.insert(key, instance.clone());
        Ok(instance)
    }

    /// Removes and disposes an instance. Fails with [`Error::NotFound`] if
    /// `id` is not registered.
    pub async fn delete(&self, id: &str) -> Result<()> {
        let instance = {
            let mut instances = self.instances.write().unwrap();
            instances.remove(&fold_key(id))
                .ok_or_else(|| Error::not_found(format!("instance '{id}' not found")))?
        };
        instance.dispose().await?;
        self.store.proxy_server_delete(id)?;
        Ok(())
    }

    /// Returns the instance registered under `id`.
    pub fn find(&self, id: &str) -> Result<Arc<Instance>> {
        self.instances.read().unwrap().get(&fold_key(id)).cloned()
            .ok_or_else(|| Error::not_found(format!("instance '{id}' not found")))
    }

    /// Returns a stable snapshot of all registered instances.
    pub fn find_all(&self) -> Vec<Arc<Instance>> {
        self.instances.read().unwrap().values().cloned().collect()
    }

    /// Starts a single instance by id.
    pub async fn start(&self, id: &str) -> Result<()> {
        self.find(id)?.start().await
    }

    /// Stops a single instance by id.
    pub async fn stop(&self, id: &str) -> Result<()> {
        self.find(id)?.shutdown().await
    }

    /// Starts every registered instance whose `auto_start` flag is set.
    pub async fn start_all(&self) -> Result<()> {
        for instance in self.find_all() {
            if instance.auto_start() {
                instance.start().await?;
            }
        }
        Ok(())
    }

    /// Stops every registered instance, regardless of configuration.
    pub async fn stop_all(&self) -> Result<()> {
        for instance in self.find_all() {
            instance.shutdown().await?;
        }
        Ok(())
    }

    /// Reads previously persisted instance descriptors from the data-access
    /// collaborator and registers them without starting them -- callers
    /// that also want auto-started instances running should follow with
    /// [`start_all`](Self::start_all).
    pub fn load(&self) -> Result<()> {
        let configs = self.store.proxy_server_find_all()?;
        let mut instances = self.instances.write().unwrap();
        for config in configs {
            let key = fold_key(&config.instance_id);
            if instances.contains_key(&key) {
                continue;
            }
            instances.insert(key, Instance::new(config, self.store.clone()));
        }
        Ok(())
    }
}
