//! Instance: one mocked upstream host, tying together a listener, a stump
//! registry, a recording buffer, and the request counters.
//!
//! Mirrors the way rtrtr's `Unit`/`Target` pair holds its own `gate`/`comms`
//! plumbing plus an `ArcSwap` over its mutable configuration -- here a
//! single `Instance` plays both roles, since this spec has no inter-unit
//! data flow to route.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use arc_swap::ArcSwap;

use crate::error::{Error, Result};
use crate::listener::Listener;
use crate::pipeline;
use crate::recording::{RecordedContext, RecordingBuffer};
use crate::registry::{StumpContract, StumpRegistry};
use crate::request::IncomingRequest;
use crate::store::{Store, StumpRecord};
use crate::stump::{Stump, StumpId, StumpName};

/// How enabling traffic recording interacts with `stumpsEnabled`.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum RecordingBehavior {
    DisableStumpsWhileRecording,
    LeaveStumpsUnchanged,
}

/// The synthetic response written when neither a stump nor a relay handles
/// the request.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum FallbackResponse {
    Http404NotFound,
    Http503ServiceUnavailable,
}

/// The mutable configuration of an instance. Swapped atomically as a whole
/// via [`ArcSwap`] so readers (the hot request path) never block on a
/// writer (an administrative setter).
#[derive(Clone, Debug)]
pub struct InstanceConfig {
    pub instance_id: String,
    /// Empty means "no upstream"; the pipeline then skips straight to
    /// fallback.
    pub external_host_name: Option<String>,
    pub use_secure_transport_upstream: bool,
    pub listening_port: u16,
    pub auto_start: bool,
    pub stumps_enabled: bool,
    pub record_traffic: bool,
    pub recording_behavior: RecordingBehavior,
    pub fallback_response: FallbackResponse,
}

/// Monotonically non-decreasing request counters, incremented exactly once
/// per served request after the response is written (spec invariant 6).
#[derive(Default)]
struct Counters {
    total: AtomicU64,
    stump: AtomicU64,
    proxy: AtomicU64,
}

/// A snapshot of an instance's counters at one point in time.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct CounterSnapshot {
    pub total_requests_served: u64,
    pub requests_served_with_stump: u64,
    pub requests_served_with_proxy: u64,
}

pub struct Instance {
    config: ArcSwap<InstanceConfig>,
    /// The `stumpsEnabled` value snapshotted the moment recording was
    /// turned on with `DisableStumpsWhileRecording`, restored when
    /// recording is turned back off. `None` means no snapshot is pending.
    prior_stumps_enabled: ArcSwap<Option<bool>>,
    stump_registry: Arc<StumpRegistry>,
    recording_buffer: Arc<RecordingBuffer>,
    http_client: reqwest::Client,
    counters: Counters,
    listener: Listener,
    disposed: AtomicBool,
    /// The data-access collaborator stump CRUD persists through (spec §6).
    store: Arc<dyn Store>,
}

impl Instance {
    pub fn new(config: InstanceConfig, store: Arc<dyn Store>) -> Arc<Self> {
        let port = config.listening_port;
        Arc::new(Instance {
            config: ArcSwap::from_pointee(config),
            prior_stumps_enabled: ArcSwap::from_pointee(None),
            stump_registry: Arc::new(StumpRegistry::new()),
            recording_buffer: Arc::new(RecordingBuffer::new()),
            http_client: crate::relay::build_client(),
            counters: Counters::default(),
            listener: Listener::new(port),
            disposed: AtomicBool::new(false),
            store,
        })
    }

    pub fn id(&self) -> String {
        self.config.load().instance_id.clone()
    }

    pub fn external_host_name(&self) -> Option<String> {
        self.config.load().external_host_name.clone()
    }

    pub fn use_secure_transport_upstream(&self) -> bool {
        self.config.load().use_secure_transport_upstream
    }

    pub fn listening_port(&self) -> u16 {
        self.config.load().listening_port
    }

    /// The port actually bound by the listener, which may differ from
    /// [`listening_port`](Self::listening_port) when the instance was
    /// configured with the ephemeral port `0`.
    pub fn bound_port(&self) -> u16 {
        self.listener.port()
    }

    pub fn auto_start(&self) -> bool {
        self.config.load().auto_start
    }

    pub fn stumps_enabled(&self) -> bool {
        self.config.load().stumps_enabled
    }

    pub fn record_traffic(&self) -> bool {
        self.config.load().record_traffic
    }

    pub fn fallback_response(&self) -> FallbackResponse {
        self.config.load().fallback_response
    }

    pub fn http_client(&self) -> &reqwest::Client {
        &self.http_client
    }

    pub fn stump_registry(&self) -> &StumpRegistry {
        &self.stump_registry
    }

    fn ensure_not_disposed(&self) -> Result<()> {
        if self.disposed.load(Ordering::SeqCst) {
            return Err(Error::invalid_state("instance has been disposed"));
        }
        Ok(())
    }

    fn replace_config(&self, f: impl FnOnce(&mut InstanceConfig)) {
        let mut next = (**self.config.load()).clone();
        f(&mut next);
        self.config.store(Arc::new(next));
    }

    /// Implements spec invariant 7: turning recording on under
    /// `DisableStumpsWhileRecording` forces `stumpsEnabled = false` and
    /// remembers the prior value; turning it off restores that value.
    /// Idempotent across repeated enables/disables.
    pub fn set_record_traffic(&self, enabled: bool) -> Result<()> {
        self.ensure_not_disposed()?;
        let behavior = self.config.load().recording_behavior;
        if behavior == RecordingBehavior::DisableStumpsWhileRecording {
            if enabled {
                if self.prior_stumps_enabled.load().is_none() {
                    let current = self.config.load().stumps_enabled;
                    self.prior_stumps_enabled.store(Arc::new(Some(current)));
                }
                self.replace_config(|c| {
                    c.record_traffic = true;
                    c.stumps_enabled = false;
                });
            } else {
                let prior = **self.prior_stumps_enabled.load();
                self.replace_config(|c| {
                    c.record_traffic = false;
                    if let Some(prior) = prior {
                        c.stumps_enabled = prior;
                    }
                });
                self.prior_stumps_enabled.store(Arc::new(None));
            }
        } else {
            self.replace_config(|c| c.record_traffic = enabled);
        }
        Ok(())
    }

    pub fn set_stumps_enabled(&self, enabled: bool) -> Result<()> {
        self.ensure_not_disposed()?;
        self.replace_config(|c| c.stumps_enabled = enabled);
        Ok(())
    }

    /// Registers `contract` and persists it via the data-access
    /// collaborator (spec §4.2). If persistence fails, the just-registered
    /// stump is rolled back so the registry and store never disagree.
    pub fn create_stump(&self, contract: StumpContract) -> Result<StumpId> {
        self.ensure_not_disposed()?;
        let request_body = contract.rules.iter().map(|r| r.describe()).collect::<Vec<_>>().join("; ");
        let response_body = String::from_utf8_lossy(&contract.response.body).into_owned();
        let name = contract.name.as_str().to_string();

        let id = self.stump_registry.create_stump(contract)?;
        let record = StumpRecord {
            id: id.as_str().to_string(),
            name,
            request_body: request_body.clone(),
            response_body: response_body.clone(),
        };
        if let Err(err) = self.store.stump_create(&self.id(), record, &request_body, &response_body) {
            let _ = self.stump_registry.delete_stump(&id);
            return Err(err);
        }
        Ok(id)
    }

    /// Removes `id` from the registry and persists the removal via the
    /// data-access collaborator (spec §4.2).
    pub fn delete_stump(&self, id: &StumpId) -> Result<()> {
        self.ensure_not_disposed()?;
        self.stump_registry.delete_stump(id)?;
        self.store.stump_delete(&self.id(), id.as_str())
    }

    pub fn find_stump(&self, id: &StumpId) -> Result<Arc<Stump>> {
        self.ensure_not_disposed()?;
        self.stump_registry.find_stump(id)
    }

    pub fn find_all_contracts(&self) -> Result<Vec<Arc<Stump>>> {
        self.ensure_not_disposed()?;
        Ok(self.stump_registry.find_all_contracts())
    }

    pub fn stump_name_exists(&self, name: &StumpName) -> Result<bool> {
        self.ensure_not_disposed()?;
        Ok(self.stump_registry.stump_name_exists(name))
    }

    pub fn counters(&self) -> CounterSnapshot {
        CounterSnapshot {
            total_requests_served: self.counters.total.load(Ordering::Relaxed),
            requests_served_with_stump: self.counters.stump.load(Ordering::Relaxed),
            requests_served_with_proxy: self.counters.proxy.load(Ordering::Relaxed),
        }
    }

    pub fn recordings(&self) -> Vec<RecordedContext> {
        self.recording_buffer.snapshot()
    }

    pub fn clear_recordings(&self) {
        self.recording_buffer.clear();
    }

    /// Called by the listener once a response has been written: applies
    /// the counter increments and the recording hook (spec §4.3).
    pub fn finish_request(&self, request: IncomingRequest, served: &pipeline::ServedResponse) {
        self.counters.total.fetch_add(1, Ordering::Relaxed);
        match served.outcome {
            pipeline::Outcome::Stump => { self.counters.stump.fetch_add(1, Ordering::Relaxed); }
            pipeline::Outcome::Proxy => { self.counters.proxy.fetch_add(1, Ordering::Relaxed); }
            pipeline::Outcome::Fallback => {}
        }
        if self.record_traffic() {
            self.recording_buffer.append(pipeline::record(request, served));
        }
    }

    /// Starts the listener. Tolerates being called while already running.
    pub async fn start(self: &Arc<Self>) -> Result<()> {
        self.ensure_not_disposed()?;
        self.listener.start(self.clone()).await
    }

    /// Stops the listener. Tolerates being called while already stopped.
    pub async fn shutdown(&self) -> Result<()> {
        self.ensure_not_disposed()?;
        self.listener.shutdown().await
    }

    /// Shuts down if running, disposes the listener, and marks the
    /// instance terminal. Idempotent: a second call is a no-op.
    pub async fn dispose(&self) -> Result<()> {
        if self.disposed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        self.listener.dispose().await;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::InMemoryStore;

    fn test_store() -> Arc<dyn Store> {
        Arc::new(InMemoryStore::new())
    }

    fn config(id: &str) -> InstanceConfig {
        InstanceConfig {
            instance_id: id.into(),
            external_host_name: None,
            use_secure_transport_upstream: false,
            listening_port: 0,
            auto_start: false,
            stumps_enabled: true,
            record_traffic: false,
            recording_behavior: RecordingBehavior::DisableStumpsWhileRecording,
            fallback_response: FallbackResponse::Http503ServiceUnavailable,
        }
    }

    #[test]
    fn enabling_recording_disables_stumps_and_restores_on_disable() {
        let instance = Instance::new(config("i1"), test_store());
        assert!(instance.stumps_enabled());

        instance.set_record_traffic(true).unwrap();
        assert!(!instance.stumps_enabled());
        assert!(instance.record_traffic());

        instance.set_record_traffic(false).unwrap();
        assert!(instance.stumps_enabled());
        assert!(!instance.record_traffic());
    }

    #[test]
    fn leave_stumps_unchanged_behavior_does_not_touch_stumps_enabled() {
        let mut cfg = config("i1");
        cfg.recording_behavior = RecordingBehavior::LeaveStumpsUnchanged;
        let instance = Instance::new(cfg, test_store());
        instance.set_stumps_enabled(false).unwrap();

        instance.set_record_traffic(true).unwrap();
        assert!(!instance.stumps_enabled());
        instance.set_record_traffic(false).unwrap();
        assert!(!instance.stumps_enabled());
    }

    #[tokio::test]
    async fn dispose_is_idempotent_and_fails_later_operations() {
        let instance = Instance::new(config("i1"), test_store());
        instance.dispose().await.unwrap();
        instance.dispose().await.unwrap();
        assert!(matches!(instance.set_stumps_enabled(true), Err(Error::InvalidState(_))));
    }

    #[test]
    fn create_and_delete_stump_persist_through_the_store() {
        use crate::rules::MethodEquals;
        use crate::stump::{CannedResponse, StumpName};

        let store = test_store();
        let instance = Instance::new(config("i1"), store.clone());
        let id = instance.create_stump(StumpContract {
            id: None,
            name: StumpName::new("demo").unwrap(),
            rules: vec![Box::new(MethodEquals { method: "GET".into() })],
            response: CannedResponse::new(200, "ok").unwrap(),
        }).unwrap();

        let persisted = store.stump_find_all("i1").unwrap();
        assert_eq!(persisted.len(), 1);
        assert_eq!(persisted[0].id, id.as_str());
        assert_eq!(persisted[0].name, "demo");

        instance.delete_stump(&id).unwrap();
        assert!(store.stump_find_all("i1").unwrap().is_empty());
    }
}
