//! HTTP Listener & Dispatcher.
//!
//! Binds synchronously (so bind failures surface before an instance is
//! reported as started, the same reasoning rtrtr's `http::Server::run`
//! documents for its own listeners), then converts to a Tokio listener and
//! accepts connections concurrently, handing each one to
//! [`hyper_util`]'s auto `Builder` the same way `http::Server::single_listener`
//! does.

use std::convert::Infallible;
use std::net::TcpListener as StdListener;
use std::sync::atomic::{AtomicU16, Ordering};
use std::sync::{Arc, Mutex};

use bytes::Bytes;
use http_body_util::combinators::BoxBody;
use http_body_util::{BodyExt, Empty, Full};
use hyper::body::Incoming;
use hyper::Request as HyperRequest;
use hyper::Response as HyperResponse;
use hyper::service::service_fn;
use hyper_util::rt::{TokioExecutor, TokioIo};
use log::{debug, error, warn};
use tokio::net::TcpListener as TokioListener;
use tokio::sync::watch;

use crate::error::{Error, Result};
use crate::instance::Instance;
use crate::pipeline;
use crate::request::IncomingRequest;

type BoxedBody = BoxBody<Bytes, Infallible>;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
enum State {
    Created,
    Running,
    Stopped,
    Disposed,
}

/// Accepts connections on a local port and dispatches each request through
/// the instance's pipeline.
///
/// State machine: `Created -> Running` on [`start`](Self::start),
/// `Running -> Stopped` on [`shutdown`](Self::shutdown), `Stopped ->
/// Running` allowed again, and [`dispose`](Self::dispose) moves to the
/// terminal `Disposed` state, idempotently.
pub struct Listener {
    port: AtomicU16,
    state: Mutex<State>,
    shutdown_tx: Mutex<Option<watch::Sender<bool>>>,
}

impl Listener {
    pub fn new(port: u16) -> Self {
        Listener {
            port: AtomicU16::new(port),
            state: Mutex::new(State::Created),
            shutdown_tx: Mutex::new(None),
        }
    }

    pub fn port(&self) -> u16 {
        self.port.load(Ordering::Relaxed)
    }

    /// Binds (if not already running) and starts accepting connections,
    /// dispatching each request through `instance`'s pipeline.
    ///
    /// Tolerates being called while already running.
    pub async fn start(&self, instance: Arc<Instance>) -> Result<()> {
        {
            let state = self.state.lock().unwrap();
            match *state {
                State::Disposed => {
                    return Err(Error::invalid_state("listener has been disposed"));
                }
                State::Running => return Ok(()),
                State::Created | State::Stopped => {}
            }
        }

        let addr = format!("0.0.0.0:{}", self.port());
        let std_listener = StdListener::bind(&addr).map_err(|e| {
            Error::invalid_state(format!("failed to bind {addr}: {e}"))
        })?;
        std_listener.set_nonblocking(true).map_err(|e| {
            Error::invalid_state(format!("failed to set {addr} non-blocking: {e}"))
        })?;
        let bound_addr = std_listener.local_addr().map_err(|e| {
            Error::invalid_state(format!("failed to read bound address for {addr}: {e}"))
        })?;
        let tokio_listener = TokioListener::from_std(std_listener).map_err(|e| {
            Error::invalid_state(format!("failed to adopt listener for {addr}: {e}"))
        })?;
        // A `listening_port` of 0 asks the OS for an ephemeral port (used by
        // tests); record what was actually bound so callers can find it.
        self.port.store(bound_addr.port(), Ordering::Relaxed);
        debug!("listener for instance {} bound on {bound_addr}", instance.id());

        let (tx, rx) = watch::channel(false);
        *self.shutdown_tx.lock().unwrap() = Some(tx);
        *self.state.lock().unwrap() = State::Running;

        tokio::task::spawn(accept_loop(tokio_listener, instance, rx));
        Ok(())
    }

    /// Signals the accept loop to stop taking new connections. Tolerates
    /// being called while already stopped.
    pub async fn shutdown(&self) -> Result<()> {
        let tx = {
            let mut state = self.state.lock().unwrap();
            match *state {
                State::Disposed => {
                    return Err(Error::invalid_state("listener has been disposed"));
                }
                State::Created | State::Stopped => return Ok(()),
                State::Running => *state = State::Stopped,
            }
            self.shutdown_tx.lock().unwrap().take()
        };
        if let Some(tx) = tx {
            let _ = tx.send(true);
        }
        Ok(())
    }

    /// Shuts down if running and transitions to the terminal state.
    /// Idempotent: a second call is a no-op.
    pub async fn dispose(&self) {
        let already_disposed = {
            let mut state = self.state.lock().unwrap();
            let was = *state == State::Disposed;
            *state = State::Disposed;
            was
        };
        if already_disposed {
            return;
        }
        if let Some(tx) = self.shutdown_tx.lock().unwrap().take() {
            let _ = tx.send(true);
        }
    }
}

async fn accept_loop(
    listener: TokioListener,
    instance: Arc<Instance>,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    debug!("listener for instance {} shutting down", instance.id());
                    return;
                }
            }
            accepted = listener.accept() => {
                let stream = match accepted {
                    Ok((stream, _addr)) => stream,
                    Err(err) => {
                        error!("accept error on instance {}: {err}", instance.id());
                        continue;
                    }
                };
                let instance = instance.clone();
                tokio::task::spawn(async move {
                    let io = TokioIo::new(stream);
                    let result = hyper_util::server::conn::auto::Builder::new(TokioExecutor::new())
                        .serve_connection(io, service_fn(move |req| {
                            let instance = instance.clone();
                            async move { handle(instance, req).await }
                        }))
                        .await;
                    if let Err(err) = result {
                        warn!("connection error: {err}");
                    }
                });
            }
        }
    }
}

async fn handle(
    instance: Arc<Instance>,
    req: HyperRequest<Incoming>,
) -> std::result::Result<HyperResponse<BoxedBody>, Infallible> {
    let incoming = match to_incoming_request(req).await {
        Ok(incoming) => incoming,
        Err(()) => return Ok(bad_request()),
    };

    // Runs the pipeline and its recording/counter hook in its own task: a
    // panic there is caught at the task boundary and reported as a 500
    // (spec §7's "unexpected internal failure") instead of unwinding
    // through hyper's connection state machine for this whole connection.
    let task_instance = instance.clone();
    let task_request = incoming.clone();
    let outcome = tokio::task::spawn(async move {
        let served = pipeline::serve(&task_instance, task_request.clone()).await;
        task_instance.finish_request(task_request, &served);
        served
    }).await;

    match outcome {
        Ok(served) => Ok(to_hyper_response(&served)),
        Err(join_err) => {
            error!("request handler panicked: {join_err}");
            Ok(internal_server_error())
        }
    }
}

async fn to_incoming_request(
    req: HyperRequest<Incoming>,
) -> std::result::Result<IncomingRequest, ()> {
    let (parts, body) = req.into_parts();
    let body = body.collect().await.map_err(|_| ())?.to_bytes();
    let headers = parts.headers.iter()
        .map(|(name, value)| {
            (name.to_string(), value.to_str().unwrap_or("").to_string())
        })
        .collect();
    Ok(IncomingRequest {
        method: parts.method.to_string(),
        path: parts.uri.path().to_string(),
        query: parts.uri.query().map(str::to_string),
        headers,
        body,
    })
}

fn to_hyper_response(served: &pipeline::ServedResponse) -> HyperResponse<BoxedBody> {
    let mut builder = HyperResponse::builder().status(served.status_code);
    for (name, value) in &served.headers {
        builder = builder.header(name, value);
    }
    let body: BoxedBody = if served.body.is_empty() {
        Empty::new().map_err(|never: Infallible| match never {}).boxed()
    } else {
        Full::new(served.body.clone()).map_err(|never: Infallible| match never {}).boxed()
    };
    builder.body(body).unwrap_or_else(|_| {
        HyperResponse::new(Empty::new().map_err(|never: Infallible| match never {}).boxed())
    })
}

fn bad_request() -> HyperResponse<BoxedBody> {
    HyperResponse::builder()
        .status(400)
        .body(Empty::new().map_err(|never: Infallible| match never {}).boxed())
        .expect("static 400 response is always valid")
}

/// The response written when the pipeline task panics (spec §7): no stack
/// trace or detail ever reaches the client.
fn internal_server_error() -> HyperResponse<BoxedBody> {
    HyperResponse::builder()
        .status(500)
        .body(Empty::new().map_err(|never: Infallible| match never {}).boxed())
        .expect("static 500 response is always valid")
}

#[cfg(test)]
mod tests {
    use std::io::{Read, Write};
    use std::net::TcpListener as StdTcpListener;

    use crate::instance::{FallbackResponse, Instance, InstanceConfig, RecordingBehavior};
    use crate::registry::StumpContract;
    use crate::rules::{MethodEquals, PathEquals};
    use crate::store::{InMemoryStore, Store};
    use crate::stump::{CannedResponse, StumpName};

    fn test_store() -> std::sync::Arc<dyn Store> {
        std::sync::Arc::new(InMemoryStore::new())
    }

    fn config(id: &str, external_host_name: Option<String>, fallback: FallbackResponse) -> InstanceConfig {
        InstanceConfig {
            instance_id: id.into(),
            external_host_name,
            use_secure_transport_upstream: false,
            listening_port: 0,
            auto_start: false,
            stumps_enabled: true,
            record_traffic: false,
            recording_behavior: RecordingBehavior::LeaveStumpsUnchanged,
            fallback_response: fallback,
        }
    }

    /// Spawns a one-shot raw TCP stub that writes `response` verbatim to the
    /// first connection it accepts, then closes. Good enough to stand in
    /// for a real upstream host without reaching the network, the same way
    /// the pack's own HTTP-proxy examples stub their upstream in tests.
    fn spawn_stub_upstream(response: &'static str) -> String {
        let listener = StdTcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        std::thread::spawn(move || {
            if let Ok((mut stream, _)) = listener.accept() {
                let mut buf = [0u8; 1024];
                let _ = stream.read(&mut buf);
                let _ = stream.write_all(response.as_bytes());
                let _ = stream.flush();
            }
        });
        addr.to_string()
    }

    async fn start(instance: &std::sync::Arc<Instance>) -> u16 {
        instance.start().await.unwrap();
        // Give the accept loop a moment to be scheduled.
        tokio::task::yield_now().await;
        instance.bound_port()
    }

    /// Enables verbose stderr logging for a test run, mirroring the
    /// teacher's own `test::init_log` helper. `stderrlog` ignores a second
    /// `init()` call from an earlier test in the same process, so callers
    /// don't need to guard against double-init themselves.
    fn init_log() {
        let _ = stderrlog::new().verbosity(5).init();
    }

    /// S1: no stumps, no upstream, fallback = 503.
    #[tokio::test]
    async fn s1_fallback_only() {
        init_log();
        let instance = Instance::new(config("s1", None, FallbackResponse::Http503ServiceUnavailable), test_store());
        let port = start(&instance).await;

        let response = reqwest::get(format!("http://127.0.0.1:{port}/foo")).await.unwrap();
        assert_eq!(response.status().as_u16(), 503);
        assert!(response.bytes().await.unwrap().is_empty());

        let counters = instance.counters();
        assert_eq!(counters.total_requests_served, 1);
        assert_eq!(counters.requests_served_with_proxy, 0);
        assert_eq!(counters.requests_served_with_stump, 0);
    }

    /// S2: relays to upstream when no stump matches.
    #[tokio::test]
    async fn s2_relays_to_upstream() {
        let upstream = spawn_stub_upstream(
            "HTTP/1.1 200 OK\r\nContent-Length: 2\r\nContent-Type: text/plain\r\n\r\nhi",
        );
        let instance = Instance::new(
            config("s2", Some(upstream), FallbackResponse::Http404NotFound), test_store(),
        );
        let port = start(&instance).await;

        let response = reqwest::get(format!("http://127.0.0.1:{port}/a?b=1")).await.unwrap();
        assert_eq!(response.status().as_u16(), 200);
        assert_eq!(response.text().await.unwrap(), "hi");

        let counters = instance.counters();
        assert_eq!(counters.total_requests_served, 1);
        assert_eq!(counters.requests_served_with_proxy, 1);
    }

    /// S3: a matching stump wins over the upstream relay; a non-matching
    /// request still falls through to the relay.
    #[tokio::test]
    async fn s3_stump_then_relay() {
        let upstream = spawn_stub_upstream(
            "HTTP/1.1 200 OK\r\nContent-Length: 2\r\n\r\nhi",
        );
        let instance = Instance::new(
            config("s3", Some(upstream), FallbackResponse::Http404NotFound), test_store(),
        );
        instance.create_stump(StumpContract {
            id: None,
            name: StumpName::new("teapot").unwrap(),
            rules: vec![
                Box::new(MethodEquals { method: "GET".into() }),
                Box::new(PathEquals { path: "/a".into() }),
            ],
            response: CannedResponse::new(418, "teapot").unwrap(),
        }).unwrap();
        let port = start(&instance).await;

        let stumped = reqwest::get(format!("http://127.0.0.1:{port}/a")).await.unwrap();
        assert_eq!(stumped.status().as_u16(), 418);
        assert_eq!(stumped.text().await.unwrap(), "teapot");

        let relayed = reqwest::get(format!("http://127.0.0.1:{port}/b")).await.unwrap();
        assert_eq!(relayed.status().as_u16(), 200);

        let counters = instance.counters();
        assert_eq!(counters.total_requests_served, 2);
        assert_eq!(counters.requests_served_with_stump, 1);
        assert_eq!(counters.requests_served_with_proxy, 1);
    }

    /// S4: the first-inserted matching stump wins; deleting it promotes
    /// the next one.
    #[tokio::test]
    async fn s4_first_inserted_stump_wins_then_promotes() {
        let instance = Instance::new(config("s4", None, FallbackResponse::Http404NotFound), test_store());
        let first = instance.create_stump(StumpContract {
            id: None,
            name: StumpName::new("first").unwrap(),
            rules: vec![Box::new(MethodEquals { method: "GET".into() })],
            response: CannedResponse::new(201, "first").unwrap(),
        }).unwrap();
        instance.create_stump(StumpContract {
            id: None,
            name: StumpName::new("second").unwrap(),
            rules: vec![Box::new(MethodEquals { method: "GET".into() })],
            response: CannedResponse::new(202, "second").unwrap(),
        }).unwrap();
        let port = start(&instance).await;

        let first_response = reqwest::get(format!("http://127.0.0.1:{port}/x")).await.unwrap();
        assert_eq!(first_response.status().as_u16(), 201);

        instance.delete_stump(&first).unwrap();

        let second_response = reqwest::get(format!("http://127.0.0.1:{port}/x")).await.unwrap();
        assert_eq!(second_response.status().as_u16(), 202);
    }

    /// S6: recorded traffic preserves arrival order and `Clear()` empties it.
    #[tokio::test]
    async fn s6_recording_preserves_arrival_order_and_clears() {
        let instance = Instance::new(config("s6", None, FallbackResponse::Http503ServiceUnavailable), test_store());
        instance.set_record_traffic(true).unwrap();
        let port = start(&instance).await;

        reqwest::get(format!("http://127.0.0.1:{port}/one")).await.unwrap();
        reqwest::get(format!("http://127.0.0.1:{port}/two")).await.unwrap();

        let recordings = instance.recordings();
        assert_eq!(recordings.len(), 2);
        assert_eq!(recordings[0].request.path, "/one");
        assert_eq!(recordings[1].request.path, "/two");

        instance.clear_recordings();
        assert!(instance.recordings().is_empty());
    }

    /// A rule that panics, standing in for an unanticipated internal
    /// failure (spec §7). The panic must degrade to a 500 for this one
    /// request rather than taking down the listener -- the next request on
    /// the same instance must still be served normally.
    #[derive(Debug)]
    struct PanickingRule;

    impl crate::rules::MatchRule for PanickingRule {
        fn matches(&self, _request: &crate::request::IncomingRequest) -> bool {
            panic!("boom");
        }

        fn describe(&self) -> String {
            "panics unconditionally".into()
        }
    }

    #[tokio::test]
    async fn panicking_rule_yields_500_and_does_not_take_down_the_listener() {
        let instance = Instance::new(config("panic", None, FallbackResponse::Http503ServiceUnavailable), test_store());
        instance.create_stump(StumpContract {
            id: None,
            name: StumpName::new("panics").unwrap(),
            rules: vec![Box::new(PanickingRule)],
            response: CannedResponse::new(200, "unreachable").unwrap(),
        }).unwrap();
        let port = start(&instance).await;

        let response = reqwest::get(format!("http://127.0.0.1:{port}/x")).await.unwrap();
        assert_eq!(response.status().as_u16(), 500);
        assert!(response.bytes().await.unwrap().is_empty());

        // The listener itself is unaffected; a later request is served
        // normally by falling through to the fallback stage.
        instance.delete_stump(
            &instance.find_all_contracts().unwrap()[0].id().clone(),
        ).unwrap();
        let after = reqwest::get(format!("http://127.0.0.1:{port}/y")).await.unwrap();
        assert_eq!(after.status().as_u16(), 503);
    }
}
