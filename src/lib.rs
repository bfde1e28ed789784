//! mockproxy: a programmable HTTP mocking and recording proxy.
//!
//! For each configured upstream host this crate runs a local HTTP listener
//! that either replies with a pre-registered canned response matching the
//! incoming request (a [`stump::Stump`]), forwards the request to the real
//! upstream and relays the response ([`relay`]), or serves a fixed fallback
//! status when no upstream is configured. Live traffic can also be recorded
//! for later inspection ([`recording`]).
//!
//! The core pieces, roughly bottom-up:
//!
//! - [`rules`] / [`stump`] -- a named, addressable match-and-respond unit.
//! - [`registry`] -- the per-instance directory of stumps.
//! - [`recording`] -- the per-instance append-only traffic log.
//! - [`relay`] -- forwarding an intercepted request to a real upstream.
//! - [`pipeline`] -- the ordered stump-match / relay / fallback chain.
//! - [`instance`] -- one mocked upstream host, tying the above together with
//!   a [`listener::Listener`] and request counters.
//! - [`manager`] -- the process-wide directory of instances.
//!
//! [`store`] is the seam an external administrative layer persists through;
//! [`config`] and [`log`] are the CLI's bootstrap and logging plumbing.

pub mod config;
pub mod error;
pub mod instance;
pub mod listener;
pub mod log;
pub mod manager;
pub mod pipeline;
pub mod port;
pub mod recording;
pub mod registry;
pub mod relay;
pub mod request;
pub mod rules;
pub mod store;
pub mod stump;
