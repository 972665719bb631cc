//! DevTools bridge for a desktop application with an embedded debugger
//!
//! Talks to the application's embedded remote-debugging endpoint: target
//! discovery over HTTP, a WebSocket request/response engine with event
//! subscription, and automatic reconnection with backoff.
//!
//! # Layout
//!
//! 1. [`cdp`]: discovery, wire types and the protocol client
//! 2. [`session`]: the web view + app UI pair driven by higher layers
//! 3. [`config`], [`error`], [`events`]: the plumbing around them

pub mod cdp;
pub mod config;
pub mod error;
pub mod events;
pub mod session;

pub use cdp::{discover_targets, find_debug_port, CDPClient, EventCallback, Target};
pub use config::{ClientConfig, ReconnectPolicy, SessionConfig, DEFAULT_HOST, DEFAULT_PORT};
pub use error::{CDPError, Result};
pub use events::{ConnectionEvent, ConnectionState, EventBus};
pub use session::{AppSession, Surface};
