//! CDP (Chrome DevTools Protocol) Client Implementation
//!
//! Discovery over HTTP, then one multiplexed WebSocket per target.

pub mod client;
pub mod discovery;
pub mod protocol;

pub use client::{CDPClient, EventCallback};
pub use discovery::{discover_targets, find_debug_port, Target};
pub use protocol::{CDPEvent, CDPRequest, CDPResponse, Command, NavigateResult};
