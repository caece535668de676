//! # relay-core
//!
//! Command dispatch and message routing for the Relay chat server.
//!
//! This crate provides the fundamental building blocks:
//!
//! - **Registry** - Pluggable command modules addressed by name or alias
//! - **Hooks** - Ordered `in`/`out` middleware that can rewrite or drop payloads
//! - **Router** - Attribute-filtered delivery to connections
//! - **Police** - Decaying per-address abuse scores
//! - **Context** - The explicit handle every command and hook receives
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐     ┌─────────────┐     ┌─────────────┐
//! │  Transport  │────▶│  Dispatch   │────▶│  Registry   │
//! └─────────────┘     └─────────────┘     └─────────────┘
//!        ▲                   │                   │
//!        │                   ▼                   ▼
//! ┌─────────────┐     ┌─────────────┐     ┌─────────────┐
//! │  Out hooks  │◀────│   Router    │◀────│   Command   │
//! └─────────────┘     └─────────────┘     └─────────────┘
//! ```
//!
//! ## Example
//!
//! ```rust
//! use relay_protocol::Payload;
//! use tenvis_relay_core::{Connection, Context, DispatchOutcome};
//!
//! let rt = tokio::runtime::Builder::new_current_thread().build().unwrap();
//! rt.block_on(async {
//!     let ctx = Context::new();
//!     let (conn, _outbox) = Connection::new("conn_1".into(), "10.0.0.1", "hash");
//!     let outcome = ctx.handle_inbound(&conn, Payload::new("nope")).await;
//!     assert_eq!(outcome, DispatchOutcome::Unknown);
//! });
//! ```

pub mod access;
pub mod connection;
pub mod context;
pub mod dispatch;
pub mod hooks;
pub mod names;
pub mod police;
pub mod registry;
pub mod router;

pub use access::Level;
pub use connection::{Connection, ConnectionId, ConnectionState, DeliveryError, Outbound};
pub use context::{Context, ContextConfig, SharedState};
pub use dispatch::{DispatchOutcome, DispatchPolicy};
pub use hooks::{
    Direction, FnHook, Hook, HookEntry, HookError, HookOutcome, HookPipeline, HookSpec,
    PipelineResult,
};
pub use police::{Police, PoliceConfig, RateRecord, Verdict};
pub use registry::{
    Command, CommandDescriptor, CommandError, CommandInfo, CommandRegistry, RegistryError,
};
pub use router::{ConnectionRouter, Matcher, RouterStats, TargetSpec};
