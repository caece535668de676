//! Hook middleware.
//!
//! Hooks attach to a `(direction, command)` pair and run in ascending
//! `(priority, sequence)` order. `In` hooks see an inbound payload before the
//! command handler; `Out` hooks see every outbound payload of the matching
//! kind before the transport encodes it.
//!
//! A hook may let the payload through, replace it, or drop it. Dropping
//! halts the chain: no later hook, no handler, no default reply. A hook that
//! errors or panics is logged and treated as a drop.

use crate::connection::Connection;
use crate::context::Context;
use async_trait::async_trait;
use dashmap::DashMap;
use futures_util::FutureExt;
use relay_protocol::Payload;
use std::any::Any;
use std::fmt;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, error, trace};

/// Which side of the command handler a hook runs on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    In,
    Out,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::In => f.write_str("in"),
            Direction::Out => f.write_str("out"),
        }
    }
}

/// What a hook decided.
#[derive(Debug, Clone, PartialEq)]
pub enum HookOutcome {
    /// Pass the payload on unchanged.
    Continue,
    /// Pass this payload on instead.
    Replace(Payload),
    /// Stop here.
    Drop,
}

/// A hook failure. Always treated as [`HookOutcome::Drop`].
#[derive(Debug, Error)]
pub enum HookError {
    #[error("{0}")]
    Failed(String),

    #[error("Delivery failed: {0}")]
    Delivery(#[from] crate::connection::DeliveryError),
}

/// A cross-cutting payload handler.
///
/// Implementors carry their own state; the pipeline never binds anything
/// for them.
#[async_trait]
pub trait Hook: Send + Sync {
    async fn run(
        &self,
        ctx: &Context,
        conn: &Arc<Connection>,
        payload: &Payload,
    ) -> Result<HookOutcome, HookError>;
}

/// Adapter turning a synchronous closure into a [`Hook`].
pub struct FnHook<F>(pub F);

#[async_trait]
impl<F> Hook for FnHook<F>
where
    F: Fn(&Context, &Arc<Connection>, &Payload) -> Result<HookOutcome, HookError> + Send + Sync,
{
    async fn run(
        &self,
        ctx: &Context,
        conn: &Arc<Connection>,
        payload: &Payload,
    ) -> Result<HookOutcome, HookError> {
        (self.0)(ctx, conn, payload)
    }
}

/// A hook registration request declared by a command module.
#[derive(Clone)]
pub struct HookSpec {
    pub direction: Direction,
    pub command: String,
    pub priority: i32,
    pub handler: Arc<dyn Hook>,
}

impl HookSpec {
    #[must_use]
    pub fn new(
        direction: Direction,
        command: impl Into<String>,
        priority: i32,
        handler: impl Hook + 'static,
    ) -> Self {
        Self {
            direction,
            command: command.into(),
            priority,
            handler: Arc::new(handler),
        }
    }
}

impl fmt::Debug for HookSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HookSpec")
            .field("direction", &self.direction)
            .field("command", &self.command)
            .field("priority", &self.priority)
            .finish_non_exhaustive()
    }
}

/// A registered hook.
pub struct HookEntry {
    pub direction: Direction,
    pub command: String,
    /// Lower runs earlier.
    pub priority: i32,
    /// Registration order; breaks priority ties.
    pub sequence: u64,
    /// Module that registered the hook.
    pub owner: String,
    pub handler: Arc<dyn Hook>,
}

impl HookEntry {
    fn order_key(&self) -> (i32, u64) {
        (self.priority, self.sequence)
    }
}

impl fmt::Debug for HookEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HookEntry")
            .field("direction", &self.direction)
            .field("command", &self.command)
            .field("priority", &self.priority)
            .field("sequence", &self.sequence)
            .field("owner", &self.owner)
            .finish_non_exhaustive()
    }
}

/// Result of running a hook chain.
#[derive(Debug, Clone, PartialEq)]
pub enum PipelineResult {
    /// Every hook let it through; this is the (possibly replaced) payload.
    Proceed(Payload),
    /// A hook dropped it or faulted.
    Dropped,
}

type HookKey = (Direction, String);

/// Ordered hook chains keyed by `(direction, command)`.
pub struct HookPipeline {
    chains: DashMap<HookKey, Vec<Arc<HookEntry>>>,
    sequence: AtomicU64,
}

impl HookPipeline {
    #[must_use]
    pub fn new() -> Self {
        Self {
            chains: DashMap::new(),
            sequence: AtomicU64::new(0),
        }
    }

    /// Register a hook, keeping its chain sorted. Returns its sequence number.
    pub fn register_hook(
        &self,
        direction: Direction,
        command: impl Into<String>,
        priority: i32,
        owner: impl Into<String>,
        handler: Arc<dyn Hook>,
    ) -> u64 {
        let sequence = self.sequence.fetch_add(1, Ordering::Relaxed);
        let entry = Arc::new(HookEntry {
            direction,
            command: command.into(),
            priority,
            sequence,
            owner: owner.into(),
            handler,
        });

        debug!(
            direction = %entry.direction,
            command = %entry.command,
            priority,
            owner = %entry.owner,
            "Hook registered"
        );

        let key = (direction, entry.command.clone());
        let mut chain = self.chains.entry(key).or_default();
        let position = chain.partition_point(|e| e.order_key() <= entry.order_key());
        chain.insert(position, entry);
        sequence
    }

    /// Register a module's declared hook.
    pub fn register_spec(&self, owner: &str, spec: HookSpec) -> u64 {
        self.register_hook(
            spec.direction,
            spec.command,
            spec.priority,
            owner,
            spec.handler,
        )
    }

    /// Remove every hook registered by `owner`. Returns how many were removed.
    pub fn unregister_owner(&self, owner: &str) -> usize {
        let mut removed = 0;
        for mut chain in self.chains.iter_mut() {
            let before = chain.len();
            chain.retain(|entry| entry.owner != owner);
            removed += before - chain.len();
        }
        self.chains.retain(|_, chain| !chain.is_empty());
        if removed > 0 {
            debug!(owner = %owner, removed, "Hooks unregistered");
        }
        removed
    }

    /// Copy of the chain for `(direction, command)`, in execution order.
    #[must_use]
    pub fn entries(&self, direction: Direction, command: &str) -> Vec<Arc<HookEntry>> {
        self.chains
            .get(&(direction, command.to_string()))
            .map(|chain| chain.value().clone())
            .unwrap_or_default()
    }

    /// Number of hooks on `(direction, command)`.
    #[must_use]
    pub fn count(&self, direction: Direction, command: &str) -> usize {
        self.chains
            .get(&(direction, command.to_string()))
            .map_or(0, |chain| chain.len())
    }

    /// Run the chain for `(direction, command)` over `payload`.
    ///
    /// The chain is copied before the first hook runs, so hooks may register
    /// hooks or dispatch re-entrantly without affecting this run.
    pub async fn run(
        &self,
        direction: Direction,
        command: &str,
        ctx: &Context,
        conn: &Arc<Connection>,
        payload: Payload,
    ) -> PipelineResult {
        let chain = self.entries(direction, command);
        let mut payload = payload;

        for entry in chain {
            let result = AssertUnwindSafe(entry.handler.run(ctx, conn, &payload))
                .catch_unwind()
                .await;

            match result {
                Ok(Ok(HookOutcome::Continue)) => {}
                Ok(Ok(HookOutcome::Replace(replacement))) => {
                    trace!(
                        direction = %direction,
                        command = %command,
                        owner = %entry.owner,
                        "Hook replaced payload"
                    );
                    payload = replacement;
                }
                Ok(Ok(HookOutcome::Drop)) => {
                    debug!(
                        direction = %direction,
                        command = %command,
                        owner = %entry.owner,
                        connection = %conn.id(),
                        "Hook dropped payload"
                    );
                    return PipelineResult::Dropped;
                }
                Ok(Err(e)) => {
                    error!(
                        direction = %direction,
                        command = %command,
                        owner = %entry.owner,
                        connection = %conn.id(),
                        error = %e,
                        "Hook failed"
                    );
                    return PipelineResult::Dropped;
                }
                Err(panic) => {
                    error!(
                        direction = %direction,
                        command = %command,
                        owner = %entry.owner,
                        connection = %conn.id(),
                        panic = %panic_message(&panic),
                        "Hook panicked"
                    );
                    return PipelineResult::Dropped;
                }
            }
        }

        PipelineResult::Proceed(payload)
    }
}

impl Default for HookPipeline {
    fn default() -> Self {
        Self::new()
    }
}

pub(crate) fn panic_message(panic: &Box<dyn Any + Send>) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "non-string panic".to_string()
    }
}
