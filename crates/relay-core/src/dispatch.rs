//! Command dispatch.
//!
//! ```text
//!  inbound payload
//!        │
//!        ▼
//!  ┌───────────┐  denied    ┌──────────────┐
//!  │   frisk   │──────────▶ │ warn sender  │
//!  └───────────┘            └──────────────┘
//!        │
//!        ▼
//!  ┌───────────┐  unknown   ┌──────────────┐
//!  │  resolve  │──────────▶ │ silent drop  │
//!  └───────────┘            └──────────────┘
//!        │
//!        ▼
//!  ┌───────────┐  missing   ┌──────────────┐
//!  │ validate  │──────────▶ │ warn sender  │
//!  └───────────┘            └──────────────┘
//!        │
//!        ▼
//!  ┌───────────┐   drop     ┌──────────────┐
//!  │ in hooks  │──────────▶ │     stop     │
//!  └───────────┘            └──────────────┘
//!        │
//!        ▼
//!  ┌───────────┐            ┌──────────────┐
//!  │  handler  │──────────▶ │ router → out │
//!  └───────────┘            │    hooks     │
//!                           └──────────────┘
//! ```

use crate::connection::Connection;
use crate::context::Context;
use crate::hooks::{panic_message, Direction, PipelineResult};
use futures_util::future::BoxFuture;
use futures_util::FutureExt;
use relay_protocol::{messages, Payload};
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tracing::{debug, error, trace};

const RATE_LIMITED: &str = "Your IP is being rate-limited or blocked.";

/// Dispatcher policy.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DispatchPolicy {
    /// Score added to the sender's address for every inbound payload.
    pub inbound_penalty: f64,
}

impl Default for DispatchPolicy {
    fn default() -> Self {
        Self {
            inbound_penalty: 1.0,
        }
    }
}

/// How a dispatch ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// The sender's address is arrested or over the threshold. The
    /// sender was warned and nothing was resolved.
    RateLimited,
    /// No `cmd`, or no such command. Nothing was sent.
    Unknown,
    /// Required fields were missing. The sender was warned.
    Invalid { missing: Vec<String> },
    /// An `in` hook dropped the payload.
    Dropped,
    /// The handler ran to completion.
    Completed,
    /// The handler failed or panicked. Logged only.
    Failed,
}

impl DispatchOutcome {
    /// Short label for logs and metrics.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            DispatchOutcome::RateLimited => "rate_limited",
            DispatchOutcome::Unknown => "unknown",
            DispatchOutcome::Invalid { .. } => "invalid",
            DispatchOutcome::Dropped => "dropped",
            DispatchOutcome::Completed => "completed",
            DispatchOutcome::Failed => "failed",
        }
    }
}

impl Context {
    /// Entry point for payloads arriving from the transport.
    ///
    /// An arrested address, or one already at the threshold, gets a single
    /// warning and nothing else. Otherwise the inbound penalty is added to
    /// its score and the payload is dispatched.
    pub async fn handle_inbound(&self, conn: &Arc<Connection>, payload: Payload) -> DispatchOutcome {
        let police = self.police();
        if police.frisk(conn.address(), 0.0).is_denied() {
            trace!(connection = %conn.id(), cmd = ?payload.cmd(), "Inbound payload refused");
            let _ = self.router().reply(messages::warn(RATE_LIMITED), conn);
            return DispatchOutcome::RateLimited;
        }
        police.frisk(conn.address(), self.policy.inbound_penalty);
        self.dispatch(conn, payload).await
    }

    /// Resolve, validate, hook, and run one payload.
    ///
    /// Safe to call from inside a hook or handler: it applies no penalty of
    /// its own and holds no lock across an await.
    pub fn dispatch<'a>(
        &'a self,
        conn: &'a Arc<Connection>,
        payload: Payload,
    ) -> BoxFuture<'a, DispatchOutcome> {
        async move {
            let Some(descriptor) = payload.cmd().and_then(|cmd| self.registry().resolve(cmd))
            else {
                trace!(connection = %conn.id(), cmd = ?payload.cmd(), "Unknown command dropped");
                return DispatchOutcome::Unknown;
            };

            let missing = payload.missing(&descriptor.required_fields);
            if !missing.is_empty() {
                let mut text = format!(
                    "Failed to execute '{}': missing required {}",
                    descriptor.name,
                    missing.join(", ")
                );
                if !descriptor.usage.is_empty() {
                    text.push_str(&format!("\n\nUsage: {}", descriptor.usage));
                }
                let _ = self.router().reply(messages::warn(text), conn);
                debug!(connection = %conn.id(), command = %descriptor.name, ?missing, "Validation failed");
                return DispatchOutcome::Invalid {
                    missing: missing.into_iter().map(String::from).collect(),
                };
            }

            let payload = match self
                .hooks()
                .run(Direction::In, &descriptor.name, self, conn, payload)
                .await
            {
                PipelineResult::Proceed(payload) => payload,
                PipelineResult::Dropped => return DispatchOutcome::Dropped,
            };

            let result = AssertUnwindSafe(descriptor.handler.run(self, conn, payload))
                .catch_unwind()
                .await;

            match result {
                Ok(Ok(())) => {
                    trace!(connection = %conn.id(), command = %descriptor.name, "Command completed");
                    DispatchOutcome::Completed
                }
                Ok(Err(e)) => {
                    error!(connection = %conn.id(), command = %descriptor.name, error = %e, "Command failed");
                    DispatchOutcome::Failed
                }
                Err(panic) => {
                    error!(
                        connection = %conn.id(),
                        command = %descriptor.name,
                        panic = %panic_message(&panic),
                        "Command panicked"
                    );
                    DispatchOutcome::Failed
                }
            }
        }
        .boxed()
    }

    /// Run `out` hooks on a payload about to be sent to `conn`.
    ///
    /// Hooks are selected by the payload's `cmd`. Returns `None` if a hook
    /// suppressed it.
    pub async fn prepare_outbound(&self, conn: &Arc<Connection>, payload: Payload) -> Option<Payload> {
        let Some(kind) = payload.cmd().map(str::to_string) else {
            return Some(payload);
        };
        match self
            .hooks()
            .run(Direction::Out, &kind, self, conn, payload)
            .await
        {
            PipelineResult::Proceed(payload) => Some(payload),
            PipelineResult::Dropped => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hooks::{FnHook, HookError, HookOutcome};
    use crate::registry::{Command, CommandError, CommandInfo};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Counting {
        name: &'static str,
        required: &'static [&'static str],
        runs: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl Command for Counting {
        fn info(&self) -> CommandInfo {
            CommandInfo::new(self.name, "counts runs").with_usage(format!("{} <nick>", self.name))
        }

        fn required_fields(&self) -> &[&str] {
            self.required
        }

        async fn run(
            &self,
            _ctx: &Context,
            _conn: &Arc<Connection>,
            _payload: Payload,
        ) -> Result<(), CommandError> {
            self.runs.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    struct Faulty;

    #[async_trait]
    impl Command for Faulty {
        fn info(&self) -> CommandInfo {
            CommandInfo::new("faulty", "always fails")
        }

        async fn run(
            &self,
            _ctx: &Context,
            _conn: &Arc<Connection>,
            _payload: Payload,
        ) -> Result<(), CommandError> {
            Err(CommandError::Failed("nope".into()))
        }
    }

    #[tokio::test]
    async fn test_unknown_command_is_silent() {
        let ctx = Context::new();
        let (conn, mut rx) = Connection::new("c1".into(), "10.0.0.1", "h1");

        assert_eq!(ctx.dispatch(&conn, Payload::new("nope")).await, DispatchOutcome::Unknown);
        assert_eq!(ctx.dispatch(&conn, Payload::default()).await, DispatchOutcome::Unknown);
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_handler_failure_is_not_reported_to_client() {
        let ctx = Context::new();
        ctx.load(Arc::new(Faulty)).await.unwrap();
        let (conn, mut rx) = Connection::new("c1".into(), "10.0.0.1", "h1");

        assert_eq!(ctx.dispatch(&conn, Payload::new("faulty")).await, DispatchOutcome::Failed);
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_missing_field_warns_with_usage() {
        let ctx = Context::new();
        let runs = Arc::new(AtomicUsize::new(0));
        ctx.load(Arc::new(Counting {
            name: "invite",
            required: &["nick"],
            runs: Arc::clone(&runs),
        }))
        .await
        .unwrap();
        let (conn, mut rx) = Connection::new("c1".into(), "10.0.0.1", "h1");

        let outcome = ctx.dispatch(&conn, Payload::new("invite")).await;
        assert_eq!(
            outcome,
            DispatchOutcome::Invalid {
                missing: vec!["nick".to_string()]
            }
        );

        let warning = rx.try_recv().unwrap();
        assert_eq!(warning.cmd(), Some("warn"));
        let text = warning.get_str("text").unwrap();
        assert!(text.starts_with("Failed to execute 'invite': missing required nick"));
        assert!(text.ends_with("Usage: invite <nick>"));
        assert!(rx.try_recv().is_err());
        assert_eq!(runs.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_inbound_penalty_feeds_score() {
        let ctx = Context::new();
        let (conn, _rx) = Connection::new("c1".into(), "10.0.0.1", "h1");

        ctx.handle_inbound(&conn, Payload::new("nope")).await;
        ctx.handle_inbound(&conn, Payload::new("nope")).await;
        assert!(ctx.police().query("10.0.0.1").score > 1.5);
    }

    #[tokio::test]
    async fn test_arrested_address_is_refused_before_resolve() {
        let ctx = Context::new();
        let runs = Arc::new(AtomicUsize::new(0));
        ctx.load(Arc::new(Counting {
            name: "help",
            required: &[],
            runs: Arc::clone(&runs),
        }))
        .await
        .unwrap();
        let (conn, mut rx) = Connection::new("c1".into(), "10.0.0.1", "h1");
        ctx.police().arrest("10.0.0.1", "h1");

        for _ in 0..3 {
            assert_eq!(
                ctx.handle_inbound(&conn, Payload::new("help")).await,
                DispatchOutcome::RateLimited
            );
            let warning = rx.try_recv().unwrap();
            assert_eq!(warning.get_str("text"), Some(RATE_LIMITED));
            assert!(rx.try_recv().is_err());
        }
        assert_eq!(runs.load(Ordering::SeqCst), 0);
        assert_eq!(ctx.police().query("10.0.0.1").score, 0.0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_flooder_is_refused_past_threshold() {
        let ctx = Context::new();
        let runs = Arc::new(AtomicUsize::new(0));
        ctx.load(Arc::new(Counting {
            name: "stats",
            required: &[],
            runs: Arc::clone(&runs),
        }))
        .await
        .unwrap();
        let (conn, mut rx) = Connection::new("c1".into(), "10.0.0.2", "h2");

        let mut refused = 0;
        for _ in 0..100 {
            if ctx.handle_inbound(&conn, Payload::new("stats")).await == DispatchOutcome::RateLimited {
                refused += 1;
            }
        }

        // The threshold is 25 and the clock is frozen, so exactly 25 get through.
        assert_eq!(runs.load(Ordering::SeqCst), 25);
        assert_eq!(refused, 75);
        assert_eq!(ctx.police().query("10.0.0.2").score, 25.0);

        let mut warnings = 0;
        while let Ok(payload) = rx.try_recv() {
            assert_eq!(payload.cmd(), Some("warn"));
            warnings += 1;
        }
        assert_eq!(warnings, 75);
    }

    #[tokio::test]
    async fn test_out_hooks_rewrite_and_suppress() {
        let ctx = Context::new();
        ctx.hooks().register_hook(
            Direction::Out,
            "chat",
            0,
            "stamp",
            Arc::new(FnHook(
                |_: &Context, _: &Arc<Connection>, payload: &Payload| -> Result<HookOutcome, HookError> {
                    Ok(HookOutcome::Replace(payload.clone().with("time", 1)))
                },
            )),
        );
        ctx.hooks().register_hook(
            Direction::Out,
            "secret",
            0,
            "filter",
            Arc::new(FnHook(
                |_: &Context, _: &Arc<Connection>, _: &Payload| -> Result<HookOutcome, HookError> {
                    Ok(HookOutcome::Drop)
                },
            )),
        );
        let (conn, _rx) = Connection::new("c1".into(), "10.0.0.1", "h1");

        let stamped = ctx.prepare_outbound(&conn, Payload::new("chat")).await.unwrap();
        assert!(stamped.has("time"));
        assert!(ctx.prepare_outbound(&conn, Payload::new("secret")).await.is_none());
        assert_eq!(
            ctx.prepare_outbound(&conn, Payload::new("info")).await,
            Some(Payload::new("info"))
        );
    }
}
