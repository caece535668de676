//! Shared fixtures for the Relay benchmarks.

use async_trait::async_trait;
use relay_protocol::{messages, Payload};
use std::sync::Arc;
use tenvis_relay_core::{
    Command, CommandError, CommandInfo, Connection, ConnectionId, Context, ContextConfig,
    DispatchPolicy, FnHook, HookError, HookOutcome, HookSpec, Direction, Outbound, PoliceConfig,
    TargetSpec,
};
use tokio::sync::mpsc::UnboundedReceiver;

/// Broadcasts `text` to the sender's channel.
pub struct Say;

#[async_trait]
impl Command for Say {
    fn info(&self) -> CommandInfo {
        CommandInfo::new("say", "broadcast to channel")
    }

    fn required_fields(&self) -> &[&str] {
        &["text"]
    }

    async fn run(
        &self,
        ctx: &Context,
        conn: &Arc<Connection>,
        payload: Payload,
    ) -> Result<(), CommandError> {
        let Some(channel) = conn.channel() else {
            return Ok(());
        };
        let text = payload.get_str("text").unwrap_or_default();
        ctx.router().broadcast(
            messages::chat("bench", text, None, 100),
            &TargetSpec::channel(channel),
        );
        Ok(())
    }
}

/// `Say`, with `hooks` pass-through in-hooks in front of it.
pub struct HookedSay {
    pub hooks: usize,
}

#[async_trait]
impl Command for HookedSay {
    fn info(&self) -> CommandInfo {
        CommandInfo::new("hooked", "broadcast behind hooks")
    }

    fn hooks(&self) -> Vec<HookSpec> {
        (0..self.hooks)
            .map(|i| {
                HookSpec::new(
                    Direction::In,
                    "hooked",
                    i as i32,
                    FnHook(
                        |_: &Context,
                         _: &Arc<Connection>,
                         _: &Payload|
                         -> Result<HookOutcome, HookError> {
                            Ok(HookOutcome::Continue)
                        },
                    ),
                )
            })
            .collect()
    }

    async fn run(
        &self,
        ctx: &Context,
        conn: &Arc<Connection>,
        payload: Payload,
    ) -> Result<(), CommandError> {
        Say.run(ctx, conn, payload).await
    }
}

/// A context that never rate limits.
pub fn unlimited_context() -> Context {
    Context::with_config(ContextConfig {
        police: PoliceConfig {
            threshold: f64::INFINITY,
            ..PoliceConfig::default()
        },
        policy: DispatchPolicy::default(),
    })
}

/// `count` connections joined to `channel`, with their outboxes.
pub fn populate(
    ctx: &Context,
    channel: &str,
    count: usize,
) -> Vec<(Arc<Connection>, UnboundedReceiver<Outbound>)> {
    (0..count)
        .map(|i| {
            let (conn, rx) = Connection::new(
                ConnectionId::new(format!("{channel}:{i}")),
                format!("10.0.{}.{}", i / 256, i % 256),
                format!("hash-{i}"),
            );
            conn.update(|state| {
                state.channel = Some(channel.to_string());
                state.nick = Some(format!("user{i}"));
            });
            ctx.router().insert(Arc::clone(&conn));
            (conn, rx)
        })
        .collect()
}

/// Discard everything queued for these connections.
pub fn drain(clients: &mut [(Arc<Connection>, UnboundedReceiver<Outbound>)]) -> usize {
    let mut drained = 0;
    for (_, rx) in clients.iter_mut() {
        while rx.try_recv().is_ok() {
            drained += 1;
        }
    }
    drained
}
