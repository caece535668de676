//! End-to-end dispatch behavior through a real [`Context`].

use async_trait::async_trait;
use relay_protocol::{messages, Payload};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tenvis_relay_core::{
    Command, CommandError, CommandInfo, Connection, Context, Direction, DispatchOutcome, FnHook,
    Hook, HookError, HookOutcome, HookSpec, Outbound, RegistryError, TargetSpec,
};
use tokio::sync::mpsc::UnboundedReceiver;

/// Counts handler runs and echoes the payload back as `info`.
struct Echo {
    name: &'static str,
    aliases: &'static [&'static str],
    required: &'static [&'static str],
    hooks: Vec<HookSpec>,
    runs: Arc<AtomicUsize>,
}

impl Echo {
    fn new(name: &'static str, runs: &Arc<AtomicUsize>) -> Self {
        Self {
            name,
            aliases: &[],
            required: &[],
            hooks: Vec::new(),
            runs: Arc::clone(runs),
        }
    }
}

#[async_trait]
impl Command for Echo {
    fn info(&self) -> CommandInfo {
        CommandInfo::new(self.name, "echo").with_aliases(self.aliases)
    }

    fn required_fields(&self) -> &[&str] {
        self.required
    }

    fn hooks(&self) -> Vec<HookSpec> {
        self.hooks.clone()
    }

    async fn run(
        &self,
        ctx: &Context,
        conn: &Arc<Connection>,
        payload: Payload,
    ) -> Result<(), CommandError> {
        self.runs.fetch_add(1, Ordering::SeqCst);
        let text = payload.get_str("text").unwrap_or_default().to_string();
        ctx.router()
            .reply(messages::info(format!("{}:{text}", self.name)), conn)?;
        Ok(())
    }
}

/// Turns `chat` payloads starting with `/me ` into an `emote` dispatch.
struct MeHook;

#[async_trait]
impl Hook for MeHook {
    async fn run(
        &self,
        ctx: &Context,
        conn: &Arc<Connection>,
        payload: &Payload,
    ) -> Result<HookOutcome, HookError> {
        let Some(rest) = payload.get_str("text").and_then(|t| t.strip_prefix("/me ")) else {
            return Ok(HookOutcome::Continue);
        };
        let emote = Payload::new("emote").with("text", rest);
        ctx.dispatch(conn, emote).await;
        Ok(HookOutcome::Drop)
    }
}

fn connection(id: &str) -> (Arc<Connection>, UnboundedReceiver<Outbound>) {
    Connection::new(id.into(), "10.0.0.1", "hash")
}

fn drain(rx: &mut UnboundedReceiver<Outbound>) -> Vec<Outbound> {
    let mut out = Vec::new();
    while let Ok(payload) = rx.try_recv() {
        out.push(payload);
    }
    out
}

#[tokio::test]
async fn missing_field_warns_once_and_skips_hooks() {
    let ctx = Context::new();
    let runs = Arc::new(AtomicUsize::new(0));
    let hook_runs = Arc::new(AtomicUsize::new(0));

    let counter = Arc::clone(&hook_runs);
    let mut whisper = Echo::new("whisper", &runs);
    whisper.required = &["nick", "text"];
    whisper.hooks = vec![HookSpec::new(
        Direction::In,
        "whisper",
        0,
        FnHook(
            move |_: &Context, _: &Arc<Connection>, _: &Payload| -> Result<HookOutcome, HookError> {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(HookOutcome::Continue)
            },
        ),
    )];
    ctx.load(Arc::new(whisper)).await.unwrap();

    let (conn, mut rx) = connection("c1");
    let outcome = ctx
        .dispatch(&conn, Payload::new("whisper").with("nick", "bob"))
        .await;

    assert_eq!(
        outcome,
        DispatchOutcome::Invalid {
            missing: vec!["text".to_string()]
        }
    );
    let sent = drain(&mut rx);
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].cmd(), Some("warn"));
    assert_eq!(hook_runs.load(Ordering::SeqCst), 0);
    assert_eq!(runs.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn null_field_counts_as_present() {
    let ctx = Context::new();
    let runs = Arc::new(AtomicUsize::new(0));
    let mut chat = Echo::new("chat", &runs);
    chat.required = &["text"];
    ctx.load(Arc::new(chat)).await.unwrap();

    let (conn, _rx) = connection("c1");
    let payload = Payload::new("chat").with("text", serde_json::Value::Null);
    assert_eq!(ctx.dispatch(&conn, payload).await, DispatchOutcome::Completed);
}

#[tokio::test]
async fn hook_veto_skips_handler_and_reply() {
    let ctx = Context::new();
    let runs = Arc::new(AtomicUsize::new(0));
    let mut chat = Echo::new("chat", &runs);
    chat.hooks = vec![HookSpec::new(
        Direction::In,
        "chat",
        10,
        FnHook(
            |_: &Context, _: &Arc<Connection>, payload: &Payload| -> Result<HookOutcome, HookError> {
                if payload.get_str("text") == Some("spam") {
                    Ok(HookOutcome::Drop)
                } else {
                    Ok(HookOutcome::Continue)
                }
            },
        ),
    )];
    ctx.load(Arc::new(chat)).await.unwrap();

    let (conn, mut rx) = connection("c1");
    let vetoed = ctx
        .dispatch(&conn, Payload::new("chat").with("text", "spam"))
        .await;
    assert_eq!(vetoed, DispatchOutcome::Dropped);
    assert!(drain(&mut rx).is_empty());

    let allowed = ctx
        .dispatch(&conn, Payload::new("chat").with("text", "hi"))
        .await;
    assert_eq!(allowed, DispatchOutcome::Completed);
    assert_eq!(drain(&mut rx)[0].get_str("text"), Some("chat:hi"));
    assert_eq!(runs.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn reentrant_dispatch_from_hook() {
    let ctx = Context::new();
    let chat_runs = Arc::new(AtomicUsize::new(0));
    let emote_runs = Arc::new(AtomicUsize::new(0));

    let mut chat = Echo::new("chat", &chat_runs);
    chat.hooks = vec![HookSpec::new(Direction::In, "chat", 0, MeHook)];
    ctx.load(Arc::new(chat)).await.unwrap();
    ctx.load(Arc::new(Echo::new("emote", &emote_runs)))
        .await
        .unwrap();

    let (conn, mut rx) = connection("c1");
    let outcome = ctx
        .handle_inbound(&conn, Payload::new("chat").with("text", "/me waves"))
        .await;

    assert_eq!(outcome, DispatchOutcome::Dropped);
    assert_eq!(emote_runs.load(Ordering::SeqCst), 1);
    assert_eq!(chat_runs.load(Ordering::SeqCst), 0);

    let sent = drain(&mut rx);
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].get_str("text"), Some("emote:waves"));

    // One inbound payload, one penalty.
    assert!((ctx.police().query("10.0.0.1").score - 1.0).abs() < 1e-6);
}

#[tokio::test]
async fn alias_resolves_to_canonical_hooks() {
    let ctx = Context::new();
    let runs = Arc::new(AtomicUsize::new(0));
    let hook_runs = Arc::new(AtomicUsize::new(0));

    let counter = Arc::clone(&hook_runs);
    let mut emote = Echo::new("emote", &runs);
    emote.aliases = &["me"];
    emote.hooks = vec![HookSpec::new(
        Direction::In,
        "emote",
        0,
        FnHook(
            move |_: &Context, _: &Arc<Connection>, _: &Payload| -> Result<HookOutcome, HookError> {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(HookOutcome::Continue)
            },
        ),
    )];
    ctx.load(Arc::new(emote)).await.unwrap();

    let (conn, _rx) = connection("c1");
    assert_eq!(
        ctx.dispatch(&conn, Payload::new("me").with("text", "x")).await,
        DispatchOutcome::Completed
    );
    assert_eq!(hook_runs.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn out_hooks_apply_per_recipient() {
    let ctx = Context::new();
    ctx.hooks().register_hook(
        Direction::Out,
        "chat",
        0,
        "filter",
        Arc::new(FnHook(
            |_: &Context, conn: &Arc<Connection>, payload: &Payload| -> Result<HookOutcome, HookError> {
                if conn.id().as_str() == "quiet" {
                    Ok(HookOutcome::Drop)
                } else {
                    Ok(HookOutcome::Replace(payload.clone().with("seen", true)))
                }
            },
        )),
    );

    let (loud, mut loud_rx) = connection("loud");
    let (quiet, mut quiet_rx) = connection("quiet");
    for conn in [&loud, &quiet] {
        conn.update(|state| state.channel = Some("lobby".into()));
        ctx.router().insert(Arc::clone(conn));
    }

    assert!(ctx
        .router()
        .broadcast(Payload::new("chat").with("text", "hi"), &TargetSpec::channel("lobby")));

    let for_loud = loud_rx.try_recv().unwrap();
    let for_quiet = quiet_rx.try_recv().unwrap();
    let loud_out = ctx.prepare_outbound(&loud, (*for_loud).clone()).await;
    let quiet_out = ctx.prepare_outbound(&quiet, (*for_quiet).clone()).await;

    assert_eq!(loud_out.unwrap().get("seen"), Some(&serde_json::Value::Bool(true)));
    assert!(quiet_out.is_none());
}

#[tokio::test]
async fn reload_replaces_hooks_idempotently() {
    let ctx = Context::new();
    let runs = Arc::new(AtomicUsize::new(0));

    let build = |runs: &Arc<AtomicUsize>| {
        let mut chat = Echo::new("chat", runs);
        chat.hooks = vec![
            HookSpec::new(Direction::In, "chat", 0, MeHook),
            HookSpec::new(
                Direction::Out,
                "chat",
                0,
                FnHook(
                    |_: &Context, _: &Arc<Connection>, _: &Payload| -> Result<HookOutcome, HookError> {
                        Ok(HookOutcome::Continue)
                    },
                ),
            ),
        ];
        Arc::new(chat)
    };

    ctx.load(build(&runs)).await.unwrap();
    for _ in 0..3 {
        ctx.reload(build(&runs)).await.unwrap();
    }

    assert_eq!(ctx.hooks().count(Direction::In, "chat"), 1);
    assert_eq!(ctx.hooks().count(Direction::Out, "chat"), 1);
    assert_eq!(ctx.registry().len(), 1);
}

#[tokio::test]
async fn in_flight_dispatch_keeps_old_handler() {
    let ctx = Context::new();
    let old_runs = Arc::new(AtomicUsize::new(0));
    let new_runs = Arc::new(AtomicUsize::new(0));
    ctx.load(Arc::new(Echo::new("help", &old_runs)))
        .await
        .unwrap();

    let resolved = ctx.registry().resolve("help").unwrap();
    ctx.reload(Arc::new(Echo::new("help", &new_runs)))
        .await
        .unwrap();

    let (conn, _rx) = connection("c1");
    resolved
        .handler
        .run(&ctx, &conn, Payload::new("help"))
        .await
        .unwrap();
    ctx.dispatch(&conn, Payload::new("help")).await;

    assert_eq!(old_runs.load(Ordering::SeqCst), 1);
    assert_eq!(new_runs.load(Ordering::SeqCst), 1);
}

struct BrokenInit;

#[async_trait]
impl Command for BrokenInit {
    fn info(&self) -> CommandInfo {
        CommandInfo::new("broken", "fails to start")
    }

    async fn init(&self, _ctx: &Context) -> Result<(), CommandError> {
        Err(CommandError::Failed("missing dependency".into()))
    }

    async fn run(
        &self,
        _ctx: &Context,
        _conn: &Arc<Connection>,
        _payload: Payload,
    ) -> Result<(), CommandError> {
        Ok(())
    }
}

#[tokio::test]
async fn init_failure_is_reported() {
    let ctx = Context::new();
    let err = ctx.load(Arc::new(BrokenInit)).await.unwrap_err();
    assert!(matches!(err, RegistryError::Init { ref command, .. } if command == "broken"));
}

#[tokio::test]
async fn panicking_handler_is_contained() {
    struct Panics;

    #[async_trait]
    impl Command for Panics {
        fn info(&self) -> CommandInfo {
            CommandInfo::new("panics", "")
        }

        async fn run(
            &self,
            _ctx: &Context,
            _conn: &Arc<Connection>,
            _payload: Payload,
        ) -> Result<(), CommandError> {
            panic!("handler exploded")
        }
    }

    let ctx = Context::new();
    ctx.load(Arc::new(Panics)).await.unwrap();
    let runs = Arc::new(AtomicUsize::new(0));
    ctx.load(Arc::new(Echo::new("after", &runs))).await.unwrap();

    let (conn, mut rx) = connection("c1");
    assert_eq!(
        ctx.dispatch(&conn, Payload::new("panics")).await,
        DispatchOutcome::Failed
    );
    assert!(drain(&mut rx).is_empty());

    // The context is still usable.
    assert_eq!(
        ctx.dispatch(&conn, Payload::new("after")).await,
        DispatchOutcome::Completed
    );
}
