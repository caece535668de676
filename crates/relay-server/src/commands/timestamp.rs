//! Stamps outbound messages with the server time.
//!
//! Older clients render `time` and break without it.

use relay_protocol::{kind, Payload};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use tenvis_relay_core::{Connection, Context, Direction, FnHook, HookError, HookOutcome};

const OWNER: &str = "timestamp";

/// Milliseconds since the Unix epoch.
fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default()
}

fn stamp(_: &Context, _: &Arc<Connection>, payload: &Payload) -> Result<HookOutcome, HookError> {
    if payload.has("time") {
        return Ok(HookOutcome::Continue);
    }
    Ok(HookOutcome::Replace(payload.clone().with("time", now_ms())))
}

/// Register the stamping hook on every outbound kind.
pub fn install(ctx: &Context) {
    ctx.hooks().unregister_owner(OWNER);
    for name in kind::ALL {
        ctx.hooks()
            .register_hook(Direction::Out, *name, 0, OWNER, Arc::new(FnHook(stamp)));
    }
}
