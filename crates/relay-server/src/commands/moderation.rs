//! Moderator commands: kick, ban, unban, unbanall, dumb, speak.
//!
//! Every command here checks the caller's level first. Callers without it
//! are penalized and get no reply.

use super::{authorize, joined, moderators, nick_in_channel, notify, random_channel, text_field, warn};
use async_trait::async_trait;
use relay_protocol::{messages, Payload};
use std::sync::Arc;
use tenvis_relay_core::access::at_least;
use tenvis_relay_core::{
    Command, CommandError, CommandInfo, Connection, Context, Direction, Hook, HookError,
    HookOutcome, HookSpec, Level, TargetSpec,
};
use tracing::info;

/// Runs before chat shortcuts so a muzzled `/me` is muted too.
const MUZZLE_PRIORITY: i32 = 10;

/// The member of the caller's channel named `nick`, if they rank lower.
///
/// Nicks are unique per channel, so there is at most one.
fn outranked_target(
    ctx: &Context,
    caller: &Connection,
    channel: &str,
    nick: &str,
) -> Option<Arc<Connection>> {
    let caller_level = caller.level();
    ctx.router()
        .find(&nick_in_channel(channel, nick))
        .into_iter()
        .find(|target| target.level() < caller_level)
}

pub struct Kick;

#[async_trait]
impl Command for Kick {
    fn info(&self) -> CommandInfo {
        CommandInfo::new("kick", "Move a user to a random channel").with_usage("kick <nick>")
    }

    fn required_fields(&self) -> &[&str] {
        &["nick"]
    }

    async fn run(
        &self,
        ctx: &Context,
        conn: &Arc<Connection>,
        payload: Payload,
    ) -> Result<(), CommandError> {
        if !authorize(ctx, conn, Level::MODERATOR) {
            return Ok(());
        }
        let Some((channel, _)) = joined(conn) else {
            return Ok(());
        };
        let Some(nick) = text_field(&payload, "nick") else {
            return Ok(());
        };

        let Some(target) = outranked_target(ctx, conn, &channel, nick) else {
            return warn(ctx, conn, "Could not find user in channel");
        };

        let destination = random_channel();
        target.update(|state| state.channel = Some(destination.clone()));
        ctx.router().reply(
            messages::online_set(&destination, vec![nick.to_string()]),
            &target,
        )?;
        info!(moderator = %conn.id(), target = %target.id(), to = %destination, "Kicked");

        let channel_spec = TargetSpec::channel(&channel);
        ctx.router()
            .broadcast(messages::online_remove(nick), &channel_spec);
        ctx.router()
            .broadcast(messages::info(format!("Kicked {}", nick)), &channel_spec);
        Ok(())
    }
}

pub struct Ban;

#[async_trait]
impl Command for Ban {
    fn info(&self) -> CommandInfo {
        CommandInfo::new("ban", "Disconnect a user and refuse their address")
            .with_usage("ban <nick>")
    }

    fn required_fields(&self) -> &[&str] {
        &["nick"]
    }

    async fn run(
        &self,
        ctx: &Context,
        conn: &Arc<Connection>,
        payload: Payload,
    ) -> Result<(), CommandError> {
        if !authorize(ctx, conn, Level::MODERATOR) {
            return Ok(());
        }
        let Some((channel, moderator)) = joined(conn) else {
            return Ok(());
        };
        let Some(nick) = text_field(&payload, "nick") else {
            return Ok(());
        };

        let Some(target) = outranked_target(ctx, conn, &channel, nick) else {
            return warn(ctx, conn, "Could not find user in channel");
        };

        ctx.police().arrest(target.address(), target.hash());
        target.update(|state| state.channel = None);
        ctx.router().broadcast(
            messages::info(format!(
                "{} banned {} in {}, userhash: {}",
                moderator,
                nick,
                channel,
                target.hash()
            )),
            &moderators(),
        );
        info!(moderator = %conn.id(), target = %target.id(), hash = %target.hash(), "Banned");

        let channel_spec = TargetSpec::channel(&channel);
        ctx.router()
            .broadcast(messages::online_remove(nick), &channel_spec);
        ctx.router().broadcast(
            messages::info(format!("Banned {}", nick)),
            &channel_spec.matching("level", |level| !at_least(Level::MODERATOR)(level)),
        );
        Ok(())
    }
}

pub struct Unban;

#[async_trait]
impl Command for Unban {
    fn info(&self) -> CommandInfo {
        CommandInfo::new("unban", "Lift a ban by userhash or address")
            .with_usage("unban <token>")
    }

    fn required_fields(&self) -> &[&str] {
        &["token"]
    }

    async fn run(
        &self,
        ctx: &Context,
        conn: &Arc<Connection>,
        payload: Payload,
    ) -> Result<(), CommandError> {
        if !authorize(ctx, conn, Level::MODERATOR) {
            return Ok(());
        }
        let Some(token) = text_field(&payload, "token") else {
            return Ok(());
        };

        if !ctx.police().pardon(token) {
            return warn(ctx, conn, format!("No ban found for {}", token));
        }

        let moderator = conn.nick().unwrap_or_default();
        ctx.router().broadcast(
            messages::info(format!("{} unbanned {}", moderator, token)),
            &moderators(),
        );
        Ok(())
    }
}

pub struct UnbanAll;

#[async_trait]
impl Command for UnbanAll {
    fn info(&self) -> CommandInfo {
        CommandInfo::new("unbanall", "Lift every ban")
    }

    async fn run(
        &self,
        ctx: &Context,
        conn: &Arc<Connection>,
        _payload: Payload,
    ) -> Result<(), CommandError> {
        if !authorize(ctx, conn, Level::ADMIN) {
            return Ok(());
        }

        let lifted = ctx.police().pardon_all();
        ctx.router().broadcast(
            messages::info(format!("Unbanned all addresses ({})", lifted)),
            &moderators(),
        );
        Ok(())
    }
}

pub struct Dumb;

#[async_trait]
impl Command for Dumb {
    fn info(&self) -> CommandInfo {
        CommandInfo::new("dumb", "Shadow-mute a user")
            .with_aliases(&["muzzle"])
            .with_usage("dumb <nick>")
    }

    fn required_fields(&self) -> &[&str] {
        &["nick"]
    }

    fn hooks(&self) -> Vec<HookSpec> {
        [
            ("chat", Muted::Chat),
            ("emote", Muted::Emote),
            ("whisper", Muted::Whisper),
            ("invite", Muted::Invite),
        ]
        .into_iter()
        .map(|(command, muted)| {
            HookSpec::new(Direction::In, command, MUZZLE_PRIORITY, ShadowMute(muted))
        })
        .collect()
    }

    async fn run(
        &self,
        ctx: &Context,
        conn: &Arc<Connection>,
        payload: Payload,
    ) -> Result<(), CommandError> {
        if !authorize(ctx, conn, Level::MODERATOR) {
            return Ok(());
        }
        let Some((channel, _)) = joined(conn) else {
            return Ok(());
        };
        let Some(nick) = text_field(&payload, "nick") else {
            return Ok(());
        };

        let Some(target) = outranked_target(ctx, conn, &channel, nick) else {
            return warn(ctx, conn, "Could not find user in channel");
        };
        target.update(|state| state.muzzled = true);

        ctx.router().broadcast(
            messages::info(format!("Muzzled {} in {}", nick, channel)),
            &moderators(),
        );
        Ok(())
    }
}

/// Commands a muzzled user is shadowed on.
#[derive(Debug, Clone, Copy)]
enum Muted {
    Chat,
    Emote,
    Whisper,
    Invite,
}

/// Makes a muzzled user's messages look sent while only they and the
/// channel's moderators see them. Invites go nowhere.
struct ShadowMute(Muted);

#[async_trait]
impl Hook for ShadowMute {
    async fn run(
        &self,
        ctx: &Context,
        conn: &Arc<Connection>,
        payload: &Payload,
    ) -> Result<HookOutcome, HookError> {
        let state = conn.state();
        if !state.muzzled {
            return Ok(HookOutcome::Continue);
        }
        let (Some(channel), Some(nick)) = (state.channel, state.nick) else {
            return Ok(HookOutcome::Drop);
        };
        let trip = state.trip.as_deref();

        let (echo, copy) = match self.0 {
            Muted::Chat => {
                let Some(text) = text_field(payload, "text") else {
                    return Ok(HookOutcome::Drop);
                };
                let chat = messages::chat(&nick, text, trip, state.level.value());
                (chat.clone(), Some(chat))
            }
            Muted::Emote => {
                let Some(text) = text_field(payload, "text") else {
                    return Ok(HookOutcome::Drop);
                };
                let emote = messages::emote(&nick, text, trip);
                (emote.clone(), Some(emote))
            }
            Muted::Whisper => {
                let (Some(target), Some(text)) =
                    (text_field(payload, "nick"), text_field(payload, "text"))
                else {
                    return Ok(HookOutcome::Drop);
                };
                let echo = messages::info(format!("You whispered to @{}: {}", target, text))
                    .with("type", "whisper")
                    .with("to", target);
                (echo, Some(messages::whisper(&nick, target, text, trip)))
            }
            Muted::Invite => {
                let Some(target) = text_field(payload, "nick") else {
                    return Ok(HookOutcome::Drop);
                };
                let echo = messages::info(format!(
                    "You invited {} to ?{}",
                    target,
                    random_channel()
                ));
                (echo, None)
            }
        };

        ctx.router().reply(echo, conn)?;
        if let Some(copy) = copy {
            let sender = conn.id().as_str().to_string();
            ctx.router().broadcast(
                copy,
                &TargetSpec::channel(channel)
                    .matching("level", at_least(Level::MODERATOR))
                    .matching("id", move |id| id.as_str() != Some(sender.as_str())),
            );
        }
        Ok(HookOutcome::Drop)
    }
}

pub struct Speak;

#[async_trait]
impl Command for Speak {
    fn info(&self) -> CommandInfo {
        CommandInfo::new("speak", "Lift a shadow-mute")
            .with_aliases(&["unmuzzle"])
            .with_usage("speak <nick>")
    }

    fn required_fields(&self) -> &[&str] {
        &["nick"]
    }

    async fn run(
        &self,
        ctx: &Context,
        conn: &Arc<Connection>,
        payload: Payload,
    ) -> Result<(), CommandError> {
        if !authorize(ctx, conn, Level::MODERATOR) {
            return Ok(());
        }
        let Some((channel, _)) = joined(conn) else {
            return Ok(());
        };
        let Some(nick) = text_field(&payload, "nick") else {
            return Ok(());
        };

        let targets = ctx.router().find(&nick_in_channel(&channel, nick));
        if targets.is_empty() {
            return warn(ctx, conn, "Could not find user in channel");
        }
        for target in &targets {
            target.update(|state| state.muzzled = false);
        }

        notify(ctx, conn, format!("Unmuzzled {}", nick))
    }
}
