//! Administrator commands: a typed dispatch table over allow-listed chat
//! messages. Replies are HTML; command output rides in escaped `<pre>`.

use std::sync::Arc;

use futures_util::future::BoxFuture;
use tracing::info;

use trawler_core::util::{now_ts, tg_html_entity};
use trawler_pipeline::{discover, fabric, queues, AppContext};
use trawler_telegram::types::PeerRef;
use trawler_telegram::{Notify as _, TgError, UserClient as _};

type Handler = for<'a> fn(&'a Arc<AppContext>, &'a str) -> BoxFuture<'a, String>;

pub struct AdminCommand {
    pub name: &'static str,
    pub aliases: &'static [&'static str],
    pub help: &'static str,
    handler: Handler,
}

// Function items coerce to the `Handler` pointer type; one thin wrapper per
// command keeps the table itself data-only.
fn h_exec<'a>(ctx: &'a Arc<AppContext>, arg: &'a str) -> BoxFuture<'a, String> {
    Box::pin(exec(ctx, arg))
}
fn h_py<'a>(_ctx: &'a Arc<AppContext>, _arg: &'a str) -> BoxFuture<'a, String> {
    Box::pin(async { "script evaluation is disabled".to_string() })
}
fn h_joinpub<'a>(ctx: &'a Arc<AppContext>, arg: &'a str) -> BoxFuture<'a, String> {
    Box::pin(join_public(ctx, arg))
}
fn h_joinprv<'a>(ctx: &'a Arc<AppContext>, arg: &'a str) -> BoxFuture<'a, String> {
    Box::pin(join_private(ctx, arg))
}
fn h_leave<'a>(ctx: &'a Arc<AppContext>, arg: &'a str) -> BoxFuture<'a, String> {
    Box::pin(leave(ctx, arg))
}
fn h_stat<'a>(ctx: &'a Arc<AppContext>, _arg: &'a str) -> BoxFuture<'a, String> {
    Box::pin(stat(ctx))
}
fn h_threads<'a>(ctx: &'a Arc<AppContext>, _arg: &'a str) -> BoxFuture<'a, String> {
    Box::pin(threads(ctx))
}
fn h_workers<'a>(ctx: &'a Arc<AppContext>, _arg: &'a str) -> BoxFuture<'a, String> {
    Box::pin(workers(ctx))
}
fn h_fetch<'a>(ctx: &'a Arc<AppContext>, arg: &'a str) -> BoxFuture<'a, String> {
    Box::pin(fetch(ctx, arg))
}
fn h_dialogs<'a>(ctx: &'a Arc<AppContext>, _arg: &'a str) -> BoxFuture<'a, String> {
    Box::pin(dialogs(ctx))
}
fn h_help<'a>(_ctx: &'a Arc<AppContext>, _arg: &'a str) -> BoxFuture<'a, String> {
    Box::pin(help())
}

pub static COMMANDS: &[AdminCommand] = &[
    AdminCommand {
        name: "exec",
        aliases: &[],
        help: "run a shell command (requires admin.allow_exec)",
        handler: h_exec,
    },
    AdminCommand {
        name: "py",
        aliases: &[],
        help: "script evaluation (disabled)",
        handler: h_py,
    },
    AdminCommand {
        name: "joinpub",
        aliases: &[],
        help: "probe and join a public group by username",
        handler: h_joinpub,
    },
    AdminCommand {
        name: "joinprv",
        aliases: &[],
        help: "join a private group by invite hash",
        handler: h_joinprv,
    },
    AdminCommand {
        name: "leave",
        aliases: &[],
        help: "leave a group by link or gid",
        handler: h_leave,
    },
    AdminCommand {
        name: "stat",
        aliases: &["stats"],
        help: "uptime and throughput",
        handler: h_stat,
    },
    AdminCommand {
        name: "threads",
        aliases: &[],
        help: "scheduler overview",
        handler: h_threads,
    },
    AdminCommand {
        name: "workers",
        aliases: &[],
        help: "per-worker lag and queue depth",
        handler: h_workers,
    },
    AdminCommand {
        name: "fetch",
        aliases: &[],
        help: "queue a group's history back-fill by gid",
        handler: h_fetch,
    },
    AdminCommand {
        name: "dialogs",
        aliases: &[],
        help: "dump master assignments for every client's dialogs",
        handler: h_dialogs,
    },
    AdminCommand {
        name: "help",
        aliases: &[],
        help: "this list",
        handler: h_help,
    },
];

/// Run `command` for an allow-listed administrator. `None` for unknown names.
pub async fn dispatch(ctx: &Arc<AppContext>, command: &str, arg: &str) -> Option<String> {
    let entry = COMMANDS
        .iter()
        .find(|c| c.name == command || c.aliases.contains(&command))?;
    info!(command, arg, "admin command");
    Some((entry.handler)(ctx, arg).await)
}

async fn exec(ctx: &Arc<AppContext>, arg: &str) -> String {
    if !ctx.config.admin.allow_exec {
        return "shell execution is disabled on this deployment".to_string();
    }
    let output = tokio::process::Command::new("sh")
        .arg("-c")
        .arg(arg)
        .output()
        .await;
    match output {
        Ok(output) => {
            let mut text = String::from_utf8_lossy(&output.stdout).into_owned();
            text.push_str(&String::from_utf8_lossy(&output.stderr));
            format!("<pre>{}</pre>", tg_html_entity(&text))
        }
        Err(e) => format!("<pre>{}</pre>", tg_html_entity(&e.to_string())),
    }
}

async fn join_public(ctx: &Arc<AppContext>, arg: &str) -> String {
    let link = arg.trim_start_matches("https://")
        .trim_start_matches("t.me/")
        .trim_start_matches('@');
    match discover::test_and_join_public_channel(ctx, link, true).await {
        Ok((gid, joined)) => format!("probed gid {gid:?}, join queued: {joined}"),
        Err(e) => format!("<pre>{}</pre>", tg_html_entity(&e.to_string())),
    }
}

async fn join_private(ctx: &Arc<AppContext>, arg: &str) -> String {
    match discover::handle_private_invite(ctx, arg.trim(), true).await {
        Ok(()) => "invite processed; check the join queue".to_string(),
        Err(e) => format!("<pre>{}</pre>", tg_html_entity(&e.to_string())),
    }
}

async fn leave(ctx: &Arc<AppContext>, arg: &str) -> String {
    let invoker = ctx.senders.invoker();
    let peer = if let Ok(gid) = arg.trim().parse::<i64>() {
        Some(PeerRef::from_marked_gid(gid))
    } else {
        match invoker.resolve_channel(arg.trim().trim_start_matches('@')).await {
            Ok(peer) => peer,
            Err(e) => return format!("<pre>{}</pre>", tg_html_entity(&e.to_string())),
        }
    };
    let Some(peer) = peer else {
        return format!("cannot resolve {arg}");
    };
    match invoker.leave_channel(&peer).await {
        Ok(()) => format!("left {arg}"),
        Err(TgError::UserNotParticipant) => format!("user not in group {arg}"),
        Err(e) => format!("<pre>{}</pre>", tg_html_entity(&e.to_string())),
    }
}

async fn stat(ctx: &Arc<AppContext>) -> String {
    let global = ctx.global_count();
    let start = global.get_i64("start_time").await.ok().flatten().unwrap_or(0);
    let received = global
        .get_i64("received_message")
        .await
        .ok()
        .flatten()
        .unwrap_or(0);
    let used_ms = global
        .get_i64("total_used_time_ms")
        .await
        .ok()
        .flatten()
        .unwrap_or(0);
    let average = if received > 0 {
        used_ms as f64 / 1000.0 / received as f64
    } else {
        0.0
    };
    format!(
        "Uptime: {}s\nProcessed: {received}\nAverage: {average:.4}s",
        now_ts() - start
    )
}

async fn threads(ctx: &Arc<AppContext>) -> String {
    // One cooperative runtime; the per-thread view of the old world is the
    // per-class view here.
    let mut out = String::from("cooperative scheduler, one runtime\n");
    out.push_str(&workers(ctx).await);
    out
}

async fn workers(ctx: &Arc<AppContext>) -> String {
    let mut out = String::new();
    for name in queues::INGEST_CLASSES.iter().chain(&queues::CONTROL_CLASSES) {
        out.push_str(&fabric::stat_line(ctx, name).await);
    }
    // Per-group back-fill progress rides in the history status record.
    let history = ctx.status_of(queues::HISTORY);
    if let Ok(items) = history.items().await {
        for (key, value) in items {
            if key != "last" && key != "size" {
                out.push_str(&format!("history {key}: at message {value}\n"));
            }
        }
    }
    out
}

async fn fetch(ctx: &Arc<AppContext>, arg: &str) -> String {
    let Ok(gid) = arg.trim().parse::<i64>() else {
        return format!("not a gid: {arg}");
    };
    let task = queues::HistoryTask { gid };
    match ctx.history_queue().put(&task).await {
        Ok(()) => format!(
            "Added <pre>{}</pre> into history fetching queue",
            tg_html_entity(&serde_json::to_string(&task).unwrap_or_default())
        ),
        Err(e) => format!("enqueue failed: {e}"),
    }
}

async fn dialogs(ctx: &Arc<AppContext>) -> String {
    let mut script = String::new();
    for client in ctx.senders.user_clients() {
        script.push_str(&format!("-- For client with UID {}\n", client.uid()));
        match client.dialogs().await {
            Ok(dialogs) => {
                for dialog in dialogs {
                    script.push_str(&format!(
                        "UPDATE groups SET master = {} WHERE gid = {};\n",
                        client.uid(),
                        dialog.chat_id
                    ));
                }
            }
            Err(e) => script.push_str(&format!("-- failed: {e}\n")),
        }
    }
    script.push_str("-- Generation complete\n");
    ctx.notifier.notify(&script).await;
    "Generation complete".to_string()
}

async fn help() -> String {
    let mut out = String::from("Commands:\n");
    for command in COMMANDS {
        out.push_str(&format!("/{} — {}\n", command.name, command.help));
    }
    out
}

/// Is this uid allowed to talk to the admin surface at all?
pub fn is_allowed(ctx: &AppContext, uid: i64) -> bool {
    ctx.config.is_admin(uid)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_advertised_command_is_in_the_table() {
        for name in [
            "exec", "py", "joinpub", "joinprv", "leave", "stat", "threads", "workers", "fetch",
            "dialogs", "help",
        ] {
            assert!(
                COMMANDS.iter().any(|c| c.name == name),
                "missing command {name}"
            );
        }
    }

    #[test]
    fn stats_is_an_alias_of_stat() {
        let entry = COMMANDS
            .iter()
            .find(|c| c.name == "stat" || c.aliases.contains(&"stat"))
            .unwrap();
        assert!(entry.aliases.contains(&"stats"));
    }
}
