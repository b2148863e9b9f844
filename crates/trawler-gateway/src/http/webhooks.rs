//! Bot update ingress — `POST /webhook/bot/{name}` with a Bot API update as
//! JSON. Admin commands are intercepted before the ordinary fan-out.

use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use teloxide::types::{Update, UpdateKind};
use tracing::{debug, warn};

use trawler_pipeline::{ingress, AppContext};
use trawler_telegram::botapi::{event_from_update, parse_command};
use trawler_telegram::{BotApi as _, Notify as _, SenderClient};

use crate::admin;
use crate::app::bot_uid_from_token;

pub async fn bot_webhook(
    State(ctx): State<Arc<AppContext>>,
    Path(name): Path<String>,
    Json(update): Json<Update>,
) -> StatusCode {
    let Some(bot_config) = ctx
        .config
        .telegram
        .bots
        .iter()
        .find(|b| b.name == name)
        .cloned()
    else {
        warn!(name, "webhook for unknown bot");
        return StatusCode::NOT_FOUND;
    };

    // The admin bot answers commands from allow-listed uids; everything else
    // flows into the ordinary ingress fan-out.
    if bot_config.token == ctx.config.admin.bot_token {
        if let Some(handled) = try_admin_command(&ctx, &update).await {
            return handled;
        }
    }

    match event_from_update(update) {
        Some(event) => {
            if let Err(e) = ingress::handle_event(&ctx, bot_config.uid, event).await {
                warn!(bot = %name, error = %e, "webhook fan-out failed");
                return StatusCode::INTERNAL_SERVER_ERROR;
            }
            StatusCode::OK
        }
        None => {
            debug!(bot = %name, "webhook update carried nothing to ingest");
            StatusCode::OK
        }
    }
}

/// `Some(status)` when the update was an admin command and was answered.
async fn try_admin_command(ctx: &Arc<AppContext>, update: &Update) -> Option<StatusCode> {
    let UpdateKind::Message(message) = &update.kind else {
        return None;
    };
    let from_uid = message.from.as_ref().map(|u| u.id.0 as i64)?;
    if !admin::is_allowed(ctx, from_uid) {
        return None;
    }
    let text = message.text()?;
    let (command, arg) = parse_command(text)?;

    let reply = admin::dispatch(ctx, command, arg).await?;
    let admin_uid = bot_uid_from_token(&ctx.config.admin.bot_token);
    if let Some(SenderClient::Bot(bot)) = ctx.senders.get(admin_uid) {
        if let Err(e) = bot.send_html(message.chat.id.0, &reply).await {
            warn!(error = %e, "admin reply failed");
        }
    } else {
        // Admin bot not registered as a sender; the notifier still works.
        ctx.notifier.notify(&reply).await;
    }
    Some(StatusCode::OK)
}
