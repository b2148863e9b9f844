use std::sync::Arc;

use axum::{routing::post, Router};

use trawler_pipeline::AppContext;

pub mod telephony;
pub mod webhooks;

pub fn build_router(ctx: Arc<AppContext>) -> Router {
    let voice_path = ctx.config.webhook.voice_path.clone();
    let sms_path = ctx.config.webhook.sms_path.clone();
    Router::new()
        .route("/webhook/bot/{name}", post(webhooks::bot_webhook))
        .route(&voice_path, post(telephony::voice))
        .route(&sms_path, post(telephony::sms))
        .with_state(ctx)
}
