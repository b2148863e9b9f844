//! Twilio voice/SMS webhooks. Both endpoints forward what happened to the
//! admin channel and answer with minimal TwiML.

use std::collections::HashMap;
use std::sync::Arc;

use axum::{
    extract::{Form, State},
    http::header,
    response::IntoResponse,
};
use tracing::warn;

use trawler_pipeline::AppContext;
use trawler_telegram::Notify as _;

const VOICE_TWIML: &str =
    r#"<?xml version="1.0" encoding="UTF-8"?><Response><Record/><Hangup/></Response>"#;
const SMS_TWIML: &str = r#"<?xml version="1.0" encoding="UTF-8"?><Response/>"#;

fn field<'a>(form: &'a HashMap<String, String>, key: &str) -> &'a str {
    form.get(key).map(String::as_str).unwrap_or("<unknown>")
}

pub async fn voice(
    State(ctx): State<Arc<AppContext>>,
    Form(form): Form<HashMap<String, String>>,
) -> impl IntoResponse {
    let sender = field(&form, "From");
    let me = field(&form, "To");
    warn!(sender, me, "voice call recorded");
    ctx.notifier
        .notify(&format!("Recorded voice from {sender} to {me}."))
        .await;
    ([(header::CONTENT_TYPE, "application/xml")], VOICE_TWIML)
}

pub async fn sms(
    State(ctx): State<Arc<AppContext>>,
    Form(form): Form<HashMap<String, String>>,
) -> impl IntoResponse {
    let sender = field(&form, "From");
    let me = field(&form, "To");
    let body = field(&form, "Body");
    warn!(sender, me, "sms received");
    ctx.notifier
        .notify(&format!("Received SMS from {sender} to {me}: \n{body}"))
        .await;
    ([(header::CONTENT_TYPE, "application/xml")], SMS_TWIML)
}
