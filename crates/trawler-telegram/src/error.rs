//! Telegram failure vocabulary and its mapping onto the ingest taxonomy.

use thiserror::Error;

use trawler_core::IngestError;

/// Telegram-side failures, tagged by what the RPC layer told us. Adapter code
/// maps library errors here; workers map these onto [`IngestError`] policy.
#[derive(Debug, Clone, Error)]
pub enum TgError {
    #[error("flood wait {0}s")]
    FloodWait(u32),

    /// Bot API flavour of flood wait.
    #[error("retry after {0}s")]
    RetryAfter(u32),

    #[error("chat not found")]
    ChatNotFound,

    #[error("invite hash expired")]
    InviteExpired,

    #[error("invite hash invalid")]
    InviteInvalid,

    #[error("too many channels joined")]
    ChannelsTooMuch,

    #[error("channel is private or we were kicked")]
    ChannelPrivate,

    #[error("auth key unregistered")]
    AuthKeyUnregistered,

    #[error("peer id invalid")]
    PeerInvalid,

    #[error("user not a participant")]
    UserNotParticipant,

    #[error("rpc call failed, retry")]
    RpcFail,

    #[error("network error: {0}")]
    Network(String),

    #[error("unexpected telegram error: {0}")]
    Unexpected(String),
}

impl From<TgError> for IngestError {
    fn from(e: TgError) -> Self {
        match e {
            TgError::FloodWait(s) | TgError::RetryAfter(s) => {
                IngestError::RateLimited { seconds: s }
            }
            TgError::ChatNotFound
            | TgError::InviteExpired
            | TgError::InviteInvalid
            | TgError::PeerInvalid
            | TgError::UserNotParticipant => IngestError::NotFound(e.to_string()),
            TgError::ChannelsTooMuch => IngestError::QuotaExhausted,
            TgError::ChannelPrivate => IngestError::Forbidden(e.to_string()),
            TgError::AuthKeyUnregistered => IngestError::AuthLost(e.to_string()),
            TgError::RpcFail | TgError::Network(_) => IngestError::Transient(e.to_string()),
            TgError::Unexpected(_) => IngestError::Programmer(e.to_string()),
        }
    }
}

impl From<grammers_client::InvocationError> for TgError {
    fn from(e: grammers_client::InvocationError) -> Self {
        use grammers_client::InvocationError;
        match e {
            InvocationError::Rpc(rpc) => match rpc.name.as_str() {
                "FLOOD_WAIT" => TgError::FloodWait(rpc.value.unwrap_or(0)),
                "CHANNELS_TOO_MUCH" => TgError::ChannelsTooMuch,
                "CHANNEL_PRIVATE" => TgError::ChannelPrivate,
                "INVITE_HASH_EXPIRED" => TgError::InviteExpired,
                "INVITE_HASH_INVALID" => TgError::InviteInvalid,
                "AUTH_KEY_UNREGISTERED" => TgError::AuthKeyUnregistered,
                "PEER_ID_INVALID" => TgError::PeerInvalid,
                "USER_NOT_PARTICIPANT" => TgError::UserNotParticipant,
                "RPC_CALL_FAIL" => TgError::RpcFail,
                "USERNAME_NOT_OCCUPIED" | "USERNAME_INVALID" => TgError::ChatNotFound,
                _ => TgError::Unexpected(rpc.to_string()),
            },
            other => TgError::Network(other.to_string()),
        }
    }
}

impl From<teloxide::RequestError> for TgError {
    fn from(e: teloxide::RequestError) -> Self {
        use teloxide::{ApiError, RequestError};
        match e {
            RequestError::RetryAfter(secs) => TgError::RetryAfter(secs.seconds()),
            RequestError::Api(ApiError::ChatNotFound) => TgError::ChatNotFound,
            RequestError::Api(ApiError::BotKicked)
            | RequestError::Api(ApiError::BotKickedFromSupergroup) => TgError::ChannelPrivate,
            RequestError::Api(api) => TgError::Unexpected(api.to_string()),
            other => TgError::Network(other.to_string()),
        }
    }
}
