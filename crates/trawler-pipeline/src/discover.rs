//! Link discovery and admission (C7/C8): extract Telegram links from observed
//! text, dedup them against the recency set, probe candidates and decide who
//! joins what.

use std::collections::BTreeSet;
use std::sync::LazyLock;
use std::time::Duration;

use base64::Engine;
use regex::Regex;
use tracing::{debug, info, warn};

use trawler_core::error::IngestError;
use trawler_core::util::tg_html_entity;
use trawler_store::GroupRecord;
use trawler_store::Store as _;
use trawler_telegram::types::{ChatKind, PeerRef};
use trawler_telegram::{BotApi as _, Notify as _, TgError, UserClient as _};

use crate::context::AppContext;
use crate::queues::{JoinTask, LinkType};

static PUBLIC_LINK: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"t(?:elegram)?\.me/([a-zA-Z][\w\d]{3,30}[a-zA-Z\d])").expect("public link regex")
});
static PUBLIC_AT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"@([a-zA-Z][\w\d]{3,30}[a-zA-Z\d])").expect("public mention regex")
});
static PRIVATE_INVITE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"t(?:elegram)?\.me/joinchat/([a-zA-Z0-9_-]{22})").expect("invite regex")
});
static CHINESE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[一-鿿]").expect("chinese regex"));

/// Public usernames mentioned in `text`, both as links and as @mentions.
pub fn extract_public_links(text: &str) -> BTreeSet<String> {
    PUBLIC_LINK
        .captures_iter(text)
        .chain(PUBLIC_AT.captures_iter(text))
        .filter_map(|c| c.get(1))
        .map(|m| m.as_str().to_string())
        .collect()
}

/// Private invite hashes mentioned in `text`.
pub fn extract_invite_hashes(text: &str) -> BTreeSet<String> {
    PRIVATE_INVITE
        .captures_iter(text)
        .filter_map(|c| c.get(1))
        .map(|m| m.as_str().to_string())
        .collect()
}

/// Decode the 16 bytes behind an invite hash: `uid:u32be gid:u32be nonce:u64be`.
pub fn decode_invite_hash(hash: &str) -> Option<(u32, u32, u64)> {
    let bytes = base64::engine::general_purpose::URL_SAFE_NO_PAD
        .decode(hash)
        .ok()?;
    if bytes.len() != 16 {
        return None;
    }
    let uid = u32::from_be_bytes(bytes[0..4].try_into().ok()?);
    let gid = u32::from_be_bytes(bytes[4..8].try_into().ok()?);
    let nonce = u64::from_be_bytes(bytes[8..16].try_into().ok()?);
    Some((uid, gid, nonce))
}

/// Bot-marked chat id for a decoded invite gid.
pub fn canonical_chat_id(gid: u32) -> i64 {
    if gid > 1_000_000_000 {
        -100 * i64::from(gid)
    } else {
        -i64::from(gid)
    }
}

pub fn is_chinese_text(text: &str) -> bool {
    CHINESE.is_match(text)
}

/// At least a tenth of the sampled history must be Chinese.
async fn is_chinese_group(ctx: &AppContext, peer: &PeerRef) -> Result<bool, IngestError> {
    let texts = ctx
        .senders
        .invoker()
        .recent_texts(peer, 100)
        .await
        .map_err(IngestError::from)?;
    let total = texts.len();
    let chinese = texts.iter().filter(|t| is_chinese_text(t)).count();

    ctx.notifier
        .notify(&format!(
            "Quick message analysis for candidate group: {chinese}/{total} Chinese"
        ))
        .await;
    Ok(chinese > (total + 9) / 10)
}

/// The FindLink handler body: scan one text for candidates and dispatch them.
pub async fn find_link_to_join(ctx: &AppContext, text: &str) -> Result<(), IngestError> {
    let public = extract_public_links(text);
    let private = extract_invite_hashes(text);

    if !public.is_empty() || !private.is_empty() {
        info!(?public, ?private, "found links");
    }

    let recent = ctx.recent_found_links();

    for link in public {
        if ctx.config.discovery.blacklist.iter().any(|b| b == &link) {
            continue;
        }
        if recent.contains(&link).await.map_err(IngestError::transient)? {
            debug!(link, "in recent found links, skip");
            continue;
        }
        recent.add(&link).await.map_err(IngestError::transient)?;
        let (gid, joined) = test_and_join_public_channel(ctx, &link, false).await?;
        if joined {
            if let Some(gid) = gid {
                ctx.group_last_changed()
                    .add(&gid.to_string())
                    .await
                    .map_err(IngestError::transient)?;
            }
        }
    }

    for hash in private {
        if recent.contains(&hash).await.map_err(IngestError::transient)? {
            continue;
        }
        recent.add(&hash).await.map_err(IngestError::transient)?;
        handle_private_invite(ctx, &hash, false).await?;
    }

    Ok(())
}

/// The public-channel admission path. Returns the probed gid (when the chat
/// resolved to a channel) and whether a join was queued.
pub async fn test_and_join_public_channel(
    ctx: &AppContext,
    link: &str,
    join_now: bool,
) -> Result<(Option<i64>, bool), IngestError> {
    let Some(bot) = ctx
        .bots
        .get_available_bot()
        .await
        .map_err(IngestError::from)?
    else {
        debug!(link, "not enough usable bots, candidate dropped");
        return Ok((None, false));
    };

    // Be gentle with the Bot API.
    tokio::time::sleep(Duration::from_millis(100)).await;

    let info = match bot.get_chat(link).await {
        Ok(info) => info,
        Err(TgError::RetryAfter(seconds)) => {
            warn!(link, seconds, "bot rate limited while probing");
            ctx.bots
                .penalize(bot.token(), seconds)
                .await
                .map_err(IngestError::from)?;
            return Ok((None, false));
        }
        Err(TgError::ChatNotFound) => return Ok((None, false)),
        Err(e) => {
            debug!(link, error = %e, "probe failed, candidate dropped");
            return Ok((None, false));
        }
    };

    if !matches!(info.kind, ChatKind::Supergroup | ChatKind::Channel) {
        return Ok((None, false));
    }
    let gid = info.chat_id;

    if ctx
        .store
        .group_by_gid(gid)
        .await
        .map_err(|e| IngestError::Transient(e.to_string()))?
        .is_some()
    {
        debug!(link, gid, "group already known, skip");
        return Ok((Some(gid), false));
    }

    let count = match bot.member_count(link).await {
        Ok(count) => count,
        Err(e) => {
            debug!(link, error = %e, "member count failed");
            0
        }
    };

    let mut joined = false;
    if count >= ctx.config.discovery.group_member_join_limit || join_now {
        match ctx.senders.invoker().resolve_channel(link).await {
            Ok(Some(peer)) => {
                let should_join = join_now
                    || info.title.as_deref().is_some_and(is_chinese_text)
                    || info.description.as_deref().is_some_and(is_chinese_text)
                    || is_chinese_group(ctx, &peer).await?;
                if should_join {
                    ctx.join_queue()
                        .put(&JoinTask {
                            link_type: LinkType::Public,
                            link: link.to_string(),
                            peer: Some(peer),
                            group_type: kind_name(info.kind).to_string(),
                            title: info.title.clone().unwrap_or_default(),
                            member_count: count,
                        })
                        .await
                        .map_err(IngestError::transient)?;
                    joined = true;
                }
            }
            Ok(None) => debug!(link, "invoker could not resolve, join skipped"),
            Err(TgError::FloodWait(seconds)) => {
                warn!(link, seconds, "get entity flooded, join skipped");
            }
            Err(e) => return Err(e.into()),
        }
    } else {
        debug!(
            link,
            count,
            limit = ctx.config.discovery.group_member_join_limit,
            "below member limit, join skipped"
        );
    }

    ctx.store
        .insert_group(&GroupRecord {
            gid,
            name: info.title.clone(),
            link: info.username.clone().or_else(|| Some(link.to_string())),
            master_uid: joined.then(|| ctx.senders.invoker().uid()),
        })
        .await
        .map_err(|e| IngestError::Transient(e.to_string()))?;

    Ok((Some(gid), joined))
}

/// The private-invite admission path.
pub async fn handle_private_invite(
    ctx: &AppContext,
    hash: &str,
    join_now: bool,
) -> Result<(), IngestError> {
    let Some((uid, raw_gid, nonce)) = decode_invite_hash(hash) else {
        debug!(hash, "invite hash does not decode, dropped");
        return Ok(());
    };
    let gid = canonical_chat_id(raw_gid);

    if ctx
        .store
        .invite_exists(hash)
        .await
        .map_err(|e| IngestError::Transient(e.to_string()))?
    {
        return Ok(());
    }

    let preview = match ctx.senders.invoker().check_invite(hash).await {
        Ok(Some(preview)) => preview,
        // Already a participant.
        Ok(None) => return Ok(()),
        Err(TgError::InviteExpired) | Err(TgError::InviteInvalid) => return Ok(()),
        Err(TgError::FloodWait(seconds)) => {
            warn!(hash, seconds, "invite probe flooded, dropped");
            return Ok(());
        }
        Err(e) => return Err(e.into()),
    };

    ctx.invite_queue()
        .put(&trawler_store::GroupInviteRecord {
            invite_hash: hash.to_string(),
            inviter_uid: i64::from(uid),
            gid,
            random_nonce: nonce,
            title: preview.title.clone(),
        })
        .await
        .map_err(IngestError::transient)?;

    if ctx
        .store
        .group_by_gid(gid)
        .await
        .map_err(|e| IngestError::Transient(e.to_string()))?
        .is_some()
    {
        return Ok(());
    }

    if join_now {
        ctx.join_queue()
            .put(&JoinTask {
                link_type: LinkType::Private,
                link: hash.to_string(),
                peer: None,
                group_type: if preview.is_broadcast { "channel" } else { "group" }.to_string(),
                title: preview.title.clone(),
                member_count: preview.member_count,
            })
            .await
            .map_err(IngestError::transient)?;
    } else if preview.member_count > ctx.config.discovery.group_member_join_limit {
        ctx.notifier
            .notify(&format!(
                "invitation from t.me/joinchat/{hash}: {}, {} members\nJoin {} with /joinprv {hash}",
                tg_html_entity(&preview.title),
                preview.member_count,
                if preview.is_broadcast { "channel" } else { "group" },
            ))
            .await;
    }
    Ok(())
}

fn kind_name(kind: ChatKind) -> &'static str {
    match kind {
        ChatKind::Private => "private",
        ChatKind::Group => "group",
        ChatKind::Supergroup => "supergroup",
        ChatKind::Channel => "channel",
    }
}
