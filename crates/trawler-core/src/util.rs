use chrono::{Datelike, Local, Timelike};

/// Current unix timestamp, seconds.
pub fn now_ts() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

/// Local date as `YYYY-MM-DD` (used for daily cache rotation).
pub fn today() -> String {
    Local::now().format("%Y-%m-%d").to_string()
}

/// Yesterday's local date as `YYYY-MM-DD`.
pub fn yesterday() -> String {
    (Local::now() - chrono::Duration::days(1))
        .format("%Y-%m-%d")
        .to_string()
}

/// Local hour of day, 0..=23.
pub fn local_hour() -> u32 {
    Local::now().hour()
}

/// Blob path for media observed now: `YYYY/MM`.
pub fn media_path() -> String {
    let now = Local::now();
    format!("{}/{:02}", now.year(), now.month())
}

/// Escape `&`, `<`, `>` for Telegram HTML parse mode.
pub fn tg_html_entity(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}

/// Telegram's signed ("bot marked") chat id convention: positive for users,
/// negative for legacy groups, `-100<id>` (digit concatenation) for channels
/// and supergroups.
pub fn mark_channel_id(channel_id: i64) -> i64 {
    format!("-100{channel_id}")
        .parse::<i64>()
        .unwrap_or(-channel_id)
}

/// Strip the `-100` prefix from a marked channel id; legacy group ids are
/// returned negated, user ids unchanged. Channel internal ids live above
/// 10^9, so their marked form is always below -10^12.
pub fn unmark_chat_id(marked: i64) -> i64 {
    if marked >= 0 {
        return marked;
    }
    let positive = -marked;
    if marked <= -1_000_000_000_000 {
        let s = positive.to_string();
        if let Some(stripped) = s.strip_prefix("100") {
            if let Ok(id) = stripped.parse::<i64>() {
                return id;
            }
        }
    }
    positive
}

/// A uniformly random timestamp today within ±1 hour of `hour`.
pub fn random_time_around(hour: u32) -> i64 {
    use rand::Rng;
    let mut rng = rand::thread_rng();
    let h = rng.gen_range(hour.saturating_sub(1)..=(hour + 1).min(23));
    let now = Local::now();
    let at = now
        .with_hour(h)
        .and_then(|t| t.with_minute(rng.gen_range(0..60)))
        .and_then(|t| t.with_second(rng.gen_range(0..60)))
        .unwrap_or(now);
    at.timestamp()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn marked_ids_concatenate_digits() {
        assert_eq!(mark_channel_id(1234567890), -1001234567890);
        assert_eq!(mark_channel_id(9999999999), -1009999999999);
    }

    #[test]
    fn unmark_reverses_mark() {
        assert_eq!(unmark_chat_id(-1001234567890), 1234567890);
        assert_eq!(unmark_chat_id(4242), 4242);
    }

    #[test]
    fn legacy_group_ids_just_negate() {
        assert_eq!(unmark_chat_id(-9876), 9876);
    }

    #[test]
    fn html_escaping() {
        assert_eq!(tg_html_entity("<a&b>"), "&lt;a&amp;b&gt;");
    }

    #[test]
    fn random_time_stays_in_range() {
        let ts = random_time_around(12);
        let now = now_ts();
        // Same day, so within 24h either way.
        assert!((ts - now).abs() < 24 * 3600);
    }
}
