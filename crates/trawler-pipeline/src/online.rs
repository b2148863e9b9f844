//! The online-presence policy behind read receipts.
//!
//! Once per local day a random online/offline window is drawn around the
//! configured hours; inside the window roughly one message in eleven gets a
//! read acknowledge, which is enough to look alive without looking eager.

use rand::Rng;

use trawler_core::util::{now_ts, random_time_around, today};

use crate::context::AppContext;

pub async fn need_to_be_online(ctx: &AppContext) -> bool {
    let global = ctx.global_count();

    let stored_day = global.get("today").await.ok().flatten().unwrap_or_default();
    let current_day = today();
    if stored_day != current_day {
        let online = random_time_around(ctx.config.presence.online_hour);
        let offline = random_time_around(ctx.config.presence.offline_hour);
        let _ = global.set("today", &current_day).await;
        let _ = global.set("online_time", &online.to_string()).await;
        let _ = global.set("offline_time", &offline.to_string()).await;
    }

    let online = global.get_i64("online_time").await.ok().flatten().unwrap_or(0);
    let offline = global.get_i64("offline_time").await.ok().flatten().unwrap_or(0);
    let now = now_ts();

    online < now && now < offline && rand::thread_rng().gen_range(0..=10) == 5
}
