//! Statistics reporter (C11): drains the coalesced counters every 30 s and
//! ships them to the time-series sink as line-protocol points. Points lost on
//! a crash are gone; counters are cheap.

use std::time::Duration;

use tokio::sync::watch;
use tracing::{info, warn};

use trawler_cache::stats::CounterPoint;
use trawler_core::config::REPORT_INTERVAL_SECS;
use trawler_core::util::now_ts;

use crate::context::AppContext;
use crate::queues;

/// One point in InfluxDB line protocol, seconds precision.
pub fn line_protocol(point: &CounterPoint, ts: i64) -> String {
    let mut line = point.measurement.clone();
    for (key, value) in &point.tags {
        line.push(',');
        line.push_str(key);
        line.push('=');
        line.push_str(&value.replace(' ', "\\ ").replace(',', "\\,"));
    }
    line.push(' ');
    line.push_str(&point.field);
    line.push('=');
    line.push_str(&point.value.to_string());
    line.push(' ');
    line.push_str(&ts.to_string());
    line
}

/// The report loop. Not a queue worker: it wakes on a timer, not on pops.
pub async fn run_reporter(ctx: std::sync::Arc<AppContext>, mut shutdown: watch::Receiver<bool>) {
    info!("report worker has started");
    let status = ctx.status_of(queues::REPORT);
    let http = reqwest::Client::new();
    let sink = ctx.config.metrics.influx_url.clone();

    loop {
        tokio::select! {
            _ = tokio::time::sleep(Duration::from_secs(REPORT_INTERVAL_SECS)) => {}
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    return;
                }
                continue;
            }
        }

        let points = match ctx.stats.drain().await {
            Ok(points) => points,
            Err(e) => {
                warn!("statistics drain failed: {e}");
                continue;
            }
        };
        let _ = status.set("last", &now_ts().to_string()).await;

        if points.is_empty() || sink.is_empty() {
            continue;
        }

        let now = now_ts();
        let body = points
            .iter()
            .map(|p| line_protocol(p, now))
            .collect::<Vec<_>>()
            .join("\n");

        let url = format!(
            "{}/write?db={}&precision=s",
            sink.trim_end_matches('/'),
            ctx.config.metrics.database
        );
        match http.post(&url).body(body).send().await {
            Ok(response) if !response.status().is_success() => {
                warn!(status = %response.status(), "metrics sink rejected points");
            }
            Ok(_) => {}
            Err(e) => warn!("metrics sink unreachable: {e}"),
        }
    }
}
