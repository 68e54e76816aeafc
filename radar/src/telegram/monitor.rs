//! Hot-news push monitor: watches for freshly analyzed stories above the
//! hotness threshold and fans them out to active subscribers.

use chrono::Utc;
use retainer::Cache;
use std::sync::Arc;
use std::time::Duration;
use teloxide::prelude::*;

use crate::llm::analyzer::NewsAnalyzer;
use crate::telegram::{generate_card, render, send_markdown_with_fallback};
use crate::{App, store};

/// Only the freshest rows are candidates per tick; anything older fell out
/// of the lookback window anyway.
const MONITOR_FETCH_LIMIT: i64 = 20;

pub async fn run(ctx: App, bot: Bot, analyzer: Arc<NewsAnalyzer>) {
    let interval = ctx.config.monitor_interval;
    let threshold = ctx.config.hotness_threshold;

    // Bounded replacement for an ever-growing notified set: entries expire
    // once the row can no longer match the created_at filter. A restart may
    // resend at most the last lookback window of alerts.
    let notified: Arc<Cache<i32, ()>> = Arc::new(Cache::new());
    let purge = {
        let notified = notified.clone();
        tokio::spawn(async move { notified.monitor(4, 0.25, Duration::from_secs(30)).await })
    };

    tracing::info!(
        threshold,
        interval_s = interval.as_secs(),
        "Hot-news monitor started"
    );

    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    let mut ticker = tokio::time::interval(interval);
    loop {
        tokio::select! {
            _ = &mut shutdown => {
                tracing::info!("Hot-news monitor shutting down");
                break;
            }
            _ = ticker.tick() => {
                if let Err(err) = check_and_notify(&ctx, &bot, &analyzer, &notified).await {
                    tracing::error!(?err, "Hot-news check failed");
                }
            }
        }
    }

    purge.abort();
}

async fn check_and_notify(
    ctx: &App,
    bot: &Bot,
    analyzer: &NewsAnalyzer,
    notified: &Cache<i32, ()>,
) -> Result<(), eyre::Error> {
    let mut conn = ctx.diesel.get().await?;

    let subscribers = store::subscribers::active_subscribers(&mut conn).await?;
    if subscribers.is_empty() {
        return Ok(());
    }

    // The 2x lookback tolerates one missed tick without dropping alerts;
    // the notified cache keeps the overlap from double-sending.
    let lookback = ctx.config.monitor_interval * 2;
    let since = Utc::now().naive_utc() - chrono::Duration::from_std(lookback)?;
    let hot = store::analyzed::hot_new_since(
        &mut conn,
        ctx.config.hotness_threshold,
        since,
        MONITOR_FETCH_LIMIT,
    )
    .await?;

    for item in hot {
        if notified.get(&item.news.id).await.is_some() {
            continue;
        }

        tracing::info!(
            analyzed_id = item.news.id,
            hotness = item.news.ai_hotness,
            headline = %item.news.headline.chars().take(60).collect::<String>(),
            "Sending hot-news alert"
        );

        // One card per story, shared by every subscriber.
        let card = generate_card(analyzer, &item).await;
        let alert = render::alert_message(&item, &card);

        let mut sent = 0usize;
        let mut failed = 0usize;
        for subscriber in &subscribers {
            match send_markdown_with_fallback(bot, ChatId(subscriber.chat_id), &alert).await {
                Ok(()) => {
                    sent += 1;
                    if let Err(err) =
                        store::subscribers::touch_notification(&mut conn, subscriber.chat_id).await
                    {
                        tracing::warn!(
                            chat_id = subscriber.chat_id,
                            ?err,
                            "Failed to record notification time"
                        );
                    }
                }
                Err(err) => {
                    tracing::warn!(chat_id = subscriber.chat_id, ?err, "Alert delivery failed");
                    failed += 1;
                }
            }
            tokio::time::sleep(Duration::from_millis(100)).await;
        }

        notified
            .insert(item.news.id, (), ctx.config.monitor_interval * 4)
            .await;
        tracing::info!(analyzed_id = item.news.id, sent, failed, "Alert fan-out done");
    }

    Ok(())
}
