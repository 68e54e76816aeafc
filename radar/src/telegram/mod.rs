//! The bot actor: command dispatch over long polling, plus the hot-news
//! monitor task. Shares nothing with the pipeline except the store.

use chrono::Utc;
use const_format::formatcp;
use std::sync::Arc;
use std::time::Duration;
use teloxide::prelude::*;
use teloxide::types::{InlineKeyboardButton, InlineKeyboardMarkup, MessageId, ParseMode};
use teloxide::utils::command::BotCommands;
use teloxide::{ApiError, RequestError};

use crate::llm::analyzer::{CardInput, NewsAnalyzer};
use crate::models::subscriber::NewSubscriber;
use crate::store::analyzed::NewsWithCluster;
use crate::{App, store};

pub mod monitor;
pub mod render;

const BOT_NAME: &str = "AlphaPulse Radar";
/// Pause between consecutive sends so listings do not trip flood limits.
const SEND_SPACING: Duration = Duration::from_millis(100);

const START_TEXT: &str = formatcp!(
    "🔥 <b>Welcome to {BOT_NAME}!</b>\n\n\
     I track the hottest financial news for you.\n\n\
     📊 <b>Commands:</b>\n\
     /top - Top news by hotness\n\
     /latest - Recently analyzed news\n\
     /search - Keyword search\n\
     /subscribe - Hot-news alerts\n\
     /unsubscribe - Stop alerts\n\
     /mystatus - Subscription status\n\
     /help - Help\n\n\
     📌 <b>Examples:</b>\n\
     <code>/top 10 24</code> - Top-10 for the last 24 hours\n\
     <code>/latest 5</code> - Last 5 analyzed stories\n\
     <code>/search bitcoin etf</code> - Stories mentioning bitcoin or etf\n\n\
     🔔 Subscribe with /subscribe to get hot stories pushed automatically!"
);

const HELP_TEXT: &str = "📖 <b>Command reference</b>\n\n\
     <b>1️⃣ Top by hotness:</b>\n\
     <code>/top [count] [hours]</code>\n\
     • count - how many stories (1-20, default 10)\n\
     • hours - lookback window (1-168, default 24)\n\n\
     <b>2️⃣ Latest analyzed:</b>\n\
     <code>/latest [count]</code>\n\
     • count - how many stories (1-20, default 10)\n\n\
     <b>3️⃣ Search:</b>\n\
     <code>/search &lt;keywords…&gt;</code>\n\
     Case-insensitive, matches any keyword across headline and text.\n\n\
     📊 Every card shows hotness, tickers, sources and a button for a\n\
     detailed analytical card.\n\n\
     🔔 <b>Alerts:</b> /subscribe to get stories above the hotness\n\
     threshold as they appear, /unsubscribe to stop.";

#[derive(BotCommands, Clone)]
#[command(rename_rule = "lowercase")]
pub enum Command {
    Start,
    Help,
    Top(String),
    Latest(String),
    Search(String),
    Subscribe,
    Unsubscribe,
    Mystatus,
}

pub async fn run_bot(ctx: App, bot: Bot, analyzer: Arc<NewsAnalyzer>) {
    seed_legacy_subscriber(&ctx).await;

    if let Err(err) = bot.set_my_commands(Command::bot_commands()).await {
        tracing::warn!(?err, "Failed to register bot commands");
    }

    let handler = dptree::entry()
        .branch(
            Update::filter_message()
                .filter_command::<Command>()
                .endpoint(handle_command),
        )
        .branch(Update::filter_callback_query().endpoint(handle_callback));

    tracing::info!("Telegram bot started");
    Dispatcher::builder(bot, handler)
        .dependencies(dptree::deps![ctx, analyzer])
        .enable_ctrlc_handler()
        .build()
        .dispatch()
        .await;
}

/// Migration path for deployments that configured a single legacy chat id
/// before subscriptions existed.
async fn seed_legacy_subscriber(ctx: &App) {
    let Some(chat_id) = ctx.config.legacy_chat_id else {
        return;
    };
    let seed = async {
        let mut conn = ctx.diesel.get().await?;
        store::subscribers::subscribe(
            &mut conn,
            &NewSubscriber {
                chat_id,
                username: Some("legacy_user".to_string()),
                first_name: None,
                last_name: None,
            },
        )
        .await?;
        Ok::<_, eyre::Error>(())
    };
    match seed.await {
        Ok(()) => tracing::info!(chat_id, "Legacy chat id subscribed"),
        Err(err) => tracing::warn!(chat_id, ?err, "Failed to seed legacy subscriber"),
    }
}

async fn handle_command(bot: Bot, msg: Message, cmd: Command, ctx: App) -> ResponseResult<()> {
    let chat_id = msg.chat.id;
    let result = match cmd {
        Command::Start => send_html(&bot, chat_id, START_TEXT).await,
        Command::Help => send_html(&bot, chat_id, HELP_TEXT).await,
        Command::Top(args) => top_command(&bot, &ctx, chat_id, &args).await,
        Command::Latest(args) => latest_command(&bot, &ctx, chat_id, &args).await,
        Command::Search(args) => search_command(&bot, &ctx, chat_id, &args).await,
        Command::Subscribe => subscribe_command(&bot, &ctx, &msg).await,
        Command::Unsubscribe => unsubscribe_command(&bot, &ctx, chat_id).await,
        Command::Mystatus => mystatus_command(&bot, &ctx, chat_id).await,
    };

    if let Err(err) = result {
        tracing::error!(chat_id = chat_id.0, ?err, "Command handler failed");
        let _ = bot
            .send_message(chat_id, "❌ Something went wrong. Try again later.")
            .await;
    }
    Ok(())
}

async fn handle_callback(
    bot: Bot,
    q: CallbackQuery,
    ctx: App,
    analyzer: Arc<NewsAnalyzer>,
) -> ResponseResult<()> {
    bot.answer_callback_query(q.id.clone()).await?;

    let Some(data) = q.data.as_deref() else {
        return Ok(());
    };
    let Some(id) = data.strip_prefix("analyze_") else {
        return Ok(());
    };
    let Ok(news_id) = id.parse::<i32>() else {
        return Ok(());
    };
    let Some(message) = q.message else {
        return Ok(());
    };

    if let Err(err) =
        send_detailed_analysis(&bot, &ctx, &analyzer, message.chat.id, message.id, news_id).await
    {
        tracing::error!(news_id, ?err, "Failed to produce detailed analysis");
        let _ = bot
            .edit_message_text(
                message.chat.id,
                message.id,
                "❌ Error generating analysis. Try again later.",
            )
            .await;
    }
    Ok(())
}

async fn send_detailed_analysis(
    bot: &Bot,
    ctx: &App,
    analyzer: &NewsAnalyzer,
    chat_id: ChatId,
    message_id: MessageId,
    news_id: i32,
) -> Result<(), eyre::Error> {
    bot.edit_message_text(chat_id, message_id, "⏳ Generating detailed analysis…")
        .await?;

    let mut conn = ctx.diesel.get().await?;
    let Some(item) = store::analyzed::by_id(&mut conn, news_id).await? else {
        bot.edit_message_text(chat_id, message_id, "❌ News item not found")
            .await?;
        return Ok(());
    };
    drop(conn);

    let card = generate_card(analyzer, &item).await;
    let text = render::card_message(&item, &card);
    let sanitized = render::close_dangling_markdown(&text);

    match bot
        .edit_message_text(chat_id, message_id, &sanitized)
        .parse_mode(ParseMode::Markdown)
        .disable_web_page_preview(true)
        .await
    {
        Ok(_) => Ok(()),
        Err(RequestError::Api(ApiError::CantParseEntities(_))) => {
            bot.edit_message_text(chat_id, message_id, &text).await?;
            Ok(())
        }
        Err(err) => Err(err.into()),
    }
}

/// One analytical card per story; callers decide how to wrap it.
pub(crate) async fn generate_card(analyzer: &NewsAnalyzer, item: &NewsWithCluster) -> String {
    let tickers = item.news.ticker_list();
    let urls = item.news.url_list();
    let source = urls
        .first()
        .map(|u| crate::pipeline::hotness::registrable_domain(u))
        .unwrap_or_else(|| "unknown".to_string());

    analyzer
        .generate_card(&CardInput {
            headline: &item.news.headline,
            content: &item.news.content,
            tickers: &tickers,
            hotness: item.news.ai_hotness,
            urls: &urls,
            published_at: item.news.published_time,
            source: &source,
        })
        .await
        .analysis_text
}

async fn top_command(
    bot: &Bot,
    ctx: &App,
    chat_id: ChatId,
    args: &str,
) -> Result<(), eyre::Error> {
    let Some((limit, hours)) = parse_top_args(args) else {
        bot.send_message(chat_id, "❌ Bad format. Use: /top [count] [hours]")
            .await?;
        return Ok(());
    };

    bot.send_message(
        chat_id,
        format!("🔍 Fetching top-{limit} news for the last {hours}h…"),
    )
    .await?;

    let mut conn = ctx.diesel.get().await?;
    let since = Utc::now().naive_utc() - chrono::Duration::hours(hours);
    let items = store::analyzed::top(&mut conn, limit, since).await?;
    drop(conn);

    if items.is_empty() {
        bot.send_message(chat_id, format!("📭 No news in the last {hours} hours"))
            .await?;
        return Ok(());
    }

    let total = items.len();
    for (i, item) in items.iter().enumerate() {
        send_news_card(bot, chat_id, &render::top_news_message(item, i + 1, total), item).await?;
        tokio::time::sleep(SEND_SPACING).await;
    }
    Ok(())
}

async fn latest_command(
    bot: &Bot,
    ctx: &App,
    chat_id: ChatId,
    args: &str,
) -> Result<(), eyre::Error> {
    let Some(limit) = parse_latest_args(args) else {
        bot.send_message(chat_id, "❌ Bad format. Use: /latest [count]")
            .await?;
        return Ok(());
    };

    bot.send_message(chat_id, format!("🔍 Fetching the latest {limit} news…"))
        .await?;

    let mut conn = ctx.diesel.get().await?;
    let items = store::analyzed::latest(&mut conn, limit).await?;
    drop(conn);

    if items.is_empty() {
        bot.send_message(chat_id, "📭 No analyzed news yet").await?;
        return Ok(());
    }

    let total = items.len();
    for (i, item) in items.iter().enumerate() {
        send_news_card(
            bot,
            chat_id,
            &render::latest_news_message(item, i + 1, total),
            item,
        )
        .await?;
        tokio::time::sleep(SEND_SPACING).await;
    }
    Ok(())
}

async fn search_command(
    bot: &Bot,
    ctx: &App,
    chat_id: ChatId,
    args: &str,
) -> Result<(), eyre::Error> {
    let keywords: Vec<String> = args.split_whitespace().map(str::to_string).collect();
    if keywords.is_empty() {
        bot.send_message(chat_id, "❌ Bad format. Use: /search <keywords…>")
            .await?;
        return Ok(());
    }

    bot.send_message(chat_id, format!("🔍 Searching for: {}…", keywords.join(", ")))
        .await?;

    let mut conn = ctx.diesel.get().await?;
    let items = store::analyzed::search(&mut conn, &keywords, 10).await?;
    drop(conn);

    if items.is_empty() {
        bot.send_message(chat_id, "📭 Nothing found for those keywords")
            .await?;
        return Ok(());
    }

    let total = items.len();
    for (i, item) in items.iter().enumerate() {
        send_news_card(
            bot,
            chat_id,
            &render::latest_news_message(item, i + 1, total),
            item,
        )
        .await?;
        tokio::time::sleep(SEND_SPACING).await;
    }
    Ok(())
}

async fn subscribe_command(bot: &Bot, ctx: &App, msg: &Message) -> Result<(), eyre::Error> {
    let chat_id = msg.chat.id;
    let mut conn = ctx.diesel.get().await?;

    if store::subscribers::is_subscribed(&mut conn, chat_id.0).await? {
        bot.send_message(chat_id, "✅ You are already subscribed to hot-news alerts!")
            .await?;
        return Ok(());
    }

    let user = msg.from();
    store::subscribers::subscribe(
        &mut conn,
        &NewSubscriber {
            chat_id: chat_id.0,
            username: user.and_then(|u| u.username.clone()),
            first_name: user.map(|u| u.first_name.clone()),
            last_name: user.and_then(|u| u.last_name.clone()),
        },
    )
    .await?;
    drop(conn);

    bot.send_message(
        chat_id,
        "🔔 <b>Subscription active!</b>\n\n\
         You will now get alerts for hot news as they appear.\n\n\
         Use /unsubscribe to stop.",
    )
    .parse_mode(ParseMode::Html)
    .await?;
    Ok(())
}

async fn unsubscribe_command(bot: &Bot, ctx: &App, chat_id: ChatId) -> Result<(), eyre::Error> {
    let mut conn = ctx.diesel.get().await?;
    let was_subscribed = store::subscribers::is_subscribed(&mut conn, chat_id.0).await?;
    if !was_subscribed {
        bot.send_message(chat_id, "ℹ️ You are not subscribed").await?;
        return Ok(());
    }

    store::subscribers::unsubscribe(&mut conn, chat_id.0).await?;
    drop(conn);
    bot.send_message(
        chat_id,
        "🔕 Unsubscribed. Use /subscribe to turn alerts back on.",
    )
    .await?;
    Ok(())
}

async fn mystatus_command(bot: &Bot, ctx: &App, chat_id: ChatId) -> Result<(), eyre::Error> {
    let mut conn = ctx.diesel.get().await?;
    let subscriber = store::subscribers::get(&mut conn, chat_id.0).await?;
    drop(conn);

    let text = match subscriber {
        Some(s) if s.is_active => {
            let since = s.subscribed_at.format("%d.%m.%Y %H:%M");
            let last = s
                .last_notification_at
                .map(|t| t.format("%d.%m.%Y %H:%M").to_string())
                .unwrap_or_else(|| "never".to_string());
            format!(
                "✅ <b>Subscribed</b>\n\nSince: {since}\nLast alert: {last}"
            )
        }
        _ => "🔕 <b>Not subscribed</b>\n\nUse /subscribe to get hot-news alerts.".to_string(),
    };

    send_html(bot, chat_id, &text).await
}

async fn send_html(bot: &Bot, chat_id: ChatId, text: &str) -> Result<(), eyre::Error> {
    bot.send_message(chat_id, text)
        .parse_mode(ParseMode::Html)
        .disable_web_page_preview(true)
        .await?;
    Ok(())
}

async fn send_news_card(
    bot: &Bot,
    chat_id: ChatId,
    text: &str,
    item: &NewsWithCluster,
) -> Result<(), eyre::Error> {
    bot.send_message(chat_id, text)
        .parse_mode(ParseMode::Html)
        .reply_markup(analyze_keyboard(item.news.id))
        .disable_web_page_preview(true)
        .await?;
    Ok(())
}

fn analyze_keyboard(news_id: i32) -> InlineKeyboardMarkup {
    InlineKeyboardMarkup::new([[InlineKeyboardButton::callback(
        "📊 Detailed analysis",
        format!("analyze_{news_id}"),
    )]])
}

/// Markdown send with the two failure paths the backend actually produces:
/// one retry after a rate limit, and a plain-text fallback when entity
/// parsing rejects the markup.
pub async fn send_markdown_with_fallback(
    bot: &Bot,
    chat_id: ChatId,
    text: &str,
) -> Result<(), RequestError> {
    let sanitized = render::close_dangling_markdown(text);

    match send_markdown(bot, chat_id, &sanitized).await {
        Ok(()) => Ok(()),
        Err(RequestError::RetryAfter(delay)) => {
            tokio::time::sleep(delay).await;
            send_markdown(bot, chat_id, &sanitized).await
        }
        Err(RequestError::Api(ApiError::CantParseEntities(_))) => {
            bot.send_message(chat_id, text)
                .disable_web_page_preview(true)
                .await?;
            Ok(())
        }
        Err(err) => Err(err),
    }
}

async fn send_markdown(bot: &Bot, chat_id: ChatId, text: &str) -> Result<(), RequestError> {
    bot.send_message(chat_id, text)
        .parse_mode(ParseMode::Markdown)
        .disable_web_page_preview(true)
        .await
        .map(|_| ())
}

fn parse_top_args(args: &str) -> Option<(i64, i64)> {
    let mut parts = args.split_whitespace();
    let limit = match parts.next() {
        None => 10,
        Some(raw) => raw.parse::<i64>().ok()?.clamp(1, 20),
    };
    let hours = match parts.next() {
        None => 24,
        Some(raw) => raw.parse::<i64>().ok()?.clamp(1, 168),
    };
    Some((limit, hours))
}

fn parse_latest_args(args: &str) -> Option<i64> {
    match args.split_whitespace().next() {
        None => Some(10),
        Some(raw) => raw.parse::<i64>().ok().map(|n| n.clamp(1, 20)),
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn top_args_defaults_and_clamps() {
        assert_eq!(parse_top_args(""), Some((10, 24)));
        assert_eq!(parse_top_args("5"), Some((5, 24)));
        assert_eq!(parse_top_args("15 48"), Some((15, 48)));
        assert_eq!(parse_top_args("100 500"), Some((20, 168)));
        assert_eq!(parse_top_args("0 0"), Some((1, 1)));
        assert_eq!(parse_top_args("abc"), None);
    }

    #[test]
    fn latest_args_defaults_and_clamps() {
        assert_eq!(parse_latest_args(""), Some(10));
        assert_eq!(parse_latest_args("7"), Some(7));
        assert_eq!(parse_latest_args("99"), Some(20));
        assert_eq!(parse_latest_args("x"), None);
    }
}
