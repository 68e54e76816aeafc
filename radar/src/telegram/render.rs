//! Message rendering for the bot. List cards use Telegram HTML (everything
//! user-sourced is escaped); analytical cards come from the LLM in Markdown
//! and are sanitized before sending.

use chrono::NaiveDateTime;
use teloxide::utils::html;

use crate::store::analyzed::NewsWithCluster;

pub fn hotness_emoji(hotness: f64) -> &'static str {
    if hotness >= 0.8 {
        "🔴🔥"
    } else if hotness >= 0.6 {
        "🟠🔥"
    } else if hotness >= 0.4 {
        "🟡"
    } else {
        "🟢"
    }
}

/// Telegram rejects messages with unbalanced Markdown tokens, and the LLM
/// occasionally emits them. Close any dangling code block, then any dangling
/// inline token.
pub fn close_dangling_markdown(text: &str) -> String {
    let mut out = text.to_string();

    if out.matches("```").count() % 2 == 1 {
        out.push_str("\n```");
    }

    let without_fences = out.replace("```", "");
    for token in ['`', '*', '_'] {
        if without_fences.matches(token).count() % 2 == 1 {
            out.push(token);
        }
    }

    out
}

fn format_time(time: Option<NaiveDateTime>) -> String {
    time.map(|t| t.format("%d.%m.%Y %H:%M").to_string())
        .unwrap_or_else(|| "—".to_string())
}

fn timeline(first: NaiveDateTime, last: NaiveDateTime) -> String {
    let mut line = format!("First: {}", first.format("%d.%m %H:%M"));
    if first != last {
        line.push_str(&format!(" | Latest: {}", last.format("%d.%m %H:%M")));
    }
    line
}

fn sources_html(urls: &[String]) -> String {
    if urls.is_empty() {
        return "—".to_string();
    }
    urls.iter()
        .take(3)
        .map(|url| {
            let display: String = if url.chars().count() > 50 {
                format!("{}…", url.chars().take(47).collect::<String>())
            } else {
                url.clone()
            };
            format!("• <a href=\"{}\">{}</a>", url, html::escape(&display))
        })
        .collect::<Vec<_>>()
        .join("\n")
}

fn tickers_line(item: &NewsWithCluster) -> String {
    let tickers = item.news.ticker_list();
    if tickers.is_empty() {
        "—".to_string()
    } else {
        html::escape(&tickers.join(", "))
    }
}

/// One entry of a /top listing.
pub fn top_news_message(item: &NewsWithCluster, index: usize, total: usize) -> String {
    format!(
        "{emoji} <b>#{index}/{total} News</b>\n\n\
         <b>{headline}</b>\n\n\
         🔥 <b>Hotness:</b> {hotness:.2}/1.00\n\
         📊 <b>Tickers:</b> {tickers}\n\
         📄 <b>Documents:</b> {docs}\n\n\
         ⏰ <b>Timeline:</b>\n{timeline}\n\n\
         🔗 <b>Sources:</b>\n{sources}",
        emoji = hotness_emoji(item.news.ai_hotness),
        index = index,
        total = total,
        headline = html::escape(&item.news.headline),
        hotness = item.news.ai_hotness,
        tickers = tickers_line(item),
        docs = item.doc_count,
        timeline = timeline(item.first_time, item.last_time),
        sources = sources_html(&item.news.url_list()),
    )
}

/// One entry of a /latest listing; shows when the system picked it up.
pub fn latest_news_message(item: &NewsWithCluster, index: usize, total: usize) -> String {
    format!(
        "{emoji} <b>#{index}/{total} News</b>\n\n\
         <b>{headline}</b>\n\n\
         🔥 <b>Hotness:</b> {hotness:.2}/1.00\n\
         📊 <b>Tickers:</b> {tickers}\n\
         📄 <b>Documents:</b> {docs}\n\n\
         ⏰ <b>Added:</b> {created}\n\
         📅 <b>Published:</b> {published}\n\n\
         🔗 <b>Sources:</b>\n{sources}",
        emoji = hotness_emoji(item.news.ai_hotness),
        index = index,
        total = total,
        headline = html::escape(&item.news.headline),
        hotness = item.news.ai_hotness,
        tickers = tickers_line(item),
        docs = item.doc_count,
        created = format_time(Some(item.news.created_at)),
        published = format_time(item.news.published_time),
        sources = sources_html(&item.news.url_list()),
    )
}

/// The detailed analytical card shown by the inline button (Markdown).
pub fn card_message(item: &NewsWithCluster, analysis_text: &str) -> String {
    format!(
        "{emoji} *DETAILED ANALYSIS*\n\n\
         🔥 *Hotness: {hotness:.2}/1.00*\n\n\
         {card}",
        emoji = hotness_emoji(item.news.ai_hotness),
        hotness = item.news.ai_hotness,
        card = analysis_text,
    )
}

/// The push alert for a fresh hot story (Markdown).
pub fn alert_message(item: &NewsWithCluster, analysis_text: &str) -> String {
    format!(
        "🚨 *HOT NEWS!*\n\
         🔥 *Hotness: {hotness:.2}/1.00*\n\
         📄 *Documents:* {docs}\n\
         ⏰ *Timeline:* {timeline}\n\n\
         {separator}\n\
         {card}",
        hotness = item.news.ai_hotness,
        docs = item.doc_count,
        timeline = timeline(item.first_time, item.last_time),
        separator = "=".repeat(40),
        card = analysis_text,
    )
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::models::analyzed::AnalyzedNews;
    use chrono::NaiveDate;

    fn item() -> NewsWithCluster {
        let t = NaiveDate::from_ymd_opt(2025, 6, 1)
            .unwrap()
            .and_hms_opt(9, 0, 0)
            .unwrap();
        NewsWithCluster {
            news: AnalyzedNews {
                id: 1,
                normalized_id: 2,
                cluster_id: 3,
                headline: "Fed <hikes> rates & more".to_string(),
                content: "body".to_string(),
                headline_en: None,
                content_en: None,
                urls: serde_json::json!(["https://example.com/a"]),
                published_time: Some(t),
                ai_hotness: 0.83,
                tickers: serde_json::json!(["USD"]),
                reasoning: None,
                created_at: t,
            },
            doc_count: 2,
            first_time: t,
            last_time: t + chrono::Duration::hours(2),
        }
    }

    #[test]
    fn dangling_tokens_are_closed() {
        assert_eq!(close_dangling_markdown("*bold"), "*bold*");
        assert_eq!(close_dangling_markdown("_it *b*"), "_it *b*_");
        assert_eq!(close_dangling_markdown("a ```rs\ncode"), "a ```rs\ncode\n```");
        assert_eq!(close_dangling_markdown("`x`"), "`x`");
    }

    #[test]
    fn balanced_text_is_untouched() {
        let text = "*bold* _italic_ `code` ```\nblock\n```";
        assert_eq!(close_dangling_markdown(text), text);
    }

    #[test]
    fn emoji_scale_follows_hotness() {
        assert_eq!(hotness_emoji(0.9), "🔴🔥");
        assert_eq!(hotness_emoji(0.7), "🟠🔥");
        assert_eq!(hotness_emoji(0.5), "🟡");
        assert_eq!(hotness_emoji(0.1), "🟢");
    }

    #[test]
    fn list_cards_escape_user_text() {
        let message = top_news_message(&item(), 1, 5);
        assert!(message.contains("Fed &lt;hikes&gt; rates &amp; more"));
        assert!(message.contains("🔥 <b>Hotness:</b> 0.83/1.00"));
        assert!(message.contains("https://example.com/a"));
    }

    #[test]
    fn timeline_collapses_single_point() {
        let t = NaiveDate::from_ymd_opt(2025, 6, 1)
            .unwrap()
            .and_hms_opt(9, 0, 0)
            .unwrap();
        assert_eq!(timeline(t, t), "First: 01.06 09:00");
        assert!(timeline(t, t + chrono::Duration::hours(1)).contains("Latest:"));
    }

    #[test]
    fn alert_embeds_the_card() {
        let message = alert_message(&item(), "🔎 *TL;DR:* something");
        assert!(message.starts_with("🚨 *HOT NEWS!*"));
        assert!(message.contains("🔎 *TL;DR:* something"));
    }
}
