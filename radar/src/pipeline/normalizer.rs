use diesel_async::AsyncConnection;
use regex::{Regex, RegexSet, RegexSetBuilder};
use scraper::Html;
use std::time::Instant;

use crate::models::article::{NewNormalizedArticle, NewProcessingLog, RawArticle};
use crate::{App, store};

/// Articles shorter than this are dropped outright.
const MIN_CONTENT_CHARS: usize = 20;
/// Share of emoji characters above which the text is treated as spam.
const MAX_EMOJI_RATIO: f64 = 0.10;
const MIN_QUALITY_SCORE: f64 = 0.2;
const MAX_ENTITIES: usize = 20;
const MAX_TITLE_CHARS: usize = 180;
const WORDS_PER_MINUTE: i32 = 200;

/// Promo/click-bait markers. Sources are bilingual, so the set is too.
const SPAM_PATTERNS: &[&str] = &[
    r"advertis",
    r"sponsor",
    r"partner\s+material",
    r"buy\s+now",
    r"discount\s+\d+\s*%",
    r"\d+\s*%\s+discount",
    r"today\s+only",
    r"limited\s+(time\s+)?offer",
    r"click\s+here",
    r"follow\s+the\s+link",
    r"promo\s?code",
    r"реклама",
    r"спонсор",
    r"партнерский\s+материал",
    r"купить\s+сейчас",
    r"скидка\s+\d+\s*%",
    r"только\s+сегодня",
    r"кликните\s+здесь",
    r"перейти\s+по\s+ссылке",
];

pub struct Normalizer {
    spam_patterns: RegexSet,
    word_re: Regex,
    ticker_re: Regex,
    proper_noun_re: Regex,
}

/// A cleaned article ready for insertion, minus the ids the store fills in.
#[derive(Debug)]
pub struct NormalizedDraft {
    pub title: String,
    pub content: String,
    pub language_code: String,
    pub entities: Vec<String>,
    pub quality_score: f64,
    pub word_count: i32,
    pub reading_time: i32,
}

#[derive(Debug, Default)]
pub struct BatchStats {
    pub total: usize,
    pub processed: usize,
    pub filtered: usize,
    pub errors: usize,
    pub elapsed_seconds: f64,
}

impl Normalizer {
    pub fn new() -> Self {
        Self {
            spam_patterns: RegexSetBuilder::new(SPAM_PATTERNS)
                .case_insensitive(true)
                .build()
                .expect("spam patterns are static and must compile"),
            word_re: Regex::new(r"\w+").expect("static regex"),
            ticker_re: Regex::new(r"\b[A-Z]{2,5}\b").expect("static regex"),
            proper_noun_re: Regex::new(r"\b[A-Z][a-z]+(?:\s+[A-Z][a-z]+)+\b")
                .expect("static regex"),
        }
    }

    /// Runs the full per-article pipeline. `None` means the article was
    /// filtered (spam or quality below threshold), which is not an error.
    pub fn normalize(&self, raw: &RawArticle) -> Option<NormalizedDraft> {
        let source_text = raw
            .content
            .as_deref()
            .filter(|c| !c.trim().is_empty())
            .or(raw.summary.as_deref())
            .unwrap_or_default();

        let content = clean_html(source_text);
        let title = clean_html(&raw.title);

        let spam = self.is_spam(&content);
        if spam {
            return None;
        }

        let language_code = detect_language(&content);
        let entities = self.extract_entities(&content);

        let quality_score = self.quality_score(&title, &content, &raw.link, raw.source.as_deref());
        if quality_score < MIN_QUALITY_SCORE {
            return None;
        }

        let title = repair_title(&title, &content);

        let word_count = self.word_re.find_iter(&content).count() as i32;
        let reading_time = (word_count / WORDS_PER_MINUTE).max(1);

        Some(NormalizedDraft {
            title,
            content,
            language_code,
            entities,
            quality_score,
            word_count,
            reading_time,
        })
    }

    pub fn is_spam(&self, content: &str) -> bool {
        let trimmed = content.trim();
        if trimmed.chars().count() < MIN_CONTENT_CHARS {
            return true;
        }
        if self.spam_patterns.is_match(trimmed) {
            return true;
        }
        emoji_ratio(trimmed) > MAX_EMOJI_RATIO
    }

    /// Heuristic entities: ticker-shaped uppercase runs plus title-case
    /// multiword phrases, first occurrence wins, capped at 20.
    pub fn extract_entities(&self, text: &str) -> Vec<String> {
        let mut entities: Vec<String> = Vec::new();
        let candidates = self
            .ticker_re
            .find_iter(text)
            .chain(self.proper_noun_re.find_iter(text));
        for m in candidates {
            let candidate = m.as_str().to_string();
            if !entities.contains(&candidate) {
                entities.push(candidate);
            }
            if entities.len() >= MAX_ENTITIES {
                break;
            }
        }
        entities
    }

    fn quality_score(
        &self,
        title: &str,
        content: &str,
        link: &str,
        source: Option<&str>,
    ) -> f64 {
        let mut score = 0.0;

        let content_len = content.chars().count();
        if content_len >= 500 {
            score += 0.3;
        } else if content_len >= 200 {
            score += 0.2;
        }

        if title.chars().count() > 10 {
            score += 0.2;
        }
        if !link.trim().is_empty() {
            score += 0.1;
        }
        if source.is_some_and(|s| !s.trim().is_empty()) {
            score += 0.1;
        }

        if self.is_spam(content) {
            score *= 0.3;
        } else {
            score += 0.3;
        }

        score.min(1.0)
    }
}

impl Default for Normalizer {
    fn default() -> Self {
        Self::new()
    }
}

/// Decodes entities, drops tags and control characters (NUL, vertical tab,
/// form feed, BOM) and collapses whitespace.
pub fn clean_html(text: &str) -> String {
    if text.is_empty() {
        return String::new();
    }

    let fragment = Html::parse_fragment(text);
    let text: String = fragment.root_element().text().collect::<Vec<_>>().join(" ");

    let text: String = text
        .chars()
        .filter(|c| !matches!(c, '\0' | '\u{000B}' | '\u{000C}' | '\u{FEFF}'))
        .collect();

    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Language of the first 1000 chars, `unknown` when the detector has no
/// reliable signal.
pub fn detect_language(text: &str) -> String {
    let sample: String = text.chars().take(1000).collect();
    if sample.trim().chars().count() < 10 {
        return "unknown".to_string();
    }

    match whatlang::detect(&sample) {
        Some(info) if info.is_reliable() => info.lang().code().to_string(),
        _ => "unknown".to_string(),
    }
}

fn is_emoji(c: char) -> bool {
    matches!(c,
        '\u{1F300}'..='\u{1FAFF}' | '\u{2600}'..='\u{27BF}' | '\u{FE0F}' | '\u{1F1E6}'..='\u{1F1FF}'
    )
}

fn emoji_ratio(text: &str) -> f64 {
    let total = text.chars().count();
    if total == 0 {
        return 0.0;
    }
    let emoji = text.chars().filter(|c| is_emoji(*c)).count();
    emoji as f64 / total as f64
}

pub fn strip_emoji(text: &str) -> String {
    text.chars()
        .filter(|c| !is_emoji(*c))
        .collect::<String>()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

/// Replaces broken titles (missing, body-copied, or oversized) with one
/// synthesized from the first sentence of the content.
pub fn repair_title(title: &str, content: &str) -> String {
    let title = title.trim();
    let title_chars = title.chars().count();

    let head: String = content.chars().take(200).collect();
    let body_prefix_copy = !title.is_empty()
        && content.starts_with(title)
        && title_chars * 10 >= head.chars().count() * 8;

    let broken = title.is_empty()
        || title == content
        || body_prefix_copy
        || title_chars > MAX_TITLE_CHARS;

    if !broken {
        return strip_emoji(title);
    }

    strip_emoji(&synthesize_title(content))
}

/// First sentence boundary between 40 and 160 chars, else a word-boundary
/// truncation at 160 with an ellipsis.
fn synthesize_title(content: &str) -> String {
    let chars: Vec<char> = content.chars().collect();

    for (i, c) in chars.iter().enumerate().take(160) {
        if matches!(c, '.' | '!' | '?') && (40..=160).contains(&(i + 1)) {
            return chars[..=i].iter().collect::<String>().trim().to_string();
        }
    }

    if chars.len() <= 160 {
        return content.trim().to_string();
    }

    let cut: String = chars[..160].iter().collect();
    let cut = match cut.rfind(' ') {
        Some(pos) => &cut[..pos],
        None => &cut,
    };
    format!("{}…", cut.trim_end())
}

/// Normalizes every raw article past the high-water mark: clean, filter,
/// score, insert. Each article commits (or rolls back) on its own so one bad
/// row never stalls the batch; the mark advances over dropped rows too.
pub async fn run_batch(ctx: &App, normalizer: &Normalizer) -> Result<BatchStats, eyre::Error> {
    let started = Instant::now();
    let batch_id = uuid::Uuid::new_v4().to_string();

    let mut conn = ctx.diesel.get().await?;
    let state = store::state::get(&mut conn).await?;
    let batch = store::articles::next_unnormalized(
        &mut conn,
        state.last_normalized_id,
        ctx.config.batch_size,
    )
    .await?;

    let mut stats = BatchStats {
        total: batch.len(),
        ..Default::default()
    };
    if batch.is_empty() {
        return Ok(stats);
    }

    tracing::debug!(batch_id = %batch_id, total = batch.len(), "Normalizing raw articles");

    for raw in batch {
        let draft = normalizer.normalize(&raw);
        let raw_id = raw.id;

        let committed = conn
            .transaction::<_, diesel::result::Error, _>(|conn| {
                Box::pin(async move {
                    let inserted = match draft {
                        Some(draft) => {
                            let row = NewNormalizedArticle {
                                original_id: raw.id,
                                title: draft.title,
                                content: draft.content,
                                link: Some(raw.link.clone()),
                                source: raw.source.clone(),
                                published_at: raw.published,
                                language_code: draft.language_code,
                                entities: serde_json::json!(draft.entities),
                                quality_score: draft.quality_score,
                                word_count: draft.word_count,
                            };
                            store::articles::insert_normalized(conn, &row).await?;
                            true
                        }
                        None => false,
                    };

                    store::articles::mark_processed(conn, &[raw.id]).await?;
                    store::state::set_last_normalized_id(conn, raw.id).await?;
                    Ok(inserted)
                })
            })
            .await;

        match committed {
            Ok(true) => stats.processed += 1,
            Ok(false) => stats.filtered += 1,
            Err(err) => {
                tracing::warn!(article_id = raw_id, ?err, "Failed to normalize article");
                stats.errors += 1;
            }
        }
    }

    stats.elapsed_seconds = started.elapsed().as_secs_f64();

    let log = NewProcessingLog {
        batch_id,
        total_articles: stats.total as i32,
        processed_articles: stats.processed as i32,
        filtered_articles: stats.filtered as i32,
        error_count: stats.errors as i32,
        processing_time_seconds: stats.elapsed_seconds,
    };
    if let Err(err) = store::articles::record_batch(&mut conn, &log).await {
        tracing::warn!(?err, "Failed to record processing log row");
    }

    Ok(stats)
}

#[cfg(test)]
mod test {
    use super::*;

    fn raw(title: &str, content: &str) -> RawArticle {
        RawArticle {
            id: 1,
            title: title.to_string(),
            link: "https://example.com/a".to_string(),
            published: None,
            summary: None,
            source: Some("example.com".to_string()),
            feed_url: None,
            content: Some(content.to_string()),
            author: None,
            category: None,
            image_url: None,
            word_count: None,
            reading_time: None,
            is_processed: false,
            created_at: chrono::NaiveDateTime::default(),
        }
    }

    #[test]
    fn strips_tags_entities_and_control_chars() {
        let cleaned = clean_html("<p>Fed&nbsp;hikes <b>rates</b></p>\u{0}\u{FEFF} by  25bps");
        assert_eq!(cleaned, "Fed hikes rates by 25bps");
    }

    #[test]
    fn promo_text_is_spam() {
        let normalizer = Normalizer::new();
        assert!(normalizer.is_spam("Buy now! 50% discount! Click here!"));
    }

    #[test]
    fn spam_article_is_filtered_not_stored() {
        let normalizer = Normalizer::new();
        assert!(
            normalizer
                .normalize(&raw("Great deal", "Buy now! 50% discount! Click here!"))
                .is_none()
        );
    }

    #[test]
    fn short_content_is_spam() {
        let normalizer = Normalizer::new();
        assert!(normalizer.is_spam("too short"));
    }

    #[test]
    fn emoji_heavy_text_is_spam() {
        let normalizer = Normalizer::new();
        let text = "🔥🔥🔥🔥🔥 market update 🔥🔥🔥🔥🔥";
        assert!(normalizer.is_spam(text));
    }

    #[test]
    fn decent_article_passes_with_quality_score() {
        let normalizer = Normalizer::new();
        let body = "The Federal Reserve raised its benchmark interest rate by 25 basis \
                    points on Wednesday, citing persistent inflation pressure across the \
                    services sector. Chair remarks pointed to a data-dependent path for \
                    the rest of the year, and futures markets repriced the odds of \
                    another hike before December. Treasury yields rose across the curve \
                    while equities gave back early gains in the afternoon session. Bank \
                    analysts said the statement language kept every option open going \
                    into the next meeting of the committee.";
        let draft = normalizer
            .normalize(&raw("Fed hikes rates by 25 bps", body))
            .expect("should normalize");
        // len >= 500 (0.3) + title (0.2) + link (0.1) + source (0.1) + non-spam (0.3)
        assert!((draft.quality_score - 1.0).abs() < 1e-9);
        assert_eq!(draft.language_code, "eng");
        assert!(draft.word_count > 50);
        assert_eq!(draft.reading_time, 1);
    }

    #[test]
    fn entities_are_deduplicated_and_capped() {
        let normalizer = Normalizer::new();
        let text = "AAPL rose while AAPL options surged; Goldman Sachs and Morgan Stanley \
                    both cited TSLA, BTC and ETH flows.";
        let entities = normalizer.extract_entities(text);
        assert_eq!(
            entities.iter().filter(|e| e.as_str() == "AAPL").count(),
            1
        );
        assert!(entities.contains(&"Goldman Sachs".to_string()));
        assert!(entities.contains(&"TSLA".to_string()));
        assert!(entities.len() <= MAX_ENTITIES);
    }

    #[test]
    fn detect_language_needs_signal() {
        assert_eq!(detect_language("ok"), "unknown");
        assert_eq!(
            detect_language(
                "Центральный банк России повысил ключевую ставку до рекордного уровня \
                 на фоне ускорения инфляции и ослабления курса рубля на валютном рынке"
            ),
            "rus"
        );
    }

    #[test]
    fn keeps_good_title() {
        assert_eq!(
            repair_title("Fed hikes rates by 25 bps", "Some unrelated body text here."),
            "Fed hikes rates by 25 bps"
        );
    }

    #[test]
    fn synthesizes_title_from_first_sentence() {
        let content = "The European Central Bank left its deposit rate unchanged at the \
                       June meeting. Markets had priced a small chance of a cut.";
        let title = repair_title("", content);
        assert_eq!(
            title,
            "The European Central Bank left its deposit rate unchanged at the June meeting."
        );
    }

    #[test]
    fn truncates_when_no_sentence_boundary() {
        let content = "word ".repeat(100);
        let title = repair_title(&content, &content);
        assert!(title.chars().count() <= 161);
        assert!(title.ends_with('…'));
    }

    #[test]
    fn body_prefix_title_is_replaced() {
        let body = "Bitcoin climbed above one hundred twenty thousand dollars for the \
                    first time since August! Traders pointed to ETF inflows as the \
                    driver of the move.";
        let head: String = body.chars().take(170).collect();
        let title = repair_title(&head, body);
        assert!(title.chars().count() < head.chars().count());
        assert!(title.starts_with("Bitcoin climbed"));
    }

    #[test]
    fn title_emoji_are_stripped() {
        assert_eq!(
            repair_title("🔥 Fed hikes rates by 25 bps 🔥", "irrelevant body"),
            "Fed hikes rates by 25 bps"
        );
    }
}
