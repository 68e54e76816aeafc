use chrono::NaiveDateTime;
use serde::Deserialize;

use super::{LlmError, OpenRouterClient, parse};

/// Generates the per-story analytical card with the stronger analysis model.
/// Card generation must never take a story down with it, so the public entry
/// point falls back to a low-confidence stub on any failure.
pub struct NewsAnalyzer {
    client: OpenRouterClient,
}

pub struct CardInput<'a> {
    pub headline: &'a str,
    pub content: &'a str,
    pub tickers: &'a [String],
    pub hotness: f64,
    pub urls: &'a [String],
    pub published_at: Option<NaiveDateTime>,
    pub source: &'a str,
}

#[derive(Deserialize, Debug)]
pub struct AnalysisCard {
    #[serde(default)]
    pub analysis_text: String,
}

impl NewsAnalyzer {
    pub fn new(api_key: impl Into<String>, model: impl Into<String>) -> Result<Self, eyre::Error> {
        Ok(Self {
            client: OpenRouterClient::new(api_key, model)?,
        })
    }

    pub async fn generate_card(&self, input: &CardInput<'_>) -> AnalysisCard {
        match self.try_generate(input).await {
            Ok(card) => card,
            Err(err) => {
                tracing::warn!(?err, "Card generation failed, using fallback card");
                fallback_card(input)
            }
        }
    }

    async fn try_generate(&self, input: &CardInput<'_>) -> Result<AnalysisCard, LlmError> {
        let raw = self.client.complete(&card_prompt(input), 0.3, 1500).await?;
        let card: AnalysisCard = parse::parse_json_reply(&raw)?;
        if card.analysis_text.trim().is_empty() {
            return Err(LlmError::EmptyResponse);
        }
        Ok(card)
    }
}

fn card_prompt(input: &CardInput<'_>) -> String {
    let body: String = input.content.chars().take(2000).collect();
    let tickers = if input.tickers.is_empty() {
        "—".to_string()
    } else {
        input.tickers.join(", ")
    };
    let url = input
        .urls
        .first()
        .map(String::as_str)
        .unwrap_or("no link");
    let published = input
        .published_at
        .map(|t| t.format("%Y-%m-%d %H:%M UTC").to_string())
        .unwrap_or_else(|| "unknown".to_string());

    format!(
        r#"You are the analytics agent of a financial-news Telegram bot. Produce a compact, explainable analytical card. Write the card in the same language as the headline.

INPUT:
Headline: {headline}
Body: {body}
Tickers: {tickers}
Source: {source}
Published: {published}
URL: {url}
Hotness score: {hotness:.2}

The card uses Telegram-compatible Markdown and contains EXACTLY these fields, in this order:
1. TL;DR (20-30 words): what happened and why markets care
2. Key facts (2-4 bullets): concrete facts from the text, no speculation
3. Affected assets: comma-separated tickers or "—"
4. Sentiment: a number from -1 to 1 plus a short why
5. News score: a number from 0 to 1 plus its main drivers
6. Recommendation: "Monitor" / "Bullish (consider buy)" / "Bearish (consider sell)" / "No action" plus one or two sentences
7. Confidence: "Low" / "Medium" / "High" plus the reason

Style: terse, neutral, businesslike, at most 700 characters. Use hedged wording ("consider", "monitor", "may indicate") — no direct financial advice. If the text lacks data, say so in Confidence and TL;DR. Never invent numbers.

Answer with ONLY a JSON object:
{{
    "analysis_text": "🔎 *TL;DR:* ...\n\n📌 *Key facts:*\n• ...\n• ...\n\n📈 *Affected assets:* ...\n💡 *Sentiment:* ... — ...\n⭐ *News score:* ... — drivers: ...\n\n🧭 *Recommendation:* ... — ...\n🔒 *Confidence:* ... — ...\n\n🔗 {url}"
}}"#,
        headline = input.headline,
        body = body,
        tickers = tickers,
        source = input.source,
        published = published,
        url = url,
        hotness = input.hotness,
    )
}

/// Canned card used when the model fails or returns garbage. Tagged with
/// low confidence so readers know nothing was actually analyzed.
fn fallback_card(input: &CardInput<'_>) -> AnalysisCard {
    let url = input
        .urls
        .first()
        .map(String::as_str)
        .unwrap_or("no link");

    let analysis_text = format!(
        "🔎 *TL;DR:* Analysis temporarily unavailable — LLM processing error.\n\n\
         📌 *Key facts:*\n\
         • This story needs manual review\n\
         • Automatic processing failed\n\n\
         📈 *Affected assets:* —\n\
         💡 *Sentiment:* 0.0 — undetermined\n\
         ⭐ *News score:* {:.2} — rule-based hotness only\n\n\
         🧭 *Recommendation:* Monitor — needs a second look\n\
         🔒 *Confidence:* Low — automatic analysis unavailable\n\n\
         🔗 {}",
        input.hotness, url
    );

    AnalysisCard { analysis_text }
}

#[cfg(test)]
mod test {
    use super::*;

    fn input<'a>(urls: &'a [String], tickers: &'a [String]) -> CardInput<'a> {
        CardInput {
            headline: "Fed hikes rates by 25 bps",
            content: "The Federal Reserve raised rates.",
            tickers,
            hotness: 0.83,
            urls,
            published_at: None,
            source: "reuters.com",
        }
    }

    #[test]
    fn prompt_lists_all_seven_sections_in_order() {
        let urls = vec!["https://example.com/fed".to_string()];
        let tickers = vec!["USD".to_string()];
        let prompt = card_prompt(&input(&urls, &tickers));

        let sections = [
            "TL;DR",
            "Key facts",
            "Affected assets",
            "Sentiment",
            "News score",
            "Recommendation",
            "Confidence",
        ];
        let mut last = 0;
        for section in sections {
            let pos = prompt[last..]
                .find(section)
                .unwrap_or_else(|| panic!("missing section {section}"));
            last += pos;
        }
    }

    #[test]
    fn fallback_card_is_low_confidence_and_links_the_source() {
        let urls = vec!["https://example.com/fed".to_string()];
        let card = fallback_card(&input(&urls, &[]));
        assert!(card.analysis_text.contains("*Confidence:* Low"));
        assert!(card.analysis_text.contains("https://example.com/fed"));
        assert!(card.analysis_text.contains("0.83"));
    }

    #[test]
    fn fallback_card_without_urls_says_so() {
        let card = fallback_card(&input(&[], &[]));
        assert!(card.analysis_text.contains("no link"));
    }
}
