use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use std::time::Duration;

pub mod analyzer;
pub mod parse;

pub const OPENROUTER_URL: &str = "https://openrouter.ai/api/v1/chat/completions";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(thiserror::Error, Debug)]
pub enum LlmError {
    #[error("OpenRouter request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("rate limited by OpenRouter")]
    RateLimited,

    #[error("OpenRouter rejected the API key (HTTP {status})")]
    Auth { status: u16 },

    #[error("OpenRouter returned HTTP {status}: {body}")]
    Status { status: u16, body: String },

    #[error("model returned an empty response")]
    EmptyResponse,

    #[error("could not parse model response: {0}")]
    Parse(String),
}

impl LlmError {
    /// Transient failures are retried on a later cycle without giving up on
    /// the cluster.
    pub fn is_transient(&self) -> bool {
        match self {
            LlmError::RateLimited => true,
            LlmError::Http(err) => err.is_timeout() || err.is_connect(),
            LlmError::Status { status, .. } => *status >= 500,
            _ => false,
        }
    }
}

/// Minimal chat-completions client against the OpenRouter endpoint. One
/// instance per model; the enricher and the card analyzer keep their own.
pub struct OpenRouterClient {
    http: reqwest::Client,
    api_key: String,
    model: String,
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    temperature: f32,
    max_tokens: u32,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatChoiceMessage,
}

#[derive(Deserialize)]
struct ChatChoiceMessage {
    content: Option<String>,
}

impl OpenRouterClient {
    pub fn new(api_key: impl Into<String>, model: impl Into<String>) -> Result<Self, eyre::Error> {
        let http = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()?;
        Ok(Self {
            http,
            api_key: api_key.into(),
            model: model.into(),
        })
    }

    /// Single prompt in, assistant text out, with the OpenRouter status
    /// taxonomy mapped onto `LlmError`.
    pub async fn complete(
        &self,
        prompt: &str,
        temperature: f32,
        max_tokens: u32,
    ) -> Result<String, LlmError> {
        let request = ChatRequest {
            model: &self.model,
            messages: vec![ChatMessage {
                role: "user",
                content: prompt,
            }],
            temperature,
            max_tokens,
        };

        let response = self
            .http
            .post(OPENROUTER_URL)
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await?;

        let status = response.status();
        if status.as_u16() == 429 {
            return Err(LlmError::RateLimited);
        }
        if matches!(status.as_u16(), 401 | 403) {
            return Err(LlmError::Auth {
                status: status.as_u16(),
            });
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(LlmError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let reply: ChatResponse = response.json().await?;
        let content = reply
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .unwrap_or_default();

        if content.trim().is_empty() {
            return Err(LlmError::EmptyResponse);
        }
        Ok(content)
    }

    /// Scores a story for market hotness and extracts tickers plus an
    /// English rendering. Temperature is deliberately high-ish so scores
    /// spread instead of clumping on round numbers.
    pub async fn score_news(&self, input: &ScoringInput<'_>) -> Result<NewsScore, LlmError> {
        let raw = self.complete(&scoring_prompt(input), 0.5, 500).await?;
        let parsed: RawNewsScore = parse::parse_json_reply(&raw)?;
        Ok(parsed.validated())
    }
}

pub struct ScoringInput<'a> {
    pub headline: &'a str,
    pub content: &'a str,
    pub tickers: &'a [String],
    pub source: &'a str,
    pub published_at: Option<NaiveDateTime>,
    pub url: Option<&'a str>,
    pub rule_hotness: f64,
}

/// What the model is asked to return; everything optional so a partial
/// answer still parses.
#[derive(Deserialize, Debug)]
struct RawNewsScore {
    #[serde(default)]
    hotness: f64,
    #[serde(default)]
    tickers: serde_json::Value,
    #[serde(default)]
    reasoning: String,
    #[serde(default)]
    headline_en: Option<String>,
    #[serde(default)]
    content_en: Option<String>,
}

#[derive(Debug, Clone)]
pub struct NewsScore {
    pub hotness: f64,
    pub tickers: Vec<String>,
    pub reasoning: String,
    pub headline_en: Option<String>,
    pub content_en: Option<String>,
}

impl RawNewsScore {
    fn validated(self) -> NewsScore {
        let tickers = match self.tickers {
            serde_json::Value::Array(values) => values
                .into_iter()
                .filter_map(|v| match v {
                    serde_json::Value::String(s) => Some(s),
                    other => other.as_i64().map(|n| n.to_string()),
                })
                .filter(|s| !s.trim().is_empty())
                .collect(),
            serde_json::Value::String(s) if !s.trim().is_empty() => s
                .split(',')
                .map(|part| part.trim().to_string())
                .filter(|part| !part.is_empty())
                .collect(),
            _ => Vec::new(),
        };

        NewsScore {
            hotness: self.hotness.clamp(0.0, 1.0),
            tickers,
            reasoning: self.reasoning,
            headline_en: self.headline_en.filter(|s| !s.trim().is_empty()),
            content_en: self.content_en.filter(|s| !s.trim().is_empty()),
        }
    }
}

fn scoring_prompt(input: &ScoringInput<'_>) -> String {
    let body: String = input.content.chars().take(2000).collect();
    let tickers = if input.tickers.is_empty() {
        "—".to_string()
    } else {
        input.tickers.join(", ")
    };
    let published = input
        .published_at
        .map(|t| t.format("%Y-%m-%d %H:%M UTC").to_string())
        .unwrap_or_else(|| "unknown".to_string());

    format!(
        r#"You are a strict financial-markets analyst. Score this news story with the multi-factor hotness formula.

HEADLINE: {headline}
BODY: {body}
CANDIDATE TICKERS: {tickers}
SOURCE: {source}
PUBLISHED: {published}
URL: {url}
RULE-BASED HOTNESS: {rule_hotness:.2}

HOTNESS (0.00-1.00) is the sum of five components:
1) scale (0-0.30): global events 0.30, national (central bank decisions, elections) 0.20-0.25, sector 0.10-0.15, single-company 0.05-0.10, local noise 0.00-0.05.
2) market_impact (0-0.30): immediate repricing 0.30, medium-term direct (rates, tariffs) 0.20-0.25, indirect 0.10-0.15, weak 0.05-0.10, none 0.00-0.05.
3) urgency (0-0.20): trading halts / breaking 0.20-0.15, relevant today 0.10, this week 0.05, not urgent 0.00.
4) novelty (0-0.20): unprecedented 0.20, rare 0.15, infrequent 0.10, periodic (earnings) 0.05, routine 0.00.
5) materiality (0-0.10): named companies with figures 0.10, named without figures 0.07, sector only 0.05, indirect 0.02, none 0.00.

If the story is not about finance, economics or markets (sports, weather, crime, entertainment), set hotness between 0.00 and 0.10, tickers to [] and reasoning to "not market relevant".

Extract EVERY financial instrument mentioned: equities (AAPL, TSLA), crypto (BTC, ETH), indices (S&P500, NASDAQ), currencies (USD, EUR), commodities (GOLD, OIL).

Score precisely: use three decimals, never round to numbers like 0.25 or 0.70, and give similar stories different scores.

Also provide an English rendering of the headline and a one-paragraph English summary of the body (keep the original text when it is already English).

Answer with ONLY a JSON object:
{{
    "hotness": 0.583,
    "tickers": ["BTC", "USD"],
    "reasoning": "scale=0.152, market_impact=0.218, urgency=0.121, novelty=0.079, materiality=0.013",
    "headline_en": "...",
    "content_en": "..."
}}"#,
        headline = input.headline,
        body = body,
        tickers = tickers,
        source = input.source,
        published = published,
        url = input.url.unwrap_or("none"),
        rule_hotness = input.rule_hotness,
    )
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn validation_clamps_hotness_and_coerces_tickers() {
        let raw = RawNewsScore {
            hotness: 1.7,
            tickers: serde_json::json!(["AAPL", 42, "", "BTC"]),
            reasoning: "r".to_string(),
            headline_en: Some("  ".to_string()),
            content_en: Some("summary".to_string()),
        };
        let score = raw.validated();
        assert_eq!(score.hotness, 1.0);
        assert_eq!(score.tickers, vec!["AAPL", "42", "BTC"]);
        assert_eq!(score.headline_en, None);
        assert_eq!(score.content_en.as_deref(), Some("summary"));
    }

    #[test]
    fn comma_separated_ticker_string_is_split() {
        let raw = RawNewsScore {
            hotness: -0.3,
            tickers: serde_json::json!("BTC, ETH , "),
            reasoning: String::new(),
            headline_en: None,
            content_en: None,
        };
        let score = raw.validated();
        assert_eq!(score.hotness, 0.0);
        assert_eq!(score.tickers, vec!["BTC", "ETH"]);
    }

    #[test]
    fn scoring_prompt_carries_the_inputs() {
        let tickers = vec!["BTC".to_string()];
        let prompt = scoring_prompt(&ScoringInput {
            headline: "Bitcoin tops $120k",
            content: "Bitcoin rose above $120,000 on Tuesday.",
            tickers: &tickers,
            source: "reuters.com",
            published_at: None,
            url: Some("https://example.com/btc"),
            rule_hotness: 0.42,
        });
        assert!(prompt.contains("Bitcoin tops $120k"));
        assert!(prompt.contains("reuters.com"));
        assert!(prompt.contains("0.42"));
        assert!(prompt.contains("headline_en"));
    }
}
