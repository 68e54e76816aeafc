use std::time::Duration;

pub const FASTEMBED_CACHE_DIR: &str = ".fastembed_cache";

#[derive(Clone)]
pub enum Env {
    Dev,
    Staging,
    Production,
}

pub struct ServerConfig {
    pub env: Env,

    /// Assembled from the POSTGRES_* variables.
    pub database_url: String,

    pub api_port: u16,

    /// Pipeline loop cadence and batch sizes.
    pub check_interval: Duration,
    pub batch_size: i64,
    pub llm_limit: i64,

    /// Seconds between LLM calls (request/second throttle).
    pub llm_delay: f64,
    /// Fast model for hotness scoring.
    pub llm_model: String,
    /// Stronger model for analytical card generation.
    pub llm_analysis_model: String,
    pub openrouter_api_key: Option<String>,

    pub telegram_bot_token: Option<String>,
    /// Pre-subscription deployments configured a single chat id; when set it
    /// is seeded into the subscribers table at bot startup.
    pub legacy_chat_id: Option<i64>,

    pub hotness_threshold: f64,
    pub monitor_interval: Duration,
}

fn var(key: &str) -> Result<Option<String>, String> {
    match std::env::var(key) {
        Ok(env) => Ok(Some(env)),
        Err(e) => match e {
            std::env::VarError::NotPresent => Ok(None),
            std::env::VarError::NotUnicode(_) => Err(format!(
                "Could not get the environment variable `{key}` due to unicode error"
            )),
        },
    }
}

fn var_or(key: &str, default: &str) -> String {
    match var(key) {
        Ok(Some(val)) => val,
        Ok(None) => default.to_string(),
        Err(e) => {
            tracing::error!("Could not read environment variable `{key}`: {e}");
            std::process::exit(1)
        }
    }
}

fn parsed_var<T: std::str::FromStr>(key: &str, default: T) -> T {
    match var(key) {
        Ok(Some(val)) => match val.parse() {
            Ok(parsed) => parsed,
            Err(_) => {
                tracing::warn!("Environment variable `{key}` has an invalid value, using default");
                default
            }
        },
        _ => default,
    }
}

impl ServerConfig {
    pub fn new_from_env() -> Self {
        let env = match var("ENVIRONMENT") {
            Ok(Some(env)) => match env.as_str() {
                "dev" => Env::Dev,
                "staging" => Env::Staging,
                "production" => Env::Production,
                _ => Env::Dev,
            },
            _ => Env::Dev,
        };

        let host = var_or("POSTGRES_HOST", "localhost");
        let port = var_or("POSTGRES_PORT", "5432");
        let db = var_or("POSTGRES_DB", "radar");
        let user = var_or("POSTGRES_USER", "postgres");
        let password = var("POSTGRES_PASSWORD").ok().flatten();
        let database_url = match password {
            Some(password) if !password.is_empty() => {
                format!("postgres://{user}:{password}@{host}:{port}/{db}")
            }
            _ => format!("postgres://{user}@{host}:{port}/{db}"),
        };

        let openrouter_api_key = var("OPENROUTER_API_KEY").ok().flatten();
        if openrouter_api_key.is_none() {
            tracing::warn!("Missing environment variable `OPENROUTER_API_KEY`");
        }
        let telegram_bot_token = var("TELEGRAM_BOT_TOKEN").ok().flatten();
        if telegram_bot_token.is_none() {
            tracing::warn!("Missing environment variable `TELEGRAM_BOT_TOKEN`");
        }

        ServerConfig {
            env,
            database_url,
            api_port: parsed_var("API_PORT", 8000),
            check_interval: Duration::from_secs(parsed_var("PIPELINE_CHECK_INTERVAL", 300)),
            batch_size: parsed_var("PIPELINE_BATCH_SIZE", 100),
            llm_limit: parsed_var("PIPELINE_LLM_LIMIT", 50),
            llm_delay: parsed_var("LLM_DELAY", 1.0),
            llm_model: var_or("LLM_MODEL", "deepseek/deepseek-chat"),
            llm_analysis_model: var_or("LLM_ANALYSIS_MODEL", "anthropic/claude-3.5-sonnet"),
            openrouter_api_key,
            telegram_bot_token,
            legacy_chat_id: var("TELEGRAM_CHAT_ID")
                .ok()
                .flatten()
                .and_then(|raw| raw.parse().ok()),
            hotness_threshold: parsed_var("HOT_NEWS_THRESHOLD", 0.7),
            monitor_interval: Duration::from_secs(parsed_var("HOT_NEWS_CHECK_INTERVAL", 60)),
        }
    }
}
