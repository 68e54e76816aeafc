use chrono::NaiveDateTime;
use diesel::prelude::*;
use serde::Serialize;

#[derive(Queryable, QueryableByName, Selectable, Debug, Serialize, Clone)]
#[diesel(table_name = crate::schema::llm_analyzed_news)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct AnalyzedNews {
    pub id: i32,
    pub normalized_id: i32,
    pub cluster_id: i32,
    pub headline: String,
    pub content: String,
    pub headline_en: Option<String>,
    pub content_en: Option<String>,
    pub urls: serde_json::Value,
    pub published_time: Option<NaiveDateTime>,
    pub ai_hotness: f64,
    pub tickers: serde_json::Value,
    pub reasoning: Option<String>,
    pub created_at: NaiveDateTime,
}

impl AnalyzedNews {
    pub fn ticker_list(&self) -> Vec<String> {
        self.tickers
            .as_array()
            .map(|values| {
                values
                    .iter()
                    .filter_map(|v| v.as_str().map(str::to_string))
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn url_list(&self) -> Vec<String> {
        self.urls
            .as_array()
            .map(|values| {
                values
                    .iter()
                    .filter_map(|v| v.as_str().map(str::to_string))
                    .collect()
            })
            .unwrap_or_default()
    }
}

#[derive(Insertable, Debug)]
#[diesel(table_name = crate::schema::llm_analyzed_news)]
pub struct NewAnalyzedNews {
    pub normalized_id: i32,
    pub cluster_id: i32,
    pub headline: String,
    pub content: String,
    pub headline_en: Option<String>,
    pub content_en: Option<String>,
    pub urls: serde_json::Value,
    pub published_time: Option<NaiveDateTime>,
    pub ai_hotness: f64,
    pub tickers: serde_json::Value,
    pub reasoning: Option<String>,
}
