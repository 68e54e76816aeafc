use chrono::NaiveDateTime;
use diesel::prelude::*;
use pgvector::Vector;
use serde::Serialize;

#[derive(Queryable, Selectable, Debug, Serialize, Clone)]
#[diesel(table_name = crate::schema::articles)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct RawArticle {
    pub id: i32,
    pub title: String,
    pub link: String,
    pub published: Option<NaiveDateTime>,
    pub summary: Option<String>,
    pub source: Option<String>,
    pub feed_url: Option<String>,
    pub content: Option<String>,
    pub author: Option<String>,
    pub category: Option<String>,
    pub image_url: Option<String>,
    pub word_count: Option<i32>,
    pub reading_time: Option<i32>,
    pub is_processed: bool,
    pub created_at: NaiveDateTime,
}

#[derive(Queryable, Selectable, Debug, Serialize, Clone)]
#[diesel(table_name = crate::schema::normalized_articles)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct NormalizedArticle {
    pub id: i32,
    pub original_id: i32,
    pub title: String,
    pub content: String,
    pub link: Option<String>,
    pub source: Option<String>,
    pub published_at: Option<NaiveDateTime>,
    pub language_code: String,
    pub entities: serde_json::Value,
    pub quality_score: f64,
    pub word_count: i32,
    pub created_at: NaiveDateTime,
}

impl NormalizedArticle {
    /// Entities as plain strings, tolerating whatever shape ended up in the
    /// jsonb column.
    pub fn entity_list(&self) -> Vec<String> {
        self.entities
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
#[diesel(table_name = crate::schema::normalized_articles)]
pub struct NewNormalizedArticle {
    pub original_id: i32,
    pub title: String,
    pub content: String,
    pub link: Option<String>,
    pub source: Option<String>,
    pub published_at: Option<NaiveDateTime>,
    pub language_code: String,
    pub entities: serde_json::Value,
    pub quality_score: f64,
    pub word_count: i32,
}

#[derive(Insertable, Debug)]
#[diesel(table_name = crate::schema::embeddings)]
pub struct NewEmbedding {
    pub normalized_id: i32,
    pub embedding: Vector,
    pub model: String,
    pub dim: i32,
}

#[derive(Insertable, Debug)]
#[diesel(table_name = crate::schema::processing_log)]
pub struct NewProcessingLog {
    pub batch_id: String,
    pub total_articles: i32,
    pub processed_articles: i32,
    pub filtered_articles: i32,
    pub error_count: i32,
    pub processing_time_seconds: f64,
}
