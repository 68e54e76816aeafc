use chrono::NaiveDateTime;
use diesel::prelude::*;
use serde::Serialize;
use std::collections::BTreeMap;

#[derive(Queryable, Selectable, Debug, Serialize, Clone)]
#[diesel(table_name = crate::schema::story_clusters)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct StoryCluster {
    pub id: i32,
    pub headline: String,
    pub lang: String,
    pub first_time: NaiveDateTime,
    pub last_time: NaiveDateTime,
    pub domains: serde_json::Value,
    pub urls: serde_json::Value,
    pub doc_count: i32,
    pub strongest_domain: Option<String>,
    pub earliest_url: Option<String>,
    pub latest_url: Option<String>,
    pub factors: serde_json::Value,
    pub hotness: f64,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

impl StoryCluster {
    /// Per-domain member counts. BTreeMap keeps the jsonb round-trip stable.
    pub fn domain_counts(&self) -> BTreeMap<String, i64> {
        self.domains
            .as_object()
            .map(|map| {
                map.iter()
                    .filter_map(|(k, v)| v.as_i64().map(|n| (k.clone(), n)))
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
#[diesel(table_name = crate::schema::story_clusters)]
pub struct NewStoryCluster {
    pub headline: String,
    pub lang: String,
    pub first_time: NaiveDateTime,
    pub last_time: NaiveDateTime,
    pub domains: serde_json::Value,
    pub urls: serde_json::Value,
    pub doc_count: i32,
}

#[derive(Queryable, Selectable, Debug, Serialize, Clone)]
#[diesel(table_name = crate::schema::cluster_members)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct ClusterMember {
    pub cluster_id: i32,
    pub normalized_id: i32,
    pub url: Option<String>,
    pub site: String,
    pub time_utc: NaiveDateTime,
}

#[derive(Insertable, Debug)]
#[diesel(table_name = crate::schema::cluster_members)]
pub struct NewClusterMember {
    pub cluster_id: i32,
    pub normalized_id: i32,
    pub url: Option<String>,
    pub site: String,
    pub time_utc: NaiveDateTime,
}
